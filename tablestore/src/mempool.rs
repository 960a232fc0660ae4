//! Slab allocator of fixed blocks and the discontiguous byte views built on
//! top of it (spec.md section 4.1).
//!
//! `bytes::Bytes` already gives us refcounted, zero-copy slicing, so `Piece`
//! is a thin wrapper over it rather than a hand rolled `(ptr, len)` pair —
//! same zero-copy guarantee the spec asks for, without `unsafe`. `MemPool`
//! keeps the accounting (`total`/`available`/`borrowed`) and block lending
//! semantics spec.md describes; what it lends out is a `BytesMut` the caller
//! fills and later freezes into `Piece`s.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

/// Default block size: ~1 MiB, matching spec.md's stated default.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub borrowed: usize,
}

struct Inner {
    free: Vec<BytesMut>,
    block_size: usize,
    total: usize,
    borrowed: usize,
}

/// Thread-safe pool of fixed-size blocks. Blocks may grow without bound (a
/// new one is allocated when the free list is empty); returned blocks go
/// back on [`Block`] drop.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<Mutex<Inner>>,
}

impl MemPool {
    pub fn new(block_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { free: Vec::new(), block_size, total: 0, borrowed: 0 })),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        PoolStats { total: inner.total, available: inner.total - inner.borrowed, borrowed: inner.borrowed }
    }

    /// Lend a block. Allocates a fresh one if the free list is empty.
    pub fn acquire(&self) -> Block {
        let mut inner = self.inner.lock().unwrap();
        let buf = inner.free.pop().unwrap_or_else(|| {
            inner.total += 1;
            BytesMut::with_capacity(inner.block_size)
        });
        inner.borrowed += 1;
        Block { buf: Some(buf), pool: self.clone() }
    }

    fn release(&self, mut buf: BytesMut) {
        let mut inner = self.inner.lock().unwrap();
        inner.borrowed -= 1;
        buf.clear();
        if buf.capacity() >= inner.block_size {
            inner.free.push(buf);
        } else {
            // undersized block (capacity was grown away from us, or shrunk); drop it and
            // shrink the total count rather than keep a block that won't satisfy future asks.
            inner.total -= 1;
        }
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// A lent, writable block. Returned to the pool automatically on drop.
pub struct Block {
    buf: Option<BytesMut>,
    pool: MemPool,
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl core::ops::Deref for Block {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("block used after take")
    }
}

impl core::ops::DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("block used after take")
    }
}

impl Block {
    /// Freeze the written prefix of this block into an immutable [`Piece`],
    /// consuming the block (it is not returned to the pool — its bytes are
    /// now owned by the `Piece`'s refcount; the pool simply replaces it with
    /// a fresh allocation on the next [`MemPool::acquire`]).
    pub fn freeze(mut self) -> Piece {
        let buf = self.buf.take().expect("block used after take");
        {
            // account for the block leaving circulation without a matching release.
            let mut inner = self.pool.inner.lock().unwrap();
            inner.borrowed -= 1;
            inner.total -= 1;
        }
        Piece(buf.freeze())
    }
}

/// Immutable, zero-copy byte view. Cloning is O(1) (refcount bump).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Piece(pub Bytes);

impl Piece {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Zero-copy sub-slice, mirroring `Bytes::slice`.
    pub fn slice(&self, range: core::ops::Range<usize>) -> Piece {
        Piece(self.0.slice(range))
    }
}

impl From<Bytes> for Piece {
    fn from(b: Bytes) -> Self {
        Piece(b)
    }
}

impl From<&'static [u8]> for Piece {
    fn from(b: &'static [u8]) -> Self {
        Piece(Bytes::from_static(b))
    }
}

impl From<Vec<u8>> for Piece {
    fn from(v: Vec<u8>) -> Self {
        Piece(Bytes::from(v))
    }
}

/// A discontiguous buffer: a sequence of [`Piece`]s. Used everywhere bytes
/// cross layers (request body, parsed response body, chunked transfer) so
/// that no layer needs to copy into one contiguous allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pieces(pub Vec<Piece>);

impl Pieces {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, piece: Piece) {
        if !piece.is_empty() {
            self.0.push(piece);
        }
    }

    pub fn total_len(&self) -> usize {
        self.0.iter().map(Piece::len).sum()
    }

    /// Concatenate into one contiguous buffer. Only used at the edges (e.g.
    /// handing a complete body to a user callback that wants `Vec<u8>`) —
    /// everything internal moves `Pieces` around unmerged.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for piece in &self.0 {
            out.extend_from_slice(piece.as_slice());
        }
        out
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Piece> {
        self.0.iter()
    }
}

impl FromIterator<Piece> for Pieces {
    fn from_iter<I: IntoIterator<Item = Piece>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A writable view into pool-owned memory, handed back to a caller filling a
/// block before it is frozen into a [`Piece`]. `Block` already implements
/// `DerefMut<Target = BytesMut>`, so this is just a documentation-friendly
/// alias for the common case of passing `&mut Block` around as "the writable
/// piece".
pub type MutableMemPiece = Block;
