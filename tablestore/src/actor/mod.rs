//! Single-consumer mailbox actors and the deadline timer built on top of
//! them (spec.md section 4.2).
//!
//! The original C++ SDK backs each actor with one OS thread and a condition
//! variable mailbox (see `examples/original_source/src/ots_static_index/threading.cpp`).
//! Design Notes section 9 says this maps cleanly onto native async tasks
//! pinned to an actor; that's what this module does: one `tokio::task` per
//! actor draining an unbounded mpsc channel of boxed closures, which gives
//! the same three guarantees spec.md asks for — enqueue-order execution, at
//! most one closure running at a time, and full drain before the actor ends
//! on close — for free from the channel and task model.

pub mod timer;

use futures_core::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = BoxFuture<'static, ()>;

/// A single actor: one mailbox, one worker task.
///
/// Jobs are futures rather than plain closures so that the per-request
/// orchestration chain (borrow connection -> write -> read -> callback, see
/// `pipeline.rs`) can run to completion on its pinned actor without hopping
/// back out to a separate task — Design Notes section 9 calls this out as
/// one of two equally acceptable ways to model the coroutine-like callback
/// chain, the other being an explicit state machine. Since the worker awaits
/// one job at a time, this still gives the three guarantees spec.md section
/// 4.2 asks for: enqueue-order execution, at most one job running at once,
/// and full drain before the actor ends on close.
pub struct Actor {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl Actor {
    fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx, handle }
    }

    /// Enqueue a synchronous closure. Closures for one actor run strictly in
    /// enqueue order and never overlap.
    pub fn push_back(&self, job: impl FnOnce() + Send + 'static) {
        self.push_back_future(Box::pin(async move { job() }));
    }

    /// Enqueue an async job (see struct docs). Same ordering/overlap
    /// guarantees as [`push_back`](Actor::push_back).
    pub fn push_back_future(&self, job: Job) {
        // a send error means the actor already closed; the pipeline treats a request pinned to
        // a closed actor as a bug rather than something to recover from, so it is only logged.
        if self.tx.send(job).is_err() {
            tracing::error!("push_back on a closed actor mailbox");
        }
    }

    /// Returns whether the mailbox is still accepting work (i.e. `close`
    /// hasn't been called and the worker hasn't panicked).
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// A cheap, `'static`, cloneable handle onto this actor's mailbox. Used
    /// by the pipeline and the alarm clock's retry scheduling, which need to
    /// hold onto "the actor this request is pinned to" across an `.await`
    /// without borrowing the `ActorPool`.
    pub fn handle(&self) -> ActorHandle {
        ActorHandle(self.tx.clone())
    }
}

/// Cloneable, `'static` handle onto one actor's mailbox (see
/// [`Actor::handle`]).
#[derive(Clone)]
pub struct ActorHandle(mpsc::UnboundedSender<Job>);

impl ActorHandle {
    pub fn push_back(&self, job: impl FnOnce() + Send + 'static) {
        self.push_back_future(Box::pin(async move { job() }));
    }

    pub fn push_back_future(&self, job: Job) {
        if self.0.send(job).is_err() {
            tracing::error!("push_back on a closed actor mailbox");
        }
    }
}

/// A fixed-size pool of actors. Requests are pinned to one actor by
/// `hash(tracker_id) mod actor_count`, so every callback for a given request
/// observes every other callback's writes without explicit synchronization.
pub struct ActorPool {
    actors: Vec<Actor>,
}

impl ActorPool {
    pub fn new(actor_count: usize) -> Self {
        assert!(actor_count > 0, "actor_count must be positive");
        Self { actors: (0..actor_count).map(|_| Actor::spawn()).collect() }
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// The actor index `tracker_id` is pinned to (spec.md: `hash(tracker_id)
    /// mod actor_count`).
    pub fn select_index(&self, tracker_id: &str) -> usize {
        fnv1a(tracker_id.as_bytes()) as usize % self.actors.len()
    }

    /// Select the actor pinned to `tracker_id`.
    pub fn select(&self, tracker_id: &str) -> &Actor {
        &self.actors[self.select_index(tracker_id)]
    }

    /// Same as [`select`](Self::select), but returns a cloneable `'static`
    /// handle rather than a borrow — what the pipeline and retry scheduling
    /// actually need, since they outlive any single call into the pool.
    pub fn handle_for(&self, tracker_id: &str) -> ActorHandle {
        self.actors[self.select_index(tracker_id)].handle()
    }

    /// Close every actor: each worker drains its remaining mailbox before
    /// exiting (spec.md 4.2 guarantee (c)), then this awaits every worker.
    pub async fn close(self) {
        for actor in &self.actors {
            drop(&actor.tx);
        }
        for actor in self.actors {
            drop(actor.tx);
            let _ = actor.handle.await;
        }
    }
}

// small, dependency-free, stable hash: good enough for actor selection, where we only need an
// even spread over `actor_count` buckets, not collision resistance.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
