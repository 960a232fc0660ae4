//! Background batcher that aggregates independent row-level requests into
//! `BatchWriteRow`/`BatchGetRow` RPCs (spec.md section 4.6, "Bulk
//! coordinator").
//!
//! Grounded in `examples/original_source/src/ots_static_index/bulk_executor.{h,cpp}`:
//! a background launcher wakes on a fixed interval, drains up to
//! `sBatchWriteLimit`/`sBatchGetRowLimit` pending row handles into one RPC
//! each, and splits the response back out to per-row futures
//! (`WriteHandler`/`GetRowHandler` there, oneshot channels here). `GetRange`
//! is passed straight through to the client, exactly as `BulkExecutor::GetRange`
//! does with its own `GetRangeHandler` future.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::client::{BatchGetGroup, BatchWriteGroup, GetRangeArgs, GetRangeResult, RowResult, WireClient};
use crate::error::Error;
use crate::value::{PrimaryKey, Row, Value};

/// Rows dequeued per `BatchWriteRow` RPC (spec.md default: 100).
pub const DEFAULT_BATCH_WRITE_LIMIT: usize = 100;
/// Rows dequeued per `BatchGetRow` RPC (spec.md default: 10).
pub const DEFAULT_BATCH_GET_ROW_LIMIT: usize = 10;
/// How often the background launcher wakes to drain pending rows (spec.md:
/// "periodically (≈5 ms)").
pub const DEFAULT_LAUNCH_INTERVAL: Duration = Duration::from_millis(5);

enum WriteOp {
    Put(Row),
    Delete(PrimaryKey),
}

struct WriteHandle {
    table_name: String,
    op: WriteOp,
    fingerprint: u64,
    tx: oneshot::Sender<RowResult>,
}

struct ReadHandle {
    table_name: String,
    primary_key: PrimaryKey,
    columns_to_get: Vec<String>,
    fingerprint: u64,
    tx: oneshot::Sender<RowResult>,
}

/// `hash(table_name) xor hash(pkey values)` — spec.md section 4.6's batch
/// fingerprint, used to keep `(table, pkey)` pairs unique within one
/// assembled batch.
fn fingerprint(table_name: &str, pkey: &PrimaryKey) -> u64 {
    fnv1a(table_name.as_bytes()) ^ hash_pkey(pkey)
}

fn hash_pkey(pkey: &PrimaryKey) -> u64 {
    let mut h = 0xcbf29ce484222325u64;
    for col in &pkey.0 {
        h ^= fnv1a(col.name.as_bytes());
        h = h.wrapping_mul(0x100000001b3);
        h ^= hash_value(&col.value);
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

fn hash_value(v: &Value) -> u64 {
    match v {
        Value::Integer(i) => fnv1a(&i.to_le_bytes()),
        Value::String(s) => fnv1a(s.as_ref()),
        Value::Binary(b) => fnv1a(b.as_ref()),
        Value::Boolean(b) => fnv1a(&[*b as u8]),
        Value::Double(d) => fnv1a(&d.to_le_bytes()),
        Value::InfMin => 1,
        Value::InfMax => 2,
        Value::AutoIncrement => 3,
        Value::None => 4,
    }
}

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

struct Queues {
    writes: VecDeque<WriteHandle>,
    reads: VecDeque<ReadHandle>,
    stop: bool,
}

struct Inner<C: WireClient + Send + Sync + 'static> {
    client: Arc<C>,
    queues: Mutex<Queues>,
    notify: Notify,
    batch_write_limit: usize,
    batch_get_row_limit: usize,
}

/// Batches single-row puts/deletes/gets into `BatchWriteRow`/`BatchGetRow`
/// RPCs on a background interval; `get_range` bypasses batching entirely
/// (spec.md: "GetRange is not batched").
pub struct BulkCoordinator<C: WireClient + Send + Sync + 'static> {
    inner: Arc<Inner<C>>,
    bg: JoinHandle<()>,
}

impl<C: WireClient + Send + Sync + 'static> BulkCoordinator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_limits(client, DEFAULT_BATCH_WRITE_LIMIT, DEFAULT_BATCH_GET_ROW_LIMIT)
    }

    pub fn with_limits(client: Arc<C>, batch_write_limit: usize, batch_get_row_limit: usize) -> Self {
        let inner = Arc::new(Inner {
            client,
            queues: Mutex::new(Queues { writes: VecDeque::new(), reads: VecDeque::new(), stop: false }),
            notify: Notify::new(),
            batch_write_limit,
            batch_get_row_limit,
        });
        let bg_inner = Arc::clone(&inner);
        let bg = tokio::spawn(async move { Self::bg_loop(bg_inner).await });
        Self { inner, bg }
    }

    async fn bg_loop(inner: Arc<Inner<C>>) {
        let mut ticker = tokio::time::interval(DEFAULT_LAUNCH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = inner.notify.notified() => {}
            }
            if inner.queues.lock().unwrap().stop {
                return;
            }
            let write_batch = {
                let mut q = inner.queues.lock().unwrap();
                pop_batch(&mut q.writes, inner.batch_write_limit, |h| h.fingerprint)
            };
            if !write_batch.is_empty() {
                Self::execute_write_batch(&inner, write_batch).await;
            }
            let read_batch = {
                let mut q = inner.queues.lock().unwrap();
                pop_batch(&mut q.reads, inner.batch_get_row_limit, |h| h.fingerprint)
            };
            if !read_batch.is_empty() {
                Self::execute_read_batch(&inner, read_batch).await;
            }
        }
    }

    /// Submit a single-row put; resolves once its batch completes (spec.md
    /// section 4.6 step 4/5).
    pub async fn put_row(&self, table_name: impl Into<String>, row: Row) -> RowResult {
        let table_name = table_name.into();
        let fingerprint = fingerprint(&table_name, &row.primary_key);
        let (tx, rx) = oneshot::channel();
        self.inner.queues.lock().unwrap().writes.push_back(WriteHandle { table_name, op: WriteOp::Put(row), fingerprint, tx });
        self.inner.notify.notify_one();
        rx.await.unwrap_or_else(|_| RowResult::Err(Error::validation("bulk coordinator dropped the request")))
    }

    pub async fn delete_row(&self, table_name: impl Into<String>, primary_key: PrimaryKey) -> RowResult {
        let table_name = table_name.into();
        let fingerprint = fingerprint(&table_name, &primary_key);
        let (tx, rx) = oneshot::channel();
        self.inner.queues.lock().unwrap().writes.push_back(WriteHandle {
            table_name,
            op: WriteOp::Delete(primary_key),
            fingerprint,
            tx,
        });
        self.inner.notify.notify_one();
        rx.await.unwrap_or_else(|_| RowResult::Err(Error::validation("bulk coordinator dropped the request")))
    }

    pub async fn get_row(&self, table_name: impl Into<String>, primary_key: PrimaryKey, columns_to_get: Vec<String>) -> RowResult {
        let table_name = table_name.into();
        let fingerprint = fingerprint(&table_name, &primary_key);
        let (tx, rx) = oneshot::channel();
        self.inner.queues.lock().unwrap().reads.push_back(ReadHandle { table_name, primary_key, columns_to_get, fingerprint, tx });
        self.inner.notify.notify_one();
        rx.await.unwrap_or_else(|_| RowResult::Err(Error::validation("bulk coordinator dropped the request")))
    }

    /// `GetRange` is issued straight to the client with no batching; on a
    /// temporary failure it is retried with a 5-20ms jittered delay (spec.md
    /// section 4.6).
    pub async fn get_range(&self, args: GetRangeArgs) -> Result<GetRangeResult, Error> {
        loop {
            match self.inner.client.get_range(args.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_temporary() => {
                    let delay_ms = rand::thread_rng().gen_range(5..=20);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_write_batch(inner: &Arc<Inner<C>>, batch: Vec<WriteHandle>) {
        struct GroupBuild {
            table_name: String,
            puts: Vec<Row>,
            put_idx: Vec<usize>,
            deletes: Vec<PrimaryKey>,
            del_idx: Vec<usize>,
        }

        let mut groups: Vec<GroupBuild> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for (i, h) in batch.iter().enumerate() {
            let gi = *group_of.entry(h.table_name.clone()).or_insert_with(|| {
                groups.push(GroupBuild { table_name: h.table_name.clone(), puts: vec![], put_idx: vec![], deletes: vec![], del_idx: vec![] });
                groups.len() - 1
            });
            match &h.op {
                WriteOp::Put(row) => {
                    groups[gi].puts.push(row.clone());
                    groups[gi].put_idx.push(i);
                }
                WriteOp::Delete(pk) => {
                    groups[gi].deletes.push(pk.clone());
                    groups[gi].del_idx.push(i);
                }
            }
        }

        let req_groups: Vec<BatchWriteGroup> = groups
            .iter()
            .map(|g| BatchWriteGroup { table_name: g.table_name.clone(), puts: g.puts.clone(), deletes: g.deletes.clone() })
            .collect();

        match inner.client.batch_write_row(req_groups).await {
            Err(err) => {
                // the whole RPC failed: every row goes back to the front of the queue
                // (spec.md section 4.6 step 5), unless the error isn't worth retrying.
                if err.is_temporary() {
                    requeue_front(&inner.queues, |q| &mut q.writes, batch);
                } else {
                    for h in batch {
                        let _ = h.tx.send(RowResult::Err(err.clone()));
                    }
                }
            }
            Ok(resp_groups) => {
                let mut handles: Vec<Option<WriteHandle>> = batch.into_iter().map(Some).collect();
                let mut retry: Vec<(usize, WriteHandle)> = Vec::new();
                for (g, resp) in groups.into_iter().zip(resp_groups) {
                    for (idx, result) in g.put_idx.into_iter().zip(resp.put_results) {
                        finish_or_retry(&mut handles, idx, result, &mut retry);
                    }
                    for (idx, result) in g.del_idx.into_iter().zip(resp.delete_results) {
                        finish_or_retry(&mut handles, idx, result, &mut retry);
                    }
                }
                if !retry.is_empty() {
                    retry.sort_by_key(|(idx, _)| *idx);
                    requeue_front(&inner.queues, |q| &mut q.writes, retry.into_iter().map(|(_, h)| h).collect());
                }
            }
        }
    }

    async fn execute_read_batch(inner: &Arc<Inner<C>>, batch: Vec<ReadHandle>) {
        struct GroupBuild {
            table_name: String,
            gets: Vec<(PrimaryKey, Vec<String>)>,
            idx: Vec<usize>,
        }

        let mut groups: Vec<GroupBuild> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for (i, h) in batch.iter().enumerate() {
            let gi = *group_of.entry(h.table_name.clone()).or_insert_with(|| {
                groups.push(GroupBuild { table_name: h.table_name.clone(), gets: vec![], idx: vec![] });
                groups.len() - 1
            });
            groups[gi].gets.push((h.primary_key.clone(), h.columns_to_get.clone()));
            groups[gi].idx.push(i);
        }

        let req_groups: Vec<BatchGetGroup> =
            groups.iter().map(|g| BatchGetGroup { table_name: g.table_name.clone(), gets: g.gets.clone() }).collect();

        match inner.client.batch_get_row(req_groups).await {
            Err(err) => {
                if err.is_temporary() {
                    requeue_front(&inner.queues, |q| &mut q.reads, batch);
                } else {
                    for h in batch {
                        let _ = h.tx.send(RowResult::Err(err.clone()));
                    }
                }
            }
            Ok(resp_groups) => {
                let mut handles: Vec<Option<ReadHandle>> = batch.into_iter().map(Some).collect();
                let mut retry: Vec<(usize, ReadHandle)> = Vec::new();
                for (g, resp) in groups.into_iter().zip(resp_groups) {
                    for (idx, result) in g.idx.into_iter().zip(resp.results) {
                        let handle = handles[idx].take().expect("row result consumed twice");
                        match result {
                            RowResult::Err(e) if e.is_temporary() => retry.push((idx, handle)),
                            other => {
                                let _ = handle.tx.send(other);
                            }
                        }
                    }
                }
                if !retry.is_empty() {
                    retry.sort_by_key(|(idx, _)| *idx);
                    requeue_front(&inner.queues, |q| &mut q.reads, retry.into_iter().map(|(_, h)| h).collect());
                }
            }
        }
    }

    /// Stop the background launcher once every already-queued row has had a
    /// chance to drain. New submissions after this call are never picked up.
    pub async fn shutdown(self) {
        self.inner.queues.lock().unwrap().stop = true;
        self.inner.notify.notify_one();
        let _ = self.bg.await;
    }
}

fn finish_or_retry(handles: &mut [Option<WriteHandle>], idx: usize, result: RowResult, retry: &mut Vec<(usize, WriteHandle)>) {
    let handle = handles[idx].take().expect("row result consumed twice");
    match result {
        RowResult::Err(e) if e.is_temporary() => retry.push((idx, handle)),
        other => {
            let _ = handle.tx.send(other);
        }
    }
}

fn requeue_front<T>(queues: &Mutex<Queues>, select: impl Fn(&mut Queues) -> &mut VecDeque<T>, items: Vec<T>) {
    let mut q = queues.lock().unwrap();
    let deque = select(&mut q);
    for item in items.into_iter().rev() {
        deque.push_front(item);
    }
}

/// Dequeue up to `limit` items, skipping (and leaving queued, in order, for
/// the next batch) any item whose fingerprint collides with one already
/// selected (spec.md section 4.6 step 3).
fn pop_batch<T>(queue: &mut VecDeque<T>, limit: usize, fingerprint_of: impl Fn(&T) -> u64) -> Vec<T> {
    let mut batch = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();
    let mut remainder = VecDeque::with_capacity(queue.len());
    while let Some(item) = queue.pop_front() {
        if batch.len() < limit && seen.insert(fingerprint_of(&item)) {
            batch.push(item);
        } else {
            remainder.push_back(item);
        }
    }
    *queue = remainder;
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BatchGetGroupResult, BatchWriteGroupResult, GetRangeArgs, GetRangeResult};
    use crate::error::{error_code, TransportStatus};
    use crate::schema::TableOptions;
    use crate::value::PrimaryKeyColumn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        write_calls: AtomicUsize,
        write_response: Mutex<Option<Result<Vec<BatchWriteGroupResult>, Error>>>,
    }

    impl StubClient {
        fn new() -> Self {
            Self { write_calls: AtomicUsize::new(0), write_response: Mutex::new(None) }
        }
    }

    impl WireClient for StubClient {
        async fn create_table(&self, _schema: &crate::schema::TableSchema) -> Result<(), Error> {
            unimplemented!()
        }
        async fn list_table(&self) -> Result<Vec<String>, Error> {
            unimplemented!()
        }
        async fn describe_table(&self, _table_name: &str) -> Result<crate::schema::TableSchema, Error> {
            unimplemented!()
        }
        async fn delete_table(&self, _table_name: &str) -> Result<(), Error> {
            unimplemented!()
        }
        async fn update_table(&self, _table_name: &str, _options: &TableOptions) -> Result<TableOptions, Error> {
            unimplemented!()
        }
        async fn get_row(&self, _table_name: &str, _primary_key: &PrimaryKey, _columns_to_get: &[String]) -> Result<Option<Row>, Error> {
            unimplemented!()
        }
        async fn put_row(&self, _table_name: &str, _row: &Row) -> Result<Option<Row>, Error> {
            unimplemented!()
        }
        async fn update_row(
            &self,
            _table_name: &str,
            _primary_key: &PrimaryKey,
            _put_attributes: &[crate::value::Attribute],
            _delete_attributes: &[String],
        ) -> Result<(), Error> {
            unimplemented!()
        }
        async fn delete_row(&self, _table_name: &str, _primary_key: &PrimaryKey) -> Result<(), Error> {
            unimplemented!()
        }
        async fn batch_write_row(&self, groups: Vec<BatchWriteGroup>) -> Result<Vec<BatchWriteGroupResult>, Error> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            match self.write_response.lock().unwrap().take() {
                Some(r) => r,
                None => Ok(groups
                    .into_iter()
                    .map(|g| BatchWriteGroupResult {
                        table_name: g.table_name,
                        put_results: g.puts.iter().map(|_| RowResult::Ok(None)).collect(),
                        delete_results: g.deletes.iter().map(|_| RowResult::Ok(None)).collect(),
                    })
                    .collect()),
            }
        }
        async fn batch_get_row(&self, _groups: Vec<BatchGetGroup>) -> Result<Vec<BatchGetGroupResult>, Error> {
            unimplemented!()
        }
        async fn get_range(&self, _req: GetRangeArgs) -> Result<GetRangeResult, Error> {
            unimplemented!()
        }
        async fn compute_splits_by_size(&self, _table_name: &str, _split_size_unit: i64) -> Result<Vec<PrimaryKey>, Error> {
            unimplemented!()
        }
    }

    fn row(pkey: i64) -> Row {
        Row::new(PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(pkey))]), vec![])
    }

    #[tokio::test]
    async fn put_row_resolves_through_a_batch() {
        let client = Arc::new(StubClient::new());
        let coordinator = BulkCoordinator::new(Arc::clone(&client));
        let result = coordinator.put_row("t", row(1)).await;
        assert!(matches!(result, RowResult::Ok(None)));
        coordinator.shutdown().await;
    }

    #[test]
    fn fingerprint_distinguishes_tables_and_pkeys() {
        let a = fingerprint("t1", &PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(1))]));
        let b = fingerprint("t2", &PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(1))]));
        let c = fingerprint("t1", &PrimaryKey::new(vec![PrimaryKeyColumn::new("pkey", Value::Integer(2))]));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn pop_batch_leaves_colliding_fingerprint_for_next_round() {
        let mut queue: VecDeque<(u64, &str)> = VecDeque::from([(1, "a"), (1, "b"), (2, "c")]);
        let batch = pop_batch(&mut queue, 10, |(fp, _)| *fp);
        assert_eq!(batch.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(queue.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn pop_batch_respects_limit() {
        let mut queue: VecDeque<(u64, &str)> = VecDeque::from([(1, "a"), (2, "b"), (3, "c")]);
        let batch = pop_batch(&mut queue, 2, |(fp, _)| *fp);
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn whole_rpc_temporary_failure_requeues_every_row() {
        let client = Arc::new(StubClient::new());
        *client.write_response.lock().unwrap() =
            Some(Err(Error::server(500, error_code::OTS_SERVER_BUSY, "busy")));
        let coordinator = BulkCoordinator::new(Arc::clone(&client));
        let rx = {
            let (tx, rx) = oneshot::channel();
            coordinator.inner.queues.lock().unwrap().writes.push_back(WriteHandle {
                table_name: "t".into(),
                op: WriteOp::Put(row(1)),
                fingerprint: fingerprint("t", &row(1).primary_key),
                tx,
            });
            rx
        };
        coordinator.inner.notify.notify_one();
        // give the background loop one tick to drain the queue into the failing RPC.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "row should still be queued for retry, not resolved");
        assert_eq!(client.write_calls.load(Ordering::SeqCst), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_status_is_transport_error_classification() {
        let e = Error::transport(TransportStatus::OperationTimeout, "deadline");
        assert!(e.is_transport_error());
    }
}
