//! Per-request orchestration (spec.md section 4.3, "Per-request
//! orchestration"): pin to an actor, start a deadline timer, borrow a
//! connection, write the request, incrementally parse the response, and
//! deliver exactly one result to the caller's callback.
//!
//! This module owns transport-level retries only (connection borrow
//! failure, write failure, response corruption) — it classifies those
//! itself from [`Error`] without needing to decode a response body. Retries
//! driven by a *service*-level error (a 2xx/4xx/5xx HTTP response whose
//! protobuf body decodes to a temporary OTS error code) are the
//! [`crate::client::Client`]'s job, layered on top by calling
//! [`Pipeline::execute`] again — see `DESIGN.md` for why the split sits
//! there instead of trying to make this module protobuf-aware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_core::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::actor::timer::{AlarmClock, FireOutcome, Tracker};
use crate::actor::ActorPool;
use crate::error::{Error, TransportStatus};
use crate::mempool::{MemPool, Pieces};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::connection::Io;
use crate::transport::pool::ConnectionPool;
use crate::transport::request::{build_request, Header};
use crate::transport::parser::{Progress, ResponseParser};
use crate::transport::uri::Endpoint;

/// A fully parsed response, still untyped above the HTTP layer (decoding the
/// protobuf body into a typed response is [`crate::client::Client`]'s job).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub http_status: i64,
    pub headers: Vec<(String, String)>,
    pub body: Pieces,
}

/// Everything the pipeline needs to issue one request, independent of
/// retries (the path/headers/body are rebuilt fresh by the caller on each
/// logical retry since signing embeds the current date).
#[derive(Clone)]
pub struct RequestSpec {
    pub api: &'static str,
    pub path: String,
    pub headers: Vec<Header>,
    pub body: Pieces,
}

/// Builds a [`RequestSpec`] for a fresh attempt (re-signing, since the date
/// header must reflect "now"). The pipeline calls this once per attempt
/// rather than reusing stale signed headers across a retry.
pub trait RequestSpecFactory: Send + Sync {
    fn build(&self) -> Result<RequestSpec, Error>;
}

impl<F> RequestSpecFactory for F
where
    F: Fn() -> Result<RequestSpec, Error> + Send + Sync,
{
    fn build(&self) -> Result<RequestSpec, Error> {
        self()
    }
}

type Callback = Box<dyn FnOnce(Result<RawResponse, Error>) + Send>;

struct Shared {
    called_back: AtomicBool,
    callback: Mutex<Option<Callback>>,
}

impl Shared {
    fn fire(&self, result: Result<RawResponse, Error>) {
        if !self.called_back.swap(true, Ordering::SeqCst) {
            if let Some(cb) = self.callback.lock().unwrap().take() {
                cb(result);
            }
        }
    }

    fn already_fired(&self) -> bool {
        self.called_back.load(Ordering::SeqCst)
    }
}

/// The asynchronous request pipeline (spec.md section 1, subsystem 1).
pub struct Pipeline {
    actors: Arc<ActorPool>,
    alarm: Arc<AlarmClock>,
    pool: Arc<ConnectionPool>,
    mem: MemPool,
    endpoint: Endpoint,
    retry_policy: Arc<dyn RetryPolicy>,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        actors: Arc<ActorPool>,
        alarm: Arc<AlarmClock>,
        pool: Arc<ConnectionPool>,
        mem: MemPool,
        endpoint: Endpoint,
        retry_policy: Arc<dyn RetryPolicy>,
        request_timeout: Duration,
    ) -> Self {
        Self { actors, alarm, pool, mem, endpoint, retry_policy, request_timeout }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Execute one logical request (including transport-level retries),
    /// delivering exactly one result to `callback` on the actor pinned to
    /// `tracker` (spec.md section 8 invariants (i)/(ii)).
    pub fn execute<F>(
        self: Arc<Self>,
        spec_factory: Arc<dyn RequestSpecFactory>,
        tracker: Tracker,
        deadline: Instant,
        callback: F,
    ) where
        F: FnOnce(Result<RawResponse, Error>) + Send + 'static,
    {
        let shared = Arc::new(Shared { called_back: AtomicBool::new(false), callback: Mutex::new(Some(Box::new(callback))) });
        let handle = self.actors.handle_for(&tracker.0);
        let job: BoxFuture<'static, ()> = Box::pin(async move {
            self.run_attempt(spec_factory, tracker, deadline, 0, Instant::now(), shared).await;
        });
        handle.push_back_future(job);
    }

    fn run_attempt(
        self: Arc<Self>,
        spec_factory: Arc<dyn RequestSpecFactory>,
        tracker: Tracker,
        deadline: Instant,
        attempt_no: u32,
        started_at: Instant,
        shared: Arc<Shared>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let attempt_tracker = Tracker(format!("{}#{attempt_no}", tracker.0));

            // 1. start a deadline timer for this attempt.
            let timer_shared = Arc::clone(&shared);
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.alarm.add_relatively(remaining, attempt_tracker.clone(), move || {
                timer_shared.fire(Err(Error::transport(TransportStatus::OperationTimeout, "request deadline exceeded")));
            });

            let spec = match spec_factory.build() {
                Ok(spec) => spec,
                Err(err) => {
                    self.alarm.erase(&attempt_tracker);
                    shared.fire(Err(err));
                    return;
                }
            };
            let api = spec.api;

            // 2. borrow a connection.
            let borrow_result = self.pool.borrow(&self.endpoint, deadline).await;
            if shared.already_fired() {
                // the deadline fired while we were waiting on a connection; don't touch it
                // beyond releasing whatever we got back.
                if let Ok(conn) = borrow_result {
                    conn.destroy();
                }
                return;
            }
            let mut conn = match borrow_result {
                Ok(conn) => conn,
                Err(err) => {
                    self.alarm.erase(&attempt_tracker);
                    self.finish_or_retry(api, spec_factory, tracker, deadline, attempt_no, started_at, shared, err).await;
                    return;
                }
            };

            // 3. write the request.
            let request_bytes = build_request(&spec.path, &self.endpoint.host, self.endpoint.port, &spec.headers, spec.body.clone());
            if let Err(io_err) = write_pieces(conn.io_mut(), &request_bytes).await {
                self.alarm.erase(&attempt_tracker);
                conn.destroy();
                let err = Error::transport(TransportStatus::WriteRequestFail, format!("write request: {io_err}"));
                self.finish_or_retry(api, spec_factory, tracker, deadline, attempt_no, started_at, shared, err).await;
                return;
            }

            // 4. read and incrementally parse the response.
            let mut parser = ResponseParser::new();
            loop {
                if shared.already_fired() {
                    conn.destroy();
                    return;
                }
                let mut block = self.mem.acquire();
                let read = conn.io_mut().read_buf(&mut *block).await;
                let n = match read {
                    Ok(n) => n,
                    Err(io_err) => {
                        self.alarm.erase(&attempt_tracker);
                        conn.destroy();
                        let err = Error::transport(TransportStatus::ReadResponseFail, format!("read response: {io_err}"));
                        self.finish_or_retry(api, spec_factory, tracker, deadline, attempt_no, started_at, shared, err).await;
                        return;
                    }
                };
                if n == 0 {
                    self.alarm.erase(&attempt_tracker);
                    conn.destroy();
                    let err = Error::corrupted_response("connection closed before the response was fully read");
                    self.finish_or_retry(api, spec_factory, tracker, deadline, attempt_no, started_at, shared, err).await;
                    return;
                }
                let piece = block.freeze();
                match parser.feed(&piece) {
                    Ok(Progress::NeedMore) => continue,
                    Ok(Progress::Done) => break,
                    Err(err) => {
                        self.alarm.erase(&attempt_tracker);
                        conn.destroy();
                        self.finish_or_retry(api, spec_factory, tracker, deadline, attempt_no, started_at, shared, err).await;
                        return;
                    }
                }
            }

            // 5. success: cancel the timer, return the connection, call back.
            self.alarm.erase(&attempt_tracker);
            conn.done();
            shared.fire(Ok(RawResponse {
                http_status: parser.http_status(),
                headers: parser.headers().to_vec(),
                body: parser.body().clone(),
            }));
        })
    }

    /// Decide whether a transport-level failure is worth retrying, and if
    /// so schedule the next attempt via the alarm clock (spec.md section
    /// 4.5); otherwise deliver the error.
    fn finish_or_retry(
        self: Arc<Self>,
        api: &'static str,
        spec_factory: Arc<dyn RequestSpecFactory>,
        tracker: Tracker,
        deadline: Instant,
        attempt_no: u32,
        started_at: Instant,
        shared: Arc<Shared>,
        err: Error,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if shared.already_fired() {
                return;
            }
            let elapsed = started_at.elapsed();
            match self.retry_policy.decide(api, &err, attempt_no, elapsed) {
                RetryDecision::Stop => shared.fire(Err(err)),
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(attempt_no, delay_ms = delay.as_millis() as u64, "retrying transport-level failure");
                    let handle = self.actors.handle_for(&tracker.0);
                    let alarm = Arc::clone(&self.alarm);
                    let next_deadline = deadline;
                    let retry_tracker = Tracker(format!("{}#retry{attempt_no}", tracker.0));
                    let pipeline = self;
                    alarm.add_relatively(delay, retry_tracker, move || {
                        let job = pipeline.run_attempt(spec_factory, tracker, next_deadline, attempt_no + 1, started_at, shared);
                        handle.push_back_future(job);
                    });
                }
            }
        })
    }
}

async fn write_pieces(io: &mut dyn Io, pieces: &Pieces) -> std::io::Result<()> {
    for piece in pieces.iter() {
        io.write_all(piece.as_slice()).await?;
    }
    io.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::timer::Tracker;
    use crate::mempool::Piece;
    use crate::retry::NoRetry;
    use crate::transport::connection::{Io as ConnIo, Transport};
    use std::collections::VecDeque;
    use std::sync::mpsc as std_mpsc;

    /// Replays one literal byte string as the server's response, grounded in
    /// `examples/original_source/test/unittest/core/response_reader_unittest.cpp`'s
    /// approach of feeding literal byte strings to the parser under test.
    struct ScriptedTransport {
        chunks: Mutex<VecDeque<Vec<u8>>>,
    }

    struct ScriptedIo {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl tokio::io::AsyncRead for ScriptedIo {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if let Some(chunk) = self.chunks.pop_front() {
                buf.put_slice(&chunk);
            }
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl tokio::io::AsyncWrite for ScriptedIo {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.written.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl Transport for ScriptedTransport {
        fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn ConnIo>, Error>> {
            let chunks = self.chunks.lock().unwrap().clone();
            Box::pin(async move { Ok(Box::new(ScriptedIo { chunks, written: Vec::new() }) as Box<dyn ConnIo>) })
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("http://example.com/inst").unwrap()
    }

    async fn run_one(response: &str) -> Result<RawResponse, Error> {
        let actors = Arc::new(ActorPool::new(2));
        let actors_for_alarm = Arc::clone(&actors);
        let alarm = Arc::new(AlarmClock::new(move |tracker, job| {
            actors_for_alarm.handle_for(&tracker.0).push_back(job);
            FireOutcome::Enqueued
        }));
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport { chunks: Mutex::new(VecDeque::from([response.as_bytes().to_vec()])) });
        let pool = Arc::new(ConnectionPool::new(transport, 4));
        let pipeline = Arc::new(Pipeline::new(
            actors,
            alarm,
            pool,
            MemPool::default(),
            endpoint(),
            Arc::new(NoRetry),
            Duration::from_secs(5),
        ));
        let spec_factory: Arc<dyn RequestSpecFactory> =
            Arc::new(|| Ok(RequestSpec { api: "ListTable", path: "/ListTable".to_string(), headers: vec![], body: Pieces::new() }));

        let (tx, rx) = std_mpsc::channel();
        pipeline.execute(spec_factory, Tracker::with_base("t"), Instant::now() + Duration::from_secs(5), move |res| {
            tx.send(res).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        rx.try_recv().expect("callback should have fired")
    }

    #[tokio::test]
    async fn list_table_happy_path_has_empty_body() {
        let res = run_one("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await.unwrap();
        assert_eq!(res.http_status, 200);
        assert!(res.body.to_contiguous().is_empty());
    }

    #[tokio::test]
    async fn corrupted_status_line_surfaces_as_classified_error() {
        let err = run_one("FTP 200 OK\r\n\r\n").await.unwrap_err();
        assert_eq!(err.http_status, 56);
        assert_eq!(err.code, TransportStatus::CorruptedResponse.to_string());
    }

    #[tokio::test]
    async fn chunked_body_decodes_across_reads() {
        let res = run_one("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(res.body.to_contiguous(), b"abcde");
    }

    #[test]
    fn piece_from_static_roundtrips() {
        let p = Piece::from(&b"x"[..]);
        assert_eq!(p.as_slice(), b"x");
    }
}
