//! Deadline timer (spec.md section 4.2, "AlarmClock").
//!
//! Grounded directly in `examples/original_source/src/ots_static_index/alarm_clock.{h,cpp}`:
//! a `Handler` sorts by `(deadline, random_salt)`, a background loop wakes at
//! the next deadline and fires everything due, and if the executor it hands
//! a firing off to is too busy, the handler is reinserted with a random
//! 100-1000 microsecond jitter rather than dropped. The C++ version sleeps on
//! a semaphore and reinserts into a `std::map`; here the background loop
//! sleeps on `tokio::time::sleep` to the next deadline and reinserts into a
//! `BinaryHeap` ordered the same way.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Correlates a fired timer back to the request it belongs to; also used as
/// the actor-pinning key (spec.md section 4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tracker(pub String);

impl Tracker {
    /// A tracker seeded from a caller-chosen base plus a random suffix,
    /// mirroring `Tracker()` in `static_index.cpp`, which appends a random
    /// component to keep trackers for retried requests distinguishable.
    pub fn with_base(base: &str) -> Self {
        let suffix: u64 = rand::thread_rng().gen();
        Tracker(format!("{base}-{suffix:016x}"))
    }
}

struct Handler {
    deadline: Instant,
    salt: u64,
    tracker: Tracker,
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.salt == other.salt
    }
}
impl Eq for Handler {}

impl PartialOrd for Handler {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handler {
    // BinaryHeap is a max-heap; we want the earliest deadline on top, so this
    // reverses the natural (deadline, salt) order.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.salt.cmp(&self.salt))
    }
}

struct Shared {
    waitings: Mutex<BinaryHeap<Handler>>,
    notify: Notify,
    stop: std::sync::atomic::AtomicBool,
}

/// Background deadline timer. Jobs fire on a spawned task once their
/// deadline passes; if `try_enqueue` (the executor callback) reports the
/// downstream is overloaded, the job is reinserted with a jittered 100-1000us
/// delay rather than lost (spec.md: "at-least-once delivery under overload").
pub struct AlarmClock {
    shared: Arc<Shared>,
    bg: JoinHandle<()>,
}

/// Outcome an executor reports back from firing a handler. `Overloaded`
/// hands the job back so it can be reinserted unchanged rather than lost.
pub enum FireOutcome {
    Enqueued,
    Overloaded(Box<dyn FnOnce() + Send + 'static>),
}

impl AlarmClock {
    /// `try_enqueue` is called inline on the background loop for each fired
    /// job; it should hand the job off to an executor and return quickly.
    pub fn new<F>(try_enqueue: F) -> Self
    where
        F: Fn(&Tracker, Box<dyn FnOnce() + Send + 'static>) -> FireOutcome + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            waitings: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            stop: std::sync::atomic::AtomicBool::new(false),
        });
        let bg_shared = Arc::clone(&shared);
        let bg = tokio::spawn(async move { Self::bg_loop(bg_shared, try_enqueue).await });
        Self { shared, bg }
    }

    /// Schedule `job` to fire at `deadline`, tagged with `tracker` for
    /// diagnostics.
    pub fn add_absolutely(&self, deadline: Instant, tracker: Tracker, job: impl FnOnce() + Send + 'static) {
        Self::insert(&self.shared, deadline, tracker, Box::new(job));
    }

    pub fn add_relatively(&self, delay: Duration, tracker: Tracker, job: impl FnOnce() + Send + 'static) {
        self.add_absolutely(Instant::now() + delay, tracker, job);
    }

    fn insert(shared: &Shared, deadline: Instant, tracker: Tracker, job: Box<dyn FnOnce() + Send + 'static>) {
        let salt: u64 = rand::thread_rng().gen();
        shared.waitings.lock().unwrap().push(Handler { deadline, salt, tracker, job });
        shared.notify.notify_one();
    }

    async fn bg_loop<F>(shared: Arc<Shared>, try_enqueue: F)
    where
        F: Fn(&Tracker, Box<dyn FnOnce() + Send + 'static>) -> FireOutcome + Send + Sync + 'static,
    {
        loop {
            if shared.stop.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            let next_deadline = shared.waitings.lock().unwrap().peek().map(|h| h.deadline);
            match next_deadline {
                None => shared.notify.notified().await,
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        tokio::select! {
                            _ = tokio::time::sleep(deadline - now) => {}
                            _ = shared.notify.notified() => continue,
                        }
                    }
                    Self::fire_due(&shared, &try_enqueue);
                }
            }
        }
    }

    fn fire_due<F>(shared: &Arc<Shared>, try_enqueue: &F)
    where
        F: Fn(&Tracker, Box<dyn FnOnce() + Send + 'static>) -> FireOutcome + Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut fired = 0u32;
        loop {
            let due = {
                let mut waitings = shared.waitings.lock().unwrap();
                match waitings.peek() {
                    Some(h) if h.deadline <= now => waitings.pop(),
                    _ => None,
                }
            };
            let Some(handler) = due else { break };
            fired += 1;
            let tracker = handler.tracker.clone();
            match try_enqueue(&tracker, handler.job) {
                FireOutcome::Enqueued => {}
                FireOutcome::Overloaded(job) => {
                    tracing::warn!(tracker = %tracker.0, "the executor is busy, is it too small?");
                    let jitter_us = rand::thread_rng().gen_range(100..1000);
                    Self::insert(shared, now + Duration::from_micros(jitter_us), tracker, job);
                }
            }
        }
        if fired > 0 {
            tracing::debug!(fired, "alarms triggered");
        }
    }

    /// Cancel every pending alarm whose tracker equals `tracker`. Idempotent:
    /// calling this when nothing matches is a no-op, mirroring `Erase` in
    /// `alarm_clock.cpp`.
    pub fn erase(&self, tracker: &Tracker) {
        let mut waitings = self.shared.waitings.lock().unwrap();
        let remaining: BinaryHeap<Handler> = waitings.drain().filter(|h| &h.tracker != tracker).collect();
        *waitings = remaining;
    }

    pub async fn shutdown(self) {
        self.shared.stop.store(true, std::sync::atomic::Ordering::Release);
        self.shared.notify.notify_one();
        let _ = self.bg.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_jobs_in_deadline_order() {
        let (tx, rx) = std_mpsc::channel();
        let clock = AlarmClock::new(move |_tracker, job| {
            job();
            FireOutcome::Enqueued
        });
        let tx2 = tx.clone();
        clock.add_relatively(Duration::from_millis(50), Tracker::with_base("b"), move || tx2.send("b").unwrap());
        clock.add_relatively(Duration::from_millis(10), Tracker::with_base("a"), move || tx.send("a").unwrap());

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(rx.recv().unwrap(), "a");
        assert_eq!(rx.recv().unwrap(), "b");
        clock.shutdown().await;
    }

    #[tokio::test]
    async fn erase_prevents_firing() {
        let (tx, rx) = std_mpsc::channel::<()>();
        let clock = AlarmClock::new(move |_tracker, job| {
            job();
            FireOutcome::Enqueued
        });
        let tracker = Tracker::with_base("cancel-me");
        clock.add_relatively(Duration::from_millis(5), tracker.clone(), move || tx.send(()).unwrap());
        clock.erase(&tracker);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        clock.shutdown().await;
    }
}
