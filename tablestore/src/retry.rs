//! Retry policy (spec.md section 4.5).

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// What a [`RetryPolicy`] decides for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

/// Decides retry/abort and delay per `(api, error kind, attempt, elapsed)`
/// (spec.md section 4.5).
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, api: &str, error: &Error, attempt_no: u32, elapsed: Duration) -> RetryDecision;
}

/// Default policy: retry while `elapsed` is under a configured cap and the
/// error is temporary, with exponentially jittered back-off bounded by a
/// small maximum (spec.md: "deadline-bounded").
pub struct DeadlineBounded {
    pub max_elapsed: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl DeadlineBounded {
    /// 10s cap, matching spec.md's stated default.
    pub fn new() -> Self {
        Self {
            max_elapsed: Duration::from_secs(10),
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl Default for DeadlineBounded {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy for DeadlineBounded {
    fn decide(&self, _api: &str, error: &Error, attempt_no: u32, elapsed: Duration) -> RetryDecision {
        if !error.is_temporary() || elapsed >= self.max_elapsed {
            return RetryDecision::Stop;
        }
        let backoff = self.base_delay.saturating_mul(1u32 << attempt_no.min(16)).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis().max(1) as u64);
        let mut delay = Duration::from_millis(jitter_ms);
        // never let a jittered delay push the total past the deadline by much; the pipeline
        // still enforces the real per-request deadline independently via the alarm clock.
        if elapsed + delay > self.max_elapsed {
            delay = self.max_elapsed.saturating_sub(elapsed);
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// Never retries; useful for tests and for callers who want single-shot
/// semantics.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _api: &str, _error: &Error, _attempt_no: u32, _elapsed: Duration) -> RetryDecision {
        RetryDecision::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_code, TransportStatus};

    #[test]
    fn stops_on_non_temporary_error() {
        let policy = DeadlineBounded::new();
        let err = Error::server(403, error_code::OTS_CONDITION_CHECK_FAIL, "nope");
        assert_eq!(policy.decide("PutRow", &err, 0, Duration::ZERO), RetryDecision::Stop);
    }

    #[test]
    fn stops_once_elapsed_exceeds_cap() {
        let policy = DeadlineBounded::new();
        let err = Error::transport(TransportStatus::CouldntConnect, "refused");
        assert_eq!(policy.decide("PutRow", &err, 0, Duration::from_secs(11)), RetryDecision::Stop);
    }

    #[test]
    fn retries_temporary_error_under_cap() {
        let policy = DeadlineBounded::new();
        let err = Error::transport(TransportStatus::CouldntConnect, "refused");
        assert!(matches!(policy.decide("PutRow", &err, 0, Duration::ZERO), RetryDecision::RetryAfter(_)));
    }
}
