//! Process-wide logging sink (spec.md Design Notes section 9: "a process
//! singleton with explicit init and a flush-all shutdown hook", modeled after
//! `examples/original_source/src/ots_static_index/include/logger.h`).
//!
//! The teacher instruments every layer with bare `tracing` calls and leaves
//! subscriber installation to the binary (`client/src/response.rs`,
//! `client/src/client.rs` never call `tracing_subscriber::fmt::init` from
//! library code). This crate follows suit: library code only emits events;
//! [`init`] is for applications and tests to opt into, never called
//! internally.

use std::sync::OnceLock;

use tracing::subscriber::DefaultGuard;

static INIT: OnceLock<()> = OnceLock::new();

/// Install a process-wide `tracing_subscriber::fmt` subscriber, reading
/// filter directives from `RUST_LOG` (falling back to `info`). Calling this
/// more than once is a no-op; the first caller wins.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// Install a subscriber scoped to the calling thread for the duration the
/// returned guard is held, for tests that want isolated log capture instead
/// of the process-wide [`init`].
pub fn init_for_test() -> DefaultGuard {
    let filter = tracing_subscriber::EnvFilter::new("debug");
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().finish();
    tracing::subscriber::set_default(subscriber)
}

/// Flush any buffered log output. `tracing_subscriber::fmt`'s writer is
/// unbuffered per-event, so this currently has nothing to do beyond giving
/// callers a symmetric counterpart to [`init`] to call at shutdown, matching
/// the original's explicit `Logger::Shutdown()`.
pub fn shutdown() {}
