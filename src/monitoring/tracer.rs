/*!
 * Structured Tracing
 * Subscriber setup for the mutex's trace events and the driver binary
 *
 * Features:
 * - JSON-formatted logs for structured parsing
 * - Thread ids on every event (contention is a per-thread story)
 * - Workload spans with elapsed time recorded on close
 */

use std::time::Instant;
use tracing::{info, span, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment variable switching output to JSON
pub const TRACE_JSON_ENV: &str = "MUTEX_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - MUTEX_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Check if JSON output is requested
    let use_json = std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one contention workload
pub struct WorkloadSpan {
    span: Span,
    start: Instant,
}

impl WorkloadSpan {
    pub fn new(name: &str, threads: usize, iterations: u64) -> Self {
        let span = span!(
            Level::INFO,
            "workload",
            name = name,
            threads = threads,
            iterations = iterations,
            duration_ms = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record elapsed time and close the span
    pub fn finish(self) -> std::time::Duration {
        let elapsed = self.start.elapsed();
        self.span
            .record("duration_ms", elapsed.as_secs_f64() * 1_000.0);
        elapsed
    }
}
