/*!
 * Monitoring
 * Structured tracing setup for the mutex and its driver
 */

mod tracer;

pub use tracer::{init_tracing, WorkloadSpan, TRACE_JSON_ENV};
