/*!
 * Core Module
 * Lock primitives, error handling and tuning limits
 */

pub mod errors;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use errors::*;
