/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for fallible mutex configuration and park operations
pub type MutexResult<T> = Result<T, MutexError>;

/// Mutex errors
///
/// Contention is never an error: only misuse, OS service failures and
/// configuration problems are represented here.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum MutexError {
    #[error("Unlock called on a mutex that is not locked")]
    #[diagnostic(
        code(mutex::unlock_of_unlocked),
        help("Only the thread holding the lock may release it, exactly once.")
    )]
    UnlockOfUnlocked,

    #[error("Parking on the lock word failed: {0}")]
    #[diagnostic(
        code(mutex::park_failed),
        help("The park/wake service could not block the thread. Check system resources.")
    )]
    ParkFailed(#[source] ParkError),

    #[error("Waking a parked thread failed: {0}")]
    #[diagnostic(
        code(mutex::wake_failed),
        help("The park/wake service could not signal a sleeper. Check system resources.")
    )]
    WakeFailed(#[source] ParkError),

    #[error("Invalid mutex configuration: {0}")]
    #[diagnostic(
        code(mutex::invalid_config),
        help("See MutexConfig::validate for accepted ranges.")
    )]
    InvalidConfig(String),
}

/// Failures reported by a park/wake service
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ParkError {
    #[error("OS park/wake call failed: {0}")]
    #[diagnostic(code(park::os))]
    Os(String),

    #[error("Parking slot state is corrupted")]
    #[diagnostic(
        code(park::corrupted),
        help("A waiter queue lost track of its entries; the process cannot continue safely.")
    )]
    Corrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_park_failure_keeps_source() {
        let err = MutexError::ParkFailed(ParkError::Os("EAGAIN".into()));
        assert_eq!(
            err.to_string(),
            "Parking on the lock word failed: OS park/wake call failed: EAGAIN"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_diagnostic_code() {
        let err = MutexError::InvalidConfig("spin_iterations".into());
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("mutex::invalid_config"));
    }
}
