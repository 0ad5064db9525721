//! Engine error taxonomy.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for engine operations.
pub type GateResult<T> = Result<T, GateError>;

/// Errors surfaced by gate-pass engine operations.
///
/// None of these are retried by the engine. `Conflict` and `Expired` are
/// expected outcomes of a race or a stale credential; the caller restarts
/// the flow.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Token expired, please reapply")]
    Expired,

    #[error("Token already used")]
    AlreadyUsed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A broken engine invariant. The operation is aborted, never coerced.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GateError {
    /// Whether this error is an expected, caller-handled outcome rather than a
    /// system failure.
    pub fn is_expected(&self) -> bool {
        !matches!(self, GateError::Invariant(_) | GateError::Store(_))
    }
}
