//! Error kinds for the convergence core.
//!
//! Internal, structural failures are small enums constructed where they
//! occur (a `derive_more::From`-built wrapper). [`EngineError`] is the
//! public, `thiserror`-derived surface every internal kind converts into.

use thiserror::Error;

use crate::variable::VariableId;

/// Failure returned by [`crate::transaction::Transaction::commit`].
#[derive(Debug, Error, derive_more::From)]
pub enum CommitError {
    /// A read in the transaction's read-set observed a version that has
    /// since changed; the caller should retry.
    #[error("read-set validation failed for variable {0:?}")]
    Conflict(VariableId),
}

/// Errors from the convergence core's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// STM validation failed; recoverable by retry.
    #[error("transactional conflict on variable {0:?}")]
    Conflict(VariableId),

    /// Could not acquire a per-variable lock within the configured deadline.
    #[error("timed out acquiring lock for variable {0:?}")]
    LockUnavailable(VariableId),

    /// The engine reached `max_iterations` without the timelines settling.
    #[error("did not converge after {iterations} iterations")]
    NonConvergence {
        /// Number of half-cycles executed before giving up.
        iterations: u64,
    },

    /// A bitwise operator was invoked on a non-integral value type.
    #[error("operator {op} is not supported for this variable's value type")]
    UnsupportedOperand {
        /// Name of the operator that was rejected.
        op: &'static str,
    },

    /// A core invariant was violated (empty timeline, unknown variable id,
    /// missing operation record). Always a bug, never expected at runtime.
    #[error("invariant violated: {detail}")]
    InvariantViolation {
        /// Human-readable description of which invariant broke.
        detail: String,
    },
}

impl From<CommitError> for EngineError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Conflict(id) => Self::Conflict(id),
        }
    }
}
