//! Error types for the Switchyard framework.
//!
//! Lookups and removals never fail: a missing handler or step binding is
//! reported as `None` / `false`. Errors are reserved for caller mistakes at
//! registration time and for the unreachable id-exhaustion case.

use thiserror::Error;

/// Errors raised by registration operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The handler spec could not be built (e.g. the regexp does not compile).
    #[error("invalid handler spec: {reason}")]
    InvalidSpec {
        /// Why the spec was rejected.
        reason: String,
    },

    /// Every generated identifier collided with a live handler.
    #[error("could not allocate a unique handler id after {attempts} attempts")]
    IdentifierExhausted {
        /// Number of ids tried.
        attempts: usize,
    },
}

impl RegistryError {
    /// Creates an [`InvalidSpec`](Self::InvalidSpec) error.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }
}

impl From<regex::Error> for RegistryError {
    fn from(err: regex::Error) -> Self {
        Self::invalid_spec(err.to_string())
    }
}

/// Result type for registration operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
