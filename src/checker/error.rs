//! Error types for ban checks

use crate::lookup::LookupError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur while checking a user
#[derive(Debug, Error)]
pub enum CheckError {
    /// Upstream lookup failed
    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    /// Persistence failed
    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

impl CheckError {
    /// The identity does not exist upstream
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Lookup(LookupError::NotFound(_)))
    }

    /// Worth retrying on a later tick
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Lookup(e) => e.is_transient(),
            Self::Store(e) => e.is_conflict(),
        }
    }
}

/// Result type for ban checks
pub type CheckResult<T> = Result<T, CheckError>;
