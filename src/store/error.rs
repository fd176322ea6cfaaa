//! Error types for the tracked-entity store

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer held the database; the operation was retried and gave up
    #[error("Database busy after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// ID does not fit the database integer type
    #[error("ID out of range: {0}")]
    InvalidId(u64),

    /// Stored row could not be turned back into a record
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Schema creation failed
    #[error("Failed to create schema: {0}")]
    Schema(String),

    /// Database directory could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// SQLite busy or locked, worth retrying
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Database(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
                matches!(db.code().as_deref(), Some("5" | "6" | "517"))
            }
            _ => false,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::Conflict { attempts: 3 };
        assert_eq!(error.to_string(), "Database busy after 3 attempts");

        let error = StoreError::InvalidId(u64::MAX);
        assert_eq!(error.to_string(), format!("ID out of range: {}", u64::MAX));
    }

    #[test]
    fn test_conflict_detection() {
        assert!(StoreError::Conflict { attempts: 1 }.is_conflict());
        assert!(!StoreError::Corrupt("bad".to_string()).is_conflict());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_conflict());
    }
}
