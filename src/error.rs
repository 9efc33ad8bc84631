//! Unified error hierarchy for liftrs
//!
//! Provides structured error types for storage, calculation and configuration
//! failures, with severity classification for the tracing system.

use thiserror::Error;

/// Top-level error type for all liftrs operations
#[derive(Debug, Error)]
pub enum LiftRsError {
    /// Storage operation errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record not found
    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },

    /// Duplicate entry
    #[error("Duplicate entry: {table}.{key}")]
    Duplicate { table: String, key: String },

    /// A ledger rebuild could not be applied; the transaction was rolled back
    #[error("Ledger rebuild failed for {user_id}/{exercise_id}: {reason}")]
    RebuildFailed {
        user_id: String,
        exercise_id: String,
        reason: String,
    },
}

/// Calculation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    /// Invalid parameter
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },

    /// Division by zero
    #[error("Division by zero in {calculation}")]
    DivisionByZero { calculation: String },

    /// Numerical overflow
    #[error("Numerical overflow in {calculation}")]
    Overflow { calculation: String },
}

impl CalculationError {
    pub(crate) fn invalid(calculation: &str, parameter: &str, value: impl ToString) -> Self {
        CalculationError::InvalidParameter {
            calculation: calculation.to_string(),
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }
}

/// Result type alias for liftrs operations
pub type Result<T> = std::result::Result<T, LiftRsError>;

impl From<rusqlite::Error> for LiftRsError {
    fn from(err: rusqlite::Error) -> Self {
        LiftRsError::Database(DatabaseError::Sqlite(err))
    }
}

impl LiftRsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LiftRsError::Database(DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            LiftRsError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LiftRsError::Database(DatabaseError::NotFound { .. }) => ErrorSeverity::Warning,
            LiftRsError::Validation(_) => ErrorSeverity::Warning,
            LiftRsError::Calculation(_) => ErrorSeverity::Warning,
            LiftRsError::Database(DatabaseError::RebuildFailed { .. }) => ErrorSeverity::Critical,
            LiftRsError::Database(_) => ErrorSeverity::Error,
            LiftRsError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            LiftRsError::Database(DatabaseError::NotFound { table, id }) => {
                format!("Could not find {} '{}'", table.trim_end_matches('s'), id)
            }
            LiftRsError::Database(DatabaseError::RebuildFailed { exercise_id, .. }) => {
                format!(
                    "Personal records for '{}' could not be rebuilt; previous records were kept.",
                    exercise_id
                )
            }
            LiftRsError::Configuration(reason) => {
                format!("Invalid configuration: {}", reason)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Data integrity is at risk
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = LiftRsError::Database(DatabaseError::NotFound {
            table: "exercises".to_string(),
            id: "bench".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = LiftRsError::Database(DatabaseError::RebuildFailed {
            user_id: "u1".to_string(),
            exercise_id: "bench".to_string(),
            reason: "constraint".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_retryable() {
        let err = LiftRsError::Validation("bad".to_string());
        assert!(!err.is_retryable());

        let err = LiftRsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = LiftRsError::Database(DatabaseError::NotFound {
            table: "exercises".to_string(),
            id: "bench".to_string(),
        });
        assert!(err.user_message().contains("Could not find exercise"));

        let err = LiftRsError::Database(DatabaseError::RebuildFailed {
            user_id: "u1".to_string(),
            exercise_id: "bench".to_string(),
            reason: "constraint".to_string(),
        });
        assert!(err.user_message().contains("previous records were kept"));
    }
}
