// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TierqError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Invalid attempt max: {0}")]
    InvalidAttempt(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Client closed")]
    Closed,

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl TierqError {
    /// True when the backing store failed to execute a requested operation.
    pub fn is_store_error(&self) -> bool {
        matches!(self, TierqError::Redis(_) | TierqError::Store(_))
    }

    /// True for errors raised at the API boundary before any store call.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            TierqError::InvalidJob(_)
                | TierqError::InvalidPriority(_)
                | TierqError::InvalidStage(_)
                | TierqError::InvalidAttempt(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TierqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        assert!(TierqError::Store("script failed".into()).is_store_error());
        assert!(!TierqError::InvalidJob("not a job".into()).is_store_error());
        assert!(!TierqError::Closed.is_store_error());
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(TierqError::InvalidPriority("urgent".into()).is_validation_error());
        assert!(TierqError::InvalidStage("archived".into()).is_validation_error());
        assert!(!TierqError::Store("down".into()).is_validation_error());
    }

    #[test]
    fn messages_name_the_offending_value() {
        let err = TierqError::InvalidPriority("urgent".into());
        assert_eq!(err.to_string(), "Invalid priority: urgent");
    }
}
