// src/events.rs
use crate::{JobRecord, StatusReport, TierqError};

/// Notifications published by a `QueueClient` to its subscribers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A dequeued job was delivered.
    Data(JobRecord),
    /// Aggregate counts from `get_status`.
    Status(StatusReport),
    /// An operation failed.
    Error(ErrorEvent),
    /// The source stage drained, or the client closed.
    End,
}

/// Error descriptor carried by `QueueEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub operation: &'static str,
    pub message: String,
    pub store_error: bool,
}

impl ErrorEvent {
    pub fn new(operation: &'static str, error: &TierqError) -> Self {
        Self {
            operation,
            message: error.to_string(),
            store_error: error.is_store_error(),
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}
