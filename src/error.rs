//! Error types shared across the reader stack.

use thiserror::Error;

/// Result alias used across reader operations.
pub type ReadResult<T> = Result<T, ReadError>;

/// Errors surfaced by readers and the admission semaphore.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    /// Deadline elapsed during admission or buffer filling.
    #[error("operation timed out")]
    Timeout,
    /// Admission refused because the wait queue is full.
    #[error("admission queue overflow: {0}")]
    QueueOverflow(String),
    /// A precondition of the reader protocol was violated by the caller.
    #[error("reader protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
    /// Failure propagated from an underlying source.
    #[error("source failure: {0}")]
    Source(String),
}
