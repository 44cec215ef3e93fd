//! Error types for the authorship engine.
//!
//! Nothing in here is fatal to the process. A bad event costs one event, a late
//! report costs nothing, and a storage failure is transient and retryable.

use crate::core::SessionKey;
use thiserror::Error;

/// A single raw event could not be decoded into the event model.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed {kind} event: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl EventError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        EventError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors raised by a session in the aggregator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session was already finalized; the caller should treat this as a no-op.
    #[error("Session {key} is finalized")]
    Finalized { key: SessionKey },
}

/// Result store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Result store unavailable: {0}")]
    Unavailable(String),

    #[error("Result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Failures surfaced by the ingestion service.
///
/// `InvalidReport` is permanent for that report. The other variants are
/// transient and the client is expected to retry the same report.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Ingestion task failed: {0}")]
    Task(String),
}
