//! # CDC Relay Errors
//!
//! Error taxonomy shared by the capture and delivery sides of the agent.
//!
//! - Uses `thiserror` for structured error definitions
//! - Named fields carry the context needed in logs
//! - None of these types cross the control surface; callers there only see
//!   boolean outcomes and the current state

use thiserror::Error;

/// Errors raised by a change-capture engine or while converting its records.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture engine failed: {reason}")]
    EngineFailed { reason: String },

    #[error("Capture engine close failed: {reason}")]
    CloseFailed { reason: String },

    #[error("Failed to spawn capture process {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Previous run of capture engine {engine} has not finished")]
    PreviousRunActive { engine: String },

    #[error("Malformed change record: {reason}")]
    RecordConversion { reason: String },

    #[error("Capture IO error: {0}")]
    Io(#[from] std::io::Error)
}

impl CaptureError {
    pub fn engine_failed(reason: impl Into<String>) -> Self {
        Self::EngineFailed {
            reason: reason.into()
        }
    }

    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::RecordConversion {
            reason: reason.into()
        }
    }
}

/// Errors raised by a single delivery attempt against the remote sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport error talking to {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Timeout after {timeout_ms}ms talking to {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Sink {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to serialize event {event_id}: {reason}")]
    Serialization { event_id: String, reason: String }
}

impl DeliveryError {
    /// Transport failures, timeouts and non-success statuses are retried.
    /// A serialization failure would fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialization { .. })
    }
}
