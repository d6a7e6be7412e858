//! Error types for the Keystone render core
//!
//! This module defines the error types used throughout the core,
//! including device calls, task dispatch, uploads and submission.

use std::fmt;

/// Result type for Keystone operations
pub type Result<T> = std::result::Result<T, Error>;

/// Keystone errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock device, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (descriptor mismatch, bad registration, etc.)
    InvalidResource(String),

    /// Initialization failed (device, queues, worker threads)
    InitializationFailed(String),

    /// Handle is stale, out of range or owned by another registry
    InvalidHandle(String),

    /// A bounded queue or slot table stayed full past its retry budget
    CapacityExceeded(String),

    /// A bounded wait expired
    Timeout(String),

    /// The device stopped responding (sync timeout or driver loss)
    DeviceLost(String),

    /// Submission to a GPU queue failed or produced no completion primitive
    SubmissionFailed(String),

    /// A background upload did not complete
    UploadFailed(String),

    /// A background task failed on its worker thread
    TaskFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            Error::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            Error::SubmissionFailed(msg) => write!(f, "Submission failed: {}", msg),
            Error::UploadFailed(msg) => write!(f, "Upload failed: {}", msg),
            Error::TaskFailed(msg) => write!(f, "Task failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error means the device can no longer be trusted
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Error::DeviceLost(_))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
