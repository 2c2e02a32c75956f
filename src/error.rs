//! Per-frame error taxonomy for the streaming pipeline.
//!
//! Every variant is scoped to a single frame: the session logs the failure,
//! keeps the previously uploaded texture, and tries again on the next
//! advance. There are no retries and no backoff.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// File missing or unreadable. Recoverable: the frame is skipped.
    #[error("frame i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Declared vs. actual size/dimension mismatch, bad magic, unsupported
    /// sub-format. Fatal for the current frame only.
    #[error("format mismatch: {0}")]
    Format(String),

    /// Transfer, kernel, or queue failure reported by the device backend.
    #[error("device failure: {0}")]
    Device(String),
}

impl LoadError {
    pub fn format(msg: impl Into<String>) -> Self {
        LoadError::Format(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        LoadError::Device(msg.into())
    }
}
