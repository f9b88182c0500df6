//! Error types for `screengate`.
//!
//! Every public operation returns [`CaptureError`] instead of panicking.
//! The variants are deliberately coarse: callers branch on the kind to
//! distinguish permanent failures (unsupported platform, revoked
//! permission) from transient ones worth retrying on the next frame.

use thiserror::Error;

/// Top-level error type for the `screengate` library.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The current OS has no implemented capture backend.
    #[error("platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// A backend refused permanently: desktop duplication answered
    /// access-denied, or screen-recording permission was not granted.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Access lost, wait timeout, or first frame not yet ready.
    /// Retrying the call is expected to succeed.
    #[error("transient capture failure: {0}")]
    BackendTransient(String),

    /// Invalid handle, empty region, zero target dimensions, or an
    /// invalid frame buffer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A codec refused the buffer.
    #[error("encoder failure: {0}")]
    EncoderFailure(String),

    /// Device, context, or texture creation failed.
    #[error("resource failure: {0}")]
    ResourceFailure(String),
}

impl CaptureError {
    /// Whether the same call may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::BackendTransient(_))
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::EncoderFailure(err.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        CaptureError::ResourceFailure(format!("Windows COM error: {err}"))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
