//! Error types for device communication

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// adb exited with a non-zero status
    #[error("adb command failed: {}", .stderr.trim())]
    Bridge { stdout: String, stderr: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    /// A streaming server could not be brought up
    #[error("Server setup failed: {0}")]
    Setup(String),

    /// Malformed header or premature close on a stream socket
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Display geometry unavailable: {0}")]
    GeometryUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
