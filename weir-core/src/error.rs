//! Error types for weir

use thiserror::Error;

/// Result type alias for weir operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for weir
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer too short for the declared layer
    #[error("frame too short: {0}")]
    FrameLen(String),

    /// Structurally invalid frame
    #[error("invalid frame: {0}")]
    ParseFrame(String),

    /// Address of the wrong family or unspecified where required
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    /// IPv4 address required
    #[error("invalid IPv4 address: {0}")]
    InvalidIp4(String),

    /// Table lookup miss; non-fatal for callers
    #[error("not found: {0}")]
    NotFound(String),

    /// Encoder caller buffer exhausted
    #[error("payload exceeds buffer capacity: {0}")]
    PayloadTooBig(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Interface error
    #[error("interface error: {0}")]
    Interface(String),
}

impl Error {
    /// Create a frame-length error with a custom message
    pub fn frame_len<S: Into<String>>(msg: S) -> Self {
        Error::FrameLen(msg.into())
    }

    /// Create a parse error with a custom message
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::ParseFrame(msg.into())
    }

    /// Create an interface error with a custom message
    pub fn interface<S: Into<String>>(msg: S) -> Self {
        Error::Interface(msg.into())
    }
}
