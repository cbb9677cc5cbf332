use thiserror::Error;

use crate::protocol::{PathId, SurfaceId};

/// Errors raised while handling a single inbound command.
///
/// Every variant is local to the command that produced it: the dispatcher
/// reports it back as a `JsError` response and moves on to the next frame.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("unknown surface: {0}")]
    UnknownSurface(SurfaceId),

    #[error("unknown path: {0}")]
    UnknownPath(PathId),

    #[error("invalid {option} value: {value:?}")]
    InvalidEnumValue { option: &'static str, value: String },

    #[error("malformed image data: expected {expected} pixels, got {actual}")]
    MalformedImageData { expected: usize, actual: usize },

    #[error(transparent)]
    Collaborator(#[from] SurfaceError),
}

/// Faults raised by the drawing surface itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SurfaceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index size error: {0}")]
    IndexSize(String),

    #[error("invalid surface dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("bitmap of {width}x{height} exceeds the limit of {max} pixels")]
    TooLarge { width: u64, height: u64, max: u64 },

    #[error("no font face available for {0:?}")]
    FontUnavailable(String),

    #[error("image {url} could not be loaded: {reason}")]
    ImageUnavailable { url: String, reason: String },

    #[error("unsupported image source: {0}")]
    UnsupportedSource(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("surface panicked: {0}")]
    Panicked(String),
}

/// Crate-level errors for configuration and IO plumbing.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
