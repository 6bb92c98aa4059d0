//! Error types shared across squarecut crates.

use std::path::PathBuf;

/// Top-level error type for edit operations.
///
/// The first three variants are the "null result" family: the invocation
/// ended without an output file, but nothing is wrong with the machine.
/// Everything else is a fault the caller has to surface.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("Source has no video track")]
    NoVideoTrack,

    #[error("Encoder produced no output chunks")]
    EmptyOutput,

    #[error("Edit was cancelled")]
    Cancelled,

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Invalid edit request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using EditError.
pub type EditResult<T> = Result<T, EditError>;

impl EditError {
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error is reported to callers as a missing result
    /// rather than a failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoVideoTrack | Self::EmptyOutput | Self::Cancelled)
    }
}

/// Collapse an edit result into "path or nothing".
///
/// Transient outcomes become `Ok(None)`; codec and I/O faults are kept.
pub fn into_output_path(result: EditResult<PathBuf>) -> EditResult<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.is_transient() => Ok(None),
        Err(e) => Err(e),
    }
}
