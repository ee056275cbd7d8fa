//! Error Types
//!
//! Failures that reach a caller of the library. Per-tick sampling failures and
//! unresolvable frame ids never show up here: they are logged and skipped
//! where they happen.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not open media container {path:?}: {reason}")]
    MediaOpen { path: PathBuf, reason: String },

    #[error("storage operation failed on {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported video format '{0}'")]
    UnsupportedFormat(String),

    #[error("video is {size_mb} MB, the limit is {limit_mb} MB")]
    FileTooLarge { size_mb: u64, limit_mb: u64 },

    #[error("failed to fetch remote video: {0}")]
    Fetch(String),

    #[error("frame interval must be positive, got {0} seconds")]
    InvalidInterval(f64),

    #[error("invalid video id '{0}'")]
    InvalidVideoId(String),

    #[error("invalid frame timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("video {0} is already being sampled")]
    SamplingInProgress(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failure of the remote vision model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key configured for the vision model")]
    MissingApiKey,

    #[error("model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,
}
