//! Error taxonomy of a mirror pass.
//!
//! Repository-level failures ([`MirrorError::RepositoryUnreachable`],
//! [`MirrorError::IndexMalformed`]) skip one repository for the run.
//! Artifact-level failures ([`MirrorError::DownloadFailed`],
//! [`MirrorError::HashMismatch`]) skip one file. [`MirrorError::Configuration`]
//! is never caught by the pipeline.

use fdl_schema::IndexError;
use thiserror::Error;

use crate::io::download::DownloadError;

/// Status code recorded when a request failed without an HTTP response.
pub const NO_STATUS_CODE: u16 = 600;

/// Errors surfaced by the mirror pipeline.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Probe or index fetch failed with a network error or a non-404 status.
    #[error("repository {url} unreachable ({code}): {message}")]
    RepositoryUnreachable {
        /// Repository base URL.
        url: String,
        /// HTTP status, or [`NO_STATUS_CODE`].
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// A fetched index document could not be parsed.
    #[error("malformed index from {url}: {source}")]
    IndexMalformed {
        /// Repository base URL.
        url: String,
        /// Underlying decode error.
        #[source]
        source: IndexError,
    },

    /// An artifact could not be transferred.
    #[error("download of {url} failed: {source}")]
    DownloadFailed {
        /// Artifact URL.
        url: String,
        /// Underlying transfer error.
        #[source]
        source: DownloadError,
    },

    /// An artifact's digest did not match the catalog.
    #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Artifact URL.
        url: String,
        /// Digest published in the catalog.
        expected: String,
        /// Digest of the received body.
        actual: String,
    },

    /// A required identity was missing from configuration or metadata.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (config or cache) failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML sidecar failure.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl MirrorError {
    /// Classify a failed artifact transfer.
    pub fn from_download(url: &str, err: DownloadError) -> Self {
        match err {
            DownloadError::HashMismatch { expected, actual } => Self::HashMismatch {
                url: url.to_string(),
                expected,
                actual,
            },
            other => Self::DownloadFailed {
                url: url.to_string(),
                source: other,
            },
        }
    }
}

/// Status code and message recorded on a repository after a failed request.
pub fn status_of(err: &reqwest::Error) -> (u16, String) {
    let code = err.status().map_or(NO_STATUS_CODE, |s| s.as_u16());
    (code, err.to_string())
}
