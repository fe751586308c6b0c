use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Connection timed out: {url}")]
    ConnectTimeout { url: String },

    #[error("Incomplete download of {url}: got {got} of {expected} bytes")]
    IncompleteDownload { url: String, got: u64, expected: u64 },

    // Integrity errors
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid checksum field: {0:?}")]
    InvalidChecksum(String),

    #[error("Signature verification failed for {file}")]
    SignatureInvalid { file: String },

    // Archive errors
    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("Archive entry {entry:?} is outside the expected root folder {prefix:?}")]
    ArchiveRootMismatch { entry: String, prefix: String },

    #[error("Refusing to overwrite existing path: {0}")]
    ExtractCollision(PathBuf),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    // Dependency errors
    #[error("Tool {name}@{version} has no build for host {host}")]
    MissingTool {
        name: String,
        version: String,
        host: String,
    },

    #[error("Contribution not found: {0}")]
    ContributionNotFound(String),

    // Cancellation is a terminal state, not a failure
    #[error("Operation cancelled")]
    Cancelled,

    // Catalog errors
    #[error("Failed to parse index: {0}")]
    IndexParse(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Whether this error is a user-requested interruption rather than a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ForgeError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
