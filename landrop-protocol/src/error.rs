//! Error handling for the LANdrop protocol
//!
//! Every failure inside the engine is reported through the observer
//! contract rather than thrown across the boundary. The two terminal
//! categories from the transfer design map to variants here:
//! initialization errors (no transfer identity yet: malformed handshake
//! on receive, failed connect on send) and transfer errors (identity
//! known, failure mid-stream).

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations.
///
/// Most errors convert automatically from underlying library errors
/// via `From`.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (socket or file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error in the metadata block.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or missing transfer metadata.
    ///
    /// Raised before a transfer identity exists: the stream closed
    /// before the metadata line was complete, the line exceeded the
    /// size cap, or the decoded fields were invalid.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Outbound connection to a peer could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Filesystem permission error while writing a received file.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Disk full or similar resource exhaustion.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ProtocolError {
    /// Wrap an I/O error with context about the operation that failed.
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        ProtocolError::Io(std::io::Error::new(
            error.kind(),
            format!("{context}: {error}"),
        ))
    }
}
