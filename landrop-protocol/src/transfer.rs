//! Transfer state model
//!
//! A [`Transfer`] tracks one attempt to move one file to or from one
//! device: identity, progress and terminal outcome. It is owned and
//! mutated exclusively by the protocol instance driving the
//! connection; observers receive clones, so a snapshot can never be
//! mutated behind their back.
//!
//! Invariants enforced here:
//! - `bytes_transferred` never exceeds the declared size and never
//!   decreases
//! - status transitions are monotone: once `Succeeded` or `Failed`,
//!   no further transition occurs

use crate::device::Device;
use crate::error::{ProtocolError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl TransferStatus {
    /// Whether the transfer has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Succeeded | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in progress",
            TransferStatus::Succeeded => "succeeded",
            TransferStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One tracked file movement between this host and a peer device.
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    id: Uuid,
    device: Device,
    file_name: String,
    declared_size: u64,
    bytes_transferred: u64,
    status: TransferStatus,
    error: Option<String>,
    started_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a new pending transfer.
    ///
    /// The sender creates one on send-intent; the receiver creates one
    /// once the metadata handshake has been read.
    pub fn new(device: Device, file_name: impl Into<String>, declared_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            file_name: file_name.into(),
            declared_size,
            bytes_transferred: 0,
            status: TransferStatus::Pending,
            error: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// The error message, present iff the transfer failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Completed fraction in percent, 100 for empty files.
    pub fn progress_percent(&self) -> u8 {
        if self.declared_size == 0 {
            return if self.status == TransferStatus::Succeeded {
                100
            } else {
                0
            };
        }
        ((self.bytes_transferred * 100) / self.declared_size) as u8
    }

    /// Mark the transfer as running. No-op once terminal.
    pub(crate) fn start(&mut self) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::InProgress;
        }
    }

    /// Record transferred bytes, clamped to the declared size.
    pub(crate) fn add_bytes(&mut self, count: u64) {
        self.bytes_transferred = self
            .bytes_transferred
            .saturating_add(count)
            .min(self.declared_size);
    }

    /// Transition to `Succeeded`. No-op once terminal.
    pub(crate) fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Succeeded;
        }
    }

    /// Transition to `Failed` with the triggering error. No-op once
    /// terminal.
    pub(crate) fn fail(&mut self, error: &ProtocolError) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Failed;
            self.error = Some(error.to_string());
        }
    }
}

/// Descriptor for a file selected for sending: a named, sized,
/// readable source. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct TransferFile {
    name: String,
    size: u64,
    path: PathBuf,
}

impl TransferFile {
    /// Build a descriptor from a path, reading size metadata from the
    /// filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, its metadata
    /// cannot be read, or the path has no usable file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "reading file metadata"))?;

        if !metadata.is_file() {
            return Err(ProtocolError::InvalidMetadata(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProtocolError::InvalidMetadata(format!("invalid file name: {}", path.display()))
            })?
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            path: path.to_path_buf(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
