//! Daemon-side transfer event observers
//!
//! The protocol engine knows nothing about its observers; the daemon
//! registers these on the shared dispatcher. `LoggingObserver` turns
//! every event into structured log lines; `CompletionObserver` feeds
//! terminal outcomes to the `send` command so it can wait for all
//! pairs to finish.

use landrop_protocol::{ProtocolError, Transfer, TransferEvents};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Logs lifecycle and progress events.
pub struct LoggingObserver;

impl TransferEvents for LoggingObserver {
    fn on_initialization_failure(&self, error: &ProtocolError) {
        warn!("Incoming connection failed before handshake: {}", error);
    }

    fn on_transfer_initialization_failure(&self, transfer: &Transfer, error: &ProtocolError) {
        warn!(
            "Could not start transfer of {} to {}: {}",
            transfer.file_name(),
            transfer.device(),
            error
        );
    }

    fn on_start(&self, transfer: &Transfer) {
        info!(
            "Transfer started: {} ({} bytes) with {}",
            transfer.file_name(),
            transfer.declared_size(),
            transfer.device()
        );
    }

    fn on_progress_updated(&self, transfer: &Transfer) {
        debug!(
            "{}: {}% ({}/{} bytes)",
            transfer.file_name(),
            transfer.progress_percent(),
            transfer.bytes_transferred(),
            transfer.declared_size()
        );
    }

    fn on_success(&self, transfer: &Transfer, path: &Path) {
        info!(
            "Transfer succeeded: {} ({} bytes) at {}",
            transfer.file_name(),
            transfer.bytes_transferred(),
            path.display()
        );
    }

    fn on_failure(&self, transfer: &Transfer, error: &ProtocolError) {
        warn!(
            "Transfer failed: {} with {}: {}",
            transfer.file_name(),
            transfer.device(),
            error
        );
    }
}

/// Sends one boolean per terminal event: `true` for success, `false`
/// for any failure.
pub struct CompletionObserver {
    tx: mpsc::UnboundedSender<bool>,
}

impl CompletionObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TransferEvents for CompletionObserver {
    fn on_transfer_initialization_failure(&self, _transfer: &Transfer, _error: &ProtocolError) {
        let _ = self.tx.send(false);
    }

    fn on_success(&self, _transfer: &Transfer, _path: &Path) {
        let _ = self.tx.send(true);
    }

    fn on_failure(&self, _transfer: &Transfer, _error: &ProtocolError) {
        let _ = self.tx.send(false);
    }
}
