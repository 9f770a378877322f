//! Sender side: per-pair protocol and fan-out orchestrator
//!
//! [`SenderProtocol`] drives one (device, file) pair through its state
//! machine:
//!
//! ```text
//! Idle -> Connecting -> SendingMetadata -> SendingPayload -> Succeeded | Failed
//! ```
//!
//! A connect failure never reaches `InProgress` and surfaces as
//! `on_transfer_initialization_failure`; everything after a successful
//! connect is reported as start/progress/terminal events.
//!
//! [`SenderOrchestrator`] runs the full devices x files cross-product
//! concurrently, one task per pair. Failures are isolated per pair: an
//! unreachable device neither cancels nor delays transfers to other
//! devices, and no pair is ever retried automatically.

use crate::error::{ProtocolError, Result};
use crate::events::TransferEventDispatcher;
use crate::metadata::TransferMetadata;
use crate::transfer::{Transfer, TransferFile};
use crate::{Device, CHUNK_SIZE, CONNECT_TIMEOUT, IO_TIMEOUT};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per (device, file) send state machine.
///
/// Single-use: one pair, one outcome, then discarded.
pub struct SenderProtocol {
    device: Device,
    file: TransferFile,
    port: u16,
    events: Arc<TransferEventDispatcher>,
}

impl SenderProtocol {
    pub fn new(
        device: Device,
        file: TransferFile,
        port: u16,
        events: Arc<TransferEventDispatcher>,
    ) -> Self {
        Self {
            device,
            file,
            port,
            events,
        }
    }

    /// Run the send to its terminal state.
    ///
    /// Never propagates errors to the caller; every outcome is
    /// reported through the event dispatcher.
    pub async fn send(self) {
        // The transfer exists from send-intent on, so a connect
        // failure has an identity to report against.
        let mut transfer = Transfer::new(
            self.device.clone(),
            self.file.name(),
            self.file.size(),
        );

        let mut stream = match self.connect().await {
            Ok(stream) => stream,
            Err(error) => {
                transfer.fail(&error);
                warn!("Cannot reach {}: {}", self.device, error);
                self.events
                    .emit_transfer_initialization_failure(&transfer, &error);
                return;
            }
        };

        transfer.start();
        self.events.emit_start(&transfer);
        info!(
            "Sending {} ({} bytes) to {}",
            self.file.name(),
            self.file.size(),
            self.device
        );

        match self.send_payload(&mut stream, &mut transfer).await {
            Ok(()) => {
                transfer.succeed();
                info!(
                    "Send complete: {} bytes to {}",
                    transfer.bytes_transferred(),
                    self.device
                );
                self.events.emit_success(&transfer, self.file.path());
            }
            Err(error) => {
                transfer.fail(&error);
                warn!(
                    "Send of {} to {} failed: {}",
                    self.file.name(),
                    self.device,
                    error
                );
                self.events.emit_failure(&transfer, &error);
            }
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = SocketAddr::new(self.device.address(), self.port);
        debug!("Connecting to {}", addr);
        timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connecting to {addr}")))?
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{addr}: {e}")))
    }

    /// Write the metadata line, then stream exactly the declared
    /// number of file bytes. No acknowledgment is awaited: the
    /// protocol is one-directional and "all declared bytes written"
    /// is the success condition.
    async fn send_payload(&self, stream: &mut TcpStream, transfer: &mut Transfer) -> Result<()> {
        let metadata = TransferMetadata::new(self.file.name(), self.file.size());
        timeout(IO_TIMEOUT, metadata.write_to(stream))
            .await
            .map_err(|_| ProtocolError::Timeout("writing metadata".to_string()))??;

        let mut file = File::open(self.file.path())
            .await
            .map_err(|e| ProtocolError::from_io_error(e, "opening source file"))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut remaining = self.file.size();

        while remaining > 0 {
            let to_read = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = file.read(&mut buffer[..to_read]).await?;

            if read == 0 {
                // The file shrank underneath us; the declared size can
                // no longer be honored.
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "source file ended after {} of {} bytes",
                        transfer.bytes_transferred(),
                        self.file.size()
                    ),
                )));
            }

            timeout(IO_TIMEOUT, stream.write_all(&buffer[..read]))
                .await
                .map_err(|_| ProtocolError::Timeout("stream write".to_string()))??;

            remaining -= read as u64;
            transfer.add_bytes(read as u64);
            self.events.emit_progress(transfer);
        }

        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Fan-out orchestrator for outbound transfers.
///
/// `send(devices, files)` is fire-and-forget: it spawns one
/// independent [`SenderProtocol`] task per (device, file) pair and
/// returns immediately. Callers distinguish concurrent transfers by
/// inspecting the `Transfer` passed to each event, not by call-site
/// correlation.
pub struct SenderOrchestrator {
    port: u16,
    events: Arc<TransferEventDispatcher>,
}

impl SenderOrchestrator {
    pub fn new(port: u16, events: Arc<TransferEventDispatcher>) -> Self {
        Self { port, events }
    }

    /// Start one send attempt per (device, file) pair.
    ///
    /// An empty device or file list performs no work. No attempt is
    /// retried; each pair reaches exactly one terminal event.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, devices: &[Device], files: &[TransferFile]) {
        if devices.is_empty() || files.is_empty() {
            debug!("Nothing to send: empty device or file list");
            return;
        }

        info!(
            "Dispatching {} transfers ({} devices x {} files)",
            devices.len() * files.len(),
            devices.len(),
            files.len()
        );

        for device in devices {
            for file in files {
                let protocol = SenderProtocol::new(
                    device.clone(),
                    file.clone(),
                    self.port,
                    self.events.clone(),
                );
                tokio::spawn(protocol.send());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransferEvents;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct TerminalObserver {
        tx: mpsc::UnboundedSender<String>,
        events: Mutex<Vec<String>>,
    }

    impl TerminalObserver {
        fn new(tx: mpsc::UnboundedSender<String>) -> Self {
            Self {
                tx,
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl TransferEvents for TerminalObserver {
        fn on_transfer_initialization_failure(&self, transfer: &Transfer, _error: &ProtocolError) {
            let event = format!("init_failure:{}", transfer.device().address());
            self.events.lock().unwrap().push(event.clone());
            let _ = self.tx.send(event);
        }

        fn on_success(&self, transfer: &Transfer, _path: &Path) {
            let event = format!("success:{}", transfer.device().address());
            self.events.lock().unwrap().push(event.clone());
            let _ = self.tx.send(event);
        }

        fn on_failure(&self, transfer: &Transfer, _error: &ProtocolError) {
            let event = format!("failure:{}", transfer.device().address());
            self.events.lock().unwrap().push(event.clone());
            let _ = self.tx.send(event);
        }
    }

    #[tokio::test]
    async fn test_unreachable_device_reports_initialization_failure() {
        let events = Arc::new(TransferEventDispatcher::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = Arc::new(TerminalObserver::new(tx));
        events.register(observer.clone());

        // Reserve a port with no listener behind it.
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"data").unwrap();
        let transfer_file = TransferFile::from_path(file.path()).await.unwrap();

        let device = Device::new("Ghost", "unknown", "127.0.0.1".parse().unwrap());
        SenderProtocol::new(device, transfer_file, port, events.clone())
            .send()
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event, "init_failure:127.0.0.1");
        assert!(events.in_progress_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_orchestrator_no_op_on_empty_input() {
        let events = Arc::new(TransferEventDispatcher::new());
        let orchestrator = SenderOrchestrator::new(5000, events.clone());

        let device = Device::new("Laptop", "linux", "127.0.0.1".parse().unwrap());
        orchestrator.send(&[device], &[]);
        orchestrator.send(&[], &[]);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(events.in_progress_transfers().is_empty());
    }
}
