//! Receiver side: connection listener and per-connection protocol
//!
//! [`TransferListener`] binds the transfer port and accepts inbound
//! connections until stopped. Every accepted connection becomes an
//! independent reception running a [`ReceiverProtocol`] instance on a
//! worker slot from a bounded pool; when the pool is saturated,
//! additional connections queue for a free slot while the accept loop
//! keeps draining the OS backlog.
//!
//! Per-connection state machine:
//!
//! ```text
//! Connected -> Handshaking -> Receiving -> Succeeded | Failed
//! ```
//!
//! A handshake failure (malformed or absent metadata) has no transfer
//! identity to report and surfaces as `on_initialization_failure`.
//! After a successful handshake the reception owns a `Transfer` and
//! all later outcomes are reported against it.

use crate::error::{ProtocolError, Result};
use crate::events::TransferEventDispatcher;
use crate::fs_utils::{create_unique_file, ensure_dir, write_file_safe};
use crate::metadata::TransferMetadata;
use crate::transfer::Transfer;
use crate::{Device, CHUNK_SIZE, IO_TIMEOUT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default number of concurrent receptions.
///
/// Additional accepted connections queue for a free worker slot
/// instead of being rejected.
pub const DEFAULT_WORKER_CAPACITY: usize = 10;

/// Handle for stopping a running [`TransferListener`].
///
/// Stopping cancels the accept loop and closes the listening socket;
/// receptions already dispatched to the worker pool run to completion.
#[derive(Clone)]
pub struct ListenerHandle {
    shutdown: Arc<Notify>,
    active: Arc<AtomicUsize>,
}

impl ListenerHandle {
    /// Request the accept loop to stop. Idempotent.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Number of accepted connections whose reception has not yet
    /// finished, including those still queued for a worker slot.
    ///
    /// Unlike the dispatcher's in-progress registry, this counts a
    /// reception from the moment its connection is accepted, so it
    /// only reaches zero once every dispatched reception is done.
    pub fn active_receptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Decrements the active-reception count when the reception task
/// finishes, however it finishes.
struct ReceptionGuard(Arc<AtomicUsize>);

impl Drop for ReceptionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts inbound transfer connections and dispatches each to the
/// bounded reception worker pool.
pub struct TransferListener {
    listener: TcpListener,
    dest_dir: PathBuf,
    events: Arc<TransferEventDispatcher>,
    workers: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    active: Arc<AtomicUsize>,
}

impl TransferListener {
    /// Bind the transfer socket.
    ///
    /// Failure to bind is fatal to the receiving capability and is
    /// returned to the owner; the listener never retries.
    pub async fn bind(
        addr: SocketAddr,
        dest_dir: impl Into<PathBuf>,
        capacity: usize,
        events: Arc<TransferEventDispatcher>,
    ) -> Result<Self> {
        let dest_dir = dest_dir.into();
        ensure_dir(&dest_dir).await?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProtocolError::from_io_error(e, &format!("binding {addr}")))?;
        info!("Transfer listener bound on {}", addr);

        Ok(Self {
            listener,
            dest_dir,
            events,
            workers: Arc::new(Semaphore::new(capacity)),
            shutdown: Arc::new(Notify::new()),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The bound socket address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the accept loop from another task.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            shutdown: self.shutdown.clone(),
            active: self.active.clone(),
        }
    }

    /// Accept connections until [`ListenerHandle::stop`] is called or
    /// an unrecoverable accept error occurs.
    ///
    /// Dispatch is non-blocking relative to accept: each connection is
    /// handed to its own task, which waits for a worker slot before
    /// running the reception. Returning drops the listening socket;
    /// in-flight receptions are unaffected.
    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Transfer listener stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| ProtocolError::from_io_error(e, "accepting connection"))?;
                    debug!("Accepted connection from {}", peer);

                    let workers = self.workers.clone();
                    let dest_dir = self.dest_dir.clone();
                    let events = self.events.clone();
                    self.active.fetch_add(1, Ordering::SeqCst);
                    let guard = ReceptionGuard(self.active.clone());
                    tokio::spawn(async move {
                        let _guard = guard;
                        // Closed semaphore is unreachable: the listener
                        // never closes it.
                        let _permit = match workers.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        ReceiverProtocol::new(dest_dir, peer, events)
                            .receive(stream)
                            .await;
                    });
                }
            }
        }
    }
}

/// Per-connection receive state machine.
///
/// Single-use: one connection, one transfer, one outcome.
pub struct ReceiverProtocol {
    dest_dir: PathBuf,
    peer: SocketAddr,
    events: Arc<TransferEventDispatcher>,
}

impl ReceiverProtocol {
    pub fn new(
        dest_dir: impl Into<PathBuf>,
        peer: SocketAddr,
        events: Arc<TransferEventDispatcher>,
    ) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            peer,
            events,
        }
    }

    /// Run the reception to its terminal state.
    ///
    /// Never propagates errors to the caller; every outcome is
    /// reported through the event dispatcher.
    pub async fn receive(self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);

        // Handshake: no transfer identity exists until the metadata
        // line has been read and validated.
        let metadata = match self.handshake(&mut reader).await {
            Ok(metadata) => metadata,
            Err(error) => {
                drop(reader);
                warn!("Reception from {} failed during handshake: {}", self.peer, error);
                self.events.emit_initialization_failure(&error);
                return;
            }
        };

        let device = Device::from_address(self.peer.ip());
        let mut transfer = Transfer::new(device, metadata.name.clone(), metadata.size);
        transfer.start();
        self.events.emit_start(&transfer);
        info!(
            "Receiving {} ({} bytes) from {}",
            transfer.file_name(),
            transfer.declared_size(),
            self.peer
        );

        let result = self.receive_payload(&mut reader, &metadata, &mut transfer).await;
        // Socket and destination file are both closed before the
        // terminal event fires, so observers see a finished artifact
        // and a released connection.
        drop(reader);

        match result {
            Ok(path) => {
                transfer.succeed();
                info!(
                    "Reception complete: {} bytes written to {}",
                    transfer.bytes_transferred(),
                    path.display()
                );
                self.events.emit_success(&transfer, &path);
            }
            Err(error) => {
                // Partial output stays on disk; disposition is the
                // host's decision.
                transfer.fail(&error);
                warn!(
                    "Reception of {} from {} failed: {}",
                    transfer.file_name(),
                    self.peer,
                    error
                );
                self.events.emit_failure(&transfer, &error);
            }
        }
    }

    async fn handshake(&self, reader: &mut BufReader<TcpStream>) -> Result<TransferMetadata> {
        timeout(IO_TIMEOUT, TransferMetadata::read_from(reader))
            .await
            .map_err(|_| ProtocolError::Timeout("reading transfer metadata".to_string()))?
    }

    /// Stream exactly the declared number of bytes to the destination
    /// file. The file is flushed and closed before returning, so the
    /// terminal event always refers to a finished artifact.
    async fn receive_payload(
        &self,
        reader: &mut BufReader<TcpStream>,
        metadata: &TransferMetadata,
        transfer: &mut Transfer,
    ) -> Result<PathBuf> {
        let filename = metadata.safe_name()?;
        let (mut file, path) = create_unique_file(&self.dest_dir, filename).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut remaining = metadata.size;

        while remaining > 0 {
            let to_read = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = timeout(IO_TIMEOUT, reader.read(&mut buffer[..to_read]))
                .await
                .map_err(|_| ProtocolError::Timeout("stream read".to_string()))??;

            if read == 0 {
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed after {} of {} bytes",
                        transfer.bytes_transferred(),
                        metadata.size
                    ),
                )));
            }

            write_file_safe(&mut file, &buffer[..read]).await?;
            remaining -= read as u64;
            transfer.add_bytes(read as u64);
            self.events.emit_progress(transfer);
        }

        file.flush().await?;
        drop(file);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransferEvents;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct RecordingObserver {
        init_failures: Mutex<Vec<String>>,
        outcomes: Mutex<Vec<String>>,
    }

    impl TransferEvents for RecordingObserver {
        fn on_initialization_failure(&self, error: &ProtocolError) {
            self.init_failures.lock().unwrap().push(error.to_string());
        }

        fn on_success(&self, transfer: &Transfer, _path: &Path) {
            self.outcomes
                .lock()
                .unwrap()
                .push(format!("success:{}", transfer.file_name()));
        }

        fn on_failure(&self, transfer: &Transfer, _error: &ProtocolError) {
            self.outcomes
                .lock()
                .unwrap()
                .push(format!("failure:{}", transfer.file_name()));
        }
    }

    async fn listener_on_ephemeral_port(
        dest: &TempDir,
        events: Arc<TransferEventDispatcher>,
    ) -> (SocketAddr, ListenerHandle, tokio::task::JoinHandle<Result<()>>) {
        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TransferListener::bind(bind_addr, dest.path(), 2, events)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = listener.handle();
        let task = tokio::spawn(listener.run());
        (addr, handle, task)
    }

    #[tokio::test]
    async fn test_malformed_handshake_reports_initialization_failure() {
        let dest = TempDir::new().unwrap();
        let events = Arc::new(TransferEventDispatcher::new());
        let observer = Arc::new(RecordingObserver::default());
        events.register(observer.clone());

        let (addr, handle, task) = listener_on_ephemeral_port(&dest, events).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"garbage with no newline").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(observer.init_failures.lock().unwrap().len(), 1);
        assert!(observer.outcomes.lock().unwrap().is_empty());

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_early_disconnect_fails_transfer() {
        let dest = TempDir::new().unwrap();
        let events = Arc::new(TransferEventDispatcher::new());
        let observer = Arc::new(RecordingObserver::default());
        events.register(observer.clone());

        let (addr, handle, task) = listener_on_ephemeral_port(&dest, events).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"{\"name\":\"cut.bin\",\"size\":100}\n")
            .await
            .unwrap();
        stream.write_all(b"only twenty bytes!!!").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let outcomes = observer.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes, vec!["failure:cut.bin".to_string()]);

        // Partial output is left in place for the host to inspect.
        assert!(dest.path().join("cut.bin").exists());

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_active_receptions_counts_queued_connections() {
        let dest = TempDir::new().unwrap();
        let events = Arc::new(TransferEventDispatcher::new());

        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TransferListener::bind(bind_addr, dest.path(), 1, events.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = listener.handle();
        let task = tokio::spawn(listener.run());

        // First connection holds the only worker slot mid-payload;
        // the second is accepted but queued, so it has no transfer
        // identity yet.
        let mut holder = TcpStream::connect(addr).await.unwrap();
        holder
            .write_all(b"{\"name\":\"hold.bin\",\"size\":50}\n")
            .await
            .unwrap();
        let queued = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(handle.active_receptions(), 2);
        assert_eq!(events.in_progress_transfers().len(), 1);

        // Both receptions fail once their peers vanish and the count
        // drains to zero.
        drop(holder);
        drop(queued);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while handle.active_receptions() > 0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_accept_loop() {
        let dest = TempDir::new().unwrap();
        let events = Arc::new(TransferEventDispatcher::new());
        let (addr, handle, task) = listener_on_ephemeral_port(&dest, events).await;

        handle.stop();
        task.await.unwrap().unwrap();

        // The listening socket is gone.
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
