//! LANdrop Protocol Implementation
//!
//! This library implements the LANdrop device-to-device file transfer
//! protocol: a receiver-side connection listener with a bounded worker
//! pool, per-connection receive and send state machines, and a fan-out
//! orchestrator that drives many concurrent transfers.
//!
//! ## Protocol
//!
//! File transfers use plain TCP on a single well-known port:
//! 1. Sender connects to the receiver's transfer port
//! 2. Sender writes a metadata line (file name, declared size)
//! 3. Sender streams exactly the declared number of raw file bytes
//! 4. Connection closes; one connection transfers exactly one file
//!
//! All lifecycle and progress reporting flows through the
//! [`TransferEvents`] observer contract; the engine exposes no UI and
//! never panics across its boundary.

pub mod device;
pub mod events;
pub mod fs_utils;
pub mod metadata;
pub mod receiver;
pub mod sender;
pub mod transfer;

mod error;

pub use device::Device;
pub use error::{ProtocolError, Result};
pub use events::{TransferEventDispatcher, TransferEvents};
pub use metadata::TransferMetadata;
pub use receiver::{ListenerHandle, ReceiverProtocol, TransferListener, DEFAULT_WORKER_CAPACITY};
pub use sender::{SenderOrchestrator, SenderProtocol};
pub use transfer::{Transfer, TransferFile, TransferStatus};

use tokio::time::Duration;

/// Well-known TCP port for file transfers, shared by all devices.
pub const DEFAULT_TRANSFER_PORT: u16 = 5000;

/// Timeout for establishing an outbound connection.
///
/// A dead or unreachable peer produces a failed transfer instead of a
/// permanently stuck orchestrator pair.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-chunk timeout for socket reads and writes.
///
/// Applied to every chunk individually, so large files never time out
/// as long as the peer keeps making progress.
pub(crate) const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Buffer size for streaming file payloads (64 KiB).
pub(crate) const CHUNK_SIZE: usize = 65536;
