//! Transfer lifecycle events and observer fan-out
//!
//! The host registers any number of observers (UI, persistence,
//! notifications) on one [`TransferEventDispatcher`]; the engine emits
//! every event to all observers registered at emission time. The
//! observer set is snapshotted per emission, so registration and
//! unregistration are safe while events are being delivered.
//!
//! The dispatcher also owns the list of currently in-progress
//! transfers, mutated only on the emission path: inserted on start,
//! updated on progress, removed on the terminal event. Within one
//! transfer, events arrive in non-decreasing progress order and the
//! terminal event is always last; across transfers there is no
//! ordering guarantee.

use crate::error::ProtocolError;
use crate::transfer::Transfer;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Observer contract for transfer lifecycle and progress events.
///
/// All methods have empty default implementations; observers override
/// only what they care about. Callbacks are invoked synchronously from
/// the protocol task driving the affected transfer, so implementations
/// should be quick and must not block.
pub trait TransferEvents: Send + Sync {
    /// A reception failed before any transfer identity existed
    /// (malformed or absent metadata handshake). Receiver side only.
    fn on_initialization_failure(&self, _error: &ProtocolError) {}

    /// An outbound transfer failed at connect time, before entering
    /// `InProgress`. Sender side only.
    fn on_transfer_initialization_failure(&self, _transfer: &Transfer, _error: &ProtocolError) {}

    /// A transfer entered `InProgress`.
    fn on_start(&self, _transfer: &Transfer) {}

    /// `bytes_transferred` advanced.
    fn on_progress_updated(&self, _transfer: &Transfer) {}

    /// The transfer completed; `path` is the received file on the
    /// receiver side and the source file on the sender side.
    fn on_success(&self, _transfer: &Transfer, _path: &Path) {}

    /// The transfer failed mid-stream.
    fn on_failure(&self, _transfer: &Transfer, _error: &ProtocolError) {}
}

/// Fan-out point for transfer events, shared by the listener, the
/// receiver workers and the sender orchestrator.
#[derive(Default)]
pub struct TransferEventDispatcher {
    observers: Mutex<Vec<Arc<dyn TransferEvents>>>,
    in_progress: Mutex<HashMap<Uuid, Transfer>>,
}

impl TransferEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Events emitted after registration reach
    /// the observer; emissions already in flight may not.
    pub fn register(&self, observer: Arc<dyn TransferEvents>) {
        let mut observers = self.observers.lock().unwrap();
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Unregister a previously registered observer.
    pub fn unregister(&self, observer: &Arc<dyn TransferEvents>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Point-in-time snapshot of transfers currently in progress.
    pub fn in_progress_transfers(&self) -> Vec<Transfer> {
        self.in_progress.lock().unwrap().values().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn TransferEvents>> {
        self.observers.lock().unwrap().clone()
    }

    pub(crate) fn emit_initialization_failure(&self, error: &ProtocolError) {
        for observer in self.snapshot() {
            observer.on_initialization_failure(error);
        }
    }

    pub(crate) fn emit_transfer_initialization_failure(
        &self,
        transfer: &Transfer,
        error: &ProtocolError,
    ) {
        for observer in self.snapshot() {
            observer.on_transfer_initialization_failure(transfer, error);
        }
    }

    pub(crate) fn emit_start(&self, transfer: &Transfer) {
        self.in_progress
            .lock()
            .unwrap()
            .insert(transfer.id(), transfer.clone());
        for observer in self.snapshot() {
            observer.on_start(transfer);
        }
    }

    pub(crate) fn emit_progress(&self, transfer: &Transfer) {
        if let Some(entry) = self.in_progress.lock().unwrap().get_mut(&transfer.id()) {
            *entry = transfer.clone();
        }
        for observer in self.snapshot() {
            observer.on_progress_updated(transfer);
        }
    }

    pub(crate) fn emit_success(&self, transfer: &Transfer, path: &Path) {
        self.in_progress.lock().unwrap().remove(&transfer.id());
        for observer in self.snapshot() {
            observer.on_success(transfer, path);
        }
    }

    pub(crate) fn emit_failure(&self, transfer: &Transfer, error: &ProtocolError) {
        self.in_progress.lock().unwrap().remove(&transfer.id());
        for observer in self.snapshot() {
            observer.on_failure(transfer, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        starts: AtomicUsize,
        successes: AtomicUsize,
    }

    impl TransferEvents for CountingObserver {
        fn on_start(&self, _transfer: &Transfer) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_success(&self, _transfer: &Transfer, _path: &Path) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_transfer() -> Transfer {
        let device = Device::new("Laptop", "linux", "192.168.1.30".parse().unwrap());
        Transfer::new(device, "doc.txt", 64)
    }

    #[test]
    fn test_fan_out_to_all_observers() {
        let dispatcher = TransferEventDispatcher::new();
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        dispatcher.register(first.clone());
        dispatcher.register(second.clone());

        dispatcher.emit_start(&test_transfer());

        assert_eq!(first.starts.load(Ordering::SeqCst), 1);
        assert_eq!(second.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_observer_stops_receiving() {
        let dispatcher = TransferEventDispatcher::new();
        let observer = Arc::new(CountingObserver::default());
        let handle: Arc<dyn TransferEvents> = observer.clone();
        dispatcher.register(handle.clone());

        dispatcher.emit_start(&test_transfer());
        dispatcher.unregister(&handle);
        dispatcher.emit_start(&test_transfer());

        assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let dispatcher = TransferEventDispatcher::new();
        let observer = Arc::new(CountingObserver::default());
        dispatcher.register(observer.clone());
        dispatcher.register(observer.clone());

        dispatcher.emit_start(&test_transfer());

        assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_progress_registry_tracks_lifecycle() {
        let dispatcher = TransferEventDispatcher::new();
        let mut transfer = test_transfer();
        transfer.start();

        dispatcher.emit_start(&transfer);
        assert_eq!(dispatcher.in_progress_transfers().len(), 1);

        transfer.add_bytes(32);
        dispatcher.emit_progress(&transfer);
        let snapshot = dispatcher.in_progress_transfers();
        assert_eq!(snapshot[0].bytes_transferred(), 32);

        transfer.succeed();
        dispatcher.emit_success(&transfer, Path::new("/tmp/doc.txt"));
        assert!(dispatcher.in_progress_transfers().is_empty());
    }

    #[test]
    fn test_failure_removes_from_registry() {
        let dispatcher = TransferEventDispatcher::new();
        let mut transfer = test_transfer();
        transfer.start();
        dispatcher.emit_start(&transfer);

        let error = ProtocolError::Timeout("stream read".to_string());
        transfer.fail(&error);
        dispatcher.emit_failure(&transfer, &error);
        assert!(dispatcher.in_progress_transfers().is_empty());
    }
}
