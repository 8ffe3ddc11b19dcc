//! Single holder of the current world view.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::state::game::{Device, GameState, Snapshot};

/// Where the currently held view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Placeholder before anything was received.
    Initial,
    /// Full-state pull.
    Pull,
    /// Push channel publication.
    Push,
}

/// Immutable view of the world as of the last accepted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldView {
    /// Devices of the snapshot, MACs unique.
    pub devices: Vec<Device>,
    /// Game state of the same snapshot.
    pub game: GameState,
    /// Bumped on every replacement; `0` means nothing was received yet.
    pub revision: u64,
    /// Channel that delivered the snapshot.
    pub source: SnapshotSource,
    /// Local receipt time of the snapshot (ms since epoch).
    pub received_at_ms: i64,
}

impl WorldView {
    fn initial() -> Self {
        Self {
            devices: Vec::new(),
            game: GameState::default(),
            revision: 0,
            source: SnapshotSource::Initial,
            received_at_ms: 0,
        }
    }

    /// Look up a device by MAC.
    pub fn device(&self, mac: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.mac == mac)
    }
}

/// Holder of the last accepted snapshot.
///
/// Replacement swaps a whole [`Arc<WorldView>`] under the channel lock, so readers always see
/// devices and game state from the same snapshot. Nothing is ever merged.
pub struct StateStore {
    current: watch::Sender<Arc<WorldView>>,
}

impl StateStore {
    /// Empty store holding the initial placeholder view.
    pub fn new() -> Self {
        let (current, _rx) = watch::channel(Arc::new(WorldView::initial()));
        Self { current }
    }

    /// Current view. Cheap: clones the `Arc`.
    pub fn read(&self) -> Arc<WorldView> {
        Arc::clone(&self.current.borrow())
    }

    /// Whether any snapshot (pull or push) has been applied yet.
    pub fn is_loaded(&self) -> bool {
        self.current.borrow().revision > 0
    }

    /// Receive every subsequent replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<WorldView>> {
        self.current.subscribe()
    }

    /// Same as [`StateStore::subscribe`], as a `Stream`.
    pub fn updates(&self) -> WatchStream<Arc<WorldView>> {
        WatchStream::new(self.subscribe())
    }

    /// Swap in `snapshot` wholesale and return the new view.
    ///
    /// An empty device list is applied like any other.
    pub(crate) fn replace(&self, snapshot: Snapshot, source: SnapshotSource) -> Arc<WorldView> {
        let Snapshot {
            devices,
            game,
            received_at_ms,
            ..
        } = snapshot;

        self.current.send_modify(|view| {
            *view = Arc::new(WorldView {
                devices,
                game,
                revision: view.revision + 1,
                source,
                received_at_ms,
            });
        });
        self.read()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
