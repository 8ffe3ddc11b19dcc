//! Single writer of the state store.
//!
//! Push frames and pulled snapshots are funnelled through one channel and applied in arrival
//! order by [`run`], so the store never has concurrent writers.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    dto::ws::VictoryEvent,
    state::{
        clock::ClockService,
        events::VictoryHub,
        game::Snapshot,
        store::{SnapshotSource, StateStore, WorldView},
    },
};

/// Default queue depth between producers and the ingest loop.
pub const INGEST_CAPACITY: usize = 32;

/// Work item for the ingest loop.
#[derive(Debug)]
pub enum InboundEvent {
    /// Replace the store with `snapshot`; `applied` is told the resulting view.
    Snapshot {
        snapshot: Snapshot,
        source: SnapshotSource,
        applied: Option<oneshot::Sender<Arc<WorldView>>>,
    },
    /// Forward a victory announcement to subscribers.
    Victory(VictoryEvent),
}

/// Producer side of the ingest queue.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<InboundEvent>,
}

impl IngestHandle {
    /// Queue a snapshot without waiting for it to be applied.
    ///
    /// Returns `false` once the ingest loop has stopped.
    pub async fn submit(&self, snapshot: Snapshot, source: SnapshotSource) -> bool {
        self.tx
            .send(InboundEvent::Snapshot {
                snapshot,
                source,
                applied: None,
            })
            .await
            .is_ok()
    }

    /// Queue a snapshot and wait until the store reflects it.
    pub async fn apply(&self, snapshot: Snapshot, source: SnapshotSource) -> Option<Arc<WorldView>> {
        let (applied, done) = oneshot::channel();
        self.tx
            .send(InboundEvent::Snapshot {
                snapshot,
                source,
                applied: Some(applied),
            })
            .await
            .ok()?;
        done.await.ok()
    }

    /// Queue a victory announcement.
    pub async fn victory(&self, event: VictoryEvent) -> bool {
        self.tx.send(InboundEvent::Victory(event)).await.is_ok()
    }
}

/// Create the ingest queue.
pub fn channel(capacity: usize) -> (IngestHandle, mpsc::Receiver<InboundEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IngestHandle { tx }, rx)
}

/// Apply queued events until cancelled or every producer is gone.
pub async fn run(
    mut rx: mpsc::Receiver<InboundEvent>,
    store: Arc<StateStore>,
    clock: Arc<ClockService>,
    victories: Arc<VictoryHub>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            InboundEvent::Snapshot {
                snapshot,
                source,
                applied,
            } => {
                let view = apply_snapshot(&store, &clock, snapshot, source);
                if let Some(applied) = applied {
                    let _ = applied.send(view);
                }
            }
            InboundEvent::Victory(event) => {
                info!(winner = %event.winner, message = %event.message, "victory announced");
                let listeners = victories.announce(event);
                debug!(listeners, "victory delivered");
            }
        }
    }

    debug!("ingest loop stopped");
}

/// Update the clock offset from the snapshot's server time, then swap it into the store.
fn apply_snapshot(
    store: &StateStore,
    clock: &ClockService,
    snapshot: Snapshot,
    source: SnapshotSource,
) -> Arc<WorldView> {
    if let Some(server_time_ms) = snapshot.server_time_ms {
        let offset_ms = clock.update_offset_at(server_time_ms, snapshot.received_at_ms);
        debug!(offset_ms, "clock offset updated");
    }

    let view = store.replace(snapshot, source);
    debug!(
        revision = view.revision,
        source = ?view.source,
        devices = view.devices.len(),
        "state replaced"
    );
    view
}

#[cfg(test)]
mod tests {
    use crate::state::{clock::ManualClock, game::GameState};

    use super::*;

    struct Harness {
        handle: IngestHandle,
        store: Arc<StateStore>,
        clock: Arc<ClockService>,
        victories: Arc<VictoryHub>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (handle, rx) = channel(INGEST_CAPACITY);
        let store = Arc::new(StateStore::new());
        let clock = Arc::new(ClockService::new(Arc::new(ManualClock::new(50_000))));
        let victories = Arc::new(VictoryHub::new(4));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            rx,
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&victories),
            cancel.clone(),
        ));
        Harness {
            handle,
            store,
            clock,
            victories,
            cancel,
            task,
        }
    }

    fn snapshot(server_time_ms: Option<i64>, received_at_ms: i64, debounce_ms: u64) -> Snapshot {
        Snapshot {
            devices: Vec::new(),
            game: GameState {
                debounce_ms,
                ..GameState::default()
            },
            server_time_ms,
            received_at_ms,
        }
    }

    #[tokio::test]
    async fn applies_snapshots_and_updates_offset() {
        let h = harness();

        let view = h
            .handle
            .apply(snapshot(Some(52_000), 50_000, 300), SnapshotSource::Push)
            .await
            .unwrap();
        assert_eq!(view.revision, 1);
        assert_eq!(view.game.debounce_ms, 300);
        assert_eq!(h.clock.offset_ms(), 2_000);
        assert_eq!(h.clock.corrected_now(), 52_000);

        // No server time: previous offset stays.
        h.handle
            .apply(snapshot(None, 51_000, 400), SnapshotSource::Pull)
            .await
            .unwrap();
        assert_eq!(h.clock.offset_ms(), 2_000);
        assert_eq!(h.store.read().source, SnapshotSource::Pull);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn submissions_apply_in_order() {
        let h = harness();
        for debounce in 1..=5 {
            assert!(
                h.handle
                    .submit(snapshot(None, 1, debounce), SnapshotSource::Push)
                    .await
            );
        }
        let view = h
            .handle
            .apply(snapshot(None, 1, 99), SnapshotSource::Push)
            .await
            .unwrap();
        assert_eq!(view.revision, 6);
        assert_eq!(view.game.debounce_ms, 99);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn victory_does_not_touch_store() {
        let h = harness();
        let mut rx = h.victories.subscribe();
        assert!(
            h.handle
                .victory(VictoryEvent {
                    winner: "red".into(),
                    message: "done".into(),
                })
                .await
        );
        assert_eq!(rx.recv().await.unwrap().winner, "red");
        assert_eq!(h.store.read().revision, 0);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_loop_rejects_work() {
        let h = harness();
        h.cancel.cancel();
        h.task.await.unwrap();
        assert!(
            h.handle
                .apply(snapshot(None, 1, 1), SnapshotSource::Push)
                .await
                .is_none()
        );
        assert!(!h.handle.submit(snapshot(None, 1, 1), SnapshotSource::Push).await);
    }
}
