//! Pull-based resynchronisation through `GET /api/devices`.

use std::{sync::Arc, time::Duration};

use reqwest::Client;
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    dto::ws::RawSnapshot,
    error::FetchError,
    services::ingest::IngestHandle,
    state::{
        clock::ClockService,
        game::Snapshot,
        store::{SnapshotSource, StateStore, WorldView},
    },
};

const FULL_STATE_PATH: &str = "api/devices";

/// Fetches the full state and feeds it to the ingest loop.
pub struct Reconciler {
    client: Client,
    url: String,
    timeout: Duration,
    clock: Arc<ClockService>,
    store: Arc<StateStore>,
    ingest: IngestHandle,
}

impl Reconciler {
    /// Reconciler pulling from `GET /api/devices`.
    pub fn new(
        client: Client,
        config: &EngineConfig,
        clock: Arc<ClockService>,
        store: Arc<StateStore>,
        ingest: IngestHandle,
    ) -> Self {
        Self {
            client,
            url: config.endpoint(FULL_STATE_PATH),
            timeout: config.fetch_timeout,
            clock,
            store,
            ingest,
        }
    }

    /// Pull the full state, surfacing any failure.
    pub async fn try_fetch_full_state(&self) -> Result<Snapshot, FetchError> {
        let request = async {
            let response = self.client.get(&self.url).send().await.map_err(|source| {
                FetchError::Send {
                    url: self.url.clone(),
                    source,
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: self.url.clone(),
                    status,
                });
            }

            response
                .json::<RawSnapshot>()
                .await
                .map_err(|source| FetchError::Decode {
                    url: self.url.clone(),
                    source,
                })
        };

        let raw = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout {
                url: self.url.clone(),
            })??;

        Ok(raw.normalize(self.clock.now_ms()))
    }

    /// Pull the full state; any failure yields the empty fallback snapshot.
    pub async fn fetch_full_state(&self) -> Snapshot {
        match self.try_fetch_full_state().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "full-state pull failed; using fallback snapshot");
                Snapshot::fallback(self.clock.now_ms())
            }
        }
    }

    /// Pull and apply, resolving once the store reflects the result.
    ///
    /// A failed pull replaces the store with the fallback only while nothing has been loaded
    /// yet; otherwise the current view is kept. Returns `None` if the ingest loop is gone.
    pub async fn refresh(&self) -> Option<Arc<WorldView>> {
        let snapshot = match self.try_fetch_full_state().await {
            Ok(snapshot) => snapshot,
            Err(err) if self.store.is_loaded() => {
                warn!(error = %err, "full-state pull failed; keeping current view");
                return Some(self.store.read());
            }
            Err(err) => {
                warn!(error = %err, "full-state pull failed; applying fallback snapshot");
                Snapshot::fallback(self.clock.now_ms())
            }
        };

        let view = self.ingest.apply(snapshot, SnapshotSource::Pull).await;
        if view.is_none() {
            debug!("ingest stopped; pulled snapshot not applied");
        }
        view
    }
}
