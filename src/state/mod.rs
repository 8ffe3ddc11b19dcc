//! Engine assembly and the state it owns.

pub mod clock;
pub mod events;
pub mod game;
pub mod store;

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use reqwest::Client;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::EngineConfig,
    dto::ws::VictoryEvent,
    error::EngineError,
    services::{
        commands::CommandDispatcher,
        ingest::{self, INGEST_CAPACITY, InboundEvent, IngestHandle},
        reconcile::Reconciler,
        status::{DeviceStatus, TierPartition, partition},
        ticker::{self, Tick},
        timer::{ExpiryDetector, TimerProjection, project},
        transport::{ChannelHealth, ConnectionState, TransportManager},
    },
};

use self::{
    clock::{Clock, ClockService, SystemClock},
    events::VictoryHub,
    store::{StateStore, WorldView},
};

/// Engine handle shared across tasks.
pub type SharedEngine = Arc<Engine>;

const VICTORY_CAPACITY: usize = 16;
/// Shortest tick period the engine will run with.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// The synchronisation engine: store, clock, push channel, pull fallback and commands.
///
/// Build exactly one per process and hand the [`SharedEngine`] to whatever consumes it.
/// Nothing runs until [`Engine::start`].
pub struct Engine {
    config: EngineConfig,
    clock: Arc<ClockService>,
    store: Arc<StateStore>,
    victories: Arc<VictoryHub>,
    ingest: IngestHandle,
    ingest_rx: Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    transport: Arc<TransportManager>,
    reconciler: Arc<Reconciler>,
    commands: CommandDispatcher,
    ticks_tx: Mutex<Option<watch::Sender<Tick>>>,
    ticks_rx: watch::Receiver<Tick>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Engine {
    /// Engine on the system clock.
    pub fn new(config: EngineConfig) -> Result<SharedEngine, EngineError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine on a caller-provided clock.
    pub fn with_clock(
        mut config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<SharedEngine, EngineError> {
        config.tick_interval = config.tick_interval.max(MIN_TICK_INTERVAL);
        config.expiry_tolerance_ms = config.expiry_tolerance_ms.saturating_abs();
        let client = Client::builder()
            .build()
            .map_err(|source| EngineError::ClientBuilder { source })?;

        let clock = Arc::new(ClockService::new(clock));
        let store = Arc::new(StateStore::new());
        let victories = Arc::new(VictoryHub::new(VICTORY_CAPACITY));
        let cancel = CancellationToken::new();
        let (ingest, ingest_rx) = ingest::channel(INGEST_CAPACITY);

        let transport = TransportManager::new(
            &config,
            Arc::clone(&clock),
            ingest.clone(),
            cancel.child_token(),
        );
        let reconciler = Arc::new(Reconciler::new(
            client.clone(),
            &config,
            Arc::clone(&clock),
            Arc::clone(&store),
            ingest.clone(),
        ));
        let health: Arc<dyn ChannelHealth> = transport.clone();
        let commands = CommandDispatcher::new(client, &config, health, Arc::clone(&reconciler));
        let (ticks_tx, ticks_rx) = watch::channel(Tick::default());

        Ok(Arc::new(Self {
            config,
            clock,
            store,
            victories,
            ingest,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            transport,
            reconciler,
            commands,
            ticks_tx: Mutex::new(Some(ticks_tx)),
            ticks_rx,
            tasks: Mutex::new(Vec::new()),
            cancel,
            started: AtomicBool::new(false),
        }))
    }

    /// Spawn the ingest loop, pull the initial state, open the push channel and start
    /// ticking. Later calls, and calls after shutdown, do nothing.
    pub async fn start(&self) {
        if self.cancel.is_cancelled() {
            debug!("engine shut down; ignoring start");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("engine already started");
            return;
        }

        let ingest_rx = self
            .ingest_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = ingest_rx {
            self.spawn(ingest::run(
                rx,
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                Arc::clone(&self.victories),
                self.cancel.child_token(),
            ));
        }

        let view = self.reconciler.refresh().await;
        info!(
            devices = view.as_ref().map_or(0, |view| view.devices.len()),
            "initial state loaded"
        );

        self.transport.connect();

        let ticks_tx = self
            .ticks_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = ticks_tx {
            self.spawn(ticker::run(
                Arc::clone(&self.clock),
                self.config.tick_interval,
                tx,
                self.cancel.child_token(),
            ));
        }
    }

    /// Stop ticking, close the push channel, drop any pending reconnect and stop ingest.
    /// Resolves once every background task has finished.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.transport.shutdown().await;

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            let _ = task.await;
        }
        // Never started: close the tick channel anyway.
        self.ticks_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("engine stopped");
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current view of devices and game state.
    pub fn view(&self) -> Arc<WorldView> {
        self.store.read()
    }

    /// Store holding the current view.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Clock with the current server offset.
    pub fn clock(&self) -> &Arc<ClockService> {
        &self.clock
    }

    /// Whether a first snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    /// Liveness of every device in the current view, in store order.
    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        let view = self.view();
        let now_secs = self.clock.corrected_now_secs();
        view.devices
            .iter()
            .map(|device| DeviceStatus::of(device, now_secs, self.config.thresholds))
            .collect()
    }

    /// Group the devices of `view` by liveness tier at the current corrected time.
    pub fn partition<'a>(&self, view: &'a WorldView) -> TierPartition<'a> {
        partition(
            &view.devices,
            self.clock.corrected_now_secs(),
            self.config.thresholds,
        )
    }

    /// Countdown of the current game at the current corrected time.
    pub fn timer(&self) -> TimerProjection {
        project(&self.view().game, self.clock.corrected_now())
    }

    /// Fresh detector using the configured tolerance.
    pub fn expiry_detector(&self) -> ExpiryDetector {
        ExpiryDetector::new(self.config.expiry_tolerance_ms)
    }

    /// Command dispatcher.
    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    /// Full-state pull.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Push channel manager.
    pub fn transport(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    /// Whether the push channel is currently delivering updates.
    pub fn is_connected(&self) -> bool {
        self.transport.is_healthy()
    }

    /// Current push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Follow push channel state changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe_state()
    }

    /// Listen for victory announcements.
    pub fn victories(&self) -> broadcast::Receiver<VictoryEvent> {
        self.victories.subscribe()
    }

    /// Tick stream; closes when the engine shuts down.
    pub fn ticks(&self) -> watch::Receiver<Tick> {
        self.ticks_rx.clone()
    }

    /// Pull the full state and wait until it is applied.
    pub async fn refresh(&self) -> Option<Arc<WorldView>> {
        self.reconciler.refresh().await
    }

    /// Queue a snapshot as if it had arrived on the push channel.
    pub fn ingest(&self) -> &IngestHandle {
        &self.ingest
    }
}
