//! Push channel supervision: one WebSocket connection to `/ws`, reconnected after a delay
//! whenever it drops.
//!
//! The supervisor is a single task running `connect -> receive -> wait -> connect`, so at most
//! one reconnect wait can be pending at any time no matter how often the link flaps.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{EngineConfig, ReconnectPolicy},
    dto::ws::PushMessage,
    error::TransportError,
    services::ingest::IngestHandle,
    state::{clock::ClockService, store::SnapshotSource},
};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no handshake in flight.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Receiving updates.
    Connected,
    /// Transport-level error, about to fall back to `Disconnected`.
    Failed,
}

/// Read access to whether the push channel currently delivers updates.
pub trait ChannelHealth: Send + Sync {
    /// `true` while updates are flowing.
    fn is_healthy(&self) -> bool;
}

/// Counters describing the reconnect behaviour so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectStats {
    /// Handshakes started.
    pub connect_attempts: u64,
    /// Reconnect waits scheduled.
    pub reconnects_scheduled: u64,
    /// Waits pending right now (0 or 1).
    pub pending: usize,
    /// Highest number of simultaneously pending waits ever observed.
    pub max_pending: usize,
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    reconnects_scheduled: AtomicU64,
    pending: AtomicUsize,
    max_pending: AtomicUsize,
}

enum PumpExit {
    /// Server closed the connection or the stream ended.
    Closed,
    /// Engine shutdown.
    Cancelled,
}

/// Owner of the single logical push connection.
pub struct TransportManager {
    server_url: String,
    url: Option<String>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    clock: Arc<ClockService>,
    ingest: IngestHandle,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl TransportManager {
    /// Build a manager for the push URL derived from `config`. Nothing connects until
    /// [`TransportManager::connect`] is called.
    pub fn new(
        config: &EngineConfig,
        clock: Arc<ClockService>,
        ingest: IngestHandle,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            server_url: config.server_url.clone(),
            url: config.push_url(),
            policy: config.reconnect,
            connect_timeout: config.connect_timeout,
            clock,
            ingest,
            state,
            cancel,
            supervisor: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    /// Push endpoint, if the server URL could be turned into one.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Start the supervisor. No-op while it is already running (connecting, connected or
    /// waiting to reconnect) and after shutdown.
    pub fn connect(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            debug!("push channel shut down; ignoring connect");
            return;
        }

        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            debug!(state = ?self.state(), "push channel already active");
            return;
        }

        let manager = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move { manager.supervise().await }));
    }

    /// Close the connection, cancel any pending reconnect and wait for the supervisor to end.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Reconnect counters so far.
    pub fn stats(&self) -> ReconnectStats {
        ReconnectStats {
            connect_attempts: self.counters.connect_attempts.load(Ordering::SeqCst),
            reconnects_scheduled: self.counters.reconnects_scheduled.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
            max_pending: self.counters.max_pending.load(Ordering::SeqCst),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "push channel state change");
            *current = next;
            true
        });
    }

    async fn supervise(self: Arc<Self>) {
        let Some(url) = self.url.clone() else {
            let err = self.invalid_url_error();
            warn!(error = %err, "push channel disabled");
            self.set_state(ConnectionState::Failed);
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        let mut delay = self.policy.initial_delay;

        loop {
            self.set_state(ConnectionState::Connecting);
            self.counters.connect_attempts.fetch_add(1, Ordering::SeqCst);

            let handshake = timeout(
                self.connect_timeout,
                tokio_tungstenite::connect_async(url.as_str()),
            );
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = handshake => match result {
                    Ok(result) => result.map_err(|source| TransportError::Connect {
                        url: url.clone(),
                        source,
                    }),
                    Err(_) => Err(TransportError::ConnectTimeout {
                        url: url.clone(),
                        timeout_ms: self.connect_timeout.as_millis() as u64,
                    }),
                },
            };

            match connected {
                Ok((stream, _response)) => {
                    info!(url = %url, "push channel connected");
                    self.set_state(ConnectionState::Connected);
                    delay = self.policy.initial_delay;

                    match self.pump(stream).await {
                        Ok(PumpExit::Cancelled) => break,
                        Ok(PumpExit::Closed) => info!("push channel closed"),
                        Err(err) => {
                            warn!(error = %err, "push channel failed");
                            self.set_state(ConnectionState::Failed);
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "push channel connection attempt failed");
                    self.set_state(ConnectionState::Failed);
                }
            }

            self.set_state(ConnectionState::Disconnected);
            if !self.wait_before_reconnect(delay).await {
                break;
            }
            delay = self.policy.next_delay(delay);
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("push channel supervisor stopped");
    }

    fn invalid_url_error(&self) -> TransportError {
        TransportError::InvalidUrl {
            url: self.server_url.clone(),
            reason: "server url must use http, https, ws or wss".into(),
        }
    }

    /// Sleep before the next attempt. Returns `false` if shutdown interrupted the wait.
    async fn wait_before_reconnect(&self, delay: Duration) -> bool {
        self.counters
            .reconnects_scheduled
            .fetch_add(1, Ordering::SeqCst);
        let pending = self.counters.pending.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_pending.fetch_max(pending, Ordering::SeqCst);
        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let completed = tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        };

        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        completed
    }

    /// Read frames until the connection ends or shutdown is requested.
    async fn pump(&self, mut stream: PushStream) -> Result<PumpExit, TransportError> {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(err) = stream.close(None).await {
                        debug!(error = %err, "push channel close failed");
                    }
                    return Ok(PumpExit::Cancelled);
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.handle_text(text).await,
                    Err(_) => debug!(len = bytes.len(), "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "push channel close frame received");
                    return Ok(PumpExit::Closed);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(source)) => return Err(TransportError::Receive { source }),
                None => return Ok(PumpExit::Closed),
            }
        }
    }

    /// Decode one frame and hand it to the ingest loop. Bad frames are dropped.
    async fn handle_text(&self, text: &str) {
        let received_at_ms = self.clock.now_ms();
        match PushMessage::from_json_str(text) {
            Ok(PushMessage::State(raw)) => {
                let snapshot = raw.normalize(received_at_ms);
                if !self.ingest.submit(snapshot, SnapshotSource::Push).await {
                    debug!("ingest stopped; dropping push snapshot");
                }
            }
            Ok(PushMessage::Victory(event)) => {
                if !self.ingest.victory(event).await {
                    debug!("ingest stopped; dropping victory event");
                }
            }
            Ok(PushMessage::Ignored(kind)) => debug!(kind = %kind, "ignoring push message"),
            Err(err) => warn!(error = %err, "dropping malformed push message"),
        }
    }
}

impl ChannelHealth for TransportManager {
    fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        services::ingest::{self, INGEST_CAPACITY},
        state::clock::ManualClock,
    };

    use super::*;

    async fn unused_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn manager(server_url: String, delay: Duration) -> (Arc<TransportManager>, CancellationToken) {
        let mut config = EngineConfig::new(server_url);
        config.reconnect = ReconnectPolicy::fixed(delay);
        config.connect_timeout = Duration::from_millis(100);
        let clock = Arc::new(ClockService::new(Arc::new(ManualClock::new(0))));
        let (handle, _rx) = ingest::channel(INGEST_CAPACITY);
        let cancel = CancellationToken::new();
        (
            TransportManager::new(&config, clock, handle, cancel.clone()),
            cancel,
        )
    }

    #[tokio::test]
    async fn starts_disconnected_and_unhealthy() {
        let (manager, _cancel) = manager("http://127.0.0.1:1".into(), Duration::from_secs(3));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_healthy());
        assert_eq!(manager.url(), Some("ws://127.0.0.1:1/ws"));
        assert_eq!(manager.stats(), ReconnectStats::default());
    }

    #[tokio::test]
    async fn failed_connects_schedule_one_reconnect_each() {
        let port = unused_port().await;
        let (manager, _cancel) =
            manager(format!("http://127.0.0.1:{port}"), Duration::from_millis(20));

        manager.connect();
        manager.connect();
        sleep(Duration::from_millis(250)).await;
        manager.shutdown().await;

        let stats = manager.stats();
        assert!(stats.connect_attempts >= 3, "{stats:?}");
        assert!(
            stats.connect_attempts - stats.reconnects_scheduled <= 1,
            "{stats:?}"
        );
        assert!(stats.reconnects_scheduled <= stats.connect_attempts, "{stats:?}");
        assert_eq!(stats.max_pending, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.stats().connect_attempts, stats.connect_attempts);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_reconnect() {
        let port = unused_port().await;
        let (manager, _cancel) =
            manager(format!("http://127.0.0.1:{port}"), Duration::from_secs(60));

        manager.connect();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.stats().pending == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .unwrap();
        let stats = manager.stats();
        assert_eq!(stats.connect_attempts, 1);
        assert_eq!(stats.reconnects_scheduled, 1);
        assert_eq!(stats.pending, 0);

        manager.connect();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.stats().connect_attempts, 1);
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_reconnects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let (manager, _cancel) =
            manager(format!("http://127.0.0.1:{port}"), Duration::from_millis(20));
        manager.connect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.stats().connect_attempts < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        manager.shutdown().await;
        let stats = manager.stats();
        assert!(stats.reconnects_scheduled >= 1, "{stats:?}");
        assert_eq!(stats.max_pending, 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        accept.abort();
    }

    #[tokio::test]
    async fn unusable_url_never_connects() {
        let (manager, _cancel) = manager("localhost:8080".into(), Duration::from_millis(10));
        assert!(manager.url().is_none());
        let reported = manager.invalid_url_error().to_string();
        assert!(reported.contains("`localhost:8080`"), "{reported}");
        manager.connect();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.stats().connect_attempts, 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.shutdown().await;
    }
}
