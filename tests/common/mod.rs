use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use tokio::sync::broadcast;

use tagfleet_sync::{EngineConfig, config::ReconnectPolicy};

/// One request received on a command endpoint.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

struct Inner {
    devices_body: Mutex<String>,
    devices_status: AtomicU16,
    devices_delay_ms: AtomicU64,
    devices_hits: AtomicUsize,
    command_status: AtomicU16,
    command_body: Mutex<String>,
    commands: Mutex<Vec<Recorded>>,
    ws_connections: AtomicUsize,
    ws_reject: AtomicBool,
    ws_close_immediately: AtomicBool,
    push: broadcast::Sender<String>,
}

/// In-process game server: `GET /api/devices`, a `/ws` push channel and a catch-all
/// command endpoint that records what it receives.
pub struct MockServer {
    pub addr: SocketAddr,
    inner: Arc<Inner>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let (push, _rx) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            devices_body: Mutex::new(r#"{"devices": [], "game": {}}"#.to_string()),
            devices_status: AtomicU16::new(200),
            devices_delay_ms: AtomicU64::new(0),
            devices_hits: AtomicUsize::new(0),
            command_status: AtomicU16::new(200),
            command_body: Mutex::new(String::new()),
            commands: Mutex::new(Vec::new()),
            ws_connections: AtomicUsize::new(0),
            ws_reject: AtomicBool::new(false),
            ws_close_immediately: AtomicBool::new(false),
            push,
        });

        let app = Router::new()
            .route("/api/devices", get(devices))
            .route("/ws", get(ws_upgrade))
            .fallback(command)
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            inner,
            _handle: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Engine config pointing at this server with short delays.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.base_url());
        config.reconnect = ReconnectPolicy::fixed(Duration::from_millis(50));
        config.fetch_timeout = Duration::from_secs(2);
        config.command_timeout = Duration::from_secs(2);
        config.tick_interval = Duration::from_millis(20);
        config
    }

    pub fn set_devices_body(&self, body: impl Into<String>) {
        *self.inner.devices_body.lock().unwrap() = body.into();
    }

    pub fn set_devices_status(&self, status: u16) {
        self.inner.devices_status.store(status, Ordering::SeqCst);
    }

    pub fn set_devices_delay(&self, delay: Duration) {
        self.inner
            .devices_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn devices_hits(&self) -> usize {
        self.inner.devices_hits.load(Ordering::SeqCst)
    }

    pub fn set_command_response(&self, status: u16, body: impl Into<String>) {
        self.inner.command_status.store(status, Ordering::SeqCst);
        *self.inner.command_body.lock().unwrap() = body.into();
    }

    pub fn commands(&self) -> Vec<Recorded> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.inner.ws_connections.load(Ordering::SeqCst)
    }

    /// Answer `/ws` with 404 instead of upgrading.
    pub fn reject_ws(&self, reject: bool) {
        self.inner.ws_reject.store(reject, Ordering::SeqCst);
    }

    /// Close every push connection right after the upgrade.
    pub fn close_ws_immediately(&self, close: bool) {
        self.inner
            .ws_close_immediately
            .store(close, Ordering::SeqCst);
    }

    /// Send a text frame to every connected push client.
    pub fn push_text(&self, text: impl Into<String>) -> usize {
        self.inner.push.send(text.into()).unwrap_or(0)
    }

    pub fn push(&self, message: &Value) -> usize {
        self.push_text(message.to_string())
    }
}

async fn devices(State(inner): State<Arc<Inner>>) -> Response {
    inner.devices_hits.fetch_add(1, Ordering::SeqCst);
    let delay = inner.devices_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let status = StatusCode::from_u16(inner.devices_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = inner.devices_body.lock().unwrap().clone();
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn command(
    State(inner): State<Arc<Inner>>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    inner.commands.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        body: serde_json::from_str(&body).ok(),
    });
    let status = StatusCode::from_u16(inner.command_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = inner.command_body.lock().unwrap().clone();
    (status, body).into_response()
}

async fn ws_upgrade(State(inner): State<Arc<Inner>>, ws: WebSocketUpgrade) -> Response {
    if inner.ws_reject.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    inner.ws_connections.fetch_add(1, Ordering::SeqCst);
    let rx = inner.push.subscribe();
    let close = inner.ws_close_immediately.load(Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, rx, close))
}

async fn serve_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<String>, close: bool) {
    if close {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Poll `condition` every 10 ms until it holds; panics after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
