//! Mutating commands sent to the game server over HTTP.
//!
//! Every public operation resolves to a plain `bool`. The store is never touched here: the
//! server's next push (or the resync below) carries the effect back.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use validator::Validate;

use crate::{
    config::EngineConfig,
    dto::command::{
        CommandAck, DebounceRequest, DeviceTarget, FriendlyFireRequest, GameModeRequest,
        IdentifierAssignment, NameUpdateRequest, ShotDelayRequest, TimerAction,
        TimerUpdateRequest,
    },
    error::CommandError,
    services::{reconcile::Reconciler, transport::ChannelHealth},
    state::game::{GameMode, Team},
};

/// One HTTP request to a command endpoint.
#[derive(Debug, Clone)]
struct Command {
    method: Method,
    segments: Vec<String>,
    body: Option<Value>,
    /// Inspect the body for `success: false`.
    expects_ack: bool,
}

impl Command {
    fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|segment| segment.to_string()).collect(),
            body: None,
            expects_ack: false,
        }
    }

    fn post(segments: &[&str]) -> Self {
        Self::new(Method::POST, segments)
    }

    fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self, CommandError> {
        let body = serde_json::to_value(body)
            .map_err(|err| CommandError::InvalidInput(format!("unserializable body: {err}")))?;
        self.body = Some(body);
        Ok(self)
    }

    fn with_ack(mut self) -> Self {
        self.expects_ack = true;
        self
    }

    fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

fn device_target(mac: &str) -> Result<(), CommandError> {
    DeviceTarget {
        mac: mac.to_string(),
    }
    .validate()?;
    Ok(())
}

/// Sends commands and resyncs through [`Reconciler`] while the push channel is down.
pub struct CommandDispatcher {
    client: Client,
    server_url: String,
    timeout: Duration,
    health: Arc<dyn ChannelHealth>,
    reconciler: Arc<Reconciler>,
    last_error: Mutex<Option<String>>,
}

impl CommandDispatcher {
    /// Dispatcher sending to the configured server.
    pub fn new(
        client: Client,
        config: &EngineConfig,
        health: Arc<dyn ChannelHealth>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            client,
            server_url: config.server_url.clone(),
            timeout: config.command_timeout,
            health,
            reconciler,
            last_error: Mutex::new(None),
        }
    }

    /// Message of the most recent failed command, until cleared.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the recorded failure.
    pub fn clear_last_error(&self) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// `POST /api/assign/{mac}/{identifier}`.
    pub async fn assign_identifier(&self, mac: &str, identifier: &str) -> bool {
        let command = IdentifierAssignment {
            mac: mac.to_string(),
            identifier: identifier.to_string(),
        }
        .validate()
        .map_err(CommandError::from)
        .map(|()| Command::post(&["api", "assign", mac, identifier]).with_ack());
        self.execute("assign_identifier", command).await
    }

    /// `POST /api/team/{mac}/{team}`.
    pub async fn assign_team(&self, mac: &str, team: Team) -> bool {
        let command = device_target(mac)
            .map(|()| Command::post(&["api", "team", mac, team.as_str()]).with_ack());
        self.execute("assign_team", command).await
    }

    /// `POST /api/point/{mac}`.
    pub async fn add_point(&self, mac: &str) -> bool {
        self.device_command("add_point", Method::POST, &["api", "point"], mac)
            .await
    }

    /// `POST /api/point/subtract/{mac}`.
    pub async fn subtract_point(&self, mac: &str) -> bool {
        self.device_command(
            "subtract_point",
            Method::POST,
            &["api", "point", "subtract"],
            mac,
        )
        .await
    }

    /// Remove the device record; the server forgets it until it reports in again.
    pub async fn clear_device(&self, mac: &str) -> bool {
        self.device_command("clear_device", Method::DELETE, &["api", "remove"], mac)
            .await
    }

    /// Same endpoint as [`CommandDispatcher::clear_device`].
    pub async fn delete_device(&self, mac: &str) -> bool {
        self.device_command("delete_device", Method::DELETE, &["api", "remove"], mac)
            .await
    }

    /// Reboot the transponder.
    pub async fn restart_device(&self, mac: &str) -> bool {
        self.device_command("restart_device", Method::POST, &["api", "restart"], mac)
            .await
    }

    /// Wipe the transponder's network credentials.
    pub async fn reset_wifi(&self, mac: &str) -> bool {
        self.device_command("reset_wifi", Method::POST, &["api", "reset_wifi"], mac)
            .await
    }

    /// Legacy tag toggle endpoint.
    pub async fn toggle_tag(&self, mac: &str) -> bool {
        self.device_command("toggle_tag", Method::POST, &["api", "toggle_tag"], mac)
            .await
    }

    /// Reset teams, points and the countdown.
    pub async fn reset_game(&self) -> bool {
        self.execute(
            "reset_game",
            Ok(Command::post(&["api", "reset_game"]).with_ack()),
        )
        .await
    }

    /// Zero every score.
    pub async fn reset_points(&self) -> bool {
        self.execute(
            "reset_points",
            Ok(Command::post(&["api", "reset_points"]).with_ack()),
        )
        .await
    }

    /// `POST /api/config/debounce`.
    pub async fn update_debounce(&self, debounce_ms: u64) -> bool {
        let command =
            Command::post(&["api", "config", "debounce"]).with_body(&DebounceRequest { debounce_ms });
        self.execute("update_debounce", command).await
    }

    /// `POST /api/config/shot_delay`, in milliseconds.
    pub async fn update_shot_delay(&self, value: u64) -> bool {
        let command =
            Command::post(&["api", "config", "shot_delay"]).with_body(&ShotDelayRequest { value });
        self.execute("update_shot_delay", command).await
    }

    /// `POST /api/game/timer/update` with `value` in seconds.
    pub async fn update_timer(&self, action: TimerAction, value_secs: u64) -> bool {
        let command = Command::post(&["api", "game", "timer", "update"]).with_body(
            &TimerUpdateRequest {
                action,
                value: value_secs,
            },
        );
        self.execute("update_timer", command).await
    }

    /// Start a countdown of `duration_secs`.
    pub async fn start_timer(&self, duration_secs: u64) -> bool {
        self.update_timer(TimerAction::Start, duration_secs).await
    }

    /// Pause the running countdown.
    pub async fn pause_timer(&self) -> bool {
        self.update_timer(TimerAction::Pause, 0).await
    }

    /// Resume a paused countdown.
    pub async fn resume_timer(&self) -> bool {
        self.update_timer(TimerAction::Resume, 0).await
    }

    /// Clear the countdown.
    pub async fn stop_timer(&self) -> bool {
        self.update_timer(TimerAction::Stop, 0).await
    }

    /// Add `extra_secs` to the running or paused countdown.
    pub async fn extend_timer(&self, extra_secs: u64) -> bool {
        self.update_timer(TimerAction::Add, extra_secs).await
    }

    /// `POST /api/game/mode`.
    pub async fn update_game_mode(&self, mode: GameMode) -> bool {
        let command =
            Command::post(&["api", "game", "mode"]).with_body(&GameModeRequest { mode });
        self.execute("update_game_mode", command).await
    }

    /// `POST /api/game/friendly_fire`.
    pub async fn update_friendly_fire(&self, enabled: bool) -> bool {
        let command = Command::post(&["api", "game", "friendly_fire"])
            .with_body(&FriendlyFireRequest { enabled });
        self.execute("update_friendly_fire", command).await
    }

    /// Set the display name; an empty name clears it.
    pub async fn update_name(&self, mac: &str, name: &str) -> bool {
        let body = NameUpdateRequest {
            mac: mac.to_string(),
            name: name.to_string(),
        };
        let command = body
            .validate()
            .map_err(CommandError::from)
            .and_then(|()| Command::post(&["api", "device", "name"]).with_body(&body));
        self.execute("update_name", command).await
    }

    async fn device_command(
        &self,
        op: &'static str,
        method: Method,
        prefix: &[&str],
        mac: &str,
    ) -> bool {
        let command = device_target(mac).map(|()| {
            let mut segments = prefix.to_vec();
            segments.push(mac);
            Command::new(method, &segments)
        });
        self.execute(op, command).await
    }

    /// Send `command`, record the outcome, then resync if no push will follow.
    ///
    /// Input that failed validation is never sent and does not trigger a resync.
    async fn execute(&self, op: &'static str, command: Result<Command, CommandError>) -> bool {
        let command = match command {
            Ok(command) => command,
            Err(err) => {
                warn!(op, error = %err, "command rejected before sending");
                self.record_failure(op, &err);
                return false;
            }
        };

        let accepted = match self.send(&command).await {
            Ok(()) => {
                debug!(op, path = %command.path(), "command accepted");
                true
            }
            Err(err) => {
                warn!(op, error = %err, "command failed");
                self.record_failure(op, &err);
                false
            }
        };

        if !self.health.is_healthy() {
            debug!(op, "push channel unhealthy; resyncing after command");
            self.reconciler.refresh().await;
        }

        accepted
    }

    async fn send(&self, command: &Command) -> Result<(), CommandError> {
        let path = command.path();
        let url = self.url_for(&command.segments)?;

        let mut builder = self.client.request(command.method.clone(), url);
        if let Some(body) = &command.body {
            builder = builder.json(body);
        }

        let request = async {
            let response = builder.send().await.map_err(|source| CommandError::Send {
                path: path.clone(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(CommandError::Status {
                    path: path.clone(),
                    status,
                });
            }
            if !command.expects_ack {
                return Ok(());
            }

            let body = response.bytes().await.map_err(|source| CommandError::Send {
                path: path.clone(),
                source,
            })?;
            // Endpoints without a JSON body count as accepted.
            let ack = serde_json::from_slice::<CommandAck>(&body).unwrap_or_default();
            if ack.accepted() {
                Ok(())
            } else {
                Err(CommandError::Rejected { path: path.clone() })
            }
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| CommandError::Timeout { path: path.clone() })?
    }

    /// Append percent-encoded `segments` to the server URL.
    fn url_for(&self, segments: &[String]) -> Result<Url, CommandError> {
        let mut url = Url::parse(&self.server_url).map_err(|err| {
            CommandError::InvalidInput(format!("invalid server url `{}`: {err}", self.server_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                CommandError::InvalidInput(format!(
                    "server url `{}` cannot carry a path",
                    self.server_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn record_failure(&self, op: &str, err: &CommandError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(format!("{op} failed: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::{
        services::ingest::{self, INGEST_CAPACITY},
        state::{
            clock::{ClockService, ManualClock},
            store::StateStore,
        },
    };

    use super::*;

    struct FixedHealth(AtomicBool);

    impl ChannelHealth for FixedHealth {
        fn is_healthy(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn dispatcher(server_url: &str, healthy: bool) -> (CommandDispatcher, Arc<StateStore>) {
        let config = EngineConfig::new(server_url);
        let client = Client::new();
        let clock = Arc::new(ClockService::new(Arc::new(ManualClock::new(0))));
        let store = Arc::new(StateStore::new());
        let (handle, _rx) = ingest::channel(INGEST_CAPACITY);
        let reconciler = Arc::new(Reconciler::new(
            client.clone(),
            &config,
            clock,
            Arc::clone(&store),
            handle,
        ));
        let health = Arc::new(FixedHealth(AtomicBool::new(healthy)));
        (
            CommandDispatcher::new(client, &config, health, reconciler),
            store,
        )
    }

    #[test]
    fn url_segments_are_encoded() {
        let (root_dispatcher, _) = dispatcher("http://host:8080/", true);
        let url = root_dispatcher
            .url_for(&["api".into(), "assign".into(), "AA:BB".into(), "red one".into()])
            .unwrap();
        assert_eq!(url.as_str(), "http://host:8080/api/assign/AA:BB/red%20one");

        let (dispatcher, _) = dispatcher("http://host:8080/arena/", true);
        let url = dispatcher
            .url_for(&["api".into(), "reset_game".into()])
            .unwrap();
        assert_eq!(url.as_str(), "http://host:8080/arena/api/reset_game");
    }

    #[tokio::test]
    async fn invalid_input_fails_without_resync() {
        let (dispatcher, store) = dispatcher("http://127.0.0.1:1", false);

        assert!(!dispatcher.add_point("").await);
        assert!(!dispatcher.assign_identifier("AA:BB", "").await);
        assert!(!dispatcher.update_name("AA/BB", "x").await);
        let message = dispatcher.last_error().unwrap();
        assert!(message.starts_with("update_name failed"), "{message}");
        assert!(!store.is_loaded());

        dispatcher.clear_last_error();
        assert!(dispatcher.last_error().is_none());
    }

    #[tokio::test]
    async fn unparsable_server_url_is_a_failure() {
        let (dispatcher, _) = dispatcher("not a url", true);
        assert!(!dispatcher.reset_points().await);
        assert!(dispatcher.last_error().unwrap().contains("invalid server url"));
    }
}
