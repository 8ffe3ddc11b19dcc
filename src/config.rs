//! Engine configuration loading: a JSON file with built-in defaults and environment overrides.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/engine.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TAGFLEET_CONFIG_PATH";
/// Environment variable that overrides the configured server URL.
const SERVER_URL_ENV: &str = "TAGFLEET_SERVER_URL";

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_LATE_AFTER_SECS: i64 = 10;
const DEFAULT_OFFLINE_AFTER_SECS: i64 = 20;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_EXPIRY_TOLERANCE_MS: i64 = 2_000;

/// Heartbeat-age boundaries used to derive liveness tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThresholds {
    /// Age in seconds from which a device counts as late.
    pub late_after_secs: i64,
    /// Age in seconds from which a device counts as offline.
    pub offline_after_secs: i64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            late_after_secs: DEFAULT_LATE_AFTER_SECS,
            offline_after_secs: DEFAULT_OFFLINE_AFTER_SECS,
        }
    }
}

/// Delay schedule applied between push channel reconnect attempts.
///
/// The delay doubles after every failed attempt until it reaches `max_delay`.
/// With `initial_delay == max_delay` this degenerates to a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt after a disconnect.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
        }
    }

    /// Delay that follows `current` once another attempt failed.
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared by every engine component.
pub struct EngineConfig {
    /// Base HTTP URL of the game server, e.g. `http://10.0.0.2:8080`.
    pub server_url: String,
    /// Reconnect schedule for the push channel.
    pub reconnect: ReconnectPolicy,
    /// Upper bound for the push channel handshake.
    pub connect_timeout: Duration,
    /// Upper bound for a full-state pull.
    pub fetch_timeout: Duration,
    /// Upper bound for a single command request.
    pub command_timeout: Duration,
    /// Liveness tier boundaries.
    pub thresholds: StatusThresholds,
    /// Period of the local clock tick.
    pub tick_interval: Duration,
    /// Window around the scheduled end in which a stopped timer counts as expired.
    pub expiry_tolerance_ms: i64,
}

impl EngineConfig {
    /// Build a default configuration pointing at `server_url`.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match read_raw(&path) {
            Ok(Some(raw)) => {
                info!(path = %path.display(), "loaded engine config");
                raw.into()
            }
            Ok(None) => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(error = %err, "failed to load config; falling back to defaults");
                Self::default()
            }
        };

        if let Some(url) = env::var(SERVER_URL_ENV).ok().filter(|url| !url.is_empty()) {
            config.server_url = url;
        }

        config
    }

    /// Build the URL of an HTTP endpoint relative to the server root.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Push channel URL: same host as the HTTP API with the scheme upgraded to `ws`/`wss`.
    pub fn push_url(&self) -> Option<String> {
        let base = self.server_url.trim_end_matches('/');
        let (scheme, rest) = base.split_once("://")?;
        let ws_scheme = match scheme {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return None,
        };
        if rest.is_empty() {
            return None;
        }
        Some(format!("{ws_scheme}://{rest}/ws"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            thresholds: StatusThresholds::default(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            expiry_tolerance_ms: DEFAULT_EXPIRY_TOLERANCE_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    server_url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    max_reconnect_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    late_after_secs: Option<i64>,
    offline_after_secs: Option<i64>,
    tick_interval_ms: Option<u64>,
    expiry_tolerance_ms: Option<i64>,
}

impl From<RawConfig> for EngineConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();

        let initial_delay = raw
            .reconnect_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.initial_delay);
        let max_delay = raw
            .max_reconnect_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(initial_delay)
            .max(initial_delay);

        let thresholds = StatusThresholds {
            late_after_secs: raw
                .late_after_secs
                .unwrap_or(defaults.thresholds.late_after_secs),
            offline_after_secs: raw
                .offline_after_secs
                .unwrap_or(defaults.thresholds.offline_after_secs),
        };
        let thresholds = if thresholds.late_after_secs < 0
            || thresholds.offline_after_secs <= thresholds.late_after_secs
        {
            warn!(
                late = thresholds.late_after_secs,
                offline = thresholds.offline_after_secs,
                "invalid liveness thresholds; using defaults"
            );
            StatusThresholds::default()
        } else {
            thresholds
        };

        Self {
            server_url: raw
                .server_url
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.server_url),
            reconnect: ReconnectPolicy {
                initial_delay,
                max_delay,
            },
            connect_timeout: raw
                .connect_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            fetch_timeout: raw
                .fetch_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            command_timeout: raw
                .command_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            thresholds,
            tick_interval: raw
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            expiry_tolerance_ms: raw
                .expiry_tolerance_ms
                .map(i64::saturating_abs)
                .unwrap_or(defaults.expiry_tolerance_ms),
        }
    }
}

/// Read and parse the config file; `Ok(None)` when it does not exist.
fn read_raw(path: &Path) -> Result<Option<RawConfig>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    serde_json::from_str::<RawConfig>(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
