//! Wire shapes received from the game server and their one-time normalization into the
//! canonical records of [`crate::state::game`].
//!
//! The server is loose about types (numbers sometimes arrive as strings, fields go missing),
//! so every raw field tolerates bad input and defaults are applied here and nowhere else.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_json::Value;
use serde_with::{BoolFromInt, DefaultOnError, DisplayFromStr, PickFirst, serde_as};
use tracing::warn;

use crate::state::game::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_SHOT_DELAY_MS, Device, GameMode, GameState, Snapshot, Team,
};

/// Heartbeat age assumed for a device whose `last_seen` is missing.
const MISSING_LAST_SEEN_AGE_SECS: i64 = 3_600;
/// Largest accepted distance between a reported server time and local receipt.
const MAX_SERVER_SKEW_MS: i64 = 10 * 365 * 24 * 3_600 * 1_000;

/// Messages accepted on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Full state publication.
    State(RawSnapshot),
    /// Out-of-band match result notification.
    Victory(VictoryEvent),
    /// A message type this engine does not handle.
    Ignored(String),
}

impl PushMessage {
    /// Classify and decode a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(serde_json::Error::custom("push message is not a JSON object"));
        };

        match object.get("type").and_then(Value::as_str) {
            Some("victory") => serde_json::from_value(value).map(PushMessage::Victory),
            Some(other) => Ok(PushMessage::Ignored(other.to_string())),
            None if object.contains_key("devices") || object.contains_key("game") => {
                serde_json::from_value(value).map(PushMessage::State)
            }
            None => Err(serde_json::Error::custom(
                "push message carries neither devices nor game",
            )),
        }
    }
}

/// Match result announcement pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VictoryEvent {
    /// Winning team or player.
    #[serde(default)]
    pub winner: String,
    /// Human-readable announcement.
    #[serde(default)]
    pub message: String,
}

/// Full state body as published on the push channel or returned by `GET /api/devices`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSnapshot {
    /// Device entries, decoded one by one so a bad entry only drops itself.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub devices: Option<Vec<Value>>,
    /// Game configuration and progress.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub game: Option<RawGameState>,
    /// Server clock in milliseconds since epoch.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub server_time: Option<f64>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
/// Device entry as sent by the server.
pub struct RawDevice {
    /// Hardware address; entries without one are dropped.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub mac: Option<String>,
    /// Last known network address.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub ip: Option<String>,
    /// Heartbeat timestamp in seconds.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub last_seen: Option<f64>,
    /// First sighting in seconds.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub first_seen: Option<f64>,
    /// Server liveness flag, `0`/`1` or a bool.
    #[serde_as(as = "DefaultOnError<PickFirst<(_, BoolFromInt)>>")]
    #[serde(default)]
    pub is_online: bool,
    /// Call sign.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub identifier: Option<String>,
    /// Display name.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub name: Option<String>,
    /// Team name.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub team: Option<String>,
    /// Score.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub points: Option<f64>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
/// Game state as sent by the server.
pub struct RawGameState {
    /// Team name to member MACs.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub teams: Option<IndexMap<String, Vec<String>>>,
    /// MAC to score.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub points: Option<IndexMap<String, f64>>,
    /// Winner once decided.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub winners: Option<String>,
    /// Hit debounce in milliseconds.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub debounce_ms: Option<f64>,
    /// Delay between shots in milliseconds.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub shot_delay_ms: Option<f64>,
    /// Countdown end in seconds since epoch.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub timer_end: Option<f64>,
    /// Seconds left on a paused countdown.
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub timer_paused: Option<f64>,
    /// `team` or `ffa`.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub game_mode: Option<String>,
    /// Friendly fire flag, `0`/`1` or a bool.
    #[serde_as(as = "DefaultOnError<PickFirst<(_, BoolFromInt)>>")]
    #[serde(default)]
    pub friendly_fire: bool,
}

/// Truncate a loosely typed number to an integer, rejecting NaN and infinities.
fn to_int(value: Option<f64>) -> Option<i64> {
    value.filter(|v| v.is_finite()).map(|v| v.trunc() as i64)
}

/// Treat empty or whitespace-only strings as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawDevice {
    /// Produce the canonical device, or `None` when the entry has no usable MAC.
    pub fn normalize(self, now_secs: i64) -> Option<Device> {
        let mac = non_empty(self.mac)?;
        Some(Device {
            mac,
            ip: self.ip.unwrap_or_default(),
            last_seen: to_int(self.last_seen)
                .filter(|ts| *ts > 0)
                .unwrap_or(now_secs - MISSING_LAST_SEEN_AGE_SECS),
            first_seen: to_int(self.first_seen)
                .filter(|ts| *ts > 0)
                .unwrap_or(now_secs),
            is_online: self.is_online,
            identifier: non_empty(self.identifier),
            name: non_empty(self.name),
            team: non_empty(self.team)
                .map(|team| Team::from_wire(&team))
                .unwrap_or_default(),
            points: to_int(self.points).unwrap_or(0),
        })
    }
}

impl RawGameState {
    /// Produce the canonical game state, defaulting every missing or invalid field.
    pub fn normalize(self) -> GameState {
        let to_millis = |value: Option<f64>, default: u64| {
            to_int(value)
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(default)
        };

        GameState {
            teams: self.teams.unwrap_or_default(),
            points: self
                .points
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(mac, points)| to_int(Some(points)).map(|points| (mac, points)))
                .collect(),
            winners: non_empty(self.winners),
            debounce_ms: to_millis(self.debounce_ms, DEFAULT_DEBOUNCE_MS),
            shot_delay_ms: to_millis(self.shot_delay_ms, DEFAULT_SHOT_DELAY_MS),
            timer_end: to_int(self.timer_end).filter(|ts| *ts > 0),
            timer_paused: to_int(self.timer_paused).filter(|secs| *secs > 0),
            game_mode: self
                .game_mode
                .map(|mode| GameMode::from_wire(&mode))
                .unwrap_or_default(),
            friendly_fire: self.friendly_fire,
        }
    }
}

impl RawSnapshot {
    /// Normalize the whole body into a [`Snapshot`].
    ///
    /// Entries without a MAC are dropped and duplicate MACs keep their first occurrence.
    pub fn normalize(self, received_at_ms: i64) -> Snapshot {
        let now_secs = received_at_ms.div_euclid(1_000);
        let mut seen = HashSet::new();
        let mut devices = Vec::new();

        for entry in self.devices.unwrap_or_default() {
            let raw = match serde_json::from_value::<RawDevice>(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(error = %err, "dropping malformed device entry");
                    continue;
                }
            };
            let Some(device) = raw.normalize(now_secs) else {
                warn!("dropping device entry without mac");
                continue;
            };
            if !seen.insert(device.mac.clone()) {
                warn!(mac = %device.mac, "dropping duplicate device entry");
                continue;
            }
            devices.push(device);
        }

        Snapshot {
            devices,
            game: self.game.map(RawGameState::normalize).unwrap_or_default(),
            server_time_ms: plausible_server_time(to_int(self.server_time), received_at_ms),
            received_at_ms,
        }
    }
}

/// Keep a server time only when it lies within [`MAX_SERVER_SKEW_MS`] of local receipt.
fn plausible_server_time(server_time_ms: Option<i64>, received_at_ms: i64) -> Option<i64> {
    let server_time_ms = server_time_ms.filter(|ms| *ms > 0)?;
    let skew = server_time_ms.saturating_sub(received_at_ms).saturating_abs();
    if skew > MAX_SERVER_SKEW_MS {
        warn!(server_time_ms, received_at_ms, "ignoring implausible server time");
        return None;
    }
    Some(server_time_ms)
}
