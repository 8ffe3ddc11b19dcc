//! Canonical device and game records.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Debounce applied by the server when a snapshot omits it.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
/// Shot delay applied by the server when a snapshot omits it.
pub const DEFAULT_SHOT_DELAY_MS: u64 = 100;

/// Team a device plays for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    /// Red team.
    Red,
    /// Blue team.
    Blue,
    /// Not assigned to any team.
    #[default]
    None,
}

impl Team {
    /// Parse the wire representation. Unknown values map to `None`.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "red" => Team::Red,
            "blue" => Team::Blue,
            _ => Team::None,
        }
    }

    /// Path segment / wire value used by the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
            Team::None => "none",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring mode of the match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Two teams play against each other.
    #[default]
    Team,
    /// Free for all.
    Ffa,
}

impl GameMode {
    /// Parse the wire representation. Unknown values map to `Team`.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ffa" => GameMode::Ffa,
            _ => GameMode::Team,
        }
    }

    /// Wire value used by the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Team => "team",
            GameMode::Ffa => "ffa",
        }
    }
}

/// Canonical record for a transponder as last reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Hardware address, unique across the fleet.
    pub mac: String,
    /// Last known network address. Display only.
    pub ip: String,
    /// Server-side heartbeat timestamp (seconds since epoch).
    pub last_seen: i64,
    /// First time the server saw the device (seconds since epoch).
    pub first_seen: i64,
    /// Liveness flag as declared by the server. Advisory only.
    pub is_online: bool,
    /// Single-letter call sign, if assigned.
    pub identifier: Option<String>,
    /// Free-text label.
    pub name: Option<String>,
    /// Team membership.
    pub team: Team,
    /// Score, may be negative.
    pub points: i64,
}

/// Canonical game configuration and progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    /// Team name to ordered member MACs.
    pub teams: IndexMap<String, Vec<String>>,
    /// MAC to score.
    pub points: IndexMap<String, i64>,
    /// Winning team once the match is decided.
    pub winners: Option<String>,
    /// Hit debounce in milliseconds.
    pub debounce_ms: u64,
    /// Delay between shots in milliseconds.
    pub shot_delay_ms: u64,
    /// Absolute end of the running countdown (seconds since epoch).
    pub timer_end: Option<i64>,
    /// Seconds left on a paused countdown.
    pub timer_paused: Option<i64>,
    /// Scoring mode.
    pub game_mode: GameMode,
    /// Whether hits on teammates count.
    pub friendly_fire: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            teams: IndexMap::new(),
            points: IndexMap::new(),
            winners: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            shot_delay_ms: DEFAULT_SHOT_DELAY_MS,
            timer_end: None,
            timer_paused: None,
            game_mode: GameMode::Team,
            friendly_fire: false,
        }
    }
}

impl GameState {
    /// Whether a winner has been declared.
    pub fn is_decided(&self) -> bool {
        self.winners.is_some()
    }
}

/// A complete, normalized world view as published by the server at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Every known device; MACs are unique.
    pub devices: Vec<Device>,
    /// Game configuration and progress.
    pub game: GameState,
    /// Server clock (ms since epoch) when the snapshot was published, if provided.
    pub server_time_ms: Option<i64>,
    /// Local clock (ms since epoch) when the snapshot was received.
    pub received_at_ms: i64,
}

impl Snapshot {
    /// Safe default used when the server cannot be reached: no devices, default game.
    pub fn fallback(received_at_ms: i64) -> Self {
        Self {
            received_at_ms,
            ..Self::default()
        }
    }

    /// Look up a device by MAC.
    pub fn device(&self, mac: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.mac == mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_parsing_is_lenient() {
        assert_eq!(Team::from_wire("RED"), Team::Red);
        assert_eq!(Team::from_wire(" blue "), Team::Blue);
        assert_eq!(Team::from_wire("none"), Team::None);
        assert_eq!(Team::from_wire("green"), Team::None);
        assert_eq!(Team::Blue.to_string(), "blue");
    }

    #[test]
    fn game_mode_defaults_to_team() {
        assert_eq!(GameMode::from_wire("ffa"), GameMode::Ffa);
        assert_eq!(GameMode::from_wire("battle"), GameMode::Team);
    }

    #[test]
    fn fallback_snapshot_is_empty() {
        let snapshot = Snapshot::fallback(42);
        assert!(snapshot.devices.is_empty());
        assert_eq!(snapshot.game, GameState::default());
        assert_eq!(snapshot.received_at_ms, 42);
        assert!(snapshot.server_time_ms.is_none());
    }
}
