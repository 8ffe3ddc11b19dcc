//! Request bodies and acknowledgements exchanged with the command endpoints.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dto::validation::{validate_identifier, validate_mac},
    state::game::GameMode,
};

/// Countdown operations understood by `POST /api/game/timer/update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerAction {
    /// Start a countdown of `value` seconds.
    Start,
    /// Freeze the countdown.
    Pause,
    /// Continue a paused countdown.
    Resume,
    /// Clear the countdown.
    Stop,
    /// Add `value` seconds to the countdown.
    Add,
}

/// Target device of a path-parameterised command.
#[derive(Debug, Validate)]
pub struct DeviceTarget {
    /// Device MAC.
    #[validate(custom(function = "validate_mac"))]
    pub mac: String,
}

/// Call sign assignment.
#[derive(Debug, Validate)]
pub struct IdentifierAssignment {
    /// Device MAC.
    #[validate(custom(function = "validate_mac"))]
    pub mac: String,
    /// Call sign to assign.
    #[validate(custom(function = "validate_identifier"))]
    pub identifier: String,
}

/// Body of `POST /api/config/debounce`.
#[derive(Debug, Serialize)]
pub struct DebounceRequest {
    /// Hit debounce in milliseconds.
    pub debounce_ms: u64,
}

/// Body of `POST /api/config/shot_delay`.
#[derive(Debug, Serialize)]
pub struct ShotDelayRequest {
    /// Delay between shots in milliseconds.
    pub value: u64,
}

/// Body of `POST /api/game/timer/update`; `value` is in seconds.
#[derive(Debug, Serialize)]
pub struct TimerUpdateRequest {
    /// Operation to apply.
    pub action: TimerAction,
    /// Seconds for `Start` and `Add`, ignored otherwise.
    pub value: u64,
}

/// Body of `POST /api/game/mode`.
#[derive(Debug, Serialize)]
pub struct GameModeRequest {
    /// Mode to switch to.
    pub mode: GameMode,
}

/// Body of `POST /api/game/friendly_fire`.
#[derive(Debug, Serialize)]
pub struct FriendlyFireRequest {
    /// Whether hits on teammates count.
    pub enabled: bool,
}

/// Body of `POST /api/device/name`.
#[derive(Debug, Serialize, Validate)]
pub struct NameUpdateRequest {
    /// Device MAC.
    #[validate(custom(function = "validate_mac"))]
    pub mac: String,
    /// New display name; empty clears it.
    pub name: String,
}

/// Optional acknowledgement some endpoints return; `success: false` means the server refused.
#[derive(Debug, Default, Deserialize)]
pub struct CommandAck {
    /// Server verdict, absent on most endpoints.
    #[serde(default)]
    pub success: Option<bool>,
}

impl CommandAck {
    /// Anything but an explicit `false` counts as accepted.
    pub fn accepted(&self) -> bool {
        self.success != Some(false)
    }
}
