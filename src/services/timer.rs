//! Countdown projection from game timer fields and the server-corrected clock.

use crate::state::game::GameState;

/// Remaining countdown at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerProjection {
    /// Milliseconds left; `0` when idle.
    pub remaining_ms: i64,
    /// Counting down right now.
    pub is_running: bool,
    /// Frozen at `remaining_ms`.
    pub is_paused: bool,
}

/// Project the countdown at `corrected_now_ms`.
///
/// A running timer wins over a paused value; a past `timer_end` with no paused value means
/// no countdown at all.
pub fn project(game: &GameState, corrected_now_ms: i64) -> TimerProjection {
    let end_ms = game.timer_end.map(|end| end.saturating_mul(1_000));
    if let Some(end_ms) = end_ms.filter(|end_ms| *end_ms > corrected_now_ms) {
        return TimerProjection {
            remaining_ms: end_ms.saturating_sub(corrected_now_ms),
            is_running: true,
            is_paused: false,
        };
    }

    if let Some(paused) = game.timer_paused.filter(|secs| *secs > 0) {
        return TimerProjection {
            remaining_ms: paused.saturating_mul(1_000),
            is_running: false,
            is_paused: true,
        };
    }

    TimerProjection::default()
}

/// How a running countdown stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEdge {
    /// Reached zero on its own, as far as timing tells.
    Expired,
    /// Cleared or stopped away from its scheduled end.
    Stopped,
}

/// Tracks the previous tick to tell natural expiry from a manual stop.
///
/// Both look the same in the data (the timer is simply no longer running), so expiry is
/// inferred from the stop happening within `tolerance_ms` of the scheduled end. It is a
/// heuristic: a stop issued right at the end reads as expiry.
#[derive(Debug, Clone)]
pub struct ExpiryDetector {
    tolerance_ms: i64,
    was_running: bool,
}

impl ExpiryDetector {
    /// Detector treating stops within `tolerance_ms` of the end as expiry.
    pub fn new(tolerance_ms: i64) -> Self {
        Self {
            tolerance_ms: tolerance_ms.saturating_abs(),
            was_running: false,
        }
    }

    /// Feed the current game state; returns an edge on the tick a running timer stops.
    ///
    /// Pausing is not an edge.
    pub fn observe(&mut self, game: &GameState, corrected_now_ms: i64) -> Option<TimerEdge> {
        let projection = project(game, corrected_now_ms);
        let was_running = std::mem::replace(&mut self.was_running, projection.is_running);

        if !was_running || projection.is_running || projection.is_paused {
            return None;
        }

        match game.timer_end {
            Some(end)
                if corrected_now_ms
                    .saturating_sub(end.saturating_mul(1_000))
                    .saturating_abs()
                    < self.tolerance_ms =>
            {
                Some(TimerEdge::Expired)
            }
            _ => Some(TimerEdge::Stopped),
        }
    }
}
