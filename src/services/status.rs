//! Liveness tiers derived from heartbeat age.
//!
//! The device's own `is_online` flag is ignored here: the server may leave it stale, while
//! `last_seen` is always the latest heartbeat it recorded.

use crate::{config::StatusThresholds, state::game::Device};

/// Liveness tier of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivenessTier {
    /// Heartbeat is recent.
    Online,
    /// Heartbeats are overdue but the device is not yet considered gone.
    Late,
    /// No heartbeat for too long.
    Offline,
}

/// Heartbeat age in seconds, never negative.
pub fn heartbeat_age(device: &Device, now_secs: i64) -> i64 {
    now_secs.saturating_sub(device.last_seen).max(0)
}

/// Classify with the default 10 s / 20 s boundaries.
pub fn classify(device: &Device, now_secs: i64) -> LivenessTier {
    classify_with(device, now_secs, StatusThresholds::default())
}

/// Classify with explicit boundaries.
pub fn classify_with(device: &Device, now_secs: i64, thresholds: StatusThresholds) -> LivenessTier {
    let age = heartbeat_age(device, now_secs);
    if age >= thresholds.offline_after_secs {
        LivenessTier::Offline
    } else if age >= thresholds.late_after_secs {
        LivenessTier::Late
    } else {
        LivenessTier::Online
    }
}

/// Seconds left before a device drops to offline; `0` once offline.
pub fn seconds_until_offline(device: &Device, now_secs: i64, thresholds: StatusThresholds) -> i64 {
    thresholds
        .offline_after_secs
        .saturating_sub(heartbeat_age(device, now_secs))
        .max(0)
}

/// Derived status of one device at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device MAC.
    pub mac: String,
    /// Tier at the evaluated instant.
    pub tier: LivenessTier,
    /// Seconds since the last heartbeat.
    pub heartbeat_age_secs: i64,
    /// Seconds before the device turns offline.
    pub seconds_until_offline: i64,
}

impl DeviceStatus {
    /// Status of `device` at `now_secs`.
    pub fn of(device: &Device, now_secs: i64, thresholds: StatusThresholds) -> Self {
        Self {
            mac: device.mac.clone(),
            tier: classify_with(device, now_secs, thresholds),
            heartbeat_age_secs: heartbeat_age(device, now_secs),
            seconds_until_offline: seconds_until_offline(device, now_secs, thresholds),
        }
    }
}

/// Devices grouped by tier, keeping input order inside each group.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierPartition<'a> {
    /// Recent heartbeat.
    pub online: Vec<&'a Device>,
    /// Overdue heartbeat.
    pub late: Vec<&'a Device>,
    /// Gone.
    pub offline: Vec<&'a Device>,
}

impl TierPartition<'_> {
    /// Number of devices across all tiers.
    pub fn total(&self) -> usize {
        self.online.len() + self.late.len() + self.offline.len()
    }
}

/// Split `devices` into tiers.
pub fn partition<'a>(
    devices: &'a [Device],
    now_secs: i64,
    thresholds: StatusThresholds,
) -> TierPartition<'a> {
    let mut groups = TierPartition::default();
    for device in devices {
        match classify_with(device, now_secs, thresholds) {
            LivenessTier::Online => groups.online.push(device),
            LivenessTier::Late => groups.late.push(device),
            LivenessTier::Offline => groups.offline.push(device),
        }
    }
    groups
}
