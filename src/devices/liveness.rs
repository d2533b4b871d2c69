//! Heartbeat staleness check.
//!
//! A device is alive iff its last heartbeat (or registration) happened
//! strictly less than [`LIVENESS_THRESHOLD`] ago.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::devices::registry::Device;

/// How long a device may stay silent before it counts as disconnected.
pub const LIVENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Liveness at an explicit instant. Use this where the caller already
/// holds a `now` so several checks agree with each other.
pub fn is_alive_at(device: &Device, now: DateTime<Utc>) -> bool {
    match (now - device.last_seen).to_std() {
        Ok(elapsed) => elapsed < LIVENESS_THRESHOLD,
        // last_seen slightly ahead of `now` (stamped by a racing request)
        Err(_) => true,
    }
}

pub fn is_alive(device: &Device) -> bool {
    is_alive_at(device, Utc::now())
}
