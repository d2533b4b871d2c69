//! # Device Registry
//!
//! Holds at most one [`Device`] per [`DeviceRole`]. Registration always
//! replaces the slot wholesale with a freshly generated bearer token, so any
//! token issued earlier for that role stops matching immediately, even if
//! the old device is still physically connected.
//!
//! The registry itself does no locking; the orchestrator owns it behind the
//! same lock as the scan status so register/heartbeat/start/abort are
//! linearizable with respect to one another.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::common::error::{CoordError, CoordResult};
use crate::devices::liveness;

/// The two device slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Rotates the turntable; owns the display
    Actuator,
    /// Takes the photos
    Capture,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Actuator => "actuator",
            DeviceRole::Capture => "capture",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceRole {
    type Err = CoordError;

    /// Accepts the firmware names (`controller`, `camera`) as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "actuator" | "controller" => Ok(DeviceRole::Actuator),
            "capture" | "camera" => Ok(DeviceRole::Capture),
            _ => Err(CoordError::InvalidRole(s.to_string())),
        }
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub role: DeviceRole,
    /// `host[:port]` or a full base URL
    pub address: String,
    /// Bearer token issued at registration
    pub token: String,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Base URL for outbound calls. Bare addresses are reached over http.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub actuator: Connectivity,
    pub capture: Connectivity,
}

/// 32 random bytes, URL-safe base64 without padding.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    actuator: Option<Device>,
    capture: Option<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, role: DeviceRole) -> &mut Option<Device> {
        match role {
            DeviceRole::Actuator => &mut self.actuator,
            DeviceRole::Capture => &mut self.capture,
        }
    }

    /// Register (or re-register) a device and return its new token.
    ///
    /// # Errors
    /// - `InvalidRole` if `role` is not a recognized device kind; both
    ///   slots are left untouched.
    pub fn register(&mut self, role: &str, address: &str) -> CoordResult<String> {
        self.register_at(role, address, Utc::now())
    }

    pub fn register_at(
        &mut self,
        role: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> CoordResult<String> {
        let role: DeviceRole = role.parse()?;
        let token = generate_token();

        let replaced = self.slot_mut(role).replace(Device {
            role,
            address: address.trim().to_string(),
            token: token.clone(),
            last_seen: now,
        });

        if let Some(old) = replaced {
            info!(
                "🔁 {} re-registered at {} (previous token at {} revoked)",
                role, address, old.address
            );
        } else {
            info!("📝 {} registered at {}", role, address);
        }

        Ok(token)
    }

    /// Refresh last-seen for whichever device owns `token`.
    pub fn heartbeat(&mut self, token: &str) -> bool {
        self.heartbeat_at(token, Utc::now())
    }

    pub fn heartbeat_at(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        let device = [&mut self.actuator, &mut self.capture]
            .into_iter()
            .flatten()
            .find(|d| d.token == token);

        match device {
            Some(device) => {
                device.last_seen = now;
                debug!("💓 Heartbeat from {}", device.role);
                true
            }
            None => false,
        }
    }

    pub fn find_by_token(&self, token: &str) -> Option<&Device> {
        [&self.actuator, &self.capture]
            .into_iter()
            .flatten()
            .find(|d| d.token == token)
    }

    pub fn get(&self, role: DeviceRole) -> Option<&Device> {
        match role {
            DeviceRole::Actuator => self.actuator.as_ref(),
            DeviceRole::Capture => self.capture.as_ref(),
        }
    }

    /// The device for `role`, only if it is currently alive.
    pub fn alive_at(&self, role: DeviceRole, now: DateTime<Utc>) -> Option<&Device> {
        self.get(role).filter(|d| liveness::is_alive_at(d, now))
    }

    /// Check that `token` is exactly the token on file for `role`.
    pub fn authorize(&self, token: &str, role: DeviceRole) -> CoordResult<&Device> {
        self.find_by_token(token)
            .filter(|d| d.role == role)
            .ok_or(CoordError::Unauthorized)
    }

    pub fn status_snapshot(&self) -> RegistryStatus {
        self.status_snapshot_at(Utc::now())
    }

    pub fn status_snapshot_at(&self, now: DateTime<Utc>) -> RegistryStatus {
        let connectivity = |role| {
            if self.alive_at(role, now).is_some() {
                Connectivity::Connected
            } else {
                Connectivity::Disconnected
            }
        };

        RegistryStatus {
            actuator: connectivity(DeviceRole::Actuator),
            capture: connectivity(DeviceRole::Capture),
        }
    }
}
