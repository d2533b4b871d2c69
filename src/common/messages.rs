//! # Message Protocol
//!
//! Request and response bodies for every coordinator endpoint. Bodies are
//! JSON; each request type that carries operator or device input exposes a
//! `validate` method that runs before any state is touched.

use serde::{Deserialize, Serialize};

use crate::common::error::{CoordError, CoordResult};
use crate::devices::display::DISPLAY_WIDTH;
use crate::devices::registry::Connectivity;
use crate::server::reconstruction::ReconstructionState;
use crate::server::status::ScanStatus;

// ============================================================================
// DEVICE-ORIGINATED REQUESTS
// ============================================================================

/// **Register**
///
/// Sent by a device on boot. Field aliases accept the names used by the
/// existing firmware (`type` / `ip`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// `actuator` | `capture` (or `controller` | `camera`)
    #[serde(alias = "type")]
    pub role: String,
    /// `host[:port]` or a full base URL
    #[serde(alias = "ip")]
    pub address: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> CoordResult<()> {
        if self.role.trim().is_empty() || self.address.trim().is_empty() {
            return Err(CoordError::Validation(
                "Missing device role or address".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub token: String,
    pub message: String,
}

/// Step callbacks: `rotation_complete` and `capture_complete`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepRequest {
    pub step: i64,
}

// ============================================================================
// OPERATOR REQUESTS
// ============================================================================

/// Direct display push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcdRequest {
    pub lines: Vec<String>,
}

impl LcdRequest {
    /// 1–2 lines, the first non-empty, none wider than the display.
    pub fn validate(&self) -> CoordResult<()> {
        match self.lines.as_slice() {
            [] => Err(CoordError::Validation("At least one line is required".into())),
            [first, ..] if first.trim().is_empty() => {
                Err(CoordError::Validation("Line 1 cannot be empty".into()))
            }
            lines if lines.len() > 2 => {
                Err(CoordError::Validation("At most two lines are supported".into()))
            }
            lines => {
                if let Some(line) = lines.iter().find(|l| l.chars().count() > DISPLAY_WIDTH) {
                    return Err(CoordError::Validation(format!(
                        "Line exceeds {} characters: {}",
                        DISPLAY_WIDTH, line
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Direct turntable move outside a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorRequest {
    /// Degrees; absolute 0..=359 or relative -360..=360
    pub angle: i32,
    #[serde(default)]
    pub relative: bool,
}

impl MotorRequest {
    pub fn validate(&self) -> CoordResult<()> {
        let in_range = if self.relative {
            (-360..=360).contains(&self.angle)
        } else {
            (0..360).contains(&self.angle)
        };

        if in_range {
            Ok(())
        } else {
            Err(CoordError::Validation(
                "Invalid angle. Must be 0-359 for absolute or -360 to +360 for relative".into(),
            ))
        }
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Connectivity and scan snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub actuator: Connectivity,
    pub capture: Connectivity,
    pub scan_status: ScanStatus,
    pub reconstruction: ReconstructionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Acknowledgement for device callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub status: String,
    /// Photo file name when a relayed capture was stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_as: Option<String>,
}

impl OkResponse {
    pub fn stored(name: Option<String>) -> Self {
        Self {
            stored_as: name,
            ..Self::default()
        }
    }
}

impl Default for OkResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            stored_as: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub message: String,
    /// Per-device abort failures; the scan is Idle regardless
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub stored_as: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorResponse {
    pub message: String,
    pub angle: i32,
    pub relative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
