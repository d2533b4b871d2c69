//! # Display Notifier
//!
//! Best-effort status text on the actuator's two-line character display.
//! The firmware takes one line per call: `{"message": "..", "line": 0|1}`.
//! [`DisplayNotifier::show`] never fails its caller: an absent or silent
//! actuator, a timeout or a device error is logged and reported as `false`.

use log::{debug, warn};
use std::sync::Arc;

use crate::devices::client::{DeviceClient, DeviceEndpoint, RpcOutcome};
use crate::devices::liveness;
use crate::devices::registry::Device;

/// Characters per display line.
pub const DISPLAY_WIDTH: usize = 16;

/// Row on the display. The top row carries the scan phase, the bottom row
/// per-step progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLine {
    Top,
    Bottom,
}

impl DisplayLine {
    pub fn index(&self) -> u8 {
        match self {
            DisplayLine::Top => 0,
            DisplayLine::Bottom => 1,
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(DISPLAY_WIDTH).collect()
}

/// Wire body for one device `lcd` call.
pub fn lcd_body(line: DisplayLine, text: &str) -> serde_json::Value {
    serde_json::json!({ "message": truncate(text), "line": line.index() })
}

#[derive(Clone)]
pub struct DisplayNotifier {
    client: Arc<dyn DeviceClient>,
}

impl DisplayNotifier {
    pub fn new(client: Arc<dyn DeviceClient>) -> Self {
        Self { client }
    }

    /// Write `text` on one row of the actuator display, leaving the other
    /// row as it is.
    ///
    /// # Arguments
    /// - `actuator`: current actuator record, if one is registered
    /// - `line`: which row to write
    /// - `text`: truncated to [`DISPLAY_WIDTH`] characters
    ///
    /// # Returns
    /// `true` only if the device acknowledged the update.
    pub async fn show(&self, actuator: Option<&Device>, line: DisplayLine, text: &str) -> bool {
        let actuator = match actuator {
            Some(device) if liveness::is_alive(device) => device,
            _ => {
                debug!("🖥️  Actuator not connected, can't update display: {}", text);
                return false;
            }
        };

        match self
            .client
            .call(actuator, DeviceEndpoint::Lcd, Some(lcd_body(line, text)))
            .await
        {
            RpcOutcome::Success(_) => true,
            failure => {
                warn!("⚠️  Failed to update display ({}): {}", text, failure);
                false
            }
        }
    }
}
