//! # Device Components
//!
//! Everything the coordinator knows about, and says to, the two devices.
//!
//! ## Modules
//!
//! - [`registry`]: one record per role, bearer tokens, last-seen stamps
//! - [`liveness`]: 30-second heartbeat staleness check
//! - [`client`]: outbound RPC seam and its reqwest implementation
//! - [`display`]: best-effort text on the actuator display
//! - [`abort`]: independent abort broadcast to both devices

pub mod abort;
pub mod client;
pub mod display;
pub mod liveness;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use abort::AbortCoordinator;
pub use client::{DeviceClient, DeviceEndpoint, HttpDeviceClient, RpcOutcome};
pub use display::DisplayNotifier;
pub use registry::{Connectivity, Device, DeviceRegistry, DeviceRole};
