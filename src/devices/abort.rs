//! # Abort Coordinator
//!
//! Broadcasts an abort to each registered, alive device independently. One
//! device failing never stops the attempt on the other; failures come back
//! as labelled strings and the orchestrator decides what they mean.

use log::{info, warn};
use std::sync::Arc;

use crate::devices::client::{DeviceClient, DeviceEndpoint, RpcOutcome};
use crate::devices::liveness;
use crate::devices::registry::Device;

#[derive(Clone)]
pub struct AbortCoordinator {
    client: Arc<dyn DeviceClient>,
}

impl AbortCoordinator {
    pub fn new(client: Arc<dyn DeviceClient>) -> Self {
        Self { client }
    }

    /// Send `abort` to every device in `devices` that is alive.
    ///
    /// Devices are attempted concurrently; the returned list holds one
    /// entry per failed device, in the order given.
    pub async fn broadcast(&self, devices: &[Option<Device>]) -> Vec<String> {
        let attempts = devices
            .iter()
            .flatten()
            .filter(|device| liveness::is_alive(device))
            .map(|device| async move {
                match self.client.call(device, DeviceEndpoint::Abort, None).await {
                    RpcOutcome::Success(_) => {
                        info!("🛑 {} acknowledged abort", device.role);
                        None
                    }
                    failure => {
                        warn!("⚠️  {} abort failed: {}", device.role, failure);
                        Some(format!("{} abort failed: {}", device.role, failure))
                    }
                }
            });

        futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
