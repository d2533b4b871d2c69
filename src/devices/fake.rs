//! Recording stand-in for [`DeviceClient`], shared by the unit tests and
//! (through the `testing` feature) the HTTP-level tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::devices::client::{DeviceClient, DeviceEndpoint, RpcOutcome};
use crate::devices::registry::{Device, DeviceRole};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: DeviceRole,
    pub endpoint: DeviceEndpoint,
    pub body: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<RecordedCall>>,
    outcomes: Mutex<HashMap<(DeviceRole, DeviceEndpoint), RpcOutcome>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, role: DeviceRole, endpoint: DeviceEndpoint, outcome: RpcOutcome) {
        self.outcomes.lock().unwrap().insert((role, endpoint), outcome);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, role: DeviceRole, endpoint: DeviceEndpoint) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.role == role && c.endpoint == endpoint)
            .collect()
    }

    pub fn bodies(&self, role: DeviceRole, endpoint: DeviceEndpoint) -> Vec<Option<serde_json::Value>> {
        self.calls_to(role, endpoint)
            .into_iter()
            .map(|c| c.body)
            .collect()
    }
}

#[async_trait]
impl DeviceClient for RecordingClient {
    async fn call(
        &self,
        device: &Device,
        endpoint: DeviceEndpoint,
        body: Option<serde_json::Value>,
    ) -> RpcOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            role: device.role,
            endpoint,
            body,
        });
        self.outcomes
            .lock()
            .unwrap()
            .get(&(device.role, endpoint))
            .cloned()
            .unwrap_or(RpcOutcome::Success(Bytes::new()))
    }
}
