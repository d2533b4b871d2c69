//! # Outbound Device RPCs
//!
//! Every call the coordinator makes to a device goes through the
//! [`DeviceClient`] trait. Outcomes are reported as an explicit
//! [`RpcOutcome`] instead of an error so callers can decide per call site
//! whether a failure is fatal (start, relay), collected (abort) or
//! swallowed (display).
//!
//! Calls are never retried here; a timeout is a terminal result for that
//! attempt.
//!
//! ## Device contract
//!
//! ```text
//! POST {base}/start_rotation   Authorization: Bearer <token>
//! POST {base}/capture          {"step": n}  -> raw image bytes
//! POST {base}/abort
//! POST {base}/lcd              {"message": "..", "line": 0|1}
//! POST {base}/motor            {"angle": n, "relative": bool}
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::fmt;
use std::time::Duration;

use crate::common::error::CoordError;
use crate::devices::registry::Device;

/// Fixed timeout for every outbound device call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEndpoint {
    StartRotation,
    Capture,
    Abort,
    Lcd,
    Motor,
}

impl DeviceEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            DeviceEndpoint::StartRotation => "start_rotation",
            DeviceEndpoint::Capture => "capture",
            DeviceEndpoint::Abort => "abort",
            DeviceEndpoint::Lcd => "lcd",
            DeviceEndpoint::Motor => "motor",
        }
    }
}

/// Result of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome {
    /// 2xx; carries the raw response body (image bytes for `capture`)
    Success(Bytes),
    /// No response within the timeout
    Timeout,
    /// The device answered with a non-success status
    Protocol(u16),
    /// Could not reach the device at all
    Connection(String),
}

impl RpcOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RpcOutcome::Success(_))
    }

    /// Collapse into a `CoordResult`, labelling failures with `context`.
    pub fn into_upstream(self, context: &str) -> Result<Bytes, CoordError> {
        match self {
            RpcOutcome::Success(body) => Ok(body),
            failure => Err(CoordError::Upstream(format!("{}: {}", context, failure))),
        }
    }
}

impl fmt::Display for RpcOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcOutcome::Success(body) => write!(f, "ok ({} bytes)", body.len()),
            RpcOutcome::Timeout => write!(f, "timed out after {}s", RPC_TIMEOUT.as_secs()),
            RpcOutcome::Protocol(status) => write!(f, "device returned HTTP {}", status),
            RpcOutcome::Connection(msg) => write!(f, "connection failed: {}", msg),
        }
    }
}

#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn call(
        &self,
        device: &Device,
        endpoint: DeviceEndpoint,
        body: Option<serde_json::Value>,
    ) -> RpcOutcome;
}

/// reqwest-backed client used in production.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
}

impl HttpDeviceClient {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_timeout(RPC_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

fn classify(err: reqwest::Error) -> RpcOutcome {
    if err.is_timeout() {
        RpcOutcome::Timeout
    } else {
        RpcOutcome::Connection(err.to_string())
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn call(
        &self,
        device: &Device,
        endpoint: DeviceEndpoint,
        body: Option<serde_json::Value>,
    ) -> RpcOutcome {
        let url = format!("{}/{}", device.base_url(), endpoint.path());
        debug!("📤 POST {} ({})", url, device.role);

        let mut request = self.http.post(&url).bearer_auth(&device.token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return classify(e),
        };

        let status = response.status();
        if !status.is_success() {
            return RpcOutcome::Protocol(status.as_u16());
        }

        match response.bytes().await {
            Ok(body) => RpcOutcome::Success(body),
            Err(e) => classify(e),
        }
    }
}
