//! Shared fixtures for the HTTP-level tests: a fake reconstruction tool and
//! a router wired to it and to the recording device client.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use scan_coordinator::devices::fake::RecordingClient;
use scan_coordinator::server::photos::PhotoStore;
use scan_coordinator::server::reconstruction::{ReconstructionOutcome, ReconstructionTool};
use scan_coordinator::server::status::StatusStore;
use scan_coordinator::server::{router, ScanOrchestrator};

pub const BODY_LIMIT: usize = 64 * 1024;

// ============================================================================
// RECONSTRUCTION FAKE
// ============================================================================

pub struct FakeTool {
    outcome: ReconstructionOutcome,
    runs: Mutex<Vec<PathBuf>>,
}

impl FakeTool {
    pub fn new(outcome: ReconstructionOutcome) -> Self {
        Self {
            outcome,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl ReconstructionTool for FakeTool {
    async fn run(&self, input: &Path, _output: &Path) -> ReconstructionOutcome {
        self.runs.lock().unwrap().push(input.to_path_buf());
        self.outcome.clone()
    }
}

// ============================================================================
// APP HARNESS
// ============================================================================

pub struct TestApp {
    pub dir: TempDir,
    pub devices: Arc<RecordingClient>,
    pub tool: Arc<FakeTool>,
    pub app: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_tool(ReconstructionOutcome::Succeeded)
    }

    pub fn with_tool(outcome: ReconstructionOutcome) -> Self {
        let dir = TempDir::new().unwrap();
        let devices = Arc::new(RecordingClient::new());
        let tool = Arc::new(FakeTool::new(outcome));

        let orchestrator = ScanOrchestrator::new(
            StatusStore::open(dir.path().join(".scan_status")).unwrap(),
            devices.clone(),
            PhotoStore::new(dir.path().join("uploads")),
            tool.clone(),
            dir.path().join("output"),
        );

        Self {
            app: router(Arc::new(orchestrator), BODY_LIMIT),
            dir,
            devices,
            tool,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn stored_photos(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.upload_dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// JSON call; `token` goes into `Authorization: Bearer`.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = self.request(request).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, body).await
    }

    pub async fn status(&self) -> Value {
        let (status, body) = self.call(Method::GET, "/api/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    pub async fn register(&self, role: &str) -> String {
        let (status, body) = self
            .post(
                "/api/register",
                None,
                Some(serde_json::json!({"role": role, "address": format!("{}.local:80", role)})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "register {}: {}", role, body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn register_both(&self) -> (String, String) {
        (self.register("actuator").await, self.register("capture").await)
    }

    /// Poll until the background reconstruction has recorded an outcome.
    pub async fn wait_for_reconstruction(&self) -> Value {
        for _ in 0..100 {
            let status = self.status().await;
            if status["reconstruction"]["state"] == "finished" {
                return status["reconstruction"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reconstruction never finished");
    }
}

/// Build a `multipart/form-data` body from `(name, filename, content)` parts.
pub fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
            }
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}
