mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use serde_json::json;

use common::{multipart_body, TestApp, BODY_LIMIT};
use scan_coordinator::devices::{DeviceEndpoint, DeviceRole, RpcOutcome};
use scan_coordinator::server::reconstruction::ReconstructionOutcome;

// ============================================================================
// FULL SCAN
// ============================================================================

#[tokio::test]
async fn test_full_scan_flow() {
    let app = TestApp::new();
    app.devices.respond(
        DeviceRole::Capture,
        DeviceEndpoint::Capture,
        RpcOutcome::Success(Bytes::from_static(b"\xFF\xD8jpeg")),
    );

    let (actuator, capture) = app.register_both().await;
    let status = app.status().await;
    assert_eq!(status["actuator"], "connected");
    assert_eq!(status["capture"], "connected");
    assert_eq!(status["scan_status"], "idle");

    let (code, body) = app.post("/api/start", None, None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["message"], "Scan started");
    assert_eq!(app.status().await["scan_status"], "scanning");

    for step in 1..=3 {
        let (code, body) = app
            .post("/api/rotation_complete", Some(&actuator), Some(json!({"step": step})))
            .await;
        assert_eq!(code, StatusCode::OK);
        assert!(body["stored_as"]
            .as_str()
            .unwrap()
            .starts_with(&format!("photo_{}_", step)));

        let (code, _) = app
            .post("/api/capture_complete", Some(&capture), Some(json!({"step": step})))
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    let (code, _) = app.post("/api/scan_complete", Some(&actuator), None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(app.status().await["scan_status"], "idle");

    let reconstruction = app.wait_for_reconstruction().await;
    assert_eq!(reconstruction["outcome"]["result"], "succeeded");

    assert_eq!(app.stored_photos().len(), 3);
    assert_eq!(app.tool.runs(), 1);
    assert_eq!(
        app.devices
            .bodies(DeviceRole::Capture, DeviceEndpoint::Capture),
        vec![
            Some(json!({"step": 1})),
            Some(json!({"step": 2})),
            Some(json!({"step": 3})),
        ]
    );
}

#[tokio::test]
async fn test_failed_reconstruction_is_reported() {
    let app = TestApp::with_tool(ReconstructionOutcome::Failed {
        exit_code: Some(1),
        stderr: "too few photos".into(),
    });
    let (actuator, _) = app.register_both().await;
    app.post("/api/start", None, None).await;

    let (code, _) = app.post("/api/scan_complete", Some(&actuator), None).await;
    assert_eq!(code, StatusCode::OK);

    let reconstruction = app.wait_for_reconstruction().await;
    assert_eq!(reconstruction["outcome"]["result"], "failed");
    assert_eq!(reconstruction["outcome"]["exit_code"], 1);
    assert_eq!(app.status().await["scan_status"], "idle");
}

// ============================================================================
// START
// ============================================================================

#[tokio::test]
async fn test_start_without_devices_is_unavailable() {
    let app = TestApp::new();
    app.register("actuator").await;

    let (code, body) = app.post("/api/start", None, None).await;

    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Not all devices connected");
    assert_eq!(app.devices.calls_to(DeviceRole::Actuator, DeviceEndpoint::StartRotation).len(), 0);
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let app = TestApp::new();
    app.register_both().await;

    assert_eq!(app.post("/api/start", None, None).await.0, StatusCode::OK);
    let (code, body) = app.post("/api/start", None, None).await;

    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Scan already in progress");
    assert_eq!(app.devices.calls_to(DeviceRole::Actuator, DeviceEndpoint::StartRotation).len(), 1);
}

#[tokio::test]
async fn test_actuator_failure_rolls_back_start() {
    let app = TestApp::new();
    app.register_both().await;
    app.devices.respond(
        DeviceRole::Actuator,
        DeviceEndpoint::StartRotation,
        RpcOutcome::Connection("refused".into()),
    );

    let (code, body) = app.post("/api/start", None, None).await;

    assert_eq!(code, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("refused"));
    assert_eq!(app.status().await["scan_status"], "idle");
}

// ============================================================================
// AUTH
// ============================================================================

#[tokio::test]
async fn test_reregistration_revokes_old_token() {
    let app = TestApp::new();
    let old = app.register("capture").await;
    let new = app.register("capture").await;
    assert_ne!(old, new);

    assert_eq!(
        app.post("/api/heartbeat", Some(&old), None).await.0,
        StatusCode::UNAUTHORIZED
    );
    let (code, body) = app.post("/api/heartbeat", Some(&new), None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_mismatched_token() {
    let app = TestApp::new();
    let (actuator, capture) = app.register_both().await;
    app.post("/api/start", None, None).await;

    let (code, body) = app.post("/api/heartbeat", None, None).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (code, _) = app
        .post("/api/rotation_complete", Some(&capture), Some(json!({"step": 1})))
        .await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, _) = app
        .post("/api/capture_complete", Some(&actuator), Some(json!({"step": 1})))
        .await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    assert_eq!(app.devices.calls_to(DeviceRole::Capture, DeviceEndpoint::Capture).len(), 0);
}

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn test_register_validation() {
    let app = TestApp::new();

    let (code, body) = app
        .post("/api/register", None, Some(json!({"role": "toaster", "address": "x"})))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid device role: toaster");

    let (code, _) = app
        .post("/api/register", None, Some(json!({"role": "capture"})))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, body) = app
        .post("/api/register", None, Some(json!({"type": "camera", "ip": "10.0.0.9"})))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["token"].as_str().unwrap().len(), 43);
}

#[tokio::test]
async fn test_lcd_validation_and_relay() {
    let app = TestApp::new();
    app.register("actuator").await;

    let (code, _) = app
        .post("/api/lcd", None, Some(json!({"lines": ["this line is far too long"]})))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = app
        .post("/api/lcd", None, Some(json!({"lines": ["Hello", "World"]})))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(
        app.devices.bodies(DeviceRole::Actuator, DeviceEndpoint::Lcd)[1..],
        [
            Some(json!({"message": "Hello", "line": 0})),
            Some(json!({"message": "World", "line": 1})),
        ]
    );
}

// ============================================================================
// STEP CALLBACKS
// ============================================================================

#[tokio::test]
async fn test_capture_failure_keeps_scanning() {
    let app = TestApp::new();
    let (actuator, _) = app.register_both().await;
    app.devices
        .respond(DeviceRole::Capture, DeviceEndpoint::Capture, RpcOutcome::Timeout);
    app.post("/api/start", None, None).await;

    let (code, _) = app
        .post("/api/rotation_complete", Some(&actuator), Some(json!({"step": 2})))
        .await;

    assert_eq!(code, StatusCode::BAD_GATEWAY);
    assert_eq!(app.status().await["scan_status"], "scanning");
    assert!(app.stored_photos().is_empty());
}

#[tokio::test]
async fn test_callbacks_while_idle_conflict() {
    let app = TestApp::new();
    let (actuator, _) = app.register_both().await;

    let (code, _) = app
        .post("/api/rotation_complete", Some(&actuator), Some(json!({"step": 1})))
        .await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, _) = app.post("/api/scan_complete", Some(&actuator), None).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(app.tool.runs(), 0);
}

// ============================================================================
// ABORT
// ============================================================================

#[tokio::test]
async fn test_abort_while_idle_conflicts() {
    let app = TestApp::new();
    app.register_both().await;

    let (code, body) = app.post("/api/abort", None, None).await;

    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["error"], "No scan in progress");
    assert_eq!(app.devices.calls_to(DeviceRole::Actuator, DeviceEndpoint::Abort).len(), 0);
    assert_eq!(app.devices.calls_to(DeviceRole::Capture, DeviceEndpoint::Abort).len(), 0);
}

#[tokio::test]
async fn test_abort_reports_device_failures_and_goes_idle() {
    let app = TestApp::new();
    app.register_both().await;
    app.post("/api/start", None, None).await;
    app.devices
        .respond(DeviceRole::Actuator, DeviceEndpoint::Abort, RpcOutcome::Protocol(500));

    let (code, body) = app.post("/api/abort", None, None).await;

    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["message"], "Scan aborted with errors");
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().starts_with("actuator"));
    assert_eq!(app.devices.calls_to(DeviceRole::Capture, DeviceEndpoint::Abort).len(), 1);
    assert_eq!(app.status().await["scan_status"], "idle");
}

#[tokio::test]
async fn test_clean_abort() {
    let app = TestApp::new();
    app.register_both().await;
    app.post("/api/start", None, None).await;

    let (code, body) = app.post("/api/abort", None, None).await;

    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({"message": "Scan aborted successfully"}));
}

// ============================================================================
// UPLOAD & OPERATOR RELAYS
// ============================================================================

fn upload_request(token: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let boundary = "scanboundary";
    let body = multipart_body(boundary, parts);
    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_stores_photo() {
    let app = TestApp::new();
    let capture = app.register("capture").await;

    let (code, body) = app
        .request(upload_request(
            &capture,
            &[("step", None, &b"12"[..]), ("image", Some("shot.jpg"), &b"\xFF\xD8data"[..])],
        ))
        .await;

    assert_eq!(code, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let stored = body["stored_as"].as_str().unwrap();
    assert!(stored.starts_with("photo_12_"));
    assert_eq!(
        std::fs::read(app.upload_dir().join(stored)).unwrap(),
        b"\xFF\xD8data"
    );
}

#[tokio::test]
async fn test_upload_with_only_image_field_takes_step_from_filename() {
    let app = TestApp::new();
    let capture = app.register("capture").await;

    let (code, body) = app
        .request(upload_request(&capture, &[("image", Some("photo_3.jpg"), &b"\xFF\xD8three"[..])]))
        .await;

    assert_eq!(code, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["message"], "Image photo_3.jpg uploaded successfully");
    let stored = body["stored_as"].as_str().unwrap();
    assert!(stored.starts_with("photo_3_"));
    assert_eq!(
        std::fs::read(app.upload_dir().join(stored)).unwrap(),
        b"\xFF\xD8three"
    );
}

#[tokio::test]
async fn test_upload_step_after_image_or_missing() {
    let app = TestApp::new();
    let capture = app.register("capture").await;

    let (code, body) = app
        .request(upload_request(
            &capture,
            &[("image", Some("photo_3.jpg"), &b"late"[..]), ("step", None, &b"8"[..])],
        ))
        .await;
    assert_eq!(code, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(body["stored_as"].as_str().unwrap().starts_with("photo_8_"));

    let (code, body) = app
        .request(upload_request(&capture, &[("image", Some("snapshot.jpg"), &b"x"[..])]))
        .await;
    assert_eq!(code, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(body["stored_as"].as_str().unwrap().starts_with("photo_0_"));

    assert_eq!(app.stored_photos().len(), 2);
}

#[tokio::test]
async fn test_upload_requires_capture_token_and_image() {
    let app = TestApp::new();
    let (actuator, capture) = app.register_both().await;

    let (code, _) = app
        .request(upload_request(&actuator, &[("step", None, &b"1"[..]), ("image", Some("a.jpg"), &b"x"[..])]))
        .await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, _) = app
        .request(upload_request(&capture, &[("step", None, &b"1"[..])]))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(app.stored_photos().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let app = TestApp::new();
    let capture = app.register("capture").await;
    let huge = vec![0u8; BODY_LIMIT + 1];

    let (code, _) = app
        .request(upload_request(&capture, &[("step", None, &b"1"[..]), ("image", Some("big.jpg"), &huge[..])]))
        .await;

    assert_eq!(code, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.stored_photos().is_empty());
}

#[tokio::test]
async fn test_capture_single_returns_image() {
    let app = TestApp::new();
    app.register("capture").await;
    app.devices.respond(
        DeviceRole::Capture,
        DeviceEndpoint::Capture,
        RpcOutcome::Success(Bytes::from_static(b"preview")),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/capture_single")
        .body(Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.app.clone(), request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"preview");
    assert!(app.stored_photos().is_empty());
}

#[tokio::test]
async fn test_motor_requires_idle_actuator() {
    let app = TestApp::new();

    let (code, _) = app
        .post("/api/motor", None, Some(json!({"angle": 90})))
        .await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

    app.register("actuator").await;
    let (code, _) = app
        .post("/api/motor", None, Some(json!({"angle": 400})))
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, body) = app
        .post("/api/motor", None, Some(json!({"angle": -30, "relative": true})))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["angle"], -30);
    assert_eq!(body["relative"], true);
}
