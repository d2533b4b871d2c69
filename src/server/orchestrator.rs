//! # Scan Orchestrator
//!
//! The only component allowed to change the scan status. It relays step
//! callbacks between the two devices (they never talk to each other),
//! guarantees at most one active scan, and rolls back cleanly when a device
//! call fails partway.
//!
//! ## State
//!
//! Device records, the durable scan status and the reconstruction state
//! sit behind one `tokio::sync::Mutex`. Every read-then-write sequence runs
//! under that lock, so `start`, `abort`, `register` and `heartbeat` are
//! linearizable with respect to each other.
//!
//! ## Scan protocol
//!
//! ```text
//! Operator  -> start()               Idle -> Scanning, actuator /start_rotation
//! Actuator  -> rotation_complete(n)  capture /capture {step: n}, store photo
//! Capture   -> capture_complete(n)   display "Photo n OK"
//! Actuator  -> scan_complete()       Scanning -> Idle, reconstruction in background
//! Operator  -> abort()               abort both devices, Scanning -> Idle
//! ```

use chrono::Utc;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::common::config::CoordinatorConfig;
use crate::common::error::{CoordError, CoordResult};
use crate::common::messages::{
    LcdRequest, MotorRequest, MotorResponse, RegisterRequest, RegisterResponse, StatusResponse,
};
use crate::devices::display::{lcd_body, DisplayLine};
use crate::devices::{
    AbortCoordinator, Device, DeviceClient, DeviceEndpoint, DeviceRegistry, DeviceRole,
    DisplayNotifier, HttpDeviceClient,
};
use crate::server::photos::{PhotoPayload, PhotoStore};
use crate::server::reconstruction::{ExternalTool, ReconstructionState, ReconstructionTool};
use crate::server::status::{ScanStatus, StatusStore};

// ============================================================================
// SHARED STATE
// ============================================================================

struct CoordinatorState {
    registry: DeviceRegistry,
    status: StatusStore,
    reconstruction: ReconstructionState,
    /// Bumped on every successful start; lets a late rollback tell whether
    /// the scan it is undoing is still the current one.
    scan_id: u64,
}

impl CoordinatorState {
    fn ensure_scanning(&self) -> CoordResult<()> {
        match self.status.get() {
            ScanStatus::Scanning => Ok(()),
            ScanStatus::Idle => Err(CoordError::Conflict("No scan in progress".to_string())),
        }
    }

    fn ensure_idle(&self) -> CoordResult<()> {
        match self.status.get() {
            ScanStatus::Idle => Ok(()),
            ScanStatus::Scanning => {
                Err(CoordError::Conflict("Scan already in progress".to_string()))
            }
        }
    }

    fn actuator(&self) -> Option<Device> {
        self.registry.get(DeviceRole::Actuator).cloned()
    }

    fn require_alive(&self, role: DeviceRole) -> CoordResult<Device> {
        self.registry
            .alive_at(role, Utc::now())
            .cloned()
            .ok_or_else(|| CoordError::Unavailable(format!("{} device not connected", role)))
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct ScanOrchestrator {
    state: Arc<Mutex<CoordinatorState>>,
    client: Arc<dyn DeviceClient>,
    display: DisplayNotifier,
    aborter: AbortCoordinator,
    photos: PhotoStore,
    tool: Arc<dyn ReconstructionTool>,
    output_dir: PathBuf,
    /// Serializes reconstruction runs; they share the input/output dirs.
    reconstruction_slot: Arc<Mutex<()>>,
}

impl ScanOrchestrator {
    /// Create an orchestrator from its collaborators.
    ///
    /// # Arguments
    /// - `status`: durable scan status, already read back from disk
    /// - `client`: outbound device RPCs
    /// - `photos`: where captured images are stored (reconstruction input)
    /// - `tool`: reconstruction runner
    /// - `output_dir`: reconstruction output directory
    pub fn new(
        status: StatusStore,
        client: Arc<dyn DeviceClient>,
        photos: PhotoStore,
        tool: Arc<dyn ReconstructionTool>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                registry: DeviceRegistry::new(),
                status,
                reconstruction: ReconstructionState::NeverRun,
                scan_id: 0,
            })),
            display: DisplayNotifier::new(client.clone()),
            aborter: AbortCoordinator::new(client.clone()),
            client,
            photos,
            tool,
            output_dir,
            reconstruction_slot: Arc::new(Mutex::new(())),
        }
    }

    /// Wire up the production collaborators described by `config`.
    ///
    /// Creates the upload and output directories and reads the persisted
    /// scan status.
    pub fn from_config(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.storage.upload_dir)?;
        std::fs::create_dir_all(&config.storage.output_dir)?;

        let status = StatusStore::open(&config.storage.status_file)?;
        let client = Arc::new(HttpDeviceClient::new()?);
        let tool = Arc::new(ExternalTool::from(&config.reconstruction));

        Ok(Self::new(
            status,
            client,
            PhotoStore::new(&config.storage.upload_dir),
            tool,
            config.storage.output_dir.clone(),
        ))
    }

    // ========================================================================
    // DEVICE LIFECYCLE
    // ========================================================================

    /// Register a device, replacing any previous record for its role.
    pub async fn register(&self, request: RegisterRequest) -> CoordResult<RegisterResponse> {
        request.validate()?;

        let (role, token, actuator) = {
            let mut state = self.state.lock().await;
            let token = state.registry.register(&request.role, &request.address)?;
            let role: DeviceRole = request.role.parse()?;
            (role, token, state.actuator())
        };

        if role == DeviceRole::Actuator {
            self.display
                .show(actuator.as_ref(), DisplayLine::Top, "System Ready")
                .await;
        }

        Ok(RegisterResponse {
            token,
            message: format!("{} registered successfully", role),
        })
    }

    pub async fn heartbeat(&self, token: &str) -> CoordResult<()> {
        let mut state = self.state.lock().await;
        if state.registry.heartbeat(token) {
            Ok(())
        } else {
            Err(CoordError::Unauthorized)
        }
    }

    pub async fn status(&self) -> StatusResponse {
        let state = self.state.lock().await;
        let devices = state.registry.status_snapshot();
        StatusResponse {
            actuator: devices.actuator,
            capture: devices.capture,
            scan_status: state.status.get(),
            reconstruction: state.reconstruction.clone(),
        }
    }

    // ========================================================================
    // SCAN STATE MACHINE
    // ========================================================================

    /// Idle -> Scanning.
    ///
    /// Scanning is persisted *before* the actuator is told to rotate, so a
    /// concurrent `start` during that call sees Scanning and gets
    /// `Conflict`. If the actuator call fails the status is rolled back to
    /// Idle.
    ///
    /// # Errors
    /// - `Conflict`: a scan is already running (checked first)
    /// - `Unavailable`: either device unregistered or not alive
    /// - `Upstream`: the actuator rejected or never answered `start_rotation`
    pub async fn start(&self) -> CoordResult<()> {
        let (actuator, scan_id) = {
            let mut state = self.state.lock().await;
            state.ensure_idle()?;

            let now = Utc::now();
            let (actuator, capture) = (
                state.registry.get(DeviceRole::Actuator),
                state.registry.get(DeviceRole::Capture),
            );
            if actuator.is_none() || capture.is_none() {
                return Err(CoordError::Unavailable("Not all devices connected".to_string()));
            }
            let actuator = match state.registry.alive_at(DeviceRole::Actuator, now) {
                Some(actuator) if state.registry.alive_at(DeviceRole::Capture, now).is_some() => {
                    actuator.clone()
                }
                _ => {
                    return Err(CoordError::Unavailable(
                        "One or more devices not responding".to_string(),
                    ))
                }
            };

            state.status.set(ScanStatus::Scanning)?;
            state.scan_id += 1;
            (actuator, state.scan_id)
        };

        info!("🎬 Scan #{} starting", scan_id);
        self.display
            .show(Some(&actuator), DisplayLine::Top, "Scan Starting...")
            .await;

        let outcome = self
            .client
            .call(&actuator, DeviceEndpoint::StartRotation, None)
            .await;
        if let Err(e) = outcome.into_upstream("Failed to start actuator") {
            error!("❌ {}", e);
            self.rollback_start(scan_id).await;
            self.display
                .show(Some(&actuator), DisplayLine::Top, "Start Failed")
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn rollback_start(&self, scan_id: u64) {
        let mut state = self.state.lock().await;
        if state.scan_id != scan_id || state.status.get() != ScanStatus::Scanning {
            // An abort already returned us to Idle (and maybe a new scan began)
            debug!("Scan #{} already left Scanning, nothing to roll back", scan_id);
            return;
        }
        match state.status.set(ScanStatus::Idle) {
            Ok(()) => info!("↩️  Scan #{} rolled back to idle", scan_id),
            Err(e) => error!("❌ Could not roll back scan #{}: {}", scan_id, e),
        }
    }

    /// Actuator finished rotating to `step`: trigger the capture device and
    /// store the returned image.
    ///
    /// Returns the stored file name, or `None` when the capture device
    /// answered without an image (it will deliver via `upload`).
    pub async fn rotation_complete(&self, token: &str, step: i64) -> CoordResult<Option<String>> {
        let (capture, actuator) = {
            let state = self.state.lock().await;
            state.registry.authorize(token, DeviceRole::Actuator)?;
            state.ensure_scanning()?;
            (state.require_alive(DeviceRole::Capture)?, state.actuator())
        };

        debug!("🔄 Rotation step {} complete, relaying capture", step);
        let outcome = self
            .client
            .call(
                &capture,
                DeviceEndpoint::Capture,
                Some(serde_json::json!({ "step": step })),
            )
            .await;

        let image = match outcome.into_upstream(&format!("Failed to trigger capture for step {}", step)) {
            Ok(image) => image,
            Err(e) => {
                warn!("⚠️  {}", e);
                self.display
                    .show(actuator.as_ref(), DisplayLine::Bottom, "Capture Failed")
                    .await;
                return Err(e);
            }
        };

        if image.is_empty() {
            warn!("📭 Capture device returned no image for step {}", step);
            return Ok(None);
        }

        match self.photos.save(step, PhotoPayload::from(image)).await {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                self.display
                    .show(actuator.as_ref(), DisplayLine::Bottom, "Save Failed")
                    .await;
                Err(e)
            }
        }
    }

    /// Capture device finished step `step`. Display only, no transition.
    pub async fn capture_complete(&self, token: &str, step: i64) -> CoordResult<()> {
        let actuator = {
            let state = self.state.lock().await;
            state.registry.authorize(token, DeviceRole::Capture)?;
            state.actuator()
        };

        self.display
            .show(actuator.as_ref(), DisplayLine::Bottom, &format!("Photo {} OK", step))
            .await;
        Ok(())
    }

    /// Scanning -> Idle, then reconstruct in the background.
    ///
    /// The returned handle resolves once reconstruction has finished and its
    /// outcome has been recorded; callers may drop it.
    pub async fn scan_complete(&self, token: &str) -> CoordResult<JoinHandle<()>> {
        let actuator = {
            let mut state = self.state.lock().await;
            state.registry.authorize(token, DeviceRole::Actuator)?;
            state.ensure_scanning()?;
            state.status.set(ScanStatus::Idle)?;
            state.reconstruction = ReconstructionState::Running {
                started_at: Utc::now(),
            };
            state.actuator()
        };

        info!("🏁 Scan complete");
        self.display
            .show(actuator.as_ref(), DisplayLine::Top, "Scan Complete")
            .await;

        Ok(self.spawn_reconstruction())
    }

    fn spawn_reconstruction(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let display = self.display.clone();
        let tool = self.tool.clone();
        let slot = self.reconstruction_slot.clone();
        let input = self.photos.dir().to_path_buf();
        let output = self.output_dir.clone();

        tokio::spawn(async move {
            let _running = slot.lock().await;
            let outcome = tool.run(&input, &output).await;
            let succeeded = outcome.is_success();

            let actuator = {
                let mut state = state.lock().await;
                state.reconstruction = ReconstructionState::Finished {
                    finished_at: Utc::now(),
                    outcome,
                };
                state.actuator()
            };

            let text = if succeeded { "Process Done" } else { "Process Failed" };
            display.show(actuator.as_ref(), DisplayLine::Bottom, text).await;
        })
    }

    /// Scanning -> Idle via an abort broadcast to both devices.
    ///
    /// Ends Idle whatever the devices answer; per-device failures, and a
    /// failure to persist Idle, come back as warnings.
    ///
    /// # Errors
    /// - `Conflict` when no scan is running (nothing is sent)
    pub async fn abort(&self) -> CoordResult<Vec<String>> {
        let (errors, actuator) = {
            let mut state = self.state.lock().await;
            state.ensure_scanning()?;

            let devices = [
                state.registry.get(DeviceRole::Actuator).cloned(),
                state.registry.get(DeviceRole::Capture).cloned(),
            ];
            // Lock stays held so no new scan can start while aborts are in flight
            let mut errors = self.aborter.broadcast(&devices).await;

            if let Err(e) = state.status.force(ScanStatus::Idle) {
                error!("❌ Could not persist idle after abort: {}", e);
                errors.push(format!("status not persisted: {}", e));
            }
            (errors, state.actuator())
        };

        if errors.is_empty() {
            info!("🛑 Scan aborted");
        } else {
            warn!("🛑 Scan aborted with {} device error(s)", errors.len());
        }
        self.display
            .show(actuator.as_ref(), DisplayLine::Top, "Scan Aborted")
            .await;

        Ok(errors)
    }

    // ========================================================================
    // DIRECT RELAYS
    // ========================================================================

    /// Check that `token` belongs to the current `role` device.
    pub async fn authorize(&self, token: &str, role: DeviceRole) -> CoordResult<()> {
        let state = self.state.lock().await;
        state.registry.authorize(token, role).map(|_| ())
    }

    /// Capture-device upload: store a streamed photo for `step`.
    pub async fn upload(
        &self,
        token: &str,
        step: i64,
        payload: PhotoPayload<'_>,
    ) -> CoordResult<String> {
        self.authorize(token, DeviceRole::Capture).await?;
        self.photos.save(step, payload).await
    }

    /// Operator display push. Unlike the notifier, failures are reported.
    pub async fn lcd(&self, request: LcdRequest) -> CoordResult<()> {
        request.validate()?;
        let actuator = {
            let state = self.state.lock().await;
            state.require_alive(DeviceRole::Actuator)?
        };

        let rows = [DisplayLine::Top, DisplayLine::Bottom];
        for (line, text) in rows.into_iter().zip(&request.lines) {
            self.client
                .call(&actuator, DeviceEndpoint::Lcd, Some(lcd_body(line, text)))
                .await
                .into_upstream("Display update failed")?;
        }
        Ok(())
    }

    /// Operator test shot; the image is returned, not stored.
    pub async fn capture_single(&self) -> CoordResult<bytes::Bytes> {
        let capture = {
            let state = self.state.lock().await;
            state.ensure_idle()?;
            state.require_alive(DeviceRole::Capture)?
        };

        info!("📷 Single capture requested");
        self.client
            .call(
                &capture,
                DeviceEndpoint::Capture,
                Some(serde_json::json!({ "step": 0 })),
            )
            .await
            .into_upstream("Capture failed")
    }

    pub async fn motor(&self, request: MotorRequest) -> CoordResult<MotorResponse> {
        request.validate()?;
        let actuator = {
            let state = self.state.lock().await;
            state.ensure_idle()?;
            state.require_alive(DeviceRole::Actuator)?
        };

        info!(
            "⚙️  Motor move to {}° ({})",
            request.angle,
            if request.relative { "relative" } else { "absolute" }
        );
        self.client
            .call(
                &actuator,
                DeviceEndpoint::Motor,
                Some(serde_json::json!({
                    "angle": request.angle,
                    "relative": request.relative,
                })),
            )
            .await
            .into_upstream("Motor command failed")?;

        Ok(MotorResponse {
            message: "Motor moved".to_string(),
            angle: request.angle,
            relative: request.relative,
        })
    }
}
