//! # Coordinator Server
//!
//! The scan state machine and everything it persists, plus the HTTP
//! surface that exposes it.
//!
//! ## Modules
//!
//! - [`status`]: durable Idle/Scanning flag
//! - [`photos`]: captured image storage (reconstruction input)
//! - [`reconstruction`]: external photogrammetry tool runner
//! - [`orchestrator`]: the scan state machine and operator relays
//! - [`routes`]: axum router

pub mod orchestrator;
pub mod photos;
pub mod reconstruction;
pub mod routes;
pub mod status;

pub use orchestrator::ScanOrchestrator;
pub use routes::router;
