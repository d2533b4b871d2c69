//! # Configuration Utilities
//!
//! Configuration structures for the coordinator process and the TOML
//! loader shared by both binaries.
//!
//! Every section is optional; a missing section (or a missing `--config`
//! flag altogether) falls back to the defaults below.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:8888"
//! max_upload_bytes = 52428800
//!
//! [storage]
//! upload_dir = "./uploads"
//! output_dir = "./output"
//! status_file = ".scan_status"
//!
//! [reconstruction]
//! program = "photogrammetry-tool"
//! args = []
//! timeout_secs = 3600
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: CoordinatorConfig = load_config("config/coordinator.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// HTTP listener settings
    pub server: ServerInfo,
    /// Where photos, reconstruction output and the scan status live
    pub storage: StorageConfig,
    /// External photogrammetry tool invocation
    pub reconstruction: ReconstructionConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Address the coordinator binds to (e.g., "0.0.0.0:8888")
    pub address: String,
    /// Upper bound on a single request body (photo uploads)
    pub max_upload_bytes: usize,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8888".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Accumulated photos; also the reconstruction input directory
    pub upload_dir: PathBuf,
    /// Reconstruction output directory
    pub output_dir: PathBuf,
    /// Durable scan status file
    pub status_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./output"),
            status_file: PathBuf::from(".scan_status"),
        }
    }
}

/// Reconstruction tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Executable name or path; invoked as
    /// `<program> [args...] --input <dir> --output <dir>`
    pub program: String,
    /// Extra leading arguments (e.g. a pipeline name)
    pub args: Vec<String>,
    /// Hard limit on a single reconstruction run (seconds)
    pub timeout_secs: u64,
}

impl ReconstructionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            program: "photogrammetry-tool".to_string(),
            args: Vec::new(),
            timeout_secs: 3600,
        }
    }
}

impl CoordinatorConfig {
    /// Load from `path` when given, otherwise use the built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => load_config(path),
            None => Ok(Self::default()),
        }
    }
}
