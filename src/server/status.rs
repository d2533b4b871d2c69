//! # Durable Scan Status
//!
//! The Idle/Scanning flag survives restarts: every transition is written to
//! disk before it takes effect in memory, and the file is read back at
//! startup. Writes go to a temporary file in the same directory which is
//! then renamed over the target, so a crash never leaves a torn value.

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::common::error::{CoordError, CoordResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Scanning,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Scanning => "scanning",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "idle" => Ok(ScanStatus::Idle),
            "scanning" => Ok(ScanStatus::Scanning),
            other => Err(CoordError::Storage(format!(
                "Unrecognized scan status {:?}",
                other
            ))),
        }
    }
}

/// Scan status backed by a single small file.
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    current: ScanStatus,
}

impl StatusStore {
    /// Read the persisted status; a missing file means Idle.
    ///
    /// # Errors
    /// - `Storage` if the file exists but cannot be read or holds an
    ///   unrecognized value.
    pub fn open(path: impl Into<PathBuf>) -> CoordResult<Self> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(content) => content.parse()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScanStatus::Idle,
            Err(e) => return Err(e.into()),
        };

        if current == ScanStatus::Scanning {
            info!(
                "♻️  Recovered scan status 'scanning' from {} (previous run ended mid-scan)",
                path.display()
            );
        }

        Ok(Self { path, current })
    }

    pub fn get(&self) -> ScanStatus {
        self.current
    }

    /// Persist `status`, then adopt it. On error the in-memory value is
    /// unchanged.
    pub fn set(&mut self, status: ScanStatus) -> CoordResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(status.as_str().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CoordError::from(e.error))?;

        self.current = status;
        Ok(())
    }

    /// Adopt `status` even if it cannot be persisted. The persist error,
    /// if any, is still returned.
    pub fn force(&mut self, status: ScanStatus) -> CoordResult<()> {
        let persisted = self.set(status);
        self.current = status;
        persisted
    }
}
