//! # Reconstruction Runner
//!
//! Invokes the external photogrammetry tool over the accumulated photos.
//! The tool runs as a child process with a hard timeout, off the request
//! path, and its outcome (exit status plus the tail of stderr) is kept so
//! the next `status` query can report it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::common::config::ReconstructionConfig;

/// Keep at most this much of the tool's stderr in a failure report.
const STDERR_TAIL_BYTES: usize = 1024;

/// Result of a single tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconstructionOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut,
    SpawnFailed {
        error: String,
    },
}

impl ReconstructionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReconstructionOutcome::Succeeded)
    }
}

/// What `status` reports about reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconstructionState {
    NeverRun,
    Running {
        started_at: DateTime<Utc>,
    },
    Finished {
        finished_at: DateTime<Utc>,
        outcome: ReconstructionOutcome,
    },
}

#[async_trait]
pub trait ReconstructionTool: Send + Sync {
    async fn run(&self, input: &Path, output: &Path) -> ReconstructionOutcome;
}

/// The real tool: `<program> [args...] --input <input> --output <output>`.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl From<&ReconstructionConfig> for ExternalTool {
    fn from(config: &ReconstructionConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[async_trait]
impl ReconstructionTool for ExternalTool {
    async fn run(&self, input: &Path, output: &Path) -> ReconstructionOutcome {
        info!(
            "🧱 Starting reconstruction: {} --input {} --output {}",
            self.program,
            input.display(),
            output.display()
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!("❌ Could not launch {}: {}", self.program, e);
                return ReconstructionOutcome::SpawnFailed {
                    error: e.to_string(),
                };
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("❌ Lost track of {}: {}", self.program, e);
                return ReconstructionOutcome::Failed {
                    exit_code: None,
                    stderr: e.to_string(),
                };
            }
            Err(_) => {
                warn!(
                    "⏰ Reconstruction exceeded {}s and was killed",
                    self.timeout.as_secs()
                );
                return ReconstructionOutcome::TimedOut;
            }
        };

        debug!("{}", String::from_utf8_lossy(&output.stdout));

        if output.status.success() {
            info!("✅ Reconstruction finished");
            ReconstructionOutcome::Succeeded
        } else {
            let stderr = stderr_tail(&output.stderr);
            error!(
                "❌ Reconstruction failed ({}): {}",
                output.status, stderr
            );
            ReconstructionOutcome::Failed {
                exit_code: output.status.code(),
                stderr,
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> ExternalTool {
        ExternalTool::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "tool".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_success() {
        let tool = shell("exit 0", Duration::from_secs(5));
        let outcome = tool.run(Path::new("/in"), Path::new("/out")).await;
        assert_eq!(outcome, ReconstructionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_receives_input_and_output_dirs() {
        let tool = shell(
            r#"test "$1" = "--input" && test "$2" = "/scans/in" && test "$4" = "/scans/out""#,
            Duration::from_secs(5),
        );
        let outcome = tool
            .run(Path::new("/scans/in"), Path::new("/scans/out"))
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_failure_captures_exit_code_and_stderr() {
        let tool = shell("echo 'not enough photos' >&2; exit 3", Duration::from_secs(5));
        let outcome = tool.run(Path::new("/in"), Path::new("/out")).await;
        assert_eq!(
            outcome,
            ReconstructionOutcome::Failed {
                exit_code: Some(3),
                stderr: "not enough photos".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_the_tool() {
        let tool = shell("sleep 5", Duration::from_millis(100));
        let outcome = tool.run(Path::new("/in"), Path::new("/out")).await;
        assert_eq!(outcome, ReconstructionOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let tool = ExternalTool::new("/nonexistent/photogrammetry-tool", vec![], Duration::from_secs(1));
        let outcome = tool.run(Path::new("/in"), Path::new("/out")).await;
        assert!(matches!(outcome, ReconstructionOutcome::SpawnFailed { .. }));
    }

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES) + "last words";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("last words"));
    }

    #[test]
    fn test_state_serialization() {
        let state = ReconstructionState::Finished {
            finished_at: Utc::now(),
            outcome: ReconstructionOutcome::TimedOut,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "finished");
        assert_eq!(json["outcome"]["result"], "timed_out");

        let never = serde_json::to_value(ReconstructionState::NeverRun).unwrap();
        assert_eq!(never, serde_json::json!({"state": "never_run"}));
    }
}
