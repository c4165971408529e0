//! Sandbox abstraction
//!
//! The pipeline only needs three capabilities from an isolation backend:
//! start a program with limits, wait for it with a wall-clock bound, and
//! forcefully kill it. `DockerEngine` is the production backend.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Hard limits applied to a single run
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub timeout: Duration,
    /// Per-stream cap on captured output
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            pids_limit: 64,
            timeout: Duration::from_millis(5000),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ResourceLimits {
    pub fn from_settings(settings: &piston_common::config::Settings) -> Self {
        Self {
            memory_bytes: mb_to_bytes(settings.memory_limit_mb),
            nano_cpus: cpus_to_nano(settings.cpu_limit),
            pids_limit: settings.pids_limit,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_output_bytes: settings.max_output_bytes,
        }
    }
}

pub(crate) fn mb_to_bytes(mb: u32) -> i64 {
    (mb as i64) * 1024 * 1024
}

pub(crate) fn cpus_to_nano(cpus: f32) -> i64 {
    (cpus as f64 * 1_000_000_000.0) as i64
}

/// Everything a backend needs to run one job
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub job_id: Uuid,
    pub image: String,
    pub argv: Vec<String>,
    /// Host directory mounted as the sandbox's working directory
    pub workspace_path: PathBuf,
    pub limits: ResourceLimits,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Ran to completion; a non-zero code is a program failure, not a system one
    Completed {
        exit_code: i64,
        stdout: String,
        stderr: String,
    },
    /// Killed after exceeding the wall-clock budget; output is partial
    TimedOut { stdout: String, stderr: String },
    /// The isolation layer could not start the program
    LaunchFailed { reason: String },
}

impl LaunchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchOutcome::Completed { .. } => "completed",
            LaunchOutcome::TimedOut { .. } => "timed_out",
            LaunchOutcome::LaunchFailed { .. } => "launch_failed",
        }
    }
}

/// An isolation backend. Implementations never return errors: every failure
/// is reported as `LaunchOutcome::LaunchFailed`, and the instance they start
/// must be gone by the time `run` returns.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, spec: &LaunchSpec) -> LaunchOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_conversions() {
        assert_eq!(mb_to_bytes(128), 134_217_728);
        assert_eq!(cpus_to_nano(0.5), 500_000_000);
        assert_eq!(cpus_to_nano(2.0), 2_000_000_000);
    }

    #[test]
    fn test_limits_from_settings() {
        let settings = piston_common::config::Settings {
            memory_limit_mb: 64,
            timeout_ms: 1500,
            ..Default::default()
        };
        let limits = ResourceLimits::from_settings(&settings);
        assert_eq!(limits.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(limits.timeout, Duration::from_millis(1500));
        assert_eq!(limits.pids_limit, 64);
    }
}
