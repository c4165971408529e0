/// Docker Execution Engine
///
/// **Core Responsibility:**
/// Run one job's program in a fresh, short-lived container and report how it ended.
///
/// **Docker Execution Rules:**
/// 1. Pulls the runtime image if not present (pull time is not charged to the job)
/// 2. Creates a container per job with security constraints:
///    - Network disabled (no network namespace, `network_mode=none`)
///    - Memory ceiling with swap pinned to the same value
///    - CPU and pids limits, all capabilities dropped, no-new-privileges
///    - Job workspace bind-mounted as the working directory `/code`
/// 3. Streams stdout/stderr under a hard wall-clock timeout
/// 4. On timeout, SIGKILLs the container (its whole process tree goes with it)
/// 5. Removes the container on every path, including panics and cancellation
///
/// Containers carry the `piston.managed` label so instances orphaned by a
/// crashed process can be found and reaped on the next start.

use crate::error::Result;
use crate::sandbox::{LaunchOutcome, LaunchSpec, Sandbox};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerState, HostConfig};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Mount point of the job workspace inside the container
pub const WORKDIR: &str = "/code";
pub const MANAGED_LABEL: &str = "piston.managed";
pub const JOB_LABEL: &str = "piston.job";

const TRUNCATION_MARKER: &str = "\n[output truncated]";
const OOM_MESSAGE: &str = "\n[Container killed: memory limit exceeded]";
const SEGFAULT_MESSAGE: &str = "\n[Container killed: segmentation fault]";

/// Container removal guard - guarantees the container is removed
///
/// `release()` removes it on the normal path. If the guard is dropped while
/// still armed (panic, cancelled task) removal is scheduled on the runtime.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.container_id).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_container(&docker, &container_id).await;
                });
            }
            Err(_) => {
                warn!(container_id = %container_id, "No runtime available to remove container");
            }
        }
    }
}

/// Force-remove a container. A missing container is already clean.
async fn remove_container(docker: &Docker, container_id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };

    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => debug!(container_id = %container_id, "Container removed"),
        Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {}
        Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
    }
}

/// Output captured from the container, capped per stream
#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: bool,
    stderr_truncated: bool,
    limit: usize,
}

impl CapturedOutput {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    fn push_stdout(&mut self, chunk: &[u8]) {
        append_capped(&mut self.stdout, &mut self.stdout_truncated, chunk, self.limit);
    }

    fn push_stderr(&mut self, chunk: &[u8]) {
        append_capped(&mut self.stderr, &mut self.stderr_truncated, chunk, self.limit);
    }

    /// Decode once at the end so multi-byte characters split across chunks survive
    fn into_strings(self) -> (String, String) {
        let mut stdout = String::from_utf8_lossy(&self.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stdout_truncated {
            stdout.push_str(TRUNCATION_MARKER);
        }
        if self.stderr_truncated {
            stderr.push_str(TRUNCATION_MARKER);
        }
        (stdout, stderr)
    }
}

fn append_capped(buf: &mut Vec<u8>, truncated: &mut bool, chunk: &[u8], limit: usize) {
    let room = limit.saturating_sub(buf.len());
    if chunk.len() > room {
        *truncated = true;
    }
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

/// Explain kills performed by the container runtime
fn annotate_exit(stderr: &mut String, exit_code: i64, oom_killed: bool) {
    if oom_killed || exit_code == 137 {
        stderr.push_str(OOM_MESSAGE);
    } else if exit_code == 139 {
        stderr.push_str(SEGFAULT_MESSAGE);
    }
}

/// Exit code and OOM flag from an inspected state. A container that is still
/// running has no exit code yet, whatever the daemon reports.
fn exit_from_state(state: &ContainerState) -> (Option<i64>, bool) {
    if state.running == Some(true) {
        return (None, false);
    }
    (state.exit_code, state.oom_killed.unwrap_or(false))
}

pub fn container_name(job_id: &Uuid) -> String {
    format!("piston-{}", job_id)
}

/// Container configuration for one job. `host_path` must be absolute.
fn container_config(spec: &LaunchSpec, host_path: &Path) -> Config<String> {
    let labels = HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (JOB_LABEL.to_string(), spec.job_id.to_string()),
    ]);

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.argv.clone()),
        working_dir: Some(WORKDIR.to_string()),
        labels: Some(labels),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        attach_stdin: Some(false),
        open_stdin: Some(false),
        tty: Some(false),
        network_disabled: Some(true), // SECURITY: No network access
        host_config: Some(HostConfig {
            binds: Some(vec![format!("{}:{}", host_path.display(), WORKDIR)]),
            memory: Some(spec.limits.memory_bytes),
            memory_swap: Some(spec.limits.memory_bytes),
            nano_cpus: Some(spec.limits.nano_cpus),
            pids_limit: Some(spec.limits.pids_limit),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            auto_remove: Some(false), // removed by ContainerGuard once output is read
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Docker-based sandbox
#[derive(Clone)]
pub struct DockerEngine {
    pub(crate) docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon (socket or DOCKER_HOST)
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Remove every container this service created that is still around
    pub async fn reap_orphans(&self) -> Result<usize> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        )]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        let mut reaped = 0;
        for container in containers {
            if let Some(id) = container.id {
                remove_container(&self.docker, &id).await;
                reaped += 1;
            }
        }

        if reaped > 0 {
            warn!(count = reaped, "Reaped orphaned sandbox containers");
        }
        Ok(reaped)
    }

    /// Stream logs until the container stops, then read its exit code
    async fn collect_output(&self, container_id: &str, captured: &mut CapturedOutput) -> Option<i64> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    captured.push_stdout(&message);
                }
                Ok(LogOutput::StdErr { message }) => captured.push_stderr(&message),
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports non-zero exits as errors
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id = %container_id, error = %e, "Failed to wait for container");
                None
            }
            None => None,
        }
    }

    /// (exit code, OOM killed) as recorded by the daemon
    async fn inspect_exit(&self, container_id: &str) -> (Option<i64>, bool) {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => exit_from_state(&details.state.unwrap_or_default()),
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to inspect container");
                (None, false)
            }
        }
    }

    async fn kill(&self, container_id: &str) {
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(container_id, Some(options)).await {
            Ok(()) => {}
            // 409: already stopped
            Err(DockerError::DockerResponseServerError { status_code: 409, .. }) => {}
            Err(e) => warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container"),
        }
    }

    #[instrument(skip(self, spec), fields(job_id = %spec.job_id, image = %spec.image))]
    async fn launch(&self, spec: &LaunchSpec) -> LaunchOutcome {
        if let Err(e) = self.ensure_image(&spec.image).await {
            return LaunchOutcome::LaunchFailed {
                reason: format!("Failed to pull image '{}': {}", spec.image, e),
            };
        }

        let host_path = match tokio::fs::canonicalize(&spec.workspace_path).await {
            Ok(path) => path,
            Err(e) => {
                return LaunchOutcome::LaunchFailed {
                    reason: format!("Workspace is not accessible: {}", e),
                };
            }
        };

        let name = container_name(&spec.job_id);
        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let container = match self
            .docker
            .create_container(Some(create_options), container_config(spec, &host_path))
            .await
        {
            Ok(container) => container,
            Err(e) => {
                return LaunchOutcome::LaunchFailed {
                    reason: format!("Failed to create container: {}", e),
                };
            }
        };

        // CRITICAL: armed before anything else can fail
        let guard = ContainerGuard::new(self.docker.clone(), container.id.clone());
        let container_id = container.id.as_str();

        let start_time = Instant::now();
        if let Err(e) = self
            .docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            guard.release().await;
            return LaunchOutcome::LaunchFailed {
                reason: format!("Failed to start container: {}", e),
            };
        }

        let mut captured = CapturedOutput::new(spec.limits.max_output_bytes);
        let waited = tokio::time::timeout(
            spec.limits.timeout,
            self.collect_output(container_id, &mut captured),
        )
        .await;
        let execution_ms = start_time.elapsed().as_millis() as u64;

        let outcome = match waited {
            Ok(exit_code) => {
                let (inspected_code, oom_killed) = self.inspect_exit(container_id).await;
                match exit_code.or(inspected_code) {
                    Some(exit_code) => {
                        let (stdout, mut stderr) = captured.into_strings();
                        if exit_code != 0 {
                            annotate_exit(&mut stderr, exit_code, oom_killed);
                        }
                        info!(exit_code, execution_ms, oom_killed, "Container exited");
                        LaunchOutcome::Completed {
                            exit_code,
                            stdout,
                            stderr,
                        }
                    }
                    None => LaunchOutcome::LaunchFailed {
                        reason: "Failed to obtain container exit status".to_string(),
                    },
                }
            }
            Err(_) => {
                info!(
                    timeout_ms = spec.limits.timeout.as_millis() as u64,
                    execution_ms, "Execution timed out, killing container"
                );
                self.kill(container_id).await;
                let (stdout, stderr) = captured.into_strings();
                LaunchOutcome::TimedOut { stdout, stderr }
            }
        };

        guard.release().await;
        outcome
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(&self, spec: &LaunchSpec) -> LaunchOutcome {
        self.launch(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ResourceLimits;
    use std::path::PathBuf;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            job_id: Uuid::new_v4(),
            image: "python:3.9-alpine".to_string(),
            argv: vec!["python".to_string(), "source.py".to_string()],
            workspace_path: PathBuf::from("/tmp/piston-jobs/x"),
            limits: ResourceLimits::default(),
        }
    }

    #[test]
    fn test_container_config_isolation() {
        let spec = spec();
        let config = container_config(&spec, Path::new("/tmp/piston-jobs/x"));

        assert_eq!(config.cmd, Some(spec.argv.clone()));
        assert_eq!(config.working_dir.as_deref(), Some("/code"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.tty, Some(false));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(JOB_LABEL), Some(&spec.job_id.to_string()));

        let host = config.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["/tmp/piston-jobs/x:/code".to_string()]));
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
    }

    #[test]
    fn test_container_name_is_per_job() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(container_name(&a).starts_with("piston-"));
        assert_ne!(container_name(&a), container_name(&b));
    }

    #[test]
    fn test_output_cap() {
        let mut captured = CapturedOutput::new(8);
        captured.push_stdout(b"hello ");
        captured.push_stdout(b"world");
        captured.push_stderr(b"err");
        let (stdout, stderr) = captured.into_strings();
        assert_eq!(stdout, format!("hello wo{}", TRUNCATION_MARKER));
        assert_eq!(stderr, "err");
    }

    #[test]
    fn test_split_utf8_survives() {
        let mut captured = CapturedOutput::new(1024);
        let bytes = "ü".as_bytes();
        captured.push_stdout(&bytes[..1]);
        captured.push_stdout(&bytes[1..]);
        assert_eq!(captured.into_strings().0, "ü");
    }

    #[test]
    fn test_annotate_exit() {
        let mut stderr = String::new();
        annotate_exit(&mut stderr, 137, false);
        assert!(stderr.contains("memory limit"));

        let mut stderr = String::from("MemoryError");
        annotate_exit(&mut stderr, 1, true);
        assert!(stderr.starts_with("MemoryError"));
        assert!(stderr.contains("memory limit"));

        let mut stderr = String::new();
        annotate_exit(&mut stderr, 139, false);
        assert!(stderr.contains("segmentation fault"));

        let mut stderr = String::new();
        annotate_exit(&mut stderr, 1, false);
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_exit_from_state() {
        let exited = ContainerState {
            running: Some(false),
            exit_code: Some(3),
            oom_killed: Some(true),
            ..Default::default()
        };
        assert_eq!(exit_from_state(&exited), (Some(3), true));

        // Daemon reports 0 for containers that have not exited
        let running = ContainerState {
            running: Some(true),
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(exit_from_state(&running), (None, false));

        assert_eq!(exit_from_state(&ContainerState::default()), (None, false));
    }
}
