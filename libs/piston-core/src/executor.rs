/// Job Executor - Pipeline Orchestration
///
/// **Responsibility:**
/// Take a `(language, code)` submission through the full pipeline:
/// 1. Look up the runtime (unsupported languages are rejected before any resource is allocated)
/// 2. Wait for an admission permit when concurrency is bounded
/// 3. Create the job workspace
/// 4. Run it in the sandbox (engine.rs)
/// 5. Normalize the outcome (normalizer.rs)
/// 6. Destroy the workspace, always
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (the sandbox's job)
/// - How outcomes are reported (the normalizer's job)

use crate::error::Result;
use crate::normalizer;
use crate::registry::{RuntimeProfile, RuntimeRegistry};
use crate::sandbox::{cpus_to_nano, mb_to_bytes, LaunchSpec, ResourceLimits, Sandbox};
use crate::workspace::WorkspaceManager;
use piston_common::config::Settings;
use piston_common::types::{ExecutionResult, Job};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

struct ExecutorInner {
    registry: RuntimeRegistry,
    workspaces: WorkspaceManager,
    sandbox: Arc<dyn Sandbox>,
    limits: ResourceLimits,
    admission: Option<Semaphore>,
}

/// Cheaply cloneable handle to the execution pipeline
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    /// `max_concurrent_jobs == 0` disables admission control
    pub fn new(
        registry: RuntimeRegistry,
        workspaces: WorkspaceManager,
        sandbox: Arc<dyn Sandbox>,
        limits: ResourceLimits,
        max_concurrent_jobs: usize,
    ) -> Self {
        let admission = (max_concurrent_jobs > 0).then(|| Semaphore::new(max_concurrent_jobs));
        Self {
            inner: Arc::new(ExecutorInner {
                registry,
                workspaces,
                sandbox,
                limits,
                admission,
            }),
        }
    }

    /// Build the pipeline from environment settings. Image overrides are read
    /// from the process environment.
    pub fn from_settings(settings: &Settings, sandbox: Arc<dyn Sandbox>) -> Result<Self> {
        let registry = RuntimeRegistry::load_or_builtin(&settings.languages_file)?
            .with_image_overrides(std::env::vars());

        info!(
            languages = ?registry.languages(),
            scratch_root = %settings.scratch_root.display(),
            memory_limit_mb = settings.memory_limit_mb,
            timeout_ms = settings.timeout_ms,
            max_concurrent_jobs = settings.max_concurrent_jobs,
            "Execution pipeline configured"
        );

        Ok(Self::new(
            registry,
            WorkspaceManager::new(&settings.scratch_root),
            sandbox,
            ResourceLimits::from_settings(settings),
            settings.max_concurrent_jobs,
        ))
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.inner.registry
    }

    /// Execute a submission end to end.
    ///
    /// Only `UnsupportedLanguage` and workspace failures are errors; a failed
    /// launch, a timeout or a non-zero exit all come back as `Ok`.
    #[instrument(skip(self, language, code), fields(language = %language, source_size = code.len()))]
    pub async fn execute(&self, language: &str, code: &str) -> Result<ExecutionResult> {
        let inner = &self.inner;
        let profile = inner.registry.lookup(language)?;

        let _permit = match &inner.admission {
            Some(semaphore) => match semaphore.acquire().await {
                Ok(permit) => Some(permit),
                // Never closed; run unbounded rather than fail the job
                Err(_) => None,
            },
            None => None,
        };

        let job = inner.workspaces.new_job(language, code);
        let workspace = inner.workspaces.create(&job, profile).await?;

        let spec = self.launch_spec(&job, profile);
        debug!(
            job_id = %job.id,
            image = %spec.image,
            argv = ?spec.argv,
            sandbox = inner.sandbox.name(),
            "Launching sandbox"
        );

        let outcome = inner.sandbox.run(&spec).await;
        let kind = outcome.kind();
        let result = normalizer::normalize(outcome);

        workspace.destroy().await;

        if kind == "launch_failed" {
            warn!(job_id = %job.id, reason = %result.stderr, "Sandbox launch failed");
        }
        info!(
            job_id = %job.id,
            outcome = kind,
            exit_status = result.exit_status,
            timed_out = result.timed_out,
            elapsed_ms = (chrono::Utc::now() - job.created_at).num_milliseconds(),
            "Job finished"
        );

        Ok(result)
    }

    fn launch_spec(&self, job: &Job, profile: &RuntimeProfile) -> LaunchSpec {
        let mut limits = self.inner.limits.clone();
        if let Some(mb) = profile.memory_limit_mb {
            limits.memory_bytes = mb_to_bytes(mb);
        }
        if let Some(cpus) = profile.cpu_limit {
            limits.nano_cpus = cpus_to_nano(cpus);
        }
        if let Some(pids) = profile.pids_limit {
            limits.pids_limit = pids;
        }

        LaunchSpec {
            job_id: job.id,
            image: profile.image.clone(),
            argv: profile.render_argv(),
            workspace_path: job.workspace_path.clone(),
            limits,
        }
    }
}
