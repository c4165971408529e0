/// Job Workspace Manager
///
/// Every job gets its own directory `<scratch_root>/<uuid>` holding exactly
/// one source file. The directory is mounted into the sandbox as its working
/// directory and removed when the job ends.
///
/// `Workspace` is a scoped guard: `destroy()` removes the directory on the
/// normal path, and `Drop` removes it if the guard is dropped early (error
/// return, panic, task cancellation). Removal failures are logged, never
/// returned.

use crate::error::{Error, Result};
use crate::registry::RuntimeProfile;
use chrono::Utc;
use piston_common::types::Job;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mode of the job directory. The sandbox runs without capabilities, so its
/// root user cannot bypass permissions on a directory owned by the service
#[cfg(unix)]
pub const WORKSPACE_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    scratch_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Allocate a job with a fresh random id and its workspace path
    pub fn new_job(&self, language: &str, source_code: &str) -> Job {
        let id = Uuid::new_v4();
        Job {
            id,
            language: language.to_string(),
            source_code: source_code.to_string(),
            workspace_path: self.scratch_root.join(id.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Create the job directory and write the source file into it, verbatim
    pub async fn create(&self, job: &Job, profile: &RuntimeProfile) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| {
                Error::workspace(
                    format!("scratch root {} is unavailable", self.scratch_root.display()),
                    e,
                )
            })?;

        // Non-recursive on purpose: an existing directory is a collision
        tokio::fs::create_dir(&job.workspace_path)
            .await
            .map_err(|e| {
                let message = if e.kind() == ErrorKind::AlreadyExists {
                    format!("workspace for job {} already exists", job.id)
                } else {
                    format!("failed to create workspace {}", job.workspace_path.display())
                };
                Error::workspace(message, e)
            })?;

        // Armed from here on, so a failed write still removes the directory
        let workspace = Workspace {
            path: job.workspace_path.clone(),
            source_file: profile.source_filename(),
            released: false,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &workspace.path,
                std::fs::Permissions::from_mode(WORKSPACE_MODE),
            )
            .await
            .map_err(|e| Error::workspace("failed to open workspace to the sandbox", e))?;
        }

        tokio::fs::write(workspace.source_path(), job.source_code.as_bytes())
            .await
            .map_err(|e| Error::workspace("failed to write source file", e))?;

        debug!(
            job_id = %job.id,
            path = %workspace.path.display(),
            file = %workspace.source_file,
            bytes = job.source_code.len(),
            "Workspace created"
        );

        Ok(workspace)
    }
}

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    source_file: String,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn source_path(&self) -> PathBuf {
        self.path.join(&self.source_file)
    }

    /// Recursively remove the workspace
    pub async fn destroy(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Workspace removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Sync removal: no runtime is guaranteed to be around during unwinding
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Workspace removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace on drop"),
        }
    }
}
