//! Job execution pipeline: runtime lookup, per-job workspace, sandboxed
//! launch with resource limits, outcome normalization and guaranteed cleanup.

pub mod engine;
pub mod error;
pub mod executor;
pub mod normalizer;
pub mod registry;
pub mod sandbox;
pub mod workspace;


pub use engine::DockerEngine;
pub use error::{Error, Result};
pub use executor::Executor;
pub use registry::{RuntimeProfile, RuntimeRegistry};
pub use sandbox::{LaunchOutcome, LaunchSpec, ResourceLimits, Sandbox};
pub use workspace::{Workspace, WorkspaceManager};
