// CLI commands for running code and managing sandbox resources
use anyhow::{Context, Result};
use piston_common::config::Settings;
use piston_common::types::ExecuteResponse;
use piston_core::{DockerEngine, Executor, RuntimeRegistry};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn load_settings() -> Result<Settings> {
    Settings::from_env().context("Invalid configuration")
}

fn load_registry(settings: &Settings) -> Result<RuntimeRegistry> {
    let registry = RuntimeRegistry::load_or_builtin(&settings.languages_file)
        .context("Failed to load runtime configuration")?
        .with_image_overrides(std::env::vars());
    Ok(registry)
}

/// Run a file and print the response JSON. Returns the process exit code.
pub async fn run_file(language: &str, path: &Path, timeout_ms: Option<u64>) -> Result<i32> {
    let mut settings = load_settings()?;
    if let Some(timeout_ms) = timeout_ms {
        settings.timeout_ms = timeout_ms.max(1);
    }

    let code = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let engine = DockerEngine::connect().context("Failed to create Docker client")?;
    let executor = Executor::from_settings(&settings, Arc::new(engine))
        .context("Failed to load runtime configuration")?;

    let result = executor.execute(language, &code).await?;
    let exit_code = i32::from(result.exit_status);

    let response = ExecuteResponse::new(language, result);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(exit_code)
}

/// Print configured languages
pub fn list_languages() -> Result<()> {
    let settings = load_settings()?;
    let registry = load_registry(&settings)?;

    for runtime in registry.runtimes() {
        println!("{:<12} {:<8} {}", runtime.language, runtime.version, runtime.image);
    }

    Ok(())
}

/// Pull every configured image so first runs do not pay for it
pub async fn pull_images() -> Result<()> {
    let settings = load_settings()?;
    let registry = load_registry(&settings)?;
    let engine = DockerEngine::connect().context("Failed to create Docker client")?;

    for runtime in registry.runtimes() {
        println!("→ {} ({})", runtime.language, runtime.image);
        engine
            .ensure_image(&runtime.image)
            .await
            .with_context(|| format!("Failed to pull {}", runtime.image))?;
    }

    println!("✅ All images available");
    Ok(())
}

/// Remove orphaned sandbox containers
pub async fn reap() -> Result<()> {
    let engine = DockerEngine::connect().context("Failed to create Docker client")?;
    engine.ping().await.context("Docker is not reachable")?;

    let reaped = engine.reap_orphans().await?;
    println!("Removed {} orphaned container(s)", reaped);

    Ok(())
}
