// Application configuration, read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SCRATCH_ROOT: &str = "/tmp/piston-jobs";
pub const DEFAULT_LANGUAGES_FILE: &str = "config/languages.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub scratch_root: PathBuf,
    pub languages_file: PathBuf,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    /// 0 disables admission control
    pub max_concurrent_jobs: usize,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_ROOT),
            languages_file: PathBuf::from(DEFAULT_LANGUAGES_FILE),
            memory_limit_mb: 128,
            cpu_limit: 1.0,
            pids_limit: 64,
            timeout_ms: 5000,
            max_output_bytes: 64 * 1024,
            max_concurrent_jobs: 32,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let settings = Self {
            bind_addr: lookup("PISTON_BIND_ADDR").unwrap_or(defaults.bind_addr),
            scratch_root: lookup("PISTON_SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            languages_file: lookup("PISTON_LANGUAGES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.languages_file),
            memory_limit_mb: parse(&lookup, "PISTON_MEMORY_LIMIT_MB", defaults.memory_limit_mb)?,
            cpu_limit: parse(&lookup, "PISTON_CPU_LIMIT", defaults.cpu_limit)?,
            pids_limit: parse(&lookup, "PISTON_PIDS_LIMIT", defaults.pids_limit)?,
            timeout_ms: parse(&lookup, "PISTON_TIMEOUT_MS", defaults.timeout_ms)?,
            max_output_bytes: parse(&lookup, "PISTON_MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            max_concurrent_jobs: parse(
                &lookup,
                "PISTON_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?,
            max_body_bytes: parse(&lookup, "PISTON_MAX_BODY_BYTES", defaults.max_body_bytes)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_limit_mb == 0 {
            return Err(invalid("PISTON_MEMORY_LIMIT_MB", "0", "must be positive"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("PISTON_TIMEOUT_MS", "0", "must be positive"));
        }
        if !(self.cpu_limit > 0.0) {
            return Err(invalid(
                "PISTON_CPU_LIMIT",
                &self.cpu_limit.to_string(),
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.memory_limit_mb, 128);
        assert_eq!(settings.timeout_ms, 5000);
        assert_eq!(settings.scratch_root, PathBuf::from("/tmp/piston-jobs"));
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("PISTON_MEMORY_LIMIT_MB", "256"),
            ("PISTON_TIMEOUT_MS", " 1500 "),
            ("PISTON_SCRATCH_ROOT", "/var/lib/piston"),
            ("PISTON_MAX_CONCURRENT_JOBS", "0"),
        ]))
        .unwrap();
        assert_eq!(settings.memory_limit_mb, 256);
        assert_eq!(settings.timeout_ms, 1500);
        assert_eq!(settings.scratch_root, PathBuf::from("/var/lib/piston"));
        assert_eq!(settings.max_concurrent_jobs, 0);
    }

    #[test]
    fn test_rejects_garbage_and_zero() {
        let err = Settings::from_lookup(lookup_from(&[("PISTON_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("PISTON_TIMEOUT_MS"));

        assert!(Settings::from_lookup(lookup_from(&[("PISTON_MEMORY_LIMIT_MB", "0")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("PISTON_CPU_LIMIT", "0")])).is_err());
    }
}
