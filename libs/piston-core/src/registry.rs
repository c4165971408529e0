// Runtime registry: language id -> execution profile
use crate::error::{Error, Result};
use piston_common::types::RuntimeInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Placeholder in an invocation template replaced by the job's source filename
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Prefix of the environment variables that override a language's image
pub const IMAGE_OVERRIDE_PREFIX: &str = "PISTON_IMAGE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeExecution {
    pub command: String,
    pub args: Vec<String>,
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub image: String,
    pub execution: RuntimeExecution,
    /// Overrides the global memory ceiling for this language
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
    #[serde(default)]
    pub cpu_limit: Option<f32>,
    /// Process/thread ceiling for toolchains that spawn many workers
    #[serde(default)]
    pub pids_limit: Option<i64>,
}

fn default_version() -> String {
    "latest".to_string()
}

impl RuntimeProfile {
    fn new(name: &str, version: &str, image: &str, command: &str, args: &[&str], ext: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            image: image.to_string(),
            execution: RuntimeExecution {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                file_extension: ext.to_string(),
            },
            memory_limit_mb: None,
            cpu_limit: None,
            pids_limit: None,
        }
    }

    fn with_limits(mut self, memory_limit_mb: u32, pids_limit: i64) -> Self {
        self.memory_limit_mb = Some(memory_limit_mb);
        self.pids_limit = Some(pids_limit);
        self
    }

    /// Name of the single source file written into the job workspace
    pub fn source_filename(&self) -> String {
        format!("source.{}", self.execution.file_extension)
    }

    /// Build the argv run inside the sandbox. Only the fixed source filename
    /// is substituted; nothing from the submission reaches the command line.
    pub fn render_argv(&self) -> Vec<String> {
        let filename = self.source_filename();
        std::iter::once(&self.execution.command)
            .chain(self.execution.args.iter())
            .map(|part| part.replace(FILE_PLACEHOLDER, &filename))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("runtime with empty name".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(Error::Config(format!("runtime '{}' has no image", self.name)));
        }
        if self.execution.command.trim().is_empty() {
            return Err(Error::Config(format!("runtime '{}' has no command", self.name)));
        }
        if matches!(self.pids_limit, Some(n) if n <= 0) {
            return Err(Error::Config(format!(
                "runtime '{}' has a non-positive pids_limit",
                self.name
            )));
        }
        let ext = &self.execution.file_extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!(
                "runtime '{}' has invalid file extension '{}'",
                self.name, ext
            )));
        }
        let references_file = std::iter::once(&self.execution.command)
            .chain(self.execution.args.iter())
            .any(|part| part.contains(FILE_PLACEHOLDER));
        if !references_file {
            return Err(Error::Config(format!(
                "runtime '{}' invocation never references {}",
                self.name, FILE_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<RuntimeProfile>,
}

/// Immutable table of supported runtimes, built once at startup
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    profiles: HashMap<String, RuntimeProfile>,
}

impl RuntimeRegistry {
    /// Build a registry from a list of profiles, validating each one
    pub fn from_profiles(profiles: Vec<RuntimeProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::Config("no runtimes configured".to_string()));
        }

        let mut map = HashMap::new();
        for profile in profiles {
            profile.validate()?;
            if map.contains_key(&profile.name) {
                return Err(Error::Config(format!("duplicate runtime '{}'", profile.name)));
            }
            map.insert(profile.name.clone(), profile);
        }

        Ok(Self { profiles: map })
    }

    /// The runtimes shipped with the service
    pub fn builtin() -> Self {
        let profiles = vec![
            RuntimeProfile::new("python", "3.9", "python:3.9-alpine", "python", &["{file}"], "py"),
            RuntimeProfile::new("javascript", "18", "node:18-alpine", "node", &["{file}"], "js"),
            RuntimeProfile::new("go", "1.19", "golang:1.19-alpine", "go", &["run", "{file}"], "go")
                .with_limits(256, 512),
            RuntimeProfile::new(
                "c",
                "latest",
                "gcc:latest",
                "sh",
                &["-c", "gcc {file} -o /tmp/app && /tmp/app"],
                "c",
            ),
        ];

        let profiles = profiles.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self { profiles }
    }

    /// Load runtime definitions from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", config_path.display(), e))
        })?;

        let languages_json: LanguagesJson = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", config_path.display(), e))
        })?;

        Self::from_profiles(languages_json.languages)
    }

    /// Load from `config_path` when it exists, otherwise use the built-in table
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            info!(path = %config_path.display(), "Loading runtimes from file");
            Self::load(config_path)
        } else {
            info!(path = %config_path.display(), "Runtime file not found, using built-in runtimes");
            Ok(Self::builtin())
        }
    }

    /// Apply `PISTON_IMAGE_<LANGUAGE>` image overrides from an environment listing
    pub fn with_image_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(IMAGE_OVERRIDE_PREFIX) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            let target = self
                .profiles
                .values_mut()
                .find(|p| p.name.to_uppercase() == suffix);
            if let Some(profile) = target {
                debug!(language = %profile.name, image = %value, "Image override applied");
                profile.image = value;
            }
        }
        self
    }

    /// Look up a runtime by exact, case-sensitive id
    pub fn lookup(&self, language: &str) -> Result<&RuntimeProfile> {
        self.profiles
            .get(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))
    }

    /// List all supported languages, sorted
    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Listing for the runtimes endpoint
    pub fn runtimes(&self) -> Vec<RuntimeInfo> {
        self.languages()
            .into_iter()
            .filter_map(|name| self.profiles.get(&name))
            .map(|p| RuntimeInfo {
                language: p.name.clone(),
                version: p.version.clone(),
                image: p.image.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_profiles_are_valid() {
        let registry = RuntimeRegistry::builtin();
        assert_eq!(registry.languages(), vec!["c", "go", "javascript", "python"]);
        for name in registry.languages() {
            let profile = registry.lookup(&name).unwrap();
            profile.validate().unwrap();
            assert!(profile
                .render_argv()
                .iter()
                .any(|arg| arg.contains(&profile.source_filename())));
        }
    }

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        let registry = RuntimeRegistry::builtin();
        assert!(registry.lookup("python").is_ok());
        assert!(matches!(
            registry.lookup("Python"),
            Err(Error::UnsupportedLanguage(ref l)) if l == "Python"
        ));
        assert!(registry.lookup("pyth").is_err());
        assert!(registry.lookup("ruby").is_err());
        assert!(registry.lookup("").is_err());
    }

    #[test]
    fn test_render_argv() {
        let registry = RuntimeRegistry::builtin();
        assert_eq!(registry.lookup("python").unwrap().render_argv(), vec!["python", "source.py"]);
        assert_eq!(
            registry.lookup("go").unwrap().render_argv(),
            vec!["go", "run", "source.go"]
        );
        assert_eq!(
            registry.lookup("c").unwrap().render_argv(),
            vec!["sh", "-c", "gcc source.c -o /tmp/app && /tmp/app"]
        );
    }

    #[test]
    fn test_rejects_template_without_file() {
        let mut profile = RuntimeRegistry::builtin().lookup("python").unwrap().clone();
        profile.execution.args = vec!["-c".to_string(), "print(1)".to_string()];
        assert!(matches!(
            RuntimeRegistry::from_profiles(vec![profile]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_extension_and_duplicates() {
        let python = RuntimeRegistry::builtin().lookup("python").unwrap().clone();

        let mut bad_ext = python.clone();
        bad_ext.execution.file_extension = "py/../x".to_string();
        assert!(RuntimeRegistry::from_profiles(vec![bad_ext]).is_err());

        assert!(RuntimeRegistry::from_profiles(vec![python.clone(), python]).is_err());
        assert!(RuntimeRegistry::from_profiles(vec![]).is_err());
    }

    #[test]
    fn test_go_gets_room_for_toolchain_workers() {
        let registry = RuntimeRegistry::builtin();
        let go = registry.lookup("go").unwrap();
        assert_eq!(go.pids_limit, Some(512));
        assert_eq!(go.memory_limit_mb, Some(256));
        assert_eq!(registry.lookup("python").unwrap().pids_limit, None);

        let mut bad = go.clone();
        bad.pids_limit = Some(0);
        assert!(matches!(
            RuntimeRegistry::from_profiles(vec![bad]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_image_overrides() {
        let registry = RuntimeRegistry::builtin().with_image_overrides(vec![
            ("PISTON_IMAGE_PYTHON".to_string(), "python:3.12-slim".to_string()),
            ("PISTON_IMAGE_RUBY".to_string(), "ruby:3".to_string()),
            ("PISTON_IMAGE_GO".to_string(), "".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        assert_eq!(registry.lookup("python").unwrap().image, "python:3.12-slim");
        assert_eq!(registry.lookup("go").unwrap().image, "golang:1.19-alpine");
        assert!(registry.lookup("ruby").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "languages": [
                    {{
                        "name": "python",
                        "version": "3.11",
                        "image": "python:3.11-alpine",
                        "execution": {{ "command": "python", "args": ["-u", "{{file}}"], "file_extension": "py" }},
                        "memory_limit_mb": 256,
                        "pids_limit": 128
                    }},
                    {{
                        "name": "ruby",
                        "image": "ruby:3-alpine",
                        "execution": {{ "command": "ruby", "args": ["{{file}}"], "file_extension": "rb" }}
                    }}
                ]
            }}"#
        )
        .unwrap();

        let registry = RuntimeRegistry::load(file.path()).unwrap();
        assert_eq!(registry.languages(), vec!["python", "ruby"]);
        let python = registry.lookup("python").unwrap();
        assert_eq!(python.memory_limit_mb, Some(256));
        assert_eq!(python.pids_limit, Some(128));
        assert_eq!(python.render_argv(), vec!["python", "-u", "source.py"]);
        assert_eq!(registry.lookup("ruby").unwrap().version, "latest");
    }

    #[test]
    fn test_load_or_builtin_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RuntimeRegistry::load_or_builtin(&dir.path().join("missing.json")).unwrap();
        assert!(registry.lookup("javascript").is_ok());
    }
}
