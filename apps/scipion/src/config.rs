//! # Configuration
//!
//! Settings of the `scipion` binary, resolved in this order (last wins):
//!
//! 1. Built-in defaults
//! 2. `scipion.toml` (the `--config` path, or the one in the working directory)
//! 3. `SCIPION_PROJECT` / `SCIPION_LOG_FORMAT` environment variables
//! 4. Command line flags
//!
//! ```toml
//! [project]
//! path = "/data/projects/betagal"
//!
//! [log]
//! format = "json"
//! filter = "scipion=debug"
//!
//! [[classes]]
//! name = "ProtImportMovies"
//! kind = "Composite"
//! base = "Protocol"
//! ```

use scipion_core::{ClassKind, ClassRegistry, ScipionError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "scipion.toml";

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "scipion=info,scipion_core=info";

pub const ENV_PROJECT: &str = "SCIPION_PROJECT";
pub const ENV_LOG_FORMAT: &str = "SCIPION_LOG_FORMAT";

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub project: ProjectSection,
    pub log: LogSection,
    /// Classes stored in the project besides the built-in ones.
    pub classes: Vec<ClassEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSection {
    /// Project directory.
    pub path: PathBuf,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
}

impl LogSection {
    #[must_use]
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `json` selects JSON lines, anything else plain text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// A class declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassEntry {
    pub name: String,
    pub kind: ClassKind,
    pub base: Option<String>,
}

// =============================================================================
// LOADING
// =============================================================================

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ScipionError> {
        toml::from_str(text).map_err(|e| ScipionError::SettingsError(format!("config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, ScipionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScipionError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `explicit` (which must exist) or `./scipion.toml` if present,
    /// then apply the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ScipionError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).is_file() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SCIPION_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_PROJECT).filter(|p| !p.is_empty()) {
            self.project.path = PathBuf::from(path);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = LogFormat::parse(&format);
        }
    }

    /// The project directory: `flag` if given, else the configured one.
    #[must_use]
    pub fn project_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map_or_else(|| self.project.path.clone(), Path::to_path_buf)
    }

    /// Built-in classes plus the configured ones.
    #[must_use]
    pub fn registry(&self) -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        for class in &self.classes {
            registry.register(class.name.as_str(), class.kind, class.base.as_deref());
        }
        registry
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::from_toml_str("").expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.project.path, PathBuf::from("."));
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.log.filter(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn full_document() {
        let config = Config::from_toml_str(
            r#"
            [project]
            path = "/data/betagal"

            [log]
            format = "json"
            filter = "scipion=debug"

            [[classes]]
            name = "ProtImportMovies"
            kind = "Composite"
            base = "Protocol"
            "#,
        )
        .expect("parse");

        assert_eq!(config.project.path, PathBuf::from("/data/betagal"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter(), "scipion=debug");
        assert_eq!(config.classes.len(), 1);

        let registry = config.registry();
        assert_eq!(
            registry.kind_of("ProtImportMovies"),
            Some(ClassKind::Composite)
        );
        assert_eq!(registry.base_of("ProtImportMovies"), Some("Protocol"));
        assert!(registry.contains("Integer"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[project]\ndir = \"x\"\n");
        assert!(matches!(err, Err(ScipionError::SettingsError(_))));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_toml_str("[project]\npath = \"from-file\"\n").expect("parse");
        config.apply_overrides(|key| match key {
            ENV_PROJECT => Some("from-env".to_string()),
            ENV_LOG_FORMAT => Some("JSON".to_string()),
            _ => None,
        });
        assert_eq!(config.project.path, PathBuf::from("from-env"));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn empty_project_variable_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == ENV_PROJECT).then(String::new));
        assert_eq!(config.project.path, PathBuf::from("."));
    }

    #[test]
    fn flag_wins_over_config() {
        let config = Config::default();
        assert_eq!(
            config.project_path(Some(Path::new("flagged"))),
            PathBuf::from("flagged")
        );
        assert_eq!(config.project_path(None), PathBuf::from("."));
    }

    #[test]
    fn log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" Json "), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Text);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Config::load(Some(dir.path().join("absent.toml").as_path()));
        assert!(matches!(err, Err(ScipionError::IoError(_))));
    }
}
