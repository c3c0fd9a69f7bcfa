//! The pipeline configuration file.
//!
//! `config.yaml` lives in the storage home and declares the feature and task
//! pipelines. The file is only authoritative until workflow data exists;
//! after that the locked copy inside the store wins (see the storage crate).

use std::path::Path;

use serde::{Deserialize, Serialize};

use trellis_core::enums::WorkState;
use trellis_core::pipeline::{Pipeline, PipelineError, PipelineKind, PipelineSet};

/// Accepted values of the `version` field.
const SUPPORTED_VERSIONS: &[&str] = &["3.0", "3"];

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The `version` field is not a supported value.
    #[error("unsupported config version {0:?} (expected \"3.0\")")]
    UnsupportedVersion(String),

    /// A declared pipeline failed catalog validation.
    #[error(transparent)]
    InvalidPipeline(#[from] PipelineError),

    /// No home directory could be determined for `~` expansion.
    #[error("cannot determine the user home directory")]
    NoHomeDirectory,
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// The `pipelines` section of the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Pipelines {
    pub feature: Vec<String>,
    pub task: Vec<String>,
}

/// The full shape of `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    pub version: String,
    pub pipelines: Pipelines,
}

impl Default for PipelineFile {
    fn default() -> Self {
        Self {
            version: "3.0".to_owned(),
            pipelines: Pipelines {
                feature: minimal_states(),
                task: minimal_states(),
            },
        }
    }
}

fn minimal_states() -> Vec<String> {
    vec!["NEW".to_owned(), "ACTIVE".to_owned(), "CLOSED".to_owned()]
}

impl PipelineFile {
    /// Loads and fully validates the file: YAML shape, version, and both
    /// pipelines against the catalogs.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parses and validates config text. Split out for tests.
    pub fn parse(raw: &str) -> Result<Self> {
        let file: PipelineFile = serde_yaml::from_str(raw)?;
        file.validate()?;
        Ok(file)
    }

    /// Validates the version field and both pipelines.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(ConfigError::UnsupportedVersion(self.version.clone()));
        }
        self.to_pipeline_set()?;
        Ok(())
    }

    /// Builds the validated pipeline pair declared by this file.
    pub fn to_pipeline_set(&self) -> Result<PipelineSet> {
        let feature = Pipeline::new(
            PipelineKind::Feature,
            self.pipelines.feature.iter().map(|s| WorkState::from(s.as_str())).collect(),
        )?;
        let task = Pipeline::new(
            PipelineKind::Task,
            self.pipelines.task.iter().map(|s| WorkState::from(s.as_str())).collect(),
        )?;
        Ok(PipelineSet { feature, task })
    }

    /// Writes the annotated default file if `path` does not exist yet.
    /// Returns `true` when a file was written.
    pub fn write_default_if_absent(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, DEFAULT_CONFIG_YAML)?;
        Ok(true)
    }
}

/// The annotated default written on first bootstrap. Kept as literal text so
/// the comments survive (serde_yaml would strip them).
pub const DEFAULT_CONFIG_YAML: &str = r#"# Trellis pipeline configuration.
#
# Each pipeline is an ordered subset of the built-in state catalog:
#   feature: NEW, ACTIVE, READY_TO_PROD, CLOSED
#   task:    NEW, ACTIVE, TO_BE_TESTED, READY_TO_PROD, CLOSED
#
# Rules: a pipeline must start with NEW, contain ACTIVE, end with CLOSED,
# and keep the catalog order. WILL_NOT_IMPLEMENT is always reachable as an
# exit state and must not be listed.
#
# NOTE: once any project, feature or task exists, the pipeline shape is
# locked inside the database and edits to this file are ignored.
version: "3.0"
pipelines:
  feature:
    - NEW
    - ACTIVE
    - CLOSED
  task:
    - NEW
    - ACTIVE
    - CLOSED
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_file_text_parses_to_default() {
        let parsed = PipelineFile::parse(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(parsed, PipelineFile::default());
    }

    #[test]
    fn default_is_valid() {
        PipelineFile::default().validate().unwrap();
    }

    #[test]
    fn version_3_shorthand_accepted() {
        let raw = "version: \"3\"\npipelines:\n  feature: [NEW, ACTIVE, CLOSED]\n  task: [NEW, ACTIVE, CLOSED]\n";
        PipelineFile::parse(raw).unwrap();
    }

    #[test]
    fn unsupported_version_rejected() {
        let raw = "version: \"2.0\"\npipelines:\n  feature: [NEW, ACTIVE, CLOSED]\n  task: [NEW, ACTIVE, CLOSED]\n";
        let err = PipelineFile::parse(raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn missing_active_rejected_with_message() {
        let raw = "version: \"3.0\"\npipelines:\n  feature: [NEW, ACTIVE, CLOSED]\n  task: [NEW, CLOSED]\n";
        let err = PipelineFile::parse(raw).unwrap_err();
        assert!(err.to_string().contains("ACTIVE"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let raw = "version: \"3.0\"\nextra: true\npipelines:\n  feature: [NEW, ACTIVE, CLOSED]\n  task: [NEW, ACTIVE, CLOSED]\n";
        assert!(matches!(
            PipelineFile::parse(raw).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }

    #[test]
    fn extended_task_pipeline_accepted() {
        let raw = "version: \"3.0\"\npipelines:\n  feature: [NEW, ACTIVE, CLOSED]\n  task: [NEW, ACTIVE, TO_BE_TESTED, READY_TO_PROD, CLOSED]\n";
        let set = PipelineFile::parse(raw).unwrap().to_pipeline_set().unwrap();
        assert_eq!(set.task.states().len(), 5);
        assert_eq!(set.feature.states().len(), 3);
    }

    #[test]
    fn write_default_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        assert!(PipelineFile::write_default_if_absent(&path).unwrap());
        assert!(!PipelineFile::write_default_if_absent(&path).unwrap());
        PipelineFile::load(&path).unwrap();
    }
}
