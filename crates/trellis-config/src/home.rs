//! Resolution of the storage home directory.
//!
//! The home holds `config.yaml` and the `tasks.db` store. It is taken from
//! `TASK_ORCHESTRATOR_HOME` when set (absolute, `~/`-prefixed, or relative
//! to the current directory), else defaults to `~/.task-orchestrator`.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Environment variable overriding the storage home.
pub const HOME_ENV: &str = "TASK_ORCHESTRATOR_HOME";

/// When set to `1`, bootstrap prints the resolved paths on standard error.
pub const DEBUG_PATHS_ENV: &str = "TASK_ORCHESTRATOR_DEBUG_PATHS";

/// Directory name used under `$HOME` when no override is set.
const DEFAULT_DIR_NAME: &str = ".task-orchestrator";

/// Database file name inside the home.
const DB_FILE: &str = "tasks.db";

/// Config file name inside the home.
const CONFIG_FILE: &str = "config.yaml";

/// The resolved storage home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHome {
    root: PathBuf,
}

impl StorageHome {
    /// Resolves the home from the environment. See the module docs for the
    /// precedence rules.
    pub fn resolve() -> Result<Self, ConfigError> {
        match std::env::var(HOME_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_override(raw.trim()),
            _ => Self::default_home(),
        }
    }

    /// Uses an explicit directory, bypassing the environment. Test harnesses
    /// and embedders use this.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn from_override(raw: &str) -> Result<Self, ConfigError> {
        let path = PathBuf::from(raw);
        let root = if path.is_absolute() {
            path
        } else if let Some(rest) = raw.strip_prefix("~/") {
            Self::user_home()?.join(rest)
        } else if raw == "~" {
            Self::user_home()?
        } else {
            // Relative to the current working directory.
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };
        Ok(Self { root })
    }

    fn default_home() -> Result<Self, ConfigError> {
        Ok(Self {
            root: Self::user_home()?.join(DEFAULT_DIR_NAME),
        })
    }

    fn user_home() -> Result<PathBuf, ConfigError> {
        dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)
    }

    /// The home directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the SQLite store.
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    /// Path of the pipeline config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Creates the home directory (and parents) if missing.
    pub fn ensure_exists(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.root).map_err(ConfigError::ReadError)
    }

    /// Returns `true` when `TASK_ORCHESTRATOR_DEBUG_PATHS=1`.
    pub fn debug_paths_enabled() -> bool {
        std::env::var(DEBUG_PATHS_ENV).is_ok_and(|v| v == "1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_home_paths() {
        let home = StorageHome::at("/tmp/orchestrator-test");
        assert_eq!(home.db_path(), PathBuf::from("/tmp/orchestrator-test/tasks.db"));
        assert_eq!(
            home.config_path(),
            PathBuf::from("/tmp/orchestrator-test/config.yaml")
        );
    }

    #[test]
    fn ensure_exists_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let home = StorageHome::at(dir.path().join("nested").join("home"));
        home.ensure_exists().unwrap();
        assert!(home.root().is_dir());
        // Idempotent.
        home.ensure_exists().unwrap();
    }

    #[test]
    fn tilde_prefix_expands_to_user_home() {
        let resolved = StorageHome::from_override("~/my-orchestrator").unwrap();
        let expected = dirs::home_dir().unwrap().join("my-orchestrator");
        assert_eq!(resolved.root(), expected.as_path());
    }

    #[test]
    fn absolute_override_used_verbatim() {
        let resolved = StorageHome::from_override("/var/lib/orchestrator").unwrap();
        assert_eq!(resolved.root(), Path::new("/var/lib/orchestrator"));
    }

    #[test]
    fn relative_override_is_cwd_relative() {
        let resolved = StorageHome::from_override("relative/home").unwrap();
        let expected = std::env::current_dir().unwrap().join("relative/home");
        assert_eq!(resolved.root(), expected.as_path());
    }
}
