//! Composition root for the trellis orchestrator.
//!
//! [`Runtime::start`] wires everything an embedding surface needs, in
//! bootstrap order:
//!
//! 1. resolve the storage home and make sure it exists;
//! 2. write the annotated default `config.yaml` if absent;
//! 3. open the store (pragmas + migrations);
//! 4. resolve the effective, possibly locked, pipeline pair;
//! 5. scan for orphan states and warn -- never abort -- about them.
//!
//! Migration failures abort startup: running against a partially migrated
//! store is unsafe.

use tracing::{info, warn};

use trellis_config::{ConfigError, PipelineFile, StorageHome};
use trellis_core::status::StatusValidator;
use trellis_storage::{SqliteStore, StoreError};

/// Errors that can abort bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Home resolution or config file handling failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Opening, migrating or reading the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A specialized `Result` type for bootstrap.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// The assembled process-wide state: the shared store handle plus the
/// immutable pipeline pair resolved at startup.
#[derive(Debug)]
pub struct Runtime {
    home: StorageHome,
    store: SqliteStore,
    validator: StatusValidator,
}

impl Runtime {
    /// Boots against the home resolved from the environment.
    pub fn start() -> Result<Self> {
        Self::start_with_home(StorageHome::resolve()?)
    }

    /// Boots against an explicit home directory. Test harnesses and
    /// embedders use this to avoid touching the real environment.
    pub fn start_with_home(home: StorageHome) -> Result<Self> {
        home.ensure_exists()?;

        let config_path = home.config_path();
        if PipelineFile::write_default_if_absent(&config_path)? {
            info!(path = %config_path.display(), "wrote default pipeline config");
        }

        if StorageHome::debug_paths_enabled() {
            eprintln!("trellis home:   {}", home.root().display());
            eprintln!("trellis db:     {}", home.db_path().display());
            eprintln!("trellis config: {}", config_path.display());
        }

        let desired = PipelineFile::load(&config_path)?.to_pipeline_set()?;
        let store = SqliteStore::open(home.db_path())?;
        let pipelines = store.resolve_pipelines(&desired)?;
        let validator = StatusValidator::new(pipelines);

        let runtime = Self {
            home,
            store,
            validator,
        };
        runtime.warn_orphan_states();
        Ok(runtime)
    }

    /// Non-fatal scan for rows whose state fell outside the active pipeline.
    fn warn_orphan_states(&self) {
        match self.store.orphan_states(self.validator.pipelines()) {
            Ok(groups) => {
                for group in groups {
                    warn!(
                        container = %group.container,
                        state = %group.state,
                        count = group.count,
                        "rows in a state outside the active pipeline"
                    );
                }
            }
            Err(e) => warn!(error = %e, "orphan-state check failed"),
        }
    }

    /// The resolved storage home.
    pub fn home(&self) -> &StorageHome {
        &self.home
    }

    /// The shared store handle.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// The status validator over the locked pipelines.
    pub fn validator(&self) -> &StatusValidator {
        &self.validator
    }
}

/// Installs a stderr subscriber driven by `RUST_LOG` (default `info`).
/// Call once, before [`Runtime::start`].
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
