//! The pipeline config lock.
//!
//! A singleton `_pipeline_config` row freezes the pipeline that was active
//! when workflow data first appeared. After that, edits to `config.yaml`
//! are ignored until an explicit override path clears the lock.

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use trellis_core::enums::WorkState;
use trellis_core::pipeline::{Pipeline, PipelineKind, PipelineSet};

use crate::error::{Result, StoreError};
use crate::sqlite::store::{SqliteStore, format_datetime, optional};

/// The persisted JSON shape of the locked pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct LockedPipelines {
    feature: Vec<String>,
    task: Vec<String>,
}

impl LockedPipelines {
    fn from_set(set: &PipelineSet) -> Self {
        Self {
            feature: set.feature.states().iter().map(|s| s.to_string()).collect(),
            task: set.task.states().iter().map(|s| s.to_string()).collect(),
        }
    }

    fn to_set(&self) -> Result<PipelineSet> {
        let feature = Pipeline::new(
            PipelineKind::Feature,
            self.feature.iter().map(|s| WorkState::from(s.as_str())).collect(),
        )
        .map_err(|e| StoreError::validation(format!("locked pipeline is invalid: {e}")))?;
        let task = Pipeline::new(
            PipelineKind::Task,
            self.task.iter().map(|s| WorkState::from(s.as_str())).collect(),
        )
        .map_err(|e| StoreError::validation(format!("locked pipeline is invalid: {e}")))?;
        Ok(PipelineSet { feature, task })
    }
}

/// `true` when any project, feature or task row exists.
pub(crate) fn has_workflow_data_on_conn(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM projects)
              + (SELECT COUNT(*) FROM features)
              + (SELECT COUNT(*) FROM tasks)",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn read_lock_on_conn(conn: &Connection) -> Result<Option<PipelineSet>> {
    let raw: Option<String> = optional(conn.query_row(
        "SELECT config_json FROM _pipeline_config WHERE id = 1",
        [],
        |row| row.get(0),
    ))?;
    match raw {
        Some(raw) => {
            let locked: LockedPipelines = serde_json::from_str(&raw)?;
            Ok(Some(locked.to_set()?))
        }
        None => Ok(None),
    }
}

fn write_lock_on_conn(conn: &Connection, set: &PipelineSet) -> Result<()> {
    let json = serde_json::to_string(&LockedPipelines::from_set(set))?;
    conn.execute(
        "INSERT INTO _pipeline_config (id, config_json, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET config_json = excluded.config_json,
                                       updated_at = excluded.updated_at",
        params![json, format_datetime(&SqliteStore::now())],
    )?;
    Ok(())
}

impl SqliteStore {
    /// Resolves the effective pipelines for this process, applying the lock
    /// semantics:
    ///
    /// 1. no workflow data: the lock row mirrors `desired` and `desired`
    ///    wins;
    /// 2. data + lock row: the lock row wins, `desired` is ignored;
    /// 3. data without a lock row (legacy store): the lock row is seeded
    ///    from `desired`.
    pub fn resolve_pipelines(&self, desired: &PipelineSet) -> Result<PipelineSet> {
        self.with_tx(|conn| {
            let has_data = has_workflow_data_on_conn(conn)?;
            if !has_data {
                write_lock_on_conn(conn, desired)?;
                debug!("no workflow data; pipeline lock mirrors the config file");
                return Ok(desired.clone());
            }
            match read_lock_on_conn(conn)? {
                Some(locked) => {
                    if locked != *desired {
                        info!("pipeline config is locked; ignoring the config file");
                    }
                    Ok(locked)
                }
                None => {
                    write_lock_on_conn(conn, desired)?;
                    info!("legacy store without a pipeline lock; seeding it from the config file");
                    Ok(desired.clone())
                }
            }
        })
    }

    /// Clears the lock row so the next resolve re-reads the file. Test-path
    /// escape hatch; production reconfiguration goes through an explicit
    /// override surface.
    pub fn reset_pipeline_lock(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM _pipeline_config WHERE id = 1", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::entity::NewProject;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn extended_task_set() -> PipelineSet {
        PipelineSet {
            feature: Pipeline::minimal(PipelineKind::Feature),
            task: Pipeline::new(
                PipelineKind::Task,
                vec![
                    WorkState::New,
                    WorkState::Active,
                    WorkState::ToBeTested,
                    WorkState::Closed,
                ],
            )
            .unwrap(),
        }
    }

    #[test]
    fn empty_store_mirrors_the_file() {
        let store = test_store();
        let resolved = store.resolve_pipelines(&extended_task_set()).unwrap();
        assert_eq!(resolved, extended_task_set());

        // A later resolve with a different file still mirrors, because no
        // workflow data exists yet.
        let resolved = store.resolve_pipelines(&PipelineSet::minimal()).unwrap();
        assert_eq!(resolved, PipelineSet::minimal());
    }

    #[test]
    fn lock_wins_once_data_exists() {
        let store = test_store();
        store.resolve_pipelines(&PipelineSet::minimal()).unwrap();

        store
            .create_project(&NewProject {
                name: "P".into(),
                summary: "s".into(),
                ..NewProject::default()
            })
            .unwrap();

        // The "file" now declares a longer task pipeline; the lock ignores it.
        let resolved = store.resolve_pipelines(&extended_task_set()).unwrap();
        assert_eq!(resolved, PipelineSet::minimal());
        assert_eq!(
            resolved.task.states(),
            &[WorkState::New, WorkState::Active, WorkState::Closed]
        );
    }

    #[test]
    fn legacy_data_without_lock_seeds_from_file() {
        let store = test_store();
        // Data created without ever resolving (legacy path).
        store
            .create_project(&NewProject {
                name: "P".into(),
                summary: "s".into(),
                ..NewProject::default()
            })
            .unwrap();

        let resolved = store.resolve_pipelines(&extended_task_set()).unwrap();
        assert_eq!(resolved, extended_task_set());

        // And the seed is now locked in.
        let resolved = store.resolve_pipelines(&PipelineSet::minimal()).unwrap();
        assert_eq!(resolved, extended_task_set());
    }

    #[test]
    fn reset_unlocks() {
        let store = test_store();
        store.resolve_pipelines(&PipelineSet::minimal()).unwrap();
        store
            .create_project(&NewProject {
                name: "P".into(),
                summary: "s".into(),
                ..NewProject::default()
            })
            .unwrap();

        store.reset_pipeline_lock().unwrap();
        let resolved = store.resolve_pipelines(&extended_task_set()).unwrap();
        assert_eq!(resolved, extended_task_set());
    }
}
