//! Startup health scans.

use rusqlite::params;

use trellis_core::enums::{ContainerType, WorkState};
use trellis_core::pipeline::PipelineSet;

use crate::error::Result;
use crate::sqlite::store::SqliteStore;

/// One group of rows stuck in a state outside the active pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanStateGroup {
    pub container: ContainerType,
    pub state: String,
    pub count: i64,
}

impl SqliteStore {
    /// Lists states present in the feature/task tables that are neither in
    /// the active pipeline nor `WILL_NOT_IMPLEMENT`, with row counts.
    ///
    /// Read-only; bootstrap turns each group into a warning and keeps going.
    pub fn orphan_states(&self, pipelines: &PipelineSet) -> Result<Vec<OrphanStateGroup>> {
        let conn = self.lock_conn()?;
        let mut groups = Vec::new();

        let scans: [(ContainerType, &str, &trellis_core::pipeline::Pipeline); 2] = [
            (ContainerType::Feature, "features", &pipelines.feature),
            (ContainerType::Task, "tasks", &pipelines.task),
        ];
        for (container, table, pipeline) in scans {
            let mut stmt = conn.prepare(&format!(
                "SELECT status, COUNT(*) FROM {table} GROUP BY status ORDER BY status"
            ))?;
            let rows = stmt.query_map(params![], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (state, count) = row?;
                let work_state = WorkState::from(state.as_str());
                if !pipeline.is_valid_state(&work_state) {
                    groups.push(OrphanStateGroup {
                        container,
                        state,
                        count,
                    });
                }
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::entity::{NewFeature, NewProject, NewTask};
    use trellis_core::pipeline::{Pipeline, PipelineKind};
    use trellis_core::status::StatusValidator;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn clean_store_has_no_orphans() {
        let store = test_store();
        assert!(store.orphan_states(&PipelineSet::minimal()).unwrap().is_empty());
    }

    #[test]
    fn states_outside_the_pipeline_are_reported() {
        let store = test_store();
        let validator = StatusValidator::new(PipelineSet {
            feature: Pipeline::minimal(PipelineKind::Feature),
            task: Pipeline::new(
                PipelineKind::Task,
                vec![
                    trellis_core::enums::WorkState::New,
                    trellis_core::enums::WorkState::Active,
                    trellis_core::enums::WorkState::ToBeTested,
                    trellis_core::enums::WorkState::Closed,
                ],
            )
            .unwrap(),
        });

        let project = store
            .create_project(&NewProject {
                name: "P".into(),
                summary: "s".into(),
                ..NewProject::default()
            })
            .unwrap();
        let feature = store
            .create_feature(&NewFeature {
                project_id: Some(project.id),
                name: "F".into(),
                summary: "s".into(),
                ..NewFeature::default()
            })
            .unwrap();
        let task = store
            .create_task(&NewTask {
                feature_id: feature.id,
                title: "T".into(),
                summary: "s".into(),
                ..NewTask::default()
            })
            .unwrap();

        // Walk the task into TO_BE_TESTED under the wide pipeline.
        store
            .advance(trellis_core::enums::ContainerType::Task, &task.id, 1, &validator)
            .unwrap();
        store
            .advance(trellis_core::enums::ContainerType::Task, &task.id, 2, &validator)
            .unwrap();

        // Under the minimal pipeline that state is orphaned.
        let groups = store.orphan_states(&PipelineSet::minimal()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].container, ContainerType::Task);
        assert_eq!(groups[0].state, "TO_BE_TESTED");
        assert_eq!(groups[0].count, 1);

        // Under the wide pipeline nothing is orphaned.
        let groups = store.orphan_states(validator.pipelines()).unwrap();
        assert!(groups.is_empty());
    }
}
