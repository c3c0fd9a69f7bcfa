//! Task CRUD for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use trellis_core::entity::{NewTask, Task, TaskUpdate, build_search_vector};
use trellis_core::enums::{ContainerType, EntityType};
use trellis_core::filter::{SearchFilter, TagMatch};
use trellis_core::idgen::new_entity_id;
use trellis_core::status::StatusValidator;
use trellis_core::validation::{require_field, validate_complexity};

use crate::error::{Result, StoreError};
use crate::sqlite::features::get_feature_on_conn;
use crate::sqlite::refs;
use crate::sqlite::search::{QueryBuilder, pagination_sql};
use crate::sqlite::sections;
use crate::sqlite::store::{
    SqliteStore, format_datetime, json_vec, optional, parse_datetime, to_json,
};
use crate::sqlite::tags;

/// All task columns in a deterministic order for SELECT queries.
pub(crate) const TASK_COLUMNS: &str = "id, feature_id, project_id, title, summary, description, \
     status, priority, complexity, blocked_by, blocked_reason, related_to, version, \
     created_at, modified_at";

/// Deserialises a row into a [`Task`]. Tags are loaded separately.
///
/// The column order MUST match [`TASK_COLUMNS`].
pub(crate) fn scan_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        feature_id: row.get("feature_id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        status: row.get::<_, String>("status")?.into(),
        priority: row.get::<_, String>("priority")?.into(),
        complexity: row.get("complexity")?,
        blocked_by: json_vec(&row.get::<_, String>("blocked_by")?),
        blocked_reason: row.get("blocked_reason")?,
        related_to: json_vec(&row.get::<_, String>("related_to")?),
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
        tags: Vec::new(),
    })
}

/// Fetches one task with its tags.
pub(crate) fn get_task_on_conn(conn: &Connection, id: &str) -> Result<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let task = optional(conn.query_row(&sql, params![id], scan_task))?
        .ok_or_else(|| StoreError::not_found("task", id))?;
    with_tags(conn, task)
}

fn with_tags(conn: &Connection, mut task: Task) -> Result<Task> {
    task.tags = tags::get_tags_on_conn(conn, &EntityType::Task, &task.id)?;
    Ok(task)
}

/// Removes a task and everything it owns: sections, tags, references to it,
/// then the row itself.
pub(crate) fn delete_task_cascade_on_conn(conn: &Connection, id: &str) -> Result<()> {
    sections::delete_sections_for_entity_on_conn(conn, &EntityType::Task, id)?;
    tags::delete_tags_on_conn(conn, &EntityType::Task, id)?;
    refs::scrub_references_on_conn(conn, id, &SqliteStore::now())?;
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    Ok(())
}

impl SqliteStore {
    /// Creates a task under a feature. The project link is derived from the
    /// feature, never caller-supplied.
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let title = require_field("title", &new.title)?;
        let summary = require_field("summary", &new.summary)?;
        validate_complexity(new.complexity)?;
        let description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);

        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());
        let search_vector = build_search_vector(&title, &summary, description.as_deref());

        self.with_tx(|conn| {
            let feature = get_feature_on_conn(conn, &new.feature_id)?;

            conn.execute(
                "INSERT INTO tasks (id, feature_id, project_id, title, summary, description,
                                    status, priority, complexity, blocked_by, related_to,
                                    search_vector, version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'NEW', ?7, ?8, '[]', '[]', ?9, 1, ?10, ?10)",
                params![
                    id,
                    feature.id,
                    feature.project_id,
                    title,
                    summary,
                    description,
                    new.priority.as_str(),
                    new.complexity,
                    search_vector,
                    now_str
                ],
            )?;
            tags::set_tags_on_conn(conn, &EntityType::Task, &id, &new.tags)?;
            get_task_on_conn(conn, &id)
        })
    }

    /// Fetches a task by id.
    pub fn get_task(&self, id: &str) -> Result<Task> {
        let conn = self.lock_conn()?;
        get_task_on_conn(&conn, id)
    }

    /// Applies a partial update under the caller's expected version. Status
    /// changes must be legal transitions under the active pipeline.
    pub fn update_task(
        &self,
        id: &str,
        update: &TaskUpdate,
        validator: &StatusValidator,
    ) -> Result<Task> {
        if let Some(complexity) = update.complexity {
            validate_complexity(complexity)?;
        }
        self.with_tx(|conn| {
            let current = get_task_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "task {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let status = match &update.status {
                Some(next) if *next != current.status => {
                    if !validator.is_valid_transition(ContainerType::Task, &current.status, next) {
                        return Err(StoreError::validation(format!(
                            "illegal task status transition {} -> {}",
                            current.status, next
                        )));
                    }
                    next.clone()
                }
                _ => current.status.clone(),
            };

            let title = match &update.title {
                Some(t) => require_field("title", t)?,
                None => current.title.clone(),
            };
            let summary = match &update.summary {
                Some(s) => require_field("summary", s)?,
                None => current.summary.clone(),
            };
            let description = match &update.description {
                Some(d) => d
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_owned),
                None => current.description.clone(),
            };
            let priority = update.priority.clone().unwrap_or(current.priority.clone());
            let complexity = update.complexity.unwrap_or(current.complexity);
            let related_to = match &update.related_to {
                Some(r) => r.clone(),
                None => current.related_to.clone(),
            };
            let search_vector = build_search_vector(&title, &summary, description.as_deref());

            let affected = conn.execute(
                "UPDATE tasks SET title = ?1, summary = ?2, description = ?3, status = ?4,
                        priority = ?5, complexity = ?6, related_to = ?7, search_vector = ?8,
                        version = version + 1, modified_at = ?9
                 WHERE id = ?10 AND version = ?11",
                params![
                    title,
                    summary,
                    description,
                    status.as_str(),
                    priority.as_str(),
                    complexity,
                    to_json(&related_to)?,
                    search_vector,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "task {id} was modified concurrently"
                )));
            }

            if let Some(new_tags) = &update.tags {
                tags::set_tags_on_conn(conn, &EntityType::Task, id, new_tags)?;
            }
            get_task_on_conn(conn, id)
        })
    }

    /// Deletes a task. Tasks own no children, so there is no cascade flag;
    /// sections, tags and references always go with the row.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.with_tx(|conn| {
            get_task_on_conn(conn, id)?;
            delete_task_cascade_on_conn(conn, id)
        })
    }

    /// Search over tasks, newest first.
    ///
    /// The tag filter requires ANY listed tag (unlike projects).
    pub fn search_tasks(&self, filter: &SearchFilter) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut qb = QueryBuilder::new();
        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            qb.query_substring("search_vector", query);
        }
        if let Some(status) = &filter.status {
            qb.value_filter("status", status);
        }
        if let Some(priority) = &filter.priority {
            qb.value_filter("priority", priority);
        }
        if let Some(project_id) = &filter.project_id {
            qb.equals("project_id", project_id.clone());
        }
        if let Some(feature_id) = &filter.feature_id {
            qb.equals("feature_id", feature_id.clone());
        }
        qb.tags(EntityType::Task, "tasks.id", &filter.tags, TagMatch::Any);

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks{} ORDER BY created_at DESC{}",
            qb.where_sql(),
            pagination_sql(filter.limit, filter.offset)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(qb.params().as_slice(), scan_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(with_tags(&conn, row?)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::entity::{NewFeature, NewProject};
    use trellis_core::enums::WorkState;
    use trellis_core::pipeline::PipelineSet;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn validator() -> StatusValidator {
        StatusValidator::new(PipelineSet::minimal())
    }

    fn seed_feature(store: &SqliteStore) -> (String, String) {
        let project = store
            .create_project(&NewProject {
                name: "Host".into(),
                summary: "board".into(),
                ..NewProject::default()
            })
            .unwrap();
        let feature = store
            .create_feature(&NewFeature {
                project_id: Some(project.id.clone()),
                name: "Feat".into(),
                summary: "s".into(),
                ..NewFeature::default()
            })
            .unwrap();
        (project.id, feature.id)
    }

    fn new_task(feature_id: &str, title: &str) -> NewTask {
        NewTask {
            feature_id: feature_id.to_owned(),
            title: title.into(),
            summary: "does a thing".into(),
            ..NewTask::default()
        }
    }

    #[test]
    fn create_derives_project_from_feature() {
        let store = test_store();
        let (project_id, feature_id) = seed_feature(&store);
        let task = store.create_task(&new_task(&feature_id, "T")).unwrap();

        assert_eq!(task.project_id.as_deref(), Some(project_id.as_str()));
        assert_eq!(task.feature_id.as_deref(), Some(feature_id.as_str()));
        assert_eq!(task.status, WorkState::New);
        assert_eq!(task.version, 1);
    }

    #[test]
    fn create_against_missing_feature_fails() {
        let store = test_store();
        let err = store.create_task(&new_task(&"0".repeat(32), "T")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_rejects_out_of_range_complexity() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        let err = store
            .create_task(&NewTask {
                complexity: 11,
                ..new_task(&feature_id, "T")
            })
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn update_preserves_untouched_fields() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        let task = store
            .create_task(&NewTask {
                complexity: 3,
                ..new_task(&feature_id, "Original")
            })
            .unwrap();

        let updated = store
            .update_task(
                &task.id,
                &TaskUpdate {
                    expected_version: 1,
                    summary: Some("sharper".into()),
                    ..TaskUpdate::default()
                },
                &validator(),
            )
            .unwrap();
        assert_eq!(updated.title, "Original");
        assert_eq!(updated.summary, "sharper");
        assert_eq!(updated.complexity, 3);
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn update_with_stale_version_is_conflict() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        let task = store.create_task(&new_task(&feature_id, "T")).unwrap();
        let err = store
            .update_task(
                &task.id,
                &TaskUpdate {
                    expected_version: 999,
                    title: Some("X".into()),
                    ..TaskUpdate::default()
                },
                &validator(),
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn search_by_feature_and_status() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        store.create_task(&new_task(&feature_id, "One")).unwrap();
        store.create_task(&new_task(&feature_id, "Two")).unwrap();

        let filter = SearchFilter {
            feature_id: Some(feature_id.clone()),
            ..SearchFilter::default()
        };
        let found = store.search_tasks(&filter).unwrap();
        assert_eq!(found.len(), 2);

        let filter = SearchFilter {
            query: Some("one".into()),
            feature_id: Some(feature_id),
            ..SearchFilter::default()
        };
        let found = store.search_tasks(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "One");
    }

    #[test]
    fn like_wildcards_in_query_are_literal() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        store
            .create_task(&new_task(&feature_id, "Reach 100% coverage"))
            .unwrap();
        store.create_task(&new_task(&feature_id, "Reach 100 goals")).unwrap();

        let found = store.search_tasks(&SearchFilter::query("100%")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Reach 100% coverage");
    }

    #[test]
    fn delete_task_removes_owned_rows() {
        let store = test_store();
        let (_, feature_id) = seed_feature(&store);
        let task = store
            .create_task(&NewTask {
                tags: vec!["gone".into()],
                ..new_task(&feature_id, "T")
            })
            .unwrap();

        store.delete_task(&task.id).unwrap();
        assert!(store.get_task(&task.id).unwrap_err().is_not_found());
        assert!(store.tag_usage("gone").unwrap().is_empty());
    }
}
