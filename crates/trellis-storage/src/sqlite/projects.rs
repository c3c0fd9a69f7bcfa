//! Project CRUD for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use trellis_core::entity::{NewProject, Project, ProjectUpdate, build_search_vector};
use trellis_core::enums::EntityType;
use trellis_core::filter::{SearchFilter, TagMatch};
use trellis_core::idgen::new_entity_id;
use trellis_core::validation::require_field;

use crate::error::{Result, StoreError};
use crate::sqlite::features;
use crate::sqlite::search::{QueryBuilder, pagination_sql};
use crate::sqlite::sections;
use crate::sqlite::store::{SqliteStore, format_datetime, optional, parse_datetime};
use crate::sqlite::tags;

/// All project columns in a deterministic order for SELECT queries.
pub(crate) const PROJECT_COLUMNS: &str =
    "id, name, summary, description, status, version, created_at, modified_at";

/// Deserialises a row into a [`Project`]. Tags are loaded separately.
///
/// The column order MUST match [`PROJECT_COLUMNS`].
pub(crate) fn scan_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        legacy_status: row.get("status")?,
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
        tags: Vec::new(),
    })
}

/// Fetches one project with its tags.
pub(crate) fn get_project_on_conn(conn: &Connection, id: &str) -> Result<Project> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
    let project = optional(conn.query_row(&sql, params![id], scan_project))?
        .ok_or_else(|| StoreError::not_found("project", id))?;
    with_tags(conn, project)
}

fn with_tags(conn: &Connection, mut project: Project) -> Result<Project> {
    project.tags = tags::get_tags_on_conn(conn, &EntityType::Project, &project.id)?;
    Ok(project)
}

/// `true` if a project row exists.
pub(crate) fn project_exists_on_conn(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl SqliteStore {
    /// Creates a project with version 1 and the caller's (normalized) tags.
    pub fn create_project(&self, new: &NewProject) -> Result<Project> {
        let name = require_field("name", &new.name)?;
        let summary = require_field("summary", &new.summary)?;
        let description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);

        let id = new_entity_id();
        let now = Self::now();
        let now_str = format_datetime(&now);
        let search_vector = build_search_vector(&name, &summary, description.as_deref());

        self.with_tx(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, summary, description, search_vector,
                                       version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![id, name, summary, description, search_vector, now_str],
            )?;
            tags::set_tags_on_conn(conn, &EntityType::Project, &id, &new.tags)?;
            get_project_on_conn(conn, &id)
        })
    }

    /// Fetches a project by id.
    pub fn get_project(&self, id: &str) -> Result<Project> {
        let conn = self.lock_conn()?;
        get_project_on_conn(&conn, id)
    }

    /// Applies a partial update under the caller's expected version.
    pub fn update_project(&self, id: &str, update: &ProjectUpdate) -> Result<Project> {
        self.with_tx(|conn| {
            let current = get_project_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "project {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let name = match &update.name {
                Some(n) => require_field("name", n)?,
                None => current.name.clone(),
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
            let search_vector = build_search_vector(&name, &summary, description.as_deref());

            let affected = conn.execute(
                "UPDATE projects SET name = ?1, summary = ?2, description = ?3,
                        search_vector = ?4, version = version + 1, modified_at = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    name,
                    summary,
                    description,
                    search_vector,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "project {id} was modified concurrently"
                )));
            }

            if let Some(new_tags) = &update.tags {
                tags::set_tags_on_conn(conn, &EntityType::Project, id, new_tags)?;
            }
            get_project_on_conn(conn, id)
        })
    }

    /// Deletes a project. Without `cascade`, refuses when features exist;
    /// with it, removes features (and their tasks), the knowledge graph, own
    /// sections and tags -- child-first, in one transaction.
    pub fn delete_project(&self, id: &str, cascade: bool) -> Result<()> {
        self.with_tx(|conn| {
            if !project_exists_on_conn(conn, id)? {
                return Err(StoreError::not_found("project", id));
            }

            let feature_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM features WHERE project_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if feature_count > 0 && !cascade {
                return Err(StoreError::HasChildren {
                    entity: "project",
                    id: id.to_owned(),
                    detail: count_string(feature_count, "feature"),
                });
            }

            let feature_ids: Vec<String> = conn
                .prepare("SELECT id FROM features WHERE project_id = ?1")?
                .query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            for feature_id in feature_ids {
                features::delete_feature_cascade_on_conn(conn, &feature_id)?;
            }

            // Knowledge graph rows scoped to the project.
            conn.execute(
                "DELETE FROM changelog WHERE parent_type = 'atom'
                   AND parent_id IN (SELECT id FROM atoms WHERE project_id = ?1)",
                params![id],
            )?;
            conn.execute(
                "DELETE FROM changelog WHERE parent_type = 'molecule'
                   AND parent_id IN (SELECT id FROM molecules WHERE project_id = ?1)",
                params![id],
            )?;
            conn.execute("DELETE FROM atoms WHERE project_id = ?1", params![id])?;
            conn.execute("DELETE FROM molecules WHERE project_id = ?1", params![id])?;

            sections::delete_sections_for_entity_on_conn(conn, &EntityType::Project, id)?;
            tags::delete_tags_on_conn(conn, &EntityType::Project, id)?;
            conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Substring/tag search over projects, newest modification first.
    ///
    /// The tag filter requires ALL listed tags (unlike features/tasks).
    pub fn search_projects(&self, filter: &SearchFilter) -> Result<Vec<Project>> {
        let conn = self.lock_conn()?;
        let mut qb = QueryBuilder::new();
        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            qb.query_substring("search_vector", query);
        }
        qb.tags(EntityType::Project, "projects.id", &filter.tags, TagMatch::All);

        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects{} ORDER BY modified_at DESC{}",
            qb.where_sql(),
            pagination_sql(filter.limit, filter.offset)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(qb.params().as_slice(), scan_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(with_tags(&conn, row?)?);
        }
        Ok(projects)
    }
}

/// Renders a child count for HAS_CHILDREN messages, e.g. `"1 feature"`.
pub(crate) fn count_string(count: i64, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn new_project(name: &str) -> NewProject {
        NewProject {
            name: name.into(),
            summary: "a summary".into(),
            description: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn create_and_get() {
        let store = test_store();
        let project = store
            .create_project(&NewProject {
                name: "Payments".into(),
                summary: "Billing work".into(),
                description: Some("Everything invoicing".into()),
                tags: vec!["Billing".into(), "billing".into(), " Core ".into()],
            })
            .unwrap();

        assert_eq!(project.version, 1);
        assert_eq!(project.tags, vec!["billing", "core"]);
        assert!(trellis_core::idgen::is_entity_id(&project.id));

        let loaded = store.get_project(&project.id).unwrap();
        assert_eq!(loaded.name, "Payments");
        assert_eq!(loaded.created_at, loaded.modified_at);
        assert!(loaded.legacy_status.is_none());
    }

    #[test]
    fn create_requires_nonempty_fields() {
        let store = test_store();
        let err = store.create_project(&new_project("   ")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let store = test_store();
        store.create_project(&new_project("Same")).unwrap();
        let err = store.create_project(&new_project("Same")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = test_store();
        let err = store.get_project("0".repeat(32).as_str()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_bumps_version_and_vector() {
        let store = test_store();
        let project = store.create_project(&new_project("Orig")).unwrap();

        let updated = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    expected_version: 1,
                    name: Some("Renamed".into()),
                    ..ProjectUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.created_at, project.created_at);

        let found = store.search_projects(&SearchFilter::query("renamed")).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn update_with_stale_version_is_conflict() {
        let store = test_store();
        let project = store.create_project(&new_project("P")).unwrap();
        let err = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    expected_version: 999,
                    summary: Some("x".into()),
                    ..ProjectUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn update_can_clear_description() {
        let store = test_store();
        let project = store
            .create_project(&NewProject {
                description: Some("there".into()),
                ..new_project("D")
            })
            .unwrap();

        let updated = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    expected_version: 1,
                    description: Some(None),
                    ..ProjectUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.description, None);
    }

    #[test]
    fn delete_without_children() {
        let store = test_store();
        let project = store.create_project(&new_project("Gone")).unwrap();
        store.delete_project(&project.id, false).unwrap();
        assert!(store.get_project(&project.id).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_with_one_feature_refuses_without_cascade() {
        let store = test_store();
        let project = store.create_project(&new_project("Parent")).unwrap();
        let feature = store
            .create_feature(&trellis_core::entity::NewFeature {
                project_id: Some(project.id.clone()),
                name: "Child".into(),
                summary: "s".into(),
                ..trellis_core::entity::NewFeature::default()
            })
            .unwrap();

        let err = store.delete_project(&project.id, false).unwrap_err();
        assert_eq!(err.code(), "HAS_CHILDREN");
        assert!(err.to_string().contains("1 feature"));

        store.delete_project(&project.id, true).unwrap();
        assert!(store.get_project(&project.id).unwrap_err().is_not_found());
        assert!(store.get_feature(&feature.id).unwrap_err().is_not_found());
    }

    #[test]
    fn search_matches_substring_case_insensitively() {
        let store = test_store();
        store.create_project(&new_project("Alpha Service")).unwrap();
        store.create_project(&new_project("Beta Service")).unwrap();

        let found = store.search_projects(&SearchFilter::query("ALPHA")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alpha Service");

        let all = store.search_projects(&SearchFilter::query("service")).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn search_tag_filter_requires_all() {
        let store = test_store();
        store
            .create_project(&NewProject {
                tags: vec!["api".into(), "rust".into()],
                ..new_project("Both")
            })
            .unwrap();
        store
            .create_project(&NewProject {
                tags: vec!["api".into()],
                ..new_project("One")
            })
            .unwrap();

        let filter = SearchFilter {
            tags: vec!["api".into(), "rust".into()],
            ..SearchFilter::default()
        };
        let found = store.search_projects(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Both");
    }

    #[test]
    fn search_pagination_is_deterministic() {
        let store = test_store();
        for i in 0..5 {
            store.create_project(&new_project(&format!("P{i}"))).unwrap();
        }
        let filter = SearchFilter {
            limit: Some(2),
            offset: Some(2),
            ..SearchFilter::default()
        };
        let page = store.search_projects(&filter).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn count_string_pluralizes() {
        assert_eq!(count_string(1, "feature"), "1 feature");
        assert_eq!(count_string(3, "task"), "3 tasks");
    }
}
