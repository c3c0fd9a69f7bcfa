//! Feature CRUD for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use trellis_core::entity::{Feature, FeatureUpdate, NewFeature, build_search_vector};
use trellis_core::enums::{ContainerType, EntityType};
use trellis_core::filter::{SearchFilter, TagMatch};
use trellis_core::idgen::new_entity_id;
use trellis_core::status::StatusValidator;
use trellis_core::validation::require_field;

use crate::error::{Result, StoreError};
use crate::sqlite::projects::{count_string, project_exists_on_conn};
use crate::sqlite::refs;
use crate::sqlite::search::{QueryBuilder, pagination_sql};
use crate::sqlite::sections;
use crate::sqlite::store::{
    SqliteStore, format_datetime, json_vec, optional, parse_datetime, to_json,
};
use crate::sqlite::tags;
use crate::sqlite::tasks;

/// All feature columns in a deterministic order for SELECT queries.
pub(crate) const FEATURE_COLUMNS: &str = "id, project_id, name, summary, description, status, \
     priority, blocked_by, blocked_reason, related_to, version, created_at, modified_at";

/// Deserialises a row into a [`Feature`]. Tags are loaded separately.
///
/// The column order MUST match [`FEATURE_COLUMNS`].
pub(crate) fn scan_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        status: row.get::<_, String>("status")?.into(),
        priority: row.get::<_, String>("priority")?.into(),
        blocked_by: json_vec(&row.get::<_, String>("blocked_by")?),
        blocked_reason: row.get("blocked_reason")?,
        related_to: json_vec(&row.get::<_, String>("related_to")?),
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
        tags: Vec::new(),
    })
}

/// Fetches one feature with its tags.
pub(crate) fn get_feature_on_conn(conn: &Connection, id: &str) -> Result<Feature> {
    let sql = format!("SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?1");
    let feature = optional(conn.query_row(&sql, params![id], scan_feature))?
        .ok_or_else(|| StoreError::not_found("feature", id))?;
    with_tags(conn, feature)
}

fn with_tags(conn: &Connection, mut feature: Feature) -> Result<Feature> {
    feature.tags = tags::get_tags_on_conn(conn, &EntityType::Feature, &feature.id)?;
    Ok(feature)
}

/// Removes a feature and everything it owns: its tasks (cascaded), its
/// sections and tags, every reference to it, then the row itself.
pub(crate) fn delete_feature_cascade_on_conn(conn: &Connection, id: &str) -> Result<()> {
    let task_ids: Vec<String> = conn
        .prepare("SELECT id FROM tasks WHERE feature_id = ?1")?
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for task_id in task_ids {
        tasks::delete_task_cascade_on_conn(conn, &task_id)?;
    }

    sections::delete_sections_for_entity_on_conn(conn, &EntityType::Feature, id)?;
    tags::delete_tags_on_conn(conn, &EntityType::Feature, id)?;
    refs::scrub_references_on_conn(conn, id, &SqliteStore::now())?;
    conn.execute("DELETE FROM features WHERE id = ?1", params![id])?;
    Ok(())
}

impl SqliteStore {
    /// Creates a feature in the pipeline's first state with version 1.
    pub fn create_feature(&self, new: &NewFeature) -> Result<Feature> {
        let name = require_field("name", &new.name)?;
        let summary = require_field("summary", &new.summary)?;
        let description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);

        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());
        let search_vector = build_search_vector(&name, &summary, description.as_deref());

        self.with_tx(|conn| {
            if let Some(project_id) = &new.project_id {
                if !project_exists_on_conn(conn, project_id)? {
                    return Err(StoreError::not_found("project", project_id.clone()));
                }
            }
            conn.execute(
                "INSERT INTO features (id, project_id, name, summary, description, status,
                                       priority, blocked_by, related_to, search_vector,
                                       version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'NEW', ?6, '[]', '[]', ?7, 1, ?8, ?8)",
                params![
                    id,
                    new.project_id,
                    name,
                    summary,
                    description,
                    new.priority.as_str(),
                    search_vector,
                    now_str
                ],
            )?;
            tags::set_tags_on_conn(conn, &EntityType::Feature, &id, &new.tags)?;
            get_feature_on_conn(conn, &id)
        })
    }

    /// Fetches a feature by id.
    pub fn get_feature(&self, id: &str) -> Result<Feature> {
        let conn = self.lock_conn()?;
        get_feature_on_conn(&conn, id)
    }

    /// Applies a partial update under the caller's expected version. Status
    /// changes must be legal transitions under the active pipeline.
    pub fn update_feature(
        &self,
        id: &str,
        update: &FeatureUpdate,
        validator: &StatusValidator,
    ) -> Result<Feature> {
        self.with_tx(|conn| {
            let current = get_feature_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "feature {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let status = match &update.status {
                Some(next) if *next != current.status => {
                    if !validator.is_valid_transition(ContainerType::Feature, &current.status, next)
                    {
                        return Err(StoreError::validation(format!(
                            "illegal feature status transition {} -> {}",
                            current.status, next
                        )));
                    }
                    next.clone()
                }
                _ => current.status.clone(),
            };

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
            let priority = update.priority.clone().unwrap_or(current.priority.clone());
            let related_to = match &update.related_to {
                Some(r) => r.clone(),
                None => current.related_to.clone(),
            };
            let search_vector = build_search_vector(&name, &summary, description.as_deref());

            let affected = conn.execute(
                "UPDATE features SET name = ?1, summary = ?2, description = ?3, status = ?4,
                        priority = ?5, related_to = ?6, search_vector = ?7,
                        version = version + 1, modified_at = ?8
                 WHERE id = ?9 AND version = ?10",
                params![
                    name,
                    summary,
                    description,
                    status.as_str(),
                    priority.as_str(),
                    to_json(&related_to)?,
                    search_vector,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "feature {id} was modified concurrently"
                )));
            }

            if let Some(new_tags) = &update.tags {
                tags::set_tags_on_conn(conn, &EntityType::Feature, id, new_tags)?;
            }
            get_feature_on_conn(conn, id)
        })
    }

    /// Deletes a feature. Without `cascade`, refuses when tasks exist.
    pub fn delete_feature(&self, id: &str, cascade: bool) -> Result<()> {
        self.with_tx(|conn| {
            // Existence probe before counting children.
            get_feature_on_conn(conn, id)?;

            let task_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE feature_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if task_count > 0 && !cascade {
                return Err(StoreError::HasChildren {
                    entity: "feature",
                    id: id.to_owned(),
                    detail: count_string(task_count, "task"),
                });
            }

            delete_feature_cascade_on_conn(conn, id)
        })
    }

    /// Search over features, newest first.
    ///
    /// The tag filter requires ANY listed tag (unlike projects).
    pub fn search_features(&self, filter: &SearchFilter) -> Result<Vec<Feature>> {
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
        qb.tags(EntityType::Feature, "features.id", &filter.tags, TagMatch::Any);

        let sql = format!(
            "SELECT {FEATURE_COLUMNS} FROM features{} ORDER BY created_at DESC{}",
            qb.where_sql(),
            pagination_sql(filter.limit, filter.offset)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(qb.params().as_slice(), scan_feature)?;

        let mut features = Vec::new();
        for row in rows {
            features.push(with_tags(&conn, row?)?);
        }
        Ok(features)
    }
}
