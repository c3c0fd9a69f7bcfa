//! Cross-entity reference bookkeeping over the `blocked_by` / `related_to`
//! JSON array columns on features and tasks.
//!
//! The arrays live on the entity rows (v3 schema), so "find dependents"
//! narrows candidates with a LIKE probe and confirms by parsing the array.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use trellis_core::blocker::{Blocker, contains_no_op};
use trellis_core::enums::{ContainerType, WorkState};

use crate::error::Result;
use crate::sqlite::store::{format_datetime, json_vec, to_json};

/// A feature or task row holding a reference to some entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub container: ContainerType,
    pub id: String,
}

const WORK_TABLES: &[(ContainerType, &str)] =
    &[(ContainerType::Feature, "features"), (ContainerType::Task, "tasks")];

/// Finds every feature/task listing `entity_id` in its `blocked_by` set.
pub(crate) fn find_dependents_on_conn(conn: &Connection, entity_id: &str) -> Result<Vec<Dependent>> {
    let probe = format!("%\"{entity_id}\"%");
    let mut out = Vec::new();
    for (container, table) in WORK_TABLES {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, blocked_by FROM {table} WHERE blocked_by LIKE ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![probe], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, raw) = row?;
            let blocked_by: Vec<Blocker> = json_vec(&raw);
            if blocked_by.iter().any(|b| b.entity_id() == Some(entity_id)) {
                out.push(Dependent {
                    container: *container,
                    id,
                });
            }
        }
    }
    Ok(out)
}

/// Removes `blocker_id` from every dependent's `blocked_by` set, bumping each
/// touched row's version. The blocked reason survives only while `NO_OP`
/// remains in the set. Returns the ids of the entities changed.
pub(crate) fn remove_blocker_everywhere_on_conn(
    conn: &Connection,
    blocker_id: &str,
    now: &DateTime<Utc>,
) -> Result<Vec<String>> {
    let dependents = find_dependents_on_conn(conn, blocker_id)?;
    let mut unblocked = Vec::with_capacity(dependents.len());
    for dep in dependents {
        let table = table_for(dep.container);
        let raw: String = conn.query_row(
            &format!("SELECT blocked_by FROM {table} WHERE id = ?1"),
            params![dep.id],
            |row| row.get(0),
        )?;
        let mut blocked_by: Vec<Blocker> = json_vec(&raw);
        blocked_by.retain(|b| b.entity_id() != Some(blocker_id));

        let clear_reason = !contains_no_op(&blocked_by);
        let sql = if clear_reason {
            format!(
                "UPDATE {table} SET blocked_by = ?1, blocked_reason = NULL,
                        version = version + 1, modified_at = ?2 WHERE id = ?3"
            )
        } else {
            format!(
                "UPDATE {table} SET blocked_by = ?1,
                        version = version + 1, modified_at = ?2 WHERE id = ?3"
            )
        };
        conn.execute(
            &sql,
            params![to_json(&blocked_by)?, format_datetime(now), dep.id],
        )?;
        unblocked.push(dep.id);
    }
    Ok(unblocked)
}

/// Scrubs `entity_id` out of every `blocked_by` and `related_to` array.
/// Used by the delete cascades; one version bump per touched row.
pub(crate) fn scrub_references_on_conn(
    conn: &Connection,
    entity_id: &str,
    now: &DateTime<Utc>,
) -> Result<()> {
    let probe = format!("%\"{entity_id}\"%");
    for (_, table) in WORK_TABLES {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, blocked_by, related_to FROM {table}
             WHERE blocked_by LIKE ?1 OR related_to LIKE ?1"
        ))?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![probe], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        for (id, blocked_raw, related_raw) in rows {
            let mut blocked_by: Vec<Blocker> = json_vec(&blocked_raw);
            let mut related_to: Vec<String> = json_vec(&related_raw);
            let had_blocker = blocked_by.iter().any(|b| b.entity_id() == Some(entity_id));
            let had_related = related_to.iter().any(|r| r == entity_id);
            if !had_blocker && !had_related {
                continue;
            }
            blocked_by.retain(|b| b.entity_id() != Some(entity_id));
            related_to.retain(|r| r != entity_id);

            let clear_reason = !contains_no_op(&blocked_by);
            let sql = if clear_reason {
                format!(
                    "UPDATE {table} SET blocked_by = ?1, related_to = ?2, blocked_reason = NULL,
                            version = version + 1, modified_at = ?3 WHERE id = ?4"
                )
            } else {
                format!(
                    "UPDATE {table} SET blocked_by = ?1, related_to = ?2,
                            version = version + 1, modified_at = ?3 WHERE id = ?4"
                )
            };
            conn.execute(
                &sql,
                params![
                    to_json(&blocked_by)?,
                    to_json(&related_to)?,
                    format_datetime(now),
                    id
                ],
            )?;
        }
    }
    Ok(())
}

/// Looks up the `blocked_by` set of an arbitrary feature/task id.
pub(crate) fn get_blocked_by_on_conn(
    conn: &Connection,
    entity_id: &str,
) -> Result<Option<Vec<Blocker>>> {
    for (_, table) in WORK_TABLES {
        let raw: Option<String> = crate::sqlite::store::optional(conn.query_row(
            &format!("SELECT blocked_by FROM {table} WHERE id = ?1"),
            params![entity_id],
            |row| row.get(0),
        ))?;
        if let Some(raw) = raw {
            return Ok(Some(json_vec(&raw)));
        }
    }
    Ok(None)
}

/// Looks up the container type and status of an arbitrary feature/task id.
pub(crate) fn get_work_status_on_conn(
    conn: &Connection,
    entity_id: &str,
) -> Result<Option<(ContainerType, WorkState)>> {
    for (container, table) in WORK_TABLES {
        let status: Option<String> = crate::sqlite::store::optional(conn.query_row(
            &format!("SELECT status FROM {table} WHERE id = ?1"),
            params![entity_id],
            |row| row.get(0),
        ))?;
        if let Some(status) = status {
            return Ok(Some((*container, WorkState::from(status))));
        }
    }
    Ok(None)
}

fn table_for(container: ContainerType) -> &'static str {
    match container {
        ContainerType::Feature => "features",
        ContainerType::Task => "tasks",
        ContainerType::Project => "projects",
    }
}
