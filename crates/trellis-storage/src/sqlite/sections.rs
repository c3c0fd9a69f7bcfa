//! Section CRUD for [`SqliteStore`].
//!
//! Sections are ordered per owner: ordinals for `(entity_type, entity_id)`
//! are unique, and a full reorder repacks them to the contiguous range
//! `0..k-1`. Template sections live in the same table under the `template`
//! owner type.

use rusqlite::{Connection, Row, params};

use trellis_core::enums::EntityType;
use trellis_core::idgen::new_entity_id;
use trellis_core::section::{NewSection, Section, SectionUpdate};
use trellis_core::validation::require_field;

use crate::error::{Result, StoreError};
use crate::sqlite::store::{SqliteStore, format_datetime, optional, parse_datetime};

/// All section columns in a deterministic order for SELECT queries.
pub(crate) const SECTION_COLUMNS: &str = "id, entity_type, entity_id, title, usage_description, \
     content, content_format, ordinal, tags, version, created_at, modified_at";

/// Deserialises a row into a [`Section`].
///
/// The column order MUST match [`SECTION_COLUMNS`].
pub(crate) fn scan_section(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get("id")?,
        entity_type: row.get::<_, String>("entity_type")?.into(),
        entity_id: row.get("entity_id")?,
        title: row.get("title")?,
        usage_description: row.get("usage_description")?,
        content: row.get("content")?,
        content_format: row.get::<_, String>("content_format")?.into(),
        ordinal: row.get("ordinal")?,
        tags: row.get("tags")?,
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
    })
}

pub(crate) fn get_section_on_conn(conn: &Connection, id: &str) -> Result<Section> {
    let sql = format!("SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?1");
    optional(conn.query_row(&sql, params![id], scan_section))?
        .ok_or_else(|| StoreError::not_found("section", id))
}

/// Inserts a section on the given connection. Shared with template apply.
pub(crate) fn insert_section_on_conn(
    conn: &Connection,
    new: &NewSection,
) -> Result<Section> {
    let title = require_field("title", &new.title)?;

    let ordinal = match new.ordinal {
        Some(ordinal) => ordinal,
        None => next_ordinal_on_conn(conn, &new.entity_type, &new.entity_id)?,
    };

    let id = new_entity_id();
    let now_str = format_datetime(&SqliteStore::now());
    let format = new.content_format.clone().unwrap_or_default();

    // An explicitly supplied taken ordinal trips the unique index, which
    // surfaces as CONFLICT.
    conn.execute(
        "INSERT INTO sections (id, entity_type, entity_id, title, usage_description, content,
                               content_format, ordinal, tags, version, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
        params![
            id,
            new.entity_type.as_str(),
            new.entity_id,
            title,
            new.usage_description,
            new.content,
            format.as_str(),
            ordinal,
            new.tags.clone().unwrap_or_default(),
            now_str
        ],
    )?;
    get_section_on_conn(conn, &id)
}

/// `max(ordinal) + 1` for the owner, 0 for the first section.
fn next_ordinal_on_conn(
    conn: &Connection,
    entity_type: &EntityType,
    entity_id: &str,
) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(ordinal) FROM sections WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |m| m + 1))
}

/// Drops all sections owned by the entity. Used by the delete cascades.
pub(crate) fn delete_sections_for_entity_on_conn(
    conn: &Connection,
    entity_type: &EntityType,
    entity_id: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM sections WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
    )?;
    Ok(())
}

impl SqliteStore {
    /// Adds a section. Without an explicit ordinal, appends after the
    /// current highest.
    pub fn add_section(&self, new: &NewSection) -> Result<Section> {
        self.with_tx(|conn| insert_section_on_conn(conn, new))
    }

    /// Fetches a section by id.
    pub fn get_section(&self, id: &str) -> Result<Section> {
        let conn = self.lock_conn()?;
        get_section_on_conn(&conn, id)
    }

    /// Lists an entity's sections in ordinal order.
    pub fn list_sections(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<Section>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {SECTION_COLUMNS} FROM sections
             WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY ordinal"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_type.as_str(), entity_id], scan_section)?;
        let mut sections = Vec::new();
        for row in rows {
            sections.push(row?);
        }
        Ok(sections)
    }

    /// Applies a partial update under the caller's expected version.
    pub fn update_section(&self, id: &str, update: &SectionUpdate) -> Result<Section> {
        self.with_tx(|conn| {
            let current = get_section_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "section {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let title = match &update.title {
                Some(t) => require_field("title", t)?,
                None => current.title.clone(),
            };
            let usage = update
                .usage_description
                .clone()
                .unwrap_or(current.usage_description.clone());
            let content = update.content.clone().unwrap_or(current.content.clone());
            let format = update
                .content_format
                .clone()
                .unwrap_or(current.content_format.clone());
            let tags = update.tags.clone().unwrap_or(current.tags.clone());

            let affected = conn.execute(
                "UPDATE sections SET title = ?1, usage_description = ?2, content = ?3,
                        content_format = ?4, tags = ?5, version = version + 1, modified_at = ?6
                 WHERE id = ?7 AND version = ?8",
                params![
                    title,
                    usage,
                    content,
                    format.as_str(),
                    tags,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "section {id} was modified concurrently"
                )));
            }
            get_section_on_conn(conn, id)
        })
    }

    /// Targeted content-only update: touches `content`, `version` and
    /// `modified_at`, nothing else.
    pub fn update_section_text(
        &self,
        id: &str,
        content: &str,
        expected_version: i64,
    ) -> Result<Section> {
        self.with_tx(|conn| {
            get_section_on_conn(conn, id)?;
            let affected = conn.execute(
                "UPDATE sections SET content = ?1, version = version + 1, modified_at = ?2
                 WHERE id = ?3 AND version = ?4",
                params![content, format_datetime(&Self::now()), id, expected_version],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "section {id} version mismatch: expected {expected_version}"
                )));
            }
            get_section_on_conn(conn, id)
        })
    }

    /// Reassigns ordinals so that `ordered_ids[i]` gets ordinal `i`.
    ///
    /// All of the owner's sections must be listed exactly once; any foreign
    /// or missing id rolls the whole operation back.
    pub fn reorder_sections(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        ordered_ids: &[String],
    ) -> Result<Vec<Section>> {
        self.with_tx(|conn| {
            let existing: Vec<String> = conn
                .prepare(
                    "SELECT id FROM sections WHERE entity_type = ?1 AND entity_id = ?2
                     ORDER BY ordinal",
                )?
                .query_map(params![entity_type.as_str(), entity_id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            let existing_set: std::collections::HashSet<&str> =
                existing.iter().map(String::as_str).collect();
            let ordered_set: std::collections::HashSet<&str> =
                ordered_ids.iter().map(String::as_str).collect();
            if ordered_set.len() != ordered_ids.len() {
                return Err(StoreError::validation("reorder list contains duplicates"));
            }
            for id in ordered_ids {
                if !existing_set.contains(id.as_str()) {
                    return Err(StoreError::validation(format!(
                        "section {id} does not belong to {} {entity_id}",
                        entity_type.as_str()
                    )));
                }
            }
            if ordered_ids.len() != existing.len() {
                return Err(StoreError::validation(format!(
                    "reorder must list all {} sections (got {})",
                    existing.len(),
                    ordered_ids.len()
                )));
            }

            let now_str = format_datetime(&Self::now());
            // Two passes keep the unique (owner, ordinal) index satisfied
            // mid-flight.
            for (i, id) in ordered_ids.iter().enumerate() {
                conn.execute(
                    "UPDATE sections SET ordinal = ?1 WHERE id = ?2",
                    params![-(i as i64) - 1, id],
                )?;
            }
            for (i, id) in ordered_ids.iter().enumerate() {
                conn.execute(
                    "UPDATE sections SET ordinal = ?1, modified_at = ?2 WHERE id = ?3",
                    params![i as i64, now_str, id],
                )?;
            }

            let sql = format!(
                "SELECT {SECTION_COLUMNS} FROM sections
                 WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY ordinal"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![entity_type.as_str(), entity_id], scan_section)?;
            let mut sections = Vec::new();
            for row in rows {
                sections.push(row?);
            }
            Ok(sections)
        })
    }

    /// Deletes sections by id in a single statement.
    pub fn bulk_delete_sections(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_tx(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "DELETE FROM sections WHERE id IN ({})",
                placeholders.join(", ")
            );
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let affected = conn.execute(&sql, param_refs.as_slice())?;
            Ok(affected)
        })
    }

    /// Deletes one section.
    pub fn delete_section(&self, id: &str) -> Result<()> {
        self.with_tx(|conn| {
            let affected = conn.execute("DELETE FROM sections WHERE id = ?1", params![id])?;
            if affected == 0 {
                return Err(StoreError::not_found("section", id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::enums::ContentFormat;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn new_section(entity_id: &str, title: &str) -> NewSection {
        NewSection {
            entity_type: EntityType::Feature,
            entity_id: entity_id.into(),
            title: title.into(),
            usage_description: "notes".into(),
            content: "body".into(),
            ..NewSection::default()
        }
    }

    #[test]
    fn ordinals_assign_sequentially() {
        let store = test_store();
        let a = store.add_section(&new_section("f1", "A")).unwrap();
        let b = store.add_section(&new_section("f1", "B")).unwrap();
        assert_eq!(a.ordinal, 0);
        assert_eq!(b.ordinal, 1);
        assert_eq!(a.content_format, ContentFormat::Markdown);
    }

    #[test]
    fn explicit_taken_ordinal_is_conflict() {
        let store = test_store();
        store.add_section(&new_section("f1", "A")).unwrap();
        let err = store
            .add_section(&NewSection {
                ordinal: Some(0),
                ..new_section("f1", "B")
            })
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn explicit_free_ordinal_is_used() {
        let store = test_store();
        let s = store
            .add_section(&NewSection {
                ordinal: Some(7),
                ..new_section("f1", "Jump")
            })
            .unwrap();
        assert_eq!(s.ordinal, 7);
        // The next implicit insert appends after it.
        let next = store.add_section(&new_section("f1", "After")).unwrap();
        assert_eq!(next.ordinal, 8);
    }

    #[test]
    fn reorder_repacks_to_contiguous_range() {
        let store = test_store();
        let a = store.add_section(&new_section("f1", "A")).unwrap();
        let b = store.add_section(&new_section("f1", "B")).unwrap();
        let c = store.add_section(&new_section("f1", "C")).unwrap();

        let reordered = store
            .reorder_sections(
                EntityType::Feature,
                "f1",
                &[c.id.clone(), a.id.clone(), b.id.clone()],
            )
            .unwrap();

        let ordinals: Vec<i64> = reordered.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        let titles: Vec<&str> = reordered.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[test]
    fn reorder_rejects_foreign_ids() {
        let store = test_store();
        let a = store.add_section(&new_section("f1", "A")).unwrap();
        let foreign = store.add_section(&new_section("f2", "X")).unwrap();

        let err = store
            .reorder_sections(EntityType::Feature, "f1", &[foreign.id, a.id.clone()])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        // Nothing moved.
        let unchanged = store.get_section(&a.id).unwrap();
        assert_eq!(unchanged.ordinal, 0);
    }

    #[test]
    fn reorder_requires_full_cover() {
        let store = test_store();
        let a = store.add_section(&new_section("f1", "A")).unwrap();
        store.add_section(&new_section("f1", "B")).unwrap();

        let err = store
            .reorder_sections(EntityType::Feature, "f1", &[a.id])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn update_text_touches_only_content() {
        let store = test_store();
        let section = store.add_section(&new_section("f1", "A")).unwrap();

        let updated = store
            .update_section_text(&section.id, "fresh body", 1)
            .unwrap();
        assert_eq!(updated.content, "fresh body");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "A");

        let err = store
            .update_section_text(&section.id, "stale write", 1)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn bulk_delete_in_one_statement() {
        let store = test_store();
        let a = store.add_section(&new_section("f1", "A")).unwrap();
        let b = store.add_section(&new_section("f1", "B")).unwrap();
        store.add_section(&new_section("f1", "C")).unwrap();

        let removed = store.bulk_delete_sections(&[a.id, b.id]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.list_sections(EntityType::Feature, "f1").unwrap().len(),
            1
        );
        assert_eq!(store.bulk_delete_sections(&[]).unwrap(), 0);
    }
}
