//! Tag rows for [`SqliteStore`].
//!
//! A tag has no independent lifecycle: it exists iff at least one
//! `(entity_type, entity_id, tag)` row references it. Values are stored
//! trimmed and lowercased; writes replace an entity's full tag set.

use rusqlite::{Connection, params};

use trellis_core::entity::{normalize_tag, normalize_tags};
use trellis_core::enums::EntityType;

use crate::error::{Result, StoreError};
use crate::sqlite::store::SqliteStore;

/// One tag with its reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

/// One entity referencing a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUsage {
    pub entity_type: EntityType,
    pub entity_id: String,
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with the repositories)
// ---------------------------------------------------------------------------

/// Replaces the entity's full tag set with the normalized `tags`.
pub(crate) fn set_tags_on_conn(
    conn: &Connection,
    entity_type: &EntityType,
    entity_id: &str,
    tags: &[String],
) -> Result<Vec<String>> {
    let normalized = normalize_tags(tags);
    conn.execute(
        "DELETE FROM entity_tags WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
    )?;
    for tag in &normalized {
        conn.execute(
            "INSERT OR IGNORE INTO entity_tags (entity_type, entity_id, tag) VALUES (?1, ?2, ?3)",
            params![entity_type.as_str(), entity_id, tag],
        )?;
    }
    Ok(normalized)
}

/// Loads the entity's tags, alphabetically.
pub(crate) fn get_tags_on_conn(
    conn: &Connection,
    entity_type: &EntityType,
    entity_id: &str,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT tag FROM entity_tags WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY tag",
    )?;
    let rows = stmt.query_map(params![entity_type.as_str(), entity_id], |row| {
        row.get::<_, String>(0)
    })?;
    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

/// Drops all tag rows owned by the entity. Used by the delete cascades.
pub(crate) fn delete_tags_on_conn(
    conn: &Connection,
    entity_type: &EntityType,
    entity_id: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM entity_tags WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
    )?;
    Ok(())
}

fn usages_of_on_conn(conn: &Connection, tag: &str) -> Result<Vec<TagUsage>> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id FROM entity_tags WHERE tag = ?1
         ORDER BY entity_type, entity_id",
    )?;
    let rows = stmt.query_map(params![tag], |row| {
        Ok(TagUsage {
            entity_type: EntityType::from(row.get::<_, String>(0)?),
            entity_id: row.get(1)?,
        })
    })?;
    let mut usages = Vec::new();
    for row in rows {
        usages.push(row?);
    }
    Ok(usages)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Lists tags with reference counts, optionally restricted to one entity
    /// type. Sorted by `(count DESC, tag ASC)`.
    pub fn list_tags(&self, entity_type: Option<EntityType>) -> Result<Vec<TagCount>> {
        let conn = self.lock_conn()?;
        let mut out = Vec::new();
        match entity_type {
            Some(ty) => {
                let mut stmt = conn.prepare(
                    "SELECT tag, COUNT(*) FROM entity_tags WHERE entity_type = ?1
                     GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC",
                )?;
                let rows = stmt.query_map(params![ty.as_str()], |row| {
                    Ok(TagCount {
                        tag: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT tag, COUNT(*) FROM entity_tags
                     GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(TagCount {
                        tag: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Finds every entity referencing the tag (normalized before lookup).
    pub fn tag_usage(&self, tag: &str) -> Result<Vec<TagUsage>> {
        let normalized = normalize_tag(tag);
        if normalized.is_empty() {
            return Err(StoreError::validation("tag must not be empty"));
        }
        let conn = self.lock_conn()?;
        usages_of_on_conn(&conn, &normalized)
    }

    /// Renames a tag across every referencing row. When the target row
    /// already carries the new tag, the old row is simply deleted (no-op
    /// merge). `dry_run` returns the affected rows without mutating.
    pub fn rename_tag(&self, old: &str, new: &str, dry_run: bool) -> Result<Vec<TagUsage>> {
        let old = normalize_tag(old);
        let new = normalize_tag(new);
        if old.is_empty() || new.is_empty() {
            return Err(StoreError::validation("tag must not be empty"));
        }
        if old == new {
            return Err(StoreError::validation(
                "old and new tag are identical after normalization",
            ));
        }

        if dry_run {
            let conn = self.lock_conn()?;
            return usages_of_on_conn(&conn, &old);
        }

        self.with_tx(|conn| {
            let affected = usages_of_on_conn(conn, &old)?;
            for usage in &affected {
                let has_new: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entity_tags
                     WHERE entity_type = ?1 AND entity_id = ?2 AND tag = ?3",
                    params![usage.entity_type.as_str(), usage.entity_id, new],
                    |row| row.get(0),
                )?;
                if has_new > 0 {
                    conn.execute(
                        "DELETE FROM entity_tags
                         WHERE entity_type = ?1 AND entity_id = ?2 AND tag = ?3",
                        params![usage.entity_type.as_str(), usage.entity_id, old],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE entity_tags SET tag = ?4
                         WHERE entity_type = ?1 AND entity_id = ?2 AND tag = ?3",
                        params![usage.entity_type.as_str(), usage.entity_id, old, new],
                    )?;
                }
            }
            Ok(affected)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seed(store: &SqliteStore, ty: EntityType, id: &str, tags: &[&str]) {
        let conn = store.lock_conn().unwrap();
        let owned: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        set_tags_on_conn(&conn, &ty, id, &owned).unwrap();
    }

    #[test]
    fn set_tags_normalizes_and_replaces() {
        let store = test_store();
        seed(&store, EntityType::Project, "p1", &["  API ", "Backend", "api"]);

        let conn = store.lock_conn().unwrap();
        let tags = get_tags_on_conn(&conn, &EntityType::Project, "p1").unwrap();
        assert_eq!(tags, vec!["api", "backend"]);
        drop(conn);

        // A second write replaces the whole set.
        seed(&store, EntityType::Project, "p1", &["fresh"]);
        let conn = store.lock_conn().unwrap();
        let tags = get_tags_on_conn(&conn, &EntityType::Project, "p1").unwrap();
        assert_eq!(tags, vec!["fresh"]);
    }

    #[test]
    fn list_tags_sorted_by_count_then_name() {
        let store = test_store();
        seed(&store, EntityType::Project, "p1", &["common", "zed"]);
        seed(&store, EntityType::Feature, "f1", &["common", "alpha"]);

        let counts = store.list_tags(None).unwrap();
        assert_eq!(counts[0], TagCount { tag: "common".into(), count: 2 });
        assert_eq!(counts[1].tag, "alpha");
        assert_eq!(counts[2].tag, "zed");
    }

    #[test]
    fn list_tags_filtered_by_entity_type() {
        let store = test_store();
        seed(&store, EntityType::Project, "p1", &["shared"]);
        seed(&store, EntityType::Task, "t1", &["shared", "tasky"]);

        let counts = store.list_tags(Some(EntityType::Task)).unwrap();
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().all(|c| c.count == 1));
    }

    #[test]
    fn usage_normalizes_lookup() {
        let store = test_store();
        seed(&store, EntityType::Feature, "f1", &["infra"]);

        let usages = store.tag_usage("  INFRA ").unwrap();
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[0].entity_id, "f1");
    }

    #[test]
    fn rename_moves_and_merges() {
        let store = test_store();
        seed(&store, EntityType::Project, "p1", &["old"]);
        seed(&store, EntityType::Feature, "f1", &["old", "new"]);

        let affected = store.rename_tag("old", "new", false).unwrap();
        assert_eq!(affected.len(), 2);

        let conn = store.lock_conn().unwrap();
        let p1 = get_tags_on_conn(&conn, &EntityType::Project, "p1").unwrap();
        assert_eq!(p1, vec!["new"]);
        // f1 already had "new": the old row merged away.
        let f1 = get_tags_on_conn(&conn, &EntityType::Feature, "f1").unwrap();
        assert_eq!(f1, vec!["new"]);
    }

    #[test]
    fn rename_dry_run_mutates_nothing() {
        let store = test_store();
        seed(&store, EntityType::Project, "p1", &["old"]);

        let affected = store.rename_tag("old", "new", true).unwrap();
        assert_eq!(affected.len(), 1);

        let conn = store.lock_conn().unwrap();
        let tags = get_tags_on_conn(&conn, &EntityType::Project, "p1").unwrap();
        assert_eq!(tags, vec!["old"]);
    }

    #[test]
    fn rename_rejects_empty_and_identical() {
        let store = test_store();
        assert!(store.rename_tag("", "x", false).is_err());
        assert!(store.rename_tag("Same", " same ", false).is_err());
    }
}
