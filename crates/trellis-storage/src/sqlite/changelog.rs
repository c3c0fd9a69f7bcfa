//! Append-only changelog entries under atoms and molecules.
//!
//! Entries are never updated or deleted individually; they disappear only as
//! a side effect of deleting their parent.

use rusqlite::{Connection, Row, params};

use trellis_core::enums::KnowledgeParent;
use trellis_core::idgen::new_entity_id;
use trellis_core::knowledge::ChangelogEntry;
use trellis_core::validation::validate_changelog_summary;

use crate::error::{Result, StoreError};
use crate::sqlite::store::{SqliteStore, format_datetime, parse_datetime};

/// All changelog columns in a deterministic order for SELECT queries.
pub(crate) const CHANGELOG_COLUMNS: &str =
    "id, parent_type, parent_id, task_id, summary, created_at";

/// Deserialises a row into a [`ChangelogEntry`].
///
/// The column order MUST match [`CHANGELOG_COLUMNS`].
pub(crate) fn scan_changelog(row: &Row<'_>) -> rusqlite::Result<ChangelogEntry> {
    Ok(ChangelogEntry {
        id: row.get("id")?,
        parent_type: row.get::<_, String>("parent_type")?.into(),
        parent_id: row.get("parent_id")?,
        task_id: row.get("task_id")?,
        summary: row.get("summary")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

impl SqliteStore {
    /// Appends an entry under an atom or molecule. The parent and the
    /// referenced task must exist; the summary must be 1..=4096 bytes.
    pub fn append_changelog(
        &self,
        parent_type: KnowledgeParent,
        parent_id: &str,
        task_id: &str,
        summary: &str,
    ) -> Result<ChangelogEntry> {
        validate_changelog_summary(summary)?;

        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());

        self.with_tx(|conn| {
            check_parent_exists(conn, &parent_type, parent_id)?;
            let task_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )?;
            if task_count == 0 {
                return Err(StoreError::not_found("task", task_id));
            }

            conn.execute(
                "INSERT INTO changelog (id, parent_type, parent_id, task_id, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, parent_type.as_str(), parent_id, task_id, summary, now_str],
            )?;

            let sql = format!("SELECT {CHANGELOG_COLUMNS} FROM changelog WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], scan_changelog)?)
        })
    }

    /// Lists a parent's entries, oldest first.
    pub fn list_changelog(
        &self,
        parent_type: KnowledgeParent,
        parent_id: &str,
    ) -> Result<Vec<ChangelogEntry>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {CHANGELOG_COLUMNS} FROM changelog
             WHERE parent_type = ?1 AND parent_id = ?2 ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![parent_type.as_str(), parent_id], scan_changelog)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn check_parent_exists(
    conn: &Connection,
    parent_type: &KnowledgeParent,
    parent_id: &str,
) -> Result<()> {
    let (table, entity): (&str, &'static str) = match parent_type {
        KnowledgeParent::Atom => ("atoms", "atom"),
        KnowledgeParent::Molecule => ("molecules", "molecule"),
        KnowledgeParent::Custom(_) => {
            return Err(StoreError::validation(format!(
                "unknown changelog parent type: {parent_type}"
            )));
        }
    };
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE id = ?1"),
        params![parent_id],
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(StoreError::not_found(entity, parent_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::entity::{NewFeature, NewProject, NewTask};
    use trellis_core::knowledge::NewAtom;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seed(store: &SqliteStore) -> (String, String, String) {
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
        let atom = store
            .create_atom(&NewAtom {
                project_id: project.id.clone(),
                paths: vec!["src/**".into()],
                ..NewAtom::default()
            })
            .unwrap();
        (project.id, task.id, atom.id)
    }

    #[test]
    fn append_and_list_in_order() {
        let store = test_store();
        let (_, task_id, atom_id) = seed(&store);

        store
            .append_changelog(KnowledgeParent::Atom, &atom_id, &task_id, "first")
            .unwrap();
        store
            .append_changelog(KnowledgeParent::Atom, &atom_id, &task_id, "second")
            .unwrap();

        let entries = store.list_changelog(KnowledgeParent::Atom, &atom_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].summary, "first");
        assert_eq!(entries[1].summary, "second");
    }

    #[test]
    fn append_requires_existing_parent_and_task() {
        let store = test_store();
        let (_, task_id, atom_id) = seed(&store);

        let err = store
            .append_changelog(KnowledgeParent::Atom, "missing", &task_id, "x")
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .append_changelog(KnowledgeParent::Atom, &atom_id, "missing", "x")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn summary_bounds_enforced() {
        let store = test_store();
        let (_, task_id, atom_id) = seed(&store);

        let err = store
            .append_changelog(KnowledgeParent::Atom, &atom_id, &task_id, "")
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let big = "x".repeat(4097);
        let err = store
            .append_changelog(KnowledgeParent::Atom, &atom_id, &task_id, &big)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn entries_die_with_their_atom() {
        let store = test_store();
        let (_, task_id, atom_id) = seed(&store);
        store
            .append_changelog(KnowledgeParent::Atom, &atom_id, &task_id, "note")
            .unwrap();

        store.delete_atom(&atom_id).unwrap();
        let entries = store.list_changelog(KnowledgeParent::Atom, &atom_id).unwrap();
        assert!(entries.is_empty());
    }
}
