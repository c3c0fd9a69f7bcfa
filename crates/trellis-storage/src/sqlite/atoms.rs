//! Atom CRUD and the glob-based path lookup for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use trellis_core::glob::path_matches;
use trellis_core::idgen::new_entity_id;
use trellis_core::knowledge::{
    Atom, AtomMatch, AtomUpdate, KnowledgeMode, NewAtom, PathLookup, append_separator,
};
use trellis_core::validation::{validate_atom_paths, validate_knowledge, validate_related_refs};

use crate::error::{Result, StoreError};
use crate::sqlite::molecules::get_molecule_on_conn;
use crate::sqlite::projects::project_exists_on_conn;
use crate::sqlite::store::{
    SqliteStore, format_datetime, json_vec, optional, parse_datetime, to_json,
};

/// All atom columns in a deterministic order for SELECT queries.
pub(crate) const ATOM_COLUMNS: &str = "id, project_id, paths, knowledge, related_atoms, \
     molecule_id, created_by_task, updated_by_task, version, created_at, modified_at";

/// Deserialises a row into an [`Atom`].
///
/// The column order MUST match [`ATOM_COLUMNS`].
pub(crate) fn scan_atom(row: &Row<'_>) -> rusqlite::Result<Atom> {
    Ok(Atom {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        paths: json_vec(&row.get::<_, String>("paths")?),
        knowledge: row.get("knowledge")?,
        related_atoms: json_vec(&row.get::<_, String>("related_atoms")?),
        molecule_id: row.get("molecule_id")?,
        created_by_task: row.get("created_by_task")?,
        updated_by_task: row.get("updated_by_task")?,
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
    })
}

pub(crate) fn get_atom_on_conn(conn: &Connection, id: &str) -> Result<Atom> {
    let sql = format!("SELECT {ATOM_COLUMNS} FROM atoms WHERE id = ?1");
    optional(conn.query_row(&sql, params![id], scan_atom))?
        .ok_or_else(|| StoreError::not_found("atom", id))
}

/// Rejects molecule links that cross project boundaries.
fn check_molecule_link(conn: &Connection, atom_project: &str, molecule_id: &str) -> Result<()> {
    let molecule = get_molecule_on_conn(conn, molecule_id)?;
    if molecule.project_id != atom_project {
        return Err(StoreError::invariant(format!(
            "molecule {molecule_id} belongs to project {}, not {atom_project}",
            molecule.project_id
        )));
    }
    Ok(())
}

impl SqliteStore {
    /// Creates an atom inside a project.
    pub fn create_atom(&self, new: &NewAtom) -> Result<Atom> {
        validate_atom_paths(&new.paths)?;
        validate_knowledge(new.knowledge.as_deref())?;
        validate_related_refs(&new.related_atoms)?;

        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());

        self.with_tx(|conn| {
            if !project_exists_on_conn(conn, &new.project_id)? {
                return Err(StoreError::not_found("project", new.project_id.clone()));
            }
            if let Some(molecule_id) = &new.molecule_id {
                check_molecule_link(conn, &new.project_id, molecule_id)?;
            }
            conn.execute(
                "INSERT INTO atoms (id, project_id, paths, knowledge, related_atoms, molecule_id,
                                    created_by_task, version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
                params![
                    id,
                    new.project_id,
                    to_json(&new.paths)?,
                    new.knowledge,
                    to_json(&new.related_atoms)?,
                    new.molecule_id,
                    new.created_by_task,
                    now_str
                ],
            )?;
            get_atom_on_conn(conn, &id)
        })
    }

    /// Fetches an atom by id.
    pub fn get_atom(&self, id: &str) -> Result<Atom> {
        let conn = self.lock_conn()?;
        get_atom_on_conn(&conn, id)
    }

    /// Lists a project's atoms, newest first.
    pub fn list_atoms(&self, project_id: &str) -> Result<Vec<Atom>> {
        let conn = self.lock_conn()?;
        list_atoms_on_conn(&conn, project_id)
    }

    /// Applies a partial update under the caller's expected version.
    pub fn update_atom(&self, id: &str, update: &AtomUpdate) -> Result<Atom> {
        if let Some(paths) = &update.paths {
            validate_atom_paths(paths)?;
        }
        if let Some(refs) = &update.related_atoms {
            validate_related_refs(refs)?;
        }
        self.with_tx(|conn| {
            let current = get_atom_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "atom {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let molecule_id = match &update.molecule_id {
                Some(new_link) => {
                    if let Some(molecule_id) = new_link {
                        check_molecule_link(conn, &current.project_id, molecule_id)?;
                    }
                    new_link.clone()
                }
                None => current.molecule_id.clone(),
            };
            let paths = match &update.paths {
                Some(p) => p.clone(),
                None => current.paths.clone(),
            };
            let related = match &update.related_atoms {
                Some(r) => r.clone(),
                None => current.related_atoms.clone(),
            };
            let updated_by = update
                .updated_by_task
                .clone()
                .or(current.updated_by_task.clone());

            let affected = conn.execute(
                "UPDATE atoms SET paths = ?1, related_atoms = ?2, molecule_id = ?3,
                        updated_by_task = ?4, version = version + 1, modified_at = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    to_json(&paths)?,
                    to_json(&related)?,
                    molecule_id,
                    updated_by,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "atom {id} was modified concurrently"
                )));
            }
            get_atom_on_conn(conn, id)
        })
    }

    /// Rewrites or extends an atom's knowledge blob. Append mode separates
    /// the new text with a `---[<timestamp> task:<id>]---` line.
    pub fn update_atom_knowledge(
        &self,
        id: &str,
        expected_version: i64,
        text: &str,
        mode: KnowledgeMode,
        task_id: &str,
    ) -> Result<Atom> {
        self.with_tx(|conn| {
            let current = get_atom_on_conn(conn, id)?;
            if current.version != expected_version {
                return Err(StoreError::conflict(format!(
                    "atom {id} version mismatch: expected {expected_version}, found {}",
                    current.version
                )));
            }

            let now = Self::now();
            let knowledge = match mode {
                KnowledgeMode::Overwrite => text.to_owned(),
                KnowledgeMode::Append => match &current.knowledge {
                    Some(existing) if !existing.is_empty() => {
                        format!("{existing}\n{}\n{text}", append_separator(&now, task_id))
                    }
                    _ => text.to_owned(),
                },
            };
            validate_knowledge(Some(&knowledge))?;

            let affected = conn.execute(
                "UPDATE atoms SET knowledge = ?1, updated_by_task = ?2,
                        version = version + 1, modified_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![knowledge, task_id, format_datetime(&now), id, expected_version],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "atom {id} was modified concurrently"
                )));
            }
            get_atom_on_conn(conn, id)
        })
    }

    /// Deletes an atom and its changelog rows.
    pub fn delete_atom(&self, id: &str) -> Result<()> {
        self.with_tx(|conn| {
            get_atom_on_conn(conn, id)?;
            conn.execute(
                "DELETE FROM changelog WHERE parent_type = 'atom' AND parent_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM atoms WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Resolves file paths to the project's atoms by glob matching.
    ///
    /// Every atom whose pattern list matches at least one input path is
    /// returned with the matched subset; a path may hit several atoms. Paths
    /// that hit nothing come back in `unmatched_paths`, in input order.
    pub fn find_atoms_by_paths(&self, project_id: &str, paths: &[String]) -> Result<PathLookup> {
        let conn = self.lock_conn()?;
        let atoms = list_atoms_on_conn(&conn, project_id)?;

        let mut lookup = PathLookup::default();
        let mut matched_any = vec![false; paths.len()];

        for atom in atoms {
            let matched: Vec<String> = paths
                .iter()
                .enumerate()
                .filter(|(i, path)| {
                    let hit = atom.paths.iter().any(|pattern| path_matches(pattern, path));
                    if hit {
                        matched_any[*i] = true;
                    }
                    hit
                })
                .map(|(_, path)| path.clone())
                .collect();
            if !matched.is_empty() {
                lookup.atoms.push(AtomMatch {
                    atom,
                    matched_paths: matched,
                });
            }
        }

        lookup.unmatched_paths = paths
            .iter()
            .zip(matched_any)
            .filter(|(_, hit)| !hit)
            .map(|(path, _)| path.clone())
            .collect();
        Ok(lookup)
    }
}

fn list_atoms_on_conn(conn: &Connection, project_id: &str) -> Result<Vec<Atom>> {
    let sql =
        format!("SELECT {ATOM_COLUMNS} FROM atoms WHERE project_id = ?1 ORDER BY created_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id], scan_atom)?;
    let mut atoms = Vec::new();
    for row in rows {
        atoms.push(row?);
    }
    Ok(atoms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::entity::NewProject;
    use trellis_core::knowledge::NewMolecule;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seed_project(store: &SqliteStore, name: &str) -> String {
        store
            .create_project(&NewProject {
                name: name.into(),
                summary: "board".into(),
                ..NewProject::default()
            })
            .unwrap()
            .id
    }

    fn new_atom(project_id: &str, patterns: &[&str]) -> NewAtom {
        NewAtom {
            project_id: project_id.to_owned(),
            paths: patterns.iter().map(|p| p.to_string()).collect(),
            ..NewAtom::default()
        }
    }

    #[test]
    fn create_validates_paths() {
        let store = test_store();
        let project_id = seed_project(&store, "P");

        let err = store.create_atom(&new_atom(&project_id, &[])).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = store
            .create_atom(&new_atom(&project_id, &["../escape"]))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let atom = store
            .create_atom(&new_atom(&project_id, &["src/**/*.rs"]))
            .unwrap();
        assert_eq!(atom.version, 1);
    }

    #[test]
    fn cross_project_molecule_link_is_invariant_violation() {
        let store = test_store();
        let project_a = seed_project(&store, "A");
        let project_b = seed_project(&store, "B");
        let molecule_b = store
            .create_molecule(&NewMolecule {
                project_id: project_b,
                name: "other".into(),
                ..NewMolecule::default()
            })
            .unwrap();

        let err = store
            .create_atom(&NewAtom {
                molecule_id: Some(molecule_b.id.clone()),
                ..new_atom(&project_a, &["src/**"])
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");

        // Same check on re-assignment.
        let atom = store.create_atom(&new_atom(&project_a, &["src/**"])).unwrap();
        let err = store
            .update_atom(
                &atom.id,
                &AtomUpdate {
                    expected_version: 1,
                    molecule_id: Some(Some(molecule_b.id)),
                    ..AtomUpdate::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn knowledge_append_adds_separator() {
        let store = test_store();
        let project_id = seed_project(&store, "P");
        let atom = store
            .create_atom(&NewAtom {
                knowledge: Some("first note".into()),
                ..new_atom(&project_id, &["src/**"])
            })
            .unwrap();

        let updated = store
            .update_atom_knowledge(&atom.id, 1, "second note", KnowledgeMode::Append, "task1")
            .unwrap();
        let knowledge = updated.knowledge.unwrap();
        assert!(knowledge.starts_with("first note\n---["));
        assert!(knowledge.contains("task:task1]---"));
        assert!(knowledge.ends_with("second note"));
        assert_eq!(updated.updated_by_task.as_deref(), Some("task1"));
    }

    #[test]
    fn knowledge_overwrite_replaces() {
        let store = test_store();
        let project_id = seed_project(&store, "P");
        let atom = store
            .create_atom(&NewAtom {
                knowledge: Some("old".into()),
                ..new_atom(&project_id, &["src/**"])
            })
            .unwrap();

        let updated = store
            .update_atom_knowledge(&atom.id, 1, "new", KnowledgeMode::Overwrite, "task1")
            .unwrap();
        assert_eq!(updated.knowledge.as_deref(), Some("new"));
    }

    #[test]
    fn append_to_empty_knowledge_has_no_separator() {
        let store = test_store();
        let project_id = seed_project(&store, "P");
        let atom = store.create_atom(&new_atom(&project_id, &["src/**"])).unwrap();

        let updated = store
            .update_atom_knowledge(&atom.id, 1, "only note", KnowledgeMode::Append, "task1")
            .unwrap();
        assert_eq!(updated.knowledge.as_deref(), Some("only note"));
    }

    #[test]
    fn path_lookup_reports_matches_and_misses() {
        let store = test_store();
        let project_id = seed_project(&store, "P");
        let a1 = store
            .create_atom(&new_atom(&project_id, &["src/**/*.ts"]))
            .unwrap();
        let a2 = store
            .create_atom(&new_atom(&project_id, &["**/index.ts"]))
            .unwrap();

        let lookup = store
            .find_atoms_by_paths(
                &project_id,
                &["src/index.ts".into(), "docs/readme.md".into()],
            )
            .unwrap();

        assert_eq!(lookup.atoms.len(), 2);
        for m in &lookup.atoms {
            assert!(m.atom.id == a1.id || m.atom.id == a2.id);
            assert_eq!(m.matched_paths, vec!["src/index.ts"]);
        }
        assert_eq!(lookup.unmatched_paths, vec!["docs/readme.md"]);
    }

    #[test]
    fn path_lookup_scopes_to_project() {
        let store = test_store();
        let project_a = seed_project(&store, "A");
        let project_b = seed_project(&store, "B");
        store.create_atom(&new_atom(&project_b, &["**/*.rs"])).unwrap();

        let lookup = store
            .find_atoms_by_paths(&project_a, &["src/lib.rs".into()])
            .unwrap();
        assert!(lookup.atoms.is_empty());
        assert_eq!(lookup.unmatched_paths, vec!["src/lib.rs"]);
    }
}
