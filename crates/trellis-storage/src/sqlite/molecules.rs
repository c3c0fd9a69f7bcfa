//! Molecule CRUD for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use trellis_core::idgen::new_entity_id;
use trellis_core::knowledge::{Molecule, MoleculeUpdate, NewMolecule};
use trellis_core::validation::{validate_knowledge, validate_molecule_name, validate_related_refs};

use crate::error::{Result, StoreError};
use crate::sqlite::projects::project_exists_on_conn;
use crate::sqlite::store::{
    SqliteStore, format_datetime, json_vec, optional, parse_datetime, to_json,
};

/// All molecule columns in a deterministic order for SELECT queries.
pub(crate) const MOLECULE_COLUMNS: &str =
    "id, project_id, name, knowledge, related_molecules, version, created_at, modified_at";

/// Deserialises a row into a [`Molecule`].
///
/// The column order MUST match [`MOLECULE_COLUMNS`].
pub(crate) fn scan_molecule(row: &Row<'_>) -> rusqlite::Result<Molecule> {
    Ok(Molecule {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        knowledge: row.get("knowledge")?,
        related_molecules: json_vec(&row.get::<_, String>("related_molecules")?),
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
    })
}

pub(crate) fn get_molecule_on_conn(conn: &Connection, id: &str) -> Result<Molecule> {
    let sql = format!("SELECT {MOLECULE_COLUMNS} FROM molecules WHERE id = ?1");
    optional(conn.query_row(&sql, params![id], scan_molecule))?
        .ok_or_else(|| StoreError::not_found("molecule", id))
}

impl SqliteStore {
    /// Creates a molecule inside a project.
    pub fn create_molecule(&self, new: &NewMolecule) -> Result<Molecule> {
        let name = validate_molecule_name(&new.name)?;
        validate_knowledge(new.knowledge.as_deref())?;
        validate_related_refs(&new.related_molecules)?;

        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());

        self.with_tx(|conn| {
            if !project_exists_on_conn(conn, &new.project_id)? {
                return Err(StoreError::not_found("project", new.project_id.clone()));
            }
            conn.execute(
                "INSERT INTO molecules (id, project_id, name, knowledge, related_molecules,
                                        version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    id,
                    new.project_id,
                    name,
                    new.knowledge,
                    to_json(&new.related_molecules)?,
                    now_str
                ],
            )?;
            get_molecule_on_conn(conn, &id)
        })
    }

    /// Fetches a molecule by id.
    pub fn get_molecule(&self, id: &str) -> Result<Molecule> {
        let conn = self.lock_conn()?;
        get_molecule_on_conn(&conn, id)
    }

    /// Lists a project's molecules, newest first.
    pub fn list_molecules(&self, project_id: &str) -> Result<Vec<Molecule>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {MOLECULE_COLUMNS} FROM molecules WHERE project_id = ?1
             ORDER BY created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], scan_molecule)?;
        let mut molecules = Vec::new();
        for row in rows {
            molecules.push(row?);
        }
        Ok(molecules)
    }

    /// Applies a partial update under the caller's expected version.
    pub fn update_molecule(&self, id: &str, update: &MoleculeUpdate) -> Result<Molecule> {
        if let Some(refs) = &update.related_molecules {
            validate_related_refs(refs)?;
        }
        self.with_tx(|conn| {
            let current = get_molecule_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "molecule {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }

            let name = match &update.name {
                Some(n) => validate_molecule_name(n)?,
                None => current.name.clone(),
            };
            let related = match &update.related_molecules {
                Some(r) => r.clone(),
                None => current.related_molecules.clone(),
            };

            let affected = conn.execute(
                "UPDATE molecules SET name = ?1, related_molecules = ?2,
                        version = version + 1, modified_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    name,
                    to_json(&related)?,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "molecule {id} was modified concurrently"
                )));
            }
            get_molecule_on_conn(conn, id)
        })
    }

    /// Deletes a molecule. Without `cascade`, member atoms are orphaned
    /// (their molecule link is nulled); with it, member atoms and their
    /// changelog rows are removed too.
    pub fn delete_molecule(&self, id: &str, cascade: bool) -> Result<()> {
        self.with_tx(|conn| {
            get_molecule_on_conn(conn, id)?;

            if cascade {
                conn.execute(
                    "DELETE FROM changelog WHERE parent_type = 'atom'
                       AND parent_id IN (SELECT id FROM atoms WHERE molecule_id = ?1)",
                    params![id],
                )?;
                conn.execute("DELETE FROM atoms WHERE molecule_id = ?1", params![id])?;
            } else {
                conn.execute(
                    "UPDATE atoms SET molecule_id = NULL, version = version + 1,
                            modified_at = ?2
                     WHERE molecule_id = ?1",
                    params![id, format_datetime(&Self::now())],
                )?;
            }

            conn.execute(
                "DELETE FROM changelog WHERE parent_type = 'molecule' AND parent_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM molecules WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}
