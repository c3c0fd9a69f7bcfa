//! Template CRUD and application for [`SqliteStore`].
//!
//! A template's own sections live in the `sections` table under the
//! `template` owner type; applying a template clones them onto the target
//! entity after its current highest ordinal.

use rusqlite::{Connection, Row, params};

use trellis_core::enums::EntityType;
use trellis_core::idgen::new_entity_id;
use trellis_core::section::{NewSection, Section};
use trellis_core::template::{NewTemplate, Template, TemplateUpdate};
use trellis_core::validation::require_field;

use crate::error::{Result, StoreError};
use crate::sqlite::sections::{
    SECTION_COLUMNS, delete_sections_for_entity_on_conn, insert_section_on_conn, scan_section,
};
use crate::sqlite::store::{SqliteStore, format_datetime, optional, parse_datetime};

/// All template columns in a deterministic order for SELECT queries.
pub(crate) const TEMPLATE_COLUMNS: &str = "id, name, description, is_built_in, is_protected, \
     is_enabled, version, created_at, modified_at";

/// Deserialises a row into a [`Template`].
///
/// The column order MUST match [`TEMPLATE_COLUMNS`].
pub(crate) fn scan_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        is_built_in: row.get::<_, i64>("is_built_in")? != 0,
        is_protected: row.get::<_, i64>("is_protected")? != 0,
        is_enabled: row.get::<_, i64>("is_enabled")? != 0,
        version: row.get("version")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        modified_at: parse_datetime(&row.get::<_, String>("modified_at")?),
    })
}

pub(crate) fn get_template_on_conn(conn: &Connection, id: &str) -> Result<Template> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1");
    optional(conn.query_row(&sql, params![id], scan_template))?
        .ok_or_else(|| StoreError::not_found("template", id))
}

impl SqliteStore {
    /// Creates a template (enabled by default, no sections yet).
    pub fn create_template(&self, new: &NewTemplate) -> Result<Template> {
        let name = require_field("name", &new.name)?;
        let id = new_entity_id();
        let now_str = format_datetime(&Self::now());

        self.with_tx(|conn| {
            conn.execute(
                "INSERT INTO templates (id, name, description, is_built_in, is_protected,
                                        is_enabled, version, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?6)",
                params![
                    id,
                    name,
                    new.description,
                    new.is_built_in as i64,
                    new.is_protected as i64,
                    now_str
                ],
            )?;
            get_template_on_conn(conn, &id)
        })
    }

    /// Fetches a template by id.
    pub fn get_template(&self, id: &str) -> Result<Template> {
        let conn = self.lock_conn()?;
        get_template_on_conn(&conn, id)
    }

    /// Lists templates alphabetically. Disabled ones are included only on
    /// request.
    pub fn list_templates(&self, include_disabled: bool) -> Result<Vec<Template>> {
        let conn = self.lock_conn()?;
        let sql = if include_disabled {
            format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY name")
        } else {
            format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE is_enabled = 1 ORDER BY name")
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], scan_template)?;
        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?);
        }
        Ok(templates)
    }

    /// Applies a partial update. Protected templates accept only the
    /// `is_enabled` toggle.
    pub fn update_template(&self, id: &str, update: &TemplateUpdate) -> Result<Template> {
        self.with_tx(|conn| {
            let current = get_template_on_conn(conn, id)?;
            if current.version != update.expected_version {
                return Err(StoreError::conflict(format!(
                    "template {id} version mismatch: expected {}, found {}",
                    update.expected_version, current.version
                )));
            }
            if current.is_protected && (update.name.is_some() || update.description.is_some()) {
                return Err(StoreError::validation(format!(
                    "template {id} is protected and cannot be edited"
                )));
            }

            let name = match &update.name {
                Some(n) => require_field("name", n)?,
                None => current.name.clone(),
            };
            let description = update
                .description
                .clone()
                .unwrap_or(current.description.clone());
            let is_enabled = update.is_enabled.unwrap_or(current.is_enabled);

            let affected = conn.execute(
                "UPDATE templates SET name = ?1, description = ?2, is_enabled = ?3,
                        version = version + 1, modified_at = ?4
                 WHERE id = ?5 AND version = ?6",
                params![
                    name,
                    description,
                    is_enabled as i64,
                    format_datetime(&Self::now()),
                    id,
                    update.expected_version
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::conflict(format!(
                    "template {id} was modified concurrently"
                )));
            }
            get_template_on_conn(conn, id)
        })
    }

    /// Deletes a template and its sections. Protected templates refuse.
    pub fn delete_template(&self, id: &str) -> Result<()> {
        self.with_tx(|conn| {
            let template = get_template_on_conn(conn, id)?;
            if template.is_protected {
                return Err(StoreError::validation(format!(
                    "template {id} is protected and cannot be deleted"
                )));
            }
            delete_sections_for_entity_on_conn(conn, &EntityType::Template, id)?;
            conn.execute("DELETE FROM templates WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Clones an enabled template's sections onto the target entity,
    /// appending after the target's current highest ordinal.
    pub fn apply_template(
        &self,
        template_id: &str,
        target_type: EntityType,
        target_id: &str,
    ) -> Result<Vec<Section>> {
        self.with_tx(|conn| {
            let template = get_template_on_conn(conn, template_id)?;
            if !template.is_enabled {
                return Err(StoreError::validation(format!(
                    "template {template_id} is disabled"
                )));
            }

            let sql = format!(
                "SELECT {SECTION_COLUMNS} FROM sections
                 WHERE entity_type = 'template' AND entity_id = ?1 ORDER BY ordinal"
            );
            let mut stmt = conn.prepare(&sql)?;
            let blueprint: Vec<Section> = stmt
                .query_map(params![template_id], scan_section)?
                .collect::<std::result::Result<_, _>>()?;

            let mut created = Vec::with_capacity(blueprint.len());
            for section in blueprint {
                // Ordinal is left unset so each clone appends in turn.
                let clone = NewSection {
                    entity_type: target_type.clone(),
                    entity_id: target_id.to_owned(),
                    title: section.title,
                    usage_description: section.usage_description,
                    content: section.content,
                    content_format: Some(section.content_format),
                    ordinal: None,
                    tags: Some(section.tags),
                };
                created.push(insert_section_on_conn(conn, &clone)?);
            }
            Ok(created)
        })
    }
}
