//! Section templates: blueprints for bulk-creating sections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named blueprint whose sections (owned under the `template` entity type)
/// are cloned onto a target entity when applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,

    /// Unique across all templates.
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Shipped with the system rather than user-created.
    pub is_built_in: bool,

    /// Protected templates refuse mutation and deletion.
    pub is_protected: bool,

    /// Disabled templates refuse application.
    pub is_enabled: bool,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating a template.
#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub name: String,
    pub description: String,
    pub is_built_in: bool,
    pub is_protected: bool,
}

/// Partial update for a template. Protected templates accept only the
/// `is_enabled` toggle.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub expected_version: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_enabled: Option<bool>,
}
