//! Ordered narrative sections attached to an entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ContentFormat, EntityType};

/// A titled block of content owned by exactly one entity.
///
/// Ordinals for a given `(entity_type, entity_id)` are densely packed from 0
/// after any reorder; `(entity_type, entity_id, ordinal)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub title: String,

    /// What this section is for, shown to authors picking where to write.
    pub usage_description: String,

    pub content: String,
    pub content_format: ContentFormat,
    pub ordinal: i64,

    /// Free-form tag string, unlike entity tags which are rows.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Caller-supplied fields for adding a section.
#[derive(Debug, Clone, Default)]
pub struct NewSection {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub title: String,
    pub usage_description: String,
    pub content: String,
    pub content_format: Option<ContentFormat>,
    /// `None` appends after the current highest ordinal.
    pub ordinal: Option<i64>,
    pub tags: Option<String>,
}

/// Partial update for a section.
#[derive(Debug, Clone, Default)]
pub struct SectionUpdate {
    pub expected_version: i64,
    pub title: Option<String>,
    pub usage_description: Option<String>,
    pub content: Option<String>,
    pub content_format: Option<ContentFormat>,
    pub tags: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_serde_roundtrip() {
        let s = Section {
            id: "f".repeat(32),
            entity_type: EntityType::Feature,
            entity_id: "0".repeat(32),
            title: "Design".into(),
            usage_description: "architecture notes".into(),
            content: "## Approach".into(),
            content_format: ContentFormat::Markdown,
            ordinal: 0,
            tags: String::new(),
            version: 1,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Section = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entity_type, EntityType::Feature);
        assert_eq!(back.ordinal, 0);
    }
}
