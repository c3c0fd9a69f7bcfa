//! Project / Feature / Task -- the central domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocker::Blocker;
use crate::enums::{Priority, WorkState};

/// Top-level board. Stateless in the v3 model: the legacy `status` column is
/// carried through for old data but never validated or written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,

    /// Unique across all projects.
    pub name: String,

    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Read-only remnant of the v2 schema. Writers leave it untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_status: Option<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A deliverable inside a project. Status-bearing.
///
/// The project link is nullable: orphan features can exist transiently during
/// migration and are reattached by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub name: String,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: WorkState,
    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<Blocker>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_to: Vec<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A unit of work inside a feature. Status-bearing.
///
/// `project_id` is always derived from the owning feature at creation time,
/// never supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub title: String,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: WorkState,
    pub priority: Priority,

    /// Effort estimate on a 1..=10 scale.
    pub complexity: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<Blocker>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_to: Vec<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Create payloads
// ---------------------------------------------------------------------------

/// Caller-supplied fields for creating a project.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Caller-supplied fields for creating a feature.
#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    pub project_id: Option<String>,
    pub name: String,
    pub summary: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
}

/// Caller-supplied fields for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub feature_id: String,
    pub title: String,
    pub summary: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub complexity: i32,
    pub tags: Vec<String>,
}

impl Default for NewTask {
    fn default() -> Self {
        Self {
            feature_id: String::new(),
            title: String::new(),
            summary: String::new(),
            description: None,
            priority: Priority::default(),
            complexity: 5,
            tags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Update payloads (optimistic concurrency)
// ---------------------------------------------------------------------------

/// Partial update for a project. `None` fields are left untouched; a supplied
/// tag set replaces the stored one after normalization.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub expected_version: i64,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

/// Partial update for a feature.
#[derive(Debug, Clone, Default)]
pub struct FeatureUpdate {
    pub expected_version: i64,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<WorkState>,
    pub priority: Option<Priority>,
    pub related_to: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

/// Partial update for a task.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub expected_version: i64,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<WorkState>,
    pub priority: Option<Priority>,
    pub complexity: Option<i32>,
    pub related_to: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Denormalized helpers
// ---------------------------------------------------------------------------

/// Builds the lowercase search vector from an entity's text fields.
///
/// Fields are joined with `|`; absent ones contribute an empty segment so the
/// vector stays stable when a description is added later.
pub fn build_search_vector(name: &str, summary: &str, description: Option<&str>) -> String {
    format!(
        "{}|{}|{}",
        name.to_lowercase(),
        summary.to_lowercase(),
        description.unwrap_or_default().to_lowercase()
    )
}

/// Normalizes a tag set for storage: trim, lowercase, drop empties,
/// deduplicate preserving first occurrence.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let t = tag.as_ref().trim().to_lowercase();
        if t.is_empty() {
            continue;
        }
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

/// Normalizes a single tag the same way tag rows are stored.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
