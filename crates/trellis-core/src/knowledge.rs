//! The knowledge graph triple: Atom, Molecule, Changelog entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::KnowledgeParent;

/// Maximum number of path patterns on an atom.
pub const MAX_ATOM_PATHS: usize = 20;
/// Maximum length of a single path pattern.
pub const MAX_PATH_LEN: usize = 512;
/// Maximum size of a knowledge blob in bytes.
pub const MAX_KNOWLEDGE_LEN: usize = 32 * 1024;
/// Maximum number of related-entity references.
pub const MAX_RELATED_REFS: usize = 50;
/// Maximum length of a molecule name.
pub const MAX_MOLECULE_NAME_LEN: usize = 255;
/// Maximum length of a changelog summary in bytes.
pub const MAX_CHANGELOG_SUMMARY_LEN: usize = 4096;

/// A knowledge record scoped to a project, describing a patch of code by an
/// ordered list of file-path glob patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub project_id: String,

    /// Ordered glob patterns; 1..=20 entries, each relative and `..`-free.
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_atoms: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub molecule_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_task: Option<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A grouping of atoms within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Molecule {
    pub id: String,
    pub project_id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_molecules: Vec<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// An append-only provenance record under an atom or molecule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: String,
    pub parent_type: KnowledgeParent,
    pub parent_id: String,
    pub task_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating an atom.
#[derive(Debug, Clone, Default)]
pub struct NewAtom {
    pub project_id: String,
    pub paths: Vec<String>,
    pub knowledge: Option<String>,
    pub related_atoms: Vec<String>,
    pub molecule_id: Option<String>,
    pub created_by_task: Option<String>,
}

/// Partial update for an atom. `molecule_id` uses the double-`Option` idiom:
/// `Some(None)` detaches the atom from its molecule.
#[derive(Debug, Clone, Default)]
pub struct AtomUpdate {
    pub expected_version: i64,
    pub paths: Option<Vec<String>>,
    pub related_atoms: Option<Vec<String>>,
    pub molecule_id: Option<Option<String>>,
    pub updated_by_task: Option<String>,
}

/// Caller-supplied fields for creating a molecule.
#[derive(Debug, Clone, Default)]
pub struct NewMolecule {
    pub project_id: String,
    pub name: String,
    pub knowledge: Option<String>,
    pub related_molecules: Vec<String>,
}

/// Partial update for a molecule.
#[derive(Debug, Clone, Default)]
pub struct MoleculeUpdate {
    pub expected_version: i64,
    pub name: Option<String>,
    pub related_molecules: Option<Vec<String>>,
}

/// How a knowledge update is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeMode {
    /// Replace the stored blob.
    Overwrite,
    /// Keep the stored blob and append below a separator line.
    Append,
}

/// Builds the separator line used by append-mode knowledge updates.
pub fn append_separator(timestamp: &DateTime<Utc>, task_id: &str) -> String {
    format!(
        "---[{} task:{}]---",
        timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        task_id
    )
}

/// One matched atom from a path lookup, with the subset of input paths that
/// hit one of its patterns.
#[derive(Debug, Clone)]
pub struct AtomMatch {
    pub atom: Atom,
    pub matched_paths: Vec<String>,
}

/// Result of resolving a list of file paths against a project's atoms.
#[derive(Debug, Clone, Default)]
pub struct PathLookup {
    pub atoms: Vec<AtomMatch>,
    /// Input paths that matched no atom, in input order.
    pub unmatched_paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_separator_shape() {
        let ts = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let sep = append_separator(&ts, "deadbeef");
        assert_eq!(sep, "---[2024-05-01T12:00:00.000Z task:deadbeef]---");
    }

    #[test]
    fn atom_serde_roundtrip() {
        let atom = Atom {
            id: "1".repeat(32),
            project_id: "2".repeat(32),
            paths: vec!["src/**/*.rs".into()],
            knowledge: Some("uses the builder idiom".into()),
            related_atoms: vec![],
            molecule_id: None,
            created_by_task: None,
            updated_by_task: None,
            version: 1,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };
        let json = serde_json::to_string(&atom).unwrap();
        let back: Atom = serde_json::from_str(&json).unwrap();
        assert_eq!(back.paths, vec!["src/**/*.rs"]);
    }
}
