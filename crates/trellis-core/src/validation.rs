//! Field validation rules shared by the repositories.

use crate::glob;
use crate::knowledge::{
    MAX_ATOM_PATHS, MAX_CHANGELOG_SUMMARY_LEN, MAX_KNOWLEDGE_LEN, MAX_MOLECULE_NAME_LEN,
    MAX_PATH_LEN, MAX_RELATED_REFS,
};

/// Error type for domain validation failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0} is required")]
    FieldRequired(&'static str),

    #[error("{field} must be {max} characters or less (got {got})")]
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },

    #[error("complexity must be between 1 and 10 (got {0})")]
    InvalidComplexity(i32),

    #[error("atom must carry between 1 and {MAX_ATOM_PATHS} path patterns (got {0})")]
    InvalidPathCount(usize),

    #[error("path pattern {path:?} is invalid: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("at most {MAX_RELATED_REFS} related references are allowed (got {0})")]
    TooManyRelatedRefs(usize),

    #[error("changelog summary must be between 1 and {MAX_CHANGELOG_SUMMARY_LEN} bytes (got {0})")]
    InvalidSummaryLength(usize),

    #[error("a NO_OP blocker requires a non-empty reason")]
    NoOpReasonRequired,
}

/// Trim-then-nonempty check; returns the trimmed value.
pub fn require_field(name: &'static str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::FieldRequired(name));
    }
    Ok(trimmed.to_owned())
}

/// Complexity is an integer on a 1..=10 scale.
pub fn validate_complexity(complexity: i32) -> Result<(), DomainError> {
    if !(1..=10).contains(&complexity) {
        return Err(DomainError::InvalidComplexity(complexity));
    }
    Ok(())
}

/// Validates an atom's path pattern list against the structural rules:
/// 1..=20 entries, each ≤512 chars, relative, forward-slash, no `..`
/// segments, syntactically valid glob.
pub fn validate_atom_paths(paths: &[String]) -> Result<(), DomainError> {
    if paths.is_empty() || paths.len() > MAX_ATOM_PATHS {
        return Err(DomainError::InvalidPathCount(paths.len()));
    }
    for path in paths {
        if path.is_empty() {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "empty pattern",
            });
        }
        if path.len() > MAX_PATH_LEN {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "longer than 512 characters",
            });
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "must be relative",
            });
        }
        if path.contains('\\') {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "must use forward slashes",
            });
        }
        if path.split('/').any(|seg| seg == "..") {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "must not contain '..'",
            });
        }
        if !glob::is_valid_pattern(path) {
            return Err(DomainError::InvalidPath {
                path: path.clone(),
                reason: "malformed glob syntax",
            });
        }
    }
    Ok(())
}

/// Knowledge blobs are capped at 32 KiB.
pub fn validate_knowledge(knowledge: Option<&str>) -> Result<(), DomainError> {
    if let Some(k) = knowledge {
        if k.len() > MAX_KNOWLEDGE_LEN {
            return Err(DomainError::TooLong {
                field: "knowledge",
                max: MAX_KNOWLEDGE_LEN,
                got: k.len(),
            });
        }
    }
    Ok(())
}

/// Related-entity reference lists are capped at 50 entries.
pub fn validate_related_refs(refs: &[String]) -> Result<(), DomainError> {
    if refs.len() > MAX_RELATED_REFS {
        return Err(DomainError::TooManyRelatedRefs(refs.len()));
    }
    Ok(())
}

/// Molecule names are capped at 255 characters.
pub fn validate_molecule_name(name: &str) -> Result<String, DomainError> {
    let name = require_field("name", name)?;
    if name.len() > MAX_MOLECULE_NAME_LEN {
        return Err(DomainError::TooLong {
            field: "name",
            max: MAX_MOLECULE_NAME_LEN,
            got: name.len(),
        });
    }
    Ok(name)
}

/// Changelog summaries are non-empty and at most 4 KiB.
pub fn validate_changelog_summary(summary: &str) -> Result<(), DomainError> {
    if summary.is_empty() || summary.len() > MAX_CHANGELOG_SUMMARY_LEN {
        return Err(DomainError::InvalidSummaryLength(summary.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_field_trims() {
        assert_eq!(require_field("name", "  hello  ").unwrap(), "hello");
        assert_eq!(
            require_field("name", "   ").unwrap_err(),
            DomainError::FieldRequired("name")
        );
    }

    #[test]
    fn complexity_bounds() {
        assert!(validate_complexity(1).is_ok());
        assert!(validate_complexity(10).is_ok());
        assert_eq!(
            validate_complexity(0).unwrap_err(),
            DomainError::InvalidComplexity(0)
        );
        assert_eq!(
            validate_complexity(11).unwrap_err(),
            DomainError::InvalidComplexity(11)
        );
    }

    #[test]
    fn atom_paths_count_limits() {
        assert_eq!(
            validate_atom_paths(&[]).unwrap_err(),
            DomainError::InvalidPathCount(0)
        );
        let too_many: Vec<String> = (0..21).map(|i| format!("src/{i}.rs")).collect();
        assert_eq!(
            validate_atom_paths(&too_many).unwrap_err(),
            DomainError::InvalidPathCount(21)
        );
    }

    #[test]
    fn atom_paths_reject_absolute_and_parent() {
        let abs = vec!["/etc/passwd".to_string()];
        assert!(matches!(
            validate_atom_paths(&abs),
            Err(DomainError::InvalidPath { .. })
        ));
        let parent = vec!["src/../secrets".to_string()];
        assert!(matches!(
            validate_atom_paths(&parent),
            Err(DomainError::InvalidPath { .. })
        ));
    }

    #[test]
    fn atom_paths_reject_overlong() {
        let long = vec!["a/".repeat(300)];
        assert!(matches!(
            validate_atom_paths(&long),
            Err(DomainError::InvalidPath { .. })
        ));
    }

    #[test]
    fn atom_paths_accept_globs() {
        let ok = vec!["src/**/*.rs".to_string(), "Cargo.toml".to_string()];
        assert!(validate_atom_paths(&ok).is_ok());
    }

    #[test]
    fn knowledge_cap() {
        assert!(validate_knowledge(Some("short")).is_ok());
        assert!(validate_knowledge(None).is_ok());
        let big = "x".repeat(MAX_KNOWLEDGE_LEN + 1);
        assert!(matches!(
            validate_knowledge(Some(&big)),
            Err(DomainError::TooLong { .. })
        ));
    }

    #[test]
    fn changelog_summary_bounds() {
        assert!(validate_changelog_summary("did a thing").is_ok());
        assert_eq!(
            validate_changelog_summary("").unwrap_err(),
            DomainError::InvalidSummaryLength(0)
        );
        let big = "x".repeat(MAX_CHANGELOG_SUMMARY_LEN + 1);
        assert!(matches!(
            validate_changelog_summary(&big),
            Err(DomainError::InvalidSummaryLength(_))
        ));
    }

    #[test]
    fn molecule_name_cap() {
        assert!(validate_molecule_name("indexing subsystem").is_ok());
        let long = "n".repeat(256);
        assert!(matches!(
            validate_molecule_name(&long),
            Err(DomainError::TooLong { .. })
        ));
    }
}
