//! Storage error types.
//!
//! Every public entry point returns a tagged [`StoreError`]; exceptions never
//! leak across the repository boundary. [`StoreError::code`] yields the
//! machine-readable discriminant carried by the operation result envelope.

use trellis_core::validation::DomainError;

/// Errors that can occur during storage and workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Input validation failed (empty fields, out-of-range numbers, illegal
    /// status transitions, malformed payloads).
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "project", "atom").
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Version mismatch or unique-key collision.
    #[error("conflict: {message}")]
    Conflict {
        /// What collided.
        message: String,
    },

    /// A parent refused deletion because children exist and cascade was off.
    #[error("{entity} {id} has children: {detail}")]
    HasChildren {
        /// The parent entity kind.
        entity: &'static str,
        /// The parent id.
        id: String,
        /// Machine-readable count string, e.g. `"1 feature"`.
        detail: String,
    },

    /// A structural rule was broken (e.g. cross-project molecule link).
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// Adding a blocker would create a cycle.
    #[error("circular dependency: {message}")]
    CircularDependency {
        /// The offending chain.
        message: String,
    },

    /// A relation already exists between the two entities.
    #[error("duplicate dependency: {message}")]
    DuplicateDependency {
        /// The duplicated pair.
        message: String,
    },

    /// An entity cannot block or relate to itself.
    #[error("self dependency: {message}")]
    SelfDependency {
        /// The offending id.
        message: String,
    },

    /// A schema migration failed. Startup aborts on this.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the migration that failed.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// A raw storage-layer failure.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// JSON (de)serialization of a persisted column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StoreError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a [`StoreError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a [`StoreError::Conflict`] with the given message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a [`StoreError::InvariantViolation`] with the given message.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a [`StoreError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The machine-readable discriminant of the result envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::HasChildren { .. } => "HAS_CHILDREN",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::DuplicateDependency { .. } => "DUPLICATE_DEPENDENCY",
            Self::SelfDependency { .. } => "SELF_DEPENDENCY",
            Self::Migration { .. } | Self::Storage(_) => "STORAGE",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        // Constraint violations are caller-visible conflicts; everything else
        // is a storage failure.
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict {
                    message: msg.clone().unwrap_or_else(|| e.to_string()),
                }
            }
            _ => Self::Storage(e),
        }
    }
}

impl From<DomainError> for StoreError {
    fn from(e: DomainError) -> Self {
        Self::Validation {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_envelope() {
        assert_eq!(StoreError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(StoreError::not_found("project", "p1").code(), "NOT_FOUND");
        assert_eq!(StoreError::conflict("v").code(), "CONFLICT");
        assert_eq!(
            StoreError::HasChildren {
                entity: "project",
                id: "p1".into(),
                detail: "1 feature".into(),
            }
            .code(),
            "HAS_CHILDREN"
        );
        assert_eq!(StoreError::invariant("x").code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn domain_errors_map_to_validation() {
        let err: StoreError = DomainError::InvalidComplexity(0).into();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("complexity"));
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let sqlite_err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: projects.name".into()),
        );
        let err: StoreError = sqlite_err.into();
        assert!(err.is_conflict());
    }
}
