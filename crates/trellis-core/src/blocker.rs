//! Blocker references stored in an entity's `blocked_by` set.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The sentinel blocker value that carries no peer entity.
pub const NO_OP: &str = "NO_OP";

/// A single entry in `blocked_by`: either a peer entity id or the `NO_OP`
/// sentinel. `NO_OP` requires a non-empty reason on the blocked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Blocker {
    /// Blocked on another feature or task.
    Entity(String),
    /// Blocked for an external reason; no peer entity involved.
    NoOp,
}

impl Blocker {
    /// Returns the persisted string form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Entity(id) => id.as_str(),
            Self::NoOp => NO_OP,
        }
    }

    /// Parses a blocker from its string form. Empty strings are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if s == NO_OP {
            Some(Self::NoOp)
        } else {
            Some(Self::Entity(s.to_owned()))
        }
    }

    /// Returns `true` for the `NO_OP` sentinel.
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    /// Returns the peer entity id, if any.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Entity(id) => Some(id.as_str()),
            Self::NoOp => None,
        }
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Blockers persist as plain strings inside a JSON array column.
impl Serialize for Blocker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Blocker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Blocker::parse(&s).ok_or_else(|| serde::de::Error::custom("blocker must be non-empty"))
    }
}

/// Returns `true` if `blocked_by` still contains the `NO_OP` sentinel.
pub fn contains_no_op(blocked_by: &[Blocker]) -> bool {
    blocked_by.iter().any(Blocker::is_no_op)
}
