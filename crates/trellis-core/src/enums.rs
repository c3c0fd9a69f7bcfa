//! Enum types for the trellis system.
//!
//! Each enum has:
//! - Custom Serialize (as its canonical string)
//! - Custom Deserialize (known variants + catch-all Custom(String))
//! - `as_str()`, `is_default()`, `Display` impl
//!
//! The catch-all variant exists so that rows written by a newer or older
//! schema still scan; validation at the repository boundary rejects it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a known catalog value.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

// ===========================================================================
// WorkState
// ===========================================================================

define_enum! {
    /// A state in the feature/task workflow pipeline.
    ///
    /// The full catalog is fixed at code level; a configured pipeline is an
    /// ordered subset of it. `WillNotImplement` is the universal exit state
    /// and never appears inside a pipeline.
    WorkState, default = New,
    variants: [
        (New, "NEW"),
        (Active, "ACTIVE"),
        (ToBeTested, "TO_BE_TESTED"),
        (ReadyToProd, "READY_TO_PROD"),
        (Closed, "CLOSED"),
        (WillNotImplement, "WILL_NOT_IMPLEMENT"),
    ]
}

impl WorkState {
    /// Returns `true` for the two terminal sinks.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::WillNotImplement)
    }
}

// ===========================================================================
// Priority
// ===========================================================================

define_enum! {
    /// Scheduling priority of a feature or task.
    Priority, default = Medium,
    variants: [
        (High, "HIGH"),
        (Medium, "MEDIUM"),
        (Low, "LOW"),
    ]
}

// ===========================================================================
// EntityType
// ===========================================================================

define_enum! {
    /// Discriminates the owner of a section or tag row.
    EntityType, default = Project,
    variants: [
        (Project, "project"),
        (Feature, "feature"),
        (Task, "task"),
        (Template, "template"),
    ]
}

// ===========================================================================
// ContentFormat
// ===========================================================================

define_enum! {
    /// Rendering format of a section's content.
    ContentFormat, default = Markdown,
    variants: [
        (PlainText, "PLAIN_TEXT"),
        (Markdown, "MARKDOWN"),
        (Json, "JSON"),
        (Code, "CODE"),
    ]
}

// ===========================================================================
// KnowledgeParent
// ===========================================================================

define_enum! {
    /// Discriminates the owner of a changelog entry.
    KnowledgeParent, default = Atom,
    variants: [
        (Atom, "atom"),
        (Molecule, "molecule"),
    ]
}

// ===========================================================================
// ContainerType
// ===========================================================================

/// The container kinds known to the workflow engine. Closed at code level,
/// so no fallback variant: unknown strings fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerType {
    Project,
    Feature,
    Task,
}

impl ContainerType {
    /// Returns the string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Feature => "feature",
            Self::Task => "task",
        }
    }

    /// Parses a container type; `None` for anything outside the set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "feature" => Some(Self::Feature),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContainerType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContainerType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown container type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_state_default_is_new() {
        assert_eq!(WorkState::default(), WorkState::New);
        assert!(WorkState::New.is_default());
        assert!(!WorkState::Closed.is_default());
    }

    #[test]
    fn work_state_roundtrip_serde() {
        let s = WorkState::ReadyToProd;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#""READY_TO_PROD""#);
        let back: WorkState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn work_state_terminal() {
        assert!(WorkState::Closed.is_terminal());
        assert!(WorkState::WillNotImplement.is_terminal());
        assert!(!WorkState::Active.is_terminal());
        assert!(!WorkState::Custom("ARCHIVED".into()).is_terminal());
    }

    #[test]
    fn work_state_unknown_becomes_custom() {
        let s = WorkState::from("ARCHIVED");
        assert_eq!(s, WorkState::Custom("ARCHIVED".into()));
        assert!(!s.is_builtin());
    }

    #[test]
    fn priority_roundtrip() {
        assert_eq!(Priority::from("HIGH"), Priority::High);
        assert_eq!(Priority::High.as_str(), "HIGH");
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn entity_type_strings() {
        assert_eq!(EntityType::Feature.as_str(), "feature");
        assert_eq!(EntityType::from("template"), EntityType::Template);
    }

    #[test]
    fn content_format_default_is_markdown() {
        assert_eq!(ContentFormat::default(), ContentFormat::Markdown);
        assert_eq!(ContentFormat::PlainText.as_str(), "PLAIN_TEXT");
    }

    #[test]
    fn knowledge_parent_strings() {
        assert_eq!(KnowledgeParent::Atom.as_str(), "atom");
        assert_eq!(KnowledgeParent::from("molecule"), KnowledgeParent::Molecule);
    }
}
