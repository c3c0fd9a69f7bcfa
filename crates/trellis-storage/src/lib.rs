//! SQLite storage backend and workflow engine for the trellis orchestrator.
//!
//! The [`SqliteStore`] is the process-wide handle shared by every
//! repository; all mutations run through its transaction primitive with
//! optimistic version checks.

pub mod error;
pub mod sqlite;

// Re-exports for convenience.
pub use error::{Result, StoreError};
pub use sqlite::{
    OrphanStateGroup, SqliteStore, TagCount, TagUsage, Transition, TransitionOutcome, WorkItem,
};
