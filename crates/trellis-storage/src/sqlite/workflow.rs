//! The workflow engine: advance / revert / terminate / block / unblock.
//!
//! Every operation runs inside one transaction, demands the caller's
//! expected version of the target, and applies parent cascades child-first
//! so the feature's auto-rule observes the committed task state.

use std::collections::{HashSet, VecDeque};

use rusqlite::{Connection, params};
use tracing::debug;

use trellis_core::blocker::{Blocker, contains_no_op};
use trellis_core::entity::{Feature, Task};
use trellis_core::enums::{ContainerType, WorkState};
use trellis_core::pipeline::PipelineKind;
use trellis_core::status::StatusValidator;

use crate::error::{Result, StoreError};
use crate::sqlite::features::get_feature_on_conn;
use crate::sqlite::refs;
use crate::sqlite::store::{SqliteStore, format_datetime, to_json};
use crate::sqlite::tasks::get_task_on_conn;

/// A status-bearing entity as returned by the workflow operations.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Feature(Feature),
    Task(Task),
}

impl WorkItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Feature(f) => &f.id,
            Self::Task(t) => &t.id,
        }
    }

    pub fn status(&self) -> &WorkState {
        match self {
            Self::Feature(f) => &f.status,
            Self::Task(t) => &t.status,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Self::Feature(f) => f.version,
            Self::Task(t) => t.version,
        }
    }

    pub fn blocked_by(&self) -> &[Blocker] {
        match self {
            Self::Feature(f) => &f.blocked_by,
            Self::Task(t) => &t.blocked_by,
        }
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        match self {
            Self::Feature(f) => f.blocked_reason.as_deref(),
            Self::Task(t) => t.blocked_reason.as_deref(),
        }
    }

    fn parent_feature_id(&self) -> Option<&str> {
        match self {
            Self::Feature(_) => None,
            Self::Task(t) => t.feature_id.as_deref(),
        }
    }
}

/// An applied status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkState,
    pub to: WorkState,
}

/// Result of a workflow operation: the refreshed entity plus any secondary
/// effects.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub entity: WorkItem,
    /// Absent for block/unblock, which change no status.
    pub transition: Option<Transition>,
    /// Entities whose `blocked_by` sets were scrubbed by completion.
    pub unblocked_entities: Vec<String>,
    /// Entities still blocked on a terminated target, for the caller to
    /// resolve.
    pub affected_dependents: Vec<String>,
    /// Human-readable note about a parent-feature cascade.
    pub feature_transition: Option<String>,
}

impl SqliteStore {
    /// Moves the entity to the next pipeline state, with parent cascades and
    /// completion auto-unblock.
    pub fn advance(
        &self,
        container: ContainerType,
        id: &str,
        expected_version: i64,
        validator: &StatusValidator,
    ) -> Result<TransitionOutcome> {
        let kind = pipeline_kind(container)?;
        self.with_tx(|conn| {
            let item = load_item_on_conn(conn, container, id)?;
            check_version(&item, expected_version)?;

            let from = item.status().clone();
            if from.is_terminal() {
                return Err(StoreError::validation(format!(
                    "cannot advance {container} {id}: {from} is a terminal state"
                )));
            }
            if !item.blocked_by().is_empty() {
                return Err(StoreError::validation(format!(
                    "{container} {id} is blocked; unblock it or terminate it first"
                )));
            }

            let pipeline = validator.pipelines().get(kind);
            let to = pipeline.next(&from).cloned().ok_or_else(|| {
                StoreError::validation(format!(
                    "cannot advance {container} {id}: no state after {from} in the pipeline"
                ))
            })?;

            set_status_on_conn(conn, container, id, expected_version, &to)?;
            debug!(%container, id, %from, %to, "advanced");

            let mut feature_transition = None;
            if let Some(feature_id) = item.parent_feature_id().map(str::to_owned) {
                if to == WorkState::Active {
                    feature_transition = auto_activate_feature_on_conn(conn, &feature_id)?;
                } else if to == WorkState::Closed {
                    feature_transition = auto_close_feature_on_conn(conn, &feature_id)?;
                }
            }

            let unblocked_entities = if to == WorkState::Closed {
                refs::remove_blocker_everywhere_on_conn(conn, id, &Self::now())?
            } else {
                Vec::new()
            };

            Ok(TransitionOutcome {
                entity: load_item_on_conn(conn, container, id)?,
                transition: Some(Transition { from, to }),
                unblocked_entities,
                affected_dependents: Vec::new(),
                feature_transition,
            })
        })
    }

    /// Moves the entity back to the previous pipeline state. No cascades.
    pub fn revert(
        &self,
        container: ContainerType,
        id: &str,
        expected_version: i64,
        validator: &StatusValidator,
    ) -> Result<TransitionOutcome> {
        let kind = pipeline_kind(container)?;
        self.with_tx(|conn| {
            let item = load_item_on_conn(conn, container, id)?;
            check_version(&item, expected_version)?;

            let from = item.status().clone();
            if from.is_terminal() {
                return Err(StoreError::validation(format!(
                    "cannot revert {container} {id}: {from} is a terminal state"
                )));
            }

            let pipeline = validator.pipelines().get(kind);
            let to = pipeline.prev(&from).cloned().ok_or_else(|| {
                StoreError::validation(format!(
                    "cannot revert {container} {id}: {from} is the first pipeline state"
                ))
            })?;

            set_status_on_conn(conn, container, id, expected_version, &to)?;
            debug!(%container, id, %from, %to, "reverted");

            Ok(TransitionOutcome {
                entity: load_item_on_conn(conn, container, id)?,
                transition: Some(Transition { from, to }),
                unblocked_entities: Vec::new(),
                affected_dependents: Vec::new(),
                feature_transition: None,
            })
        })
    }

    /// Abandons the entity: sets `WILL_NOT_IMPLEMENT` regardless of
    /// blockers. Dependents are reported, not unblocked.
    pub fn terminate(
        &self,
        container: ContainerType,
        id: &str,
        expected_version: i64,
        validator: &StatusValidator,
    ) -> Result<TransitionOutcome> {
        pipeline_kind(container)?;
        self.with_tx(|conn| {
            let item = load_item_on_conn(conn, container, id)?;
            check_version(&item, expected_version)?;

            let from = item.status().clone();
            if validator.is_terminal(container, &from) {
                return Err(StoreError::validation(format!(
                    "cannot terminate {container} {id}: {from} is already a terminal state"
                )));
            }

            let to = WorkState::WillNotImplement;
            set_status_on_conn(conn, container, id, expected_version, &to)?;
            debug!(%container, id, %from, "terminated");

            let affected_dependents: Vec<String> = refs::find_dependents_on_conn(conn, id)?
                .into_iter()
                .map(|d| d.id)
                .collect();

            let mut feature_transition = None;
            if let Some(feature_id) = item.parent_feature_id().map(str::to_owned) {
                feature_transition = auto_close_feature_on_conn(conn, &feature_id)?;
            }

            Ok(TransitionOutcome {
                entity: load_item_on_conn(conn, container, id)?,
                transition: Some(Transition { from, to }),
                unblocked_entities: Vec::new(),
                affected_dependents,
                feature_transition,
            })
        })
    }

    /// Adds blockers to the entity's `blocked_by` set. Idempotent on the
    /// set; `NO_OP` demands a non-empty reason.
    pub fn block(
        &self,
        container: ContainerType,
        id: &str,
        expected_version: i64,
        blockers: &[String],
        reason: Option<&str>,
        validator: &StatusValidator,
    ) -> Result<TransitionOutcome> {
        pipeline_kind(container)?;
        let parsed: Vec<Blocker> = blockers
            .iter()
            .map(|raw| {
                Blocker::parse(raw)
                    .ok_or_else(|| StoreError::validation("blocker id must not be empty"))
            })
            .collect::<Result<_>>()?;
        if parsed.is_empty() {
            return Err(StoreError::validation("at least one blocker is required"));
        }

        self.with_tx(|conn| {
            let item = load_item_on_conn(conn, container, id)?;
            check_version(&item, expected_version)?;

            if validator.is_terminal(container, item.status()) {
                return Err(StoreError::validation(format!(
                    "cannot block {container} {id}: {} is a terminal state",
                    item.status()
                )));
            }

            for blocker in &parsed {
                match blocker {
                    Blocker::NoOp => {
                        if reason.map(str::trim).filter(|r| !r.is_empty()).is_none() {
                            return Err(StoreError::validation(
                                "a NO_OP blocker requires a non-empty reason",
                            ));
                        }
                    }
                    Blocker::Entity(blocker_id) => {
                        if blocker_id == id {
                            return Err(StoreError::SelfDependency {
                                message: format!("{container} {id} cannot block itself"),
                            });
                        }
                        let (_, status) = refs::get_work_status_on_conn(conn, blocker_id)?
                            .ok_or_else(|| StoreError::not_found("blocker", blocker_id.clone()))?;
                        if status.is_terminal() {
                            return Err(StoreError::validation(format!(
                                "blocker {blocker_id} is in terminal state {status}"
                            )));
                        }
                        detect_blocker_cycle_on_conn(conn, blocker_id, id)?;
                    }
                }
            }

            // Set-union append, preserving existing order.
            let mut merged = item.blocked_by().to_vec();
            for blocker in parsed {
                if !merged.contains(&blocker) {
                    merged.push(blocker);
                }
            }

            let blocked_reason = if contains_no_op(&merged) {
                reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_owned)
                    .or_else(|| item.blocked_reason().map(str::to_owned))
            } else {
                None
            };

            set_blockers_on_conn(conn, container, id, expected_version, &merged, &blocked_reason)?;
            Ok(TransitionOutcome {
                entity: load_item_on_conn(conn, container, id)?,
                transition: None,
                unblocked_entities: Vec::new(),
                affected_dependents: Vec::new(),
                feature_transition: None,
            })
        })
    }

    /// Removes blockers from the entity's `blocked_by` set. Removing an
    /// absent blocker succeeds with no change; the blocked reason is cleared
    /// once `NO_OP` is gone.
    pub fn unblock(
        &self,
        container: ContainerType,
        id: &str,
        expected_version: i64,
        blockers: &[String],
    ) -> Result<TransitionOutcome> {
        pipeline_kind(container)?;
        let removals: HashSet<String> = blockers
            .iter()
            .filter_map(|raw| Blocker::parse(raw))
            .map(|b| b.as_str().to_owned())
            .collect();

        self.with_tx(|conn| {
            let item = load_item_on_conn(conn, container, id)?;
            check_version(&item, expected_version)?;

            let remaining: Vec<Blocker> = item
                .blocked_by()
                .iter()
                .filter(|b| !removals.contains(b.as_str()))
                .cloned()
                .collect();

            let blocked_reason = if contains_no_op(&remaining) {
                item.blocked_reason().map(str::to_owned)
            } else {
                None
            };

            set_blockers_on_conn(
                conn,
                container,
                id,
                expected_version,
                &remaining,
                &blocked_reason,
            )?;
            Ok(TransitionOutcome {
                entity: load_item_on_conn(conn, container, id)?,
                transition: None,
                unblocked_entities: Vec::new(),
                affected_dependents: Vec::new(),
                feature_transition: None,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

fn pipeline_kind(container: ContainerType) -> Result<PipelineKind> {
    match container {
        ContainerType::Feature => Ok(PipelineKind::Feature),
        ContainerType::Task => Ok(PipelineKind::Task),
        ContainerType::Project => Err(StoreError::validation(
            "projects are stateless and have no workflow",
        )),
    }
}

fn load_item_on_conn(conn: &Connection, container: ContainerType, id: &str) -> Result<WorkItem> {
    match container {
        ContainerType::Feature => get_feature_on_conn(conn, id).map(WorkItem::Feature),
        ContainerType::Task => get_task_on_conn(conn, id).map(WorkItem::Task),
        ContainerType::Project => Err(StoreError::validation(
            "projects are stateless and have no workflow",
        )),
    }
}

fn check_version(item: &WorkItem, expected: i64) -> Result<()> {
    if item.version() != expected {
        return Err(StoreError::conflict(format!(
            "version mismatch on {}: expected {expected}, found {}",
            item.id(),
            item.version()
        )));
    }
    Ok(())
}

fn table_for(container: ContainerType) -> &'static str {
    match container {
        ContainerType::Feature => "features",
        ContainerType::Task => "tasks",
        ContainerType::Project => "projects",
    }
}

/// Writes a status change with its own optimistic check.
fn set_status_on_conn(
    conn: &Connection,
    container: ContainerType,
    id: &str,
    expected_version: i64,
    to: &WorkState,
) -> Result<()> {
    let table = table_for(container);
    let affected = conn.execute(
        &format!(
            "UPDATE {table} SET status = ?1, version = version + 1, modified_at = ?2
             WHERE id = ?3 AND version = ?4"
        ),
        params![
            to.as_str(),
            format_datetime(&SqliteStore::now()),
            id,
            expected_version
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::conflict(format!(
            "{container} {id} was modified concurrently"
        )));
    }
    Ok(())
}

/// Writes a blocker-set change with its own optimistic check.
fn set_blockers_on_conn(
    conn: &Connection,
    container: ContainerType,
    id: &str,
    expected_version: i64,
    blocked_by: &[Blocker],
    blocked_reason: &Option<String>,
) -> Result<()> {
    let table = table_for(container);
    let affected = conn.execute(
        &format!(
            "UPDATE {table} SET blocked_by = ?1, blocked_reason = ?2,
                    version = version + 1, modified_at = ?3
             WHERE id = ?4 AND version = ?5"
        ),
        params![
            to_json(&blocked_by.to_vec())?,
            blocked_reason,
            format_datetime(&SqliteStore::now()),
            id,
            expected_version
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::conflict(format!(
            "{container} {id} was modified concurrently"
        )));
    }
    Ok(())
}

/// Task moved to ACTIVE: a parent feature still in NEW follows it, unless
/// the feature is itself blocked.
fn auto_activate_feature_on_conn(conn: &Connection, feature_id: &str) -> Result<Option<String>> {
    let feature = get_feature_on_conn(conn, feature_id)?;
    if feature.status != WorkState::New || !feature.blocked_by.is_empty() {
        return Ok(None);
    }
    set_status_on_conn(
        conn,
        ContainerType::Feature,
        feature_id,
        feature.version,
        &WorkState::Active,
    )?;
    Ok(Some(format!(
        "feature {feature_id} auto-advanced to ACTIVE"
    )))
}

/// Task reached a terminal state: when every sibling is terminal, the parent
/// feature follows -- WILL_NOT_IMPLEMENT when all were abandoned, CLOSED
/// when at least one completed.
fn auto_close_feature_on_conn(conn: &Connection, feature_id: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT status FROM tasks WHERE feature_id = ?1")?;
    let statuses: Vec<WorkState> = stmt
        .query_map(params![feature_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(WorkState::from)
        .collect();

    if statuses.is_empty() || !statuses.iter().all(WorkState::is_terminal) {
        return Ok(None);
    }
    let any_closed = statuses.iter().any(|s| *s == WorkState::Closed);
    let target = if any_closed {
        WorkState::Closed
    } else {
        WorkState::WillNotImplement
    };

    let feature = get_feature_on_conn(conn, feature_id)?;
    if feature.status.is_terminal() {
        return Ok(None);
    }
    set_status_on_conn(
        conn,
        ContainerType::Feature,
        feature_id,
        feature.version,
        &target,
    )?;
    Ok(Some(format!(
        "feature {feature_id} auto-advanced to {target}"
    )))
}

/// BFS from `start` through `blocked_by` edges; reaching `target` means the
/// new edge `target -> start` would close a cycle.
fn detect_blocker_cycle_on_conn(conn: &Connection, start: &str, target: &str) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(start.to_owned());

    while let Some(current) = queue.pop_front() {
        if current == target {
            return Err(StoreError::CircularDependency {
                message: format!("blocking on {start} would make {target} block itself"),
            });
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(blockers) = refs::get_blocked_by_on_conn(conn, &current)? {
            for blocker in blockers {
                if let Some(next) = blocker.entity_id() {
                    if !visited.contains(next) {
                        queue.push_back(next.to_owned());
                    }
                }
            }
        }
    }
    Ok(())
}
