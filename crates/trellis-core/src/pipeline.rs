//! The configurable linear status pipeline.
//!
//! The state catalog is closed at code level; a user pipeline is an ordered
//! subset of the catalog that must start with `NEW`, contain `ACTIVE`, end
//! with `CLOSED`, and preserve catalog order. `WILL_NOT_IMPLEMENT` is the
//! universal exit state and is never listed in a pipeline.

use serde::{Deserialize, Serialize};

use crate::enums::WorkState;

/// Full ordered catalog for feature pipelines.
pub const FEATURE_CATALOG: &[WorkState] = &[
    WorkState::New,
    WorkState::Active,
    WorkState::ReadyToProd,
    WorkState::Closed,
];

/// Full ordered catalog for task pipelines.
pub const TASK_CATALOG: &[WorkState] = &[
    WorkState::New,
    WorkState::Active,
    WorkState::ToBeTested,
    WorkState::ReadyToProd,
    WorkState::Closed,
];

/// The universal exit state, reachable from any non-terminal state.
pub const EXIT_STATE: WorkState = WorkState::WillNotImplement;

/// Which catalog a pipeline draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Feature,
    Task,
}

impl PipelineKind {
    /// Returns the full catalog for this kind.
    pub fn catalog(self) -> &'static [WorkState] {
        match self {
            Self::Feature => FEATURE_CATALOG,
            Self::Task => TASK_CATALOG,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Task => "task",
        }
    }
}

/// Pipeline validation failures, phrased for config error messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{kind} pipeline is empty")]
    Empty { kind: &'static str },

    #[error("{kind} pipeline must start with NEW (got {got})")]
    MustStartWithNew { kind: &'static str, got: String },

    #[error("{kind} pipeline must contain ACTIVE")]
    MissingActive { kind: &'static str },

    #[error("{kind} pipeline must end with CLOSED (got {got})")]
    MustEndWithClosed { kind: &'static str, got: String },

    #[error("{kind} pipeline contains unknown state {got}")]
    UnknownState { kind: &'static str, got: String },

    #[error("{kind} pipeline lists {got} out of catalog order")]
    OutOfOrder { kind: &'static str, got: String },

    #[error("{kind} pipeline lists {got} more than once")]
    Duplicate { kind: &'static str, got: String },
}

/// A validated, ordered subset of a catalog.
///
/// Immutable after construction; bootstrap resolves one per entity kind and
/// shares it for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    kind: PipelineKind,
    states: Vec<WorkState>,
}

impl Pipeline {
    /// Validates `states` against the catalog for `kind` and builds the
    /// pipeline. See the module docs for the rules enforced.
    pub fn new(kind: PipelineKind, states: Vec<WorkState>) -> Result<Self, PipelineError> {
        let kind_str = kind.as_str();
        let catalog = kind.catalog();

        if states.is_empty() {
            return Err(PipelineError::Empty { kind: kind_str });
        }
        if states[0] != WorkState::New {
            return Err(PipelineError::MustStartWithNew {
                kind: kind_str,
                got: states[0].to_string(),
            });
        }
        if !states.contains(&WorkState::Active) {
            return Err(PipelineError::MissingActive { kind: kind_str });
        }
        if let Some(last) = states.last() {
            if *last != WorkState::Closed {
                return Err(PipelineError::MustEndWithClosed {
                    kind: kind_str,
                    got: last.to_string(),
                });
            }
        }

        // Membership, order and uniqueness against the catalog.
        let mut last_pos: Option<usize> = None;
        for state in &states {
            let pos = catalog.iter().position(|c| c == state).ok_or_else(|| {
                PipelineError::UnknownState {
                    kind: kind_str,
                    got: state.to_string(),
                }
            })?;
            match last_pos {
                Some(prev) if pos == prev => {
                    return Err(PipelineError::Duplicate {
                        kind: kind_str,
                        got: state.to_string(),
                    });
                }
                Some(prev) if pos < prev => {
                    return Err(PipelineError::OutOfOrder {
                        kind: kind_str,
                        got: state.to_string(),
                    });
                }
                _ => {}
            }
            last_pos = Some(pos);
        }

        Ok(Self { kind, states })
    }

    /// The minimal legal pipeline for `kind`: `[NEW, ACTIVE, CLOSED]`.
    pub fn minimal(kind: PipelineKind) -> Self {
        Self {
            kind,
            states: vec![WorkState::New, WorkState::Active, WorkState::Closed],
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The ordered member states.
    pub fn states(&self) -> &[WorkState] {
        &self.states
    }

    /// The state after `state`, if any.
    pub fn next(&self, state: &WorkState) -> Option<&WorkState> {
        let idx = self.states.iter().position(|s| s == state)?;
        self.states.get(idx + 1)
    }

    /// The state before `state`, if any.
    pub fn prev(&self, state: &WorkState) -> Option<&WorkState> {
        let idx = self.states.iter().position(|s| s == state)?;
        idx.checked_sub(1).map(|i| &self.states[i])
    }

    /// Renders the 1-based position of `state` as `"k of N"`.
    ///
    /// `WILL_NOT_IMPLEMENT` is not a pipeline member and has no position.
    pub fn position(&self, state: &WorkState) -> Option<String> {
        let idx = self.states.iter().position(|s| s == state)?;
        Some(format!("{} of {}", idx + 1, self.states.len()))
    }

    /// `true` for `CLOSED` and `WILL_NOT_IMPLEMENT`.
    pub fn is_terminal(&self, state: &WorkState) -> bool {
        state.is_terminal()
    }

    /// Pipeline member or the exit state.
    pub fn is_valid_state(&self, state: &WorkState) -> bool {
        *state == EXIT_STATE || self.states.contains(state)
    }
}

/// The pair of pipelines resolved at bootstrap, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSet {
    pub feature: Pipeline,
    pub task: Pipeline,
}

impl PipelineSet {
    /// Minimal pipelines for both kinds.
    pub fn minimal() -> Self {
        Self {
            feature: Pipeline::minimal(PipelineKind::Feature),
            task: Pipeline::minimal(PipelineKind::Task),
        }
    }

    /// The pipeline for `kind`.
    pub fn get(&self, kind: PipelineKind) -> &Pipeline {
        match kind {
            PipelineKind::Feature => &self.feature,
            PipelineKind::Task => &self.task,
        }
    }
}

impl Default for PipelineSet {
    fn default() -> Self {
        Self::minimal()
    }
}
