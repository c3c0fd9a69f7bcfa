//! Pure status queries backed by the resolved pipeline pair.

use crate::enums::{ContainerType, WorkState};
use crate::pipeline::{EXIT_STATE, Pipeline, PipelineKind, PipelineSet};

/// Answers validity and transition questions for a container type against
/// the active pipelines. Projects are stateless: every state is valid, none
/// is terminal, and no transition is ever legal.
#[derive(Debug, Clone)]
pub struct StatusValidator {
    pipelines: PipelineSet,
}

impl StatusValidator {
    pub fn new(pipelines: PipelineSet) -> Self {
        Self { pipelines }
    }

    /// The resolved pipelines backing this validator.
    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }

    fn pipeline_for(&self, container: ContainerType) -> Option<&Pipeline> {
        match container {
            ContainerType::Project => None,
            ContainerType::Feature => Some(self.pipelines.get(PipelineKind::Feature)),
            ContainerType::Task => Some(self.pipelines.get(PipelineKind::Task)),
        }
    }

    /// Pipeline member or exit state; always `true` for projects.
    pub fn is_valid_state(&self, container: ContainerType, state: &WorkState) -> bool {
        match self.pipeline_for(container) {
            Some(p) => p.is_valid_state(state),
            None => true,
        }
    }

    /// `CLOSED` / `WILL_NOT_IMPLEMENT` for features and tasks; always
    /// `false` for projects.
    pub fn is_terminal(&self, container: ContainerType, state: &WorkState) -> bool {
        match self.pipeline_for(container) {
            Some(p) => p.is_terminal(state),
            None => false,
        }
    }

    /// Legal targets from `cur`: `[next, prev, WILL_NOT_IMPLEMENT]` with
    /// undefined entries dropped; empty from terminal or invalid states.
    pub fn allowed_transitions(&self, container: ContainerType, cur: &WorkState) -> Vec<WorkState> {
        let Some(pipeline) = self.pipeline_for(container) else {
            return Vec::new();
        };
        if pipeline.is_terminal(cur) || !pipeline.is_valid_state(cur) {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(3);
        if let Some(next) = pipeline.next(cur) {
            out.push(next.clone());
        }
        if let Some(prev) = pipeline.prev(cur) {
            out.push(prev.clone());
        }
        out.push(EXIT_STATE);
        out
    }

    /// `to ∈ allowed_transitions(from)`.
    pub fn is_valid_transition(
        &self,
        container: ContainerType,
        from: &WorkState,
        to: &WorkState,
    ) -> bool {
        self.allowed_transitions(container, from).contains(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> StatusValidator {
        StatusValidator::new(PipelineSet::minimal())
    }

    #[test]
    fn projects_are_stateless() {
        let v = validator();
        assert!(v.is_valid_state(ContainerType::Project, &WorkState::Custom("ANYTHING".into())));
        assert!(!v.is_terminal(ContainerType::Project, &WorkState::Closed));
        assert!(v
            .allowed_transitions(ContainerType::Project, &WorkState::New)
            .is_empty());
        assert!(!v.is_valid_transition(ContainerType::Project, &WorkState::New, &WorkState::Active));
    }

    #[test]
    fn transitions_from_middle_state() {
        let v = validator();
        let allowed = v.allowed_transitions(ContainerType::Task, &WorkState::Active);
        assert_eq!(
            allowed,
            vec![WorkState::Closed, WorkState::New, WorkState::WillNotImplement]
        );
    }

    #[test]
    fn transitions_from_first_state_have_no_prev() {
        let v = validator();
        let allowed = v.allowed_transitions(ContainerType::Task, &WorkState::New);
        assert_eq!(allowed, vec![WorkState::Active, WorkState::WillNotImplement]);
    }

    #[test]
    fn no_transitions_from_terminal() {
        let v = validator();
        assert!(v
            .allowed_transitions(ContainerType::Task, &WorkState::Closed)
            .is_empty());
        assert!(v
            .allowed_transitions(ContainerType::Feature, &WorkState::WillNotImplement)
            .is_empty());
    }

    #[test]
    fn no_transitions_from_out_of_pipeline_state() {
        // TO_BE_TESTED is a catalog state but not in the minimal pipeline.
        let v = validator();
        assert!(v
            .allowed_transitions(ContainerType::Task, &WorkState::ToBeTested)
            .is_empty());
    }

    #[test]
    fn terminate_always_allowed_from_non_terminal() {
        let v = validator();
        assert!(v.is_valid_transition(
            ContainerType::Feature,
            &WorkState::New,
            &WorkState::WillNotImplement
        ));
    }
}
