//! Per-step state machine and the run's audit trail.
//!
//! ```text
//! Pending ──► Executing ──► Validating ──► Accepted ──► Complete (step 12)
//!    │            │              │
//!    │            │              └──► Retrying ──► Executing
//!    │            │                      │
//!    └────────────┴──────────────────────┴──► Failed
//! ```
//!
//! `Accepted → Failed` covers a result that cannot be folded into the
//! context package.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pipeline::{QualityGateVerdict, StepId, Timestamp};

/// Lifecycle state of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not yet dispatched.
    Pending,
    /// A generation call is in flight.
    Executing,
    /// A candidate is being checked by the quality gate.
    Validating,
    /// The candidate passed and was folded.
    Accepted,
    /// The candidate failed; another attempt may follow.
    Retrying,
    /// The step failed; the run halts.
    Failed,
    /// The last step was accepted; the run is ready for assembly.
    Complete,
}

impl StepState {
    /// Returns `true` if the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Failed)
                | (Executing, Validating)
                | (Executing, Failed)
                | (Validating, Accepted)
                | (Validating, Retrying)
                | (Retrying, Executing)
                | (Retrying, Failed)
                | (Accepted, Complete)
                | (Accepted, Failed)
        )
    }

    /// Returns `true` for states with no outgoing transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Failed | StepState::Complete)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepState::Pending => "pending",
            StepState::Executing => "executing",
            StepState::Validating => "validating",
            StepState::Accepted => "accepted",
            StepState::Retrying => "retrying",
            StepState::Failed => "failed",
            StepState::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the transition happened.
    pub at: Timestamp,
    /// The step that moved.
    pub step: StepId,
    /// Attempt number at the time of the transition (`0` before dispatch).
    pub attempt: u32,
    /// Previous state.
    pub from: StepState,
    /// New state.
    pub to: StepState,
    /// Free-form detail (failure cause, restore note, etc.).
    pub detail: String,
    /// Verdict that drove the transition, for gate outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Box<QualityGateVerdict>>,
}

/// Ordered record of every state transition in a run.
///
/// Also tracks the current state of each step so illegal transitions are
/// caught where they happen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    /// Creates an empty trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `step` (`Pending` if it never moved).
    pub fn state_of(&self, step: StepId) -> StepState {
        self.events
            .iter()
            .rev()
            .find(|e| e.step == step)
            .map_or(StepState::Pending, |e| e.to)
    }

    /// Records a transition of `step` to `to`.
    ///
    /// An illegal transition is logged and not recorded, so the trail only
    /// ever holds paths the state machine allows.
    pub fn transition(
        &mut self,
        step: StepId,
        attempt: u32,
        to: StepState,
        detail: impl Into<String>,
        verdict: Option<&QualityGateVerdict>,
    ) {
        let from = self.state_of(step);
        let detail = detail.into();
        if !from.can_transition_to(to) {
            warn!(
                %step,
                attempt,
                %from,
                %to,
                detail = %detail,
                "Ignoring illegal step state transition"
            );
            return;
        }
        debug!(%step, attempt, %from, %to, detail = %detail, "Step state transition");
        self.events.push(AuditEvent {
            at: Timestamp::now(),
            step,
            attempt,
            from,
            to,
            detail,
            verdict: verdict.map(|v| Box::new(v.clone())),
        });
    }

    /// Records a step restored from a checkpoint as accepted.
    pub fn restore(&mut self, step: StepId, attempt: u32) {
        self.events.push(AuditEvent {
            at: Timestamp::now(),
            step,
            attempt,
            from: StepState::Pending,
            to: StepState::Accepted,
            detail: "restored from checkpoint".to_string(),
            verdict: None,
        });
    }

    /// All events, in order.
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Events for `step`, in order.
    pub fn events_for(&self, step: StepId) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter().filter(move |e| e.step == step)
    }

    /// Every verdict recorded for `step`, in order.
    pub fn verdicts_for(&self, step: StepId) -> impl Iterator<Item = &QualityGateVerdict> {
        self.events_for(step).filter_map(|e| e.verdict.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failures_skip_validation() {
        assert!(StepState::Executing.can_transition_to(StepState::Failed));
        assert!(!StepState::Executing.can_transition_to(StepState::Retrying));
        assert!(!StepState::Executing.can_transition_to(StepState::Accepted));
    }

    #[test]
    fn retries_go_back_through_execution() {
        assert!(StepState::Validating.can_transition_to(StepState::Retrying));
        assert!(StepState::Retrying.can_transition_to(StepState::Executing));
        assert!(!StepState::Retrying.can_transition_to(StepState::Validating));
        assert!(StepState::Retrying.can_transition_to(StepState::Failed));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for next in [
            StepState::Pending,
            StepState::Executing,
            StepState::Validating,
            StepState::Accepted,
            StepState::Retrying,
            StepState::Failed,
            StepState::Complete,
        ] {
            assert!(!StepState::Failed.can_transition_to(next));
            assert!(!StepState::Complete.can_transition_to(next));
        }
        assert!(StepState::Failed.is_terminal());
        assert!(!StepState::Accepted.is_terminal());
    }

    #[test]
    fn trail_tracks_current_state() {
        let step = StepId::new(3).unwrap();
        let mut trail = AuditTrail::new();
        assert_eq!(trail.state_of(step), StepState::Pending);
        trail.transition(step, 1, StepState::Executing, "dispatched", None);
        trail.transition(step, 1, StepState::Validating, "candidate received", None);
        assert_eq!(trail.state_of(step), StepState::Validating);
        assert_eq!(trail.events_for(step).count(), 2);
        assert_eq!(trail.events()[1].from, StepState::Executing);
    }

    #[test]
    fn illegal_transition_is_not_recorded() {
        let step = StepId::new(4).unwrap();
        let mut trail = AuditTrail::new();
        trail.transition(step, 1, StepState::Executing, "dispatched", None);
        trail.transition(step, 1, StepState::Failed, "timed out", None);

        trail.transition(step, 2, StepState::Executing, "late dispatch", None);

        assert_eq!(trail.state_of(step), StepState::Failed);
        assert_eq!(trail.events_for(step).count(), 2);
    }
}
