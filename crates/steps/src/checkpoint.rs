//! Run checkpoints.
//!
//! A failed run hands back every result it accepted. Resuming from that
//! checkpoint re-folds the results in order and continues with the next step,
//! so a failure at step 9 does not re-run steps 1 to 8.

use serde::{Deserialize, Serialize};

use pipeline::{CalendarError, RunId, StepId, StepResult};

/// The accepted prefix of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Run the results belong to.
    pub run_id: RunId,
    /// Accepted results, ordered by step id from step 1.
    pub accepted: Vec<StepResult>,
}

impl RunCheckpoint {
    /// A checkpoint with nothing accepted.
    pub fn empty(run_id: RunId) -> Self {
        Self {
            run_id,
            accepted: Vec::new(),
        }
    }

    /// The last accepted step, if any.
    pub fn last_accepted(&self) -> Option<StepId> {
        self.accepted.last().map(StepResult::step)
    }

    /// The step a resumed run starts at, or `None` if every step is accepted.
    pub fn next_step(&self) -> Option<StepId> {
        match self.last_accepted() {
            Some(last) => last.next(),
            None => Some(StepId::FIRST),
        }
    }

    /// Checks that the results are a contiguous prefix `1..=k`.
    ///
    /// # Errors
    ///
    /// [`CalendarError::ConfigurationError`] naming the first out-of-place
    /// result.
    pub fn validate(&self) -> Result<(), CalendarError> {
        for (expected, result) in StepId::all().zip(&self.accepted) {
            if result.step() != expected {
                return Err(CalendarError::config(format!(
                    "checkpoint for run {} holds step {} where step {expected} was expected",
                    self.run_id,
                    result.step()
                )));
            }
        }
        if self.accepted.len() > usize::from(StepId::COUNT) {
            return Err(CalendarError::config(format!(
                "checkpoint for run {} holds {} results",
                self.run_id,
                self.accepted.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_checkpoint_resumes_at_step_one() {
        let cp = RunCheckpoint::empty(RunId::new_random());
        assert_eq!(cp.last_accepted(), None);
        assert_eq!(cp.next_step(), Some(StepId::FIRST));
        assert!(cp.validate().is_ok());
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let cp = RunCheckpoint::empty(RunId::new_random());
        let text = serde_json::to_string(&cp).unwrap();
        let back: RunCheckpoint = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cp);
    }
}
