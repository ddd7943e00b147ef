//! Step outputs: the candidate produced by an execution attempt and the
//! immutable [`StepResult`] it becomes once the quality gate accepts it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::quality::QualityGateVerdict;
use crate::{Phase, QualityTier, Score, SourceKey, Step, StepId, Timestamp};

/// Schema-valid output of one execution attempt, awaiting validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    step: StepId,
    phase: Phase,
    name: String,
    attempt: u32,
    payload: Value,
    referenced_sources: BTreeSet<SourceKey>,
    allocated_sources: BTreeSet<SourceKey>,
}

impl CandidateResult {
    /// Creates a candidate for `step`.
    ///
    /// `referenced_sources` is narrowed to `allocated_sources`: a step cannot
    /// have consumed a source it was never given.
    pub fn new(
        step: &Step,
        attempt: u32,
        payload: Value,
        referenced_sources: impl IntoIterator<Item = SourceKey>,
        allocated_sources: impl IntoIterator<Item = SourceKey>,
    ) -> Self {
        let allocated_sources: BTreeSet<SourceKey> = allocated_sources.into_iter().collect();
        let referenced_sources = referenced_sources
            .into_iter()
            .filter(|k| allocated_sources.contains(k))
            .collect();
        Self {
            step: step.id,
            phase: step.phase,
            name: step.name.clone(),
            attempt,
            payload,
            referenced_sources,
            allocated_sources,
        }
    }

    /// Step id.
    pub fn step(&self) -> StepId {
        self.step
    }

    /// 1-based attempt that produced this candidate.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The generated payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Sources the payload reports having used.
    pub fn referenced_sources(&self) -> &BTreeSet<SourceKey> {
        &self.referenced_sources
    }
}

/// A validated step output.
///
/// Only constructed from a candidate and a passing verdict (or restored from
/// a checkpoint); immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    step: StepId,
    phase: Phase,
    name: String,
    attempt: u32,
    payload: Value,
    quality_score: Score,
    tier: QualityTier,
    referenced_sources: BTreeSet<SourceKey>,
    allocated_sources: BTreeSet<SourceKey>,
    accepted_at: Timestamp,
}

impl StepResult {
    /// Accepts `candidate` under `verdict`.
    ///
    /// Returns `None` if the verdict did not pass or belongs to another step.
    pub fn from_accepted(candidate: CandidateResult, verdict: &QualityGateVerdict) -> Option<Self> {
        if !verdict.passed || verdict.step != candidate.step {
            return None;
        }
        Some(Self {
            step: candidate.step,
            phase: candidate.phase,
            name: candidate.name,
            attempt: candidate.attempt,
            payload: candidate.payload,
            quality_score: verdict.score,
            tier: verdict.tier,
            referenced_sources: candidate.referenced_sources,
            allocated_sources: candidate.allocated_sources,
            accepted_at: Timestamp::now(),
        })
    }

    /// Step id.
    pub fn step(&self) -> StepId {
        self.step
    }

    /// Phase of the step.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Step machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt that was accepted.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The accepted payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Weighted quality-gate score of the accepted attempt.
    pub fn quality_score(&self) -> Score {
        self.quality_score
    }

    /// Informational tier of the score.
    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Sources this result consumed.
    pub fn referenced_sources(&self) -> &BTreeSet<SourceKey> {
        &self.referenced_sources
    }

    /// Upstream sources this step was allocated.
    pub fn allocated_sources(&self) -> &BTreeSet<SourceKey> {
        &self.allocated_sources
    }

    /// When the result was accepted.
    pub fn accepted_at(&self) -> Timestamp {
        self.accepted_at
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;

    use super::{CandidateResult, StepResult};
    use crate::quality::QualityGateVerdict;
    use crate::{QualityTier, Score, SourceKey, StepCatalog, StepId};

    /// An accepted result for standard step `step` carrying `payload`.
    pub fn accepted(step: u8, payload: Value) -> StepResult {
        accepted_scored(step, payload, 0.9, &[])
    }

    /// An accepted result with an explicit score and referenced sources.
    ///
    /// The referenced sources are also recorded as allocated.
    pub fn accepted_scored(
        step: u8,
        payload: Value,
        score: f64,
        referenced: &[&str],
    ) -> StepResult {
        let catalog = StepCatalog::standard();
        let descriptor = catalog.get(StepId::new(step).expect("valid step id"));
        let keys: Vec<SourceKey> = referenced
            .iter()
            .map(|k| SourceKey::new(*k).expect("valid key"))
            .collect();
        let candidate = CandidateResult::new(descriptor, 1, payload, keys.clone(), keys);
        let verdict = QualityGateVerdict {
            step: descriptor.id,
            phase: descriptor.phase,
            attempt: 1,
            passed: true,
            score: Score::new(score).expect("valid score"),
            tier: QualityTier::Excellent,
            threshold: 0.7,
            criteria: Vec::new(),
            diagnostics: Vec::new(),
        };
        StepResult::from_accepted(candidate, &verdict).expect("passing verdict")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::quality::QualityGateVerdict;
    use crate::StepCatalog;

    #[test]
    fn references_are_narrowed_to_allocated_sources() {
        let catalog = StepCatalog::standard();
        let step = catalog.get(StepId::new(2).unwrap());
        let candidate = CandidateResult::new(
            step,
            1,
            json!({}),
            vec![
                SourceKey::from_static(SourceKey::STRATEGY),
                SourceKey::from_static(SourceKey::KEYWORDS),
            ],
            vec![
                SourceKey::from_static(SourceKey::STRATEGY),
                SourceKey::from_static(SourceKey::GAP_ANALYSIS),
            ],
        );
        let refs: Vec<&str> =
            candidate.referenced_sources().iter().map(SourceKey::as_str).collect();
        assert_eq!(refs, vec!["strategy"]);
    }

    #[test]
    fn failed_or_foreign_verdicts_do_not_accept() {
        let catalog = StepCatalog::standard();
        let step = catalog.get(StepId::new(2).unwrap());
        let candidate =
            CandidateResult::new(step, 2, json!({"summary": "x"}), Vec::new(), Vec::new());
        let mut verdict = QualityGateVerdict {
            step: step.id,
            phase: step.phase,
            attempt: 2,
            passed: false,
            score: Score::new(0.5).unwrap(),
            tier: QualityTier::BelowThreshold,
            threshold: 0.7,
            criteria: Vec::new(),
            diagnostics: Vec::new(),
        };
        assert!(StepResult::from_accepted(candidate.clone(), &verdict).is_none());

        verdict.passed = true;
        verdict.step = StepId::new(3).unwrap();
        assert!(StepResult::from_accepted(candidate.clone(), &verdict).is_none());

        verdict.step = step.id;
        let accepted = StepResult::from_accepted(candidate, &verdict).unwrap();
        assert_eq!(accepted.attempt(), 2);
        assert_eq!(accepted.name(), "gap_analysis");
    }
}
