//! Final assembly of a calendar run.
//!
//! [`CalendarAssembler::assemble`] only accepts a [`CompletedSteps`], which can
//! only be built from exactly twelve accepted results in step order. A
//! partial calendar therefore cannot be assembled.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AssemblyConfig, QualityConfig};
use crate::timeline::{extract_slots, TimelineSlot};
use crate::{
    CalendarError, QualityTier, RunId, Score, SourceKey, StepCatalog, StepId, StepResult,
    TimelineKind, Timestamp,
};

// ---------------------------------------------------------------------------
// CompletedSteps
// ---------------------------------------------------------------------------

/// The full, ordered set of accepted results of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSteps(Vec<StepResult>);

impl CompletedSteps {
    /// The results, ordered by step id.
    pub fn results(&self) -> &[StepResult] {
        &self.0
    }
}

impl TryFrom<Vec<StepResult>> for CompletedSteps {
    type Error = CalendarError;

    fn try_from(results: Vec<StepResult>) -> Result<Self, Self::Error> {
        if results.len() != usize::from(StepId::COUNT) {
            return Err(CalendarError::IncompleteRun {
                message: format!(
                    "expected {} accepted results, got {}",
                    StepId::COUNT,
                    results.len()
                ),
            });
        }
        for (expected, result) in StepId::all().zip(&results) {
            if result.step() != expected {
                return Err(CalendarError::IncompleteRun {
                    message: format!(
                        "expected step {expected} at position {expected}, found step {}",
                        result.step()
                    ),
                });
            }
        }
        Ok(Self(results))
    }
}

// ---------------------------------------------------------------------------
// Utilization report
// ---------------------------------------------------------------------------

/// Allocation and consumption of one declared source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUtilization {
    /// Source key.
    pub key: SourceKey,
    /// Steps the source was allocated to.
    pub allocated_to: Vec<StepId>,
    /// Steps whose accepted result referenced the source.
    pub consumed_by: Vec<StepId>,
}

impl SourceUtilization {
    /// Returns `true` if at least one step consumed the source.
    pub fn is_consumed(&self) -> bool {
        !self.consumed_by.is_empty()
    }
}

/// Declared-available sources diffed against the sources actually referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUtilizationReport {
    /// One entry per declared source, ordered by key.
    pub sources: Vec<SourceUtilization>,
    /// Declared sources no accepted result referenced.
    pub unconsumed: Vec<SourceKey>,
}

impl DataUtilizationReport {
    fn build<'a>(
        declared: impl IntoIterator<Item = &'a SourceKey>,
        results: &[StepResult],
    ) -> Self {
        let sources: Vec<SourceUtilization> = declared
            .into_iter()
            .map(|key| SourceUtilization {
                key: key.clone(),
                allocated_to: results
                    .iter()
                    .filter(|r| r.allocated_sources().contains(key))
                    .map(StepResult::step)
                    .collect(),
                consumed_by: results
                    .iter()
                    .filter(|r| r.referenced_sources().contains(key))
                    .map(StepResult::step)
                    .collect(),
            })
            .collect();
        let unconsumed = sources
            .iter()
            .filter(|s| !s.is_consumed())
            .map(|s| s.key.clone())
            .collect();
        Self { sources, unconsumed }
    }

    /// Returns the entry for `key`, if it was declared.
    pub fn source(&self, key: &str) -> Option<&SourceUtilization> {
        self.sources.iter().find(|s| s.key.as_str() == key)
    }

    /// Returns `true` when every declared source was consumed.
    pub fn is_complete(&self) -> bool {
        self.unconsumed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// The terminal output of a successful run.
///
/// Field names are the wire contract for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarArtifact {
    run_id: RunId,
    steps: Vec<StepResult>,
    aggregate_score: Score,
    tier: QualityTier,
    utilization: DataUtilizationReport,
    assembled_at: Timestamp,
}

impl CalendarArtifact {
    /// Run that produced the artifact.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// All twelve accepted results, ordered by step id.
    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// The accepted result of `step`.
    ///
    /// `None` only for an artifact deserialized from an incomplete document.
    pub fn step(&self, step: StepId) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step() == step)
    }

    /// Phase-weighted mean of the per-step scores.
    pub fn aggregate_score(&self) -> Score {
        self.aggregate_score
    }

    /// Informational tier of the aggregate score.
    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Data-utilization report.
    pub fn utilization(&self) -> &DataUtilizationReport {
        &self.utilization
    }

    /// When the artifact was assembled.
    pub fn assembled_at(&self) -> Timestamp {
        self.assembled_at
    }

    /// Scheduled posts from every daily-schedule step, in payload order.
    pub fn schedule(&self, catalog: &StepCatalog) -> Vec<TimelineSlot> {
        catalog
            .iter()
            .filter(|s| s.gate.timeline == Some(TimelineKind::DailySchedule))
            .filter_map(|s| self.step(s.id))
            .flat_map(|r| {
                extract_slots(TimelineKind::DailySchedule, r.step(), r.payload())
                    .items
                    .into_iter()
                    .map(|(_, slot)| slot)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Merges the accepted results of a run into a [`CalendarArtifact`].
#[derive(Debug, Clone)]
pub struct CalendarAssembler {
    config: AssemblyConfig,
    quality: QualityConfig,
    catalog: Arc<StepCatalog>,
    declared: BTreeSet<SourceKey>,
}

impl CalendarAssembler {
    /// Creates an assembler. `declared` are the sources available to the run.
    pub fn new(
        config: AssemblyConfig,
        quality: QualityConfig,
        catalog: Arc<StepCatalog>,
        declared: impl IntoIterator<Item = SourceKey>,
    ) -> Self {
        Self {
            config,
            quality,
            catalog,
            declared: declared.into_iter().collect(),
        }
    }

    /// Phase-weighted mean of the per-step scores.
    ///
    /// Each step carries its phase's weight divided by the number of steps in
    /// the phase. Pure: the same results and weights give the same score.
    pub fn aggregate_score(&self, steps: &CompletedSteps) -> Score {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for result in steps.results() {
            let phase = result.phase();
            let per_step =
                *self.config.phase_weights.get(phase) / self.catalog.phase_len(phase).max(1) as f64;
            weighted += per_step * result.quality_score().as_f64();
            total += per_step;
        }
        if total > 0.0 {
            Score::clamped(weighted / total)
        } else {
            Score::MIN
        }
    }

    /// Assembles the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::UnconsumedDataSources`] when full utilization
    /// is required and a declared source was never referenced.
    pub fn assemble(
        &self,
        run_id: RunId,
        steps: CompletedSteps,
    ) -> Result<CalendarArtifact, CalendarError> {
        let utilization = DataUtilizationReport::build(&self.declared, steps.results());
        if !utilization.is_complete() {
            let unconsumed: Vec<&str> =
                utilization.unconsumed.iter().map(SourceKey::as_str).collect();
            warn!(
                %run_id,
                ?unconsumed,
                "Declared data sources were never consumed"
            );
            if self.config.require_full_utilization {
                return Err(CalendarError::UnconsumedDataSources {
                    sources: utilization.unconsumed,
                });
            }
        }

        let aggregate_score = self.aggregate_score(&steps);
        let tier = self.quality.tier(aggregate_score);
        info!(%run_id, %aggregate_score, %tier, "Calendar assembled");

        Ok(CalendarArtifact {
            run_id,
            steps: steps.0,
            aggregate_score,
            tier,
            utilization,
            assembled_at: Timestamp::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::result::test_support::{accepted, accepted_scored};

    fn assembler(require_full: bool, declared: &[&str]) -> CalendarAssembler {
        let config = AssemblyConfig {
            require_full_utilization: require_full,
            ..AssemblyConfig::default()
        };
        CalendarAssembler::new(
            config,
            QualityConfig::default(),
            Arc::new(StepCatalog::standard()),
            declared.iter().map(|k| SourceKey::new(*k).unwrap()),
        )
    }

    fn run(scores: impl Fn(u8) -> f64) -> Vec<StepResult> {
        (1..=12)
            .map(|i| {
                let refs: &[&str] = match i {
                    1 => &["strategy"],
                    7 => &["keywords"],
                    _ => &[],
                };
                accepted_scored(i, json!({ "summary": format!("step {i}") }), scores(i), refs)
            })
            .collect()
    }

    #[test]
    fn completed_steps_require_all_twelve_in_order() {
        let mut results = run(|_| 0.9);
        results.swap(3, 4);
        let err = CompletedSteps::try_from(results).unwrap_err();
        assert!(matches!(err, CalendarError::IncompleteRun { .. }));

        let short: Vec<StepResult> = (1..=11).map(|i| accepted(i, json!({}))).collect();
        let err = CompletedSteps::try_from(short).unwrap_err();
        assert!(err.to_string().contains("expected 12 accepted results, got 11"));
    }

    #[test]
    fn aggregate_is_phase_weighted_mean() {
        // Foundation steps 1.0, all others 0.8: 0.25 * 1.0 + 0.75 * 0.8.
        let steps = CompletedSteps::try_from(run(|i| if i <= 3 { 1.0 } else { 0.8 })).unwrap();
        let score = assembler(true, &[]).aggregate_score(&steps);
        assert!((score.as_f64() - 0.85).abs() < 1e-9, "{score}");
    }

    #[test]
    fn assembly_is_deterministic() {
        let a = assembler(true, &["strategy", "keywords"]);
        let steps = || CompletedSteps::try_from(run(|i| 0.7 + f64::from(i) / 100.0)).unwrap();
        let first = a.assemble(RunId::new_random(), steps()).unwrap();
        let second = a.assemble(RunId::new_random(), steps()).unwrap();
        assert_eq!(first.aggregate_score(), second.aggregate_score());
        assert_eq!(first.steps().len(), 12);
    }

    #[test]
    fn unconsumed_declared_source_fails_assembly() {
        let steps = CompletedSteps::try_from(run(|_| 0.9)).unwrap();
        let err = assembler(true, &["strategy", "keywords", "competitor_data"])
            .assemble(RunId::new_random(), steps)
            .unwrap_err();
        match err {
            CalendarError::UnconsumedDataSources { sources } => {
                assert_eq!(sources, vec![SourceKey::new("competitor_data").unwrap()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn utilization_report_lists_consumers() {
        let steps = CompletedSteps::try_from(run(|_| 0.9)).unwrap();
        let artifact = assembler(false, &["strategy", "keywords", "competitor_data"])
            .assemble(RunId::new_random(), steps)
            .unwrap();
        let report = artifact.utilization();
        assert_eq!(report.source("strategy").unwrap().consumed_by, vec![StepId::new(1).unwrap()]);
        assert_eq!(report.source("keywords").unwrap().consumed_by, vec![StepId::new(7).unwrap()]);
        assert!(!report.source("competitor_data").unwrap().is_consumed());
        assert!(!report.is_complete());
    }

    #[test]
    fn truncated_artifact_document_has_no_missing_steps() {
        let steps = CompletedSteps::try_from(run(|_| 0.9)).unwrap();
        let artifact = assembler(false, &[]).assemble(RunId::new_random(), steps).unwrap();
        let mut document = serde_json::to_value(&artifact).unwrap();
        document["steps"].as_array_mut().unwrap().truncate(3);

        let short: CalendarArtifact = serde_json::from_value(document).unwrap();

        assert!(short.step(StepId::new(3).unwrap()).is_some());
        assert!(short.step(StepId::new(8).unwrap()).is_none());
        assert!(short.schedule(&StepCatalog::standard()).is_empty());
    }
}
