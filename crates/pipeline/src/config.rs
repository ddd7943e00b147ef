//! Run configuration.
//!
//! A [`RunConfig`] is supplied once at run start and carries every tunable the
//! pipeline reads: calendar shape, quality-gate thresholds and weights, retry
//! budget, context budget, data-source allocation table, executor timeout and
//! assembly weights. No step-specific behaviour is hard-coded outside this
//! object and the [`StepCatalog`](crate::StepCatalog).
//!
//! Every section is `#[serde(default)]`, so a configuration file only needs to
//! name the values it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quality::Criterion;
use crate::step::StepCatalog;
use crate::types::weights_sum_to_one;
use crate::{CalendarError, Phase, QualityTier, Score, SourceKey};

// ---------------------------------------------------------------------------
// Per-phase tables
// ---------------------------------------------------------------------------

/// A value for each of the four phases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTable<T> {
    /// Value for [`Phase::Foundation`].
    pub foundation: T,
    /// Value for [`Phase::Structure`].
    pub structure: T,
    /// Value for [`Phase::Content`].
    pub content: T,
    /// Value for [`Phase::Optimization`].
    pub optimization: T,
}

impl<T> PhaseTable<T> {
    /// Returns the value for `phase`.
    pub fn get(&self, phase: Phase) -> &T {
        match phase {
            Phase::Foundation => &self.foundation,
            Phase::Structure => &self.structure,
            Phase::Content => &self.content,
            Phase::Optimization => &self.optimization,
        }
    }

    /// Iterates `(phase, value)` pairs in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, &T)> {
        Phase::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

impl<T: Clone> PhaseTable<T> {
    /// Creates a table holding `value` for every phase.
    pub fn uniform(value: T) -> Self {
        Self {
            foundation: value.clone(),
            structure: value.clone(),
            content: value.clone(),
            optimization: value,
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Shape of the calendar being generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Calendar length in weeks.
    pub duration_weeks: u32,
    /// Maximum posts per week on each platform.
    pub posts_per_week: u32,
    /// Platforms the calendar publishes to.
    pub platforms: Vec<String>,
    /// Maximum posts on any single day across all platforms.
    ///
    /// Defaults to `posts_per_week` when absent.
    pub max_posts_per_day: Option<u32>,
}

impl CalendarConfig {
    /// Number of days the calendar covers.
    pub fn total_days(&self) -> u32 {
        self.duration_weeks * 7
    }

    /// Effective per-day post cap.
    pub fn daily_cap(&self) -> u32 {
        self.max_posts_per_day.unwrap_or(self.posts_per_week)
    }

    /// Returns `true` if `platform` is one of the configured platforms.
    pub fn has_platform(&self, platform: &str) -> bool {
        self.platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case(platform.trim()))
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            duration_weeks: 4,
            posts_per_week: 3,
            platforms: vec!["LinkedIn".to_string(), "Blog".to_string()],
            max_posts_per_day: None,
        }
    }
}

// ---------------------------------------------------------------------------

/// Relative weight of each quality-gate criterion within one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaWeights {
    /// Required fields present and non-empty.
    pub completeness: f64,
    /// No duplicate titles/themes against the live context.
    pub uniqueness: f64,
    /// References to business goals and audience.
    pub strategic_alignment: f64,
    /// Declared structure matches the requested configuration.
    pub structural_correctness: f64,
    /// Platform fit and scheduling feasibility.
    pub platform_timeline: f64,
}

impl CriteriaWeights {
    /// Returns the configured weight for `criterion`.
    pub fn weight_for(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Completeness => self.completeness,
            Criterion::Uniqueness => self.uniqueness,
            Criterion::StrategicAlignment => self.strategic_alignment,
            Criterion::StructuralCorrectness => self.structural_correctness,
            Criterion::PlatformTimeline => self.platform_timeline,
        }
    }

    fn values(&self) -> [f64; 5] {
        [
            self.completeness,
            self.uniqueness,
            self.strategic_alignment,
            self.structural_correctness,
            self.platform_timeline,
        ]
    }
}

impl Default for CriteriaWeights {
    fn default() -> Self {
        Self {
            completeness: 0.25,
            uniqueness: 0.20,
            strategic_alignment: 0.25,
            structural_correctness: 0.15,
            platform_timeline: 0.15,
        }
    }
}

/// Quality-gate thresholds and weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum weighted score for a step to pass.
    pub threshold: f64,
    /// Informational "good" cut-off.
    pub good: f64,
    /// Informational "excellent" cut-off.
    pub excellent: f64,
    /// Criterion weights per phase.
    pub criteria: PhaseTable<CriteriaWeights>,
    /// Number of distinct strategy anchors (goals, audience) a result must
    /// reference to score full alignment.
    pub alignment_min_matches: usize,
}

impl QualityConfig {
    /// Classifies `score` into a [`QualityTier`].
    pub fn tier(&self, score: Score) -> QualityTier {
        let s = score.as_f64();
        if s >= self.excellent {
            QualityTier::Excellent
        } else if s >= self.good {
            QualityTier::Good
        } else if s >= self.threshold {
            QualityTier::Acceptable
        } else {
            QualityTier::BelowThreshold
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            good: 0.8,
            excellent: 0.9,
            criteria: PhaseTable::uniform(CriteriaWeights::default()),
            alignment_min_matches: 2,
        }
    }
}

// ---------------------------------------------------------------------------

/// Retry budget for quality-gate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; a step runs at most `max_retries + 1` times.
    pub max_retries: u32,
}

impl RetryConfig {
    /// Total attempts permitted per step.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

// ---------------------------------------------------------------------------

/// Context package sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard size bound of the live package, in characters.
    pub budget_chars: usize,
    /// Optional tighter bound for the per-step package handed to the executor.
    pub step_budget_chars: Option<usize>,
    /// Retention weight of entries by originating phase. Lower weights are
    /// compressed first.
    pub entry_weights: PhaseTable<f64>,
    /// Maximum length of a summary-level entry, in characters.
    pub summary_chars: usize,
}

impl ContextConfig {
    /// Budget applied when preparing a package for a single step.
    pub fn step_budget(&self) -> usize {
        self.step_budget_chars
            .map_or(self.budget_chars, |b| b.min(self.budget_chars))
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: 24_000,
            step_budget_chars: None,
            entry_weights: PhaseTable {
                foundation: 0.5,
                structure: 0.7,
                content: 0.9,
                optimization: 1.0,
            },
            summary_chars: 600,
        }
    }
}

// ---------------------------------------------------------------------------

/// One row of the allocation table: a source and its budget share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Source key (may be [`SourceKey::ACCUMULATED_CONTEXT`]).
    pub key: SourceKey,
    /// Intended share of the step's context budget.
    pub weight: f64,
}

impl AllocationEntry {
    fn new(key: &'static str, weight: f64) -> Self {
        Self {
            key: SourceKey::from_static(key),
            weight,
        }
    }
}

/// Phase-scoped allocation table.
pub type AllocationTable = PhaseTable<Vec<AllocationEntry>>;

/// The default allocation table.
///
/// Foundation draws on strategy and onboarding data; structure on phase-1
/// output plus gap and performance data; content on phase-2 output plus
/// keyword and competitor data; optimisation on the full accumulated context
/// plus the original strategy.
pub fn default_allocation_table() -> AllocationTable {
    PhaseTable {
        foundation: vec![
            AllocationEntry::new(SourceKey::STRATEGY, 0.40),
            AllocationEntry::new(SourceKey::ONBOARDING_SUMMARY, 0.30),
            AllocationEntry::new(SourceKey::GAP_ANALYSIS, 0.20),
            AllocationEntry::new(SourceKey::COMPETITOR_DATA, 0.10),
        ],
        structure: vec![
            AllocationEntry::new(SourceKey::ACCUMULATED_CONTEXT, 0.40),
            AllocationEntry::new(SourceKey::STRATEGY, 0.25),
            AllocationEntry::new(SourceKey::PERFORMANCE_HISTORY, 0.20),
            AllocationEntry::new(SourceKey::GAP_ANALYSIS, 0.15),
        ],
        content: vec![
            AllocationEntry::new(SourceKey::ACCUMULATED_CONTEXT, 0.40),
            AllocationEntry::new(SourceKey::KEYWORDS, 0.35),
            AllocationEntry::new(SourceKey::COMPETITOR_DATA, 0.25),
        ],
        optimization: vec![
            AllocationEntry::new(SourceKey::ACCUMULATED_CONTEXT, 0.50),
            AllocationEntry::new(SourceKey::STRATEGY, 0.30),
            AllocationEntry::new(SourceKey::PERFORMANCE_HISTORY, 0.20),
        ],
    }
}

// ---------------------------------------------------------------------------

/// Step executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
    /// Whether synthetic or fallback output may replace a failed generation.
    ///
    /// Must be `false`; validation rejects any other value.
    pub fallback_allowed: bool,
    /// Execute dependency-free steps of one phase concurrently.
    pub parallel_independent_steps: bool,
}

impl ExecutorConfig {
    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 45,
            fallback_allowed: false,
            parallel_independent_steps: false,
        }
    }
}

// ---------------------------------------------------------------------------

/// Calendar assembly settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Share of the aggregate quality score carried by each phase.
    pub phase_weights: PhaseTable<f64>,
    /// Fail assembly when a declared source was never referenced.
    pub require_full_utilization: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            phase_weights: PhaseTable {
                foundation: 0.25,
                structure: 0.25,
                content: 0.30,
                optimization: 0.20,
            },
            require_full_utilization: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Complete configuration for one calendar run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Calendar shape.
    pub calendar: CalendarConfig,
    /// Quality-gate thresholds and weights.
    pub quality: QualityConfig,
    /// Retry budget.
    pub retry: RetryConfig,
    /// Context package sizing.
    pub context: ContextConfig,
    /// Data-source allocation table.
    pub allocation: AllocationTable,
    /// Step executor settings.
    pub executor: ExecutorConfig,
    /// Assembly settings.
    pub assembly: AssemblyConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            calendar: CalendarConfig::default(),
            quality: QualityConfig::default(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            allocation: default_allocation_table(),
            executor: ExecutorConfig::default(),
            assembly: AssemblyConfig::default(),
        }
    }
}

impl RunConfig {
    /// Validates the configuration against `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::ConfigurationError`] describing the first
    /// problem found.
    pub fn validate(&self, catalog: &StepCatalog) -> Result<(), CalendarError> {
        let cal = &self.calendar;
        if cal.duration_weeks == 0 {
            return Err(CalendarError::config("calendar.duration_weeks must be at least 1"));
        }
        if cal.posts_per_week == 0 {
            return Err(CalendarError::config("calendar.posts_per_week must be at least 1"));
        }
        if cal.platforms.iter().all(|p| p.trim().is_empty()) {
            return Err(CalendarError::config("calendar.platforms must name at least one platform"));
        }
        if cal.daily_cap() == 0 {
            return Err(CalendarError::config("calendar.max_posts_per_day must be at least 1"));
        }

        let q = &self.quality;
        let ordered = 0.0 < q.threshold
            && q.threshold <= q.good
            && q.good <= q.excellent
            && q.excellent <= 1.0;
        if !ordered {
            return Err(CalendarError::config(format!(
                "quality tiers must satisfy 0 < threshold <= good <= excellent <= 1 (got {}, {}, {})",
                q.threshold, q.good, q.excellent
            )));
        }
        for (phase, weights) in q.criteria.iter() {
            let values = weights.values();
            if values.iter().any(|w| !(0.0..=1.0).contains(w)) || !weights_sum_to_one(values) {
                return Err(CalendarError::config(format!(
                    "quality.criteria.{phase} weights must lie in [0, 1] and sum to 1.0"
                )));
            }
        }

        if self.context.budget_chars == 0 {
            return Err(CalendarError::config("context.budget_chars must be positive"));
        }
        if self.context.step_budget() == 0 {
            return Err(CalendarError::config("context.step_budget_chars must be positive"));
        }
        for (phase, w) in self.context.entry_weights.iter() {
            if !(0.0..=1.0).contains(w) {
                return Err(CalendarError::config(format!(
                    "context.entry_weights.{phase} must lie in [0, 1]"
                )));
            }
        }

        if self.executor.fallback_allowed {
            return Err(CalendarError::config(
                "executor.fallback_allowed must be false: failed steps are never replaced with synthetic output",
            ));
        }
        if self.executor.timeout_secs == 0 {
            return Err(CalendarError::config("executor.timeout_secs must be positive"));
        }

        for (phase, entries) in self.allocation.iter() {
            if entries.iter().any(|e| !(0.0..=1.0).contains(&e.weight) || e.weight == 0.0) {
                return Err(CalendarError::config(format!(
                    "allocation.{phase} weights must lie in (0, 1]"
                )));
            }
            if !weights_sum_to_one(entries.iter().map(|e| e.weight)) {
                return Err(CalendarError::config(format!(
                    "allocation.{phase} weights must sum to 1.0"
                )));
            }
        }
        for step in catalog.iter() {
            let table = self.allocation.get(step.phase);
            for required in &step.required_sources {
                if !table.iter().any(|e| &e.key == required) {
                    return Err(CalendarError::config(format!(
                        "step {} requires '{}' but allocation.{} does not list it",
                        step.id, required, step.phase
                    )));
                }
            }
        }

        let phase_weights: Vec<f64> = self.assembly.phase_weights.iter().map(|(_, w)| *w).collect();
        if phase_weights.iter().any(|w| !(0.0..=1.0).contains(w))
            || !weights_sum_to_one(phase_weights)
        {
            return Err(CalendarError::config(
                "assembly.phase_weights must lie in [0, 1] and sum to 1.0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RunConfig::default().validate(&StepCatalog::standard()).unwrap();
    }

    #[test]
    fn fallback_can_never_be_enabled() {
        let mut config = RunConfig::default();
        config.executor.fallback_allowed = true;
        let err = config.validate(&StepCatalog::standard()).unwrap_err();
        assert!(err.to_string().contains("fallback_allowed"), "{err}");
    }

    #[test]
    fn criterion_weights_must_sum_to_one() {
        let mut config = RunConfig::default();
        config.quality.criteria.content.uniqueness = 0.5;
        assert!(config.validate(&StepCatalog::standard()).is_err());
    }

    #[test]
    fn required_sources_must_be_allocated() {
        let mut config = RunConfig::default();
        config.allocation.content = vec![
            AllocationEntry::new(SourceKey::ACCUMULATED_CONTEXT, 0.5),
            AllocationEntry::new(SourceKey::COMPETITOR_DATA, 0.5),
        ];
        let err = config.validate(&StepCatalog::standard()).unwrap_err();
        assert!(err.to_string().contains("keywords"), "{err}");
    }

    #[test]
    fn tiers_are_informational_bands() {
        let q = QualityConfig::default();
        assert_eq!(q.tier(Score::new(0.65).unwrap()), QualityTier::BelowThreshold);
        assert_eq!(q.tier(Score::new(0.7).unwrap()), QualityTier::Acceptable);
        assert_eq!(q.tier(Score::new(0.85).unwrap()), QualityTier::Good);
        assert_eq!(q.tier(Score::new(0.95).unwrap()), QualityTier::Excellent);
    }

    #[test]
    fn partial_toml_style_overrides_keep_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"calendar": {"duration_weeks": 2}, "retry": {"max_retries": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.calendar.duration_weeks, 2);
        assert_eq!(config.calendar.posts_per_week, 3);
        assert_eq!(config.retry.max_attempts(), 1);
        assert_eq!(config.allocation, default_allocation_table());
    }

    #[test]
    fn attempt_count_saturates() {
        let retry = RetryConfig {
            max_retries: u32::MAX,
        };
        assert_eq!(retry.max_attempts(), u32::MAX);
    }
}
