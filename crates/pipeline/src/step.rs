//! Step descriptors and the standard twelve-step catalog.
//!
//! A [`Step`] is created once when the orchestrator is initialised and never
//! mutated. It declares what the step needs (data sources, prior steps), what
//! it must produce ([`OutputSchema`]) and which gate rules apply to it
//! ([`GateRules`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Phase, SourceKey, StepId};

// ---------------------------------------------------------------------------
// Output schema
// ---------------------------------------------------------------------------

/// JSON kind expected for a top-level payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A JSON string.
    Text,
    /// A JSON number.
    Number,
    /// A JSON array.
    List,
    /// A JSON object.
    Object,
    /// Either a string or an object (free-form descriptions).
    TextOrObject,
}

impl FieldKind {
    /// Returns `true` if `value` has this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::List => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::TextOrObject => value.is_string() || value.is_object(),
        }
    }
}

/// A required top-level field of a step's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Expected JSON kind.
    pub kind: FieldKind,
}

impl FieldSpec {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Expected shape of a step's payload.
///
/// `required` fields are enforced by the executor (absent or wrong kind is a
/// malformed response); the quality gate additionally checks they are
/// non-empty and scores the presence of `recommended` fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Fields that must be present with the given kind.
    pub required: Vec<FieldSpec>,
    /// Fields that improve completeness when present.
    pub recommended: Vec<String>,
}

impl OutputSchema {
    /// Returns the names of required fields that are missing from `payload`
    /// or have the wrong kind.
    pub fn shape_violations(&self, payload: &Value) -> Vec<String> {
        let Some(obj) = payload.as_object() else {
            return self.required.iter().map(|f| f.name.clone()).collect();
        };
        self.required
            .iter()
            .filter(|f| !obj.get(&f.name).is_some_and(|v| f.kind.accepts(v)))
            .map(|f| f.name.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Gate rules
// ---------------------------------------------------------------------------

/// Step-specific structural rule checked by the structural-correctness
/// criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureRule {
    /// `duration_weeks`, `posts_per_week` and `platforms` equal the
    /// configuration exactly.
    CalendarFramework,
    /// `pillars[].percentage` sums to 100.
    PillarDistribution,
    /// `platform_strategies[].platform` covers every configured platform.
    PlatformCoverage,
    /// `weekly_themes` has exactly one entry per calendar week.
    WeeklyThemeCount,
    /// `days[].day` covers every day of the calendar exactly once.
    DailyCoverage,
}

/// Kind of timeline a step's payload declares, checked by the
/// platform/timeline criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// `timeline_phases[]` with `start_week` / `end_week` spans.
    PhaseSpans,
    /// `weekly_themes[]` with a `week` number each.
    WeeklyThemes,
    /// `days[]` with `day` numbers and `posts[]` per day.
    DailySchedule,
}

/// Gate rules attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateRules {
    /// Paths whose string values must be unique across the run
    /// (e.g. `"weekly_themes[].theme"`).
    pub unique_paths: Vec<String>,
    /// Structural rule, if any.
    pub structure: Option<StructureRule>,
    /// Timeline kind, if any.
    pub timeline: Option<TimelineKind>,
    /// Whether the strategic-alignment criterion applies.
    pub alignment: bool,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Immutable descriptor of one chained generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step id (`1..=12`).
    pub id: StepId,
    /// Owning phase.
    pub phase: Phase,
    /// Machine name (e.g. `"weekly_theme_development"`).
    pub name: String,
    /// One-line purpose, passed to the generation service.
    pub purpose: String,
    /// Upstream sources that must be present in the step's bundle.
    pub required_sources: Vec<SourceKey>,
    /// Prior steps whose output this step consumes.
    pub depends_on: Vec<StepId>,
    /// Expected payload shape.
    pub output: OutputSchema,
    /// Quality-gate rules.
    pub gate: GateRules,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({})", self.id, self.name)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The ordered set of twelve steps a run executes.
///
/// Invariant: contains exactly one step per [`StepId`], in id order, with
/// phases non-decreasing and dependencies pointing only at earlier steps.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCatalog {
    steps: Vec<Step>,
}

impl StepCatalog {
    /// Builds a catalog from `steps`, checking the ordering invariants.
    ///
    /// Returns `None` if the steps are not exactly ids `1..=12` in order, if
    /// phases go backwards, or if any dependency is not an earlier step.
    pub fn new(steps: Vec<Step>) -> Option<Self> {
        if steps.len() != usize::from(StepId::COUNT) {
            return None;
        }
        let ids_ok = steps.iter().zip(StepId::all()).all(|(s, id)| s.id == id);
        let phases_ok = steps.windows(2).all(|w| w[0].phase <= w[1].phase);
        let deps_ok = steps
            .iter()
            .all(|s| s.depends_on.iter().all(|d| *d < s.id));
        (ids_ok && phases_ok && deps_ok).then_some(Self { steps })
    }

    /// Returns the step with `id`.
    pub fn get(&self, id: StepId) -> &Step {
        &self.steps[usize::from(id.as_u8() - 1)]
    }

    /// Iterates steps in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// Iterates the steps of `phase` in id order.
    pub fn phase_steps(&self, phase: Phase) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }

    /// Number of steps in `phase`.
    pub fn phase_len(&self, phase: Phase) -> usize {
        self.phase_steps(phase).count()
    }

    /// The standard twelve-step content calendar.
    pub fn standard() -> Self {
        use FieldKind::*;

        let aligned = |unique: &[&str],
                       structure: Option<StructureRule>,
                       timeline: Option<TimelineKind>| GateRules {
            unique_paths: unique.iter().map(|p| p.to_string()).collect(),
            structure,
            timeline,
            alignment: true,
        };

        let steps = vec![
            descriptor(
                1,
                Phase::Foundation,
                "content_strategy_analysis",
                "Analyse the content strategy: pillars, goals, audience and positioning.",
                &[SourceKey::STRATEGY, SourceKey::ONBOARDING_SUMMARY],
                &[],
                &[
                    ("summary", Text),
                    ("content_pillars", List),
                    ("business_goals", List),
                    ("target_audience", TextOrObject),
                ],
                &["positioning", "brand_voice"],
                aligned(&[], None, None),
            ),
            descriptor(
                2,
                Phase::Foundation,
                "gap_analysis",
                "Identify content gaps and prioritised opportunities.",
                &[SourceKey::STRATEGY, SourceKey::GAP_ANALYSIS],
                &[1],
                &[("summary", Text), ("opportunities", List)],
                &["quick_wins"],
                aligned(&["opportunities[].title"], None, None),
            ),
            descriptor(
                3,
                Phase::Foundation,
                "audience_platform_strategy",
                "Define audience segments and platform priorities.",
                &[SourceKey::STRATEGY, SourceKey::ONBOARDING_SUMMARY],
                &[1],
                &[("summary", Text), ("audience_segments", List), ("platform_priorities", List)],
                &["posting_windows"],
                aligned(&[], None, None),
            ),
            descriptor(
                4,
                Phase::Structure,
                "calendar_framework",
                "Lay out the calendar framework and timeline phases.",
                &[SourceKey::STRATEGY],
                &[1, 2, 3],
                &[
                    ("duration_weeks", Number),
                    ("posts_per_week", Number),
                    ("platforms", List),
                    ("timeline_phases", List),
                ],
                &["summary"],
                aligned(
                    &["timeline_phases[].theme"],
                    Some(StructureRule::CalendarFramework),
                    Some(TimelineKind::PhaseSpans),
                ),
            ),
            descriptor(
                5,
                Phase::Structure,
                "content_pillar_distribution",
                "Distribute content pillars across the calendar.",
                &[SourceKey::STRATEGY],
                &[4],
                &[("summary", Text), ("pillars", List)],
                &["rotation"],
                aligned(&[], Some(StructureRule::PillarDistribution), None),
            ),
            descriptor(
                6,
                Phase::Structure,
                "platform_strategy",
                "Tailor formats, tone and cadence for each platform.",
                &[SourceKey::PERFORMANCE_HISTORY],
                &[3, 4],
                &[("summary", Text), ("platform_strategies", List)],
                &["cross_posting"],
                aligned(&[], Some(StructureRule::PlatformCoverage), None),
            ),
            descriptor(
                7,
                Phase::Content,
                "weekly_theme_development",
                "Develop one distinct theme per calendar week.",
                &[SourceKey::KEYWORDS],
                &[4, 5],
                &[("weekly_themes", List)],
                &["summary"],
                aligned(
                    &["weekly_themes[].theme"],
                    Some(StructureRule::WeeklyThemeCount),
                    Some(TimelineKind::WeeklyThemes),
                ),
            ),
            descriptor(
                8,
                Phase::Content,
                "daily_content_planning",
                "Schedule individual posts for every calendar day.",
                &[SourceKey::KEYWORDS],
                &[6, 7],
                &[("days", List)],
                &["summary"],
                aligned(
                    &["days[].posts[].title"],
                    Some(StructureRule::DailyCoverage),
                    Some(TimelineKind::DailySchedule),
                ),
            ),
            descriptor(
                9,
                Phase::Content,
                "content_recommendations",
                "Recommend additional content pieces and formats.",
                &[SourceKey::KEYWORDS, SourceKey::COMPETITOR_DATA],
                &[7],
                &[("summary", Text), ("recommendations", List)],
                &["formats"],
                aligned(&["recommendations[].title"], None, None),
            ),
            descriptor(
                10,
                Phase::Optimization,
                "performance_optimization",
                "Optimise the plan for predicted performance.",
                &[SourceKey::PERFORMANCE_HISTORY],
                &[8, 9],
                &[("summary", Text), ("optimizations", List)],
                &["predicted_engagement"],
                aligned(&[], None, None),
            ),
            descriptor(
                11,
                Phase::Optimization,
                "strategy_alignment_validation",
                "Validate the plan against the original strategy.",
                &[SourceKey::STRATEGY],
                &[1, 8, 9, 10],
                &[("summary", Text), ("alignment_findings", List)],
                &["alignment_score"],
                aligned(&[], None, None),
            ),
            descriptor(
                12,
                Phase::Optimization,
                "final_calendar_assembly",
                "Summarise the final calendar and its highlights.",
                &[SourceKey::STRATEGY],
                &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
                &[("summary", Text), ("highlights", List)],
                &["next_steps"],
                aligned(&[], None, None),
            ),
        ];

        Self { steps }
    }
}

#[allow(clippy::too_many_arguments)]
fn descriptor(
    id: u8,
    phase: Phase,
    name: &str,
    purpose: &str,
    required: &[&'static str],
    depends: &[u8],
    fields: &[(&str, FieldKind)],
    recommended: &[&str],
    gate: GateRules,
) -> Step {
    Step {
        id: StepId::new_unchecked(id),
        phase,
        name: name.to_string(),
        purpose: purpose.to_string(),
        required_sources: required.iter().map(|k| SourceKey::from_static(k)).collect(),
        depends_on: depends.iter().map(|d| StepId::new_unchecked(*d)).collect(),
        output: OutputSchema {
            required: fields.iter().map(|(n, k)| FieldSpec::new(n, *k)).collect(),
            recommended: recommended.iter().map(|r| r.to_string()).collect(),
        },
        gate,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn standard_catalog_satisfies_invariants() {
        let catalog = StepCatalog::standard();
        let rebuilt = StepCatalog::new(catalog.iter().cloned().collect());
        assert_eq!(rebuilt.as_ref(), Some(&catalog));
        assert_eq!(catalog.phase_len(Phase::Foundation), 3);
        assert_eq!(catalog.phase_len(Phase::Structure), 3);
        assert_eq!(catalog.phase_len(Phase::Content), 3);
        assert_eq!(catalog.phase_len(Phase::Optimization), 3);
    }

    #[test]
    fn catalog_rejects_forward_dependencies() {
        let mut steps: Vec<Step> = StepCatalog::standard().iter().cloned().collect();
        steps[2].depends_on.push(StepId::new_unchecked(5));
        assert!(StepCatalog::new(steps).is_none());
    }

    #[test]
    fn shape_violations_report_missing_and_mistyped_fields() {
        let catalog = StepCatalog::standard();
        let schema = &catalog.get(StepId::new_unchecked(5)).output;
        let payload = json!({ "summary": "pillars", "pillars": "not a list" });
        assert_eq!(schema.shape_violations(&payload), vec!["pillars".to_string()]);
        assert_eq!(schema.shape_violations(&json!("text")).len(), 2);
    }
}
