//! The quality gate.
//!
//! [`QualityGateValidator::validate`] is a pure function of the step, the
//! candidate result, the live [`ContextPackage`] and the run configuration.
//! The context is an explicit input because two criteria are cross-step:
//! uniqueness (titles/themes against everything already accepted) and
//! platform/timeline feasibility (no scheduling conflicts with prior steps).
//!
//! ## Scoring
//!
//! Each applicable criterion yields a score in `[0, 1]`. Criteria that do not
//! apply to a step (e.g. structural rules on a step without one) are left out
//! and the remaining phase weights renormalised. A step passes when the
//! weighted score reaches the configured threshold **and** no finding is
//! [`DiagnosticSeverity::Blocking`]. Duplicate titles/themes, structural
//! mismatches and scheduling conflicts are blocking.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{CalendarConfig, QualityConfig};
use crate::context::{ContextLedger, ContextPackage};
use crate::payload::{
    field_u32, flatten_text, is_empty_value, normalize_key, select, select_strings,
};
use crate::timeline::{declared_days, extract_phase_spans, extract_slots, SlotKind};
use crate::{
    CandidateResult, Diagnostic, DiagnosticCategory, DiagnosticSeverity, Phase, QualityTier, Score,
    Step, StepId, StructureRule, TimelineKind,
};

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// A quality-gate criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Required fields present and non-empty; recommended fields present.
    Completeness,
    /// No duplicate titles/themes within the result or against the context.
    Uniqueness,
    /// The result references the business goals and audience.
    StrategicAlignment,
    /// Declared structure matches the requested configuration.
    StructuralCorrectness,
    /// Platforms are configured ones and the schedule is feasible.
    PlatformTimeline,
}

impl Criterion {
    /// Every criterion, in evaluation order.
    pub const ALL: [Criterion; 5] = [
        Criterion::Completeness,
        Criterion::Uniqueness,
        Criterion::StrategicAlignment,
        Criterion::StructuralCorrectness,
        Criterion::PlatformTimeline,
    ];

    /// Snake-case name, also used as the diagnostic category.
    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::Completeness => "completeness",
            Criterion::Uniqueness => "uniqueness",
            Criterion::StrategicAlignment => "strategic_alignment",
            Criterion::StructuralCorrectness => "structural_correctness",
            Criterion::PlatformTimeline => "platform_timeline",
        }
    }

    fn category(self) -> DiagnosticCategory {
        DiagnosticCategory::from_static(self.as_str())
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one applicable criterion and its effective (renormalised) weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// The criterion.
    pub criterion: Criterion,
    /// Its score.
    pub score: Score,
    /// Effective weight in the step's weighted score.
    pub weight: f64,
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of validating one candidate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateVerdict {
    /// Validated step.
    pub step: StepId,
    /// Phase of the step.
    pub phase: Phase,
    /// Attempt that produced the candidate.
    pub attempt: u32,
    /// Whether the candidate passed.
    pub passed: bool,
    /// Weighted score.
    pub score: Score,
    /// Informational tier ([`QualityTier::BelowThreshold`] when failed).
    pub tier: QualityTier,
    /// Threshold the score was compared against.
    pub threshold: f64,
    /// Per-criterion breakdown (applicable criteria only).
    pub criteria: Vec<CriterionScore>,
    /// Findings, blocking first.
    pub diagnostics: Vec<Diagnostic>,
}

impl QualityGateVerdict {
    /// Blocking findings.
    pub fn blocking(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_blocking())
    }

    /// Returns `true` if `criterion` raised a blocking finding.
    pub fn has_blocking(&self, criterion: Criterion) -> bool {
        self.blocking().any(|d| d.category.as_str() == criterion.as_str())
    }

    /// Score of `criterion`, if it applied.
    pub fn criterion_score(&self, criterion: Criterion) -> Option<Score> {
        self.criteria
            .iter()
            .find(|c| c.criterion == criterion)
            .map(|c| c.score)
    }

    /// One-line description of why the verdict failed.
    pub fn failure_summary(&self) -> String {
        let blocking: Vec<String> = self.blocking().take(3).map(ToString::to_string).collect();
        if !blocking.is_empty() {
            return blocking.join("; ");
        }
        let breakdown: Vec<String> = self
            .criteria
            .iter()
            .map(|c| format!("{}={} (w {:.2})", c.criterion, c.score, c.weight))
            .collect();
        format!("score below threshold {:.2}: {}", self.threshold, breakdown.join(", "))
    }

    /// Diagnostics rendered as feedback lines for the next attempt.
    pub fn feedback(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .diagnostics
            .iter()
            .filter(|d| d.severity != DiagnosticSeverity::Informational)
            .map(ToString::to_string)
            .collect();
        if lines.is_empty() && !self.passed {
            lines.push(self.failure_summary());
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

struct Assessment {
    score: Score,
    diagnostics: Vec<Diagnostic>,
}

impl Assessment {
    fn new(passed: usize, checks: usize, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            score: Score::ratio(passed, checks),
            diagnostics,
        }
    }
}

fn finding(
    criterion: Criterion,
    severity: DiagnosticSeverity,
    location: Option<String>,
    message: String,
) -> Diagnostic {
    Diagnostic {
        location,
        severity,
        category: criterion.category(),
        message,
    }
}

/// Evaluates candidate results against step-specific and cross-step criteria.
#[derive(Debug, Clone)]
pub struct QualityGateValidator {
    calendar: CalendarConfig,
    quality: QualityConfig,
}

impl QualityGateValidator {
    /// Creates a validator for the requested calendar shape and thresholds.
    pub fn new(calendar: CalendarConfig, quality: QualityConfig) -> Self {
        Self { calendar, quality }
    }

    /// Validates `candidate` for `step` against the live `context`.
    pub fn validate(
        &self,
        step: &Step,
        candidate: &CandidateResult,
        context: &ContextPackage,
    ) -> QualityGateVerdict {
        let payload = candidate.payload();
        let ledger = context.ledger();

        let mut assessed: Vec<(Criterion, Assessment)> = Vec::new();
        assessed.push((Criterion::Completeness, self.completeness(step, payload)));
        if let Some(a) = self.uniqueness(step, payload, ledger) {
            assessed.push((Criterion::Uniqueness, a));
        }
        if let Some(a) = self.alignment(step, payload, ledger) {
            assessed.push((Criterion::StrategicAlignment, a));
        }
        if let Some(rule) = step.gate.structure {
            assessed.push((Criterion::StructuralCorrectness, self.structure(rule, payload)));
        }
        if let Some(kind) = step.gate.timeline {
            let timeline = self.timeline(kind, step.id, payload, ledger);
            assessed.push((Criterion::PlatformTimeline, timeline));
        }

        let weights = self.quality.criteria.get(step.phase);
        let total_weight: f64 = assessed.iter().map(|(c, _)| weights.weight_for(*c)).sum();
        let mut criteria = Vec::with_capacity(assessed.len());
        let mut diagnostics = Vec::new();
        let mut weighted = 0.0;
        for (criterion, assessment) in assessed {
            let weight = if total_weight > 0.0 {
                weights.weight_for(criterion) / total_weight
            } else {
                1.0 / Criterion::ALL.len() as f64
            };
            weighted += weight * assessment.score.as_f64();
            criteria.push(CriterionScore {
                criterion,
                score: assessment.score,
                weight,
            });
            diagnostics.extend(assessment.diagnostics);
        }
        diagnostics.sort_by_key(|d| match d.severity {
            DiagnosticSeverity::Blocking => 0,
            DiagnosticSeverity::Warning => 1,
            DiagnosticSeverity::Informational => 2,
        });

        let score = Score::clamped(weighted);
        let has_blocking = diagnostics.iter().any(Diagnostic::is_blocking);
        let passed = score.as_f64() >= self.quality.threshold && !has_blocking;
        let tier = if passed {
            self.quality.tier(score)
        } else {
            QualityTier::BelowThreshold
        };

        if passed {
            info!(
                step = %step.id,
                attempt = candidate.attempt(),
                %score,
                %tier,
                "Quality gate passed"
            );
        } else {
            warn!(
                step = %step.id,
                attempt = candidate.attempt(),
                %score,
                blocking = diagnostics.iter().filter(|d| d.is_blocking()).count(),
                "Quality gate rejected result"
            );
        }

        QualityGateVerdict {
            step: step.id,
            phase: step.phase,
            attempt: candidate.attempt(),
            passed,
            score,
            tier,
            threshold: self.quality.threshold,
            criteria,
            diagnostics,
        }
    }

    fn completeness(&self, step: &Step, payload: &Value) -> Assessment {
        let c = Criterion::Completeness;
        let mut diagnostics = Vec::new();
        let mut ok = 0;
        for field in &step.output.required {
            match payload.get(&field.name) {
                Some(v) if !is_empty_value(v) => ok += 1,
                _ => diagnostics.push(finding(
                    c,
                    DiagnosticSeverity::Blocking,
                    Some(field.name.clone()),
                    format!("required field '{}' is empty", field.name),
                )),
            }
        }
        for name in &step.output.recommended {
            match payload.get(name) {
                Some(v) if !is_empty_value(v) => ok += 1,
                _ => diagnostics.push(finding(
                    c,
                    DiagnosticSeverity::Informational,
                    Some(name.clone()),
                    format!("recommended field '{name}' is missing"),
                )),
            }
        }
        let checks = step.output.required.len() + step.output.recommended.len();
        Assessment::new(ok, checks, diagnostics)
    }

    fn uniqueness(
        &self,
        step: &Step,
        payload: &Value,
        ledger: &ContextLedger,
    ) -> Option<Assessment> {
        if step.gate.unique_paths.is_empty() {
            return None;
        }
        let c = Criterion::Uniqueness;
        let mut diagnostics = Vec::new();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        let mut total = 0;
        let mut duplicates = 0;
        for path in &step.gate.unique_paths {
            for (location, text) in select_strings(payload, path) {
                total += 1;
                let key = normalize_key(text);
                if let Some(prior) = ledger.find_used(text) {
                    duplicates += 1;
                    diagnostics.push(finding(
                        c,
                        DiagnosticSeverity::Blocking,
                        Some(location),
                        format!("'{text}' was already used by step {}", prior.step),
                    ));
                } else if let Some(first) = seen.get(&key) {
                    duplicates += 1;
                    diagnostics.push(finding(
                        c,
                        DiagnosticSeverity::Blocking,
                        Some(location),
                        format!("'{text}' repeats {first} within this result"),
                    ));
                } else {
                    seen.insert(key, location);
                }
            }
        }
        Some(Assessment::new(total - duplicates, total, diagnostics))
    }

    fn alignment(
        &self,
        step: &Step,
        payload: &Value,
        ledger: &ContextLedger,
    ) -> Option<Assessment> {
        let anchors = ledger.anchors();
        if !step.gate.alignment || anchors.is_empty() {
            return None;
        }
        let text = flatten_text(payload);
        let matched = anchors.iter().filter(|a| a.is_referenced_by(&text)).count();
        let needed = anchors.len().min(self.quality.alignment_min_matches.max(1));
        let mut diagnostics = Vec::new();
        if matched == 0 {
            let labels: Vec<&str> = anchors.iter().map(|a| a.label.as_str()).collect();
            diagnostics.push(finding(
                Criterion::StrategicAlignment,
                DiagnosticSeverity::Warning,
                None,
                format!(
                    "result references none of the business goals or audience: {}",
                    labels.join(" | ")
                ),
            ));
        }
        Some(Assessment::new(matched.min(needed), needed, diagnostics))
    }

    fn structure(&self, rule: StructureRule, payload: &Value) -> Assessment {
        let c = Criterion::StructuralCorrectness;
        let cal = &self.calendar;
        let blocking = |location: &str, message: String| {
            finding(c, DiagnosticSeverity::Blocking, Some(location.to_string()), message)
        };
        let mut diagnostics = Vec::new();
        let (passed, checks) = match rule {
            StructureRule::CalendarFramework => {
                let mut passed = 0;
                let fields = [
                    ("duration_weeks", cal.duration_weeks),
                    ("posts_per_week", cal.posts_per_week),
                ];
                for (field, expected) in fields {
                    match field_u32(payload, field) {
                        Some(v) if v == expected => passed += 1,
                        other => diagnostics.push(blocking(
                            field,
                            format!("declares {field} = {other:?}, configuration requires {expected}"),
                        )),
                    }
                }
                let declared: BTreeSet<String> = select_strings(payload, "platforms[]")
                    .into_iter()
                    .map(|(_, p)| p.trim().to_lowercase())
                    .collect();
                let expected: BTreeSet<String> =
                    cal.platforms.iter().map(|p| p.trim().to_lowercase()).collect();
                if declared == expected {
                    passed += 1;
                } else {
                    diagnostics.push(blocking(
                        "platforms",
                        format!("declares platforms {declared:?}, configuration requires {expected:?}"),
                    ));
                }
                (passed, 3)
            }
            StructureRule::PillarDistribution => {
                let pillars = select(payload, "pillars[]");
                let mut passed = 0;
                let mut sum = 0.0;
                for pillar in &pillars {
                    match pillar.value.get("percentage").and_then(Value::as_f64) {
                        Some(p) if p > 0.0 => {
                            passed += 1;
                            sum += p;
                        }
                        _ => diagnostics.push(blocking(
                            &pillar.location,
                            "pillar has no positive percentage".to_string(),
                        )),
                    }
                }
                if (sum - 100.0).abs() <= 1.0 {
                    passed += 1;
                } else {
                    diagnostics.push(blocking(
                        "pillars",
                        format!("pillar percentages sum to {sum:.1}, expected 100"),
                    ));
                }
                (passed, pillars.len() + 1)
            }
            StructureRule::PlatformCoverage => {
                let covered: Vec<String> = select_strings(payload, "platform_strategies[].platform")
                    .into_iter()
                    .map(|(_, p)| p.to_string())
                    .collect();
                let mut passed = 0;
                for platform in &cal.platforms {
                    if covered.iter().any(|p| p.trim().eq_ignore_ascii_case(platform.trim())) {
                        passed += 1;
                    } else {
                        diagnostics.push(blocking(
                            "platform_strategies",
                            format!("no strategy for configured platform '{platform}'"),
                        ));
                    }
                }
                let extras: Vec<&String> =
                    covered.iter().filter(|p| !cal.has_platform(p)).collect();
                if !extras.is_empty() {
                    diagnostics.push(finding(
                        c,
                        DiagnosticSeverity::Warning,
                        Some("platform_strategies".to_string()),
                        format!("strategies for unconfigured platforms: {extras:?}"),
                    ));
                }
                (passed, cal.platforms.len() + extras.len())
            }
            StructureRule::WeeklyThemeCount => {
                let count = select(payload, "weekly_themes[]").len();
                let expected = cal.duration_weeks as usize;
                if count == expected {
                    (1, 1)
                } else {
                    diagnostics.push(blocking(
                        "weekly_themes",
                        format!("declares {count} weekly themes, calendar has {expected} weeks"),
                    ));
                    (0, 1)
                }
            }
            StructureRule::DailyCoverage => {
                let days = declared_days(payload);
                let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
                for day in &days {
                    *counts.entry(*day).or_default() += 1;
                }
                let total = cal.total_days();
                let missing: Vec<u32> = (1..=total).filter(|d| !counts.contains_key(d)).collect();
                let repeated: Vec<u32> =
                    counts.iter().filter(|(_, n)| **n > 1).map(|(d, _)| *d).collect();
                if !missing.is_empty() {
                    diagnostics.push(blocking(
                        "days",
                        format!("schedule does not cover days {missing:?}"),
                    ));
                }
                if !repeated.is_empty() {
                    diagnostics.push(blocking(
                        "days",
                        format!("days declared more than once: {repeated:?}"),
                    ));
                }
                let covered_once = (1..=total).filter(|d| counts.get(d) == Some(&1)).count();
                (covered_once, total as usize)
            }
        };
        Assessment::new(passed, checks, diagnostics)
    }

    fn timeline(
        &self,
        kind: TimelineKind,
        step: StepId,
        payload: &Value,
        ledger: &ContextLedger,
    ) -> Assessment {
        let c = Criterion::PlatformTimeline;
        let cal = &self.calendar;
        let blocking = |location: String, message: String| {
            finding(c, DiagnosticSeverity::Blocking, Some(location), message)
        };
        let mut diagnostics = Vec::new();
        let mut checks = 0;
        let mut failures = 0;

        match kind {
            TimelineKind::PhaseSpans => {
                let extracted = extract_phase_spans(payload);
                for location in extracted.malformed {
                    checks += 1;
                    failures += 1;
                    diagnostics.push(blocking(
                        location,
                        "timeline phase lacks start_week/end_week".to_string(),
                    ));
                }
                let mut spans: Vec<_> = extracted.items;
                spans.sort_by_key(|(_, s)| (s.start_week, s.end_week));
                let mut previous_end = 0;
                for (location, span) in spans {
                    checks += 1;
                    if span.start_week < 1
                        || span.start_week > span.end_week
                        || span.end_week > cal.duration_weeks
                    {
                        failures += 1;
                        diagnostics.push(blocking(
                            location,
                            format!(
                                "phase '{}' spans weeks {}..={}, outside 1..={}",
                                span.label, span.start_week, span.end_week, cal.duration_weeks
                            ),
                        ));
                    } else if span.start_week <= previous_end {
                        failures += 1;
                        diagnostics.push(blocking(
                            location,
                            format!(
                                "phase '{}' overlaps the previous phase at week {}",
                                span.label, span.start_week
                            ),
                        ));
                    }
                    previous_end = previous_end.max(span.end_week);
                }
            }
            TimelineKind::WeeklyThemes => {
                let extracted = extract_slots(kind, step, payload);
                for location in extracted.malformed {
                    checks += 1;
                    failures += 1;
                    diagnostics.push(blocking(
                        location,
                        "weekly theme lacks week or theme".to_string(),
                    ));
                }
                let prior: BTreeMap<u32, StepId> = ledger
                    .slots()
                    .iter()
                    .filter(|s| s.kind == SlotKind::WeekTheme)
                    .map(|s| (s.week, s.step))
                    .collect();
                let mut weeks = BTreeSet::new();
                for (location, slot) in extracted.items {
                    checks += 1;
                    if slot.week < 1 || slot.week > cal.duration_weeks {
                        failures += 1;
                        diagnostics.push(blocking(
                            location,
                            format!("week {} is outside 1..={}", slot.week, cal.duration_weeks),
                        ));
                    } else if let Some(owner) = prior.get(&slot.week) {
                        failures += 1;
                        diagnostics.push(blocking(
                            location,
                            format!("week {} already has a theme from step {owner}", slot.week),
                        ));
                    } else if !weeks.insert(slot.week) {
                        failures += 1;
                        diagnostics.push(blocking(
                            location,
                            format!("week {} is themed twice", slot.week),
                        ));
                    }
                }
            }
            TimelineKind::DailySchedule => {
                let extracted = extract_slots(kind, step, payload);
                for location in extracted.malformed {
                    checks += 1;
                    failures += 1;
                    diagnostics.push(blocking(
                        location,
                        "post lacks day, title or platform".to_string(),
                    ));
                }
                let mut per_day: BTreeMap<u32, usize> = BTreeMap::new();
                let mut per_week_platform: BTreeMap<(u32, String), usize> = BTreeMap::new();
                for slot in ledger.slots().iter().filter(|s| s.kind == SlotKind::Post) {
                    if let (Some(day), Some(platform)) = (slot.day, slot.platform.as_deref()) {
                        *per_day.entry(day).or_default() += 1;
                        *per_week_platform
                            .entry((slot.week, platform.to_lowercase()))
                            .or_default() += 1;
                    }
                }
                for (location, slot) in &extracted.items {
                    checks += 1;
                    let day = slot.day.unwrap_or_default();
                    let platform = slot.platform.clone().unwrap_or_default();
                    if day < 1 || day > cal.total_days() {
                        failures += 1;
                        diagnostics.push(blocking(
                            location.clone(),
                            format!("day {day} is outside 1..={}", cal.total_days()),
                        ));
                        continue;
                    }
                    if !cal.has_platform(&platform) {
                        failures += 1;
                        diagnostics.push(finding(
                            c,
                            DiagnosticSeverity::Warning,
                            Some(location.clone()),
                            format!("platform '{platform}' is not configured"),
                        ));
                    }
                    *per_day.entry(day).or_default() += 1;
                    *per_week_platform
                        .entry((slot.week, platform.to_lowercase()))
                        .or_default() += 1;
                }
                let cap = cal.daily_cap() as usize;
                for (day, count) in &per_day {
                    checks += 1;
                    if *count > cap {
                        failures += 1;
                        diagnostics.push(blocking(
                            format!("day {day}"),
                            format!("day {day} has {count} posts, limit is {cap}"),
                        ));
                    }
                }
                let weekly = cal.posts_per_week as usize;
                for ((week, platform), count) in &per_week_platform {
                    checks += 1;
                    if *count > weekly {
                        failures += 1;
                        diagnostics.push(blocking(
                            format!("week {week}"),
                            format!("week {week} has {count} posts on {platform}, limit is {weekly}"),
                        ));
                    }
                }
            }
        }
        Assessment::new(checks - failures, checks, diagnostics)
    }
}
