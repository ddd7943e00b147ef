//! The context accumulator.
//!
//! Twelve chained steps cannot each replay the full output of every prior
//! step: the combined history outgrows any single generation request. The
//! [`ContextAccumulator`] instead keeps one size-bounded [`ContextPackage`]
//! that is *rebuilt* (never appended to) after every accepted step.
//!
//! ## Structure
//!
//! A package has two parts:
//!
//! - **Entries**: one per accepted step, each pointing at an immutable
//!   [`StepDigest`] (the arena, indexed by step id) at some
//!   [`CompressionLevel`]. Digests precompute every level, so rebuilding a
//!   package never re-reads old payloads.
//! - **Ledger**: the compact facts cross-step checks need verbatim: used
//!   titles/themes, scheduled timeline slots, and the strategy anchors
//!   (business goals and audience). The ledger is never compressed.
//!
//! ## Compression policy
//!
//! While the rendered package exceeds its budget, the entry with the lowest
//! retention priority is lowered one level (`Full → Summary → Headline →
//! Marker`). Priority is the entry's phase weight from
//! [`ContextConfig::entry_weights`]; ties go to the older step. Every lowered
//! entry carries a `[compressed: …]` marker, so nothing disappears silently.
//! If every entry is at `Marker` and the package still does not fit, the fold
//! fails with [`CalendarError::ContextBudgetExceeded`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ContextConfig;
use crate::payload::{normalize_key, select_strings, truncate_chars};
use crate::timeline::{extract_slots, SlotKind, TimelineSlot};
use crate::{CalendarError, Phase, Step, StepCatalog, StepId, StepResult};

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

/// How much of a step's output an entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Only a marker that the step exists and was compressed away.
    Marker,
    /// Step identity and the shape of its payload.
    Headline,
    /// Truncated top-level values.
    Summary,
    /// The complete payload.
    Full,
}

impl CompressionLevel {
    /// The next lower level, or `None` at [`CompressionLevel::Marker`].
    pub fn lower(self) -> Option<Self> {
        match self {
            CompressionLevel::Full => Some(CompressionLevel::Summary),
            CompressionLevel::Summary => Some(CompressionLevel::Headline),
            CompressionLevel::Headline => Some(CompressionLevel::Marker),
            CompressionLevel::Marker => None,
        }
    }
}

/// Immutable, precomputed renderings of one accepted step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDigest {
    step: StepId,
    phase: Phase,
    name: String,
    weight: f64,
    full: String,
    summary: String,
    headline: String,
    marker: String,
}

impl StepDigest {
    /// Builds the digest of `result` with retention `weight`.
    pub fn from_result(result: &StepResult, weight: f64, summary_chars: usize) -> Self {
        let payload = result.payload();
        let full = payload.to_string();
        let summary = format!(
            "[compressed: summary] {}",
            truncate_chars(&summarize_payload(payload), summary_chars)
        );
        let headline = format!(
            "[compressed: headline] fields: {}; score {}",
            top_level_shape(payload),
            result.quality_score()
        );
        let marker = format!("[compressed: step {} {} omitted]", result.step(), result.name());
        Self {
            step: result.step(),
            phase: result.phase(),
            name: result.name().to_string(),
            weight,
            full,
            summary,
            headline,
            marker,
        }
    }

    /// Originating step.
    pub fn step(&self) -> StepId {
        self.step
    }

    /// Retention weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Text at `level`.
    pub fn text(&self, level: CompressionLevel) -> &str {
        match level {
            CompressionLevel::Full => &self.full,
            CompressionLevel::Summary => &self.summary,
            CompressionLevel::Headline => &self.headline,
            CompressionLevel::Marker => &self.marker,
        }
    }
}

fn item_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["title", "theme", "name", "platform"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn summarize_payload(payload: &Value) -> String {
    let Some(map) = payload.as_object() else {
        return truncate_chars(&payload.to_string(), 200).to_string();
    };
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {}", truncate_chars(s, 160)),
            Value::Array(items) => {
                let labels: Vec<String> = items.iter().filter_map(item_label).take(3).collect();
                if labels.is_empty() {
                    format!("{k}: {} items", items.len())
                } else {
                    format!("{k}: {} items ({})", items.len(), labels.join(", "))
                }
            }
            Value::Object(inner) => {
                format!("{k}: {{{}}}", inner.keys().cloned().collect::<Vec<_>>().join(", "))
            }
            other => format!("{k}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn top_level_shape(payload: &Value) -> String {
    match payload.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::Array(items) => format!("{k}[{}]", items.len()),
                _ => k.clone(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        None => "<non-object>".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A title or theme already used by an accepted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedKey {
    /// Text as it appeared.
    pub text: String,
    /// Step that used it.
    pub step: StepId,
}

/// A business goal or audience description results should reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAnchor {
    /// Original text.
    pub label: String,
    /// Significant lower-case terms; any one appearing counts as a reference.
    pub terms: Vec<String>,
}

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "being", "from", "have", "into", "more", "most", "over",
    "such", "than", "that", "their", "them", "then", "they", "this", "those", "through", "very",
    "were", "what", "when", "which", "while", "with", "your",
];

impl StrategyAnchor {
    /// Creates an anchor from free text. Returns `None` if the text has no
    /// significant terms.
    pub fn from_text(label: &str) -> Option<Self> {
        let mut seen = BTreeSet::new();
        let terms: Vec<String> = label
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(&w.as_str()))
            .filter(|w| seen.insert(w.clone()))
            .collect();
        (!terms.is_empty()).then(|| Self {
            label: label.trim().to_string(),
            terms,
        })
    }

    /// Returns `true` if `text` (lower-cased) mentions any anchor term.
    pub fn is_referenced_by(&self, lowercase_text: &str) -> bool {
        self.terms.iter().any(|t| lowercase_text.contains(t.as_str()))
    }
}

/// Extracts anchors from a strategy payload's `business_goals` and
/// `target_audience` fields.
///
/// Goals may be strings or objects with a `goal`, `name` or `title` field;
/// the audience may be a string, a list, or an object of descriptive strings.
pub fn anchors_from_strategy(strategy: &Value) -> Vec<StrategyAnchor> {
    let mut labels: Vec<String> = Vec::new();
    if let Some(goals) = strategy.get("business_goals").and_then(Value::as_array) {
        for goal in goals {
            let text = match goal {
                Value::String(s) => Some(s.as_str()),
                Value::Object(map) => ["goal", "name", "title"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str)),
                _ => None,
            };
            labels.extend(text.map(str::to_string));
        }
    }
    match strategy.get("target_audience") {
        Some(Value::String(s)) => labels.push(s.clone()),
        Some(Value::Array(items)) => {
            labels.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
        }
        Some(Value::Object(map)) => {
            labels.extend(map.values().filter_map(|v| v.as_str().map(str::to_string)));
        }
        _ => {}
    }
    labels.iter().filter_map(|l| StrategyAnchor::from_text(l)).collect()
}

/// Facts carried verbatim across steps for cross-step checks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextLedger {
    used: BTreeMap<String, UsedKey>,
    slots: Vec<TimelineSlot>,
    anchors: Vec<StrategyAnchor>,
}

impl ContextLedger {
    /// Creates a ledger seeded with strategy anchors.
    pub fn with_anchors(anchors: Vec<StrategyAnchor>) -> Self {
        Self {
            anchors,
            ..Self::default()
        }
    }

    /// Returns the prior use of a title/theme, matched after normalisation.
    pub fn find_used(&self, text: &str) -> Option<&UsedKey> {
        self.used.get(&normalize_key(text))
    }

    /// Iterates used titles/themes.
    pub fn used(&self) -> impl Iterator<Item = &UsedKey> {
        self.used.values()
    }

    /// Accepted timeline slots, in fold order.
    pub fn slots(&self) -> &[TimelineSlot] {
        &self.slots
    }

    /// Strategy anchors.
    pub fn anchors(&self) -> &[StrategyAnchor] {
        &self.anchors
    }

    fn record(&mut self, step: &Step, result: &StepResult) {
        for path in &step.gate.unique_paths {
            for (_, text) in select_strings(result.payload(), path) {
                self.used.entry(normalize_key(text)).or_insert_with(|| UsedKey {
                    text: text.to_string(),
                    step: step.id,
                });
            }
        }
        if let Some(kind) = step.gate.timeline {
            let extracted = extract_slots(kind, step.id, result.payload());
            self.slots.extend(extracted.items.into_iter().map(|(_, slot)| slot));
        }
    }

    fn render_into(&self, out: &mut String) {
        if !self.used.is_empty() {
            out.push_str("Used titles and themes (do not repeat):\n");
            for key in self.used.values() {
                out.push_str(&format!("- {} (step {})\n", key.text, key.step));
            }
        }
        if !self.slots.is_empty() {
            out.push_str("Scheduled:\n");
            for slot in &self.slots {
                match (slot.kind, slot.day, slot.platform.as_deref()) {
                    (SlotKind::Post, Some(day), Some(platform)) => {
                        out.push_str(&format!("- day {day} {platform}: {}\n", slot.title));
                    }
                    _ => out.push_str(&format!("- week {} theme: {}\n", slot.week, slot.title)),
                }
            }
        }
        if !self.anchors.is_empty() {
            out.push_str("Strategy anchors:\n");
            for anchor in &self.anchors {
                out.push_str(&format!("- {}\n", anchor.label));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

/// One step's presence in a package.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    digest: Arc<StepDigest>,
    level: CompressionLevel,
    priority: f64,
}

impl ContextEntry {
    /// Originating step.
    pub fn step(&self) -> StepId {
        self.digest.step
    }

    /// Current compression level.
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Text at the current level.
    pub fn text(&self) -> &str {
        self.digest.text(self.level)
    }
}

/// Size-bounded summary of all previously accepted steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPackage {
    as_of: Option<StepId>,
    prepared_for: Option<StepId>,
    budget: usize,
    entries: Vec<ContextEntry>,
    ledger: ContextLedger,
}

impl ContextPackage {
    /// An empty package holding only the strategy anchors.
    pub fn empty(budget: usize, anchors: Vec<StrategyAnchor>) -> Self {
        Self {
            as_of: None,
            prepared_for: None,
            budget,
            entries: Vec::new(),
            ledger: ContextLedger::with_anchors(anchors),
        }
    }

    /// Last accepted step folded into this package.
    pub fn as_of(&self) -> Option<StepId> {
        self.as_of
    }

    /// Step this package was prepared for, if produced by
    /// [`ContextAccumulator::summarize_for`].
    pub fn prepared_for(&self) -> Option<StepId> {
        self.prepared_for
    }

    /// Size budget this package was built under.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Entries in step order.
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// The entry for `step`, if present.
    pub fn entry(&self, step: StepId) -> Option<&ContextEntry> {
        self.entries.iter().find(|e| e.step() == step)
    }

    /// Cross-step ledger.
    pub fn ledger(&self) -> &ContextLedger {
        &self.ledger
    }

    /// Renders the package as text for a generation request.
    pub fn render(&self) -> String {
        render_parts(self.as_of, &self.entries, &self.ledger)
    }

    /// Size of the rendered package, in characters.
    pub fn size(&self) -> usize {
        self.render().chars().count()
    }
}

fn render_parts(as_of: Option<StepId>, entries: &[ContextEntry], ledger: &ContextLedger) -> String {
    let mut out = String::new();
    if let Some(step) = as_of {
        out.push_str(&format!("Context as of step {step}\n"));
    }
    for entry in entries {
        out.push_str(&format!(
            "[step {} {} | {}]\n{}\n",
            entry.digest.step, entry.digest.name, entry.digest.phase, entry.text()
        ));
    }
    ledger.render_into(&mut out);
    out
}

/// Lowers entries until the rendering fits `budget`.
fn pack(
    as_of: Option<StepId>,
    mut entries: Vec<ContextEntry>,
    ledger: &ContextLedger,
    budget: usize,
    blame: StepId,
) -> Result<Vec<ContextEntry>, CalendarError> {
    loop {
        let size = render_parts(as_of, &entries, ledger).chars().count();
        if size <= budget {
            return Ok(entries);
        }
        let victim = entries
            .iter_mut()
            .filter(|e| e.level != CompressionLevel::Marker)
            .min_by(|a, b| {
                a.priority
                    .partial_cmp(&b.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.step().cmp(&b.step()))
            });
        match victim {
            Some(entry) => {
                if let Some(lower) = entry.level.lower() {
                    debug!(
                        step = %entry.step(),
                        from = ?entry.level,
                        to = ?lower,
                        "Compressing context entry"
                    );
                    entry.level = lower;
                }
            }
            None => {
                return Err(CalendarError::ContextBudgetExceeded {
                    step: blame,
                    required: size,
                    budget,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Owner of the single live [`ContextPackage`] of a run.
///
/// The live package is replaced only by [`ContextAccumulator::accept`], after
/// a step's result has been accepted. Readers always see the package as of
/// the last accepted step.
#[derive(Debug, Clone)]
pub struct ContextAccumulator {
    config: ContextConfig,
    catalog: Arc<StepCatalog>,
    live: ContextPackage,
}

impl ContextAccumulator {
    /// Creates an accumulator whose empty package carries `anchors`.
    pub fn new(
        config: ContextConfig,
        catalog: Arc<StepCatalog>,
        anchors: Vec<StrategyAnchor>,
    ) -> Self {
        let live = ContextPackage::empty(config.budget_chars, anchors);
        Self { config, catalog, live }
    }

    /// The live package.
    pub fn live(&self) -> &ContextPackage {
        &self.live
    }

    /// Builds a new package from `current` plus `result`.
    ///
    /// Pure: neither `current` nor the live package is modified.
    ///
    /// # Errors
    ///
    /// - [`CalendarError::OutOfOrderFold`] unless `result` follows every step
    ///   already in `current`.
    /// - [`CalendarError::ContextBudgetExceeded`] if full compression cannot
    ///   bring the package under budget.
    pub fn fold(
        &self,
        current: &ContextPackage,
        result: &StepResult,
    ) -> Result<ContextPackage, CalendarError> {
        if let Some(last) = current.as_of {
            if result.step() <= last {
                return Err(CalendarError::OutOfOrderFold {
                    step: result.step(),
                    last_folded: last,
                });
            }
        }
        let step = self.catalog.get(result.step());

        let mut ledger = current.ledger.clone();
        ledger.record(step, result);

        let weight = *self.config.entry_weights.get(result.phase());
        let digest = Arc::new(StepDigest::from_result(result, weight, self.config.summary_chars));
        let entries: Vec<ContextEntry> = current
            .entries
            .iter()
            .map(|e| Arc::clone(&e.digest))
            .chain(std::iter::once(digest))
            .map(|digest| ContextEntry {
                priority: digest.weight,
                digest,
                level: CompressionLevel::Full,
            })
            .collect();

        let as_of = Some(result.step());
        let budget = self.config.budget_chars;
        let entries = pack(as_of, entries, &ledger, budget, result.step())?;
        Ok(ContextPackage {
            as_of,
            prepared_for: None,
            budget,
            entries,
            ledger,
        })
    }

    /// Folds `result` into the live package and makes the new package live.
    ///
    /// On error the live package is unchanged.
    ///
    /// # Errors
    ///
    /// See [`ContextAccumulator::fold`].
    pub fn accept(&mut self, result: &StepResult) -> Result<&ContextPackage, CalendarError> {
        let next = self.fold(&self.live, result)?;
        info!(
            step = %result.step(),
            size = next.size(),
            budget = next.budget(),
            compressed = next.entries.iter().filter(|e| e.level != CompressionLevel::Full).count(),
            "Folded step into context package"
        );
        self.live = next;
        Ok(&self.live)
    }

    /// Prepares a package for `step` from the live one.
    ///
    /// Entries of the step's declared dependencies get a retention boost, and
    /// the package is packed into [`ContextConfig::step_budget`].
    ///
    /// # Errors
    ///
    /// [`CalendarError::ContextBudgetExceeded`] if the step budget cannot be met.
    pub fn summarize_for(&self, step: &Step) -> Result<ContextPackage, CalendarError> {
        let entries: Vec<ContextEntry> = self
            .live
            .entries
            .iter()
            .map(|e| ContextEntry {
                digest: Arc::clone(&e.digest),
                level: CompressionLevel::Full,
                priority: if step.depends_on.contains(&e.step()) {
                    e.digest.weight + 1.0
                } else {
                    e.digest.weight
                },
            })
            .collect();
        let budget = self.config.step_budget();
        let entries = pack(self.live.as_of, entries, &self.live.ledger, budget, step.id)?;
        Ok(ContextPackage {
            as_of: self.live.as_of,
            prepared_for: Some(step.id),
            budget,
            entries,
            ledger: self.live.ledger.clone(),
        })
    }
}
