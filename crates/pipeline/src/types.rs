//! Shared value types for the calendar pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. scores and weights are in
//! `[0.0, 1.0]`) and participate in domain computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// A quality score in the range `[0.0, 1.0]`.
///
/// Produced per criterion and per step by the quality gate, and aggregated by
/// the calendar assembler.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Score(f64);

impl Score {
    /// A perfect score.
    pub const MAX: Score = Score(1.0);

    /// The lowest possible score.
    pub const MIN: Score = Score(0.0);

    /// Creates a [`Score`], returning `None` if `value` is outside the valid
    /// range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`Score`] by clamping `value` into `[0.0, 1.0]`.
    ///
    /// Non-finite input maps to `0.0`.
    pub fn clamped(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self(0.0)
        }
    }

    /// Returns the ratio `numerator / denominator` as a score; an empty
    /// denominator yields a perfect score.
    pub fn ratio(numerator: usize, denominator: usize) -> Self {
        if denominator == 0 {
            Self::MAX
        } else {
            Self::clamped(numerator as f64 / denominator as f64)
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// A relative weight in the range `[0.0, 1.0]`.
///
/// Used for data-source budget shares, criterion weights and phase weights.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Weight(f64);

impl Weight {
    /// Creates a [`Weight`], returning `None` if `value` is outside `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the weight as an `f64`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Tolerance used when checking that a set of weights sums to `1.0`.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Returns `true` if `weights` sum to `1.0` within [`WEIGHT_SUM_TOLERANCE`].
pub fn weights_sum_to_one(weights: impl IntoIterator<Item = f64>) -> bool {
    let total: f64 = weights.into_iter().sum();
    (total - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
}

// ---------------------------------------------------------------------------

/// Informational quality band for a passing score.
///
/// Only [`QualityTier::BelowThreshold`] affects pass/fail; the other tiers
/// are reported for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Below the configured pass threshold.
    BelowThreshold,
    /// At or above the pass threshold.
    Acceptable,
    /// At or above the "good" cut-off.
    Good,
    /// At or above the "excellent" cut-off.
    Excellent,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QualityTier::BelowThreshold => "below_threshold",
            QualityTier::Acceptable => "acceptable",
            QualityTier::Good => "good",
            QualityTier::Excellent => "excellent",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Severity level for a [`Diagnostic`] finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    /// Finding that fails the quality gate regardless of the weighted score.
    Blocking,
    /// Finding that lowers the criterion score but does not block on its own.
    Warning,
    /// Contextual information with no impact on progression.
    Informational,
}

// ---------------------------------------------------------------------------

/// Diagnostic category tag.
///
/// Quality-gate findings use the criterion name (`"completeness"`,
/// `"uniqueness"`, `"strategic_alignment"`, `"structural_correctness"`,
/// `"platform_timeline"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosticCategory(String);

impl DiagnosticCategory {
    /// Creates a [`DiagnosticCategory`] from a category string.
    ///
    /// Returns `None` if the string is empty.
    pub fn new(category: impl Into<String>) -> Option<Self> {
        let c = category.into();
        if c.is_empty() {
            None
        } else {
            Some(Self(c))
        }
    }

    pub(crate) fn from_static(category: &'static str) -> Self {
        Self(category.to_string())
    }

    /// Returns the category tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// A structured diagnostic finding produced by the quality gate.
///
/// Blocking findings fail the gate; all findings of a failed attempt are fed
/// back into the next attempt's request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Location within the step payload (e.g. `"weekly_themes[2].theme"`).
    ///
    /// `None` when the finding applies to the whole payload.
    pub location: Option<String>,

    /// Severity of this finding.
    pub severity: DiagnosticSeverity,

    /// Category tag.
    pub category: DiagnosticCategory,

    /// Human-readable description of the finding.
    pub message: String,
}

impl Diagnostic {
    /// Returns `true` if this finding blocks progression.
    pub fn is_blocking(&self) -> bool {
        self.severity == DiagnosticSeverity::Blocking
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "[{}] {} ({})", self.category, self.message, loc),
            None => write!(f, "[{}] {}", self.category, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_rejects_out_of_range_values() {
        assert!(Score::new(1.01).is_none());
        assert!(Score::new(-0.1).is_none());
        assert!(Score::new(f64::NAN).is_none());
        assert_eq!(Score::clamped(3.0), Score::MAX);
    }

    #[test]
    fn ratio_of_empty_set_is_perfect() {
        assert_eq!(Score::ratio(0, 0), Score::MAX);
        assert_eq!(Score::ratio(1, 4).as_f64(), 0.25);
    }

    #[test]
    fn weight_sum_check_uses_tolerance() {
        assert!(weights_sum_to_one([0.1, 0.2, 0.7]));
        assert!(!weights_sum_to_one([0.5, 0.4]));
    }
}
