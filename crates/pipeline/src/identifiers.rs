//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`SourceKey`] with a platform name even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single calendar generation run.
///
/// Generated fresh for every run; propagated through spans, audit events and
/// checkpoints so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`RunId`] from an existing UUID (e.g. deserialised from a checkpoint).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Step and phase identity
// ---------------------------------------------------------------------------

/// Identifies one of the twelve chained calendar steps (`1..=12`).
///
/// Serialised as a bare integer; deserialisation rejects values outside the
/// valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StepId(u8);

impl StepId {
    /// Number of steps in a complete run.
    pub const COUNT: u8 = 12;

    /// The first step of every run.
    pub const FIRST: StepId = StepId(1);

    /// The last step of every run.
    pub const LAST: StepId = StepId(Self::COUNT);

    /// Creates a [`StepId`], returning `None` if `value` is outside `1..=12`.
    pub fn new(value: u8) -> Option<Self> {
        if (1..=Self::COUNT).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`StepId`] from a value known to be in range.
    pub(crate) const fn new_unchecked(value: u8) -> Self {
        debug_assert!(value >= 1 && value <= Self::COUNT);
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the step following this one, or `None` after the last step.
    pub fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    /// Iterates every step id in execution order.
    pub fn all() -> impl Iterator<Item = StepId> {
        (1..=Self::COUNT).map(StepId)
    }
}

impl TryFrom<u8> for StepId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        StepId::new(value).ok_or_else(|| format!("step id {value} is outside 1..=12"))
    }
}

impl From<StepId> for u8 {
    fn from(id: StepId) -> Self {
        id.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// One of the four phases the twelve steps are grouped into.
///
/// Each phase shares a data-allocation profile, a criterion-weight profile and
/// an aggregate-score weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Strategy foundation (steps 1–3).
    Foundation,
    /// Calendar structure (steps 4–6).
    Structure,
    /// Detailed content (steps 7–9).
    Content,
    /// Optimisation and validation (steps 10–12).
    Optimization,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::Foundation,
        Phase::Structure,
        Phase::Content,
        Phase::Optimization,
    ];

    /// Returns the 1-based phase number.
    pub fn number(self) -> u8 {
        match self {
            Phase::Foundation => 1,
            Phase::Structure => 2,
            Phase::Content => 3,
            Phase::Optimization => 4,
        }
    }

    /// Returns the configuration key for this phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Foundation => "foundation",
            Phase::Structure => "structure",
            Phase::Content => "content",
            Phase::Optimization => "optimization",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies an upstream data source (e.g. `"strategy"`, `"keywords"`).
    ///
    /// The well-known keys are available as associated constructors. The key
    /// [`SourceKey::ACCUMULATED_CONTEXT`] is reserved for the context package
    /// share of an allocation and is never fetched from a provider.
    SourceKey
}

impl SourceKey {
    /// Content strategy produced by the strategy subsystem.
    pub const STRATEGY: &'static str = "strategy";
    /// Summary of the onboarding / website analysis.
    pub const ONBOARDING_SUMMARY: &'static str = "onboarding_summary";
    /// Content gap analysis.
    pub const GAP_ANALYSIS: &'static str = "gap_analysis";
    /// Historical performance metrics.
    pub const PERFORMANCE_HISTORY: &'static str = "performance_history";
    /// Keyword research data.
    pub const KEYWORDS: &'static str = "keywords";
    /// Competitor analysis data.
    pub const COMPETITOR_DATA: &'static str = "competitor_data";
    /// Reserved: the accumulated context share of a step's allocation.
    pub const ACCUMULATED_CONTEXT: &'static str = "accumulated_context";

    /// The upstream keys a provider may serve, in canonical order.
    pub const UPSTREAM: [&'static str; 6] = [
        Self::STRATEGY,
        Self::ONBOARDING_SUMMARY,
        Self::GAP_ANALYSIS,
        Self::PERFORMANCE_HISTORY,
        Self::KEYWORDS,
        Self::COMPETITOR_DATA,
    ];

    /// Creates a key from a compile-time constant.
    pub fn from_static(key: &'static str) -> Self {
        Self(key.to_string())
    }

    /// Returns `true` for the reserved accumulated-context key.
    pub fn is_accumulated_context(&self) -> bool {
        self.0 == Self::ACCUMULATED_CONTEXT
    }
}

string_id! {
    /// Identifies a publishing platform (e.g. `"LinkedIn"`, `"Blog"`).
    ///
    /// Comparisons against configuration are case-insensitive; use
    /// [`PlatformName::matches`].
    PlatformName
}

impl PlatformName {
    /// Returns `true` if `other` names the same platform, ignoring case.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_id_rejects_out_of_range_values() {
        assert!(StepId::new(0).is_none());
        assert!(StepId::new(13).is_none());
        assert_eq!(StepId::new(12), Some(StepId::LAST));
    }

    #[test]
    fn step_id_iterates_in_order() {
        let ids: Vec<u8> = StepId::all().map(StepId::as_u8).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<u8>>());
        assert_eq!(StepId::LAST.next(), None);
    }

    #[test]
    fn step_id_deserialisation_is_validated() {
        let ok: StepId = serde_json::from_str("7").unwrap();
        assert_eq!(ok.as_u8(), 7);
        assert!(serde_json::from_str::<StepId>("13").is_err());
    }

    #[test]
    fn platform_names_match_case_insensitively() {
        let p = PlatformName::new("LinkedIn").unwrap();
        assert!(p.matches("linkedin"));
        assert!(p.matches(" LINKEDIN "));
        assert!(!p.matches("Blog"));
    }
}
