//! Top-level error and retry-policy types for the calendar pipeline domain.
//!
//! [`CalendarError`] covers every condition that halts a calendar run. All of
//! its variants are run-fatal except [`CalendarError::QualityGateFailure`],
//! which the orchestrator retries within its configured budget before
//! escalating. There is no degraded output and no synthetic substitution for
//! missing data or failed generation.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::QualityGateVerdict;
use crate::{Phase, SourceKey, StepId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by domain and infrastructure error types to let the orchestrator
/// decide whether to re-invoke a step without failing the run.
///
/// ## Rules
///
/// - `Retryable`: a quality-gate rejection within the retry budget.
/// - `NonRetryable`: everything else. Service unavailability and timeouts
///   are non-retryable because there is no fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the run fails.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Step execution causes
// ---------------------------------------------------------------------------

/// Why a single step execution attempt produced no candidate result.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ExecutionFailure {
    /// The generation service could not be reached or refused the request.
    #[error("generation service unavailable: {message}")]
    Unavailable {
        /// Transport or service error description.
        message: String,
    },

    /// The generation call did not complete within the configured timeout.
    #[error("generation timed out after {after_ms} ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// The service answered, but the answer does not match the step's
    /// expected output shape.
    #[error("malformed response: {message}")]
    InvalidResponse {
        /// Required fields that were absent or of the wrong kind.
        missing_fields: Vec<String>,
        /// Human-readable description.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that halt a calendar run.
///
/// Every variant carries enough detail (step, phase, failing criterion or data
/// source) to act on the failure without re-running the pipeline.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum CalendarError {
    /// The allocator cannot satisfy a step's declared data requirements.
    ///
    /// Raised before the step is executed; the step is never dispatched.
    #[error("Step {step} ({phase}) is missing required data source(s): {}", join_keys(.missing))]
    MissingDataSource {
        /// The step whose requirements could not be met.
        step: StepId,
        /// Phase of that step.
        phase: Phase,
        /// Every absent source key.
        missing: Vec<SourceKey>,
    },

    /// The context accumulator cannot compress the package within budget.
    #[error("Context package at step {step} needs {required} chars after full compression; budget is {budget}")]
    ContextBudgetExceeded {
        /// The step being folded or prepared for.
        step: StepId,
        /// Smallest achievable package size.
        required: usize,
        /// Configured budget.
        budget: usize,
    },

    /// A result was folded out of step order.
    #[error("Step {step} cannot be folded after step {last_folded}: results fold strictly in step order")]
    OutOfOrderFold {
        /// The step being folded.
        step: StepId,
        /// The last step already in the package.
        last_folded: StepId,
    },

    /// The executor could not obtain a schema-valid result from the
    /// generation service. Never retried.
    #[error("Step {step} ({phase}) execution failed on attempt {attempt}: {cause}")]
    StepExecution {
        /// The failing step.
        step: StepId,
        /// Phase of that step.
        phase: Phase,
        /// 1-based attempt number.
        attempt: u32,
        /// What went wrong.
        cause: ExecutionFailure,
    },

    /// The quality gate rejected a step's result.
    ///
    /// Retryable until the retry budget is exhausted, after which it is
    /// returned as the run failure.
    #[error("Step {step} ({phase}) failed its quality gate after {attempts} attempt(s) with score {}: {}", .verdict.score, .verdict.failure_summary())]
    QualityGateFailure {
        /// The rejected step.
        step: StepId,
        /// Phase of that step.
        phase: Phase,
        /// Attempts made so far.
        attempts: u32,
        /// The last verdict, including the per-criterion breakdown.
        verdict: Box<QualityGateVerdict>,
    },

    /// An upstream data provider failed while fetching a source.
    #[error("Data provider '{provider}' failed to supply '{source_key}': {message}")]
    DataProvider {
        /// Provider name.
        provider: String,
        /// The key that was being fetched.
        source_key: SourceKey,
        /// Provider error description.
        message: String,
    },

    /// The artifact would be complete, but declared sources were never
    /// referenced by any accepted step.
    #[error("Declared data source(s) never consumed: {}", join_keys(.sources))]
    UnconsumedDataSources {
        /// Sources available to the run but never referenced.
        sources: Vec<SourceKey>,
    },

    /// The assembler was handed something other than a full, ordered set of
    /// accepted results.
    #[error("Cannot assemble calendar: {message}")]
    IncompleteRun {
        /// What is wrong with the supplied results.
        message: String,
    },

    /// The run was cancelled before completion.
    #[error("Run cancelled{}", .step.map(|s| format!(" during step {s}")).unwrap_or_default())]
    Cancelled {
        /// The step in flight (or about to be dispatched), if any.
        step: Option<StepId>,
    },

    /// The run configuration is invalid.
    ///
    /// Produced at start-up; a run never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl CalendarError {
    /// Convenience constructor for [`CalendarError::ConfigurationError`].
    pub fn config(message: impl Into<String>) -> Self {
        CalendarError::ConfigurationError {
            message: message.into(),
        }
    }

    /// Returns the retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            CalendarError::QualityGateFailure { .. } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// Returns the step this error is attributed to, if any.
    pub fn step(&self) -> Option<StepId> {
        match self {
            CalendarError::MissingDataSource { step, .. }
            | CalendarError::ContextBudgetExceeded { step, .. }
            | CalendarError::OutOfOrderFold { step, .. }
            | CalendarError::StepExecution { step, .. }
            | CalendarError::QualityGateFailure { step, .. } => Some(*step),
            CalendarError::Cancelled { step } => *step,
            _ => None,
        }
    }
}

fn join_keys(keys: &[SourceKey]) -> String {
    keys.iter()
        .map(SourceKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quality_gate_failures_are_retryable() {
        let exec = CalendarError::StepExecution {
            step: StepId::new(5).unwrap(),
            phase: Phase::Structure,
            attempt: 1,
            cause: ExecutionFailure::Timeout { after_ms: 100 },
        };
        assert_eq!(exec.retry_policy(), RetryPolicy::NonRetryable);
        assert_eq!(exec.step(), StepId::new(5));
        assert!(!CalendarError::config("x").retry_policy().is_retryable());
    }

    #[test]
    fn missing_source_message_names_every_key() {
        let err = CalendarError::MissingDataSource {
            step: StepId::new(2).unwrap(),
            phase: Phase::Foundation,
            missing: vec![
                SourceKey::from_static(SourceKey::GAP_ANALYSIS),
                SourceKey::from_static(SourceKey::KEYWORDS),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("gap_analysis, keywords"), "{text}");
        assert!(text.contains("Step 2"), "{text}");
    }

    #[test]
    fn cancelled_message_mentions_step_when_known() {
        let err = CalendarError::Cancelled {
            step: StepId::new(3),
        };
        assert_eq!(err.to_string(), "Run cancelled during step 3");
        assert_eq!(CalendarError::Cancelled { step: None }.to_string(), "Run cancelled");
    }
}
