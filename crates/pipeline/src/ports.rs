//! Port trait definitions for the two external collaborators of a run.
//!
//! - [`GenerationService`]: produces one step's raw output. Implemented by
//!   the `llm` crate.
//! - [`DataProvider`]: read-only fetch of an upstream data source.
//!   Implemented by the `sources` crate.
//!
//! This crate defines *what* is needed; infrastructure crates define *how*
//! to supply it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::CalendarConfig;
use crate::step::FieldSpec;
use crate::{Phase, RetryPolicy, RunId, SourceKey, StepId};

// ---------------------------------------------------------------------------
// Generation service
// ---------------------------------------------------------------------------

/// One weighted upstream input of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInput {
    /// Source key.
    pub key: SourceKey,
    /// Intended share of the request's context budget.
    pub weight: f64,
    /// The source payload.
    pub payload: Value,
}

/// The accumulated context section of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Rendered context package.
    pub text: String,
    /// Intended share of the request's context budget.
    pub weight: f64,
    /// Last accepted step folded into the package.
    pub as_of: Option<StepId>,
}

/// Everything the generation service receives for one step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Run the request belongs to.
    pub run_id: RunId,
    /// Step identity.
    pub step: StepId,
    /// Phase of the step.
    pub phase: Phase,
    /// Step machine name.
    pub step_name: String,
    /// One-line step purpose.
    pub purpose: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Requested calendar shape.
    pub calendar: CalendarConfig,
    /// Weighted upstream inputs.
    pub inputs: Vec<RequestInput>,
    /// Accumulated context of prior accepted steps.
    pub context: RequestContext,
    /// Diagnostics from the previous rejected attempt, if any.
    pub feedback: Vec<String>,
    /// Fields the payload must contain.
    pub required_fields: Vec<FieldSpec>,
    /// Fields the payload should contain.
    pub recommended_fields: Vec<String>,
}

/// Raw output of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Step payload.
    pub payload: Value,
    /// Source keys the service reports having used.
    #[serde(default)]
    pub referenced_sources: Vec<String>,
}

/// Errors from a [`GenerationService`] call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// The service could not be reached or refused the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The service did not answer in time.
    #[error("service timed out")]
    Timeout,
    /// The service answered with something that is not a payload.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The call was cancelled through the service's own mechanism.
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Generation failures are never retried: there is no fallback path, so
    /// the run fails.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::NonRetryable
    }
}

/// The external generation capability.
///
/// The pipeline does not depend on which model serves a request, only that
/// the reply matches the step's declared output shape within the timeout.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces the raw output for one step attempt.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;
}

// ---------------------------------------------------------------------------
// Data providers
// ---------------------------------------------------------------------------

/// Errors from a [`DataProvider`] fetch.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider's backing store or endpoint failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The payload could not be decoded as JSON.
    #[error("payload for '{key}' is not valid JSON: {message}")]
    Decode {
        /// Key being fetched.
        key: SourceKey,
        /// Decoder message.
        message: String,
    },
}

/// Read-only access to upstream data owned by other subsystems.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches `key`. `Ok(None)` means this provider does not have it.
    async fn fetch(&self, key: &SourceKey) -> Result<Option<Value>, ProviderError>;
}
