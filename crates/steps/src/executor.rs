//! The step executor.
//!
//! Turns a step, its allocated bundle and its context package into a
//! [`GenerationRequest`], calls the generation service under a timeout, and
//! checks the reply against the step's output shape. Any failure here is
//! fatal for the run: there is no fallback path and no synthetic output.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pipeline::{
    CalendarConfig, CalendarError, CandidateResult, ContextPackage, DataSourceBundle,
    ExecutionFailure, ExecutorConfig, GenerationError, GenerationRequest, GenerationService,
    RequestContext, RequestInput, RunId, SlotPayload, SourceKey, Step,
};

/// Everything one execution attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    /// Run the attempt belongs to.
    pub run_id: RunId,
    /// Step being executed.
    pub step: &'a Step,
    /// The step's allocated inputs.
    pub bundle: &'a DataSourceBundle,
    /// Context package prepared for the step.
    pub context: &'a ContextPackage,
    /// 1-based attempt number.
    pub number: u32,
    /// Diagnostics of the previous rejected attempt.
    pub feedback: &'a [String],
}

/// Invokes the generation service for one step attempt.
#[derive(Clone)]
pub struct StepExecutor {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
    calendar: CalendarConfig,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    /// Substituting placeholder output for a failed call is never permitted.
    pub const FALLBACK_ALLOWED: bool = false;

    /// Creates an executor over `service`.
    pub fn new(
        service: Arc<dyn GenerationService>,
        config: &ExecutorConfig,
        calendar: CalendarConfig,
    ) -> Self {
        Self {
            service,
            timeout: config.timeout(),
            calendar,
        }
    }

    /// Builds the request for `attempt`.
    pub fn request(&self, attempt: &Attempt<'_>) -> GenerationRequest {
        let step = attempt.step;
        let inputs = attempt
            .bundle
            .slots()
            .filter_map(|(key, slot)| match &slot.payload {
                SlotPayload::Data(payload) => Some(RequestInput {
                    key: key.clone(),
                    weight: slot.weight.as_f64(),
                    payload: payload.as_ref().clone(),
                }),
                SlotPayload::AccumulatedContext => None,
            })
            .collect();
        GenerationRequest {
            run_id: attempt.run_id,
            step: step.id,
            phase: step.phase,
            step_name: step.name.clone(),
            purpose: step.purpose.clone(),
            attempt: attempt.number,
            calendar: self.calendar.clone(),
            inputs,
            context: RequestContext {
                text: attempt.context.render(),
                weight: attempt.bundle.context_weight(),
                as_of: attempt.context.as_of(),
            },
            feedback: attempt.feedback.to_vec(),
            required_fields: step.output.required.clone(),
            recommended_fields: step.output.recommended.clone(),
        }
    }

    /// Executes `attempt`, racing the call against `cancel`.
    ///
    /// # Errors
    ///
    /// - [`CalendarError::Cancelled`] if `cancel` fires first or the service
    ///   reports cancellation.
    /// - [`CalendarError::StepExecution`] on unavailability, timeout, or a
    ///   reply missing required fields.
    pub async fn execute(
        &self,
        attempt: Attempt<'_>,
        cancel: &CancellationToken,
    ) -> Result<CandidateResult, CalendarError> {
        let step = attempt.step;
        let fail = |cause: ExecutionFailure| CalendarError::StepExecution {
            step: step.id,
            phase: step.phase,
            attempt: attempt.number,
            cause,
        };
        let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);

        let request = self.request(&attempt);
        let call = tokio::time::timeout(self.timeout, self.service.generate(request));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(step = %step.id, attempt = attempt.number, "Generation cancelled in flight");
                return Err(CalendarError::Cancelled { step: Some(step.id) });
            }
            outcome = call => outcome,
        };

        let response = match outcome {
            Err(_) => return Err(fail(ExecutionFailure::Timeout { after_ms })),
            Ok(Err(e)) => {
                warn!(step = %step.id, attempt = attempt.number, error = %e, "Generation failed");
                return Err(match e {
                    GenerationError::Cancelled => CalendarError::Cancelled { step: Some(step.id) },
                    GenerationError::Unavailable(message) => {
                        fail(ExecutionFailure::Unavailable { message })
                    }
                    GenerationError::Timeout => fail(ExecutionFailure::Timeout { after_ms }),
                    GenerationError::InvalidResponse(message) => {
                        fail(ExecutionFailure::InvalidResponse {
                            missing_fields: Vec::new(),
                            message,
                        })
                    }
                });
            }
            Ok(Ok(response)) => response,
        };

        let missing = step.output.shape_violations(&response.payload);
        if !missing.is_empty() {
            warn!(
                step = %step.id,
                attempt = attempt.number,
                ?missing,
                "Response does not match output shape"
            );
            let message = format!("missing or mistyped required field(s): {}", missing.join(", "));
            return Err(fail(ExecutionFailure::InvalidResponse {
                missing_fields: missing,
                message,
            }));
        }

        let mut referenced = Vec::new();
        for raw in response.referenced_sources {
            match SourceKey::new(raw.trim()) {
                Some(key) if attempt.bundle.contains(&key) && !key.is_accumulated_context() => {
                    referenced.push(key)
                }
                _ => warn!(
                    step = %step.id,
                    source = %raw,
                    "Dropping reference to a source the step was not given"
                ),
            }
        }
        debug!(
            step = %step.id,
            attempt = attempt.number,
            referenced = referenced.len(),
            "Candidate received"
        );

        Ok(CandidateResult::new(
            step,
            attempt.number,
            response.payload,
            referenced,
            attempt.bundle.upstream_keys().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use pipeline::config::default_allocation_table;
    use pipeline::{
        ContextConfig, DataSourceAllocator, GenerationResponse, SourceCatalog, StepCatalog, StepId,
    };

    struct Canned {
        reply: Mutex<Option<Result<GenerationResponse, GenerationError>>>,
        delay: Duration,
    }

    #[async_trait]
    impl GenerationService for Canned {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            tokio::time::sleep(self.delay).await;
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(GenerationError::Unavailable("no reply".into())))
        }
    }

    fn executor(
        reply: Result<GenerationResponse, GenerationError>,
        delay: Duration,
    ) -> StepExecutor {
        let service = Arc::new(Canned {
            reply: Mutex::new(Some(reply)),
            delay,
        });
        let config = ExecutorConfig {
            timeout_secs: 1,
            ..ExecutorConfig::default()
        };
        StepExecutor::new(service, &config, CalendarConfig::default())
    }

    fn fixture() -> (StepCatalog, DataSourceBundle, ContextPackage) {
        let catalog = StepCatalog::standard();
        let sources = SourceCatalog::new()
            .with("strategy", json!({ "business_goals": ["Grow pipeline"] }))
            .unwrap()
            .with("onboarding_summary", json!({ "company": "Acme" }))
            .unwrap();
        let allocator = DataSourceAllocator::new(default_allocation_table(), Arc::new(sources));
        let bundle = allocator.allocate(catalog.get(StepId::new(1).unwrap())).unwrap();
        let context = ContextPackage::empty(ContextConfig::default().budget_chars, Vec::new());
        (catalog, bundle, context)
    }

    fn response(payload: Value, referenced: &[&str]) -> GenerationResponse {
        GenerationResponse {
            payload,
            referenced_sources: referenced.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn references_outside_the_bundle_are_dropped() {
        let (catalog, bundle, context) = fixture();
        let payload = json!({
            "summary": "s",
            "content_pillars": ["a"],
            "business_goals": ["g"],
            "target_audience": "t"
        });
        let reply = response(payload, &["strategy", "keywords", "nonsense key"]);
        let exec = executor(Ok(reply), Duration::ZERO);
        let attempt = Attempt {
            run_id: RunId::new_random(),
            step: catalog.get(StepId::new(1).unwrap()),
            bundle: &bundle,
            context: &context,
            number: 1,
            feedback: &[],
        };
        let candidate = exec.execute(attempt, &CancellationToken::new()).await.unwrap();
        let refs: Vec<&str> =
            candidate.referenced_sources().iter().map(SourceKey::as_str).collect();
        assert_eq!(refs, vec!["strategy"]);
    }

    #[tokio::test]
    async fn missing_required_field_is_an_invalid_response() {
        let (catalog, bundle, context) = fixture();
        let payload = json!({ "summary": "s", "business_goals": "wrong kind" });
        let exec = executor(Ok(response(payload, &[])), Duration::ZERO);
        let attempt = Attempt {
            run_id: RunId::new_random(),
            step: catalog.get(StepId::new(1).unwrap()),
            bundle: &bundle,
            context: &context,
            number: 2,
            feedback: &[],
        };
        match exec.execute(attempt, &CancellationToken::new()).await.unwrap_err() {
            CalendarError::StepExecution {
                attempt,
                cause: ExecutionFailure::InvalidResponse { missing_fields, .. },
                ..
            } => {
                assert_eq!(attempt, 2);
                assert_eq!(
                    missing_fields,
                    vec!["content_pillars", "business_goals", "target_audience"]
                );
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out() {
        let (catalog, bundle, context) = fixture();
        let exec = executor(Ok(response(json!({}), &[])), Duration::from_secs(5));
        let attempt = Attempt {
            run_id: RunId::new_random(),
            step: catalog.get(StepId::new(1).unwrap()),
            bundle: &bundle,
            context: &context,
            number: 1,
            feedback: &[],
        };
        let err = exec.execute(attempt, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            CalendarError::StepExecution {
                cause: ExecutionFailure::Timeout { after_ms: 1000 },
                ..
            }
        ));
        assert!(!err.retry_policy().is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_in_flight_call() {
        let (catalog, bundle, context) = fixture();
        let exec = executor(Ok(response(json!({}), &[])), Duration::from_millis(500));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let attempt = Attempt {
            run_id: RunId::new_random(),
            step: catalog.get(StepId::new(1).unwrap()),
            bundle: &bundle,
            context: &context,
            number: 1,
            feedback: &[],
        };
        let err = exec.execute(attempt, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            CalendarError::Cancelled { step: Some(s) } if s == StepId::new(1).unwrap()
        ));
    }

    #[test]
    fn request_carries_weighted_inputs_and_feedback() {
        let (catalog, bundle, context) = fixture();
        let exec = executor(Ok(response(json!({}), &[])), Duration::ZERO);
        let feedback = vec!["[uniqueness] repeat".to_string()];
        let request = exec.request(&Attempt {
            run_id: RunId::new_random(),
            step: catalog.get(StepId::new(1).unwrap()),
            bundle: &bundle,
            context: &context,
            number: 2,
            feedback: &feedback,
        });
        let keys: Vec<&str> = request.inputs.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["onboarding_summary", "strategy"]);
        let total: f64 = request.inputs.iter().map(|i| i.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(request.feedback, feedback);
        assert_eq!(request.required_fields.len(), 4);
    }
}
