//! The step orchestrator.
//!
//! Runs the twelve steps phase by phase. For each step it allocates inputs,
//! prepares a context package, executes, validates, and on acceptance folds
//! the result into the live package. A rejected candidate is retried with the
//! verdict's diagnostics as feedback until the retry budget runs out; any
//! other failure halts the run at once. After step 12 the accepted results
//! go to the assembler.
//!
//! With `parallel_independent_steps` enabled, the first attempts of a phase's
//! ready steps run concurrently. Validation and folding still happen one step
//! at a time in step-id order, so every check sees the package as of the
//! previous step.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use pipeline::context::anchors_from_strategy;
use pipeline::{
    CalendarArtifact, CalendarAssembler, CalendarError, CandidateResult, CompletedSteps,
    ContextAccumulator, DataSourceAllocator, DataSourceBundle, GenerationService, Phase,
    QualityGateValidator, RunConfig, RunId, SourceCatalog, SourceKey, Step, StepCatalog, StepId,
    StepResult,
};

use crate::checkpoint::RunCheckpoint;
use crate::executor::{Attempt, StepExecutor};
use crate::state::{AuditTrail, StepState};

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// A run that did not produce an artifact.
#[derive(Debug, Clone, Error)]
#[error("{error} (last accepted step: {})", last_accepted_label(.last_accepted))]
pub struct RunFailure {
    /// What halted the run.
    pub error: CalendarError,
    /// Step the failure is attributed to, if any.
    pub failed_step: Option<StepId>,
    /// Phase of that step.
    pub phase: Option<Phase>,
    /// Last step whose result was accepted.
    pub last_accepted: Option<StepId>,
    /// Accepted results, for resumption.
    pub checkpoint: RunCheckpoint,
}

fn last_accepted_label(step: &Option<StepId>) -> String {
    step.map_or_else(|| "none".to_string(), |s| s.to_string())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct RunState {
    run_id: RunId,
    accumulator: ContextAccumulator,
    accepted: Vec<StepResult>,
    trail: AuditTrail,
}

impl RunState {
    fn is_accepted(&self, step: StepId) -> bool {
        self.accepted.iter().any(|r| r.step() == step)
    }
}

struct Prepared<'a> {
    step: &'a Step,
    bundle: DataSourceBundle,
}

/// Drives one calendar run from step 1 (or a checkpoint) to an artifact.
pub struct StepOrchestrator {
    config: RunConfig,
    catalog: Arc<StepCatalog>,
    sources: Arc<SourceCatalog>,
    executor: StepExecutor,
    validator: QualityGateValidator,
    trail: AuditTrail,
}

impl StepOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// [`CalendarError::ConfigurationError`] if `config` is invalid for
    /// `catalog`; a run never starts with an invalid configuration.
    pub fn new(
        config: RunConfig,
        catalog: Arc<StepCatalog>,
        service: Arc<dyn GenerationService>,
        sources: Arc<SourceCatalog>,
    ) -> Result<Self, CalendarError> {
        config.validate(&catalog)?;
        if config.executor.fallback_allowed && !StepExecutor::FALLBACK_ALLOWED {
            return Err(CalendarError::config("executor.fallback_allowed is not supported"));
        }
        let executor = StepExecutor::new(service, &config.executor, config.calendar.clone());
        let validator = QualityGateValidator::new(config.calendar.clone(), config.quality.clone());
        Ok(Self {
            config,
            catalog,
            sources,
            executor,
            validator,
            trail: AuditTrail::new(),
        })
    }

    /// Audit trail of the most recent run.
    pub fn audit(&self) -> &AuditTrail {
        &self.trail
    }

    /// Runs all twelve steps under a fresh run id.
    ///
    /// # Errors
    ///
    /// A [`RunFailure`] carrying the halting error and a checkpoint of every
    /// accepted result.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<CalendarArtifact, RunFailure> {
        self.resume(RunCheckpoint::empty(RunId::new_random()), cancel).await
    }

    /// Continues the run recorded in `checkpoint`.
    ///
    /// # Errors
    ///
    /// See [`StepOrchestrator::run`]. An invalid checkpoint fails with
    /// [`CalendarError::ConfigurationError`].
    pub async fn resume(
        &mut self,
        checkpoint: RunCheckpoint,
        cancel: CancellationToken,
    ) -> Result<CalendarArtifact, RunFailure> {
        let run_id = checkpoint.run_id;
        let anchors = self
            .sources
            .get_str(SourceKey::STRATEGY)
            .map(anchors_from_strategy)
            .unwrap_or_default();
        let accumulator = ContextAccumulator::new(
            self.config.context.clone(),
            Arc::clone(&self.catalog),
            anchors,
        );
        let mut run = RunState {
            run_id,
            accumulator,
            accepted: Vec::new(),
            trail: AuditTrail::new(),
        };

        let span = info_span!("calendar_run", %run_id);
        let outcome = async {
            info!(resumed_from = ?checkpoint.last_accepted(), "Starting calendar run");
            self.restore(&mut run, checkpoint)?;
            self.drive(&mut run, &cancel).await
        }
        .instrument(span)
        .await;

        let result = match outcome {
            Ok(artifact) => Ok(artifact),
            Err(error) => {
                let failed_step = error.step();
                let failure = RunFailure {
                    phase: failed_step.map(|s| self.catalog.get(s).phase),
                    failed_step,
                    last_accepted: run.accepted.last().map(StepResult::step),
                    checkpoint: RunCheckpoint {
                        run_id,
                        accepted: run.accepted,
                    },
                    error,
                };
                warn!(%run_id, error = %failure, "Calendar run failed");
                Err(failure)
            }
        };
        self.trail = run.trail;
        result
    }

    fn restore(&self, run: &mut RunState, checkpoint: RunCheckpoint) -> Result<(), CalendarError> {
        checkpoint.validate()?;
        for result in checkpoint.accepted {
            run.accumulator.accept(&result)?;
            run.trail.restore(result.step(), result.attempt());
            run.accepted.push(result);
        }
        Ok(())
    }

    async fn drive(
        &self,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<CalendarArtifact, CalendarError> {
        let allocator =
            DataSourceAllocator::new(self.config.allocation.clone(), Arc::clone(&self.sources));

        for phase in Phase::ALL {
            loop {
                let pending: Vec<&Step> = self
                    .catalog
                    .phase_steps(phase)
                    .filter(|s| !run.is_accepted(s.id))
                    .collect();
                let Some(first) = pending.first() else {
                    break;
                };
                if cancel.is_cancelled() {
                    let detail = "cancelled before dispatch";
                    run.trail.transition(first.id, 0, StepState::Failed, detail, None);
                    return Err(CalendarError::Cancelled { step: Some(first.id) });
                }
                let batch: Vec<&Step> = if self.config.executor.parallel_independent_steps {
                    pending
                        .iter()
                        .copied()
                        .filter(|s| s.depends_on.iter().all(|d| run.is_accepted(*d)))
                        .collect()
                } else {
                    vec![*first]
                };
                self.run_batch(run, &allocator, &batch, cancel).await?;
            }
            info!(%phase, "Phase complete");
        }

        run.trail
            .transition(StepId::LAST, 0, StepState::Complete, "all steps accepted", None);
        let assembler = CalendarAssembler::new(
            self.config.assembly.clone(),
            self.config.quality.clone(),
            Arc::clone(&self.catalog),
            self.sources.keys().cloned(),
        );
        let completed = CompletedSteps::try_from(run.accepted.clone())?;
        assembler.assemble(run.run_id, completed)
    }

    async fn run_batch(
        &self,
        run: &mut RunState,
        allocator: &DataSourceAllocator,
        batch: &[&Step],
        cancel: &CancellationToken,
    ) -> Result<(), CalendarError> {
        let mut prepared = Vec::with_capacity(batch.len());
        for &step in batch {
            match allocator.allocate(step) {
                Ok(bundle) => prepared.push(Prepared { step, bundle }),
                Err(e) => {
                    run.trail.transition(step.id, 0, StepState::Failed, e.to_string(), None);
                    return Err(e);
                }
            }
        }

        let mut contexts = Vec::with_capacity(prepared.len());
        for p in &prepared {
            match run.accumulator.summarize_for(p.step) {
                Ok(context) => contexts.push(context),
                Err(e) => {
                    run.trail.transition(p.step.id, 0, StepState::Failed, e.to_string(), None);
                    return Err(e);
                }
            }
        }

        for p in &prepared {
            run.trail
                .transition(p.step.id, 1, StepState::Executing, "dispatched", None);
        }
        let run_id = run.run_id;
        let first_attempts = join_all(prepared.iter().zip(&contexts).map(|(p, context)| {
            let attempt = Attempt {
                run_id,
                step: p.step,
                bundle: &p.bundle,
                context,
                number: 1,
                feedback: &[],
            };
            self.executor
                .execute(attempt, cancel)
                .instrument(info_span!(
                    "step_attempt",
                    step = %p.step.id,
                    phase = %p.step.phase,
                    attempt = 1
                ))
        }))
        .await;

        let mut outcomes = prepared.iter().zip(first_attempts);
        while let Some((p, outcome)) = outcomes.next() {
            if let Err(e) = self.settle(run, p, outcome, cancel).await {
                // Later batch members were dispatched too; their outcomes are discarded.
                for (rest, _) in outcomes.by_ref() {
                    run.trail.transition(
                        rest.step.id,
                        1,
                        StepState::Failed,
                        format!("batch aborted: step {} failed", p.step.id),
                        None,
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Validates, retries and folds one step, starting from its first
    /// attempt's outcome.
    async fn settle(
        &self,
        run: &mut RunState,
        prepared: &Prepared<'_>,
        first: Result<CandidateResult, CalendarError>,
        cancel: &CancellationToken,
    ) -> Result<(), CalendarError> {
        let step = prepared.step;
        let max_attempts = self.config.retry.max_attempts();
        let mut outcome = first;
        let mut attempt = 1;

        loop {
            let candidate = match outcome {
                Ok(candidate) => candidate,
                Err(e) => {
                    run.trail.transition(step.id, attempt, StepState::Failed, e.to_string(), None);
                    return Err(e);
                }
            };
            run.trail
                .transition(step.id, attempt, StepState::Validating, "candidate received", None);

            let verdict = self.validator.validate(step, &candidate, run.accumulator.live());
            if verdict.passed {
                run.trail.transition(
                    step.id,
                    attempt,
                    StepState::Accepted,
                    format!("score {}", verdict.score),
                    Some(&verdict),
                );
                let result = StepResult::from_accepted(candidate, &verdict).ok_or_else(|| {
                    CalendarError::QualityGateFailure {
                        step: step.id,
                        phase: step.phase,
                        attempts: attempt,
                        verdict: Box::new(verdict.clone()),
                    }
                })?;
                if let Err(e) = run.accumulator.accept(&result) {
                    run.trail.transition(step.id, attempt, StepState::Failed, e.to_string(), None);
                    return Err(e);
                }
                info!(step = %step.id, attempt, score = %result.quality_score(), "Step accepted");
                run.accepted.push(result);
                return Ok(());
            }

            run.trail.transition(
                step.id,
                attempt,
                StepState::Retrying,
                verdict.failure_summary(),
                Some(&verdict),
            );
            let feedback = verdict.feedback();
            let rejection = CalendarError::QualityGateFailure {
                step: step.id,
                phase: step.phase,
                attempts: attempt,
                verdict: Box::new(verdict),
            };
            if !rejection.retry_policy().is_retryable() || attempt >= max_attempts {
                let detail = "retry budget exhausted";
                run.trail.transition(step.id, attempt, StepState::Failed, detail, None);
                return Err(rejection);
            }
            if cancel.is_cancelled() {
                run.trail.transition(step.id, attempt, StepState::Failed, "cancelled", None);
                return Err(CalendarError::Cancelled { step: Some(step.id) });
            }

            attempt += 1;
            warn!(step = %step.id, attempt, "Retrying step with quality-gate feedback");
            run.trail
                .transition(step.id, attempt, StepState::Executing, "retry dispatched", None);
            let context = match run.accumulator.summarize_for(step) {
                Ok(context) => context,
                Err(e) => {
                    run.trail.transition(step.id, attempt, StepState::Failed, e.to_string(), None);
                    return Err(e);
                }
            };
            let next = Attempt {
                run_id: run.run_id,
                step,
                bundle: &prepared.bundle,
                context: &context,
                number: attempt,
                feedback: &feedback,
            };
            outcome = self
                .executor
                .execute(next, cancel)
                .instrument(info_span!(
                    "step_attempt",
                    step = %step.id,
                    phase = %step.phase,
                    attempt
                ))
                .await;
        }
    }
}
