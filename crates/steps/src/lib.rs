//! Cadence step execution and run orchestration.
//!
//! This crate drives a calendar run: it dispatches each step to the
//! generation service through the [`StepExecutor`], passes candidates through
//! the quality gate, folds accepted results into the context package, and
//! hands the full set to the assembler. It owns the per-step state machine,
//! the audit trail, and checkpoint/resume.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The orchestrator sequences calls between business
//! logic in the [`pipeline`] crate and the [`pipeline::GenerationService`]
//! port. It contains no domain rules of its own.

pub mod checkpoint;
pub mod executor;
pub mod orchestrator;
pub mod state;

pub use checkpoint::RunCheckpoint;
pub use executor::{Attempt, StepExecutor};
pub use orchestrator::{RunFailure, StepOrchestrator};
pub use state::{AuditEvent, AuditTrail, StepState};
