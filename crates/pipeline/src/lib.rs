//! Core domain for Cadence calendar runs.
//!
//! A run chains twelve generation steps across four phases. This crate holds
//! everything that decides *what* happens in a run: the step catalog, data
//! allocation, context accumulation and compression, the quality gate, and
//! final assembly. Orchestration lives in the `steps` crate; external services
//! are reached only through the port traits in [`ports`].
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `StepId`, `SourceKey`, etc.) and `Phase` |
//! | [`types`] | Shared value types (`Score`, `Weight`, `Diagnostic`, etc.) |
//! | [`errors`] | `CalendarError` and retry-policy types |
//! | [`config`] | `RunConfig` and its sections |
//! | [`step`] | Step descriptors and the standard twelve-step catalog |
//! | [`payload`] | Path selection and normalisation over JSON payloads |
//! | [`timeline`] | Timeline slots and phase spans declared by payloads |
//! | [`sources`] | Source catalog and the `DataSourceAllocator` |
//! | [`ports`] | `GenerationService` and `DataProvider` traits |
//! | [`result`] | Candidate and accepted step results |
//! | [`context`] | The `ContextAccumulator` and its package |
//! | [`quality`] | The `QualityGateValidator` |
//! | [`assembler`] | The `CalendarAssembler` and the final artifact |

pub mod assembler;
pub mod config;
pub mod context;
pub mod errors;
pub mod identifiers;
pub mod payload;
pub mod ports;
pub mod quality;
pub mod result;
pub mod sources;
pub mod step;
pub mod timeline;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use assembler::{
    CalendarArtifact, CalendarAssembler, CompletedSteps, DataUtilizationReport, SourceUtilization,
};
pub use config::{
    AllocationEntry, AllocationTable, AssemblyConfig, CalendarConfig, ContextConfig,
    CriteriaWeights, ExecutorConfig, PhaseTable, QualityConfig, RetryConfig, RunConfig,
};
pub use context::{
    CompressionLevel, ContextAccumulator, ContextLedger, ContextPackage, StrategyAnchor,
};
pub use errors::{CalendarError, ExecutionFailure, RetryPolicy};
pub use identifiers::{Phase, PlatformName, RunId, SourceKey, StepId};
pub use ports::{
    DataProvider, GenerationError, GenerationRequest, GenerationResponse, GenerationService,
    ProviderError, RequestContext, RequestInput,
};
pub use quality::{Criterion, CriterionScore, QualityGateValidator, QualityGateVerdict};
pub use result::{CandidateResult, StepResult};
pub use sources::{
    DataSlot, DataSourceAllocator, DataSourceBundle, SlotPayload, SourceCatalog,
};
pub use step::{
    FieldKind, FieldSpec, GateRules, OutputSchema, Step, StepCatalog, StructureRule, TimelineKind,
};
pub use types::{
    Diagnostic, DiagnosticCategory, DiagnosticSeverity, QualityTier, Score, Timestamp, Weight,
    WEIGHT_SUM_TOLERANCE,
};
