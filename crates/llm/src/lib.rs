//! Cadence generation service adapter.
//!
//! Implements the [`pipeline::GenerationService`] trait for Anthropic's
//! Messages API. Additional providers are added as new `impl` blocks in this
//! crate without any changes to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, prompt rendering and reply parsing live
//! here. The [`pipeline`] crate sees only [`pipeline::GenerationService`].
//!
//! This crate does not retry: a failed call is reported as-is and the run
//! fails.

pub mod anthropic;
pub mod prompt;
pub mod reply;

pub use anthropic::{AnthropicConfig, AnthropicGenerator, LlmError};
pub use prompt::{render, Prompt};
pub use reply::parse_reply;
