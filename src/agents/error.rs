//! Error types for stage workers.
//!
//! Workers never surface these to the orchestrator directly; a failed stage
//! is reported as an unsuccessful [`StageOutcome`](super::StageOutcome)
//! carrying the error text.

use thiserror::Error;

use crate::error::{LlmError, ProviderError};

/// Errors that can occur while a stage runs.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Text generation failed after retries.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Search or extraction provider failed after retries.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The model reply could not be turned into the expected structure.
    #[error("Failed to parse LLM response: {0}")]
    ResponseParse(String),

    /// The stage has nothing to work on.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Every unit of work in the stage failed.
    #[error("Stage produced nothing: {0}")]
    NothingProduced(String),
}

/// Result type for worker internals.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
