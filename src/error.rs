//! Error types for research-forge operations.
//!
//! Defines error types for the subsystems that talk to the outside world or
//! guard invariants:
//! - Text generation (LLM) calls
//! - Search and extraction providers
//! - Research state transitions
//! - Backup persistence and restore

use thiserror::Error;

use crate::research::ResearchStatus;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("LLM call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty response from model")]
    EmptyResponse,
}

impl LlmError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout { .. } | LlmError::RateLimited(_) | LlmError::RequestFailed(_) => {
                true
            }
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 408,
            LlmError::MissingApiBase | LlmError::ParseError(_) | LlmError::EmptyResponse => false,
        }
    }
}

/// Errors reported by search and extraction providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider '{provider}' timed out after {seconds} seconds")]
    Timeout { provider: String, seconds: u64 },

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Provider rejected request: {0}")]
    Rejected(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. } | ProviderError::Transient(_))
    }
}

/// Errors raised when a research state mutation would break an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition {
        from: ResearchStatus,
        to: ResearchStatus,
    },

    #[error("Research project is in terminal status '{0}' and cannot be mutated")]
    Terminal(ResearchStatus),
}

/// Errors that can occur while persisting or restoring backups.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Invalid backup identifier: {0}")]
    InvalidId(String),

    #[error("Integrity check failed for backup '{0}'")]
    IntegrityMismatch(String),

    #[error("Backup file '{0}' is truncated")]
    Truncated(String),

    #[error("Backup I/O timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}
