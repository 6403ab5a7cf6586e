//! research_forge: self-correcting market/product research pipeline.
//!
//! The crate drives a plan → search → extract → analyze → report loop over
//! external collaborators (search and extraction providers, a text-generation
//! model). The control layer decides which stage runs next, gates on evidence
//! quality, tracks progress, and checkpoints the run for crash recovery.

// Core modules
pub mod agents;
pub mod backup;
pub mod cli;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quality;
pub mod research;
pub mod supervisor;
pub mod utils;

// Re-export commonly used error types
pub use error::{BackupError, LlmError, ProviderError, StateError};
