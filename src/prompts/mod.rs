//! LLM prompts for the research pipeline.
//!
//! - [`supervisor`] - Decision prompt for the LLM-assisted supervisor
//! - [`analysis`] - Analysis, plan refinement and executive summary prompts
//!
//! Prompt wording is not load-bearing: every response is parsed defensively
//! and callers fall back to deterministic behaviour on malformed output.

pub mod analysis;
pub mod supervisor;

pub use analysis::{
    build_analysis_prompt, build_planning_prompt, build_summary_prompt, truncate_chars,
    MAX_SOURCE_CHARS,
};
pub use supervisor::build_supervisor_prompt;

/// A system and user message pair for one LLM call.
#[derive(Debug, Clone)]
pub struct StagePrompt {
    /// System prompt establishing the model's role and output format.
    pub system: String,
    /// User prompt with the run-specific details.
    pub user: String,
}

impl StagePrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}
