//! LLM integration for research-forge.
//!
//! The control layer depends only on the [`TextGenerationClient`] trait; the
//! concrete transport is injected by the caller.
//!
//! ```ignore
//! use research_forge::llm::{GenerationOptions, LiteLlmClient, TextGenerationClient};
//!
//! let client = LiteLlmClient::from_env()?;
//! let text = client
//!     .generate("Summarize the widget market", None, &GenerationOptions::new())
//!     .await?;
//! ```
//!
//! # Retries
//!
//! Transient failures (timeouts, rate limits, 5xx) are retried through the
//! [`retry`] combinator with a [`RetryPolicy`]:
//!
//! ```ignore
//! use research_forge::llm::{retry, RetryPolicy};
//!
//! let text = retry(&RetryPolicy::default(), |e: &LlmError| e.is_transient(), |_| {
//!     client.generate(prompt, None, &options)
//! })
//! .await?;
//! ```

pub mod litellm;
pub mod retry;

pub use litellm::{GenerationOptions, LiteLlmClient, Message, TextGenerationClient, DEFAULT_MODEL};
pub use retry::{generate_with_retry, retry, RetryPolicy};
