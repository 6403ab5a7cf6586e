//! Pipeline orchestration for research runs.
//!
//! # Architecture
//!
//! - **Orchestrator**: owns one project's state per run and drives the loop
//! - **Config**: thresholds, budgets, concurrency and timeouts
//! - **Registry**: guarantees a single writer per project
//! - **Cancellation**: cooperative flag shared with the stage workers
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use research_forge::agents::WorkerSet;
//! use research_forge::pipeline::{Orchestrator, ResearchConfig};
//! use research_forge::research::ResearchState;
//!
//! let config = ResearchConfig::from_env()?;
//! let orchestrator = Orchestrator::builder(config)
//!     .workers(WorkerSet::standard(search, extraction, llm.clone()))
//!     .llm(llm)
//!     .build()?;
//!
//! let state = ResearchState::with_generated_id("Acme CRM", "B2B CRM for SMBs", vec![]);
//! let state = orchestrator.run(state).await?;
//! println!("{}: {} ({:.0}%)", state.project_id, state.status, state.progress);
//! ```
//!
//! # Recovery
//!
//! Every stage is checkpointed; after a crash, continue from the newest
//! valid backup:
//!
//! ```rust,ignore
//! let state = orchestrator.resume_latest(&project_id).await?;
//! ```

pub mod cancel;
pub mod config;
pub mod orchestrator;
pub mod registry;

pub use cancel::CancellationFlag;
pub use config::{ConfigError, ResearchConfig, SupervisorMode, Timeouts};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorError, RunStats};
pub use registry::{ProjectLease, ProjectRegistry};
