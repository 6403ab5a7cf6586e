//! Command-line interface for research-forge.
//!
//! Provides commands for backup management and for replaying the
//! supervisor, quality gate and progress model against saved state.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
