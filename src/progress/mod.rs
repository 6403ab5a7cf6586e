//! Progress tracking for research runs.
//!
//! [`ProgressCalculator`] is a pure mapping from state to progress;
//! [`ProgressSink`] implementations publish the result.

pub mod calculator;
pub mod sink;

pub use calculator::{ProgressCalculator, ProgressSnapshot, StageBand, StageWeights};
pub use sink::{ChannelProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
