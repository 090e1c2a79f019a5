//! IO module - per-step statistics output.

mod writer;

pub use writer::{StatsWriter, StepRecord, TableWriter, STATS_FILE};
