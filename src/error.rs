//! Error kinds surfaced by the training driver.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while configuring, restoring or running a simulation.
///
/// Sampling and step-width adaptation never produce errors: degenerate
/// log-probabilities are clamped in the hot loop instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is inconsistent or could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A restored checkpoint does not fit the current configuration.
    #[error("checkpoint does not match configuration: {0}")]
    ShapeMismatch(String),

    /// A checkpoint exists but cannot be fully deserialized.
    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    /// The energy became non-finite on at least one execution unit.
    #[error("energy diverged at step {step}")]
    Divergence { step: usize },

    /// A termination signal was received; the run stopped after saving.
    #[error("interrupted by signal after step {step}")]
    InterruptedShutdown { step: usize },

    /// Installing or restoring signal handlers failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the run through the checkpoint-then-abort path.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Error::Divergence { .. } | Error::InterruptedShutdown { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
