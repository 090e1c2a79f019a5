//! Wavefunction module - log-amplitude evaluators used by the sampler and the
//! training step.

mod traits;
mod laughlin;

pub use traits::{LogPsi, Params, Walker};
pub use laughlin::LaughlinJastrow;
