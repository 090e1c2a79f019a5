//! Sampling module - Metropolis sampling and step-width control.

mod adapt;
mod domain;
mod mcmc;

pub use adapt::{AcceptanceWindow, WidthAdapter};
pub use domain::Domain;
pub use mcmc::McmcSampler;
