//! Systems module - physical systems the driver can simulate.

pub mod sphere;

pub use sphere::{pair_correlation, LocalEnergy, Sphere};
