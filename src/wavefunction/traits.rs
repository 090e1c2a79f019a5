//! Wave function traits for VMC training.
//!
//! A wavefunction is seen only through its log-amplitude `log|Ψ|` as a
//! function of a particle configuration and a flat parameter vector.

use nalgebra::{DMatrix, DVector};

use crate::random::Key;

/// One particle configuration, shape `[particles, coordinate_dim]`.
pub type Walker = DMatrix<f64>;

/// Flat vector of variational parameters.
pub type Params = DVector<f64>;

/// Trait for wavefunctions with optimizable variational parameters.
pub trait LogPsi: Sync {
    /// Number of variational parameters.
    fn num_params(&self) -> usize;

    /// Freshly initialized parameters.
    fn init_params(&self, key: Key) -> Params;

    /// Evaluate `log|Ψ(R)|`.
    ///
    /// Degenerate configurations may return `-inf`; callers clamp.
    fn log_psi(&self, params: &Params, walker: &Walker) -> f64;

    /// Compute O_i = ∂ ln|Ψ(R)| / ∂p_i for all parameters.
    ///
    /// The default uses central differences.
    fn log_psi_grad(&self, params: &Params, walker: &Walker) -> Params {
        let h = 1e-5;
        let mut grad = Params::zeros(params.len());
        let mut shifted = params.clone();
        for i in 0..params.len() {
            shifted[i] = params[i] + h;
            let forward = self.log_psi(&shifted, walker);
            shifted[i] = params[i] - h;
            let backward = self.log_psi(&shifted, walker);
            shifted[i] = params[i];
            grad[i] = (forward - backward) / (2.0 * h);
        }
        grad
    }
}
