//! Stochastic Reconfiguration (SR) update.
//!
//! Natural gradient descent on the penalised energy:
//!
//!   (S + ε I) · δp = -f
//!
//! where:
//! - S_ij = ⟨O_i O_j⟩ - ⟨O_i⟩⟨O_j⟩  (overlap/covariance matrix)
//! - f_i = ⟨E_L O_i⟩ - ⟨E_L⟩⟨O_i⟩  (energy-parameter covariance)
//! - O_i = ∂ ln|Ψ| / ∂p_i            (log-derivatives)

use nalgebra::DMatrix;

use crate::config::LearningRate;
use crate::loss::Moments;
use crate::wavefunction::Params;

#[derive(Clone, Debug, PartialEq)]
pub struct StochasticReconfiguration {
    pub lr: LearningRate,
    /// Levenberg-Marquardt regularization for the S matrix
    pub epsilon: f64,
}

impl StochasticReconfiguration {
    pub fn new(lr: LearningRate, epsilon: f64) -> Self {
        Self { lr, epsilon }
    }

    /// Solve for the parameter direction δp.
    pub fn direction(&self, moments: &Moments) -> Params {
        let n_params = moments.log_grad.len();
        let s_matrix = moments.overlap() + DMatrix::identity(n_params, n_params) * self.epsilon;
        let neg_force = -moments.force();
        s_matrix.lu().solve(&neg_force).unwrap_or_else(|| {
            // Fallback to simple gradient if S is singular
            neg_force.clone()
        })
    }

    /// p_new = p_old + lr(t) δp
    pub fn update(&self, params: &Params, count: u64, moments: &Moments) -> Params {
        let delta = self.direction(moments);
        params + delta * self.lr.schedule(count)
    }
}
