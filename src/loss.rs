//! Energy statistics and the penalised objective.
//!
//! Execution units evaluate per-walker [`WalkerSample`]s on their shards. The
//! samples are gathered in global walker order and summed into [`Moments`]
//! the same way on every unit, so statistics and gradients are bit-identical
//! across units and do not depend on how many units there are.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::config::System;
use crate::systems::LocalEnergy;
use crate::wavefunction::Params;

/// Penalties selecting an angular momentum sector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Penalties {
    pub lz_center: f64,
    pub lz_penalty: f64,
    pub l2_penalty: f64,
}

impl Penalties {
    pub fn from_config(system: &System) -> Self {
        Self {
            lz_center: system.lz_center,
            lz_penalty: system.lz_penalty,
            l2_penalty: system.l2_penalty,
        }
    }

    /// Local value of `E + λz (Lz - c)² + λ L²`.
    pub fn objective(&self, local: &LocalEnergy) -> f64 {
        let c = self.lz_center;
        let lz_shift = local.lz_square - 2.0 * c * local.lz.re + c * c;
        local.energy().re + self.lz_penalty * lz_shift + self.l2_penalty * local.l_square
    }
}

/// Batch averages reported after every training step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub energy: Complex64,
    pub potential: f64,
    pub kinetic: Complex64,
    pub variance: f64,
    pub angular_momentum_z: f64,
    pub angular_momentum_z_square: f64,
    pub angular_momentum_square: f64,
}

impl Stats {
    pub fn is_finite(&self) -> bool {
        self.energy.re.is_finite()
    }
}

/// Local quantities of one walker.
#[derive(Clone, Debug, PartialEq)]
pub struct WalkerSample {
    pub local: LocalEnergy,
    pub objective: f64,
    /// O = ∂ ln|Ψ| / ∂p
    pub log_grad: Params,
}

/// Running sums over walkers.
#[derive(Clone, Debug, PartialEq)]
pub struct Moments {
    pub count: usize,
    pub energy: Complex64,
    pub energy_norm_sqr: f64,
    pub potential: f64,
    pub kinetic: Complex64,
    pub lz: Complex64,
    pub lz_square: f64,
    pub l_square: f64,
    pub objective: f64,
    /// Σ O
    pub log_grad: Params,
    /// Σ objective · O
    pub objective_log_grad: Params,
    /// Σ O Oᵀ
    pub log_grad_outer: DMatrix<f64>,
}

impl Moments {
    pub fn zeros(num_params: usize) -> Self {
        Self {
            count: 0,
            energy: Complex64::new(0.0, 0.0),
            energy_norm_sqr: 0.0,
            potential: 0.0,
            kinetic: Complex64::new(0.0, 0.0),
            lz: Complex64::new(0.0, 0.0),
            lz_square: 0.0,
            l_square: 0.0,
            objective: 0.0,
            log_grad: DVector::zeros(num_params),
            objective_log_grad: DVector::zeros(num_params),
            log_grad_outer: DMatrix::zeros(num_params, num_params),
        }
    }

    /// Sum `samples` in order.
    pub fn from_samples(num_params: usize, samples: &[WalkerSample]) -> Self {
        let mut moments = Self::zeros(num_params);
        for sample in samples {
            moments.accumulate(&sample.local, sample.objective, &sample.log_grad);
        }
        moments
    }

    /// Add one walker.
    pub fn accumulate(&mut self, local: &LocalEnergy, objective: f64, log_grad: &Params) {
        let energy = local.energy();
        self.count += 1;
        self.energy += energy;
        self.energy_norm_sqr += energy.norm_sqr();
        self.potential += local.potential;
        self.kinetic += local.kinetic;
        self.lz += local.lz;
        self.lz_square += local.lz_square;
        self.l_square += local.l_square;
        self.objective += objective;
        self.log_grad += log_grad;
        self.objective_log_grad.axpy(objective, log_grad, 1.0);
        self.log_grad_outer.ger(1.0, log_grad, log_grad, 1.0);
    }

    fn n(&self) -> f64 {
        self.count.max(1) as f64
    }

    pub fn stats(&self) -> Stats {
        let n = self.n();
        let energy = self.energy / n;
        Stats {
            energy,
            potential: self.potential / n,
            kinetic: self.kinetic / n,
            variance: self.energy_norm_sqr / n - energy.norm_sqr(),
            angular_momentum_z: self.lz.re / n,
            angular_momentum_z_square: self.lz_square / n,
            angular_momentum_square: self.l_square / n,
        }
    }

    /// f_i = ⟨obj O_i⟩ - ⟨obj⟩⟨O_i⟩
    pub fn force(&self) -> Params {
        let n = self.n();
        &self.objective_log_grad / n - &self.log_grad * (self.objective / n / n)
    }

    /// Gradient of the objective, `2 f`.
    pub fn gradient(&self) -> Params {
        self.force() * 2.0
    }

    /// S_ij = ⟨O_i O_j⟩ - ⟨O_i⟩⟨O_j⟩
    pub fn overlap(&self) -> DMatrix<f64> {
        let n = self.n();
        let mean = &self.log_grad / n;
        &self.log_grad_outer / n - &mean * mean.transpose()
    }
}
