//! Laughlin-Jastrow wavefunction on the sphere.
//!
//! log|Ψ| = m Σᵢ<ⱼ ln dᵢⱼ + Σₖ pₖ Σᵢ<ⱼ dᵢⱼ^(k+1)
//!
//! where dᵢⱼ = sin(γᵢⱼ/2) is half the unit chord between particles i and j
//! (|uᵢvⱼ - uⱼvᵢ| in spinor coordinates). The Laughlin exponent m is fixed by
//! the flux; only the pair polynomial is variational. A `free` network drops
//! the Laughlin factor.

use rand_distr::{Distribution, Normal};

use super::traits::{LogPsi, Params, Walker};
use crate::config::{Network, NetworkType, System};
use crate::random::Key;
use crate::systems::sphere::unit_chord;

/// Spread of the initial Jastrow coefficients.
const INIT_SCALE: f64 = 0.01;

#[derive(Clone, Debug, PartialEq)]
pub struct LaughlinJastrow {
    /// Laughlin exponent m; zero for a free network.
    pub exponent: f64,
    pub num_particles: usize,
    /// Number of polynomial Jastrow coefficients.
    pub terms: usize,
}

impl LaughlinJastrow {
    pub fn new(exponent: f64, num_particles: usize, terms: usize) -> Self {
        Self {
            exponent,
            num_particles,
            terms,
        }
    }

    /// Build the network described by the configuration.
    ///
    /// For a Laughlin network the exponent is `|2Q| / (N - 1)`.
    pub fn from_config(system: &System, network: &Network) -> Self {
        let n = system.num_particles();
        let exponent = match network.kind {
            NetworkType::Laughlin if n > 1 => f64::from(system.flux.abs()) / (n - 1) as f64,
            _ => 0.0,
        };
        Self::new(exponent, n, network.jastrow_terms)
    }

    /// Generate all unique particle pairs (i, j) with i < j.
    fn unique_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_particles)
            .flat_map(move |i| ((i + 1)..self.num_particles).map(move |j| (i, j)))
    }

    /// Σᵢ<ⱼ dᵢⱼ^(k+1) for each polynomial term k.
    fn pair_features(&self, walker: &Walker) -> Params {
        let mut features = Params::zeros(self.terms);
        for (i, j) in self.unique_pairs() {
            let d = 0.5 * unit_chord(walker, i, j);
            let mut power = d;
            for k in 0..self.terms {
                features[k] += power;
                power *= d;
            }
        }
        features
    }
}

impl LogPsi for LaughlinJastrow {
    fn num_params(&self) -> usize {
        self.terms
    }

    fn init_params(&self, key: Key) -> Params {
        let mut rng = key.rng();
        let normal = Normal::new(0.0, INIT_SCALE).expect("positive scale");
        Params::from_fn(self.terms, |_, _| normal.sample(&mut rng))
    }

    fn log_psi(&self, params: &Params, walker: &Walker) -> f64 {
        let mut value = params.dot(&self.pair_features(walker));
        if self.exponent != 0.0 {
            let laughlin: f64 = self
                .unique_pairs()
                .map(|(i, j)| (0.5 * unit_chord(walker, i, j)).ln())
                .sum();
            value += self.exponent * laughlin;
        }
        value
    }

    /// The log-amplitude is linear in the parameters, so O is just the
    /// feature vector.
    fn log_psi_grad(&self, _params: &Params, walker: &Walker) -> Params {
        self.pair_features(walker)
    }
}
