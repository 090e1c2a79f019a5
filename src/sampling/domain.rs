//! Coordinate domains the sampler moves walkers on.

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::random::Key;
use crate::systems::sphere::{angles, unit_vector};
use crate::wavefunction::Walker;

/// Where particle coordinates live and how a Gaussian move is folded back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Domain {
    /// Rows are `(theta, phi)` on the unit sphere.
    Sphere,
    /// Box of side `length` with periodic boundaries.
    Periodic { length: f64, dim: usize },
    /// Unbounded Euclidean coordinates.
    Free { dim: usize },
}

impl Domain {
    /// Coordinates per particle.
    pub fn dim(&self) -> usize {
        match self {
            Domain::Sphere => 2,
            Domain::Periodic { dim, .. } | Domain::Free { dim } => *dim,
        }
    }

    /// One walker drawn uniformly over the domain (standard normal when
    /// the domain is unbounded).
    pub fn init_walker<R: Rng>(&self, particles: usize, rng: &mut R) -> Walker {
        match *self {
            Domain::Sphere => Walker::from_fn(particles, 2, |_, col| {
                if col == 0 {
                    rng.gen_range(-1.0f64..1.0).acos()
                } else {
                    rng.gen_range(-PI..PI)
                }
            }),
            Domain::Periodic { length, dim } => {
                Walker::from_fn(particles, dim, |_, _| rng.gen_range(0.0..length))
            }
            Domain::Free { dim } => {
                Walker::from_fn(particles, dim, |_, _| StandardNormal.sample(&mut *rng))
            }
        }
    }

    /// Initial batch; walker `g` is drawn from `key.fold_in(g)`.
    pub fn init_batch(&self, batch_size: usize, particles: usize, key: Key) -> Vec<Walker> {
        (0..batch_size)
            .map(|g| self.init_walker(particles, &mut key.fold_in(g as u64).rng()))
            .collect()
    }

    /// Isotropic Gaussian move of every coordinate, folded into the domain.
    pub fn propose<R: Rng>(&self, walker: &Walker, width: f64, rng: &mut R) -> Walker {
        let mut proposal = walker.map(|x| {
            let noise: f64 = StandardNormal.sample(&mut *rng);
            x + width * noise
        });
        self.fold(&mut proposal);
        proposal
    }

    /// Map coordinates back to their canonical range.
    pub fn fold(&self, walker: &mut Walker) {
        match *self {
            Domain::Sphere => {
                for i in 0..walker.nrows() {
                    let (theta, phi) = angles(&unit_vector(walker[(i, 0)], walker[(i, 1)]));
                    walker[(i, 0)] = theta;
                    walker[(i, 1)] = phi;
                }
            }
            Domain::Periodic { length, .. } => {
                walker.apply(|x| *x = x.rem_euclid(length));
            }
            Domain::Free { .. } => {}
        }
    }

    /// Log of the volume element in these coordinates, `Σ ln sin θ` on the
    /// sphere and zero otherwise.
    pub fn log_measure(&self, walker: &Walker) -> f64 {
        match self {
            Domain::Sphere => walker.column(0).iter().map(|theta| theta.sin().ln()).sum(),
            _ => 0.0,
        }
    }
}
