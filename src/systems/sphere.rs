//! Particles on a sphere.
//!
//! Each particle is stored as spherical angles `(theta, phi)` in one row of a
//! [`Walker`]. Local observables are evaluated from `f = log|Ψ|` alone, by
//! finite differences on the sphere:
//!
//!   -∇²Ψ / 2Ψ = -(∇²f + |∇f|²) / 2
//!   L_a² Ψ / Ψ = -(D_a² f + (D_a f)²)
//!
//! where D_a is the derivative under a rigid rotation of all particles about
//! axis `a`.

use std::f64::consts::PI;

use nalgebra::{DVector, Rotation3, Unit, Vector3};
use num_complex::Complex64;

use crate::config::{InteractionType, System};
use crate::wavefunction::Walker;

/// Finite-difference step for coordinate derivatives.
const FD_STEP: f64 = 1e-4;

/// Unit vector for spherical angles.
#[inline]
pub fn unit_vector(theta: f64, phi: f64) -> Vector3<f64> {
    let (sin_t, cos_t) = theta.sin_cos();
    let (sin_p, cos_p) = phi.sin_cos();
    Vector3::new(sin_t * cos_p, sin_t * sin_p, cos_t)
}

/// Canonical angles `theta ∈ [0, π]`, `phi ∈ (-π, π]` of a direction.
#[inline]
pub fn angles(v: &Vector3<f64>) -> (f64, f64) {
    let r = v.norm();
    let theta = (v.z / r).clamp(-1.0, 1.0).acos();
    (theta, v.y.atan2(v.x))
}

/// Chord distance between particles `i` and `j` on the unit sphere.
#[inline]
pub fn unit_chord(walker: &Walker, i: usize, j: usize) -> f64 {
    let a = unit_vector(walker[(i, 0)], walker[(i, 1)]);
    let b = unit_vector(walker[(j, 0)], walker[(j, 1)]);
    (a - b).norm()
}

/// Pair correlation `g(θ)` of the great-circle angle between particles.
///
/// Pair angles of every walker are histogrammed over `bins` equal bins on
/// `[0, π]`, each pair weighted by `1 / sin θ`, and scaled by
/// `4 bins / (batch N² π)`. A uniform state gives `g ≈ (N - 1) / N`. Results
/// of several batches add up; dividing by the number of batches is left to
/// the caller.
pub fn pair_correlation(walkers: &[Walker], bins: usize) -> DVector<f64> {
    let mut histogram = DVector::zeros(bins);
    let Some(first) = walkers.first() else {
        return histogram;
    };
    let particles = first.nrows();
    if bins == 0 || particles < 2 {
        return histogram;
    }

    for walker in walkers {
        let points: Vec<Vector3<f64>> = (0..particles)
            .map(|i| unit_vector(walker[(i, 0)], walker[(i, 1)]))
            .collect();
        for i in 0..particles {
            for j in (i + 1)..particles {
                let theta = points[i].dot(&points[j]).clamp(-1.0, 1.0).acos();
                let sin_theta = theta.sin();
                if sin_theta <= 0.0 {
                    continue;
                }
                let bin = ((theta / PI * bins as f64) as usize).min(bins - 1);
                histogram[bin] += 1.0 / sin_theta;
            }
        }
    }

    let norm = 4.0 * bins as f64 / (walkers.len() * particles * particles) as f64 / PI;
    histogram * norm
}

/// Rigidly rotate every particle about `axis` by `angle`.
pub fn rotate(walker: &Walker, axis: &Unit<Vector3<f64>>, angle: f64) -> Walker {
    let rotation = Rotation3::from_axis_angle(axis, angle);
    let mut rotated = walker.clone();
    for i in 0..walker.nrows() {
        let v = rotation * unit_vector(walker[(i, 0)], walker[(i, 1)]);
        let (theta, phi) = angles(&v);
        rotated[(i, 0)] = theta;
        rotated[(i, 1)] = phi;
    }
    rotated
}

/// Per-walker values of the observables reported every step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocalEnergy {
    pub kinetic: Complex64,
    pub potential: f64,
    /// Lz Ψ / Ψ
    pub lz: Complex64,
    /// Lz² Ψ / Ψ
    pub lz_square: f64,
    /// L² Ψ / Ψ
    pub l_square: f64,
}

impl LocalEnergy {
    pub fn energy(&self) -> Complex64 {
        self.kinetic + self.potential
    }
}

/// Sphere of radius `radius` with a pair interaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Sphere {
    pub radius: f64,
    pub interaction: InteractionType,
    pub interaction_strength: f64,
}

impl Sphere {
    pub fn from_config(system: &System) -> Self {
        Self {
            radius: system.radius(),
            interaction: system.interaction_type,
            interaction_strength: system.interaction_strength,
        }
    }

    /// Pair potential summed over all particle pairs.
    pub fn potential(&self, walker: &Walker) -> f64 {
        let n = walker.nrows();
        let mut total = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let r = self.radius * unit_chord(walker, i, j);
                total += match self.interaction {
                    InteractionType::Coulomb => 1.0 / r,
                    InteractionType::Harmonic => r * r,
                };
            }
        }
        self.interaction_strength * total
    }

    /// Local kinetic energy -∇²Ψ / 2Ψ from the log-amplitude `f`.
    pub fn kinetic<F>(&self, f: &F, walker: &Walker) -> Complex64
    where
        F: Fn(&Walker) -> f64,
    {
        let h = FD_STEP;
        let f0 = f(walker);
        let mut laplacian = 0.0;
        let mut grad_square = 0.0;
        let mut shifted = walker.clone();
        for i in 0..walker.nrows() {
            let theta = walker[(i, 0)];
            let phi = walker[(i, 1)];
            let sin_t = theta.sin();

            shifted[(i, 0)] = theta + h;
            let f_tp = f(&shifted);
            shifted[(i, 0)] = theta - h;
            let f_tm = f(&shifted);
            shifted[(i, 0)] = theta;

            shifted[(i, 1)] = phi + h;
            let f_pp = f(&shifted);
            shifted[(i, 1)] = phi - h;
            let f_pm = f(&shifted);
            shifted[(i, 1)] = phi;

            let d_t = (f_tp - f_tm) / (2.0 * h);
            let d_tt = (f_tp - 2.0 * f0 + f_tm) / (h * h);
            let d_p = (f_pp - f_pm) / (2.0 * h);
            let d_pp = (f_pp - 2.0 * f0 + f_pm) / (h * h);

            laplacian += d_tt + d_t * theta.cos() / sin_t + d_pp / (sin_t * sin_t);
            grad_square += d_t * d_t + d_p * d_p / (sin_t * sin_t);
        }
        let r2 = self.radius * self.radius;
        Complex64::new(-0.5 * (laplacian + grad_square) / r2, 0.0)
    }

    /// Local `(Lz, Lz², L²)` from rigid rotations of the whole configuration.
    pub fn angular_momentum<F>(&self, f: &F, walker: &Walker) -> (Complex64, f64, f64)
    where
        F: Fn(&Walker) -> f64,
    {
        let h = FD_STEP;
        let f0 = f(walker);
        let mut lz = Complex64::new(0.0, 0.0);
        let mut lz_square = 0.0;
        let mut l_square = 0.0;
        for (index, axis) in [Vector3::x_axis(), Vector3::y_axis(), Vector3::z_axis()]
            .iter()
            .enumerate()
        {
            let f_plus = f(&rotate(walker, axis, h));
            let f_minus = f(&rotate(walker, axis, -h));
            let d = (f_plus - f_minus) / (2.0 * h);
            let d2 = (f_plus - 2.0 * f0 + f_minus) / (h * h);
            let square = -(d2 + d * d);
            l_square += square;
            if index == 2 {
                lz = Complex64::new(0.0, -d);
                lz_square = square;
            }
        }
        (lz, lz_square, l_square)
    }

    /// All local observables for one walker.
    pub fn local_energy<F>(&self, f: &F, walker: &Walker) -> LocalEnergy
    where
        F: Fn(&Walker) -> f64,
    {
        let (lz, lz_square, l_square) = self.angular_momentum(f, walker);
        LocalEnergy {
            kinetic: self.kinetic(f, walker),
            potential: self.potential(walker),
            lz,
            lz_square,
            l_square,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn sphere(radius: f64, interaction: InteractionType) -> Sphere {
        Sphere {
            radius,
            interaction,
            interaction_strength: 1.0,
        }
    }

    fn walker(angles: &[(f64, f64)]) -> Walker {
        DMatrix::from_fn(angles.len(), 2, |i, j| if j == 0 { angles[i].0 } else { angles[i].1 })
    }

    #[test]
    fn test_angles_round_trip() {
        for &(theta, phi) in &[(0.3, 1.2), (2.9, -3.0), (1.5707, 0.0), (0.01, -0.5)] {
            let (t, p) = angles(&unit_vector(theta, phi));
            assert_relative_eq!(t, theta, epsilon = 1e-10);
            assert_relative_eq!(p, phi, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_antipodal_chord() {
        let w = walker(&[(0.0, 0.0), (std::f64::consts::PI, 0.0)]);
        assert_relative_eq!(unit_chord(&w, 0, 1), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pair_correlation_flat_for_uniform_state() {
        use crate::random::Key;
        use crate::sampling::Domain;

        let batch = Domain::Sphere.init_batch(2000, 4, Key::new(21));
        let g = pair_correlation(&batch, 10);
        assert_eq!(g.len(), 10);
        // edge bins carry the 1/sin θ noise
        for bin in 2..8 {
            assert_relative_eq!(g[bin], 0.75, epsilon = 0.1);
        }
    }

    #[test]
    fn test_pair_correlation_bins_pair_angle() {
        let theta = 0.6 * PI;
        // one pair, 0.6π apart, lands in the third of four bins
        let w = walker(&[(0.0, 0.0), (theta, 0.3)]);
        let g = pair_correlation(&[w], 4);
        let expected = 4.0 * 4.0 / (1.0 * 2.0 * 2.0) / PI / theta.sin();
        assert_relative_eq!(g[2], expected, epsilon = 1e-9);
        assert_eq!(g[0] + g[1] + g[3], 0.0);
        assert_eq!(pair_correlation(&[], 4), DVector::<f64>::zeros(4));
    }

    #[test]
    fn test_potential() {
        let w = walker(&[(0.0, 0.0), (std::f64::consts::PI, 0.0)]);
        let coulomb = sphere(2.0, InteractionType::Coulomb);
        assert_relative_eq!(coulomb.potential(&w), 0.25, epsilon = 1e-12);
        let harmonic = sphere(2.0, InteractionType::Harmonic);
        assert_relative_eq!(harmonic.potential(&w), 16.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_wavefunction_has_no_kinetic_energy() {
        let s = sphere(1.5, InteractionType::Coulomb);
        let w = walker(&[(0.7, 0.2), (2.1, -1.3)]);
        let kinetic = s.kinetic(&|_: &Walker| 0.3, &w);
        assert_relative_eq!(kinetic.re, 0.0, epsilon = 1e-8);
        let (lz, lz2, l2) = s.angular_momentum(&|_: &Walker| 0.3, &w);
        assert_relative_eq!(lz.im, 0.0, epsilon = 1e-8);
        assert_relative_eq!(lz2, 0.0, epsilon = 1e-8);
        assert_relative_eq!(l2, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_kinetic_of_polar_exponential() {
        // f = a cos(theta): ∇²f = -2a cos(theta) / R², |∇f|² = a² sin²(theta) / R²
        let a = 0.8;
        let radius = 1.7;
        let s = sphere(radius, InteractionType::Coulomb);
        let f = |w: &Walker| a * w[(0, 0)].cos();
        let theta: f64 = 1.1;
        let w = walker(&[(theta, 0.4)]);
        let expected =
            -0.5 * (-2.0 * a * theta.cos() + a * a * theta.sin().powi(2)) / (radius * radius);
        assert_relative_eq!(s.kinetic(&f, &w).re, expected, epsilon = 1e-5);

        // L² = -R² ∇² on the sphere, so L² = 2 R² T for one particle.
        let (_, lz2, l2) = s.angular_momentum(&f, &w);
        assert_relative_eq!(lz2, 0.0, epsilon = 1e-6);
        assert_relative_eq!(l2, 2.0 * radius * radius * expected, epsilon = 1e-4);
    }

    #[test]
    fn test_azimuthal_phase_gradient() {
        // f = phi has D_z f = 1 for one particle, so Lz ψ/ψ = -i.
        let s = sphere(1.0, InteractionType::Coulomb);
        let f = |w: &Walker| w[(0, 1)];
        let w = walker(&[(1.0, 0.3)]);
        let (lz, lz2, _) = s.angular_momentum(&f, &w);
        assert_relative_eq!(lz.im, -1.0, epsilon = 1e-6);
        assert_relative_eq!(lz2, -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rotation_preserves_chords() {
        let w = walker(&[(0.4, 0.1), (1.9, 2.5), (2.6, -1.0)]);
        let rotated = rotate(&w, &Vector3::x_axis(), 0.7);
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            assert_relative_eq!(unit_chord(&w, i, j), unit_chord(&rotated, i, j), epsilon = 1e-12);
        }
    }
}
