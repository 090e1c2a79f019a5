//! Metropolis sampler for Variational Monte Carlo.
//!
//! Every walker is advanced independently with its own random stream,
//! `key.fold_in(g)` for global walker index `g`, so the trajectory of a batch
//! does not depend on how it is sharded across execution units.

use rand::Rng;

use super::domain::Domain;
use crate::parallel::{all_reduce, Devices, Replicated, Sharded};
use crate::random::Key;
use crate::wavefunction::Walker;

/// Replace non-finite log-probabilities by the extreme finite values so a
/// degenerate proposal is simply rejected.
#[inline]
fn clamp_log_prob(value: f64) -> f64 {
    if value.is_nan() {
        f64::MIN
    } else {
        value.clamp(f64::MIN, f64::MAX)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct McmcSampler {
    pub domain: Domain,
    /// Metropolis rounds per call to [`McmcSampler::advance`].
    pub rounds: usize,
}

impl McmcSampler {
    pub fn new(domain: Domain, rounds: usize) -> Self {
        Self { domain, rounds }
    }

    /// Run `rounds` Metropolis rounds on one walker, returning the number of
    /// accepted moves.
    fn walk<F>(&self, log_prob: &F, walker: &mut Walker, width: f64, key: Key) -> usize
    where
        F: Fn(&Walker) -> f64,
    {
        let mut rng = key.rng();
        let mut current = clamp_log_prob(log_prob(walker));
        let mut accepted = 0;
        for _ in 0..self.rounds {
            let proposal = self.domain.propose(walker, width, &mut rng);
            let proposed = clamp_log_prob(log_prob(&proposal));
            let ratio = proposed - current;
            if rng.gen::<f64>() < ratio.exp() {
                *walker = proposal;
                current = proposed;
                accepted += 1;
            }
        }
        accepted
    }

    /// Advance every walker of the batch and return the new batch together
    /// with the global acceptance rate.
    ///
    /// `log_prob(params, walker)` is the log-density with respect to the
    /// coordinate volume of the domain's flat embedding; the domain's own
    /// measure is added here.
    pub fn advance<P, F>(
        &self,
        devices: &Devices,
        log_prob: &F,
        params: &Replicated<P>,
        data: Sharded<Vec<Walker>>,
        width: &Replicated<f64>,
        key: Key,
    ) -> (Sharded<Vec<Walker>>, Replicated<f64>)
    where
        P: Sync,
        F: Fn(&P, &Walker) -> f64 + Sync,
    {
        let shard_len = data.get(0).len();
        let batch_size = data.batch_len();
        let results = devices.pmap(data.into_shards(), |unit, mut shard| {
            let params = params.get(unit);
            let width = *width.get(unit);
            let target = |w: &Walker| log_prob(params, w) + self.domain.log_measure(w);
            let mut accepted = 0usize;
            for (offset, walker) in shard.iter_mut().enumerate() {
                let g = (unit * shard_len + offset) as u64;
                accepted += self.walk(&target, walker, width, key.fold_in(g));
            }
            (shard, accepted)
        });

        let (shards, counts): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let total = all_reduce(counts, |a, b| a + b);
        let proposals = (batch_size * self.rounds).max(1) as f64;
        let pmove = total.map(|&count| count as f64 / proposals);
        (Sharded::from_shards(shards), pmove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sharded(batch: Vec<Walker>, units: usize) -> Sharded<Vec<Walker>> {
        Sharded::from_batch(batch, units).unwrap()
    }

    fn free_batch(n: usize, key: Key) -> Vec<Walker> {
        Domain::Free { dim: 1 }.init_batch(n, 1, key)
    }

    #[test]
    fn test_acceptance_rate_bounds() {
        let devices = Devices::new(2);
        let sampler = McmcSampler::new(Domain::Free { dim: 1 }, 5);
        let params = Replicated::broadcast((), 2);
        let log_prob = |_: &(), w: &Walker| -0.5 * w.norm_squared();
        for &width in &[1e-3, 0.3, 5.0, 100.0] {
            let (_, pmove) = sampler.advance(
                &devices,
                &log_prob,
                &params,
                sharded(free_batch(16, Key::new(1)), 2),
                &Replicated::broadcast(width, 2),
                Key::new(2),
            );
            assert!(pmove.is_synced());
            assert!((0.0..=1.0).contains(pmove.first()));
        }
    }

    #[test]
    fn test_constant_target_always_accepts() {
        let devices = Devices::new(2);
        let sampler = McmcSampler::new(Domain::Free { dim: 2 }, 20);
        let batch = Domain::Free { dim: 2 }.init_batch(8, 3, Key::new(4));
        let (_, pmove) = sampler.advance(
            &devices,
            &|_: &(), _: &Walker| 1.5,
            &Replicated::broadcast((), 2),
            sharded(batch, 2),
            &Replicated::broadcast(0.7, 2),
            Key::new(5),
        );
        assert_eq!(*pmove.first(), 1.0);
    }

    #[test]
    fn test_degenerate_proposals_are_rejected() {
        let devices = Devices::sequential();
        let sampler = McmcSampler::new(Domain::Free { dim: 1 }, 10);
        let origin = Walker::zeros(2, 1);
        let batch = vec![origin.clone(); 4];
        let log_prob = |p: &Walker, w: &Walker| if w == p { 0.0 } else { f64::NEG_INFINITY };
        let (out, pmove) = sampler.advance(
            &devices,
            &log_prob,
            &Replicated::broadcast(origin.clone(), 1),
            sharded(batch.clone(), 1),
            &Replicated::broadcast(0.5, 1),
            Key::new(6),
        );
        assert_eq!(*pmove.first(), 0.0);
        assert_eq!(out.to_batch(), batch);

        let nan_prob = |p: &Walker, w: &Walker| if w == p { 0.0 } else { f64::NAN };
        let (_, pmove) = sampler.advance(
            &devices,
            &nan_prob,
            &Replicated::broadcast(origin, 1),
            sharded(batch, 1),
            &Replicated::broadcast(0.5, 1),
            Key::new(6),
        );
        assert_eq!(*pmove.first(), 0.0);
    }

    #[test]
    fn test_result_independent_of_device_count() {
        let sampler = McmcSampler::new(Domain::Sphere, 4);
        let batch = Domain::Sphere.init_batch(12, 3, Key::new(9));
        let log_prob = |_: &(), w: &Walker| -w.column(0).map(|t| t.cos()).sum();
        let run = |units: usize, devices: Devices| {
            sampler.advance(
                &devices,
                &log_prob,
                &Replicated::broadcast((), units),
                sharded(batch.clone(), units),
                &Replicated::broadcast(0.4, units),
                Key::new(10),
            )
        };
        let (one, p_one) = run(1, Devices::sequential());
        let (four, p_four) = run(4, Devices::new(4));
        assert_eq!(one.to_batch(), four.to_batch());
        assert_eq!(p_one.first(), p_four.first());
        assert!(p_four.is_synced());
    }

    #[test]
    fn test_sphere_walkers_stay_in_range() {
        let devices = Devices::new(3);
        let sampler = McmcSampler::new(Domain::Sphere, 25);
        let batch = Domain::Sphere.init_batch(9, 2, Key::new(11));
        let (out, _) = sampler.advance(
            &devices,
            &|_: &(), _: &Walker| 0.0,
            &Replicated::broadcast((), 3),
            sharded(batch, 3),
            &Replicated::broadcast(2.0, 3),
            Key::new(12),
        );
        for w in out.to_batch() {
            for i in 0..2 {
                assert!((0.0..=PI).contains(&w[(i, 0)]));
                assert!(w[(i, 1)] > -PI && w[(i, 1)] <= PI);
            }
        }
    }

    #[test]
    fn test_gaussian_target_variance() {
        let devices = Devices::new(4);
        let sampler = McmcSampler::new(Domain::Free { dim: 1 }, 200);
        let batch = vec![Walker::zeros(1, 1); 1000];
        let (out, _) = sampler.advance(
            &devices,
            &|_: &(), w: &Walker| -0.5 * w.norm_squared(),
            &Replicated::broadcast((), 4),
            sharded(batch, 4),
            &Replicated::broadcast(1.0, 4),
            Key::new(13),
        );
        let samples: Vec<f64> = out.to_batch().iter().map(|w| w[(0, 0)]).collect();
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert_relative_eq!(mean, 0.0, epsilon = 0.15);
        assert_relative_eq!(var, 1.0, epsilon = 0.25);
    }

    #[test]
    fn test_uniform_sphere_uses_surface_measure() {
        // Uniform on the sphere has <cos²θ> = 1/3, not the 1/2 of uniform θ.
        let devices = Devices::new(2);
        let sampler = McmcSampler::new(Domain::Sphere, 100);
        let batch = Domain::Sphere.init_batch(1000, 1, Key::new(14));
        let (out, _) = sampler.advance(
            &devices,
            &|_: &(), _: &Walker| 0.0,
            &Replicated::broadcast((), 2),
            sharded(batch, 2),
            &Replicated::broadcast(0.5, 2),
            Key::new(15),
        );
        let mean_cos2 = out
            .to_batch()
            .iter()
            .map(|w| w[(0, 0)].cos().powi(2))
            .sum::<f64>()
            / 1000.0;
        assert_relative_eq!(mean_cos2, 1.0 / 3.0, epsilon = 0.05);
    }
}
