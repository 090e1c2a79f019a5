//! Training module - the VMC optimization loop and its state.

mod driver;
mod state;

pub use driver::{RunKeys, Summary, TrainLoop};
pub use state::{Snapshot, StateShape, TrainState};

use crate::config::Config;
use crate::loss::{Moments, Penalties, Stats, WalkerSample};
use crate::optim::{OptState, Optimizer};
use crate::parallel::{all_reduce, Devices, Replicated};
use crate::random::Key;
use crate::systems::Sphere;
use crate::wavefunction::{LogPsi, Params, Walker};

/// One optimization step of the wavefunction, plus what the loop needs to
/// create and sample from it.
pub trait TrainStep: Sync {
    fn num_params(&self) -> usize;

    fn init_params(&self, key: Key) -> Params;

    /// Log-density sampled by the Metropolis walk, `2 log|Ψ|`.
    fn log_prob(&self, params: &Params, walker: &Walker) -> f64;

    fn init_opt_state(&self, params: &Replicated<Params>, key: Key) -> Replicated<OptState>;

    /// Whether a restored optimizer state can be used as is.
    fn accepts_opt_state(&self, _state: &OptState, _params: &Params) -> bool {
        true
    }

    /// Update parameters and optimizer state from the current walkers.
    fn step(&self, devices: &Devices, state: TrainState, key: Key) -> (TrainState, Replicated<Stats>);

    /// Statistics of the current walkers without an update.
    fn evaluate(&self, devices: &Devices, state: &TrainState) -> Replicated<Stats>;
}

/// Energy minimization of a [`LogPsi`] network on the sphere.
pub struct VmcStep<N: LogPsi> {
    pub network: N,
    pub system: Sphere,
    pub penalties: Penalties,
    pub optimizer: Optimizer,
}

impl<N: LogPsi> VmcStep<N> {
    pub fn new(network: N, config: &Config) -> Self {
        Self {
            network,
            system: Sphere::from_config(&config.system),
            penalties: Penalties::from_config(&config.system),
            optimizer: Optimizer::from_config(&config.optim),
        }
    }

    /// Evaluate every walker on its unit, gather the samples in global
    /// walker order and sum them identically on each unit.
    fn moments(&self, devices: &Devices, state: &TrainState) -> Replicated<Moments> {
        let parts = devices.pmap(state.data.iter().collect(), |unit, shard: &Vec<Walker>| {
            let params = state.params.get(unit);
            let log_psi = |w: &Walker| self.network.log_psi(params, w);
            shard
                .iter()
                .map(|walker| {
                    let local = self.system.local_energy(&log_psi, walker);
                    WalkerSample {
                        objective: self.penalties.objective(&local),
                        local,
                        log_grad: self.network.log_psi_grad(params, walker),
                    }
                })
                .collect::<Vec<_>>()
        });
        let num_params = self.network.num_params();
        all_reduce(parts, |mut all, part| {
            all.extend(part);
            all
        })
        .map(|samples| Moments::from_samples(num_params, samples))
    }
}

impl<N: LogPsi> TrainStep for VmcStep<N> {
    fn num_params(&self) -> usize {
        self.network.num_params()
    }

    fn init_params(&self, key: Key) -> Params {
        self.network.init_params(key)
    }

    fn log_prob(&self, params: &Params, walker: &Walker) -> f64 {
        2.0 * self.network.log_psi(params, walker)
    }

    fn init_opt_state(&self, params: &Replicated<Params>, _key: Key) -> Replicated<OptState> {
        params.map(|p| self.optimizer.init(p))
    }

    fn accepts_opt_state(&self, state: &OptState, params: &Params) -> bool {
        self.optimizer.matches(state, params)
    }

    fn step(&self, devices: &Devices, state: TrainState, key: Key) -> (TrainState, Replicated<Stats>) {
        let moments = self.moments(devices, &state);
        let opt_state = match state.opt_state.as_ref() {
            Some(opt_state) => opt_state.clone(),
            None => self.init_opt_state(&state.params, key),
        };
        let (params, opt_state): (Vec<_>, Vec<_>) = (0..state.units())
            .map(|unit| {
                self.optimizer
                    .update(state.params.get(unit), opt_state.get(unit), moments.get(unit))
            })
            .unzip();
        let stats = moments.map(Moments::stats);
        let state = state
            .with_params(Replicated::from_copies(params))
            .with_opt_state(Some(Replicated::from_copies(opt_state)));
        (state, stats)
    }

    fn evaluate(&self, devices: &Devices, state: &TrainState) -> Replicated<Stats> {
        self.moments(devices, state).map(Moments::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkType, OptimizerName};
    use crate::parallel::Sharded;
    use crate::sampling::Domain;
    use crate::wavefunction::LaughlinJastrow;

    fn config(optimizer: OptimizerName) -> Config {
        let mut config = Config::default();
        config.system.nspins = (3, 0);
        config.system.flux = 4;
        config.network.kind = NetworkType::Laughlin;
        config.optim.optimizer = optimizer;
        config
    }

    fn state(step: &VmcStep<LaughlinJastrow>, units: usize) -> TrainState {
        let batch = Domain::Sphere.init_batch(8, 3, Key::new(1));
        TrainState::new(
            Replicated::broadcast(step.init_params(Key::new(2)), units),
            Sharded::from_batch(batch, units).unwrap(),
            Replicated::broadcast(0.1, units),
        )
    }

    fn vmc(optimizer: OptimizerName) -> VmcStep<LaughlinJastrow> {
        let config = config(optimizer);
        VmcStep::new(LaughlinJastrow::from_config(&config.system, &config.network), &config)
    }

    #[test]
    fn test_step_keeps_replicas_synced() {
        let vmc = vmc(OptimizerName::Adam);
        let devices = Devices::new(2);
        let (next, stats) = vmc.step(&devices, state(&vmc, 2), Key::new(3));
        assert!(next.is_synced());
        assert!(stats.is_synced());
        assert!(stats.first().is_finite());
        assert!(matches!(next.opt_state.unwrap().first(), OptState::Adam { count: 1, .. }));
    }

    #[test]
    fn test_statistics_independent_of_device_count() {
        let vmc = vmc(OptimizerName::Sr);
        let one = vmc.evaluate(&Devices::sequential(), &state(&vmc, 1));
        let four = vmc.evaluate(&Devices::new(4), &state(&vmc, 4));
        assert_eq!(one.first(), four.first());
    }

    #[test]
    fn test_none_optimizer_leaves_params() {
        let vmc = vmc(OptimizerName::None);
        let start = state(&vmc, 2);
        let (next, _) = vmc.step(&Devices::new(2), start.clone(), Key::new(4));
        assert_eq!(next.params, start.params);
        assert_eq!(next.data, start.data);
    }
}
