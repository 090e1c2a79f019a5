//! Run orchestration: bootstrap, burn-in and the main training loop.

use std::time::{Duration, Instant};

use log::{error, info, warn};

use super::state::{StateShape, TrainState};
use super::TrainStep;
use crate::checkpoint::CheckpointManager;
use crate::config::{Config, OptimizerName};
use crate::error::{Error, Result};
use crate::io::{StatsWriter, StepRecord};
use crate::loss::Stats;
use crate::parallel::{Devices, Replicated, Sharded};
use crate::random::Key;
use crate::sampling::{Domain, McmcSampler, WidthAdapter};
use crate::signal::StopSignal;
use crate::wavefunction::{Params, Walker};

/// Independent streams split off the root seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunKeys {
    pub data: Key,
    pub params: Key,
    pub opt_init: Key,
    pub burn_in: Key,
    /// Folded with the step index, then split into a sampling and a training
    /// key, so a resumed run sees the same keys as an uninterrupted one.
    pub steps: Key,
}

impl RunKeys {
    pub fn new(seed: u64) -> Self {
        let keys = Key::new(seed).split(5);
        Self {
            data: keys[0],
            params: keys[1],
            opt_init: keys[2],
            burn_in: keys[3],
            steps: keys[4],
        }
    }

    /// `(mcmc, train)` keys for iteration `step`.
    pub fn for_step(&self, step: usize) -> (Key, Key) {
        self.steps.fold_in(step as u64).split2()
    }
}

/// Outcome of a run that reached its iteration budget.
#[derive(Clone, Debug)]
pub struct Summary {
    /// First iteration executed by this run.
    pub initial_step: usize,
    /// Iterations executed by this run.
    pub steps_run: usize,
    /// Mean wall time per iteration after the first one.
    pub time_per_step: Option<Duration>,
    pub last_stats: Option<Stats>,
    pub state: TrainState,
}

pub struct TrainLoop<S: TrainStep> {
    pub config: Config,
    pub devices: Devices,
    pub domain: Domain,
    pub trainer: S,
}

impl<S: TrainStep> TrainLoop<S> {
    pub fn new(config: Config, devices: Devices, domain: Domain, trainer: S) -> Self {
        Self {
            config,
            devices,
            domain,
            trainer,
        }
    }

    fn sampler(&self) -> McmcSampler {
        McmcSampler::new(self.domain, self.config.mcmc.steps)
    }

    fn shape(&self) -> StateShape {
        StateShape {
            batch_size: self.config.batch_size,
            particles: self.config.system.num_particles(),
            dim: self.domain.dim(),
            num_params: self.trainer.num_params(),
        }
    }

    /// Fresh state: uniform walkers, new parameters, the configured width.
    fn fresh_state(&self, keys: &RunKeys) -> Result<TrainState> {
        let units = self.devices.count();
        let batch = self.domain.init_batch(
            self.config.batch_size,
            self.config.system.num_particles(),
            keys.data,
        );
        Ok(TrainState::new(
            Replicated::broadcast(self.trainer.init_params(keys.params), units),
            Sharded::from_batch(batch, units)?,
            Replicated::broadcast(self.config.mcmc.width, units),
        ))
    }

    /// Resolve the first iteration and the state it starts from.
    ///
    /// A restored checkpoint of step `s` resumes at `s + 1`, except that an
    /// optimizer-free run restoring from somewhere other than its save
    /// directory starts counting again at zero with the restored parameters
    /// and walkers.
    pub fn bootstrap(&self, checkpoints: &CheckpointManager, keys: &RunKeys) -> Result<(usize, TrainState)> {
        let (mut initial_step, mut state) = match checkpoints.restore(&self.devices)? {
            Some((step, state)) => {
                self.shape().check(&state)?;
                (step + 1, state)
            }
            None => (0, self.fresh_state(keys)?),
        };

        let log = &self.config.log;
        if self.config.optim.optimizer == OptimizerName::None && log.is_foreign_restore() && initial_step > 0 {
            info!("warm start from {:?}: resetting step {} to 0", log.restore_path, initial_step);
            initial_step = 0;
        }

        if let Some(opt_state) = state.opt_state.as_ref() {
            if !self.trainer.accepts_opt_state(opt_state.first(), state.params.first()) {
                warn!("restored optimizer state does not match the configured optimizer, reinitializing");
                state = state.with_opt_state(None);
            }
        }
        if state.opt_state.is_none() {
            let opt_state = self.trainer.init_opt_state(&state.params, keys.opt_init);
            state = state.with_opt_state(Some(opt_state));
        }
        Ok((initial_step, state))
    }

    /// Equilibrate the walkers without adapting the width or saving.
    fn burn_in(&self, state: TrainState, keys: &RunKeys) -> TrainState {
        let sampler = self.sampler();
        let log_prob = |p: &Params, w: &Walker| self.trainer.log_prob(p, w);
        let mut state = state;
        for i in 0..self.config.mcmc.burn_in {
            let (data, _) = sampler.advance(
                &self.devices,
                &log_prob,
                &state.params,
                state.data,
                &state.mcmc_width,
                keys.burn_in.fold_in(i as u64),
            );
            state = TrainState { data, ..state };
        }
        state
    }

    /// Run from bootstrap to the end of the iteration budget.
    ///
    /// Divergence and termination signals save a checkpoint and then return
    /// [`Error::Divergence`] or [`Error::InterruptedShutdown`].
    pub fn run(
        &self,
        checkpoints: &mut CheckpointManager,
        writer: &mut dyn StatsWriter,
        stop: &dyn StopSignal,
    ) -> Result<Summary> {
        let keys = RunKeys::new(self.config.seed);
        let (initial_step, mut state) = self.bootstrap(checkpoints, &keys)?;
        let units = self.devices.count();

        if initial_step == 0 {
            state = self.burn_in(state, &keys);
            info!("burn-in done ({} sweeps)", self.config.mcmc.burn_in);
            if self.config.log.initial_energy {
                let stats = self.trainer.evaluate(&self.devices, &state);
                let s = stats.first();
                info!("initial energy: {:.6} (variance {:.6})", s.energy.re, s.variance);
            }
        }

        let sampler = self.sampler();
        let log_prob = |p: &Params, w: &Walker| self.trainer.log_prob(p, w);
        let adapter = WidthAdapter::from_config(&self.config.mcmc);
        let mut window = adapter.window();
        let iterations = self.config.optim.iterations;
        let mut last_stats = None;
        let mut timer: Option<(Instant, usize)> = None;

        info!("training from step {} to {}", initial_step, iterations);
        for step in initial_step..iterations {
            let (mcmc_key, train_key) = keys.for_step(step);
            let (data, pmove) = sampler.advance(
                &self.devices,
                &log_prob,
                &state.params,
                state.data,
                &state.mcmc_width,
                mcmc_key,
            );
            let (width, next_window) = adapter.update(
                step - initial_step,
                *state.mcmc_width.first(),
                *pmove.first(),
                window,
            );
            window = next_window;
            let sampled = TrainState {
                data,
                mcmc_width: Replicated::broadcast(width, units),
                ..state
            };

            let (next, stats) = self.trainer.step(&self.devices, sampled, train_key);
            state = next;
            debug_assert!(state.is_synced());
            last_stats = Some(*stats.first());

            let diverged = stats.iter().any(|s| !s.is_finite());
            let stopping = stop.poll();
            let logged = writer.log(&StepRecord::new(step, *pmove.first(), *stats.first()));
            let force = diverged || stopping || step + 1 == iterations;
            let saved = checkpoints.maybe_save(step, &state, Instant::now(), force);

            if diverged || stopping {
                // Output failures must not hide the abort reason.
                if let Err(e) = logged {
                    error!("failed to log step {step}: {e}");
                }
                match saved {
                    Ok(true) => {
                        if let Err(e) = writer.force_flush() {
                            error!("failed to flush statistics: {e}");
                        }
                    }
                    Ok(false) => {}
                    Err(e) => error!("failed to save checkpoint for step {step}: {e}"),
                }
                if diverged {
                    error!("energy is not finite at step {step}");
                    return Err(Error::Divergence { step });
                }
                warn!("termination signal received, stopped after step {step}");
                return Err(Error::InterruptedShutdown { step });
            }
            logged?;
            if saved? {
                writer.force_flush()?;
            }

            if timer.is_none() {
                timer = Some((Instant::now(), step));
            }
        }
        writer.force_flush()?;

        let time_per_step = timer.and_then(|(start, first)| {
            let steps = iterations.saturating_sub(first + 1);
            (steps > 0).then(|| start.elapsed() / steps as u32)
        });
        if let Some(t) = time_per_step {
            info!("time per step: {:.3}s", t.as_secs_f64());
        }
        Ok(Summary {
            initial_step,
            steps_run: iterations.saturating_sub(initial_step),
            time_per_step,
            last_stats,
            state,
        })
    }
}
