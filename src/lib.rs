//! Hall VMC - variational Monte Carlo for quantum Hall droplets on a sphere
//!
//! This crate drives the sampling-and-optimization loop: a Metropolis sampler
//! with step-width control, replicated training state over data-parallel
//! execution units, checkpointing and cooperative shutdown on signals.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod io;
pub mod loss;
pub mod optim;
pub mod parallel;
pub mod random;
pub mod sampling;
pub mod signal;
pub mod systems;
pub mod train;
pub mod wavefunction;

use std::time::Instant;

// Re-export commonly used types at crate root
pub use checkpoint::{CheckpointManager, CheckpointRecord};
pub use config::Config;
pub use error::{Error, Result};
pub use io::{StatsWriter, StepRecord, TableWriter};
pub use loss::Stats;
pub use optim::{OptState, Optimizer};
pub use parallel::{all_reduce, Devices, Replicated, Sharded};
pub use random::Key;
pub use sampling::{AcceptanceWindow, Domain, McmcSampler, WidthAdapter};
pub use signal::{GracefulKiller, StopSignal};
pub use systems::{LocalEnergy, Sphere};
pub use train::{RunKeys, Summary, TrainLoop, TrainState, TrainStep, VmcStep};
pub use wavefunction::{LaughlinJastrow, LogPsi, Params, Walker};

/// Columns left out of the console line.
pub const HIDDEN_COLUMNS: [&str; 3] = ["kinetic", "potential", "Lz_square"];

/// Train the configured Laughlin-Jastrow network on the sphere.
pub fn run(config: Config, devices: Devices, stop: &dyn StopSignal) -> Result<Summary> {
    info_banner(&config, &devices);
    let network = LaughlinJastrow::from_config(&config.system, &config.network);
    let trainer = VmcStep::new(network, &config);
    let mut checkpoints = CheckpointManager::new(&config.log, Instant::now());
    let mut writer = TableWriter::create(checkpoints.save_dir())?.hide(&HIDDEN_COLUMNS);
    let train_loop = TrainLoop::new(config, devices, Domain::Sphere, trainer);
    train_loop.run(&mut checkpoints, &mut writer, stop)
}

fn info_banner(config: &Config, devices: &Devices) {
    log::info!(
        "{} particles, flux {}, batch {} on {} device(s){}",
        config.system.num_particles(),
        config.system.flux,
        config.batch_size,
        devices.count(),
        if devices.is_parallel() { "" } else { " (sequential)" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.batch_size = 8;
        config.seed = 3;
        config.system.nspins = (3, 0);
        config.system.flux = 4;
        config.mcmc.burn_in = 2;
        config.mcmc.steps = 2;
        config.mcmc.adapt_frequency = 2;
        config.optim.iterations = 4;
        config.optim.optimizer = config::OptimizerName::Adam;
        config
    }

    #[test]
    fn test_run_reaches_iteration_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.log.save_path = Some(dir.path().to_path_buf());
        let stop = AtomicBool::new(false);
        let summary = run(config, Devices::new(2), &stop).unwrap();
        assert_eq!(summary.initial_step, 0);
        assert_eq!(summary.steps_run, 4);
        assert!(summary.last_stats.unwrap().is_finite());
        assert!(summary.state.is_synced());
        // final step is always saved
        assert!(dir.path().join(checkpoint::checkpoint_name(3)).is_file());
        assert!(dir.path().join(io::STATS_FILE).is_file());
    }

    #[test]
    fn test_run_is_reproducible_across_device_counts() {
        let stop = AtomicBool::new(false);
        let one = run(small_config(), Devices::sequential(), &stop).unwrap();
        let two = run(small_config(), Devices::new(2), &stop).unwrap();
        assert_eq!(one.state.snapshot(), two.state.snapshot());
    }
}
