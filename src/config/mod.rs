//! Run configuration.
//!
//! Configuration is resolved once at startup in a fixed order: built-in
//! defaults, then an optional YAML file, then dotted `key.path=value`
//! overrides from the command line. The merged document is deserialized into
//! the typed [`Config`] and validated before anything else runs.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::parallel::Devices;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    #[default]
    Coulomb,
    Harmonic,
}

/// Particles on a sphere pierced by a monopole of strength `flux / 2`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct System {
    /// Positive or negative integer 2Q.
    pub flux: i32,
    /// Sphere radius; `sqrt(|Q|)` when unset.
    pub radius: Option<f64>,
    /// Number of spin-up and spin-down particles.
    pub nspins: (usize, usize),
    /// Factor for the potential energy.
    pub interaction_strength: f64,
    /// Lz picked by the penalty method.
    pub lz_center: f64,
    /// Strength of the (Lz - lz_center)^2 penalty.
    pub lz_penalty: f64,
    /// Strength of the L^2 penalty.
    pub l2_penalty: f64,
    pub interaction_type: InteractionType,
}

impl Default for System {
    fn default() -> Self {
        Self {
            flux: 2,
            radius: None,
            nspins: (3, 0),
            interaction_strength: 1.0,
            lz_center: 0.0,
            lz_penalty: 0.0,
            l2_penalty: 0.0,
            interaction_type: InteractionType::Coulomb,
        }
    }
}

impl System {
    pub fn num_particles(&self) -> usize {
        self.nspins.0 + self.nspins.1
    }

    pub fn radius(&self) -> f64 {
        self.radius
            .unwrap_or_else(|| (f64::from(self.flux.abs()) / 2.0).sqrt())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Laughlin,
    Free,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Network {
    #[serde(rename = "type")]
    pub kind: NetworkType,
    /// Number of polynomial terms in the pair Jastrow factor.
    pub jastrow_terms: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            kind: NetworkType::Laughlin,
            jastrow_terms: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Mcmc {
    /// Metropolis rounds per sampling call.
    pub steps: usize,
    /// Initial standard deviation of the Gaussian move.
    pub width: f64,
    /// Sampling calls before training; `burn_in * steps` rounds in total.
    pub burn_in: usize,
    /// Iterations between step-width updates.
    pub adapt_frequency: usize,
    pub target_acceptance: f64,
    /// Width is rescaled by `(mean / target)^adapt_exponent`.
    pub adapt_exponent: f64,
    pub min_width: f64,
    pub max_width: f64,
}

impl Default for Mcmc {
    fn default() -> Self {
        Self {
            steps: 10,
            width: 0.1,
            burn_in: 200,
            adapt_frequency: 100,
            target_acceptance: 0.5,
            adapt_exponent: 0.5,
            min_width: 1e-3,
            max_width: std::f64::consts::PI,
        }
    }
}

/// Learning rate `rate * (1 / (1 + t / delay))^decay`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearningRate {
    pub rate: f64,
    pub decay: f64,
    pub delay: f64,
}

impl Default for LearningRate {
    fn default() -> Self {
        Self {
            rate: 0.005,
            decay: 1.0,
            delay: 2000.0,
        }
    }
}

impl LearningRate {
    pub fn schedule(&self, t: u64) -> f64 {
        self.rate * (1.0 / (1.0 + t as f64 / self.delay)).powf(self.decay)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerName {
    Adam,
    #[default]
    Sr,
    /// Evaluate statistics without touching the parameters.
    None,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerAdam {
    pub lr: LearningRate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerSr {
    pub lr: LearningRate,
    /// Diagonal shift added to the overlap matrix.
    pub epsilon: f64,
}

impl Default for OptimizerSr {
    fn default() -> Self {
        Self {
            lr: LearningRate {
                rate: 0.05,
                ..LearningRate::default()
            },
            epsilon: 1e-3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Optim {
    pub iterations: usize,
    pub optimizer: OptimizerName,
    pub adam: OptimizerAdam,
    pub sr: OptimizerSr,
}

impl Default for Optim {
    fn default() -> Self {
        Self {
            iterations: 1000,
            optimizer: OptimizerName::Sr,
            adam: OptimizerAdam::default(),
            sr: OptimizerSr::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Log {
    /// Directory for checkpoints and statistics.
    pub save_path: Option<PathBuf>,
    /// Checkpoint file or directory to restore from; defaults to `save_path`.
    pub restore_path: Option<PathBuf>,
    /// Minimum seconds between periodic checkpoint saves.
    pub save_time_interval: u64,
    /// Periodic saves only happen when `(step + 1)` is a multiple of this.
    pub save_step_interval: usize,
    /// Log the energy after burn-in, before any optimization.
    pub initial_energy: bool,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            save_path: None,
            restore_path: None,
            save_time_interval: 10 * 60,
            save_step_interval: 1000,
            initial_energy: true,
        }
    }
}

impl Log {
    /// Where checkpoints are looked up at startup.
    pub fn restore_location(&self) -> Option<&Path> {
        self.restore_path.as_deref().or(self.save_path.as_deref())
    }

    /// Restoring from a location other than the one being written to.
    pub fn is_foreign_restore(&self) -> bool {
        match &self.restore_path {
            Some(restore) => self.save_path.as_ref() != Some(restore),
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub batch_size: usize,
    pub seed: u64,
    /// Number of execution units; chosen from the thread pool when unset.
    pub devices: Option<usize>,
    pub system: System,
    pub network: Network,
    pub mcmc: Mcmc,
    pub optim: Optim,
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 3360, // 32*3*5*7
            seed: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            devices: None,
            system: System::default(),
            network: Network::default(),
            mcmc: Mcmc::default(),
            optim: Optim::default(),
            log: Log::default(),
        }
    }
}

fn config_error(e: impl std::fmt::Display) -> Error {
    Error::Config(e.to_string())
}

impl Config {
    /// Merge defaults, an optional YAML file and dotted overrides.
    pub fn load(yml: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut document = serde_yaml::to_value(Config::default()).map_err(config_error)?;
        if let Some(path) = yml {
            let reader = BufReader::new(File::open(path)?);
            let layer: Value = serde_yaml::from_reader(reader).map_err(config_error)?;
            merge(&mut document, layer);
        }
        for item in overrides {
            let (key, raw) = item
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got {item:?}")))?;
            let value: Value = serde_yaml::from_str(raw).map_err(config_error)?;
            set_path(&mut document, key.trim(), value)?;
        }
        let config: Config = serde_yaml::from_value(document).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, msg: &str| {
            if ok {
                Ok(())
            } else {
                Err(Error::Config(msg.to_string()))
            }
        };
        check(self.batch_size > 0, "batch_size must be positive")?;
        check(self.system.num_particles() > 0, "system.nspins must contain a particle")?;
        let radius = self.system.radius();
        check(radius.is_finite() && radius > 0.0, "sphere radius must be positive")?;
        check(self.network.jastrow_terms > 0 || self.network.kind == NetworkType::Laughlin,
            "network.jastrow_terms must be positive for a free network")?;
        if self.network.kind == NetworkType::Laughlin {
            let n = self.system.num_particles() as i32;
            check(
                n == 1 || self.system.flux % (n - 1) == 0,
                "system.flux must be a multiple of (particles - 1) for a Laughlin network",
            )?;
        }

        let mcmc = &self.mcmc;
        check(mcmc.steps > 0, "mcmc.steps must be positive")?;
        check(mcmc.adapt_frequency > 0, "mcmc.adapt_frequency must be positive")?;
        check(mcmc.min_width > 0.0, "mcmc.min_width must be positive")?;
        check(
            mcmc.min_width <= mcmc.width && mcmc.width <= mcmc.max_width,
            "mcmc.width must lie in [mcmc.min_width, mcmc.max_width]",
        )?;
        check(
            mcmc.target_acceptance > 0.0 && mcmc.target_acceptance < 1.0,
            "mcmc.target_acceptance must lie in (0, 1)",
        )?;
        check(mcmc.adapt_exponent > 0.0, "mcmc.adapt_exponent must be positive")?;

        check(self.log.save_step_interval > 0, "log.save_step_interval must be positive")?;
        if let Some(devices) = self.devices {
            check(devices > 0, "devices must be positive")?;
            check(
                self.batch_size % devices == 0,
                "batch_size must be divisible by the number of devices",
            )?;
        }
        Ok(())
    }

    /// Execution units for this run.
    ///
    /// Without an explicit count, the largest divisor of the batch size that
    /// fits in the rayon thread pool is used.
    pub fn devices(&self, debug: bool) -> Devices {
        if debug {
            return Devices::sequential();
        }
        let count = self.devices.unwrap_or_else(|| {
            let threads = rayon::current_num_threads().max(1);
            (1..=threads.min(self.batch_size))
                .rev()
                .find(|d| self.batch_size % d == 0)
                .unwrap_or(1)
        });
        Devices::new(count)
    }
}

/// Recursively overlay `layer` onto `base`.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Set a dotted path such as `log.save_path` inside a YAML document.
fn set_path(document: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut node = document;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(Error::Config(format!("empty segment in key {path:?}")));
        }
        if !node.is_mapping() {
            if node.is_null() {
                *node = Value::Mapping(Mapping::new());
            } else {
                return Err(Error::Config(format!(
                    "{path:?}: {:?} is not a section",
                    segments[..i].join(".")
                )));
            }
        }
        let map = node.as_mapping_mut().expect("checked above");
        let key = Value::String((*segment).to_string());
        if i + 1 == segments.len() {
            map.insert(key, value);
            return Ok(());
        }
        node = map.entry(key).or_insert(Value::Null);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn overrides(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.batch_size, 3360);
        assert_eq!(config.optim.optimizer, OptimizerName::Sr);
        assert_relative_eq!(config.system.radius(), 1.0);
    }

    #[test]
    fn test_dotlist_overrides() {
        let config = Config::load(
            None,
            &overrides(&[
                "batch_size=64",
                "seed=11",
                "system.nspins=[4, 0]",
                "system.flux=6",
                "optim.optimizer=none",
                "log.save_path=/tmp/run",
                "mcmc.width=0.2",
            ]),
        )
        .unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.seed, 11);
        assert_eq!(config.system.nspins, (4, 0));
        assert_eq!(config.optim.optimizer, OptimizerName::None);
        assert_eq!(config.log.save_path, Some(PathBuf::from("/tmp/run")));
        assert_relative_eq!(config.mcmc.width, 0.2);
        // untouched sections keep their defaults
        assert_eq!(config.mcmc.steps, 10);
    }

    #[test]
    fn test_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "batch_size: 128\nmcmc:\n  steps: 3\n  burn_in: 7\n").unwrap();

        let config = Config::load(Some(&path), &overrides(&["mcmc.steps=5"])).unwrap();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.mcmc.burn_in, 7);
        assert_eq!(config.mcmc.steps, 5);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = Config::load(None, &overrides(&["mcmc.stepz=3"]));
        assert!(matches!(result, Err(Error::Config(_))));
        let result = Config::load(None, &overrides(&["batch_size"]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.devices = Some(7);
        config.batch_size = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mcmc.width = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.system.nspins = (4, 0);
        config.system.flux = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_count_divides_batch() {
        let mut config = Config::default();
        config.batch_size = 12;
        let devices = config.devices(false);
        assert_eq!(12 % devices.count(), 0);
        assert_eq!(config.devices(true), Devices::sequential());
        config.devices = Some(3);
        assert_eq!(config.devices(false).count(), 3);
    }

    #[test]
    fn test_restore_location() {
        let mut log = Log::default();
        assert!(log.restore_location().is_none());
        log.save_path = Some(PathBuf::from("a"));
        assert_eq!(log.restore_location(), Some(Path::new("a")));
        assert!(!log.is_foreign_restore());
        log.restore_path = Some(PathBuf::from("a"));
        assert!(!log.is_foreign_restore());
        log.restore_path = Some(PathBuf::from("b"));
        assert!(log.is_foreign_restore());
        assert_eq!(log.restore_location(), Some(Path::new("b")));
    }

    #[test]
    fn test_learning_rate_schedule() {
        let lr = LearningRate { rate: 0.1, decay: 1.0, delay: 10.0 };
        assert_relative_eq!(lr.schedule(0), 0.1);
        assert_relative_eq!(lr.schedule(10), 0.05);
    }
}
