//! The unit of resumable progress.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::optim::OptState;
use crate::parallel::{Replicated, Sharded};
use crate::wavefunction::{Params, Walker};

/// Parameters, walkers, optimizer state and step width, laid out over the
/// execution units.
///
/// Values are replaced wholesale through the `with_*` builders; nothing is
/// mutated in place, so a state handed to the checkpoint manager is always a
/// consistent snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainState {
    pub params: Replicated<Params>,
    pub data: Sharded<Vec<Walker>>,
    /// Absent until the optimizer is first initialized.
    pub opt_state: Option<Replicated<OptState>>,
    pub mcmc_width: Replicated<f64>,
}

impl TrainState {
    pub fn new(params: Replicated<Params>, data: Sharded<Vec<Walker>>, mcmc_width: Replicated<f64>) -> Self {
        Self {
            params,
            data,
            opt_state: None,
            mcmc_width,
        }
    }

    pub fn units(&self) -> usize {
        self.data.units()
    }

    pub fn with_params(self, params: Replicated<Params>) -> Self {
        Self { params, ..self }
    }

    pub fn with_opt_state(self, opt_state: Option<Replicated<OptState>>) -> Self {
        Self { opt_state, ..self }
    }

    pub fn with_mcmc_width(self, mcmc_width: Replicated<f64>) -> Self {
        Self { mcmc_width, ..self }
    }

    /// Every replicated field holds identical copies on all units.
    pub fn is_synced(&self) -> bool {
        let units = self.units();
        self.params.units() == units
            && self.params.is_synced()
            && self.mcmc_width.units() == units
            && self.mcmc_width.is_synced()
            && self
                .opt_state
                .as_ref()
                .map_or(true, |o| o.units() == units && o.is_synced())
    }

    /// Device-independent copy: unit 0's replicas and the whole batch.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            params: self.params.first().clone(),
            data: self.data.to_batch(),
            opt_state: self.opt_state.as_ref().map(|o| o.first().clone()),
            mcmc_width: *self.mcmc_width.first(),
        }
    }

    /// Lay a snapshot out over `units` execution units.
    pub fn from_snapshot(snapshot: Snapshot, units: usize) -> Result<Self> {
        let data = Sharded::from_batch(snapshot.data, units)?;
        Ok(Self {
            params: Replicated::broadcast(snapshot.params, units),
            data,
            opt_state: snapshot.opt_state.map(|o| Replicated::broadcast(o, units)),
            mcmc_width: Replicated::broadcast(snapshot.mcmc_width, units),
        })
    }
}

/// What a checkpoint stores of a [`TrainState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub params: Params,
    pub data: Vec<Walker>,
    pub opt_state: Option<OptState>,
    pub mcmc_width: f64,
}

/// Expected layout of a state for the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateShape {
    pub batch_size: usize,
    pub particles: usize,
    pub dim: usize,
    pub num_params: usize,
}

impl StateShape {
    /// Reject a state that does not fit this run instead of padding or
    /// truncating it.
    pub fn check(&self, state: &TrainState) -> Result<()> {
        let batch = state.data.batch_len();
        if batch != self.batch_size {
            return Err(Error::ShapeMismatch(format!(
                "batch size {} in checkpoint, {} configured",
                batch, self.batch_size
            )));
        }
        if let Some(walker) = state.data.iter().flatten().find(|w| w.shape() != (self.particles, self.dim)) {
            return Err(Error::ShapeMismatch(format!(
                "walker shape {:?} in checkpoint, {:?} configured",
                walker.shape(),
                (self.particles, self.dim)
            )));
        }
        let num_params = state.params.first().len();
        if num_params != self.num_params {
            return Err(Error::ShapeMismatch(format!(
                "{} parameters in checkpoint, {} expected",
                num_params, self.num_params
            )));
        }
        let width = *state.mcmc_width.first();
        if !(width.is_finite() && width > 0.0) {
            return Err(Error::ShapeMismatch(format!("step width {width} is not positive")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(units: usize) -> TrainState {
        let batch: Vec<Walker> = (0..4).map(|i| Walker::from_element(3, 2, i as f64)).collect();
        TrainState::new(
            Replicated::broadcast(Params::from_vec(vec![0.1, 0.2]), units),
            Sharded::from_batch(batch, units).unwrap(),
            Replicated::broadcast(0.1, units),
        )
    }

    fn shape() -> StateShape {
        StateShape {
            batch_size: 4,
            particles: 3,
            dim: 2,
            num_params: 2,
        }
    }

    #[test]
    fn test_snapshot_reshards() {
        let two = state(2).with_opt_state(Some(Replicated::broadcast(OptState::Sr { count: 4 }, 2)));
        let four = TrainState::from_snapshot(two.snapshot(), 4).unwrap();
        assert_eq!(four.units(), 4);
        assert!(four.is_synced());
        assert_eq!(four.snapshot(), two.snapshot());
        assert!(TrainState::from_snapshot(two.snapshot(), 3).is_err());
    }

    #[test]
    fn test_builders_replace_one_field() {
        let s = state(2);
        let wider = s.clone().with_mcmc_width(Replicated::broadcast(0.3, 2));
        assert_eq!(*wider.mcmc_width.first(), 0.3);
        assert_eq!(wider.params, s.params);
        assert_eq!(wider.data, s.data);
    }

    #[test]
    fn test_unsynced_replicas_detected() {
        let s = state(2).with_params(Replicated::from_copies(vec![
            Params::from_vec(vec![0.1, 0.2]),
            Params::from_vec(vec![0.1, 0.3]),
        ]));
        assert!(!s.is_synced());
        assert!(state(2).is_synced());
    }

    #[test]
    fn test_shape_check() {
        assert!(shape().check(&state(2)).is_ok());
        let bigger = StateShape { batch_size: 8, ..shape() };
        assert!(matches!(bigger.check(&state(2)), Err(Error::ShapeMismatch(_))));
        let more_particles = StateShape { particles: 4, ..shape() };
        assert!(more_particles.check(&state(1)).is_err());
        let more_params = StateShape { num_params: 3, ..shape() };
        assert!(more_params.check(&state(1)).is_err());
        let zero_width = state(1).with_mcmc_width(Replicated::broadcast(0.0, 1));
        assert!(shape().check(&zero_width).is_err());
    }
}
