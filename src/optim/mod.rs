//! Parameter updates driven by the reduced energy statistics.

mod adam;
mod sr;

use serde::{Deserialize, Serialize};

use crate::config::{Optim, OptimizerName};
use crate::loss::Moments;
use crate::wavefunction::Params;

pub use adam::Adam;
pub use sr::StochasticReconfiguration;

/// Internal optimizer state carried between steps and into checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OptState {
    Adam { m: Params, v: Params, count: u64 },
    Sr { count: u64 },
    /// The `none` optimizer keeps nothing.
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Optimizer {
    Adam(Adam),
    Sr(StochasticReconfiguration),
    /// Statistics only; parameters are left untouched.
    None,
}

impl Optimizer {
    pub fn from_config(optim: &Optim) -> Self {
        match optim.optimizer {
            OptimizerName::Adam => Optimizer::Adam(Adam::new(optim.adam.lr)),
            OptimizerName::Sr => Optimizer::Sr(StochasticReconfiguration::new(
                optim.sr.lr,
                optim.sr.epsilon,
            )),
            OptimizerName::None => Optimizer::None,
        }
    }

    /// Fresh state for `params`.
    pub fn init(&self, params: &Params) -> OptState {
        match self {
            Optimizer::Adam(_) => OptState::Adam {
                m: Params::zeros(params.len()),
                v: Params::zeros(params.len()),
                count: 0,
            },
            Optimizer::Sr(_) => OptState::Sr { count: 0 },
            Optimizer::None => OptState::Empty,
        }
    }

    /// Whether `state` was produced by this kind of optimizer for `params`.
    pub fn matches(&self, state: &OptState, params: &Params) -> bool {
        match (self, state) {
            (Optimizer::Adam(_), OptState::Adam { m, v, .. }) => {
                m.len() == params.len() && v.len() == params.len()
            }
            (Optimizer::Sr(_), OptState::Sr { .. }) => true,
            (Optimizer::None, OptState::Empty) => true,
            _ => false,
        }
    }

    /// One update from the reduced moments of the current batch.
    ///
    /// A state of the wrong kind is replaced by a fresh one first.
    pub fn update(&self, params: &Params, state: &OptState, moments: &Moments) -> (Params, OptState) {
        let state = if self.matches(state, params) {
            state.clone()
        } else {
            self.init(params)
        };
        match (self, state) {
            (Optimizer::Adam(adam), OptState::Adam { m, v, count }) => {
                adam.update(params, m, v, count, &moments.gradient())
            }
            (Optimizer::Sr(sr), OptState::Sr { count }) => {
                let params = sr.update(params, count, moments);
                (params, OptState::Sr { count: count + 1 })
            }
            (_, state) => (params.clone(), state),
        }
    }
}
