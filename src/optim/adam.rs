//! Adam on the energy gradient.

use crate::config::LearningRate;
use crate::wavefunction::Params;

use super::OptState;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-8;

#[derive(Clone, Debug, PartialEq)]
pub struct Adam {
    pub lr: LearningRate,
}

impl Adam {
    pub fn new(lr: LearningRate) -> Self {
        Self { lr }
    }

    pub fn update(
        &self,
        params: &Params,
        m: Params,
        v: Params,
        count: u64,
        grad: &Params,
    ) -> (Params, OptState) {
        let m = m * BETA1 + grad * (1.0 - BETA1);
        let v = v * BETA2 + grad.component_mul(grad) * (1.0 - BETA2);
        let t = (count + 1) as i32;
        let m_hat = &m / (1.0 - BETA1.powi(t));
        let v_hat = &v / (1.0 - BETA2.powi(t));
        let lr = self.lr.schedule(count);
        let step = m_hat.zip_map(&v_hat, |m, v| lr * m / (v.sqrt() + EPS));
        let params = params - step;
        (
            params,
            OptState::Adam {
                m,
                v,
                count: count + 1,
            },
        )
    }
}
