//! Step-width control from a window of acceptance rates.

use crate::config::Mcmc;

/// The last `N` acceptance rates, slot `t mod N` holding iteration `t`.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptanceWindow {
    rates: Vec<f64>,
}

impl AcceptanceWindow {
    pub fn new(size: usize) -> Self {
        Self {
            rates: vec![0.0; size.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn mean(&self) -> f64 {
        self.rates.iter().sum::<f64>() / self.rates.len() as f64
    }

    /// The same window with slot `t mod N` replaced.
    pub fn with_rate(mut self, t: usize, rate: f64) -> Self {
        let slot = t % self.rates.len();
        self.rates[slot] = rate;
        self
    }
}

/// Rescales the step width towards a target acceptance rate once per full
/// window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WidthAdapter {
    pub window_size: usize,
    pub target_acceptance: f64,
    pub exponent: f64,
    pub min_width: f64,
    pub max_width: f64,
}

impl WidthAdapter {
    pub fn from_config(mcmc: &Mcmc) -> Self {
        Self {
            window_size: mcmc.adapt_frequency.max(1),
            target_acceptance: mcmc.target_acceptance,
            exponent: mcmc.adapt_exponent,
            min_width: mcmc.min_width,
            max_width: mcmc.max_width,
        }
    }

    pub fn window(&self) -> AcceptanceWindow {
        AcceptanceWindow::new(self.window_size)
    }

    /// Record `acceptance` for iteration `t` and return the width to use next.
    ///
    /// The width only changes when `(t + 1) % window_size == 0`. The factor
    /// `(mean / target)^exponent` never moves the width against the sign of
    /// `mean - target`, even after clamping to `[min_width, max_width]`.
    pub fn update(
        &self,
        t: usize,
        width: f64,
        acceptance: f64,
        window: AcceptanceWindow,
    ) -> (f64, AcceptanceWindow) {
        let window = window.with_rate(t, acceptance);
        if (t + 1) % self.window_size != 0 {
            return (width, window);
        }

        let mean = window.mean();
        let scaled = (width * (mean / self.target_acceptance).powf(self.exponent))
            .clamp(self.min_width, self.max_width);
        let new_width = if mean > self.target_acceptance {
            scaled.max(width)
        } else if mean < self.target_acceptance {
            scaled.min(width)
        } else {
            width
        };
        (new_width, window)
    }
}
