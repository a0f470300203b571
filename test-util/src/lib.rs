//! Synthetic correlation curves with known parameters and known noise
//!
//! Curves are produced from any `Fn(lag_time) -> value`, so this crate does not depend on
//! `fcs-fit` itself and can be used from its unit tests.

use lazy_static::lazy_static;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;

lazy_static! {
    /// Log-spaced lag times from 1e-5 to 1e5 ms
    pub static ref LAG_TIME: Array1<f64> = lag_time(250);
}

/// `n` log-spaced lag times from 1e-5 to 1e5 ms
pub fn lag_time(n: usize) -> Array1<f64> {
    Array1::logspace(10.0, -5.0, 5.0, n)
}

/// Noise level as a fraction of the curve range, with the share of (model, parameter) pairs
/// a fit must recover at this level
#[derive(Clone, Copy, Debug)]
pub struct NoiseTier {
    pub level: f64,
    pub min_recovered: f64,
}

pub const NOISE_TIERS: [NoiseTier; 3] = [
    NoiseTier {
        level: 0.001,
        min_recovered: 0.99,
    },
    NoiseTier {
        level: 0.02,
        min_recovered: 0.95,
    },
    NoiseTier {
        level: 0.05,
        min_recovered: 0.90,
    },
];

/// Sampled curve with its per-sample standard deviation
#[derive(Clone, Debug)]
pub struct SyntheticCurve {
    pub lag_time: Array1<f64>,
    pub values: Array1<f64>,
    pub sigma: Array1<f64>,
}

impl SyntheticCurve {
    pub fn noiseless(curve: impl Fn(f64) -> f64, lag_time: &Array1<f64>) -> Self {
        Self {
            lag_time: lag_time.clone(),
            values: lag_time.mapv(curve),
            sigma: Array1::zeros(lag_time.len()),
        }
    }

    /// Peak-to-peak amplitude of the values
    pub fn range(&self) -> f64 {
        let (min, max) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &x| {
                (min.min(x), max.max(x))
            });
        max - min
    }

    /// Add Gaussian noise with standard deviation `level * range()`
    pub fn with_noise(mut self, level: f64, rng: &mut impl Rng) -> Self {
        let sigma = level * self.range();
        self.values.mapv_inplace(|x| {
            let eps: f64 = rng.sample(StandardNormal);
            x + sigma * eps
        });
        self.sigma.fill(sigma);
        self
    }

    /// Lag time and value columns
    pub fn data(&self) -> Array2<f64> {
        let mut data = Array2::zeros((self.lag_time.len(), 2));
        data.column_mut(0).assign(&self.lag_time);
        data.column_mut(1).assign(&self.values);
        data
    }
}
