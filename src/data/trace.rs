use crate::error::FitError;

use itertools::Itertools;
use ndarray::{Array2, array};
use std::sync::OnceLock;

#[derive(Clone, Debug)]
enum TraceSource {
    Samples(Array2<f64>),
    Flat { countrate: f64, duration: f64 },
}

/// Intensity time series of a single detection channel
///
/// Only the countrate is used by the fitting core, for background correction and supplementary
/// values. It is computed on the first request and cached afterwards.
#[derive(Clone, Debug)]
pub struct Trace {
    source: TraceSource,
    countrate: OnceLock<f64>,
}

impl Trace {
    /// Trace from `(time, rate)` rows, time must not decrease and span a positive duration
    pub fn from_samples(samples: Array2<f64>) -> Result<Self, FitError> {
        if samples.ncols() != 2 {
            return Err(FitError::InvalidTrace("trace must have two columns"));
        }
        if samples.nrows() < 2 {
            return Err(FitError::InvalidTrace("trace needs at least two samples"));
        }
        let time = samples.column(0);
        if time.iter().tuple_windows().any(|(a, b)| b < a) {
            return Err(FitError::InvalidTrace("trace time must not decrease"));
        }
        if !(time[time.len() - 1] - time[0] > 0.0) {
            return Err(FitError::InvalidTrace("trace duration must be positive"));
        }
        Ok(Self {
            source: TraceSource::Samples(samples),
            countrate: OnceLock::new(),
        })
    }

    /// Flat trace of a known countrate
    pub fn flat(countrate: f64, duration: f64) -> Self {
        Self {
            source: TraceSource::Flat {
                countrate,
                duration,
            },
            countrate: OnceLock::new(),
        }
    }

    /// Placeholder used when a background channel is not measured
    pub fn zero() -> Self {
        Self::flat(0.0, 1.0)
    }

    /// `(time, rate)` rows, synthesized as two points for a flat trace
    pub fn samples(&self) -> Array2<f64> {
        match &self.source {
            TraceSource::Samples(samples) => samples.clone(),
            TraceSource::Flat {
                countrate,
                duration,
            } => array![[0.0, *countrate], [*duration, *countrate]],
        }
    }

    pub fn duration(&self) -> f64 {
        match &self.source {
            TraceSource::Samples(samples) => {
                samples[[samples.nrows() - 1, 0]] - samples[[0, 0]]
            }
            TraceSource::Flat { duration, .. } => *duration,
        }
    }

    pub fn countrate(&self) -> f64 {
        *self.countrate.get_or_init(|| match &self.source {
            TraceSource::Samples(samples) => {
                // Trapezoidal integral over the time span
                let integral: f64 = samples
                    .rows()
                    .into_iter()
                    .tuple_windows()
                    .map(|(a, b)| 0.5 * (a[1] + b[1]) * (b[0] - a[0]))
                    .sum();
                integral / self.duration()
            }
            TraceSource::Flat { countrate, .. } => *countrate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn flat_trace() {
        let trace = Trace::flat(12.5, 30.0);
        assert_eq!(trace.countrate(), 12.5);
        assert_eq!(trace.duration(), 30.0);
        assert_eq!(trace.samples(), array![[0.0, 12.5], [30.0, 12.5]]);
    }

    #[test]
    fn integral_countrate() {
        let trace =
            Trace::from_samples(array![[0.0, 10.0], [1.0, 20.0], [3.0, 20.0], [4.0, 10.0]])
                .unwrap();
        // (15 + 40 + 15) / 4
        assert_relative_eq!(trace.countrate(), 17.5);
    }

    #[test]
    fn invalid_samples() {
        assert!(Trace::from_samples(array![[0.0, 1.0]]).is_err());
        assert!(Trace::from_samples(array![[1.0, 1.0], [0.0, 1.0]]).is_err());
        assert!(Trace::from_samples(array![[1.0, 1.0], [1.0, 1.0]]).is_err());
        assert!(Trace::from_samples(array![[0.0, 1.0, 2.0], [1.0, 1.0, 2.0]]).is_err());
    }
}
