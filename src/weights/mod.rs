//! Per-sample standard deviations of correlation curves
//!
//! Spline and model weights estimate the local scatter of the data around a smooth reference
//! curve. The scatter is taken over windows of `2 * spread + 1` samples, and the data range is
//! extended by `spread` samples on both sides of the fit interval where data exist, so the
//! windows at the interval edges are populated.

mod kind;
pub use kind::WeightKind;

mod spline;
pub use spline::LsqCubicSpline;

use crate::array_stats::{local_std, min_positive};
use crate::data::Correlation;
use crate::error::FitError;
use crate::nl_fit::results::Diagnostic;

use ndarray::{Array1, s};

/// Weights for the fit interval of `correlation` at its current parameters
///
/// The result always has the length of [Correlation::correlation_fit].
pub fn compute_weights(correlation: &Correlation) -> Result<Array1<f64>, FitError> {
    compute_weights_at(correlation, correlation.fit_parameters())
}

/// Weights for the fit interval of `correlation`, model weights use `parameters`
pub fn compute_weights_at(
    correlation: &Correlation,
    parameters: &[f64],
) -> Result<Array1<f64>, FitError> {
    let data = correlation.correlation_corrected()?;
    let full = data.nrows();
    let range = correlation.fit_range();
    let n = range.len();

    match correlation.fit_weight_type() {
        WeightKind::None => Ok(Array1::ones(n)),
        WeightKind::External { key } => {
            let weights = correlation
                .weights(key)
                .ok_or_else(|| FitError::UnknownWeightType(key.clone()))?;
            if weights.len() == n {
                Ok(weights.clone())
            } else if weights.len() == full {
                Ok(weights.slice(s![range]).to_owned())
            } else {
                Err(FitError::WeightLength {
                    key: key.clone(),
                    expected: n,
                    full,
                    actual: weights.len(),
                })
            }
        }
        kind @ (WeightKind::Spline { .. } | WeightKind::ModelResidual) => {
            if n == 0 {
                return Ok(Array1::zeros(0));
            }
            let spread = correlation.weight_spread();
            let ext_start = range.start.saturating_sub(spread);
            let ext_end = usize::min(full, range.end + spread);
            let x = data.slice(s![ext_start..ext_end, 0]);
            let y = data.slice(s![ext_start..ext_end, 1]);
            let reference = match kind {
                WeightKind::Spline { knots } => {
                    LsqCubicSpline::fit(x, y, *knots)?.evaluate(x)
                }
                _ => correlation.fit_model().evaluate(parameters, x),
            };
            let residuals = &y - &reference;
            Ok(local_std(
                residuals.view(),
                range.start - ext_start,
                n,
                spread,
            ))
        }
    }
}

/// Replace zero and non-finite weights by the smallest valid one, or unity if there is none
pub fn sanitize_weights(weights: &mut Array1<f64>) -> Option<Diagnostic> {
    let is_invalid = |w: f64| !w.is_finite() || w == 0.0;
    let count = weights.iter().filter(|&&w| is_invalid(w)).count();
    if count == 0 {
        return None;
    }
    let replacement = min_positive(weights.view()).unwrap_or(1.0);
    weights.mapv_inplace(|w| if is_invalid(w) { replacement } else { w });
    let diagnostic = Diagnostic::WeightsReplaced { count, replacement };
    log::warn!("{diagnostic}");
    Some(diagnostic)
}
