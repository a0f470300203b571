use crate::error::FitError;
use crate::nl_fit::bounds::Bound;
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::layout::{FreeSlot, SlotKind};
use crate::nl_fit::objective::{Objective, cost};
use crate::nl_fit::results::Diagnostic;

use ndarray::Array1;
use ndarray_stats::DeviationExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Repeated minimization escaping optimizers stuck at their starting point
///
/// After every minimization a free model parameter which did not move is halved and the
/// minimization is repeated from there. Without stuck parameters the loop stops as soon as the
/// mean absolute change of the residuals between two attempts drops below `threshold`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StuckParameterRetry {
    pub max_attempts: usize,
    pub threshold: f64,
    /// Relative change below which a parameter counts as stuck
    pub stuck_tolerance: f64,
}

impl StuckParameterRetry {
    pub fn new(max_attempts: usize, threshold: f64, stuck_tolerance: f64) -> Self {
        assert!(max_attempts > 0, "max_attempts must be positive");
        Self {
            max_attempts,
            threshold,
            stuck_tolerance,
        }
    }

    #[inline]
    pub fn default_max_attempts() -> usize {
        5
    }

    #[inline]
    pub fn default_threshold() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_stuck_tolerance() -> f64 {
        1e-14
    }

    fn is_stuck(&self, before: f64, after: f64) -> bool {
        (after - before).abs() <= self.stuck_tolerance * f64::max(1.0, before.abs())
    }
}

impl Default for StuckParameterRetry {
    fn default() -> Self {
        Self::new(
            Self::default_max_attempts(),
            Self::default_threshold(),
            Self::default_stuck_tolerance(),
        )
    }
}

/// Objective which may change between attempts, e.g. weights depending on the parameters
pub trait AttemptObjective: Objective {
    /// Called with the start vector before every attempt but the first
    ///
    /// It is called once more after the last attempt if an earlier one gave the result, so the
    /// objective ends up as it was when the result was found.
    fn prepare_attempt(&mut self, _x: &[f64]) -> Result<(), FitError> {
        Ok(())
    }

    /// Residuals free of anything `prepare_attempt` changes, compared between attempts
    fn deviations(&self, x: &[f64]) -> Array1<f64> {
        self.residuals(x)
    }

    fn as_objective(&self) -> &dyn Objective;
}

#[derive(Clone, Debug)]
pub struct Minimization {
    /// Best free variables over all attempts
    pub x: Vec<f64>,
    pub success: bool,
    pub attempts: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Minimize with optional retries, `cancelled` is polled between attempts
pub fn minimize(
    algorithm: &dyn CurveFitTrait,
    objective: &mut dyn AttemptObjective,
    free: &[FreeSlot],
    retry: Option<&StuckParameterRetry>,
    cancelled: &dyn Fn() -> bool,
) -> Result<Minimization, FitError> {
    let bounds: Vec<Bound> = free.iter().map(|slot| slot.bound).collect();
    let max_attempts = retry.map_or(1, |retry| retry.max_attempts);

    let mut x: Vec<f64> = free.iter().map(|slot| slot.start).collect();
    let mut previous: Array1<f64> = objective.deviations(&x);
    // Best result with its attempt and start vector
    let mut best: Option<(CurveFitResult, usize, Vec<f64>)> = None;
    let mut diagnostics = vec![];
    let mut attempts = 0;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            if cancelled() {
                return Err(FitError::Cancelled);
            }
            objective.prepare_attempt(&x)?;
            // Costs of different attempts are compared under the current objective
            if let Some((best, _, _)) = best.as_mut() {
                best.cost = cost(objective.as_objective(), &best.x);
            }
        }
        attempts = attempt;
        let result = algorithm.curve_fit(objective.as_objective(), &x, &bounds);
        log::debug!(
            "attempt {attempt}: cost {} after {} evaluations, success {}",
            result.cost,
            result.evaluations,
            result.success
        );
        if !result.success {
            diagnostics.push(Diagnostic::OptimizerNotConverged { attempt });
        }
        let before = std::mem::replace(&mut x, result.x.clone());
        if best.as_ref().is_none_or(|(best, _, _)| result.cost < best.cost) {
            best = Some((result, attempt, before.clone()));
        }

        let Some(retry) = retry else {
            break;
        };
        let deviations = objective.deviations(&x);

        let stuck: Vec<usize> = free
            .iter()
            .enumerate()
            .filter(|(k, slot)| slot.kind == SlotKind::Parameter && retry.is_stuck(before[*k], x[*k]))
            .map(|(k, _)| k)
            .collect();
        if !stuck.is_empty() && attempt < max_attempts {
            for &k in stuck.iter() {
                x[k] = bounds[k].clamp(0.5 * x[k]);
            }
            let diagnostic = Diagnostic::StuckParameters {
                attempt,
                names: stuck.iter().map(|&k| free[k].name.clone()).collect(),
            };
            log::info!("{diagnostic}");
            diagnostics.push(diagnostic);
            previous = deviations;
            continue;
        }

        let change = deviations.mean_abs_err(&previous).unwrap_or(f64::INFINITY);
        if change < retry.threshold {
            break;
        }
        previous = deviations;
    }

    let (best, best_attempt, best_start) = best.ok_or(FitError::NoVariableParameters)?;
    if best_attempt < attempts {
        objective.prepare_attempt(&best_start)?;
    }
    // Failures of earlier attempts do not matter if the best result converged
    if best.success {
        diagnostics.retain(|d| !matches!(d, Diagnostic::OptimizerNotConverged { .. }));
    }
    Ok(Minimization {
        x: best.x,
        success: best.success,
        attempts,
        diagnostics,
    })
}
