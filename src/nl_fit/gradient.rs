//! Plumbing shared by the gradient-based argmin minimizers

use crate::nl_fit::curve_fit::CurveFitResult;
use crate::nl_fit::objective::InternalObjective;

use argmin::core::observers::Observe;
use argmin::core::{
    CostFunction, Error, Gradient, KV, State, TerminationReason, TerminationStatus,
};
use std::sync::{Arc, Mutex};

/// Squared residuals and their finite-difference gradient in the optimizer space
pub(crate) struct GradientProblem<'a>(pub InternalObjective<'a>);

impl CostFunction for GradientProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.0.cost(u))
    }
}

impl Gradient for GradientProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, u: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(self.0.gradient(u))
    }
}

/// Best point seen during a run, kept when the run ends with an error
///
/// Line searches tend to fail once the gradient is lost in the finite-difference noise, at
/// that point the solver usually sits at the minimum already.
#[derive(Clone, Default)]
pub(crate) struct BestPoint(Arc<Mutex<Option<Vec<f64>>>>);

impl BestPoint {
    fn take(&self) -> Option<Vec<f64>> {
        self.0.lock().ok().and_then(|mut best| best.take())
    }
}

impl<I> Observe<I> for BestPoint
where
    I: State<Param = Vec<f64>>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        if let (Some(param), Ok(mut best)) = (state.get_best_param(), self.0.lock()) {
            *best = Some(param.clone());
        }
        Ok(())
    }
}

/// [CurveFitResult] of a finished run
///
/// A run counts as successful if the solver reports convergence or the cost gradient norm is
/// below `gradient_tolerance * max(1, cost)`.
pub(crate) fn curve_fit_result<I>(
    name: &str,
    internal: &InternalObjective,
    u0: &[f64],
    run: Result<I, Error>,
    best: &BestPoint,
    gradient_tolerance: f64,
) -> CurveFitResult
where
    I: State<Param = Vec<f64>, Float = f64>,
{
    let (u, converged, evaluations) = match run {
        Ok(state) => {
            log::debug!(
                "{name}: {:?} after {} iterations",
                state.get_termination_status(),
                state.get_iter()
            );
            let converged = matches!(
                state.get_termination_status(),
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
            );
            let evaluations = state
                .get_func_counts()
                .get("cost_count")
                .copied()
                .unwrap_or_default() as usize;
            let u = state.get_best_param().cloned().unwrap_or_else(|| u0.to_vec());
            (u, converged, evaluations)
        }
        Err(error) => {
            log::debug!("{name} stopped: {error}");
            (best.take().unwrap_or_else(|| u0.to_vec()), false, 0)
        }
    };
    let cost = internal.cost(&u);
    let gradient_norm = internal
        .gradient(&u)
        .iter()
        .map(|g| g * g)
        .sum::<f64>()
        .sqrt();
    CurveFitResult {
        x: internal.external(&u),
        cost,
        success: converged || gradient_norm <= gradient_tolerance * f64::max(1.0, cost),
        evaluations,
    }
}
