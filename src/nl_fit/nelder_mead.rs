use crate::nl_fit::bounds::{Bound, to_internal};
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::objective::{InternalObjective, Objective};

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Nelder-Mead simplex minimizer of the squared residuals
///
/// Derivative-free, it does not produce a Jacobian, so fits using it report no parameter
/// errors. Bounds are enforced by the same change of variables as [LmCurveFit](crate::LmCurveFit).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename = "NelderMead")]
pub struct NelderMeadCurveFit {
    pub niterations: u64,
    /// Relative size of the initial simplex
    pub initial_step: f64,
    /// Standard deviation of the simplex costs to stop at
    pub sd_tolerance: f64,
}

impl NelderMeadCurveFit {
    /// Create a new [NelderMeadCurveFit].
    ///
    /// # Arguments
    /// - `niterations`: maximum number of simplex iterations
    /// - `initial_step`: vertices of the initial simplex are displaced by this fraction of the
    ///   starting value, or by its square when the starting value is zero
    /// - `sd_tolerance`: convergence threshold of the cost spread over the simplex
    pub fn new(niterations: u64, initial_step: f64, sd_tolerance: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(initial_step > 0.0, "initial_step must be positive");
        assert!(sd_tolerance >= 0.0, "sd_tolerance must be non-negative");
        Self {
            niterations,
            initial_step,
            sd_tolerance,
        }
    }

    #[inline]
    pub fn default_niterations() -> u64 {
        10_000
    }

    #[inline]
    pub fn default_initial_step() -> f64 {
        0.05
    }

    #[inline]
    pub fn default_sd_tolerance() -> f64 {
        1e-20
    }

    fn simplex(&self, u0: &[f64]) -> Vec<Vec<f64>> {
        std::iter::once(u0.to_vec())
            .chain((0..u0.len()).map(|i| {
                let mut vertex = u0.to_vec();
                vertex[i] = if u0[i] == 0.0 {
                    self.initial_step.powi(2)
                } else {
                    u0[i] * (1.0 + self.initial_step)
                };
                vertex
            }))
            .collect()
    }
}

impl Default for NelderMeadCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_initial_step(),
            Self::default_sd_tolerance(),
        )
    }
}

struct Cost<'a>(InternalObjective<'a>);

impl CostFunction for Cost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.0.cost(u))
    }
}

impl CurveFitTrait for NelderMeadCurveFit {
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
        let internal = InternalObjective { objective, bounds };
        let u0 = to_internal(x0, bounds);
        let failed = |u: &[f64]| CurveFitResult {
            x: internal.external(u),
            cost: internal.cost(u),
            success: false,
            evaluations: 0,
        };

        let solver = match NelderMead::new(self.simplex(&u0)).with_sd_tolerance(self.sd_tolerance) {
            Ok(solver) => solver,
            Err(error) => {
                log::warn!("Nelder-Mead setup failed: {error}");
                return failed(&u0);
            }
        };
        let result = Executor::new(Cost(InternalObjective { objective, bounds }), solver)
            .configure(|state| state.max_iters(self.niterations))
            .run();
        let state = match result {
            Ok(result) => result.state().clone(),
            Err(error) => {
                log::warn!("Nelder-Mead failed: {error}");
                return failed(&u0);
            }
        };

        let u = state.get_best_param().cloned().unwrap_or(u0);
        let success = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        log::debug!(
            "Nelder-Mead: {:?} after {} iterations",
            state.get_termination_status(),
            state.get_iter()
        );
        CurveFitResult {
            x: internal.external(&u),
            cost: state.get_best_cost(),
            success,
            evaluations: state
                .get_func_counts()
                .get("cost_count")
                .copied()
                .unwrap_or_default() as usize,
        }
    }
}
