use crate::nl_fit::bounds::{Bound, to_internal};
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::gradient::{BestPoint, GradientProblem, curve_fit_result};
use crate::nl_fit::objective::{InternalObjective, Objective};

use argmin::core::Executor;
use argmin::core::observers::ObserverMode;
use argmin::solver::conjugategradient::NonlinearConjugateGradient;
use argmin::solver::conjugategradient::beta::PolakRibiere;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Nonlinear conjugate-gradient minimizer with the Polak-Ribière update
///
/// Gradients are central finite differences in the unbounded optimizer space. The search
/// direction is reset to the steepest descent every `restart_iterations` iterations.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename = "ConjugateGradient")]
pub struct ConjugateGradientCurveFit {
    pub niterations: u64,
    pub restart_iterations: u64,
    /// Cost gradient norm, relative to the cost if it exceeds one, at which a run counts as
    /// converged
    pub gradient_tolerance: f64,
}

impl ConjugateGradientCurveFit {
    pub fn new(niterations: u64, restart_iterations: u64, gradient_tolerance: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(restart_iterations > 0, "restart_iterations must be positive");
        Self {
            niterations,
            restart_iterations,
            gradient_tolerance,
        }
    }

    #[inline]
    pub fn default_niterations() -> u64 {
        1000
    }

    #[inline]
    pub fn default_restart_iterations() -> u64 {
        10
    }

    #[inline]
    pub fn default_gradient_tolerance() -> f64 {
        1e-6
    }
}

impl Default for ConjugateGradientCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_restart_iterations(),
            Self::default_gradient_tolerance(),
        )
    }
}

impl CurveFitTrait for ConjugateGradientCurveFit {
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
        let internal = InternalObjective { objective, bounds };
        let u0 = to_internal(x0, bounds);
        let best = BestPoint::default();
        let run = MoreThuenteLineSearch::<Vec<f64>, Vec<f64>, f64>::new()
            .with_c(1e-4, 0.1)
            .and_then(|linesearch| {
                let solver = NonlinearConjugateGradient::new(linesearch, PolakRibiere::new())
                    .restart_iters(self.restart_iterations)
                    .restart_orthogonality(0.1);
                Executor::new(GradientProblem(internal), solver)
                    .configure(|state| state.param(u0.clone()).max_iters(self.niterations))
                    .add_observer(best.clone(), ObserverMode::Always)
                    .run()
            })
            .map(|result| result.state().clone());
        curve_fit_result(
            "Polak-Ribiere",
            &internal,
            &u0,
            run,
            &best,
            self.gradient_tolerance,
        )
    }
}
