use crate::nl_fit::bounds::{Bound, to_internal};
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::gradient::{BestPoint, GradientProblem, curve_fit_result};
use crate::nl_fit::objective::{InternalObjective, Objective};

use argmin::core::Executor;
use argmin::core::observers::ObserverMode;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::{BFGS, LBFGS};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

type LineSearch = MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64>;

/// BFGS quasi-Newton minimizer of the squared residuals
///
/// Gradients are central finite differences in the unbounded optimizer space, bounds are
/// enforced by the same change of variables as [LmCurveFit](crate::LmCurveFit). The inverse
/// Hessian starts from the identity.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename = "Bfgs")]
pub struct BfgsCurveFit {
    pub niterations: u64,
    /// Cost gradient norm, relative to the cost if it exceeds one, to stop at
    pub gradient_tolerance: f64,
    /// Cost change between iterations to stop at
    pub cost_tolerance: f64,
}

impl BfgsCurveFit {
    pub fn new(niterations: u64, gradient_tolerance: f64, cost_tolerance: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        Self {
            niterations,
            gradient_tolerance,
            cost_tolerance,
        }
    }

    #[inline]
    pub fn default_niterations() -> u64 {
        1000
    }

    #[inline]
    pub fn default_gradient_tolerance() -> f64 {
        1e-6
    }

    #[inline]
    pub fn default_cost_tolerance() -> f64 {
        1e-12
    }
}

impl Default for BfgsCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_gradient_tolerance(),
            Self::default_cost_tolerance(),
        )
    }
}

impl CurveFitTrait for BfgsCurveFit {
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
        let internal = InternalObjective { objective, bounds };
        let u0 = to_internal(x0, bounds);
        let identity: Vec<Vec<f64>> = (0..u0.len())
            .map(|i| (0..u0.len()).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        let best = BestPoint::default();
        let linesearch: LineSearch = MoreThuenteLineSearch::new();
        let run = BFGS::new(linesearch)
            .with_tolerance_grad(self.gradient_tolerance)
            .and_then(|solver| solver.with_tolerance_cost(self.cost_tolerance))
            .and_then(|solver| {
                Executor::new(GradientProblem(internal), solver)
                    .configure(|state| {
                        state
                            .param(u0.clone())
                            .inv_hessian(identity)
                            .max_iters(self.niterations)
                    })
                    .add_observer(best.clone(), ObserverMode::Always)
                    .run()
            })
            .map(|result| result.state().clone());
        curve_fit_result("BFGS", &internal, &u0, run, &best, self.gradient_tolerance)
    }
}

/// Limited-memory BFGS minimizer of the squared residuals
///
/// Same as [BfgsCurveFit] but keeps only the last `memory` steps instead of a dense inverse
/// Hessian.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename = "Lbfgs")]
pub struct LbfgsCurveFit {
    pub niterations: u64,
    pub memory: usize,
    /// Cost gradient norm, relative to the cost if it exceeds one, to stop at
    pub gradient_tolerance: f64,
    /// Cost change between iterations to stop at
    pub cost_tolerance: f64,
}

impl LbfgsCurveFit {
    pub fn new(niterations: u64, memory: usize, gradient_tolerance: f64, cost_tolerance: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(memory > 0, "memory must be positive");
        Self {
            niterations,
            memory,
            gradient_tolerance,
            cost_tolerance,
        }
    }

    #[inline]
    pub fn default_niterations() -> u64 {
        1000
    }

    #[inline]
    pub fn default_memory() -> usize {
        7
    }

    #[inline]
    pub fn default_gradient_tolerance() -> f64 {
        1e-6
    }

    #[inline]
    pub fn default_cost_tolerance() -> f64 {
        1e-12
    }
}

impl Default for LbfgsCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_memory(),
            Self::default_gradient_tolerance(),
            Self::default_cost_tolerance(),
        )
    }
}

impl CurveFitTrait for LbfgsCurveFit {
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
        let internal = InternalObjective { objective, bounds };
        let u0 = to_internal(x0, bounds);
        let best = BestPoint::default();
        let linesearch: LineSearch = MoreThuenteLineSearch::new();
        let run = LBFGS::new(linesearch, self.memory)
            .with_tolerance_grad(self.gradient_tolerance)
            .and_then(|solver| solver.with_tolerance_cost(self.cost_tolerance))
            .and_then(|solver| {
                Executor::new(GradientProblem(internal), solver)
                    .configure(|state| state.param(u0.clone()).max_iters(self.niterations))
                    .add_observer(best.clone(), ObserverMode::Always)
                    .run()
            })
            .map(|result| result.state().clone());
        curve_fit_result("L-BFGS", &internal, &u0, run, &best, self.gradient_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn nresiduals(&self) -> usize {
            2
        }

        fn residuals(&self, x: &[f64]) -> Array1<f64> {
            array![10.0 * (x[1] - x[0].powi(2)), 1.0 - x[0]]
        }
    }

    fn algorithms() -> [(&'static str, Box<dyn CurveFitTrait>); 2] {
        [
            ("BFGS", Box::new(BfgsCurveFit::default())),
            ("L-BFGS", Box::new(LbfgsCurveFit::default())),
        ]
    }

    #[test]
    fn rosenbrock() {
        for (name, algorithm) in algorithms() {
            let result = algorithm.curve_fit(&Rosenbrock, &[-1.2, 1.0], &[Bound::UNBOUNDED; 2]);
            assert!(result.success, "{name}");
            assert!(result.cost < 1e-8, "{name}: {}", result.cost);
            assert_abs_diff_eq!(&result.x[..], &[1.0, 1.0][..], epsilon = 1e-3);
        }
    }

    #[test]
    fn bounded_minimum() {
        let bounds = [Bound::new(-2.0, 0.5), Bound::UNBOUNDED];
        for (name, algorithm) in algorithms() {
            let result = algorithm.curve_fit(&Rosenbrock, &[-1.2, 1.0], &bounds);
            assert!(result.x[0] <= 0.5, "{name}");
            assert_abs_diff_eq!(result.x[0], 0.5, epsilon = 1e-3);
            assert_abs_diff_eq!(result.x[1], 0.25, epsilon = 1e-3);
        }
    }

    #[test]
    fn serialization() {
        let algorithm = LbfgsCurveFit::default();
        let json = serde_json::to_string(&algorithm).unwrap();
        let restored: LbfgsCurveFit = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.memory, LbfgsCurveFit::default_memory());
    }
}
