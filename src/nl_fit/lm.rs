use crate::nl_fit::bounds::{Bound, to_internal};
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::objective::{InternalObjective, Objective};

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, Owned};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Levenberg-Marquardt non-linear least-squares wrapper
///
/// Bounds are enforced by a change of variables, the Jacobian is computed numerically. The
/// solution is a least-squares minimum, so it is suitable for error estimation.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename = "LevenbergMarquardt")]
pub struct LmCurveFit {
    /// Evaluation budget in units of `nvariables + 1`
    pub patience: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl LmCurveFit {
    /// Create a new [LmCurveFit].
    ///
    /// # Arguments
    /// - `patience`: the optimizer gives up after `patience * (nvariables + 1)` evaluations
    /// - `ftol`, `xtol`, `gtol`: relative tolerances of the residual norm, of the variables and
    ///   of the orthogonality between residuals and Jacobian columns
    pub fn new(patience: usize, ftol: f64, xtol: f64, gtol: f64) -> Self {
        assert!(patience > 0, "patience must be positive");
        for tol in [ftol, xtol, gtol] {
            assert!(tol >= 0.0, "tolerances must be non-negative");
        }
        Self {
            patience,
            ftol,
            xtol,
            gtol,
        }
    }

    #[inline]
    pub fn default_patience() -> usize {
        200
    }

    #[inline]
    pub fn default_ftol() -> f64 {
        1.49012e-8
    }

    #[inline]
    pub fn default_xtol() -> f64 {
        1.49012e-8
    }

    #[inline]
    pub fn default_gtol() -> f64 {
        0.0
    }
}

impl Default for LmCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_patience(),
            Self::default_ftol(),
            Self::default_xtol(),
            Self::default_gtol(),
        )
    }
}

struct Problem<'a> {
    objective: InternalObjective<'a>,
    u: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for Problem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
    }

    fn params(&self) -> DVector<f64> {
        self.u.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let residuals = self.objective.residuals(self.u.as_slice());
        Some(DVector::from_iterator(residuals.len(), residuals))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jacobian = self.objective.jacobian(self.u.as_slice());
        let (nrows, ncols) = jacobian.dim();
        Some(DMatrix::from_fn(nrows, ncols, |i, j| jacobian[[i, j]]))
    }
}

impl CurveFitTrait for LmCurveFit {
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
        let objective = InternalObjective { objective, bounds };
        let problem = Problem {
            u: DVector::from_vec(to_internal(x0, bounds)),
            objective,
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(self.patience)
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .minimize(problem);
        log::debug!(
            "Levenberg-Marquardt: {:?} after {} evaluations",
            report.termination,
            report.number_of_evaluations
        );
        let u = problem.u.as_slice();
        CurveFitResult {
            x: problem.objective.external(u),
            cost: problem.objective.cost(u),
            success: report.termination.was_successful(),
            evaluations: report.number_of_evaluations,
        }
    }

    fn provides_covariance(&self) -> bool {
        true
    }
}
