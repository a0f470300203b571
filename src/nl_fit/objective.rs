use crate::nl_fit::bounds::{Bound, to_external};

use finitediff::FiniteDiff;
use itertools::izip;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

/// Substitute for residuals which are not finite, large enough to reject the point
const INVALID_RESIDUAL: f64 = 1e50;

/// Least-squares objective over a vector of free variables
///
/// Optimizers minimize the sum of squared residuals.
pub trait Objective {
    fn nresiduals(&self) -> usize;

    fn residuals(&self, x: &[f64]) -> Array1<f64>;
}

fn finite_residuals(objective: &dyn Objective, x: &[f64]) -> Array1<f64> {
    let mut residuals = objective.residuals(x);
    residuals.mapv_inplace(|r| if r.is_finite() { r } else { INVALID_RESIDUAL });
    residuals
}

/// Sum of squared residuals, non-finite residuals count as huge
pub fn cost(objective: &dyn Objective, x: &[f64]) -> f64 {
    finite_residuals(objective, x).mapv(|r| r * r).sum()
}

/// Objective seen by an optimizer: unconstrained variables mapped into the bounds
#[derive(Clone, Copy)]
pub(crate) struct InternalObjective<'a> {
    pub objective: &'a dyn Objective,
    pub bounds: &'a [Bound],
}

impl InternalObjective<'_> {
    pub fn external(&self, u: &[f64]) -> Vec<f64> {
        to_external(u, self.bounds)
    }

    pub fn residuals(&self, u: &[f64]) -> Array1<f64> {
        finite_residuals(self.objective, &self.external(u))
    }

    pub fn cost(&self, u: &[f64]) -> f64 {
        cost(self.objective, &self.external(u))
    }

    /// Central-difference gradient of [InternalObjective::cost]
    pub fn gradient(&self, u: &[f64]) -> Vec<f64> {
        u.to_vec().central_diff(&|u: &Vec<f64>| self.cost(u))
    }

    /// Central-difference Jacobian of the residuals
    pub fn jacobian(&self, u: &[f64]) -> Array2<f64> {
        let columns = u
            .to_vec()
            .central_jacobian(&|u: &Vec<f64>| self.residuals(u).to_vec());
        from_columns(&columns, self.objective.nresiduals())
    }
}

/// `finitediff` returns one vector of residual derivatives per variable
fn from_columns(columns: &[Vec<f64>], nrows: usize) -> Array2<f64> {
    Array2::from_shape_fn((nrows, columns.len()), |(row, col)| columns[col][row])
}

/// Central-difference Jacobian in steps relative to `x`
///
/// The stencil is moved two steps inside `bounds` for variables sitting at a bound, so the
/// residuals are never evaluated outside.
pub fn numerical_jacobian(
    residuals: impl Fn(&[f64]) -> Array1<f64>,
    x: &[f64],
    bounds: &[Bound],
) -> Array2<f64> {
    let step = f64::EPSILON.sqrt();
    let scale: Vec<f64> = x
        .iter()
        .map(|&x| if x == 0.0 { 1.0 } else { x.abs() })
        .collect();
    let relative: Vec<f64> = izip!(x, &scale, bounds)
        .map(|(&x, &scale, bound)| {
            let h = step * scale;
            let centre = if bound.upper - bound.lower < 4.0 * h {
                x
            } else {
                x.max(bound.lower + 2.0 * h).min(bound.upper - 2.0 * h)
            };
            centre / scale
        })
        .collect();
    let columns = relative.central_jacobian(&|s: &Vec<f64>| {
        let point: Vec<f64> = s.iter().zip(&scale).map(|(s, scale)| s * scale).collect();
        residuals(&point).to_vec()
    });
    let nrows = columns.first().map_or(0, Vec::len);
    let mut jacobian = from_columns(&columns, nrows);
    for (mut column, &scale) in jacobian.columns_mut().into_iter().zip(&scale) {
        column /= scale;
    }
    jacobian
}

/// Covariance estimate `(J^T J)^-1 chi2` of least-squares parameters
pub fn covariance(jacobian: &Array2<f64>, chi2: f64) -> Result<Array2<f64>, String> {
    let (nrows, ncols) = jacobian.dim();
    if nrows < ncols {
        return Err("fewer residuals than variables".to_string());
    }
    let j = DMatrix::from_fn(nrows, ncols, |i, k| jacobian[[i, k]]);
    let jtj = j.tr_mul(&j);
    let inverse = jtj
        .cholesky()
        .map(|cholesky| cholesky.inverse())
        .ok_or_else(|| "Jacobian is rank deficient".to_string())?;
    let covariance = Array2::from_shape_fn((ncols, ncols), |(i, k)| inverse[(i, k)] * chi2);
    if covariance.iter().any(|c| !c.is_finite()) || covariance.diag().iter().any(|&c| c < 0.0) {
        return Err("covariance is not finite".to_string());
    }
    Ok(covariance)
}
