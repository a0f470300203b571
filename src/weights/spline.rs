use crate::error::FitError;

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1};

const DEGREE: usize = 3;

/// Least-squares cubic B-spline in `log10` of the abscissa
///
/// Interior knots are spread evenly between the first and the last sample, end knots are
/// clamped. Coefficients are the solution of the normal equations.
#[derive(Clone, Debug)]
pub struct LsqCubicSpline {
    knots: Vec<f64>,
    coefficients: Vec<f64>,
}

impl LsqCubicSpline {
    /// Fit `y(x)` with `ninterior` interior knots, `x` must be positive and increasing
    pub fn fit(x: ArrayView1<f64>, y: ArrayView1<f64>, ninterior: usize) -> Result<Self, FitError> {
        let error = |reason: &str| FitError::SplineNotConverged {
            knots: ninterior,
            reason: reason.to_string(),
        };

        if x.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
            return Err(error("lag times must be positive"));
        }
        let u = x.mapv(f64::log10);
        let nbasis = ninterior + DEGREE + 1;
        if u.len() < nbasis {
            return Err(error("fewer samples than basis functions"));
        }
        let (first, last) = (u[0], u[u.len() - 1]);
        if !(last > first) || u.iter().tuple_windows().any(|(a, b)| b < a) {
            return Err(error("lag times must increase"));
        }

        let interior = Array1::linspace(first, last, ninterior + 2);
        let knots: Vec<f64> = std::iter::repeat_n(first, DEGREE + 1)
            .chain(interior.iter().copied().skip(1).take(ninterior))
            .chain(std::iter::repeat_n(last, DEGREE + 1))
            .collect();

        let mut design = DMatrix::zeros(u.len(), nbasis);
        for (row, &u) in u.iter().enumerate() {
            let span = find_span(&knots, nbasis, u);
            for (k, value) in basis_functions(&knots, span, u).into_iter().enumerate() {
                design[(row, span - DEGREE + k)] = value;
            }
        }
        let rhs = DVector::from_iterator(y.len(), y.iter().copied());
        let normal = design.tr_mul(&design);
        let cholesky = normal
            .cholesky()
            .ok_or_else(|| error("normal equations are singular"))?;
        let coefficients = cholesky.solve(&design.tr_mul(&rhs));
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(error("non-finite coefficients"));
        }

        Ok(Self {
            knots,
            coefficients: coefficients.iter().copied().collect(),
        })
    }

    pub fn value(&self, x: f64) -> f64 {
        let u = x.log10();
        let span = find_span(&self.knots, self.coefficients.len(), u);
        basis_functions(&self.knots, span, u)
            .into_iter()
            .enumerate()
            .map(|(k, b)| b * self.coefficients[span - DEGREE + k])
            .sum()
    }

    pub fn evaluate(&self, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|x| self.value(x))
    }
}

/// Knot span index `i` with `knots[i] <= u < knots[i + 1]`, clamped to valid spans
fn find_span(knots: &[f64], nbasis: usize, u: f64) -> usize {
    if u >= knots[nbasis] {
        return nbasis - 1;
    }
    if u <= knots[DEGREE] {
        return DEGREE;
    }
    // First knot after u, minus one
    knots[DEGREE..=nbasis].partition_point(|&k| k <= u) + DEGREE - 1
}

/// Cox-de Boor recursion for the non-vanishing basis functions of a span
fn basis_functions(knots: &[f64], span: usize, u: f64) -> [f64; DEGREE + 1] {
    let mut values = [0.0; DEGREE + 1];
    let mut left = [0.0; DEGREE + 1];
    let mut right = [0.0; DEGREE + 1];
    values[0] = 1.0;
    for j in 1..=DEGREE {
        left[j] = u - knots[span + 1 - j];
        right[j] = knots[span + j] - u;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = values[r] / (right[r + 1] + left[j - r]);
            values[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        values[j] = saved;
    }
    values
}
