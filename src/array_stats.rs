//! Simple array statistics used by the weight estimators

use ndarray::{Array1, ArrayView1, s};

/// Population standard deviation of residuals in a sliding window
///
/// For every output sample `i` the window is centered at `p = i + offset` with half width
/// `spread`, truncated to the array. A truncated window is scaled by `(2 spread + 1) / used`,
/// once for the truncated start and once more for the truncated end.
pub fn local_std(residuals: ArrayView1<f64>, offset: usize, n: usize, spread: usize) -> Array1<f64> {
    let len = residuals.len();
    let full = (2 * spread + 1) as f64;
    Array1::from_shape_fn(n, |i| {
        let p = i + offset;
        let lo = p.saturating_sub(spread);
        let hi = usize::min(len, p + spread + 1);
        let used = (hi - lo) as f64;
        let mut std = residuals.slice(s![lo..hi]).std(0.0);
        if p < spread {
            std *= full / used;
        }
        if p + spread + 1 > len {
            std *= full / used;
        }
        std
    })
}

/// Smallest positive finite value
pub fn min_positive(values: ArrayView1<f64>) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|x| x.is_finite() && *x > 0.0)
        .min_by(f64::total_cmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn constant_residuals() {
        let residuals = Array1::from_elem(20, 0.3);
        let std = local_std(residuals.view(), 0, 20, 3);
        assert!(std.iter().all(|&x| x.abs() < 1e-15));
    }

    #[test]
    fn truncated_windows_are_scaled() {
        let residuals = array![1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let std = local_std(residuals.view(), 0, 6, 1);
        // Window [0, 2) has std 1 and is scaled by 3 / 2
        assert_relative_eq!(std[0], 1.5);
        assert_relative_eq!(std[1], f64::sqrt(8.0 / 9.0));
        assert_relative_eq!(std[5], 1.5);
    }

    #[test]
    fn window_larger_than_data() {
        // Both ends are truncated, the correction is applied twice
        let residuals = array![1.0, -1.0];
        let std = local_std(residuals.view(), 0, 2, 2);
        assert_relative_eq!(std[0], 1.0 * 2.5 * 2.5);
    }

    #[test]
    fn offset_output() {
        let residuals = array![5.0, 1.0, -1.0, 1.0, -1.0, 5.0];
        let std = local_std(residuals.view(), 2, 2, 1);
        assert_eq!(std.len(), 2);
        assert_relative_eq!(std[0], f64::sqrt(8.0 / 9.0));
    }

    #[test]
    fn min_positive_skips_invalid() {
        let values = array![0.0, f64::NAN, 3.0, -1.0, 0.5, f64::INFINITY];
        assert_eq!(min_positive(values.view()), Some(0.5));
        assert_eq!(min_positive(array![0.0, f64::NAN].view()), None);
    }
}
