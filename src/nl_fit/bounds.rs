use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Closed interval a fit parameter is allowed to take
///
/// Infinite ends mean the parameter is unbounded from that side. Raw `(lo, hi)` pairs used by
/// models and persisted configurations treat `lo == hi` as "no bound", use
/// [Bound::from_raw_pair] to convert them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const UNBOUNDED: Self = Self {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    pub fn new(lower: f64, upper: f64) -> Self {
        let lower = if lower.is_nan() {
            f64::NEG_INFINITY
        } else {
            lower
        };
        let upper = if upper.is_nan() { f64::INFINITY } else { upper };
        if lower <= upper {
            Self { lower, upper }
        } else {
            Self {
                lower: upper,
                upper: lower,
            }
        }
    }

    /// `None` for the `lo == hi` sentinel, NaN ends become infinite
    pub fn from_raw_pair((lo, hi): (f64, f64)) -> Option<Self> {
        if lo == hi {
            return None;
        }
        Some(Self::new(lo, hi))
    }

    pub fn lower_only(lower: f64) -> Self {
        Self::new(lower, f64::INFINITY)
    }

    pub fn upper_only(upper: f64) -> Self {
        Self::new(f64::NEG_INFINITY, upper)
    }

    /// Both ends coincide, nothing is left to fit
    pub fn is_point(&self) -> bool {
        self.lower == self.upper
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }

    pub fn clamp(&self, x: f64) -> f64 {
        if x.is_nan() {
            return x;
        }
        x.max(self.lower).min(self.upper)
    }

    /// Intersection of two bounds, `None` if it is empty
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        (lower <= upper).then_some(Self { lower, upper })
    }

    /// Optimizer-space value for an external value, see [Bound::to_external]
    pub fn to_internal(&self, x: f64) -> f64 {
        let x = self.clamp(x);
        match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => {
                let width = self.upper - self.lower;
                if width == 0.0 {
                    0.0
                } else {
                    f64::asin((2.0 * (x - self.lower) / width - 1.0).clamp(-1.0, 1.0))
                }
            }
            (true, false) => f64::sqrt((x - self.lower + 1.0).powi(2) - 1.0),
            (false, true) => f64::sqrt((self.upper - x + 1.0).powi(2) - 1.0),
            (false, false) => x,
        }
    }

    /// External value for an optimizer-space value
    ///
    /// Two-sided bounds use `lo + (sin(u) + 1) (hi - lo) / 2`, one-sided bounds use
    /// `lo - 1 + sqrt(u^2 + 1)` or `hi + 1 - sqrt(u^2 + 1)`, so any real `u` maps inside.
    pub fn to_external(&self, u: f64) -> f64 {
        let x = match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => self.lower + (f64::sin(u) + 1.0) * (self.upper - self.lower) / 2.0,
            (true, false) => self.lower - 1.0 + f64::sqrt(u * u + 1.0),
            (false, true) => self.upper + 1.0 - f64::sqrt(u * u + 1.0),
            (false, false) => u,
        };
        // Rounding may push the result a hair outside
        self.clamp(x)
    }
}

impl Default for Bound {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[cfg(test)]
pub(crate) fn within_bounds(x: &[f64], bounds: &[Bound]) -> bool {
    x.iter().zip(bounds).all(|(&x, b)| b.contains(x))
}

pub(crate) fn to_internal(x: &[f64], bounds: &[Bound]) -> Vec<f64> {
    x.iter().zip(bounds).map(|(&x, b)| b.to_internal(x)).collect()
}

pub(crate) fn to_external(u: &[f64], bounds: &[Bound]) -> Vec<f64> {
    u.iter().zip(bounds).map(|(&u, b)| b.to_external(u)).collect()
}
