use crate::error::FitError;
use crate::nl_fit::bounds::Bound;
use crate::nl_fit::conjugate_gradient::ConjugateGradientCurveFit;
use crate::nl_fit::lm::LmCurveFit;
use crate::nl_fit::nelder_mead::NelderMeadCurveFit;
use crate::nl_fit::objective::Objective;
use crate::nl_fit::quasi_newton::{BfgsCurveFit, LbfgsCurveFit};

use enum_dispatch::enum_dispatch;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Optimizer outcome, `x` is within the bounds given to the optimizer
#[derive(Clone, Debug, PartialEq)]
pub struct CurveFitResult {
    pub x: Vec<f64>,
    /// Sum of squared residuals at `x`
    pub cost: f64,
    pub success: bool,
    pub evaluations: usize,
}

/// Bounded non-linear least-squares minimizer
#[enum_dispatch]
pub trait CurveFitTrait {
    /// Minimize the squared residuals of `objective` starting from `x0`
    fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult;

    /// Whether a successful result is a least-squares solution suitable for error estimation
    fn provides_covariance(&self) -> bool {
        false
    }
}

#[enum_dispatch(CurveFitTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[non_exhaustive]
pub enum CurveFitAlgorithm {
    Lm(LmCurveFit),
    NelderMead(NelderMeadCurveFit),
    Bfgs(BfgsCurveFit),
    Lbfgs(LbfgsCurveFit),
    ConjugateGradient(ConjugateGradientCurveFit),
}

/// Named optimizers available to a [Fitter](crate::Fitter)
///
/// The registry is immutable once handed to a fitter. [AlgorithmRegistry::default] has
/// `"Lev-Mar"`, `"Nelder-Mead"`, `"BFGS"`, `"L-BFGS"` and `"Polak-Ribiere"`.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    algorithms: BTreeMap<String, Arc<dyn CurveFitTrait + Send + Sync>>,
}

impl AlgorithmRegistry {
    pub const LEVENBERG_MARQUARDT: &'static str = "Lev-Mar";
    pub const NELDER_MEAD: &'static str = "Nelder-Mead";
    pub const BFGS: &'static str = "BFGS";
    pub const LBFGS: &'static str = "L-BFGS";
    pub const POLAK_RIBIERE: &'static str = "Polak-Ribiere";

    /// Registry without any algorithm
    pub fn empty() -> Self {
        Self {
            algorithms: BTreeMap::new(),
        }
    }

    /// Add or replace an algorithm
    pub fn with(
        mut self,
        key: impl Into<String>,
        algorithm: impl CurveFitTrait + Send + Sync + 'static,
    ) -> Self {
        self.algorithms.insert(key.into(), Arc::new(algorithm));
        self
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn CurveFitTrait + Send + Sync>, FitError> {
        self.algorithms
            .get(key)
            .cloned()
            .ok_or_else(|| FitError::UnknownAlgorithm(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.algorithms.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.algorithms.keys().map(String::as_str)
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::empty()
            .with(
                Self::LEVENBERG_MARQUARDT,
                CurveFitAlgorithm::from(LmCurveFit::default()),
            )
            .with(
                Self::NELDER_MEAD,
                CurveFitAlgorithm::from(NelderMeadCurveFit::default()),
            )
            .with(Self::BFGS, CurveFitAlgorithm::from(BfgsCurveFit::default()))
            .with(
                Self::LBFGS,
                CurveFitAlgorithm::from(LbfgsCurveFit::default()),
            )
            .with(
                Self::POLAK_RIBIERE,
                CurveFitAlgorithm::from(ConjugateGradientCurveFit::default()),
            )
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use itertools::Itertools;

    #[test]
    fn default_keys() {
        let registry = AlgorithmRegistry::default();
        assert_eq!(
            registry.keys().collect_vec(),
            ["BFGS", "L-BFGS", "Lev-Mar", "Nelder-Mead", "Polak-Ribiere"]
        );
        assert!(registry.get("Lev-Mar").unwrap().provides_covariance());
        for key in ["Nelder-Mead", "BFGS", "L-BFGS", "Polak-Ribiere"] {
            assert!(!registry.get(key).unwrap().provides_covariance(), "{key}");
        }
        for key in ["Powell", "SLSQP"] {
            assert!(matches!(
                registry.get(key),
                Err(FitError::UnknownAlgorithm(unknown)) if unknown == key
            ));
        }
    }

    #[test]
    fn algorithm_serialization() {
        let algorithms: [CurveFitAlgorithm; 3] = [
            LmCurveFit::default().into(),
            BfgsCurveFit::default().into(),
            ConjugateGradientCurveFit::default().into(),
        ];
        for algorithm in algorithms {
            let json = serde_json::to_string(&algorithm).unwrap();
            let restored: CurveFitAlgorithm = serde_json::from_str(&json).unwrap();
            assert_eq!(format!("{restored:?}"), format!("{algorithm:?}"));
        }
    }
}
