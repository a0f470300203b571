#![doc = include_str!("../README.md")]

#[cfg(test)]
#[macro_use]
mod tests;

mod array_stats;

mod data;
pub use data::{Correlation, FitConfig, FitInterval, Trace};

mod error;
pub use error::FitError;

pub mod model;
pub use model::{
    Constraint, ConstraintOp, ConstraintSlot, Model, ModelBuilder, ModelRegistry, ParameterDef,
    Sign,
};

pub mod nl_fit;
pub use nl_fit::{
    AlgorithmRegistry, BfgsCurveFit, Bound, ConjugateGradientCurveFit, CurveFitAlgorithm,
    CurveFitTrait, Diagnostic, FitOptions, FitResults, Fitter, LbfgsCurveFit, LmCurveFit,
    NelderMeadCurveFit, StuckParameterRetry,
};

pub mod weights;
pub use weights::{WeightKind, compute_weights};

pub use ndarray;
