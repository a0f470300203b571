//! Bounded non-linear least-squares fitting of correlation curves
//!
//! # Parameter Spaces
//!
//! Fitting uses three distinct parameter spaces:
//!
//! ## 1. Model Parameters
//!
//! The parameters of a [Model](crate::Model) as stored on a [Correlation](crate::Correlation)
//! and reported to users, e.g. particle number and diffusion time. Bounds are given in this
//! space, see [Correlation::effective_bound](crate::Correlation::effective_bound).
//!
//! ## 2. Free Variables
//!
//! The vector the optimizer varies, built by [ParameterLayout](layout::ParameterLayout). Fixed
//! parameters are left out, a variable parameter tied to another one by a constraint is
//! replaced by a non-negative slack variable:
//!
//! ```text
//! dependent = scale * driver + offset ± slack,  slack >= 0
//! ```
//!
//! In a global fit, variable parameters of the same name share one free variable.
//!
//! ## 3. Internal Variables
//!
//! The unconstrained variables the optimizer works with. Every bounded free variable is
//! mapped by a smooth change of variables, see [Bound]:
//!
//! ```text
//! both bounds:  x = lo + (sin(u) + 1) (hi - lo) / 2
//! lower only:   x = lo - 1 + sqrt(u^2 + 1)
//! upper only:   x = hi + 1 - sqrt(u^2 + 1)
//! ```
//!
//! ## Full Transformation Chain
//!
//! ```text
//! Model parameters ←→ Free variables ←→ Internal variables
//!        ↑                  ↑                  ↑
//!   stored, bounds   covariance, retry     optimizer
//!                                          works here
//! ```
//!
//! # Curve Fit Algorithms
//!
//! - [LmCurveFit]: Levenberg-Marquardt, numerical Jacobian. Provides parameter errors.
//! - [NelderMeadCurveFit]: Nelder-Mead simplex. Does not provide parameter errors.
//! - [BfgsCurveFit], [LbfgsCurveFit]: quasi-Newton with finite-difference gradients.
//! - [ConjugateGradientCurveFit]: Polak-Ribière nonlinear conjugate gradient.
//!
//! Only Levenberg-Marquardt provides parameter errors.
//!
//! Further algorithms implementing [CurveFitTrait] can be registered in an
//! [AlgorithmRegistry] and selected by key on every correlation.

pub(crate) mod bounds;
pub use bounds::Bound;

pub mod conjugate_gradient;
pub use conjugate_gradient::ConjugateGradientCurveFit;

pub mod curve_fit;
pub use curve_fit::{AlgorithmRegistry, CurveFitAlgorithm, CurveFitResult, CurveFitTrait};

mod fitter;
pub use fitter::{FitOptions, Fitter};

pub(crate) mod gradient;

pub mod layout;

pub mod lm;
pub use lm::LmCurveFit;

pub mod nelder_mead;
pub use nelder_mead::NelderMeadCurveFit;

pub mod objective;
pub use objective::Objective;

pub mod quasi_newton;
pub use quasi_newton::{BfgsCurveFit, LbfgsCurveFit};

pub(crate) mod results;
pub use results::{Diagnostic, FitResults};

pub mod retry;
pub use retry::StuckParameterRetry;
