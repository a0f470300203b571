use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recoverable condition met while preparing or running a fit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[non_exhaustive]
pub enum Diagnostic {
    /// Signal and background countrates of a channel are too close, correction is disabled
    BackgroundDegenerate {
        channel: usize,
        signal: f64,
        background: f64,
    },
    /// Parameters did not move during a minimization and were halved for the next attempt
    StuckParameters { attempt: usize, names: Vec<String> },
    /// The optimizer reported failure, the best parameters found are kept
    OptimizerNotConverged { attempt: usize },
    /// Parameter error estimates could not be computed
    CovarianceUnavailable { reason: String },
    /// Zero or non-finite weights were replaced
    WeightsReplaced { count: usize, replacement: f64 },
    /// A constraint would have redefined an already derived parameter
    ConstraintSkipped { constraint: String },
    /// A constraint with one fixed side left no room for the variable side
    EmptyConstraintBound { constraint: String, value: f64 },
    /// Global fits do not support constraints
    ConstraintsIgnored { count: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackgroundDegenerate {
                channel,
                signal,
                background,
            } => write!(
                f,
                "background correction disabled: channel {channel} signal {signal} is too close to background {background}"
            ),
            Self::StuckParameters { attempt, names } => write!(
                f,
                "attempt {attempt}: parameters {} did not change and were halved",
                names.join(", ")
            ),
            Self::OptimizerNotConverged { attempt } => {
                write!(f, "attempt {attempt}: optimizer did not report convergence")
            }
            Self::CovarianceUnavailable { reason } => {
                write!(f, "parameter errors are unavailable: {reason}")
            }
            Self::WeightsReplaced { count, replacement } => {
                write!(f, "{count} invalid weights were replaced by {replacement}")
            }
            Self::ConstraintSkipped { constraint } => {
                write!(f, "constraint {constraint} was skipped")
            }
            Self::EmptyConstraintBound { constraint, value } => write!(
                f,
                "constraint {constraint} leaves no room, parameter is pinned at {value}"
            ),
            Self::ConstraintsIgnored { count } => {
                write!(f, "{count} constraints are ignored by the global fit")
            }
        }
    }
}

/// Outcome of a fit stored on each fitted [Correlation](crate::Correlation)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitResults {
    /// Reduced chi-square
    pub chi2: f64,
    /// Degrees of freedom used for `chi2`
    pub dof: usize,
    /// One-sigma errors of free parameters, `None` entries for fixed and derived ones
    pub parameter_errors: Option<Vec<Option<f64>>>,
    pub weighted: bool,
    pub weight_type: String,
    /// Standard deviations the residuals were divided by
    #[schemars(with = "Vec<f64>")]
    pub weights: Array1<f64>,
    pub algorithm: String,
    pub attempts: usize,
    pub success: bool,
    pub global: bool,
    pub diagnostics: Vec<Diagnostic>,
}
