use crate::error::FitError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_SPLINE_KNOTS: usize = 5;

/// How the per-sample standard deviations of a fit are estimated
///
/// Decoded once from its string form (`"none"`, `"spline<N>"`, `"model function"` or the key of
/// externally supplied weights) when a correlation is configured.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum WeightKind {
    /// Unweighted fit
    #[default]
    None,
    /// Local scatter around a least-squares cubic spline with `knots` interior knots
    Spline { knots: usize },
    /// Local scatter around the current model curve
    ModelResidual,
    /// Weights supplied by the caller and stored on the correlation under `key`
    External { key: String },
}

impl WeightKind {
    /// Decode a built-in weight type, `None` for anything else
    pub fn parse_builtin(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "model function" => Some(Self::ModelResidual),
            _ => s.strip_prefix("spline").map(|knots| Self::Spline {
                knots: knots
                    .trim()
                    .parse()
                    .ok()
                    .filter(|&k| k > 0)
                    .unwrap_or(DEFAULT_SPLINE_KNOTS),
            }),
        }
    }

    /// Decode a weight type, `is_external` tells whether a key of external weights exists
    pub fn parse(s: &str, is_external: impl Fn(&str) -> bool) -> Result<Self, FitError> {
        if let Some(kind) = Self::parse_builtin(s) {
            return Ok(kind);
        }
        if is_external(s) {
            return Ok(Self::External { key: s.to_string() });
        }
        Err(FitError::UnknownWeightType(s.to_string()))
    }

    pub fn is_weighted(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for WeightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Spline { knots } => write!(f, "spline{knots}"),
            Self::ModelResidual => write!(f, "model function"),
            Self::External { key } => write!(f, "{key}"),
        }
    }
}
