//! Correlation models: closed-form curves with their parameter metadata
//!
//! A [Model] is immutable and shared between correlations through [std::sync::Arc]. Models are
//! looked up by their stable integer id in a [ModelRegistry]; [ModelRegistry::builtin] holds the
//! diffusion models shipped with the crate.

pub mod builtin;

mod constraint;
pub use constraint::{Constraint, ConstraintOp, ConstraintSlot, Sign};

mod registry;
pub use registry::ModelRegistry;

use crate::error::FitError;
use crate::nl_fit::bounds::Bound;

use ndarray::{Array1, ArrayView1};
use std::fmt;

/// Model value at a single lag time
pub type ModelFunction = fn(&[f64], f64) -> f64;

/// Clamps parameters into the physically valid region in place
pub type VerificationFunction = fn(&mut [f64]);

/// Display-only values derived from parameters and an optional countrate
pub type SupplementaryFunction = fn(&[f64], Option<f64>) -> Vec<(String, f64)>;

pub struct Model {
    id: u32,
    name: String,
    description: String,
    parameter_names: Vec<String>,
    default_values: Vec<f64>,
    default_variable: Vec<bool>,
    boundaries: Vec<(f64, f64)>,
    constraints: Vec<Constraint>,
    function: ModelFunction,
    verification: Option<VerificationFunction>,
    supplementary: Option<SupplementaryFunction>,
}

impl Model {
    pub fn builder(id: u32, name: impl Into<String>, function: ModelFunction) -> ModelBuilder {
        ModelBuilder {
            id,
            name: name.into(),
            description: String::new(),
            parameters: vec![],
            constraints: vec![],
            function,
            verification: None,
            supplementary: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn nparams(&self) -> usize {
        self.parameter_names.len()
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_names.iter().position(|n| n == name)
    }

    pub fn default_values(&self) -> &[f64] {
        &self.default_values
    }

    pub fn default_variable(&self) -> &[bool] {
        &self.default_variable
    }

    /// Raw boundaries, `lo == hi` means unbounded
    pub fn boundaries(&self) -> &[(f64, f64)] {
        &self.boundaries
    }

    pub fn bound(&self, index: usize) -> Option<Bound> {
        self.boundaries
            .get(index)
            .copied()
            .and_then(Bound::from_raw_pair)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    #[inline]
    pub fn value(&self, parameters: &[f64], lag_time: f64) -> f64 {
        (self.function)(parameters, lag_time)
    }

    pub fn evaluate(&self, parameters: &[f64], lag_times: ArrayView1<f64>) -> Array1<f64> {
        lag_times.mapv(|tau| self.value(parameters, tau))
    }

    /// Parameters moved into the physically valid region, idempotent
    pub fn verify(&self, parameters: &[f64]) -> Vec<f64> {
        let mut parameters = parameters.to_vec();
        if let Some(verification) = self.verification {
            verification(&mut parameters);
        }
        parameters
    }

    pub fn supplementary(&self, parameters: &[f64], countrate: Option<f64>) -> Vec<(String, f64)> {
        match self.supplementary {
            Some(supplementary) => supplementary(parameters, countrate),
            None => vec![],
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parameter_names", &self.parameter_names)
            .field("constraints", &self.constraints)
            .finish_non_exhaustive()
    }
}

/// Parameter definition for [ModelBuilder]
#[derive(Clone, Debug)]
pub struct ParameterDef {
    pub name: String,
    pub default: f64,
    pub variable: bool,
    pub boundary: (f64, f64),
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, default: f64, variable: bool) -> Self {
        Self {
            name: name.into(),
            default,
            variable,
            boundary: (0.0, 0.0),
        }
    }

    pub fn bounded(self, lo: f64, hi: f64) -> Self {
        Self {
            boundary: (lo, hi),
            ..self
        }
    }

    pub fn positive(self) -> Self {
        self.bounded(0.0, f64::INFINITY)
    }
}

pub struct ModelBuilder {
    id: u32,
    name: String,
    description: String,
    parameters: Vec<ParameterDef>,
    constraints: Vec<Constraint>,
    function: ModelFunction,
    verification: Option<VerificationFunction>,
    supplementary: Option<SupplementaryFunction>,
}

impl ModelBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn parameters(mut self, parameters: impl IntoIterator<Item = ParameterDef>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn verification(mut self, verification: VerificationFunction) -> Self {
        self.verification = Some(verification);
        self
    }

    pub fn supplementary(mut self, supplementary: SupplementaryFunction) -> Self {
        self.supplementary = Some(supplementary);
        self
    }

    pub fn build(self) -> Result<Model, FitError> {
        if self.parameters.is_empty() {
            return Err(FitError::InvalidModel(format!(
                "model {} has no parameters",
                self.id
            )));
        }
        let nparams = self.parameters.len();
        for (i, p) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return Err(FitError::InvalidModel(format!(
                    "model {} has duplicate parameter name {:?}",
                    self.id, p.name
                )));
            }
            if !p.default.is_finite() {
                return Err(FitError::InvalidModel(format!(
                    "model {} parameter {:?} has non-finite default value",
                    self.id, p.name
                )));
            }
        }
        for constraint in self.constraints.iter() {
            constraint.validate(nparams)?;
        }

        let (parameter_names, default_values, default_variable, boundaries) = self
            .parameters
            .into_iter()
            .map(|p| (p.name, p.default, p.variable, p.boundary))
            .fold(
                (vec![], vec![], vec![], vec![]),
                |(mut names, mut values, mut variable, mut boundaries), (n, v, b, r)| {
                    names.push(n);
                    values.push(v);
                    variable.push(b);
                    boundaries.push(r);
                    (names, values, variable, boundaries)
                },
            );

        Ok(Model {
            id: self.id,
            name: self.name,
            description: self.description,
            parameter_names,
            default_values,
            default_variable,
            boundaries,
            constraints: self.constraints,
            function: self.function,
            verification: self.verification,
            supplementary: self.supplementary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(p: &[f64], tau: f64) -> f64 {
        p[0] + p[1] * tau
    }

    #[test]
    fn builder_collects_metadata() {
        let model = Model::builder(1, "line", line)
            .parameter(ParameterDef::new("a", 1.0, true))
            .parameter(ParameterDef::new("b", 2.0, false).positive())
            .constraint(Constraint::less(0, 1))
            .build()
            .unwrap();
        assert_eq!(model.nparams(), 2);
        assert_eq!(model.default_values(), &[1.0, 2.0]);
        assert_eq!(model.default_variable(), &[true, false]);
        assert_eq!(model.bound(0), None);
        assert_eq!(model.bound(1), Some(Bound::lower_only(0.0)));
        assert_eq!(model.parameter_index("b"), Some(1));
        assert_eq!(model.value(&[1.0, 2.0], 3.0), 7.0);
        // No verification function means identity
        assert_eq!(model.verify(&[-1.0, -2.0]), vec![-1.0, -2.0]);
    }

    #[test]
    fn builder_rejects_out_of_range_constraint() {
        let result = Model::builder(1, "line", line)
            .parameter(ParameterDef::new("a", 1.0, true))
            .parameter(ParameterDef::new("b", 2.0, true))
            .constraint(Constraint::less(0, 2))
            .build();
        assert!(matches!(
            result,
            Err(FitError::InvalidConstraint { reason, .. }) if reason.contains("below 2")
        ));
    }

    #[test]
    fn builder_rejects_duplicate_names() {
        let result = Model::builder(1, "line", line)
            .parameter(ParameterDef::new("a", 1.0, true))
            .parameter(ParameterDef::new("a", 2.0, true))
            .build();
        assert!(matches!(result, Err(FitError::InvalidModel(_))));
    }
}
