use crate::data::correlation::Correlation;
use crate::data::interval::FitInterval;
use crate::error::FitError;
use crate::model::ModelRegistry;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fit configuration of a [Correlation] in its persisted form
///
/// Raw sentinels are kept as they are stored: `fit_ival = (start, end)` with `end <= 0` for
/// "through the end", and `lo == hi` parameter ranges for "no override".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitConfig {
    pub model_id: u32,
    pub parameters: Vec<f64>,
    pub variable: Vec<bool>,
    #[serde(default = "FitConfig::default_fit_ival")]
    pub fit_ival: (i64, i64),
    #[serde(default = "FitConfig::default_weight_type")]
    pub weight_type: String,
    #[serde(default)]
    pub weight_spread: Option<usize>,
    #[serde(default)]
    pub external_weights: BTreeMap<String, Vec<f64>>,
    #[serde(default = "FitConfig::default_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub parameter_range: Vec<(f64, f64)>,
    #[serde(default = "FitConfig::default_bg_correction")]
    pub bg_correction: bool,
    #[serde(default)]
    pub normalize_parameter: Option<usize>,
}

impl FitConfig {
    #[inline]
    pub fn default_fit_ival() -> (i64, i64) {
        FitInterval::full().to_raw()
    }

    #[inline]
    pub fn default_weight_type() -> String {
        "none".to_string()
    }

    #[inline]
    pub fn default_algorithm() -> String {
        "Lev-Mar".to_string()
    }

    #[inline]
    pub fn default_bg_correction() -> bool {
        true
    }
}

impl Correlation {
    /// Export the fit configuration
    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            model_id: self.fit_model().id(),
            parameters: self.fit_parameters().to_vec(),
            variable: self.fit_parameters_variable().to_vec(),
            fit_ival: self.fit_ival().to_raw(),
            weight_type: self.fit_weight_type().to_string(),
            weight_spread: self.weight_spread_raw(),
            external_weights: self
                .external_weights()
                .iter()
                .map(|(key, weights)| (key.clone(), weights.to_vec()))
                .collect(),
            algorithm: self.fit_algorithm().to_string(),
            parameter_range: self.fit_parameters_range().to_vec(),
            bg_correction: self.bg_correction_enabled(),
            normalize_parameter: self.normalize_parameter(),
        }
    }

    /// Import a fit configuration, the correlation is unchanged if any field is invalid
    pub fn apply_fit_config(
        &mut self,
        config: &FitConfig,
        registry: &ModelRegistry,
    ) -> Result<(), FitError> {
        let mut updated = self.clone();
        let model = registry.model(config.model_id)?;
        if model.id() != self.fit_model().id() {
            updated.set_fit_model(model);
        }
        if !config.parameter_range.is_empty() {
            updated.set_fit_parameters_range(&config.parameter_range)?;
        }
        updated.set_fit_parameters(&config.parameters)?;
        updated.set_fit_parameters_variable(&config.variable)?;
        let (start, end) = config.fit_ival;
        updated.set_fit_ival(FitInterval::from_raw(start, end));
        for (key, weights) in config.external_weights.iter() {
            updated.set_weights(key.clone(), weights.clone().into())?;
        }
        updated.set_fit_weight_type(&config.weight_type)?;
        updated.set_weight_spread(config.weight_spread);
        updated.set_fit_algorithm(config.algorithm.clone());
        updated.set_bg_correction_enabled(config.bg_correction);
        updated.set_normalize_parameter(config.normalize_parameter);
        self.assign(updated);
        Ok(())
    }
}
