use crate::data::interval::FitInterval;
use crate::data::trace::Trace;
use crate::error::FitError;
use crate::model::Model;
use crate::nl_fit::bounds::Bound;
use crate::nl_fit::results::{Diagnostic, FitResults};
use crate::weights::WeightKind;

use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

const DEFAULT_WEIGHT_SPREAD: usize = 3;
const DEFAULT_ALGORITHM: &str = "Lev-Mar";

/// Relative closeness of signal and background treated as a zero denominator
const BACKGROUND_DEGENERACY: f64 = 1e-10;

/// Correlation curve together with everything needed to fit it
///
/// The parameter vector, the variable mask and the parameter ranges always have the length of
/// the current model's parameter list, only [Correlation::set_fit_model] resizes them.
#[derive(Debug)]
pub struct Correlation {
    correlation: Option<Array2<f64>>,
    corr_type: String,
    traces: Vec<Trace>,
    backgrounds: Vec<Trace>,
    bg_correction_enabled: bool,
    fit_model: Arc<Model>,
    fit_parameters: Vec<f64>,
    fit_parameters_variable: Vec<bool>,
    fit_parameters_range: Vec<(f64, f64)>,
    fit_ival: FitInterval,
    fit_weight_type: WeightKind,
    weight_spread: Option<usize>,
    external_weights: BTreeMap<String, Array1<f64>>,
    fit_algorithm: String,
    normalize_parameter: Option<usize>,
    lag_time_override: Option<Array1<f64>>,
    fit_results: Option<FitResults>,
    uid: OnceLock<String>,
}

impl Clone for Correlation {
    /// The clone gets its own uid
    fn clone(&self) -> Self {
        Self {
            correlation: self.correlation.clone(),
            corr_type: self.corr_type.clone(),
            traces: self.traces.clone(),
            backgrounds: self.backgrounds.clone(),
            bg_correction_enabled: self.bg_correction_enabled,
            fit_model: self.fit_model.clone(),
            fit_parameters: self.fit_parameters.clone(),
            fit_parameters_variable: self.fit_parameters_variable.clone(),
            fit_parameters_range: self.fit_parameters_range.clone(),
            fit_ival: self.fit_ival,
            fit_weight_type: self.fit_weight_type.clone(),
            weight_spread: self.weight_spread,
            external_weights: self.external_weights.clone(),
            fit_algorithm: self.fit_algorithm.clone(),
            normalize_parameter: self.normalize_parameter,
            lag_time_override: self.lag_time_override.clone(),
            fit_results: self.fit_results.clone(),
            uid: OnceLock::new(),
        }
    }
}

impl Correlation {
    /// Model-only correlation of the given type, e.g. `"AC1"` or `"CC12"`
    pub fn new(corr_type: impl Into<String>, model: Arc<Model>) -> Self {
        let mut correlation = Self {
            correlation: None,
            corr_type: corr_type.into(),
            traces: vec![],
            backgrounds: vec![],
            bg_correction_enabled: true,
            fit_model: model.clone(),
            fit_parameters: vec![],
            fit_parameters_variable: vec![],
            fit_parameters_range: vec![],
            fit_ival: FitInterval::full(),
            fit_weight_type: WeightKind::None,
            weight_spread: None,
            external_weights: BTreeMap::new(),
            fit_algorithm: DEFAULT_ALGORITHM.to_string(),
            normalize_parameter: None,
            lag_time_override: None,
            fit_results: None,
            uid: OnceLock::new(),
        };
        correlation.set_fit_model(model);
        correlation
    }

    /// Builder-style [Correlation::set_correlation]
    pub fn with_data(mut self, data: Array2<f64>) -> Result<Self, FitError> {
        self.set_correlation(Some(data))?;
        Ok(self)
    }

    pub fn correlation(&self) -> Option<&Array2<f64>> {
        self.correlation.as_ref()
    }

    /// Set `(lag time, value)` rows, `None` leaves a model-only correlation
    pub fn set_correlation(&mut self, data: Option<Array2<f64>>) -> Result<(), FitError> {
        if let Some(data) = &data {
            if data.ncols() != 2 {
                return Err(FitError::InvalidCorrelation(
                    "correlation must have two columns",
                ));
            }
            if data.nrows() == 0 {
                return Err(FitError::InvalidCorrelation("correlation is empty"));
            }
        }
        self.correlation = data;
        Ok(())
    }

    pub fn corr_type(&self) -> &str {
        &self.corr_type
    }

    pub fn set_corr_type(&mut self, corr_type: impl Into<String>) -> Result<(), FitError> {
        let previous = std::mem::replace(&mut self.corr_type, corr_type.into());
        let check = self
            .check_channel_count("traces", self.traces.len())
            .and_then(|_| self.check_channel_count("backgrounds", self.backgrounds.len()));
        if check.is_err() {
            self.corr_type = previous;
        }
        check
    }

    pub fn is_ac(&self) -> bool {
        self.corr_type.starts_with("AC")
    }

    pub fn is_cc(&self) -> bool {
        !self.is_ac()
    }

    fn nchannels(&self) -> usize {
        if self.is_ac() { 1 } else { 2 }
    }

    fn check_channel_count(&self, what: &'static str, actual: usize) -> Result<(), FitError> {
        if actual > self.nchannels() {
            return Err(FitError::TooManyTraces {
                what,
                actual,
                maximum: self.nchannels(),
                corr_type: self.corr_type.clone(),
            });
        }
        Ok(())
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn set_traces(&mut self, traces: Vec<Trace>) -> Result<(), FitError> {
        self.check_channel_count("traces", traces.len())?;
        self.traces = traces;
        Ok(())
    }

    pub fn backgrounds(&self) -> &[Trace] {
        &self.backgrounds
    }

    pub fn set_backgrounds(&mut self, backgrounds: Vec<Trace>) -> Result<(), FitError> {
        self.check_channel_count("backgrounds", backgrounds.len())?;
        self.backgrounds = backgrounds;
        Ok(())
    }

    /// Replace the background of one channel
    ///
    /// Autocorrelations only have channel 0. Cross-correlations get zero-rate placeholders for
    /// channels which were not set before.
    pub fn background_replace(&mut self, channel: usize, trace: Trace) -> Result<(), FitError> {
        if channel >= self.nchannels() {
            return Err(FitError::InvalidChannel {
                channel,
                corr_type: self.corr_type.clone(),
            });
        }
        while self.backgrounds.len() <= channel {
            self.backgrounds.push(Trace::zero());
        }
        self.backgrounds[channel] = trace;
        Ok(())
    }

    pub fn bg_correction_enabled(&self) -> bool {
        self.bg_correction_enabled
    }

    pub fn set_bg_correction_enabled(&mut self, enabled: bool) {
        self.bg_correction_enabled = enabled;
    }

    /// Background correction factor with the diagnostic explaining a fallback to unity
    ///
    /// `(S / (S - B))^2` for autocorrelations, `S1 / (S1 - B1) * S2 / (S2 - B2)` for
    /// cross-correlations. It is exactly unity if the correction is disabled or traces or
    /// backgrounds are missing.
    pub fn bg_correction(&self) -> (f64, Option<Diagnostic>) {
        let n = self.nchannels();
        if !self.bg_correction_enabled || self.traces.len() < n || self.backgrounds.len() < n {
            return (1.0, None);
        }
        let channel_factor = |channel: usize| {
            let signal = self.traces[channel].countrate();
            let background = self.backgrounds[channel].countrate();
            let denominator = signal - background;
            let scale = f64::max(signal.abs(), background.abs());
            let factor = signal / denominator;
            if denominator.abs() <= BACKGROUND_DEGENERACY * scale || !factor.is_finite() {
                Err(Diagnostic::BackgroundDegenerate {
                    channel,
                    signal,
                    background,
                })
            } else {
                Ok(factor)
            }
        };
        let factor = if self.is_ac() {
            channel_factor(0).map(|f| f * f)
        } else {
            channel_factor(0).and_then(|f1| channel_factor(1).map(|f2| f1 * f2))
        };
        match factor {
            Ok(factor) => (factor, None),
            Err(diagnostic) => {
                log::warn!("{}: {}", self.corr_type, diagnostic);
                (1.0, Some(diagnostic))
            }
        }
    }

    pub fn bg_correction_factor(&self) -> f64 {
        self.bg_correction().0
    }

    /// Mean countrate of the traces, `None` if a channel has no trace
    pub fn countrate(&self) -> Option<f64> {
        let n = self.nchannels();
        if self.traces.len() < n {
            return None;
        }
        Some(self.traces[..n].iter().map(Trace::countrate).sum::<f64>() / n as f64)
    }

    pub fn fit_model(&self) -> &Arc<Model> {
        &self.fit_model
    }

    /// Switch the model, resetting parameters, variable mask, ranges and normalization
    pub fn set_fit_model(&mut self, model: Arc<Model>) {
        self.fit_parameters = model.default_values().to_vec();
        self.fit_parameters_variable = model.default_variable().to_vec();
        self.fit_parameters_range = vec![(0.0, 0.0); model.nparams()];
        self.normalize_parameter = None;
        self.fit_results = None;
        self.fit_model = model;
    }

    fn check_length(&self, what: &'static str, actual: usize) -> Result<(), FitError> {
        let expected = self.fit_model.nparams();
        if actual != expected {
            return Err(FitError::ParameterCount {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn fit_parameters(&self) -> &[f64] {
        &self.fit_parameters
    }

    /// Store parameters after model verification and clamping into the effective bounds
    pub fn set_fit_parameters(&mut self, parameters: &[f64]) -> Result<(), FitError> {
        self.check_length("parameter vector", parameters.len())?;
        self.fit_parameters = self.check_parms(&self.fit_model.verify(parameters));
        Ok(())
    }

    pub fn set_fit_parameter(&mut self, index: usize, value: f64) -> Result<(), FitError> {
        let mut parameters = self.fit_parameters.clone();
        let slot = parameters
            .get_mut(index)
            .ok_or(FitError::ParameterCount {
                what: "parameter index",
                expected: self.fit_model.nparams(),
                actual: index + 1,
            })?;
        *slot = value;
        self.set_fit_parameters(&parameters)
    }

    pub fn fit_parameters_variable(&self) -> &[bool] {
        &self.fit_parameters_variable
    }

    pub fn set_fit_parameters_variable(&mut self, variable: &[bool]) -> Result<(), FitError> {
        self.check_length("variable mask", variable.len())?;
        self.fit_parameters_variable = variable.to_vec();
        Ok(())
    }

    /// Raw user ranges, `lo == hi` means "no override"
    pub fn fit_parameters_range(&self) -> &[(f64, f64)] {
        &self.fit_parameters_range
    }

    /// Set raw user ranges, current parameters are clamped into the new effective bounds
    pub fn set_fit_parameters_range(&mut self, range: &[(f64, f64)]) -> Result<(), FitError> {
        self.check_length("parameter range", range.len())?;
        self.fit_parameters_range = range.to_vec();
        self.fit_parameters = self.check_parms(&self.fit_parameters);
        Ok(())
    }

    /// User override if set, else model boundary if set, else unbounded
    pub fn effective_bound(&self, index: usize) -> Bound {
        self.fit_parameters_range
            .get(index)
            .copied()
            .and_then(Bound::from_raw_pair)
            .or_else(|| self.fit_model.bound(index))
            .unwrap_or(Bound::UNBOUNDED)
    }

    pub fn effective_bounds(&self) -> Vec<Bound> {
        (0..self.fit_model.nparams())
            .map(|i| self.effective_bound(i))
            .collect()
    }

    /// Clamp every entry into its effective bound
    pub fn check_parms(&self, candidate: &[f64]) -> Vec<f64> {
        candidate
            .iter()
            .enumerate()
            .map(|(i, &x)| self.effective_bound(i).clamp(x))
            .collect()
    }

    pub fn fit_ival(&self) -> FitInterval {
        self.fit_ival
    }

    pub fn set_fit_ival(&mut self, fit_ival: FitInterval) {
        self.fit_ival = fit_ival;
    }

    /// Fit interval resolved against the current lag-time axis
    pub fn fit_range(&self) -> Range<usize> {
        self.fit_ival.resolve(self.axis_len())
    }

    fn axis_len(&self) -> usize {
        match &self.correlation {
            Some(data) => data.nrows(),
            None => self.lag_time().len(),
        }
    }

    pub fn fit_weight_type(&self) -> &WeightKind {
        &self.fit_weight_type
    }

    /// Decode and set the weight type, external keys must have weights stored already
    pub fn set_fit_weight_type(&mut self, weight_type: &str) -> Result<(), FitError> {
        self.fit_weight_type =
            WeightKind::parse(weight_type, |key| self.external_weights.contains_key(key))?;
        Ok(())
    }

    pub fn set_weight_kind(&mut self, kind: WeightKind) -> Result<(), FitError> {
        if let WeightKind::External { key } = &kind {
            if !self.external_weights.contains_key(key) {
                return Err(FitError::UnknownWeightType(key.clone()));
            }
        }
        self.fit_weight_type = kind;
        Ok(())
    }

    /// Half width of the local windows of spline and model weights
    pub fn weight_spread(&self) -> usize {
        self.weight_spread.unwrap_or(DEFAULT_WEIGHT_SPREAD)
    }

    pub fn weight_spread_raw(&self) -> Option<usize> {
        self.weight_spread
    }

    pub fn set_weight_spread(&mut self, spread: Option<usize>) {
        self.weight_spread = spread;
    }

    /// Set the weight spread from text, unparsable input means the default
    pub fn set_fit_weight_data(&mut self, data: &str) {
        self.weight_spread = data.trim().parse().ok();
    }

    /// Store external weights, they may cover the fit interval or the full data
    pub fn set_weights(&mut self, key: impl Into<String>, weights: Array1<f64>) -> Result<(), FitError> {
        let key = key.into();
        if WeightKind::parse_builtin(&key).is_some() {
            return Err(FitError::ReservedWeightKey(key));
        }
        self.external_weights.insert(key, weights);
        Ok(())
    }

    pub fn weights(&self, key: &str) -> Option<&Array1<f64>> {
        self.external_weights.get(key)
    }

    pub fn external_weights(&self) -> &BTreeMap<String, Array1<f64>> {
        &self.external_weights
    }

    /// Remove external weights, an unweighted fit is selected if they were in use
    pub fn remove_weights(&mut self, key: &str) -> Option<Array1<f64>> {
        if matches!(&self.fit_weight_type, WeightKind::External { key: k } if k == key) {
            self.fit_weight_type = WeightKind::None;
        }
        self.external_weights.remove(key)
    }

    pub fn fit_algorithm(&self) -> &str {
        &self.fit_algorithm
    }

    /// Key of the [AlgorithmRegistry](crate::AlgorithmRegistry), checked when fitting
    pub fn set_fit_algorithm(&mut self, algorithm: impl Into<String>) {
        self.fit_algorithm = algorithm.into();
    }

    pub fn normalize_parameter(&self) -> Option<usize> {
        self.normalize_parameter
    }

    pub fn set_normalize_parameter(&mut self, index: Option<usize>) {
        self.normalize_parameter = index;
    }

    /// Unity, a parameter value or a supplementary value, chosen by the normalize parameter
    pub fn normalize_factor(&self) -> Result<f64, FitError> {
        let Some(index) = self.normalize_parameter else {
            return Ok(1.0);
        };
        let nparams = self.fit_model.nparams();
        if index < nparams {
            return Ok(self.fit_parameters[index]);
        }
        let supplementary = self
            .fit_model
            .supplementary(&self.fit_parameters, self.countrate());
        supplementary
            .get(index - nparams)
            .map(|(_, value)| *value)
            .ok_or(FitError::NormalizeParameter {
                index,
                available: nparams + supplementary.len(),
            })
    }

    pub fn fit_results(&self) -> Option<&FitResults> {
        self.fit_results.as_ref()
    }

    pub(crate) fn set_fit_results(&mut self, results: FitResults) {
        self.fit_results = Some(results);
    }

    pub fn set_lag_time_override(&mut self, lag_time: Option<Array1<f64>>) {
        self.lag_time_override = lag_time;
    }

    /// Lag-time axis: the data, else the override, else a log-spaced default
    pub fn lag_time(&self) -> Array1<f64> {
        if let Some(data) = &self.correlation {
            return data.column(0).to_owned();
        }
        if let Some(lag_time) = &self.lag_time_override {
            return lag_time.clone();
        }
        Array1::logspace(10.0, -6.0, 3.0, 200)
    }

    pub fn lag_time_fit(&self) -> Array1<f64> {
        let range = self.fit_range();
        self.lag_time().slice_move(s![range])
    }

    fn corrected(&self, data: &Array2<f64>, range: Range<usize>) -> Array2<f64> {
        let mut data = data.slice(s![range, ..]).to_owned();
        let factor = self.bg_correction_factor();
        if factor != 1.0 {
            data.column_mut(1).mapv_inplace(|g| g * factor);
        }
        data
    }

    /// Background-corrected data over the full lag-time axis
    pub fn correlation_corrected(&self) -> Result<Array2<f64>, FitError> {
        let data = self.correlation.as_ref().ok_or(FitError::NoCorrelationData)?;
        Ok(self.corrected(data, 0..data.nrows()))
    }

    /// Background-corrected data cropped to the fit interval
    pub fn correlation_fit(&self) -> Result<Array2<f64>, FitError> {
        let data = self.correlation.as_ref().ok_or(FitError::NoCorrelationData)?;
        Ok(self.corrected(data, self.fit_range()))
    }

    /// [Correlation::correlation_fit] scaled by the normalize factor
    pub fn correlation_plot(&self) -> Result<Array2<f64>, FitError> {
        let mut data = self.correlation_fit()?;
        let factor = self.normalize_factor()?;
        data.column_mut(1).mapv_inplace(|g| g * factor);
        Ok(data)
    }

    fn model_curve(&self, lag_time: ArrayView1<f64>) -> Array2<f64> {
        let mut curve = Array2::zeros((lag_time.len(), 2));
        curve.column_mut(0).assign(&lag_time);
        curve
            .column_mut(1)
            .assign(&self.fit_model.evaluate(&self.fit_parameters, lag_time));
        curve
    }

    pub fn modeled(&self) -> Array2<f64> {
        self.model_curve(self.lag_time().view())
    }

    pub fn modeled_fit(&self) -> Array2<f64> {
        self.model_curve(self.lag_time_fit().view())
    }

    pub fn modeled_plot(&self) -> Result<Array2<f64>, FitError> {
        let mut curve = self.modeled_fit();
        let factor = self.normalize_factor()?;
        curve.column_mut(1).mapv_inplace(|g| g * factor);
        Ok(curve)
    }

    fn residuals_of(data: Array2<f64>, model: Array2<f64>) -> Array2<f64> {
        let mut residuals = data;
        let values = &residuals.column(1) - &model.column(1);
        residuals.column_mut(1).assign(&values);
        residuals
    }

    pub fn residuals(&self) -> Result<Array2<f64>, FitError> {
        Ok(Self::residuals_of(
            self.correlation_corrected()?,
            self.modeled(),
        ))
    }

    pub fn residuals_fit(&self) -> Result<Array2<f64>, FitError> {
        Ok(Self::residuals_of(
            self.correlation_fit()?,
            self.modeled_fit(),
        ))
    }

    pub fn residuals_plot(&self) -> Result<Array2<f64>, FitError> {
        Ok(Self::residuals_of(
            self.correlation_plot()?,
            self.modeled_plot()?,
        ))
    }

    /// Take over the whole state of `other` except the uid
    pub(crate) fn assign(&mut self, other: Self) {
        let uid = std::mem::take(&mut self.uid);
        *self = other;
        self.uid = uid;
    }

    /// Identifier of this instance, random and stable once generated
    pub fn uid(&self) -> &str {
        self.uid.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            rand::random::<u64>().hash(&mut hasher);
            self.corr_type.hash(&mut hasher);
            self.fit_model.id().hash(&mut hasher);
            if let Some(data) = &self.correlation {
                data.iter().for_each(|x| x.to_bits().hash(&mut hasher));
            }
            format!("{:016x}", hasher.finish())
        })
    }
}
