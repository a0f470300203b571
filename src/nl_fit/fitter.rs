use crate::data::Correlation;
use crate::error::FitError;
use crate::nl_fit::bounds::Bound;
use crate::nl_fit::curve_fit::AlgorithmRegistry;
use crate::nl_fit::layout::{LayoutBuilder, LayoutInput, ParameterLayout};
use crate::nl_fit::objective::{Objective, covariance, numerical_jacobian};
use crate::nl_fit::results::{Diagnostic, FitResults};
use crate::nl_fit::retry::{AttemptObjective, StuckParameterRetry, minimize};
use crate::weights::{WeightKind, compute_weights, compute_weights_at, sanitize_weights};

use itertools::izip;
use ndarray::{Array1, Array2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Options shared by all fits of a [Fitter]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitOptions {
    /// `None` runs a single minimization
    #[serde(default = "FitOptions::default_retry")]
    pub retry: Option<StuckParameterRetry>,
}

impl FitOptions {
    #[inline]
    pub fn default_retry() -> Option<StuckParameterRetry> {
        Some(StuckParameterRetry::default())
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            retry: Self::default_retry(),
        }
    }
}

/// Cropped data, weights and model of a single correlation
struct Curve<'a> {
    correlation: &'a Correlation,
    lag_time: Array1<f64>,
    values: Array1<f64>,
    sigma: Array1<f64>,
    weighted: bool,
}

impl<'a> Curve<'a> {
    fn new(
        correlation: &'a Correlation,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Self, FitError> {
        let data = correlation.correlation_fit()?;
        diagnostics.extend(correlation.bg_correction().1);
        let weighted = correlation.fit_weight_type().is_weighted();
        let mut sigma = compute_weights(correlation)?;
        if weighted {
            diagnostics.extend(sanitize_weights(&mut sigma));
        }
        Ok(Self {
            correlation,
            lag_time: data.column(0).to_owned(),
            values: data.column(1).to_owned(),
            sigma,
            weighted,
        })
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn model(&self, parameters: &[f64]) -> Array1<f64> {
        self.correlation
            .fit_model()
            .evaluate(parameters, self.lag_time.view())
    }

    fn deviations(&self, parameters: &[f64]) -> Array1<f64> {
        self.model(parameters) - &self.values
    }

    fn residuals(&self, parameters: &[f64]) -> Array1<f64> {
        let residuals = self.deviations(parameters);
        if self.weighted {
            residuals / &self.sigma
        } else {
            residuals
        }
    }

    /// Squared deviations over the variances, or over the model values of an unweighted fit
    /// unless `pooled`
    fn chi2_sum(&self, parameters: &[f64], pooled: bool) -> f64 {
        let model = self.model(parameters);
        izip!(model.iter(), self.values.iter(), self.sigma.iter())
            .map(|(&m, &y, &sigma)| {
                let squared = (y - m).powi(2);
                if self.weighted || pooled {
                    squared / sigma.powi(2)
                } else {
                    squared / m.abs()
                }
            })
            .sum()
    }
}

struct FitObjective<'a> {
    curves: Vec<Curve<'a>>,
    layout: &'a ParameterLayout,
}

impl Objective for FitObjective<'_> {
    fn nresiduals(&self) -> usize {
        self.curves.iter().map(Curve::len).sum()
    }

    fn residuals(&self, x: &[f64]) -> Array1<f64> {
        let parameters = self.layout.decode(x);
        self.curves
            .iter()
            .zip(parameters.iter())
            .flat_map(|(curve, parameters)| curve.residuals(parameters).to_vec())
            .collect()
    }
}

impl AttemptObjective for FitObjective<'_> {
    fn prepare_attempt(&mut self, x: &[f64]) -> Result<(), FitError> {
        let parameters = self.layout.decode(x);
        for (curve, parameters) in self.curves.iter_mut().zip(parameters.iter()) {
            if curve.correlation.fit_weight_type() == &WeightKind::ModelResidual {
                curve.sigma = compute_weights_at(curve.correlation, parameters)?;
                sanitize_weights(&mut curve.sigma);
            }
        }
        Ok(())
    }

    fn deviations(&self, x: &[f64]) -> Array1<f64> {
        let parameters = self.layout.decode(x);
        self.curves
            .iter()
            .zip(parameters.iter())
            .flat_map(|(curve, parameters)| curve.deviations(parameters).to_vec())
            .collect()
    }

    fn as_objective(&self) -> &dyn Objective {
        self
    }
}

/// Everything a fit writes back, computed before anything is written
struct Solution {
    parameters: Vec<Vec<f64>>,
    results: Vec<FitResults>,
    pooled: FitResults,
}

/// Fit engine running the configured optimizer on [Correlation] objects
///
/// A fit never writes partially: new parameters and the [FitResults] record are stored only
/// after the whole fit succeeded.
#[derive(Clone, Debug, Default)]
pub struct Fitter {
    registry: AlgorithmRegistry,
    options: FitOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl Fitter {
    pub fn new(registry: AlgorithmRegistry, options: FitOptions) -> Self {
        Self {
            registry,
            options,
            cancel: None,
        }
    }

    /// Fits check `flag` between optimizer attempts and between correlations
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Fit a single correlation, honoring its model constraints
    pub fn fit(&self, correlation: &mut Correlation) -> Result<FitResults, FitError> {
        let Solution {
            mut parameters,
            mut results,
            pooled,
        } = self.solve(&[&*correlation], false)?;
        correlation.set_fit_parameters(&parameters.swap_remove(0))?;
        correlation.set_fit_results(results.swap_remove(0));
        Ok(pooled)
    }

    /// Fit several correlations sharing variable parameters of the same name
    ///
    /// Every correlation gets its own [FitResults] with the errors of its parameters. The
    /// returned record describes the pooled fit: its weights are concatenated and its parameter
    /// errors are indexed by shared parameter in order of first appearance.
    pub fn fit_global(&self, correlations: &mut [&mut Correlation]) -> Result<FitResults, FitError> {
        let solution = {
            let views: Vec<&Correlation> = correlations.iter().map(|c| &**c).collect();
            self.solve(&views, true)?
        };
        for (correlation, parameters, results) in
            izip!(correlations.iter_mut(), solution.parameters, solution.results)
        {
            correlation.set_fit_parameters(&parameters)?;
            correlation.set_fit_results(results);
        }
        Ok(solution.pooled)
    }

    /// Independent fits of every correlation
    pub fn fit_all(&self, correlations: &mut [Correlation]) -> Vec<Result<FitResults, FitError>> {
        correlations
            .iter_mut()
            .map(|correlation| {
                if self.is_cancelled() {
                    return Err(FitError::Cancelled);
                }
                self.fit(correlation).inspect_err(|error| {
                    log::debug!("{}: fit failed: {error}", correlation.corr_type());
                })
            })
            .collect()
    }

    fn layout(
        correlations: &[&Correlation],
        bounds: &[Vec<Bound>],
        global: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ParameterLayout {
        let inputs = correlations
            .iter()
            .zip(bounds)
            .map(|(correlation, bounds)| LayoutInput {
                names: correlation.fit_model().parameter_names(),
                values: correlation.fit_parameters(),
                variable: correlation.fit_parameters_variable(),
                bounds,
            });
        if global {
            let count: usize = correlations
                .iter()
                .map(|c| c.fit_model().constraints().len())
                .sum();
            if count > 0 {
                let diagnostic = Diagnostic::ConstraintsIgnored { count };
                log::warn!("{diagnostic}");
                diagnostics.push(diagnostic);
            }
            return ParameterLayout::global(inputs);
        }
        let (layout, layout_diagnostics) = inputs
            .zip(correlations)
            .map(|(input, correlation)| {
                let mut builder = LayoutBuilder::new(input);
                builder.apply_constraints(correlation.fit_model().constraints());
                builder.build()
            })
            .next()
            .unwrap_or_else(|| (ParameterLayout::global(Vec::<LayoutInput>::new()), vec![]));
        diagnostics.extend(layout_diagnostics);
        layout
    }

    fn solve(&self, correlations: &[&Correlation], global: bool) -> Result<Solution, FitError> {
        let first = correlations.first().ok_or(FitError::NoCorrelationData)?;
        if correlations
            .iter()
            .all(|c| !c.fit_parameters_variable().contains(&true))
        {
            return Err(FitError::NoVariableParameters);
        }
        let key = first.fit_algorithm();
        let algorithm = self.registry.get(key)?;

        let mut diagnostics = vec![];
        let curves = correlations
            .iter()
            .map(|correlation| Curve::new(correlation, &mut diagnostics))
            .collect::<Result<Vec<_>, _>>()?;

        let bounds: Vec<Vec<Bound>> = correlations.iter().map(|c| c.effective_bounds()).collect();
        let layout = Self::layout(correlations, &bounds, global, &mut diagnostics);
        let nfree = layout.nfree();
        if nfree == 0 {
            return Err(FitError::NoVariableParameters);
        }
        let npoints: usize = curves.iter().map(Curve::len).sum();
        if npoints < nfree + 2 {
            return Err(FitError::TooFewDataPoints {
                points: npoints,
                variables: nfree,
            });
        }
        let dof = npoints - nfree - 1;

        let mut objective = FitObjective {
            curves,
            layout: &layout,
        };
        let minimization = minimize(
            algorithm.as_ref(),
            &mut objective,
            layout.free(),
            self.options.retry.as_ref(),
            &|| self.is_cancelled(),
        )?;
        diagnostics.extend(minimization.diagnostics);

        let parameters: Vec<Vec<f64>> = layout
            .decode(&minimization.x)
            .iter()
            .zip(correlations)
            .map(|(parameters, c)| c.check_parms(&c.fit_model().verify(parameters)))
            .collect();
        let chi2 = objective
            .curves
            .iter()
            .zip(parameters.iter())
            .map(|(curve, parameters)| curve.chi2_sum(parameters, global))
            .sum::<f64>()
            / dof as f64;

        let covariance = if !algorithm.provides_covariance() {
            None
        } else {
            let estimate = if minimization.success {
                let jacobian = numerical_jacobian(
                    |x| objective.residuals(x),
                    &minimization.x,
                    &layout.bounds(),
                );
                covariance(&jacobian, chi2)
            } else {
                Err("optimizer did not converge".to_string())
            };
            estimate
                .inspect_err(|reason| {
                    let diagnostic = Diagnostic::CovarianceUnavailable {
                        reason: reason.clone(),
                    };
                    log::warn!("{diagnostic}");
                    diagnostics.push(diagnostic);
                })
                .ok()
        };
        let errors = |indices: Vec<Option<usize>>, cov: &Array2<f64>| -> Vec<Option<f64>> {
            indices
                .into_iter()
                .map(|k| k.map(|k| cov[[k, k]].sqrt()))
                .collect()
        };

        let record = |parameter_errors, weighted, weight_type, weights| FitResults {
            chi2,
            dof,
            parameter_errors,
            weighted,
            weight_type,
            weights,
            algorithm: key.to_string(),
            attempts: minimization.attempts,
            success: minimization.success,
            global,
            diagnostics: diagnostics.clone(),
        };
        let results: Vec<FitResults> = objective
            .curves
            .iter()
            .enumerate()
            .map(|(block, curve)| {
                record(
                    covariance
                        .as_ref()
                        .map(|cov| errors(layout.free_indices(block), cov)),
                    curve.weighted,
                    curve.correlation.fit_weight_type().to_string(),
                    curve.sigma.clone(),
                )
            })
            .collect();
        let pooled = if global {
            record(
                covariance
                    .as_ref()
                    .map(|cov| errors((0..nfree).map(Some).collect(), cov)),
                objective.curves.iter().any(|curve| curve.weighted),
                first.fit_weight_type().to_string(),
                objective
                    .curves
                    .iter()
                    .flat_map(|curve| curve.sigma.to_vec())
                    .collect(),
            )
        } else {
            results[0].clone()
        };
        log::debug!(
            "fit of {} correlation(s) with {key}: chi2 {chi2}, {} attempt(s)",
            correlations.len(),
            minimization.attempts
        );

        Ok(Solution {
            parameters,
            results,
            pooled,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unreadable_literal)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use crate::model::builtin::{MODEL_2D, MODEL_3D_TRIPLET};
    use crate::nl_fit::bounds::Bound;
    use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};

    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn correlation(model_id: u32, parameters: &[f64], n: usize) -> Correlation {
        let model = ModelRegistry::builtin().model(model_id).unwrap();
        let lag = Array1::logspace(10.0, -5.0, 2.0, n);
        let mut data = Array2::zeros((n, 2));
        for (i, &tau) in lag.iter().enumerate() {
            data[[i, 0]] = tau;
            data[[i, 1]] = model.value(parameters, tau);
        }
        Correlation::new("AC1", model).with_data(data).unwrap()
    }

    /// Returns the start vector as is
    struct Idle;

    impl CurveFitTrait for Idle {
        fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], _bounds: &[Bound]) -> CurveFitResult {
            CurveFitResult {
                x: x0.to_vec(),
                cost: objective.residuals(x0).mapv(|r| r * r).sum(),
                success: false,
                evaluations: 1,
            }
        }
    }

    #[test]
    fn noiseless_2d() {
        let truth = [6.0, 0.25, 0.01];
        let mut corr = correlation(MODEL_2D, &truth, 100);
        corr.set_fit_parameters_variable(&[true, true, true]).unwrap();
        let results = Fitter::default().fit(&mut corr).unwrap();
        assert!(results.success);
        assert!(!results.weighted);
        assert_eq!(results.weight_type, "none");
        assert_eq!(results.algorithm, "Lev-Mar");
        assert_eq!(results.dof, 100 - 3 - 1);
        for (&actual, &desired) in corr.fit_parameters().iter().zip(truth.iter()) {
            assert_relative_eq!(actual, desired, max_relative = 1e-6, epsilon = 1e-9);
        }
        assert!(results.chi2 < 1e-12);
        assert_eq!(corr.fit_results(), Some(&results));
        let errors = results.parameter_errors.unwrap();
        assert!(errors.iter().all(Option::is_some));
    }

    #[test]
    fn fixed_parameters_have_no_errors() {
        let mut corr = correlation(MODEL_2D, &[6.0, 0.25, 0.0], 100);
        let results = Fitter::default().fit(&mut corr).unwrap();
        let errors = results.parameter_errors.unwrap();
        assert!(errors[0].is_some());
        assert!(errors[1].is_some());
        assert!(errors[2].is_none());
        assert_eq!(corr.fit_parameters()[2], 0.0);
    }

    #[test]
    fn derived_parameter_has_no_error() {
        let truth = [5.0, 0.2, 0.005, 0.3, 5.0, 0.0];
        let mut corr = correlation(MODEL_3D_TRIPLET, &truth, 150);
        let results = Fitter::default().fit(&mut corr).unwrap();
        let p = corr.fit_parameters();
        assert!(p[2] <= p[3]);
        if let Some(errors) = results.parameter_errors {
            assert!(errors[3].is_none());
            assert!(errors[4].is_none());
        }
    }

    #[test]
    fn nelder_mead_has_no_errors() {
        let mut corr = correlation(MODEL_2D, &[6.0, 0.25, 0.0], 100);
        corr.set_fit_algorithm("Nelder-Mead");
        let results = Fitter::default().fit(&mut corr).unwrap();
        assert_eq!(results.parameter_errors, None);
        assert_eq!(results.algorithm, "Nelder-Mead");
        assert_relative_eq!(corr.fit_parameters()[1], 0.25, max_relative = 1e-3);
    }

    #[test]
    fn gradient_algorithms() {
        let truth = [6.0, 0.25, 0.0];
        for algorithm in ["BFGS", "L-BFGS", "Polak-Ribiere"] {
            let mut corr = correlation(MODEL_2D, &truth, 100);
            corr.set_fit_algorithm(algorithm);
            let results = Fitter::default().fit(&mut corr).unwrap();
            assert_eq!(results.algorithm, algorithm);
            assert_eq!(results.parameter_errors, None);
            assert_relative_eq!(corr.fit_parameters()[0], truth[0], max_relative = 1e-2);
            assert_relative_eq!(corr.fit_parameters()[1], truth[1], max_relative = 1e-2);
        }
    }

    #[test]
    fn pinned_parameter_keeps_other_errors() {
        let truth = [5.0, 0.2, 0.3, 0.3, 5.0, 0.0];
        let mut corr = correlation(MODEL_3D_TRIPLET, &truth, 150);
        corr.set_fit_parameters(&truth).unwrap();
        // τ_trip < τ_diff = 0.3 leaves nothing of [0.5, 1]
        let mut range = vec![(0.0, 0.0); 6];
        range[2] = (0.5, 1.0);
        corr.set_fit_parameters_range(&range).unwrap();
        corr.set_fit_parameters_variable(&[true, true, true, false, false, false])
            .unwrap();
        let results = Fitter::default().fit(&mut corr).unwrap();
        assert!(results.success);
        assert!(
            results
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::EmptyConstraintBound { value, .. } if *value == 0.3))
        );
        assert!(
            !results
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::CovarianceUnavailable { .. }))
        );
        let errors = results.parameter_errors.unwrap();
        assert!(errors[0].is_some());
        assert!(errors[1].is_some());
        assert!(errors[2].is_none());
        assert!(errors[3].is_none());
    }

    #[test]
    fn errors_leave_correlation_untouched() {
        let fitter = Fitter::default();

        let model = ModelRegistry::builtin().model(MODEL_2D).unwrap();
        let mut empty = Correlation::new("AC1", model);
        assert_eq!(fitter.fit(&mut empty), Err(FitError::NoCorrelationData));

        let mut corr = correlation(MODEL_2D, &[6.0, 0.25, 0.0], 50);
        let before = corr.fit_parameters().to_vec();

        corr.set_fit_algorithm("Powell");
        assert_eq!(
            fitter.fit(&mut corr),
            Err(FitError::UnknownAlgorithm("Powell".to_string()))
        );
        corr.set_fit_algorithm("Lev-Mar");

        corr.set_fit_parameters_variable(&[false; 3]).unwrap();
        assert_eq!(fitter.fit(&mut corr), Err(FitError::NoVariableParameters));
        corr.set_fit_parameters_variable(&[true, true, false]).unwrap();

        corr.set_fit_ival(crate::data::FitInterval::new(10, Some(13)));
        assert_eq!(
            fitter.fit(&mut corr),
            Err(FitError::TooFewDataPoints {
                points: 3,
                variables: 2
            })
        );

        assert_eq!(corr.fit_parameters(), &before[..]);
        assert!(corr.fit_results().is_none());
    }

    #[test]
    fn injected_optimizer() {
        let registry = AlgorithmRegistry::default().with("idle", Idle);
        let fitter = Fitter::new(registry, FitOptions { retry: None });
        let mut corr = correlation(MODEL_2D, &[6.0, 0.25, 0.0], 50);
        corr.set_fit_algorithm("idle");
        let start = corr.fit_parameters().to_vec();
        let results = fitter.fit(&mut corr).unwrap();
        assert_eq!(results.attempts, 1);
        assert!(!results.success);
        assert!(results.parameter_errors.is_none());
        assert!(
            results
                .diagnostics
                .contains(&Diagnostic::OptimizerNotConverged { attempt: 1 })
        );
        assert_eq!(corr.fit_parameters(), &start[..]);
    }

    #[test]
    fn cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let fitter = Fitter::default().with_cancel_flag(flag.clone());
        let mut correlations = vec![
            correlation(MODEL_2D, &[6.0, 0.25, 0.0], 50),
            correlation(MODEL_2D, &[3.0, 0.5, 0.0], 50),
        ];
        let results = fitter.fit_all(&mut correlations);
        assert_eq!(results, vec![Err(FitError::Cancelled), Err(FitError::Cancelled)]);
        assert!(correlations.iter().all(|c| c.fit_results().is_none()));

        flag.store(false, Ordering::Relaxed);
        let results = fitter.fit_all(&mut correlations);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn weights_are_sanitized() {
        let mut corr = correlation(MODEL_2D, &[6.0, 0.25, 0.0], 50);
        let mut sigma = Array1::from_elem(50, 0.01);
        sigma[3] = 0.0;
        sigma[7] = f64::NAN;
        corr.set_weights("known", sigma).unwrap();
        corr.set_fit_weight_type("known").unwrap();
        let results = Fitter::default().fit(&mut corr).unwrap();
        assert!(results.weighted);
        assert_eq!(results.weight_type, "known");
        assert!(results.diagnostics.contains(&Diagnostic::WeightsReplaced {
            count: 2,
            replacement: 0.01
        }));
        assert!(results.weights.iter().all(|&w| w == 0.01));
    }
}
