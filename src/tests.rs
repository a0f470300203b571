pub use crate::data::{Correlation, FitInterval, Trace};
pub use crate::error::FitError;
pub use crate::model::ModelRegistry;
pub use crate::model::builtin::{MODEL_2D, MODEL_3D, MODEL_3D_3D_TRIPLET, MODEL_3D_TRIPLET};
pub use crate::nl_fit::{
    AlgorithmRegistry, Bound, CurveFitResult, CurveFitTrait, Diagnostic, FitOptions, FitResults,
    Fitter, Objective,
};

pub use approx::assert_relative_eq;
pub use fcs_fit_test_util::{LAG_TIME, NOISE_TIERS, SyntheticCurve};
pub use rand::prelude::*;

/// Parameters of every built-in model used to generate synthetic curves
pub const TRUTHS: [(u32, &[f64]); 4] = [
    (MODEL_2D, &[6.0, 0.25, 0.0]),
    (MODEL_3D, &[6.0, 0.25, 5.0, 0.0]),
    (MODEL_3D_TRIPLET, &[5.0, 0.2, 0.005, 0.3, 5.0, 0.0]),
    (
        MODEL_3D_3D_TRIPLET,
        &[25.0, 0.5, 20.0, 0.4, 5.0, 1.0, 0.005, 0.1, 0.0],
    ),
];

pub const KNOWN_NOISE: &str = "known noise";

/// Correlation with synthetic data of `model_id` at `truth`
///
/// With a positive `level` noise is added and its standard deviation is attached as external
/// weights.
pub fn synthetic_correlation(model_id: u32, truth: &[f64], level: f64, seed: u64) -> Correlation {
    let model = ModelRegistry::builtin().model(model_id).unwrap();
    let mut curve = SyntheticCurve::noiseless(|tau| model.value(truth, tau), &LAG_TIME);
    if level > 0.0 {
        let mut rng = StdRng::seed_from_u64(seed);
        curve = curve.with_noise(level, &mut rng);
    }
    let mut correlation = Correlation::new("AC1", model)
        .with_data(curve.data())
        .unwrap();
    correlation.set_fit_parameters(truth).unwrap();
    if level > 0.0 {
        correlation.set_weights(KNOWN_NOISE, curve.sigma).unwrap();
        correlation.set_fit_weight_type(KNOWN_NOISE).unwrap();
    }
    correlation
}

/// Variable parameters moved away from the truth
pub fn perturbed_start(correlation: &mut Correlation) {
    let start: Vec<f64> = correlation
        .fit_parameters()
        .iter()
        .zip(correlation.fit_parameters_variable())
        .map(|(&x, &variable)| match (variable, x == 0.0) {
            (false, _) => x,
            (true, true) => x + 0.01,
            (true, false) => 1.1 * x,
        })
        .collect();
    correlation.set_fit_parameters(&start).unwrap();
}

/// Fit of a synthetic curve with only parameter `index` variable, started off the truth
///
/// Returns the fitted value and its standard error.
pub fn fit_single_parameter(
    fitter: &Fitter,
    (model_id, truth): (u32, &[f64]),
    index: usize,
    level: f64,
    seed: u64,
) -> (f64, Option<f64>) {
    let mut correlation = synthetic_correlation(model_id, truth, level, seed);
    let mut variable = vec![false; truth.len()];
    variable[index] = true;
    correlation.set_fit_parameters_variable(&variable).unwrap();
    perturbed_start(&mut correlation);
    assert_ne!(correlation.fit_parameters()[index], truth[index]);
    let results = fitter.fit(&mut correlation).unwrap();
    assert_eq!(results.weighted, level > 0.0);
    let error = results.parameter_errors.and_then(|errors| errors[index]);
    (correlation.fit_parameters()[index], error)
}

/// Within four standard errors or 1e-3 relative of the truth
pub fn is_recovered(truth: f64, fitted: f64, error: Option<f64>) -> bool {
    let deviation = (fitted - truth).abs();
    deviation <= 1e-3 * truth.abs() || error.is_some_and(|error| deviation <= 4.0 * error)
}

#[macro_export]
macro_rules! noiseless_recovery_test {
    ($name: ident, $model: expr_2021 $(,)?) => {
        #[test]
        fn $name() {
            let (model_id, truth) = TRUTHS[$model];
            let fitter = Fitter::default();
            for (i, &desired) in truth.iter().enumerate() {
                let (actual, _) = fit_single_parameter(&fitter, (model_id, truth), i, 0.0, 0);
                assert!(
                    (actual - desired).abs() <= 1e-3 * desired.abs() + 1e-7,
                    "model {model_id}, parameter {i}: {actual} != {desired}"
                );
            }
        }
    };
}

#[macro_export]
macro_rules! noise_tier_test {
    ($name: ident, $tier: expr_2021 $(,)?) => {
        #[test]
        fn $name() {
            const SEEDS: u64 = 5;
            let tier = NOISE_TIERS[$tier];
            let fitter = Fitter::default();
            let (mut total, mut recovered) = (0, 0);
            let mut missed = vec![];
            for (model_id, truth) in TRUTHS {
                for (i, &desired) in truth.iter().enumerate() {
                    for seed in 0..SEEDS {
                        let (actual, error) =
                            fit_single_parameter(&fitter, (model_id, truth), i, tier.level, seed);
                        total += 1;
                        if is_recovered(desired, actual, error) {
                            recovered += 1;
                        } else {
                            missed.push((model_id, i, seed));
                        }
                    }
                }
            }
            let fraction = recovered as f64 / total as f64;
            assert!(
                fraction >= tier.min_recovered,
                "noise level {}: recovered {recovered} of {total}, missed {missed:?}",
                tier.level
            );
        }
    };
}

#[allow(clippy::unreadable_literal)]
mod fit {
    use super::*;

    noiseless_recovery_test!(noiseless_2d, 0);
    noiseless_recovery_test!(noiseless_3d, 1);
    noiseless_recovery_test!(noiseless_3d_triplet, 2);
    noiseless_recovery_test!(noiseless_3d_3d_triplet, 3);

    #[test]
    fn noiseless_joint_recovery() {
        for (model_id, truth) in TRUTHS {
            let mut correlation = synthetic_correlation(model_id, truth, 0.0, 0);
            perturbed_start(&mut correlation);
            Fitter::default().fit(&mut correlation).unwrap();
            for (i, (&actual, &desired)) in
                correlation.fit_parameters().iter().zip(truth).enumerate()
            {
                assert!(
                    (actual - desired).abs() <= 1e-3 * desired.abs() + 1e-7,
                    "model {model_id}, parameter {i}: {actual} != {desired}"
                );
            }
        }
    }

    noise_tier_test!(noise_low, 0);
    noise_tier_test!(noise_medium, 1);
    noise_tier_test!(noise_high, 2);

    #[test]
    fn golden_value() {
        let model = ModelRegistry::builtin().model(MODEL_2D).unwrap();
        assert_relative_eq!(
            model.value(&[4.874, 0.2476, 0.015], 1.468e-6),
            0.22016907491127263,
            max_relative = 1e-12
        );
    }

    #[test]
    fn constraint_holds_for_both_start_orders() {
        let (model_id, truth) = TRUTHS[2];
        for (tau_trip, tau_diff) in [(0.002, 0.5), (0.5, 0.002)] {
            let mut correlation = synthetic_correlation(model_id, truth, 0.02, 1);
            correlation.set_fit_parameter(2, tau_trip).unwrap();
            correlation.set_fit_parameter(3, tau_diff).unwrap();
            Fitter::default().fit(&mut correlation).unwrap();
            let p = correlation.fit_parameters();
            assert!(p[2] <= p[3], "τ_trip {} > τ_diff {}", p[2], p[3]);
        }
    }

    #[test]
    fn chained_constraints_hold() {
        let (model_id, truth) = TRUTHS[3];
        let mut correlation = synthetic_correlation(model_id, truth, 0.02, 2);
        // τ_trip > τ₁ > τ₂ at start
        correlation.set_fit_parameter(1, 30.0).unwrap();
        correlation.set_fit_parameter(2, 0.2).unwrap();
        correlation.set_fit_parameter(6, 50.0).unwrap();
        Fitter::default().fit(&mut correlation).unwrap();
        let p = correlation.fit_parameters();
        assert!(p[6] <= p[1] && p[1] <= p[2], "{p:?}");
    }

    #[test]
    fn global_fit_recovers_shared_parameters() {
        let (model_id, truth) = TRUTHS[0];
        let mut first = synthetic_correlation(model_id, truth, 0.001, 3);
        let mut second = synthetic_correlation(model_id, truth, 0.001, 4);
        // Only the first correlation varies τ_diff, the second one keeps its own value
        second.set_fit_parameters_variable(&[true, false, false]).unwrap();
        first.set_fit_parameters(&[5.0, 0.3, 0.0]).unwrap();

        let results = Fitter::default()
            .fit_global(&mut [&mut first, &mut second])
            .unwrap();
        assert!(results.global);
        assert_eq!(results.weights.len(), 2 * LAG_TIME.len());
        assert_eq!(results.dof, 2 * LAG_TIME.len() - 2 - 1);

        assert_relative_eq!(first.fit_parameters()[0], truth[0], max_relative = 1e-2);
        assert_relative_eq!(first.fit_parameters()[1], truth[1], max_relative = 1e-2);
        assert_eq!(first.fit_parameters()[0], second.fit_parameters()[0]);
        assert_eq!(second.fit_parameters()[1], truth[1]);

        for correlation in [&first, &second] {
            let record = correlation.fit_results().unwrap();
            assert!(record.global);
            assert_eq!(record.chi2, results.chi2);
            assert_eq!(record.weights.len(), LAG_TIME.len());
        }
    }

    #[test]
    fn global_fit_ignores_constraints() {
        let (model_id, truth) = TRUTHS[2];
        let mut first = synthetic_correlation(model_id, truth, 0.001, 5);
        let mut second = synthetic_correlation(model_id, truth, 0.001, 6);
        let results = Fitter::default()
            .fit_global(&mut [&mut first, &mut second])
            .unwrap();
        assert!(
            results
                .diagnostics
                .contains(&Diagnostic::ConstraintsIgnored { count: 2 })
        );
    }

    #[test]
    fn global_fit_writes_nothing_on_error() {
        let (model_id, truth) = TRUTHS[0];
        let mut first = synthetic_correlation(model_id, truth, 0.001, 7);
        let model = ModelRegistry::builtin().model(MODEL_2D).unwrap();
        let mut empty = Correlation::new("AC1", model);
        let before = first.fit_parameters().to_vec();
        perturbed_start(&mut first);
        let start = first.fit_parameters().to_vec();
        assert_ne!(start, before);
        assert_eq!(
            Fitter::default().fit_global(&mut [&mut first, &mut empty]),
            Err(FitError::NoCorrelationData)
        );
        assert_eq!(first.fit_parameters(), &start[..]);
        assert!(first.fit_results().is_none());
    }

    #[test]
    fn background_correction_scales_particle_number() {
        let (model_id, truth) = TRUTHS[0];
        let mut correlation = synthetic_correlation(model_id, truth, 0.0, 0);
        correlation.set_traces(vec![Trace::flat(100.0, 10.0)]).unwrap();
        correlation.set_backgrounds(vec![Trace::flat(10.0, 10.0)]).unwrap();
        let factor = (100.0_f64 / 90.0).powi(2);
        assert_relative_eq!(correlation.bg_correction_factor(), factor, max_relative = 1e-12);

        Fitter::default().fit(&mut correlation).unwrap();
        assert_relative_eq!(
            correlation.fit_parameters()[0],
            truth[0] / factor,
            max_relative = 1e-4
        );

        correlation.set_bg_correction_enabled(false);
        assert_eq!(correlation.bg_correction_factor(), 1.0);
        Fitter::default().fit(&mut correlation).unwrap();
        assert_relative_eq!(correlation.fit_parameters()[0], truth[0], max_relative = 1e-4);
    }

    #[test]
    fn model_function_weights() {
        let (model_id, truth) = TRUTHS[1];
        let mut correlation = synthetic_correlation(model_id, truth, 0.02, 8);
        correlation.set_fit_weight_type("model function").unwrap();
        let results = Fitter::default().fit(&mut correlation).unwrap();
        assert!(results.weighted);
        assert_eq!(results.weight_type, "model function");
        assert_eq!(results.weights.len(), LAG_TIME.len());
        assert!(results.weights.iter().all(|&w| w > 0.0 && w.is_finite()));
        assert_relative_eq!(correlation.fit_parameters()[1], truth[1], max_relative = 0.1);
        // Reported weights and chi2 belong to the returned parameters
        let residuals = correlation.residuals_fit().unwrap();
        let chi2 = residuals
            .column(1)
            .iter()
            .zip(results.weights.iter())
            .map(|(r, w)| (r / w).powi(2))
            .sum::<f64>()
            / results.dof as f64;
        assert_relative_eq!(results.chi2, chi2, max_relative = 1e-6);
    }

    #[test]
    fn spline_weights_on_interval() {
        let (model_id, truth) = TRUTHS[0];
        let mut correlation = synthetic_correlation(model_id, truth, 0.02, 9);
        correlation.set_fit_weight_type("spline5").unwrap();
        correlation.set_fit_ival(FitInterval::new(20, Some(200)));
        let results = Fitter::default().fit(&mut correlation).unwrap();
        assert_eq!(results.weights.len(), 180);
        assert_eq!(results.weight_type, "spline5");
        assert_relative_eq!(correlation.fit_parameters()[0], truth[0], max_relative = 0.1);
    }

    #[test]
    fn config_round_trip_reproduces_fit() {
        let (model_id, truth) = TRUTHS[1];
        let mut correlation = synthetic_correlation(model_id, truth, 0.02, 10);
        perturbed_start(&mut correlation);
        let config = correlation.fit_config();

        let json = serde_json::to_string(&config).unwrap();
        let mut restored = synthetic_correlation(model_id, truth, 0.02, 10);
        restored
            .apply_fit_config(&serde_json::from_str(&json).unwrap(), ModelRegistry::builtin())
            .unwrap();
        assert_eq!(restored.fit_parameters(), correlation.fit_parameters());

        let fitter = Fitter::default();
        let expected = fitter.fit(&mut correlation).unwrap();
        let actual = fitter.fit(&mut restored).unwrap();
        assert_eq!(actual.chi2, expected.chi2);
        assert_eq!(restored.fit_parameters(), correlation.fit_parameters());
    }

    /// Records the start vector of every call and returns it unchanged
    struct Recorder(std::sync::Mutex<Vec<Vec<f64>>>);

    impl CurveFitTrait for Recorder {
        fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], _bounds: &[Bound]) -> CurveFitResult {
            self.0.lock().unwrap().push(x0.to_vec());
            CurveFitResult {
                x: x0.to_vec(),
                cost: objective.residuals(x0).mapv(|r| r * r).sum(),
                success: true,
                evaluations: 1,
            }
        }
    }

    #[test]
    fn stuck_parameters_are_halved() {
        let recorder = std::sync::Arc::new(Recorder(Default::default()));
        let registry = AlgorithmRegistry::empty().with("recorder", RecorderHandle(recorder.clone()));
        let fitter = Fitter::new(registry, FitOptions::default());

        let (model_id, truth) = TRUTHS[0];
        let mut correlation = synthetic_correlation(model_id, truth, 0.0, 0);
        correlation.set_fit_algorithm("recorder");
        correlation.set_fit_parameters(&[8.0, 0.4, 0.0]).unwrap();
        let results = fitter.fit(&mut correlation).unwrap();

        let starts = recorder.0.lock().unwrap().clone();
        assert_eq!(results.attempts, 5);
        assert_eq!(starts.len(), 5);
        assert_eq!(starts[0], vec![8.0, 0.4]);
        assert_eq!(starts[1], vec![4.0, 0.2]);
        assert_eq!(starts[4], vec![0.5, 0.025]);
        let stuck = results
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::StuckParameters { .. }))
            .count();
        assert_eq!(stuck, 4);
    }

    struct RecorderHandle(std::sync::Arc<Recorder>);

    impl CurveFitTrait for RecorderHandle {
        fn curve_fit(&self, objective: &dyn Objective, x0: &[f64], bounds: &[Bound]) -> CurveFitResult {
            self.0.curve_fit(objective, x0, bounds)
        }
    }
}
