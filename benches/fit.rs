use criterion::Criterion;
use fcs_fit::model::builtin::{MODEL_2D, MODEL_3D_3D_TRIPLET, MODEL_3D_TRIPLET};
use fcs_fit::{Correlation, Fitter, ModelRegistry, compute_weights};
use fcs_fit_test_util::{LAG_TIME, SyntheticCurve};
use rand::prelude::*;
use std::hint::black_box;

fn noisy_correlation(model_id: u32, truth: &[f64]) -> Correlation {
    let model = ModelRegistry::builtin().model(model_id).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let curve = SyntheticCurve::noiseless(|tau| model.value(truth, tau), &LAG_TIME)
        .with_noise(0.02, &mut rng);
    let mut correlation = Correlation::new("AC1", model)
        .with_data(curve.data())
        .unwrap();
    correlation.set_weights("noise", curve.sigma).unwrap();
    correlation.set_fit_weight_type("noise").unwrap();
    correlation
}

pub fn bench_fit_builtin_models(c: &mut Criterion) {
    let cases: [(&str, u32, &[f64]); 3] = [
        ("2D fit: Lev-Mar", MODEL_2D, &[6.0, 0.25, 0.0]),
        (
            "3D+T fit: Lev-Mar",
            MODEL_3D_TRIPLET,
            &[5.0, 0.2, 0.005, 0.3, 5.0, 0.0],
        ),
        (
            "3D+3D+T fit: Lev-Mar",
            MODEL_3D_3D_TRIPLET,
            &[25.0, 0.5, 20.0, 0.4, 5.0, 1.0, 0.005, 0.1, 0.0],
        ),
    ];
    let fitter = Fitter::default();
    for (name, model_id, truth) in cases {
        let correlation = noisy_correlation(model_id, truth);
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut correlation = correlation.clone();
                let _ = fitter.fit(black_box(&mut correlation));
            });
        });
    }
}

pub fn bench_weights(c: &mut Criterion) {
    let mut correlation = noisy_correlation(MODEL_2D, &[6.0, 0.25, 0.0]);
    for weight_type in ["spline5", "model function"] {
        correlation.set_fit_weight_type(weight_type).unwrap();
        c.bench_function(&format!("Weights: {weight_type}"), |b| {
            b.iter(|| compute_weights(black_box(&correlation)));
        });
    }
}
