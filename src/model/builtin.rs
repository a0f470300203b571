//! Built-in confocal FCS models
//!
//! Lag times and diffusion times are in milliseconds, countrates in kHz. With
//!
//! $$
//! g_{2D}(\tau) = \frac{1}{1 + \tau/\tau_d},\quad
//! g_{3D}(\tau) = \frac{1}{1 + \tau/\tau_d}\frac{1}{\sqrt{1 + \tau/(SP^2 \tau_d)}},\quad
//! t(\tau) = 1 + \frac{T}{1 - T} e^{-\tau/\tau_{trip}},
//! $$
//!
//! the models are
//!
//! | id   | curve                                                                     |
//! |------|---------------------------------------------------------------------------|
//! | 6001 | `offset + g2D / n`                                                        |
//! | 6012 | `offset + g3D / n`                                                        |
//! | 6011 | `offset + t g3D / n`                                                      |
//! | 6030 | `offset + t (F1 g3D(τ₁) + α² (1 - F1) g3D(τ₂)) / (n (F1 + α (1 - F1))²)`  |

use crate::model::{Constraint, Model, ParameterDef};

pub const MODEL_2D: u32 = 6001;
pub const MODEL_3D: u32 = 6012;
pub const MODEL_3D_TRIPLET: u32 = 6011;
pub const MODEL_3D_3D_TRIPLET: u32 = 6030;

/// Largest triplet fraction the verification leaves in place
const T_MAX: f64 = 0.9999999999;

#[inline]
fn g_2d(tau: f64, tau_diff: f64) -> f64 {
    1.0 / (1.0 + tau / tau_diff)
}

#[inline]
fn g_3d(tau: f64, tau_diff: f64, sp: f64) -> f64 {
    g_2d(tau, tau_diff) / f64::sqrt(1.0 + tau / (sp.powi(2) * tau_diff))
}

#[inline]
fn triplet(tau: f64, t: f64, tau_trip: f64) -> f64 {
    1.0 + t / (1.0 - t) * f64::exp(-tau / tau_trip)
}

fn fraction(x: f64, upper: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else if x > upper {
        upper
    } else {
        x
    }
}

fn abs_at(p: &mut [f64], indices: &[usize]) {
    for &i in indices {
        p[i] = p[i].abs();
    }
}

fn cpp(n: f64, countrate: Option<f64>) -> Vec<(String, f64)> {
    match countrate {
        Some(countrate) => vec![("cpp [kHz]".to_string(), countrate / n)],
        None => vec![],
    }
}

fn cf_gxy(p: &[f64], tau: f64) -> f64 {
    let (n, tau_diff, offset) = (p[0], p[1], p[2]);
    offset + g_2d(tau, tau_diff) / n
}

fn verify_gxy(p: &mut [f64]) {
    abs_at(p, &[0, 1]);
}

fn supplements_gxy(p: &[f64], countrate: Option<f64>) -> Vec<(String, f64)> {
    cpp(p[0], countrate)
}

fn cf_gxyz(p: &[f64], tau: f64) -> f64 {
    let (n, tau_diff, sp, offset) = (p[0], p[1], p[2], p[3]);
    offset + g_3d(tau, tau_diff, sp) / n
}

fn verify_gxyz(p: &mut [f64]) {
    abs_at(p, &[0, 1, 2]);
}

fn cf_gxyz_t(p: &[f64], tau: f64) -> f64 {
    let (n, t, tau_trip, tau_diff, sp, offset) = (p[0], p[1], p[2], p[3], p[4], p[5]);
    offset + triplet(tau, t, tau_trip) * g_3d(tau, tau_diff, sp) / n
}

fn verify_gxyz_t(p: &mut [f64]) {
    abs_at(p, &[0, 2, 3, 4]);
    p[1] = fraction(p[1], T_MAX);
}

fn cf_gxyz_gxyz_t(p: &[f64], tau: f64) -> f64 {
    let (n, tau1, tau2, f1, sp, alpha, tau_trip, t, offset) =
        (p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], p[8]);
    let brightness = f1 + alpha * (1.0 - f1);
    let components = f1 * g_3d(tau, tau1, sp) + alpha.powi(2) * (1.0 - f1) * g_3d(tau, tau2, sp);
    offset + triplet(tau, t, tau_trip) * components / (n * brightness.powi(2))
}

fn verify_gxyz_gxyz_t(p: &mut [f64]) {
    abs_at(p, &[0, 1, 2, 4, 5, 6]);
    p[3] = fraction(p[3], 1.0);
    p[7] = fraction(p[7], T_MAX);
}

fn supplements_gxyz_gxyz_t(p: &[f64], countrate: Option<f64>) -> Vec<(String, f64)> {
    let (n, f1) = (p[0], p[3]);
    let mut values = vec![
        ("n1".to_string(), n * f1),
        ("n2".to_string(), n * (1.0 - f1)),
    ];
    values.extend(cpp(n, countrate));
    values
}

/// All built-in models, in the order of their ids
pub fn models() -> Vec<Model> {
    vec![model_2d(), model_3d_triplet(), model_3d(), model_3d_3d_triplet()]
}

fn model_2d() -> Model {
    Model::builder(MODEL_2D, "2D (Gxy)", cf_gxy)
        .description("Two-dimensional free diffusion with a Gaussian laser profile")
        .parameters([
            ParameterDef::new("n", 4.0, true).positive(),
            ParameterDef::new("τ_diff [ms]", 0.4, true).positive(),
            ParameterDef::new("offset", 0.0, false),
        ])
        .verification(verify_gxy)
        .supplementary(supplements_gxy)
        .build()
        .expect("valid built-in model")
}

fn model_3d() -> Model {
    Model::builder(MODEL_3D, "3D (Gxyz)", cf_gxyz)
        .description("Three-dimensional free diffusion with a Gaussian laser profile")
        .parameters([
            ParameterDef::new("n", 4.0, true).positive(),
            ParameterDef::new("τ_diff [ms]", 0.4, true).positive(),
            ParameterDef::new("SP", 5.0, false).positive(),
            ParameterDef::new("offset", 0.0, false),
        ])
        .verification(verify_gxyz)
        .supplementary(supplements_gxy)
        .build()
        .expect("valid built-in model")
}

fn model_3d_triplet() -> Model {
    Model::builder(MODEL_3D_TRIPLET, "3D+T (Gxyz, triplet)", cf_gxyz_t)
        .description("Three-dimensional free diffusion with a triplet component")
        .parameters([
            ParameterDef::new("n", 4.0, true).positive(),
            ParameterDef::new("T", 0.2, true).bounded(0.0, 1.0),
            ParameterDef::new("τ_trip [ms]", 0.001, true).positive(),
            ParameterDef::new("τ_diff [ms]", 0.4, true).positive(),
            ParameterDef::new("SP", 5.0, false).positive(),
            ParameterDef::new("offset", 0.0, false),
        ])
        .constraint(Constraint::less(2, 3))
        .verification(verify_gxyz_t)
        .supplementary(supplements_gxy)
        .build()
        .expect("valid built-in model")
}

fn model_3d_3d_triplet() -> Model {
    Model::builder(MODEL_3D_3D_TRIPLET, "3D+3D+T (Gxyz, two components, triplet)", cf_gxyz_gxyz_t)
        .description("Two freely diffusing species in three dimensions with a triplet component")
        .parameters([
            ParameterDef::new("n", 25.0, true).positive(),
            ParameterDef::new("τ₁ [ms]", 5.0, true).positive(),
            ParameterDef::new("τ₂ [ms]", 1000.0, true).positive(),
            ParameterDef::new("F1", 0.45, true).bounded(0.0, 1.0),
            ParameterDef::new("SP", 5.0, false).positive(),
            ParameterDef::new("α", 1.0, false).positive(),
            ParameterDef::new("τ_trip [ms]", 0.001, true).positive(),
            ParameterDef::new("T", 0.01, true).bounded(0.0, 1.0),
            ParameterDef::new("offset", 0.0, false),
        ])
        .constraint(Constraint::less(6, 1))
        .constraint(Constraint::less(1, 2))
        .verification(verify_gxyz_gxyz_t)
        .supplementary(supplements_gxyz_gxyz_t)
        .build()
        .expect("valid built-in model")
}
