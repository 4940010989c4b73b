use esr_core::common::constants::{BOHR_MAGNETON_J_PER_T, PLANCK_J_S, REDUCED_PLANCK_J_S};
use esr_core::modules::fitting::{FitConfig, LineShape, fit_spectrum};
use esr_core::modules::physics::{PhysicsOptions, extract_physics, g_factor};
use esr_core::modules::preprocess::{
    BackgroundPolicy, BaselineMethod, remove_baseline, select_region, subset, to_absorption,
    to_derivative,
};
use esr_core::modules::quantitation::{
    DEFAULT_QUALITY_THRESHOLD, ReferenceStandard, SampleNormalization, calibrate,
    double_integrate,
};
use esr_core::numerics::linear_grid;
use esr_core::{EsrErrorKind, Spectrum, SpectrumMetadata};

const X_BAND_HZ: f64 = 9.5e9;

/// Deterministic zero-mean noise in [-amplitude, amplitude].
fn pseudo_noise(count: usize, amplitude: f64) -> Vec<f64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 11) as f64 / (1_u64 << 53) as f64;
            amplitude * (2.0 * unit - 1.0)
        })
        .collect()
}

fn synthetic(
    shape: LineShape,
    lines: &[(f64, f64, f64)],
    noise: f64,
    metadata: SpectrumMetadata,
) -> Spectrum {
    let profile = shape.profile("scenario").expect("profile");
    let field = linear_grid(0.330, 0.350, 2001).expect("grid");
    let noise = pseudo_noise(field.len(), noise);
    let signal = field
        .iter()
        .zip(&noise)
        .map(|(b, noise)| {
            lines
                .iter()
                .map(|(center, width, amplitude)| {
                    amplitude * profile.derivative(b - center, *width, 0.0)
                })
                .sum::<f64>()
                + noise
        })
        .collect();
    Spectrum::derivative(field, signal, metadata).expect("valid trace")
}

#[test]
fn subset_is_idempotent() {
    let spectrum = synthetic(
        LineShape::Lorentzian,
        &[(0.34, 1.0e-3, 1.0)],
        0.0,
        SpectrumMetadata::default(),
    );
    let once = subset(&spectrum, 0.335, 0.345).expect("subset");
    let twice = subset(&once, 0.335, 0.345).expect("subset");
    assert_eq!(once.field(), twice.field());
    assert_eq!(once.signal(), twice.signal());
}

#[test]
fn integration_round_trip_recovers_derivative() {
    let spectrum = synthetic(
        LineShape::Gaussian,
        &[(0.34, 2.0e-3, 1.0)],
        0.0,
        SpectrumMetadata::default(),
    );
    let absorption = to_absorption(&spectrum).expect("integrate");
    let restored = to_derivative(&absorption).expect("differentiate");
    let worst = restored
        .signal()
        .iter()
        .zip(spectrum.signal())
        .map(|(restored, original)| (restored - original).abs())
        .fold(0.0_f64, f64::max);
    assert!(worst < 1.0e-2, "worst deviation {worst}");
}

#[test]
fn lorentzian_and_gaussian_linewidth_conventions() {
    let width = 1.0e-3;
    for (shape, factor) in [
        (LineShape::Lorentzian, 3.0_f64.sqrt()),
        (LineShape::Gaussian, 1.177),
    ] {
        let spectrum = synthetic(shape, &[(0.34, width, 1.0)], 0.0, SpectrumMetadata::default());
        let fit = fit_spectrum(&spectrum, &FitConfig::new(shape, 1)).expect("fit");
        let line = &fit.components[0];
        assert!((line.hwhm_t - factor * width).abs() / (factor * width) < 1.0e-3, "{shape:?}");
        assert!((line.fwhm_t - 2.0 * factor * width).abs() / (factor * width) < 2.0e-3);
    }
}

#[test]
fn g_factor_of_dpph_like_line() {
    let center = PLANCK_J_S * X_BAND_HZ / (BOHR_MAGNETON_J_PER_T * 2.0036);
    assert!((g_factor(X_BAND_HZ, center).expect("g") - 2.0036).abs() / 2.0036 < 1.0e-3);

    let spectrum = synthetic(
        LineShape::Lorentzian,
        &[(center, 1.5e-4, 1.0)],
        0.0,
        SpectrumMetadata::default().with_frequency_hz(X_BAND_HZ),
    );
    let fit = fit_spectrum(&spectrum, &FitConfig::new(LineShape::Lorentzian, 1)).expect("fit");
    let physics =
        extract_physics(&fit, spectrum.metadata(), &PhysicsOptions::default()).expect("physics");
    assert!((physics.g_factor - 2.0036).abs() / 2.0036 < 1.0e-3);

    // T2 = 1 / (gamma * sqrt(3) * dBpp) for a Lorentzian line.
    let t2 = physics.t2_seconds.expect("t2 for a Lorentzian line");
    let gamma = physics.g_factor * BOHR_MAGNETON_J_PER_T / REDUCED_PLANCK_J_S;
    let product = t2 * gamma * 3.0_f64.sqrt() * 1.5e-4;
    assert!((product - 1.0).abs() < 1.0e-3, "T2 * gamma * sqrt(3) dBpp = {product}");
}

#[test]
fn baseline_removal_then_fit_recovers_gaussian() {
    let (center, width) = (0.3402, 1.0e-3);
    let clean = synthetic(
        LineShape::Gaussian,
        &[(center, width, 1.0)],
        0.05,
        SpectrumMetadata::default(),
    );
    let drifting_signal: Vec<f64> = clean
        .field()
        .iter()
        .zip(clean.signal())
        .map(|(b, value)| {
            let x = (b - 0.34) / 0.01;
            value + 0.4 - 0.8 * x + 1.5 * x * x
        })
        .collect();
    let drifting = Spectrum::derivative(
        clean.field().to_vec(),
        drifting_signal,
        SpectrumMetadata::default(),
    )
    .expect("valid trace");

    let region = select_region(&drifting, 0.336, 0.344).expect("region");
    let corrected =
        remove_baseline(&region, &BaselineMethod::Polynomial { order: 2 }).expect("baseline");
    let fit = fit_spectrum(&corrected, &FitConfig::new(LineShape::Gaussian, 1)).expect("fit");
    let line = &fit.components[0];
    assert!((line.center_field_t - center).abs() / center < 1.0e-2);
    assert!((line.peak_to_peak_width_t - width).abs() / width < 1.0e-2);
}

#[test]
fn two_overlapping_lorentzians() {
    let width: f64 = 1.0e-3;
    let combined_half_width = 2.0 * 0.5 * 3.0_f64.sqrt() * width;
    let first = 0.34 - 1.5 * combined_half_width;
    let second = 0.34 + 1.5 * combined_half_width;
    let spectrum = synthetic(
        LineShape::Lorentzian,
        &[(first, width, 1.0), (second, width, 0.7)],
        0.01,
        SpectrumMetadata::default(),
    );
    let fit = fit_spectrum(&spectrum, &FitConfig::new(LineShape::Lorentzian, 2)).expect("fit");
    let mut centers: Vec<f64> = fit.components.iter().map(|line| line.center_field_t).collect();
    centers.sort_by(f64::total_cmp);
    assert!((centers[0] - first).abs() / first < 2.0e-2);
    assert!((centers[1] - second).abs() / second < 2.0e-2);
    for index in 0..fit.n_parameters {
        let variance = fit.covariance[index][index];
        assert!(variance.is_finite() && variance > 0.0, "{}", fit.parameter_labels[index]);
    }
}

#[test]
fn high_order_baseline_on_three_points_is_insufficient_data() {
    let spectrum = Spectrum::derivative(
        vec![0.339, 0.340, 0.341],
        vec![0.1, 0.0, -0.1],
        SpectrumMetadata::default(),
    )
    .expect("valid trace");
    let error = remove_baseline(&spectrum, &BaselineMethod::Polynomial { order: 4 })
        .expect_err("too few points");
    assert_eq!(error.kind(), EsrErrorKind::InsufficientData);
}

#[test]
fn doubled_sample_area_gives_doubled_spin_count() {
    let reference_trace = synthetic(
        LineShape::Gaussian,
        &[(0.34, 1.0e-3, 1.0)],
        0.0,
        SpectrumMetadata::default(),
    );
    let sample_trace = synthetic(
        LineShape::Gaussian,
        &[(0.34, 1.0e-3, 2.0)],
        0.0,
        SpectrumMetadata::default(),
    );
    let policy = BackgroundPolicy::default();
    let reference_integral =
        double_integrate(&reference_trace, &policy, DEFAULT_QUALITY_THRESHOLD).expect("reference");
    let sample_integral =
        double_integrate(&sample_trace, &policy, DEFAULT_QUALITY_THRESHOLD).expect("sample");

    let reference = ReferenceStandard {
        id: "reference".to_string(),
        area: reference_integral.area,
        area_uncertainty: reference_integral.area_uncertainty,
        spin_count: 1.0,
        spin_count_uncertainty: None,
        normalization: SampleNormalization::default(),
    };
    let result = calibrate(&sample_integral, &reference, &SampleNormalization::default())
        .expect("calibrate");
    let bound = result.spin_count_uncertainty.max(1.0e-9);
    assert!((result.calibrated_spin_count - 2.0).abs() <= bound);
}
