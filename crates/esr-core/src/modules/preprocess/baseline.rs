use super::describe;
use crate::domain::{EsrError, EsrResult, Spectrum};
use crate::numerics::polynomial::{PolynomialFit, PolynomialFitError};
use crate::numerics::spline::SplineError;
use crate::numerics::{
    NaturalCubicSpline, fit_polynomial, fit_polynomial_soft_l1, fit_smoothing_spline, mean,
    median, scaled_mad,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_POLYNOMIAL_ORDER: usize = 5;

const OPERATION: &str = "remove_baseline";
const HAMPEL_HALF_WINDOW: usize = 3;
const HAMPEL_THRESHOLD: f64 = 3.0;
const MIN_SMOOTHING_POINTS: usize = 4;

type PolynomialFitter = fn(&[f64], &[f64], usize) -> Result<PolynomialFit, PolynomialFitError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BaselineMethod {
    /// Least-squares polynomial in field over the points outside the region
    /// of interest (the whole trace when no region is set).
    Polynomial { order: usize },
    /// Polynomial under a soft-L1 loss, so isolated spikes among the
    /// baseline points do not pull the curve.
    RobustPolynomial { order: usize },
    /// Natural cubic spline through locally averaged anchor points.
    Spline { anchors: SplineAnchors },
    /// Cubic smoothing spline through the despiked baseline points.
    /// `smoothing` is the residual sum of squares to allow; the default is
    /// `n * sigma^2` with sigma estimated from second differences.
    SmoothingSpline {
        #[serde(default)]
        smoothing: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplineAnchors {
    /// Anchor fields in tesla.
    Explicit(Vec<f64>),
    /// `count` anchors spread evenly over the points outside the region.
    Auto { count: usize },
}

/// Baseline curve on the full field axis, for inspection before removal.
pub fn estimate_baseline(spectrum: &Spectrum, method: &BaselineMethod) -> EsrResult<Vec<f64>> {
    match method {
        BaselineMethod::Polynomial { order } => {
            polynomial_baseline(spectrum, *order, fit_polynomial)
        }
        BaselineMethod::RobustPolynomial { order } => {
            polynomial_baseline(spectrum, *order, fit_polynomial_soft_l1)
        }
        BaselineMethod::Spline { anchors } => spline_baseline(spectrum, anchors),
        BaselineMethod::SmoothingSpline { smoothing } => {
            smoothing_spline_baseline(spectrum, *smoothing)
        }
    }
}

pub fn remove_baseline(spectrum: &Spectrum, method: &BaselineMethod) -> EsrResult<Spectrum> {
    let baseline = estimate_baseline(spectrum, method)?;
    let corrected: Vec<f64> = spectrum
        .signal()
        .iter()
        .zip(&baseline)
        .map(|(signal, baseline)| signal - baseline)
        .collect();
    spectrum.derive_signal(OPERATION, describe(method), corrected, spectrum.domain_kind())
}

fn baseline_points(spectrum: &Spectrum) -> (Vec<f64>, Vec<f64>) {
    spectrum
        .field()
        .iter()
        .zip(spectrum.signal())
        .zip(spectrum.outside_region_mask())
        .filter(|(_, outside)| *outside)
        .map(|((field, signal), _)| (*field, *signal))
        .unzip()
}

fn polynomial_baseline(
    spectrum: &Spectrum,
    order: usize,
    fitter: PolynomialFitter,
) -> EsrResult<Vec<f64>> {
    if order > MAX_POLYNOMIAL_ORDER {
        return Err(EsrError::parameter(
            OPERATION,
            format!("polynomial order must be within 0..={MAX_POLYNOMIAL_ORDER}, got {order}"),
        ));
    }

    let (field, signal) = baseline_points(spectrum);
    let required = order + 2;
    if field.len() < required {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!(
                "polynomial order {order} needs at least {required} baseline points, got {}",
                field.len()
            ),
        ));
    }

    let fit = fitter(&field, &signal, order).map_err(|error| match error {
        PolynomialFitError::TooFewPoints { .. } => {
            EsrError::insufficient_data(OPERATION, error.to_string())
        }
        other => EsrError::parameter(OPERATION, other.to_string()),
    })?;
    debug!(order, points = field.len(), "polynomial baseline fitted");
    Ok(fit.evaluate_all(spectrum.field()))
}

fn spline_baseline(spectrum: &Spectrum, anchors: &SplineAnchors) -> EsrResult<Vec<f64>> {
    let knots = match anchors {
        SplineAnchors::Explicit(fields) => explicit_anchors(spectrum, fields)?,
        SplineAnchors::Auto { count } => auto_anchors(spectrum, *count)?,
    };

    let mask = spectrum.outside_region_mask();
    let half_window = (spectrum.len() / (4 * knots.len())).max(1);
    let values: Vec<f64> = knots
        .iter()
        .map(|knot| local_mean(spectrum, &mask, *knot, half_window))
        .collect();

    let spline = NaturalCubicSpline::new(knots, values)
        .map_err(|error| EsrError::parameter(OPERATION, error.to_string()))?;
    Ok(spline.evaluate_all(spectrum.field()))
}

fn smoothing_spline_baseline(spectrum: &Spectrum, smoothing: Option<f64>) -> EsrResult<Vec<f64>> {
    let (field, signal) = baseline_points(spectrum);
    if let Some(value) = smoothing.filter(|value| !value.is_finite() || *value < 0.0) {
        return Err(EsrError::parameter(
            OPERATION,
            format!("smoothing must be finite and >= 0, got {value}"),
        ));
    }
    if field.len() < MIN_SMOOTHING_POINTS {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!(
                "smoothing spline needs at least {MIN_SMOOTHING_POINTS} baseline points, got {}",
                field.len()
            ),
        ));
    }

    let despiked = hampel_filter(&signal);
    let target = match smoothing {
        Some(value) => value,
        None => {
            let sigma = second_difference_noise(&despiked);
            field.len() as f64 * sigma * sigma
        }
    };
    let spline = fit_smoothing_spline(&field, &despiked, target).map_err(|error| match error {
        SplineError::TooFewSmoothingPoints { .. } => {
            EsrError::insufficient_data(OPERATION, error.to_string())
        }
        other => EsrError::parameter(OPERATION, other.to_string()),
    })?;
    debug!(points = field.len(), target, "smoothing spline baseline fitted");
    Ok(spline.evaluate_all(spectrum.field()))
}

/// Replaces each value lying more than `HAMPEL_THRESHOLD` scaled MADs from
/// the median of its neighbourhood with that median.
fn hampel_filter(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|index| {
            let start = index.saturating_sub(HAMPEL_HALF_WINDOW);
            let end = (index + HAMPEL_HALF_WINDOW + 1).min(values.len());
            let window = &values[start..end];
            let center = median(window);
            if (values[index] - center).abs() > HAMPEL_THRESHOLD * scaled_mad(window) {
                center
            } else {
                values[index]
            }
        })
        .collect()
}

/// Noise level from second differences, which cancel slow drift. The second
/// difference of white noise has variance `6 sigma^2`.
fn second_difference_noise(values: &[f64]) -> f64 {
    let differences: Vec<f64> = values
        .windows(3)
        .map(|triple| triple[0] - 2.0 * triple[1] + triple[2])
        .collect();
    scaled_mad(&differences) / 6.0_f64.sqrt()
}

fn explicit_anchors(spectrum: &Spectrum, fields: &[f64]) -> EsrResult<Vec<f64>> {
    if fields.len() < 2 {
        return Err(EsrError::parameter(
            OPERATION,
            format!("spline baseline needs at least 2 anchors, got {}", fields.len()),
        ));
    }

    let range = spectrum.field_range();
    if let Some(outside) = fields
        .iter()
        .find(|field| !field.is_finite() || !range.contains(**field))
    {
        return Err(EsrError::range(
            OPERATION,
            format!(
                "anchor {outside} T lies outside the trace [{}, {}] T",
                range.min_t, range.max_t
            ),
        ));
    }

    let mut sorted = fields.to_vec();
    sorted.sort_by(f64::total_cmp);
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(EsrError::parameter(
            OPERATION,
            format!("duplicate spline anchor at {} T", pair[0]),
        ));
    }
    Ok(sorted)
}

fn auto_anchors(spectrum: &Spectrum, count: usize) -> EsrResult<Vec<f64>> {
    if count < 2 {
        return Err(EsrError::parameter(
            OPERATION,
            format!("spline baseline needs at least 2 anchors, got {count}"),
        ));
    }

    let (field, _) = baseline_points(spectrum);
    if field.len() < count {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!(
                "{count} anchors requested but only {} baseline points are available",
                field.len()
            ),
        ));
    }

    let last = field.len() - 1;
    let mut anchors: Vec<f64> = (0..count)
        .map(|slot| {
            let position = (slot as f64 * last as f64 / (count - 1) as f64).round() as usize;
            field[position.min(last)]
        })
        .collect();
    anchors.dedup();
    if anchors.len() < 2 {
        return Err(EsrError::insufficient_data(
            OPERATION,
            "automatic anchors collapsed to a single field value",
        ));
    }
    Ok(anchors)
}

/// Mean signal around `knot`, preferring points outside the region of
/// interest; falls back to every point in the window.
fn local_mean(spectrum: &Spectrum, mask: &[bool], knot: f64, half_window: usize) -> f64 {
    let field = spectrum.field();
    let signal = spectrum.signal();
    let nearest = nearest_index(field, knot);
    let start = nearest.saturating_sub(half_window);
    let end = (nearest + half_window + 1).min(field.len());

    let outside: Vec<f64> = (start..end)
        .filter(|index| mask[*index])
        .map(|index| signal[index])
        .collect();
    if outside.is_empty() {
        mean(&signal[start..end])
    } else {
        mean(&outside)
    }
}

fn nearest_index(field: &[f64], value: f64) -> usize {
    let upper = field.partition_point(|candidate| *candidate < value);
    if upper == 0 {
        return 0;
    }
    if upper >= field.len() {
        return field.len() - 1;
    }
    if (value - field[upper - 1]) <= (field[upper] - value) {
        upper - 1
    } else {
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::{BaselineMethod, SplineAnchors, estimate_baseline, remove_baseline};
    use crate::domain::{EsrErrorKind, Spectrum, SpectrumMetadata};
    use crate::modules::preprocess::select_region;
    use crate::numerics::{linear_grid, root_mean_square};

    fn with_signal(spectrum: &Spectrum, signal: Vec<f64>) -> Spectrum {
        Spectrum::derivative(spectrum.field().to_vec(), signal, SpectrumMetadata::default())
            .expect("valid trace")
    }

    fn worst_deviation(estimate: &[f64], truth: &[f64]) -> f64 {
        estimate
            .iter()
            .zip(truth)
            .map(|(lhs, rhs)| (lhs - rhs).abs())
            .fold(0.0, f64::max)
    }

    fn drifting(count: usize) -> Spectrum {
        let field = linear_grid(0.33, 0.35, count).expect("grid");
        let signal = field
            .iter()
            .map(|b| {
                let x = (b - 0.34) * 100.0;
                0.5 + 0.2 * x - 0.3 * x * x
            })
            .collect();
        Spectrum::derivative(field, signal, SpectrumMetadata::default()).expect("valid trace")
    }

    #[test]
    fn polynomial_baseline_removes_quadratic_drift() {
        let corrected = remove_baseline(&drifting(201), &BaselineMethod::Polynomial { order: 2 })
            .expect("baseline removal");
        assert!(root_mean_square(corrected.signal()) < 1.0e-9);
        assert_eq!(corrected.provenance().steps[0].operation, "remove_baseline");
        assert!(
            corrected.provenance().steps[0]
                .parameters
                .contains("\"polynomial\"")
        );
    }

    #[test]
    fn polynomial_baseline_ignores_the_region_of_interest() {
        let spectrum = drifting(201);
        let mut signal = spectrum.signal().to_vec();
        for (value, field) in signal.iter_mut().zip(spectrum.field()) {
            if (0.338..=0.342).contains(field) {
                *value += 5.0;
            }
        }
        let bumped = Spectrum::derivative(
            spectrum.field().to_vec(),
            signal,
            SpectrumMetadata::default(),
        )
        .expect("valid trace");
        let region = select_region(&bumped, 0.3379, 0.3421).expect("region");
        let baseline = estimate_baseline(&region, &BaselineMethod::Polynomial { order: 2 })
            .expect("baseline");
        for (estimate, expected) in baseline.iter().zip(spectrum.signal()) {
            assert!((estimate - expected).abs() < 1.0e-9);
        }
    }

    #[test]
    fn polynomial_order_limits_are_enforced() {
        let tiny = Spectrum::derivative(
            vec![0.33, 0.34, 0.35],
            vec![1.0, 2.0, 1.5],
            SpectrumMetadata::default(),
        )
        .expect("valid trace");
        let error = remove_baseline(&tiny, &BaselineMethod::Polynomial { order: 4 })
            .expect_err("three points cannot support order 4");
        assert_eq!(error.kind(), EsrErrorKind::InsufficientData);

        let error = remove_baseline(&drifting(50), &BaselineMethod::Polynomial { order: 6 })
            .expect_err("order above 5");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
    }

    #[test]
    fn spline_baseline_follows_smooth_drift() {
        let spectrum = drifting(401);
        let before = root_mean_square(spectrum.signal());
        let corrected = remove_baseline(
            &spectrum,
            &BaselineMethod::Spline {
                anchors: SplineAnchors::Auto { count: 9 },
            },
        )
        .expect("spline baseline");
        assert!(root_mean_square(corrected.signal()) < 0.05 * before);
    }

    #[test]
    fn spline_anchor_validation() {
        let spectrum = drifting(101);
        let cases = [
            (SplineAnchors::Explicit(vec![0.34]), EsrErrorKind::Parameter),
            (SplineAnchors::Explicit(vec![0.33, 0.36]), EsrErrorKind::Range),
            (
                SplineAnchors::Explicit(vec![0.335, 0.34, 0.335]),
                EsrErrorKind::Parameter,
            ),
            (SplineAnchors::Auto { count: 1 }, EsrErrorKind::Parameter),
        ];
        for (anchors, kind) in cases {
            let error = estimate_baseline(&spectrum, &BaselineMethod::Spline { anchors })
                .expect_err("invalid anchors");
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn robust_polynomial_ignores_a_spike_among_baseline_points() {
        let clean = drifting(201);
        let mut signal = clean.signal().to_vec();
        signal[30] += 50.0;
        let spiked = with_signal(&clean, signal);

        let plain = estimate_baseline(&spiked, &BaselineMethod::Polynomial { order: 2 })
            .expect("least-squares baseline");
        assert!(worst_deviation(&plain, clean.signal()) > 0.05);

        let robust = estimate_baseline(&spiked, &BaselineMethod::RobustPolynomial { order: 2 })
            .expect("robust baseline");
        assert!(worst_deviation(&robust, clean.signal()) < 1.0e-6);

        let error = estimate_baseline(&spiked, &BaselineMethod::RobustPolynomial { order: 6 })
            .expect_err("order above 5");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
    }

    #[test]
    fn smoothing_spline_rides_through_noise_and_a_spike() {
        let clean = drifting(401);
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut uniform = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            2.0 * ((state >> 11) as f64 / (1_u64 << 53) as f64) - 1.0
        };
        // Sum of four uniforms: close to normal, sigma = 0.01 * sqrt(4 / 3).
        let mut signal: Vec<f64> = clean
            .signal()
            .iter()
            .map(|value| value + 0.01 * (0..4).map(|_| uniform()).sum::<f64>())
            .collect();
        signal[120] += 2.0;
        let noisy = with_signal(&clean, signal);

        let method = BaselineMethod::SmoothingSpline { smoothing: None };
        let baseline = estimate_baseline(&noisy, &method).expect("smoothing spline baseline");
        assert!(worst_deviation(&baseline, clean.signal()) < 0.03);
        let residual: Vec<f64> = baseline
            .iter()
            .zip(clean.signal())
            .map(|(lhs, rhs)| lhs - rhs)
            .collect();
        assert!(root_mean_square(&residual) < 0.0075);
    }

    #[test]
    fn smoothing_spline_validation() {
        let error = estimate_baseline(
            &drifting(50),
            &BaselineMethod::SmoothingSpline {
                smoothing: Some(-1.0),
            },
        )
        .expect_err("negative smoothing");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);

        let tiny = Spectrum::derivative(
            vec![0.33, 0.34, 0.35],
            vec![1.0, 2.0, 1.5],
            SpectrumMetadata::default(),
        )
        .expect("valid trace");
        let error = estimate_baseline(&tiny, &BaselineMethod::SmoothingSpline { smoothing: None })
            .expect_err("three points");
        assert_eq!(error.kind(), EsrErrorKind::InsufficientData);
    }

    #[test]
    fn smoothing_spline_recipe_field_is_optional() {
        let method: BaselineMethod =
            serde_json::from_str(r#"{"method":"smoothing_spline"}"#).expect("parse");
        assert_eq!(method, BaselineMethod::SmoothingSpline { smoothing: None });
        let method: BaselineMethod =
            serde_json::from_str(r#"{"method":"robust_polynomial","order":1}"#).expect("parse");
        assert_eq!(method, BaselineMethod::RobustPolynomial { order: 1 });
    }
}
