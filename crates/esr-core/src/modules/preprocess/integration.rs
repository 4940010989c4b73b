use super::describe;
use crate::domain::{DomainKind, EsrError, EsrResult, Spectrum};
use crate::numerics::polynomial::PolynomialFitError;
use crate::numerics::{
    cumulative_trapezoid, fit_polynomial, gradient, mean, root_mean_square, trapezoid,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TAIL_FRACTION: f64 = 0.05;

/// How the secondary background is estimated on the once-integrated
/// (absorption) trace before the second integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackgroundPolicy {
    None,
    /// Straight line through the first and last absorption points.
    Endpoints,
    /// Least-squares line over both tails.
    LinearTails { tail_fraction: f64 },
    /// Least-squares polynomial of `order` over both tails.
    PolynomialTails { order: usize, tail_fraction: f64 },
}

impl Default for BackgroundPolicy {
    fn default() -> Self {
        Self::LinearTails {
            tail_fraction: DEFAULT_TAIL_FRACTION,
        }
    }
}

impl BackgroundPolicy {
    fn tail_fraction(&self) -> f64 {
        match self {
            Self::None | Self::Endpoints => DEFAULT_TAIL_FRACTION,
            Self::LinearTails { tail_fraction } | Self::PolynomialTails { tail_fraction, .. } => {
                *tail_fraction
            }
        }
    }
}

/// Every intermediate of a double integration, aligned to `field`, so callers
/// can judge how much the area depends on the background estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaIntegration {
    pub policy: BackgroundPolicy,
    pub field: Vec<f64>,
    pub absorption: Vec<f64>,
    pub background: Vec<f64>,
    pub corrected_absorption: Vec<f64>,
    /// Points per side used for the tail diagnostics.
    pub tail_points: usize,
    /// RMS of the corrected absorption over both tails.
    pub tail_residual_rms: f64,
    /// Larger of the two tail means of the corrected absorption, in absolute value.
    pub tail_level: f64,
    /// Largest absolute value of the corrected absorption.
    pub absorption_peak: f64,
    pub span: f64,
    pub area: f64,
}

pub fn to_absorption(spectrum: &Spectrum) -> EsrResult<Spectrum> {
    const OPERATION: &str = "to_absorption";
    require_domain(OPERATION, spectrum, DomainKind::Derivative)?;
    let absorption = cumulative_trapezoid(spectrum.field(), spectrum.signal());
    spectrum.derive_signal(OPERATION, "{}", absorption, DomainKind::Absorption)
}

pub fn to_derivative(spectrum: &Spectrum) -> EsrResult<Spectrum> {
    const OPERATION: &str = "to_derivative";
    require_domain(OPERATION, spectrum, DomainKind::Absorption)?;
    let derivative = gradient(spectrum.field(), spectrum.signal());
    spectrum.derive_signal(OPERATION, "{}", derivative, DomainKind::Derivative)
}

/// Double integration over the active region: integrate the derivative to
/// absorption, subtract the background chosen by `policy`, integrate again.
pub fn to_area(spectrum: &Spectrum, policy: &BackgroundPolicy) -> EsrResult<AreaIntegration> {
    const OPERATION: &str = "to_area";
    require_domain(OPERATION, spectrum, DomainKind::Derivative)?;

    let tail_fraction = policy.tail_fraction();
    if !(tail_fraction > 0.0 && tail_fraction < 0.5) {
        return Err(EsrError::parameter(
            OPERATION,
            format!("tail_fraction must lie in (0, 0.5), got {tail_fraction}"),
        ));
    }

    let field = spectrum.active_field().to_vec();
    let signal = spectrum.active_signal();
    let count = field.len();
    if count < 2 {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!("double integration needs at least 2 points, got {count}"),
        ));
    }

    let absorption = cumulative_trapezoid(&field, signal);
    let tail_points = ((count as f64 * tail_fraction).floor() as usize).max(1);
    let tails: Vec<usize> = (0..tail_points)
        .chain(count - tail_points..count)
        .collect();

    let background = match policy {
        BackgroundPolicy::None => vec![0.0; count],
        BackgroundPolicy::Endpoints => {
            let first = absorption[0];
            let slope = (absorption[count - 1] - first) / (field[count - 1] - field[0]);
            field.iter().map(|b| first + slope * (b - field[0])).collect()
        }
        BackgroundPolicy::LinearTails { .. } => {
            tail_background(OPERATION, &field, &absorption, &tails, 1)?
        }
        BackgroundPolicy::PolynomialTails { order, .. } => {
            tail_background(OPERATION, &field, &absorption, &tails, *order)?
        }
    };

    let corrected_absorption: Vec<f64> = absorption
        .iter()
        .zip(&background)
        .map(|(value, background)| value - background)
        .collect();

    let tail_values: Vec<f64> = tails.iter().map(|index| corrected_absorption[*index]).collect();
    let tail_residual_rms = root_mean_square(&tail_values);
    let tail_level = mean(&tail_values[..tail_points])
        .abs()
        .max(mean(&tail_values[tail_points..]).abs());
    let absorption_peak = corrected_absorption
        .iter()
        .fold(0.0_f64, |peak, value| peak.max(value.abs()));
    let area = trapezoid(&field, &corrected_absorption);
    let span = field[count - 1] - field[0];

    tracing::debug!(
        policy = %describe(policy),
        area,
        tail_residual_rms,
        "double integration finished"
    );

    Ok(AreaIntegration {
        policy: *policy,
        field,
        absorption,
        background,
        corrected_absorption,
        tail_points,
        tail_residual_rms,
        tail_level,
        absorption_peak,
        span,
        area,
    })
}

fn tail_background(
    operation: &'static str,
    field: &[f64],
    absorption: &[f64],
    tails: &[usize],
    order: usize,
) -> EsrResult<Vec<f64>> {
    let x: Vec<f64> = tails.iter().map(|index| field[*index]).collect();
    let y: Vec<f64> = tails.iter().map(|index| absorption[*index]).collect();
    let fit = fit_polynomial(&x, &y, order).map_err(|error| match error {
        PolynomialFitError::TooFewPoints { .. } => {
            EsrError::insufficient_data(operation, error.to_string())
        }
        other => EsrError::parameter(operation, other.to_string()),
    })?;
    Ok(fit.evaluate_all(field))
}

fn require_domain(
    operation: &'static str,
    spectrum: &Spectrum,
    expected: DomainKind,
) -> EsrResult<()> {
    if spectrum.domain_kind() != expected {
        return Err(EsrError::domain(
            operation,
            format!(
                "expected a {expected} spectrum, got {}",
                spectrum.domain_kind()
            ),
        ));
    }
    Ok(())
}
