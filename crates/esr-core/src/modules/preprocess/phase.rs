use super::describe;
use crate::domain::{DomainKind, EsrError, EsrResult, Spectrum};
use crate::numerics::{analytic_signal, cumulative_trapezoid, golden_section_minimize, trapezoid};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PhaseMode {
    Fixed { delta_rad: f64 },
    Auto(PhaseSearch),
}

/// Bracket and stopping rule for the automatic phase search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSearch {
    pub lower_rad: f64,
    pub upper_rad: f64,
    pub tolerance_rad: f64,
    pub max_iterations: usize,
}

impl Default for PhaseSearch {
    fn default() -> Self {
        Self {
            lower_rad: 0.0,
            upper_rad: FRAC_PI_2,
            tolerance_rad: 1.0e-8,
            max_iterations: 200,
        }
    }
}

impl PhaseSearch {
    fn validate(&self, operation: &'static str) -> EsrResult<()> {
        if !self.lower_rad.is_finite()
            || !self.upper_rad.is_finite()
            || self.lower_rad >= self.upper_rad
        {
            return Err(EsrError::parameter(
                operation,
                format!(
                    "phase search bracket must be finite with lower < upper, got [{}, {}]",
                    self.lower_rad, self.upper_rad
                ),
            ));
        }
        if !self.tolerance_rad.is_finite() || self.tolerance_rad <= 0.0 {
            return Err(EsrError::parameter(
                operation,
                format!("phase tolerance must be > 0, got {}", self.tolerance_rad),
            ));
        }
        if self.max_iterations == 0 {
            return Err(EsrError::parameter(
                operation,
                "phase search needs at least one iteration",
            ));
        }
        Ok(())
    }
}

/// Rotate the analytic signal `s + i H[s]` by `-delta` and keep the real
/// part. The applied angle accumulates into `metadata.phase_rad`.
pub fn phase_correct(spectrum: &Spectrum, mode: &PhaseMode) -> EsrResult<Spectrum> {
    const OPERATION: &str = "phase_correct";
    let delta = match mode {
        PhaseMode::Fixed { delta_rad } => {
            if !delta_rad.is_finite() {
                return Err(EsrError::parameter(
                    OPERATION,
                    format!("phase angle must be finite, got {delta_rad}"),
                ));
            }
            *delta_rad
        }
        PhaseMode::Auto(search) => find_auto_phase(spectrum, search)?,
    };

    let (cos, sin) = (delta.cos(), delta.sin());
    let rotated: Vec<f64> = analytic_signal(spectrum.signal())
        .into_iter()
        .map(|value| value.re * cos + value.im * sin)
        .collect();

    let mut metadata = spectrum.metadata().clone();
    metadata.phase_rad = Some(metadata.phase_rad.unwrap_or(0.0) + delta);

    let parameters = describe(&serde_json::json!({ "mode": mode, "applied_rad": delta }));
    Ok(spectrum
        .derive_signal(OPERATION, parameters, rotated, spectrum.domain_kind())?
        .with_metadata(metadata))
}

/// Phase angle that removes absorption from the quadrature channel.
///
/// For a correctly phased derivative line the quadrature channel is the
/// dispersion derivative, whose first integral (after removing the chord
/// between its end points) has zero net area. Rotation by `delta` mixes the
/// two channels linearly, so the residual area is
/// `A_H cos(delta) - A_s sin(delta)`; its square is minimized over the
/// search bracket.
pub fn find_auto_phase(spectrum: &Spectrum, search: &PhaseSearch) -> EsrResult<f64> {
    const OPERATION: &str = "find_auto_phase";
    search.validate(OPERATION)?;
    if spectrum.domain_kind() != DomainKind::Derivative {
        return Err(EsrError::domain(
            OPERATION,
            format!(
                "automatic phase needs a derivative spectrum, got {}",
                spectrum.domain_kind()
            ),
        ));
    }

    let field = spectrum.field();
    let analytic = analytic_signal(spectrum.signal());
    let in_phase: Vec<f64> = analytic.iter().map(|value| value.re).collect();
    let quadrature: Vec<f64> = analytic.iter().map(|value| value.im).collect();
    let in_phase_area = chord_corrected_area(field, &in_phase);
    let quadrature_area = chord_corrected_area(field, &quadrature);

    if in_phase_area == 0.0 && quadrature_area == 0.0 {
        warn!(
            operation = OPERATION,
            "signal has no net absorption; phase search is flat"
        );
    }

    let outcome = golden_section_minimize(
        |delta| (quadrature_area * delta.cos() - in_phase_area * delta.sin()).powi(2),
        search.lower_rad,
        search.upper_rad,
        search.tolerance_rad,
        search.max_iterations,
    );
    debug!(
        delta = outcome.argument,
        residual = outcome.value,
        iterations = outcome.iterations,
        "automatic phase search finished"
    );
    Ok(outcome.argument)
}

/// Net area of the running integral of `values` after subtracting the line
/// through its first and last points.
fn chord_corrected_area(field: &[f64], values: &[f64]) -> f64 {
    let integral = cumulative_trapezoid(field, values);
    let first = field[0];
    let span = field[field.len() - 1] - first;
    let rise = integral[integral.len() - 1] - integral[0];
    let corrected: Vec<f64> = field
        .iter()
        .zip(&integral)
        .map(|(b, value)| value - integral[0] - rise * (b - first) / span)
        .collect();
    trapezoid(field, &corrected)
}
