//! Physical parameters derived from fitted lines and acquisition metadata.

use crate::common::constants::{
    BOHR_MAGNETON_J_PER_T, HYPERFINE_MHZ_PER_MT, PLANCK_J_S, REDUCED_PLANCK_J_S,
};
use crate::common::units::t_to_mt;
use crate::domain::{EsrError, EsrResult, SpectrumMetadata};
use crate::modules::fitting::{FitResult, LineShape, ParameterKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Largest fitted dispersion fraction still treated as a pure absorption line
/// when deciding whether T2 is meaningful.
pub const PURE_ABSORPTION_TOLERANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FrequencySource {
    /// Use `metadata.frequency_hz`; absent frequency is an error.
    #[default]
    Metadata,
    /// Use a caller-supplied frequency. The result carries
    /// [`PhysicsFlag::AssumedFrequency`].
    Assumed { frequency_hz: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsFlag {
    AssumedFrequency,
    /// T2 was requested implicitly but the fit is not a pure Lorentzian.
    T2NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinewidthConvention {
    PeakToPeak,
    #[default]
    HalfWidthHalfMax,
    FullWidthHalfMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsOptions {
    pub frequency: FrequencySource,
    pub frequency_uncertainty_hz: Option<f64>,
    /// Component whose center and width feed g, linewidth and T2.
    pub component: usize,
    pub linewidth_convention: LinewidthConvention,
    /// Pair of components whose center spacing is reported as a hyperfine
    /// splitting.
    pub hyperfine_pair: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperfineResult {
    pub spacing_mt: f64,
    pub spacing_uncertainty_mt: f64,
    pub a_mhz: f64,
    pub a_uncertainty_mhz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsResult {
    pub g_factor: f64,
    pub g_factor_uncertainty: f64,
    pub resonance_field_t: f64,
    pub frequency_hz: f64,
    pub linewidth_t: f64,
    pub linewidth_uncertainty_t: f64,
    pub linewidth_convention: LinewidthConvention,
    pub hyperfine: Option<HyperfineResult>,
    pub t2_seconds: Option<f64>,
    pub flags: Vec<PhysicsFlag>,
}

/// `g = h nu / (mu_B B)`.
pub fn g_factor(frequency_hz: f64, center_field_t: f64) -> EsrResult<f64> {
    const OPERATION: &str = "g_factor";
    require_positive(OPERATION, "frequency_hz", frequency_hz)?;
    require_positive(OPERATION, "center_field_t", center_field_t)?;
    Ok(PLANCK_J_S * frequency_hz / (BOHR_MAGNETON_J_PER_T * center_field_t))
}

pub fn g_factor_from_metadata(metadata: &SpectrumMetadata, center_field_t: f64) -> EsrResult<f64> {
    let frequency_hz = metadata.require_frequency_hz("g_factor")?;
    g_factor(frequency_hz, center_field_t)
}

pub fn hyperfine_constant(spacing_mt: f64, g: f64) -> EsrResult<f64> {
    const OPERATION: &str = "hyperfine_constant";
    if !spacing_mt.is_finite() || spacing_mt < 0.0 {
        return Err(EsrError::parameter(
            OPERATION,
            format!("spacing_mt must be finite and >= 0, got {spacing_mt}"),
        ));
    }
    require_positive(OPERATION, "g", g)?;
    Ok(g * HYPERFINE_MHZ_PER_MT * spacing_mt)
}

/// Splitting between two fitted centers. The spacing variance includes the
/// center-center covariance; the coupling uncertainty also carries the
/// relative g uncertainty.
pub fn hyperfine_from_fit(
    fit: &FitResult,
    first: usize,
    second: usize,
    g: f64,
    g_uncertainty: f64,
) -> EsrResult<HyperfineResult> {
    const OPERATION: &str = "hyperfine_from_fit";
    if first == second || first >= fit.components.len() || second >= fit.components.len() {
        return Err(EsrError::parameter(
            OPERATION,
            format!(
                "components ({first}, {second}) do not name two distinct lines of a {}-component fit",
                fit.components.len()
            ),
        ));
    }

    let spacing_t =
        (fit.components[second].center_field_t - fit.components[first].center_field_t).abs();
    let variance_of = |a: usize, b: usize| {
        fit.parameter_covariance((a, ParameterKind::Center), (b, ParameterKind::Center))
            .unwrap_or(0.0)
    };
    let spacing_variance_t =
        (variance_of(first, first) + variance_of(second, second) - 2.0 * variance_of(first, second))
            .max(0.0);

    let spacing_mt = t_to_mt(spacing_t);
    let spacing_uncertainty_mt = t_to_mt(spacing_variance_t.sqrt());
    let a_mhz = hyperfine_constant(spacing_mt, g)?;
    let relative = relative_quadrature(&[(spacing_uncertainty_mt, spacing_mt), (g_uncertainty, g)]);
    Ok(HyperfineResult {
        spacing_mt,
        spacing_uncertainty_mt,
        a_mhz,
        a_uncertainty_mhz: a_mhz * relative,
    })
}

/// `gamma = g mu_B / hbar` in rad s^-1 T^-1.
pub fn gyromagnetic_ratio(g: f64) -> f64 {
    g * BOHR_MAGNETON_J_PER_T / REDUCED_PLANCK_J_S
}

/// Homogeneous relaxation time `T2 = 1 / (gamma * half width)`, where the
/// half width is the reported Lorentzian value `sqrt(3) * dBpp`.
pub fn t2_relaxation(hwhm_t: f64, g: f64) -> EsrResult<f64> {
    const OPERATION: &str = "t2_relaxation";
    require_positive(OPERATION, "hwhm_t", hwhm_t)?;
    require_positive(OPERATION, "g", g)?;
    Ok(1.0 / (gyromagnetic_ratio(g) * hwhm_t))
}

pub fn extract_physics(
    fit: &FitResult,
    metadata: &SpectrumMetadata,
    options: &PhysicsOptions,
) -> EsrResult<PhysicsResult> {
    const OPERATION: &str = "extract_physics";
    let line = fit.components.get(options.component).ok_or_else(|| {
        EsrError::parameter(
            OPERATION,
            format!(
                "component {} requested from a {}-component fit",
                options.component,
                fit.components.len()
            ),
        )
    })?;

    let mut flags = Vec::new();
    let frequency_hz = match options.frequency {
        FrequencySource::Metadata => metadata.require_frequency_hz(OPERATION)?,
        FrequencySource::Assumed { frequency_hz } => {
            require_positive(OPERATION, "frequency_hz", frequency_hz)?;
            warn!(frequency_hz, "g-factor computed from an assumed microwave frequency");
            flags.push(PhysicsFlag::AssumedFrequency);
            frequency_hz
        }
    };
    let frequency_uncertainty_hz = match options.frequency_uncertainty_hz {
        Some(value) if !value.is_finite() || value < 0.0 => {
            return Err(EsrError::parameter(
                OPERATION,
                format!("frequency_uncertainty_hz must be finite and >= 0, got {value}"),
            ));
        }
        Some(value) => value,
        None => 0.0,
    };

    let resonance_field_t = line.center_field_t;
    let g = g_factor(frequency_hz, resonance_field_t)?;
    let g_factor_uncertainty = g * relative_quadrature(&[
        (line.center_stderr_t, resonance_field_t),
        (frequency_uncertainty_hz, frequency_hz),
    ]);

    let (linewidth_t, linewidth_uncertainty_t) = match options.linewidth_convention {
        LinewidthConvention::PeakToPeak => {
            (line.peak_to_peak_width_t, line.peak_to_peak_width_stderr_t)
        }
        LinewidthConvention::HalfWidthHalfMax => (line.hwhm_t, line.hwhm_stderr_t),
        LinewidthConvention::FullWidthHalfMax => (line.fwhm_t, 2.0 * line.hwhm_stderr_t),
    };

    let hyperfine = match options.hyperfine_pair {
        Some((first, second)) => Some(hyperfine_from_fit(
            fit,
            first,
            second,
            g,
            g_factor_uncertainty,
        )?),
        None => None,
    };

    let pure_lorentzian = fit.shape == LineShape::Lorentzian
        && line.phase_fraction.abs() <= PURE_ABSORPTION_TOLERANCE;
    let t2_seconds = if pure_lorentzian {
        Some(t2_relaxation(line.hwhm_t, g)?)
    } else {
        flags.push(PhysicsFlag::T2NotApplicable);
        None
    };

    Ok(PhysicsResult {
        g_factor: g,
        g_factor_uncertainty,
        resonance_field_t,
        frequency_hz,
        linewidth_t,
        linewidth_uncertainty_t,
        linewidth_convention: options.linewidth_convention,
        hyperfine,
        t2_seconds,
        flags,
    })
}

fn require_positive(operation: &'static str, name: &str, value: f64) -> EsrResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EsrError::parameter(
            operation,
            format!("{name} must be finite and > 0, got {value}"),
        ));
    }
    Ok(())
}

fn relative_quadrature(terms: &[(f64, f64)]) -> f64 {
    terms
        .iter()
        .filter(|(_, value)| *value != 0.0)
        .map(|(uncertainty, value)| (uncertainty / value).powi(2))
        .sum::<f64>()
        .sqrt()
}
