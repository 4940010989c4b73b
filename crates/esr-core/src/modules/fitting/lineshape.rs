use crate::common::constants::{GAUSSIAN_HALF_WIDTH_PER_PP, LORENTZIAN_HALF_WIDTH_PER_PP};
use crate::domain::{EsrError, EsrResult};
use crate::numerics::{dawson, faddeeva, faddeeva_derivative, golden_section_minimize};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Closed set of supported line shapes. Each variant owns its derivative
/// evaluation and its peak-to-peak to half-maximum conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineShape {
    Gaussian,
    Lorentzian,
    /// Pseudo-convolution via the Faddeeva function; `lorentzian_fraction`
    /// lies strictly inside (0, 1) and splits the unit peak-to-peak width
    /// between the Lorentzian and Gaussian parts.
    Voigt { lorentzian_fraction: f64 },
}

impl LineShape {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Lorentzian => "lorentzian",
            Self::Voigt { .. } => "voigt",
        }
    }

    pub fn validate(&self, operation: &'static str) -> EsrResult<()> {
        match self {
            Self::Voigt {
                lorentzian_fraction,
            } if !(*lorentzian_fraction > 0.0 && *lorentzian_fraction < 1.0) => {
                Err(EsrError::parameter(
                    operation,
                    format!(
                        "voigt lorentzian_fraction must lie in (0, 1), got {lorentzian_fraction}"
                    ),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Evaluation tables for this shape. Voigt normalization is solved
    /// numerically here, once per fit.
    pub fn profile(&self, operation: &'static str) -> EsrResult<ShapeProfile> {
        self.validate(operation)?;
        let kind = match self {
            Self::Gaussian => ProfileKind::Gaussian,
            Self::Lorentzian => ProfileKind::Lorentzian,
            Self::Voigt {
                lorentzian_fraction,
            } => ProfileKind::Voigt(VoigtScale::new(*lorentzian_fraction)),
        };
        Ok(ShapeProfile { shape: *self, kind })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VoigtScale {
    /// Gaussian sigma and Lorentzian gamma of the unit profile.
    sigma: f64,
    gamma: f64,
    /// Peak-to-peak width of the unit profile; reduced offsets are stretched
    /// by this so that the fitted width is the true peak-to-peak width.
    peak_to_peak: f64,
    /// Magnitude of the unit derivative at its extremum.
    peak: f64,
    /// Absorption maximum of the unit profile.
    absorption_max: f64,
}

impl VoigtScale {
    fn new(lorentzian_fraction: f64) -> Self {
        let sigma = 0.5 * (1.0 - lorentzian_fraction);
        let gamma = 0.5 * SQRT_3 * lorentzian_fraction;
        let derivative = |x: f64| voigt_complex_derivative(x, sigma, gamma).re;

        // Absorption derivative is negative with a single minimum for x > 0.
        let extremum = golden_section_minimize(derivative, 0.0, 2.0, 1.0e-12, 200);
        Self {
            sigma,
            gamma,
            peak_to_peak: 2.0 * extremum.argument,
            peak: -extremum.value,
            absorption_max: voigt_complex(0.0, sigma, gamma).re,
        }
    }

    fn channels(&self, reduced: f64) -> (f64, f64) {
        let value = voigt_complex_derivative(reduced * self.peak_to_peak, self.sigma, self.gamma);
        (value.re / self.peak, value.im / self.peak)
    }

    fn absorption(&self, reduced: f64) -> f64 {
        voigt_complex(reduced * self.peak_to_peak, self.sigma, self.gamma).re / self.absorption_max
    }

    /// Distance between the two half-maximum crossings of the synthesized
    /// absorption curve, in units of the peak-to-peak width. Reduces to the
    /// Gaussian and Lorentzian factors at the ends of the mixing range.
    fn half_width_per_pp(&self) -> f64 {
        let mut low = 0.0;
        let mut high = 1.0;
        while self.absorption(high) > 0.5 {
            high *= 2.0;
        }
        for _ in 0..100 {
            let middle = 0.5 * (low + high);
            if self.absorption(middle) > 0.5 {
                low = middle;
            } else {
                high = middle;
            }
        }
        low + high
    }
}

fn voigt_argument(x: f64, sigma: f64, gamma: f64) -> Complex64 {
    Complex64::new(x, gamma) / (sigma * SQRT_2)
}

fn voigt_complex(x: f64, sigma: f64, gamma: f64) -> Complex64 {
    faddeeva(voigt_argument(x, sigma, gamma))
}

fn voigt_complex_derivative(x: f64, sigma: f64, gamma: f64) -> Complex64 {
    faddeeva_derivative(voigt_argument(x, sigma, gamma))
}

/// Prepared evaluator for one line shape.
///
/// Derivative values are normalized so that the pure absorption derivative
/// has extrema of exactly `+1` (low-field lobe) and `-1` (high-field lobe);
/// the dispersion derivative shares the same scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeProfile {
    shape: LineShape,
    kind: ProfileKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ProfileKind {
    Gaussian,
    Lorentzian,
    Voigt(VoigtScale),
}

impl ShapeProfile {
    pub fn shape(&self) -> LineShape {
        self.shape
    }

    /// Derivative-domain value of a unit-amplitude component at `offset`
    /// tesla from its center.
    pub fn derivative(&self, offset: f64, peak_to_peak: f64, phase_fraction: f64) -> f64 {
        let (absorption, dispersion) = self.channels(offset / peak_to_peak);
        (1.0 - phase_fraction) * absorption + phase_fraction * dispersion
    }

    /// Absorption-derivative and dispersion-derivative at `reduced = offset / width`.
    pub fn channels(&self, reduced: f64) -> (f64, f64) {
        match &self.kind {
            ProfileKind::Gaussian => gaussian_channels(reduced),
            ProfileKind::Lorentzian => lorentzian_channels(reduced),
            ProfileKind::Voigt(scale) => scale.channels(reduced),
        }
    }

    /// Absorption-domain value at `reduced = offset / width`, unit maximum.
    pub fn absorption(&self, reduced: f64) -> f64 {
        match &self.kind {
            ProfileKind::Gaussian => (-2.0 * reduced * reduced).exp(),
            ProfileKind::Lorentzian => {
                let u = 2.0 * reduced / SQRT_3;
                1.0 / (1.0 + u * u)
            }
            ProfileKind::Voigt(scale) => scale.absorption(reduced),
        }
    }

    /// Reported half width per unit peak-to-peak width.
    pub fn half_width_per_pp(&self) -> f64 {
        match &self.kind {
            ProfileKind::Gaussian => GAUSSIAN_HALF_WIDTH_PER_PP,
            ProfileKind::Lorentzian => LORENTZIAN_HALF_WIDTH_PER_PP,
            ProfileKind::Voigt(scale) => scale.half_width_per_pp(),
        }
    }
}

/// sigma = W / 2, so `x / sigma = 2 r`; dispersion uses the Dawson integral.
fn gaussian_channels(reduced: f64) -> (f64, f64) {
    let scale = SQRT_2 * (-0.5_f64).exp();
    let u = SQRT_2 * reduced;
    let absorption = -2.0 * u * (-u * u).exp() / scale;
    let dispersion = 2.0 / PI.sqrt() * (1.0 - 2.0 * u * dawson(u)) / scale;
    (absorption, dispersion)
}

/// gamma = (sqrt(3) / 2) W, so `u = 2 r / sqrt(3)`; extrema at `u = -+1/sqrt(3)`.
fn lorentzian_channels(reduced: f64) -> (f64, f64) {
    let scale = 8.0 * SQRT_3 / 9.0;
    let u = 2.0 * reduced / SQRT_3;
    let denominator = (1.0 + u * u).powi(2);
    (-2.0 * u / denominator * scale, (1.0 - u * u) / denominator * scale)
}
