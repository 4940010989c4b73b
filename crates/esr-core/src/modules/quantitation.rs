//! Spin quantitation by double integration against a reference standard.

use crate::domain::{EsrError, EsrResult, Spectrum};
use crate::modules::preprocess::{AreaIntegration, BackgroundPolicy, to_area};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default ceiling for the corrected-absorption tails relative to the
/// absorption peak before a baseline is reported as degraded.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineQuality {
    Good,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleIntegral {
    pub area: f64,
    /// Tail residual RMS times the integration span.
    pub area_uncertainty: f64,
    pub quality: BaselineQuality,
    pub integration: AreaIntegration,
}

/// Optional normalization factors of one measurement. Declared factors
/// multiply; absent ones count as 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleNormalization {
    pub scans: Option<f64>,
    pub receiver_gain: Option<f64>,
    pub mass_or_concentration: Option<f64>,
}

impl SampleNormalization {
    pub fn factor(&self, operation: &'static str) -> EsrResult<f64> {
        let declared = [
            ("scans", self.scans),
            ("receiver_gain", self.receiver_gain),
            ("mass_or_concentration", self.mass_or_concentration),
        ];
        declared
            .into_iter()
            .try_fold(1.0, |product, (name, value)| match value {
                None => Ok(product),
                Some(value) if value.is_finite() && value > 0.0 => Ok(product * value),
                Some(value) => Err(EsrError::parameter(
                    operation,
                    format!("normalization factor {name} must be finite and > 0, got {value}"),
                )),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStandard {
    pub id: String,
    pub area: f64,
    #[serde(default)]
    pub area_uncertainty: f64,
    pub spin_count: f64,
    #[serde(default)]
    pub spin_count_uncertainty: Option<f64>,
    #[serde(default)]
    pub normalization: SampleNormalization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitationResult {
    pub double_integral_value: f64,
    pub double_integral_uncertainty: f64,
    pub calibration_reference_id: String,
    pub calibrated_spin_count: f64,
    pub spin_count_uncertainty: f64,
    pub baseline_quality_flag: BaselineQuality,
}

pub fn double_integrate(
    spectrum: &Spectrum,
    policy: &BackgroundPolicy,
    quality_threshold: f64,
) -> EsrResult<DoubleIntegral> {
    if !quality_threshold.is_finite() || quality_threshold <= 0.0 {
        return Err(EsrError::parameter(
            "double_integrate",
            format!("quality_threshold must be finite and > 0, got {quality_threshold}"),
        ));
    }
    let integration = to_area(spectrum, policy)?;
    let tail_excursion = integration.tail_level.max(integration.tail_residual_rms);
    let quality = if tail_excursion > quality_threshold * integration.absorption_peak {
        warn!(
            tail_excursion,
            absorption_peak = integration.absorption_peak,
            quality_threshold,
            "absorption does not return to baseline outside the line"
        );
        BaselineQuality::Degraded
    } else {
        BaselineQuality::Good
    };

    Ok(DoubleIntegral {
        area: integration.area,
        area_uncertainty: integration.tail_residual_rms * integration.span,
        quality,
        integration,
    })
}

/// Spin count of a sample relative to a reference:
/// `(A_s / f_s) / (A_r / f_r) * N_ref`. The uncertainty adds the absolute
/// contributions of both areas and the reference spin count in quadrature, so
/// a sample with no net area still reports its integration uncertainty.
pub fn calibrate(
    sample: &DoubleIntegral,
    reference: &ReferenceStandard,
    normalization: &SampleNormalization,
) -> EsrResult<QuantitationResult> {
    const OPERATION: &str = "calibrate";
    if !reference.area.is_finite() || reference.area == 0.0 {
        return Err(EsrError::calibration(
            OPERATION,
            format!("reference '{}' has unusable area {}", reference.id, reference.area),
        ));
    }
    if !reference.spin_count.is_finite() || reference.spin_count <= 0.0 {
        return Err(EsrError::calibration(
            OPERATION,
            format!(
                "reference '{}' spin count must be finite and > 0, got {}",
                reference.id, reference.spin_count
            ),
        ));
    }
    let reference_spin_uncertainty = reference.spin_count_uncertainty.unwrap_or(0.0);
    for (name, value) in [
        ("area_uncertainty", reference.area_uncertainty),
        ("spin_count_uncertainty", reference_spin_uncertainty),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(EsrError::calibration(
                OPERATION,
                format!("reference '{}' {name} must be finite and >= 0, got {value}", reference.id),
            ));
        }
    }

    let sample_factor = normalization.factor(OPERATION)?;
    let reference_factor = reference.normalization.factor(OPERATION)?;
    // Spins per unit of normalized sample area.
    let sensitivity = reference.spin_count * reference_factor / (reference.area * sample_factor);
    let spin_count = sensitivity * sample.area;

    let terms = [
        sensitivity * sample.area_uncertainty,
        spin_count * reference.area_uncertainty / reference.area,
        spin_count * reference_spin_uncertainty / reference.spin_count,
    ];
    let spin_count_uncertainty = terms.iter().map(|term| term * term).sum::<f64>().sqrt();

    debug!(
        reference = %reference.id,
        sensitivity,
        spin_count,
        spin_count_uncertainty,
        "calibrated against reference standard"
    );

    Ok(QuantitationResult {
        double_integral_value: sample.area,
        double_integral_uncertainty: sample.area_uncertainty,
        calibration_reference_id: reference.id.clone(),
        calibrated_spin_count: spin_count,
        spin_count_uncertainty,
        baseline_quality_flag: sample.quality,
    })
}

/// Double-integrates `sample` with the default quality threshold and
/// calibrates it against `reference`.
pub fn quantify(
    sample: &Spectrum,
    reference: &ReferenceStandard,
    policy: &BackgroundPolicy,
    normalization: &SampleNormalization,
) -> EsrResult<QuantitationResult> {
    let integral = double_integrate(sample, policy, DEFAULT_QUALITY_THRESHOLD)?;
    calibrate(&integral, reference, normalization)
}

#[cfg(test)]
mod tests {
    use super::{
        BaselineQuality, DEFAULT_QUALITY_THRESHOLD, ReferenceStandard, SampleNormalization,
        calibrate, double_integrate, quantify,
    };
    use crate::domain::{EsrErrorKind, Spectrum, SpectrumMetadata};
    use crate::modules::preprocess::BackgroundPolicy;
    use crate::numerics::linear_grid;

    fn gaussian_derivative(amplitude: f64, drift: f64) -> Spectrum {
        let field = linear_grid(0.335, 0.345, 2001).expect("grid");
        let signal = field
            .iter()
            .map(|b| {
                let x = (b - 0.34) / 5.0e-4;
                -amplitude * x * (-0.5 * x * x).exp() + drift * (b - 0.34) * (b - 0.34) * 1.0e6
            })
            .collect();
        Spectrum::derivative(field, signal, SpectrumMetadata::default()).expect("valid trace")
    }

    fn reference(area: f64) -> ReferenceStandard {
        ReferenceStandard {
            id: "dpph-ref".to_string(),
            area,
            area_uncertainty: 0.01 * area,
            spin_count: 1.0,
            spin_count_uncertainty: None,
            normalization: SampleNormalization::default(),
        }
    }

    #[test]
    fn double_sample_gives_double_spin_count() {
        let reference_integral =
            double_integrate(&gaussian_derivative(1.0, 0.0), &BackgroundPolicy::default(), 0.05)
                .expect("reference area");
        let result = quantify(
            &gaussian_derivative(2.0, 0.0),
            &reference(reference_integral.area),
            &BackgroundPolicy::default(),
            &SampleNormalization::default(),
        )
        .expect("quantify");
        let tolerance = result.spin_count_uncertainty.max(1.0e-6);
        assert!((result.calibrated_spin_count - 2.0).abs() <= tolerance);
        assert_eq!(result.calibration_reference_id, "dpph-ref");
        assert_eq!(result.baseline_quality_flag, BaselineQuality::Good);
    }

    #[test]
    fn normalization_divides_out() {
        let integral = double_integrate(
            &gaussian_derivative(1.0, 0.0),
            &BackgroundPolicy::default(),
            DEFAULT_QUALITY_THRESHOLD,
        )
        .expect("area");
        let normalization = SampleNormalization {
            scans: Some(4.0),
            receiver_gain: Some(2.0),
            mass_or_concentration: None,
        };
        let result = calibrate(&integral, &reference(integral.area), &normalization)
            .expect("calibrate");
        assert!((result.calibrated_spin_count - 0.125).abs() < 1.0e-9);

        let invalid = SampleNormalization {
            scans: Some(0.0),
            ..SampleNormalization::default()
        };
        let error = calibrate(&integral, &reference(integral.area), &invalid)
            .expect_err("zero scans");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
    }

    #[test]
    fn empty_sample_keeps_its_integration_uncertainty() {
        let mut integral = double_integrate(
            &gaussian_derivative(1.0, 0.0),
            &BackgroundPolicy::default(),
            DEFAULT_QUALITY_THRESHOLD,
        )
        .expect("area");
        let reference_area = integral.area;
        integral.area = 0.0;
        integral.area_uncertainty = 0.1 * reference_area;

        let standard = reference(reference_area);
        let result =
            calibrate(&integral, &standard, &SampleNormalization::default()).expect("calibrate");
        assert_eq!(result.calibrated_spin_count, 0.0);
        assert!((result.spin_count_uncertainty - 0.1).abs() < 1.0e-9);
    }

    #[test]
    fn uncertainty_combines_absolute_terms() {
        let mut sample = double_integrate(
            &gaussian_derivative(2.0, 0.0),
            &BackgroundPolicy::default(),
            DEFAULT_QUALITY_THRESHOLD,
        )
        .expect("area");
        sample.area_uncertainty = 0.03 * sample.area;
        let mut standard = reference(0.5 * sample.area);
        standard.spin_count_uncertainty = Some(0.02);

        let result =
            calibrate(&sample, &standard, &SampleNormalization::default()).expect("calibrate");
        assert!((result.calibrated_spin_count - 2.0).abs() < 1.0e-9);
        let expected = 2.0 * (0.03_f64.powi(2) + 0.01_f64.powi(2) + 0.02_f64.powi(2)).sqrt();
        assert!((result.spin_count_uncertainty - expected).abs() < 1.0e-9);
    }

    #[test]
    fn degenerate_reference_is_a_calibration_error() {
        let integral = double_integrate(
            &gaussian_derivative(1.0, 0.0),
            &BackgroundPolicy::default(),
            DEFAULT_QUALITY_THRESHOLD,
        )
        .expect("area");
        for area in [0.0, f64::NAN] {
            let error = calibrate(&integral, &reference(area), &SampleNormalization::default())
                .expect_err("bad reference");
            assert_eq!(error.kind(), EsrErrorKind::Calibration);
        }
        let mut negative_spins = reference(1.0);
        negative_spins.spin_count = -1.0;
        assert_eq!(
            calibrate(&integral, &negative_spins, &SampleNormalization::default())
                .expect_err("bad spins")
                .kind(),
            EsrErrorKind::Calibration
        );
    }

    #[test]
    fn uncorrected_drift_degrades_baseline() {
        let integral = double_integrate(
            &gaussian_derivative(1.0, 0.5),
            &BackgroundPolicy::None,
            DEFAULT_QUALITY_THRESHOLD,
        )
        .expect("area");
        assert_eq!(integral.quality, BaselineQuality::Degraded);
        assert!(integral.area_uncertainty > 0.0);
    }
}
