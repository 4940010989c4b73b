//! Replayable analysis sessions.
//!
//! A [`SessionRecord`] stores the input reference, the ordered preprocessing
//! steps with their parameters, the fit configuration and every computed
//! result, so the same numbers can be regenerated from the raw trace.

use crate::domain::{EsrResult, Spectrum};
use crate::modules::SpectrumTransform;
use crate::modules::fitting::{FitConfig, FitResult, fit_spectrum};
use crate::modules::physics::{PhysicsOptions, PhysicsResult, extract_physics};
use crate::modules::preprocess::{
    BackgroundPolicy, BaselineMethod, PhaseMode, SmoothingMethod, phase_correct, remove_baseline,
    select_region, smooth, subset, to_absorption, to_derivative,
};
use crate::modules::quantitation::{
    DEFAULT_QUALITY_THRESHOLD, DoubleIntegral, QuantitationResult, ReferenceStandard,
    SampleNormalization, calibrate, double_integrate,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PreprocessStep {
    RemoveBaseline { baseline: BaselineMethod },
    PhaseCorrect { phase: PhaseMode },
    Smooth { smoothing: SmoothingMethod },
    Subset { field_min_t: f64, field_max_t: f64 },
    SelectRegion { field_min_t: f64, field_max_t: f64 },
    ToAbsorption,
    ToDerivative,
}

impl SpectrumTransform for PreprocessStep {
    fn apply(&self, spectrum: &Spectrum) -> EsrResult<Spectrum> {
        match self {
            Self::RemoveBaseline { baseline } => remove_baseline(spectrum, baseline),
            Self::PhaseCorrect { phase } => phase_correct(spectrum, phase),
            Self::Smooth { smoothing } => smooth(spectrum, smoothing),
            Self::Subset {
                field_min_t,
                field_max_t,
            } => subset(spectrum, *field_min_t, *field_max_t),
            Self::SelectRegion {
                field_min_t,
                field_max_t,
            } => select_region(spectrum, *field_min_t, *field_max_t),
            Self::ToAbsorption => to_absorption(spectrum),
            Self::ToDerivative => to_derivative(spectrum),
        }
    }
}

pub fn replay(spectrum: &Spectrum, steps: &[PreprocessStep]) -> EsrResult<Spectrum> {
    steps.apply(spectrum)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitationSettings {
    #[serde(default)]
    pub policy: BackgroundPolicy,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Without a reference only the double integral is reported.
    #[serde(default)]
    pub reference: Option<ReferenceStandard>,
    #[serde(default)]
    pub normalization: SampleNormalization,
}

impl Default for QuantitationSettings {
    fn default() -> Self {
        Self {
            policy: BackgroundPolicy::default(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            reference: None,
            normalization: SampleNormalization::default(),
        }
    }
}

fn default_quality_threshold() -> f64 {
    DEFAULT_QUALITY_THRESHOLD
}

/// Everything needed to analyze one trace. Stages that are `None` are
/// skipped; physics needs a fit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRecipe {
    pub steps: Vec<PreprocessStep>,
    pub fit: Option<FitConfig>,
    pub physics: Option<PhysicsOptions>,
    pub quantitation: Option<QuantitationSettings>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("failed to read analysis recipe '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse analysis recipe '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_analysis_recipe(recipe_path: impl AsRef<Path>) -> Result<AnalysisRecipe, RecipeError> {
    let recipe_path = recipe_path.as_ref();
    let source = fs::read_to_string(recipe_path).map_err(|source| RecipeError::Read {
        path: recipe_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| RecipeError::Parse {
        path: recipe_path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionResults {
    pub fit: Option<FitResult>,
    pub physics: Option<PhysicsResult>,
    pub double_integral: Option<DoubleIntegral>,
    pub quantitation: Option<QuantitationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub input: String,
    pub steps: Vec<PreprocessStep>,
    pub fit: Option<FitConfig>,
    pub physics: Option<PhysicsOptions>,
    pub quantitation: Option<QuantitationSettings>,
    pub results: SessionResults,
}

impl SessionRecord {
    pub fn recipe(&self) -> AnalysisRecipe {
        AnalysisRecipe {
            steps: self.steps.clone(),
            fit: self.fit.clone(),
            physics: self.physics,
            quantitation: self.quantitation.clone(),
        }
    }

    /// Recomputes the session against `raw`, which must be the trace named
    /// by `input`.
    pub fn replay(&self, raw: &Spectrum) -> EsrResult<SessionRecord> {
        run_analysis(raw, &self.recipe(), self.input.clone())
    }
}

/// Applies a recipe to a raw trace: preprocessing, then fitting and physics,
/// then double integration and calibration.
pub fn run_analysis(
    raw: &Spectrum,
    recipe: &AnalysisRecipe,
    input: impl Into<String>,
) -> EsrResult<SessionRecord> {
    let input = input.into();
    let processed = replay(raw, &recipe.steps)?;

    let fit = match &recipe.fit {
        Some(config) => Some(fit_spectrum(&processed, config)?),
        None => None,
    };
    let physics = match (&fit, &recipe.physics) {
        (Some(fit), Some(options)) => Some(extract_physics(fit, processed.metadata(), options)?),
        _ => None,
    };

    let (double_integral, quantitation) = match &recipe.quantitation {
        Some(settings) => {
            let integral =
                double_integrate(&processed, &settings.policy, settings.quality_threshold)?;
            let calibrated = match &settings.reference {
                Some(reference) => Some(calibrate(&integral, reference, &settings.normalization)?),
                None => None,
            };
            (Some(integral), calibrated)
        }
        None => (None, None),
    };

    info!(
        input = %input,
        steps = recipe.steps.len(),
        fitted = fit.is_some(),
        quantified = quantitation.is_some(),
        "analysis finished"
    );

    Ok(SessionRecord {
        input,
        steps: recipe.steps.clone(),
        fit: recipe.fit.clone(),
        physics: recipe.physics,
        quantitation: recipe.quantitation.clone(),
        results: SessionResults {
            fit,
            physics,
            double_integral,
            quantitation,
        },
    })
}
