//! Derivative-domain line-shape fitting.
//!
//! A fit sums `components` lines of one [`LineShape`] over the active region
//! of a derivative spectrum and refines center, peak-to-peak width, amplitude
//! and absorption/dispersion mixing with a bounded Levenberg-Marquardt solve.

mod guess;
mod lineshape;
mod model;

pub use lineshape::{LineShape, ShapeProfile};
pub use model::{AmplitudeSign, ComponentGuess, FitConfig, ParameterKind, PhaseHandling};

use crate::domain::{DomainKind, EsrError, EsrResult, FitFailureReason, Spectrum};
use crate::numerics::{
    ConvergenceCriterion, LeastSquaresError, LeastSquaresProblem, ParameterSpace,
    invert_normal_matrix, minimize_least_squares,
};
use model::{DerivativeModel, ParameterLayout};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPERATION: &str = "fit_spectrum";
const WIDTH_FLOOR_PER_STEP: f64 = 1.0e-3;
const WIDTH_CEILING_PER_SPAN: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub center_field_t: f64,
    pub center_stderr_t: f64,
    pub peak_to_peak_width_t: f64,
    pub peak_to_peak_width_stderr_t: f64,
    pub amplitude: f64,
    pub amplitude_stderr: f64,
    pub phase_fraction: f64,
    /// Zero when the phase was held fixed.
    pub phase_fraction_stderr: f64,
    /// Half width by the reporting convention: sqrt(3) * dBpp for a
    /// Lorentzian line, 1.177 * dBpp for a Gaussian one.
    pub hwhm_t: f64,
    pub hwhm_stderr_t: f64,
    /// Twice `hwhm_t`.
    pub fwhm_t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub shape: LineShape,
    pub phase: PhaseHandling,
    pub components: Vec<ComponentResult>,
    /// Names of the free parameters, in covariance order.
    pub parameter_labels: Vec<String>,
    pub covariance: Vec<Vec<f64>>,
    pub reduced_chi_square: f64,
    pub aic: f64,
    pub bic: f64,
    /// Unweighted residual sum of squares.
    pub rss: f64,
    pub n_points: usize,
    pub n_parameters: usize,
    pub field: Vec<f64>,
    pub fitted: Vec<f64>,
    /// Observed minus fitted, unweighted.
    pub residuals: Vec<f64>,
    pub iterations: usize,
    pub criterion: ConvergenceCriterion,
    pub weighted: bool,
}

impl FitResult {
    fn layout(&self) -> ParameterLayout {
        ParameterLayout {
            components: self.components.len(),
            phase: self.phase,
        }
    }

    /// Covariance index of a component parameter, `None` for a fixed phase.
    pub fn parameter_index(&self, component: usize, kind: ParameterKind) -> Option<usize> {
        if component >= self.components.len() {
            return None;
        }
        self.layout().index(component, kind)
    }

    pub fn covariance(&self, row: usize, col: usize) -> Option<f64> {
        self.covariance.get(row)?.get(col).copied()
    }

    pub fn parameter_covariance(
        &self,
        first: (usize, ParameterKind),
        second: (usize, ParameterKind),
    ) -> Option<f64> {
        let row = self.parameter_index(first.0, first.1)?;
        let col = self.parameter_index(second.0, second.1)?;
        self.covariance(row, col)
    }
}

pub fn fit_spectrum(spectrum: &Spectrum, config: &FitConfig) -> EsrResult<FitResult> {
    if spectrum.domain_kind() != DomainKind::Derivative {
        return Err(EsrError::domain(
            OPERATION,
            format!(
                "line-shape fitting needs a derivative spectrum, got {}",
                spectrum.domain_kind()
            ),
        ));
    }
    if config.components == 0 {
        return Err(EsrError::parameter(OPERATION, "at least one component is required"));
    }
    match config.phase {
        PhaseHandling::Fixed { phase_fraction } if !(0.0..=1.0).contains(&phase_fraction) => {
            return Err(EsrError::parameter(
                OPERATION,
                format!("fixed phase_fraction must lie in [0, 1], got {phase_fraction}"),
            ));
        }
        _ => {}
    }
    let profile = config.shape.profile(OPERATION)?;
    config
        .solver
        .validate()
        .map_err(|error| EsrError::parameter(OPERATION, error.to_string()))?;

    let layout = ParameterLayout {
        components: config.components,
        phase: config.phase,
    };
    let field = spectrum.active_field();
    let signal = spectrum.active_signal();
    let n_points = field.len();
    let n_parameters = layout.len();
    if n_points < n_parameters + 1 {
        return Err(EsrError::insufficient_data(
            OPERATION,
            format!("{n_points} points cannot constrain {n_parameters} free parameters"),
        ));
    }

    let sqrt_weights = match &config.weights {
        Some(weights) => Some(sqrt_weights(weights, n_points)?),
        None => None,
    };

    let span = field[n_points - 1] - field[0];
    let min_width = WIDTH_FLOOR_PER_STEP * spectrum.min_field_step();
    let guesses = match &config.initial_guesses {
        Some(explicit) => validate_guesses(explicit, config.components)?,
        None => guess::multiple_components(
            field,
            signal,
            config.components,
            config.amplitude_sign,
            min_width,
        ),
    };

    let signal_peak = signal.iter().fold(0.0_f64, |peak, value| peak.max(value.abs()));
    let mut initial = vec![0.0; n_parameters];
    let mut lower = vec![0.0; n_parameters];
    let mut upper = vec![0.0; n_parameters];
    let mut scale = vec![1.0; n_parameters];
    for (component, guess) in guesses.iter().enumerate() {
        let center = 3 * component;
        let width_scale = guess.peak_to_peak_width_t.max(min_width);
        initial[center] = guess.center_field_t;
        lower[center] = field[0];
        upper[center] = field[n_points - 1];
        scale[center] = width_scale;

        initial[center + 1] = guess.peak_to_peak_width_t;
        lower[center + 1] = min_width;
        upper[center + 1] = WIDTH_CEILING_PER_SPAN * span;
        scale[center + 1] = width_scale;

        let (amplitude, amplitude_lower, amplitude_upper) = match config.amplitude_sign {
            AmplitudeSign::Free => (guess.amplitude, f64::NEG_INFINITY, f64::INFINITY),
            AmplitudeSign::Positive => (guess.amplitude.abs(), 0.0, f64::INFINITY),
            AmplitudeSign::Negative => (-guess.amplitude.abs(), f64::NEG_INFINITY, 0.0),
        };
        initial[center + 2] = amplitude;
        lower[center + 2] = amplitude_lower;
        upper[center + 2] = amplitude_upper;
        scale[center + 2] = amplitude.abs().max(signal_peak).max(f64::MIN_POSITIVE);

        // A shared fraction starts from the first component's guess.
        let owns_phase = component == 0 || config.phase == PhaseHandling::PerComponent;
        if let Some(index) = layout.index(component, ParameterKind::Phase).filter(|_| owns_phase) {
            initial[index] = guess.phase_fraction.unwrap_or(0.0);
            lower[index] = 0.0;
            upper[index] = 1.0;
        }
    }

    let space = ParameterSpace::new(lower, upper, scale)
        .map_err(|error| EsrError::parameter(OPERATION, error.to_string()))?;
    space.clamp(&mut initial);

    let problem = DerivativeModel {
        field,
        signal,
        sqrt_weights,
        profile,
        layout,
    };
    debug!(
        shape = config.shape.name(),
        components = config.components,
        points = n_points,
        initial = ?initial,
        "starting line-shape fit"
    );

    let solution = minimize_least_squares(&problem, &initial, &space, &config.solver)
        .map_err(convergence_error)?;

    let dof = (n_points - n_parameters) as f64;
    let reduced_chi_square = solution.sum_of_squares / dof;
    let normal = solution.normal_matrix();
    let inverse = invert_normal_matrix(&normal).map_err(|source| {
        debug!(error = %source, "covariance inversion failed");
        EsrError::FitConvergence {
            operation: OPERATION,
            reason: FitFailureReason::SingularCovariance,
            iterations: solution.iterations,
            last_parameters: solution.parameters.clone(),
        }
    })?;
    let covariance_scale = if config.weights.is_some() {
        1.0
    } else {
        reduced_chi_square
    };
    let covariance: Vec<Vec<f64>> = (0..n_parameters)
        .map(|row| {
            (0..n_parameters)
                .map(|col| inverse[(row, col)] * covariance_scale)
                .collect()
        })
        .collect();

    let fitted = problem.evaluate(&solution.parameters);
    let residuals: Vec<f64> = signal
        .iter()
        .zip(&fitted)
        .map(|(observed, model)| observed - model)
        .collect();
    let rss: f64 = residuals.iter().map(|value| value * value).sum();

    let n = n_points as f64;
    let k = n_parameters as f64;
    let log_likelihood_term = n * (solution.sum_of_squares / n).max(f64::MIN_POSITIVE).ln();
    let aic = log_likelihood_term + 2.0 * k;
    let bic = log_likelihood_term + k * n.ln();

    let stderr = |index: Option<usize>| -> f64 {
        index.map_or(0.0, |index| covariance[index][index].max(0.0).sqrt())
    };
    let half_width_per_pp = problem.profile.half_width_per_pp();
    let components = (0..config.components)
        .map(|component| {
            let width = solution.parameters[3 * component + 1];
            let width_stderr = stderr(layout.index(component, ParameterKind::Width));
            ComponentResult {
                center_field_t: solution.parameters[3 * component],
                center_stderr_t: stderr(layout.index(component, ParameterKind::Center)),
                peak_to_peak_width_t: width,
                peak_to_peak_width_stderr_t: width_stderr,
                amplitude: solution.parameters[3 * component + 2],
                amplitude_stderr: stderr(layout.index(component, ParameterKind::Amplitude)),
                phase_fraction: layout.phase_value(&solution.parameters, component),
                phase_fraction_stderr: stderr(layout.index(component, ParameterKind::Phase)),
                hwhm_t: half_width_per_pp * width,
                hwhm_stderr_t: half_width_per_pp * width_stderr,
                fwhm_t: 2.0 * half_width_per_pp * width,
            }
        })
        .collect();

    debug!(
        iterations = solution.iterations,
        criterion = ?solution.criterion,
        reduced_chi_square,
        "line-shape fit converged"
    );

    Ok(FitResult {
        shape: config.shape,
        phase: config.phase,
        components,
        parameter_labels: layout.labels(),
        covariance,
        reduced_chi_square,
        aic,
        bic,
        rss,
        n_points,
        n_parameters: problem.parameter_count(),
        field: field.to_vec(),
        fitted,
        residuals,
        iterations: solution.iterations,
        criterion: solution.criterion,
        weighted: config.weights.is_some(),
    })
}

fn sqrt_weights(weights: &[f64], n_points: usize) -> EsrResult<Vec<f64>> {
    if weights.len() != n_points {
        return Err(EsrError::parameter(
            OPERATION,
            format!(
                "{} weights supplied for {n_points} fitted points",
                weights.len()
            ),
        ));
    }
    weights
        .iter()
        .enumerate()
        .map(|(index, weight)| {
            if weight.is_finite() && *weight > 0.0 {
                Ok(weight.sqrt())
            } else {
                Err(EsrError::parameter(
                    OPERATION,
                    format!("weight {index} must be finite and > 0, got {weight}"),
                ))
            }
        })
        .collect()
}

fn validate_guesses(
    guesses: &[ComponentGuess],
    components: usize,
) -> EsrResult<Vec<ComponentGuess>> {
    if guesses.len() != components {
        return Err(EsrError::parameter(
            OPERATION,
            format!(
                "{} initial guesses supplied for {components} components",
                guesses.len()
            ),
        ));
    }
    for (index, guess) in guesses.iter().enumerate() {
        let phase_ok = guess
            .phase_fraction
            .is_none_or(|phase| (0.0..=1.0).contains(&phase));
        if !guess.center_field_t.is_finite()
            || !guess.amplitude.is_finite()
            || !(guess.peak_to_peak_width_t.is_finite() && guess.peak_to_peak_width_t > 0.0)
            || !phase_ok
        {
            return Err(EsrError::parameter(
                OPERATION,
                format!("initial guess {index} is invalid: {guess:?}"),
            ));
        }
    }
    Ok(guesses.to_vec())
}

fn convergence_error(error: LeastSquaresError) -> EsrError {
    let reason = match &error {
        LeastSquaresError::NonFiniteResidual { .. } => FitFailureReason::NonFiniteResidual,
        LeastSquaresError::MaxIterations { .. } => FitFailureReason::MaxIterations,
        LeastSquaresError::SingularNormalMatrix { .. } => FitFailureReason::SingularCovariance,
        _ => return EsrError::parameter(OPERATION, error.to_string()),
    };
    let (parameters, iterations) = error.last_iterate().unwrap_or((&[], 0));
    EsrError::FitConvergence {
        operation: OPERATION,
        reason,
        iterations,
        last_parameters: parameters.to_vec(),
    }
}
