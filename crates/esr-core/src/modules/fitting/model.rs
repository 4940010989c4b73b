use super::lineshape::{LineShape, ShapeProfile};
use crate::numerics::{LeastSquaresProblem, SolverConfig};
use serde::{Deserialize, Serialize};

/// How the absorption/dispersion mixing fraction enters the fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PhaseHandling {
    /// One free fraction shared by every component.
    #[default]
    Shared,
    /// One free fraction per component.
    PerComponent,
    /// Held at `phase_fraction` for every component.
    Fixed { phase_fraction: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeSign {
    #[default]
    Free,
    Positive,
    Negative,
}

/// Starting point for one component. `phase_fraction` is ignored when the
/// phase is fixed and defaults to 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentGuess {
    pub center_field_t: f64,
    pub peak_to_peak_width_t: f64,
    pub amplitude: f64,
    #[serde(default)]
    pub phase_fraction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub shape: LineShape,
    pub components: usize,
    pub phase: PhaseHandling,
    pub amplitude_sign: AmplitudeSign,
    /// Explicit starting values, one per component; estimated from the
    /// signal when absent.
    pub initial_guesses: Option<Vec<ComponentGuess>>,
    /// Per-point weights over the active region (inverse variances). When
    /// present, the covariance is not rescaled by the reduced chi-square.
    pub weights: Option<Vec<f64>>,
    pub solver: SolverConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            shape: LineShape::Lorentzian,
            components: 1,
            phase: PhaseHandling::Shared,
            amplitude_sign: AmplitudeSign::Free,
            initial_guesses: None,
            weights: None,
            solver: SolverConfig::default(),
        }
    }
}

impl FitConfig {
    pub fn new(shape: LineShape, components: usize) -> Self {
        Self {
            shape,
            components,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Center,
    Width,
    Amplitude,
    Phase,
}

/// Packing of component parameters into the optimizer vector:
/// `[center, width, amplitude]` per component, then the free phase
/// fraction(s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ParameterLayout {
    pub components: usize,
    pub phase: PhaseHandling,
}

impl ParameterLayout {
    pub fn len(&self) -> usize {
        3 * self.components
            + match self.phase {
                PhaseHandling::Shared => 1,
                PhaseHandling::PerComponent => self.components,
                PhaseHandling::Fixed { .. } => 0,
            }
    }

    pub fn index(&self, component: usize, kind: ParameterKind) -> Option<usize> {
        match kind {
            ParameterKind::Center => Some(3 * component),
            ParameterKind::Width => Some(3 * component + 1),
            ParameterKind::Amplitude => Some(3 * component + 2),
            ParameterKind::Phase => match self.phase {
                PhaseHandling::Shared => Some(3 * self.components),
                PhaseHandling::PerComponent => Some(3 * self.components + component),
                PhaseHandling::Fixed { .. } => None,
            },
        }
    }

    pub fn phase_value(&self, parameters: &[f64], component: usize) -> f64 {
        match (self.phase, self.index(component, ParameterKind::Phase)) {
            (PhaseHandling::Fixed { phase_fraction }, _) => phase_fraction,
            (_, Some(index)) => parameters[index],
            (_, None) => 0.0,
        }
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.len());
        for component in 0..self.components {
            labels.push(format!("center[{component}]"));
            labels.push(format!("width[{component}]"));
            labels.push(format!("amplitude[{component}]"));
        }
        match self.phase {
            PhaseHandling::Shared => labels.push("phase".to_string()),
            PhaseHandling::PerComponent => {
                labels.extend((0..self.components).map(|component| format!("phase[{component}]")))
            }
            PhaseHandling::Fixed { .. } => {}
        }
        labels
    }
}

/// Sum of derivative-domain components compared against the active region.
pub(crate) struct DerivativeModel<'a> {
    pub field: &'a [f64],
    pub signal: &'a [f64],
    pub sqrt_weights: Option<Vec<f64>>,
    pub profile: ShapeProfile,
    pub layout: ParameterLayout,
}

impl DerivativeModel<'_> {
    pub fn evaluate(&self, parameters: &[f64]) -> Vec<f64> {
        let mut curve = vec![0.0; self.field.len()];
        for component in 0..self.layout.components {
            let center = parameters[3 * component];
            let width = parameters[3 * component + 1];
            let amplitude = parameters[3 * component + 2];
            let phase = self.layout.phase_value(parameters, component);
            for (value, field) in curve.iter_mut().zip(self.field) {
                *value += amplitude * self.profile.derivative(field - center, width, phase);
            }
        }
        curve
    }
}

impl LeastSquaresProblem for DerivativeModel<'_> {
    fn parameter_count(&self) -> usize {
        self.layout.len()
    }

    fn residual_count(&self) -> usize {
        self.field.len()
    }

    fn residuals(&self, parameters: &[f64]) -> Vec<f64> {
        let curve = self.evaluate(parameters);
        match &self.sqrt_weights {
            Some(weights) => curve
                .iter()
                .zip(self.signal)
                .zip(weights)
                .map(|((model, observed), weight)| weight * (model - observed))
                .collect(),
            None => curve
                .iter()
                .zip(self.signal)
                .map(|(model, observed)| model - observed)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FitConfig, ParameterKind, ParameterLayout, PhaseHandling};

    #[test]
    fn layout_packs_phase_after_components() {
        let shared = ParameterLayout {
            components: 2,
            phase: PhaseHandling::Shared,
        };
        assert_eq!(shared.len(), 7);
        assert_eq!(shared.index(1, ParameterKind::Amplitude), Some(5));
        assert_eq!(shared.index(1, ParameterKind::Phase), Some(6));
        assert_eq!(shared.labels()[6], "phase");

        let per_component = ParameterLayout {
            components: 2,
            phase: PhaseHandling::PerComponent,
        };
        assert_eq!(per_component.len(), 8);
        assert_eq!(per_component.labels()[7], "phase[1]");

        let fixed = ParameterLayout {
            components: 2,
            phase: PhaseHandling::Fixed {
                phase_fraction: 0.25,
            },
        };
        assert_eq!(fixed.len(), 6);
        assert_eq!(fixed.index(0, ParameterKind::Phase), None);
        assert_eq!(fixed.phase_value(&[0.0; 6], 1), 0.25);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: FitConfig =
            serde_json::from_str(r#"{"shape": {"kind": "gaussian"}, "components": 2}"#)
                .expect("config parses");
        assert_eq!(config.components, 2);
        assert_eq!(config.phase, PhaseHandling::Shared);
        assert_eq!(config.solver.max_iterations, 200);
    }
}
