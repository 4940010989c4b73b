use super::DenseMatrix;
use super::linalg::{LuError, solve_normal_equations};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_DAMPING: f64 = 1.0e-12;
const MAX_DAMPING: f64 = 1.0e16;
const DAMPING_FACTOR: f64 = 10.0;

/// Residual model for [`minimize_least_squares`]. Implementors return the
/// (already weighted) residual vector for a parameter vector.
pub trait LeastSquaresProblem {
    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    fn residuals(&self, parameters: &[f64]) -> Vec<f64>;
}

/// Box bounds and a characteristic magnitude per parameter. The magnitude
/// sets the finite-difference step and the step-size convergence test.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ParameterSpace {
    pub fn new(
        lower: Vec<f64>,
        upper: Vec<f64>,
        scale: Vec<f64>,
    ) -> Result<Self, LeastSquaresError> {
        let dimension = lower.len();
        if upper.len() != dimension || scale.len() != dimension {
            return Err(LeastSquaresError::DimensionMismatch {
                expected: dimension,
                actual: upper.len().max(scale.len()),
            });
        }
        for index in 0..dimension {
            if lower[index].is_nan() || upper[index].is_nan() || lower[index] > upper[index] {
                return Err(LeastSquaresError::InvalidBounds {
                    index,
                    lower: lower[index],
                    upper: upper[index],
                });
            }
            if !scale[index].is_finite() || scale[index] <= 0.0 {
                return Err(LeastSquaresError::InvalidScale {
                    index,
                    scale: scale[index],
                });
            }
        }
        Ok(Self {
            lower,
            upper,
            scale,
        })
    }

    pub fn unbounded(scale: Vec<f64>) -> Result<Self, LeastSquaresError> {
        let dimension = scale.len();
        Self::new(
            vec![f64::NEG_INFINITY; dimension],
            vec![f64::INFINITY; dimension],
            scale,
        )
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, parameters: &mut [f64]) {
        for (index, value) in parameters.iter_mut().enumerate() {
            *value = value.clamp(self.lower[index], self.upper[index]);
        }
    }
}

/// Iteration cap and tolerances for the Levenberg-Marquardt loop.
///
/// * `ftol`: relative reduction of the residual sum of squares.
/// * `xtol`: scaled step length relative to the scaled parameter norm.
/// * `gtol`: largest cosine between the residual and a Jacobian column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub initial_damping: f64,
    pub diff_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1.0e-10,
            xtol: 1.0e-10,
            gtol: 1.0e-10,
            initial_damping: 1.0e-3,
            diff_step: 1.0e-6,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), LeastSquaresError> {
        let tolerances = [
            ("ftol", self.ftol),
            ("xtol", self.xtol),
            ("gtol", self.gtol),
            ("initial_damping", self.initial_damping),
            ("diff_step", self.diff_step),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value <= 0.0 {
                return Err(LeastSquaresError::InvalidConfig {
                    name,
                    value: value.to_string(),
                });
            }
        }
        if self.max_iterations == 0 {
            return Err(LeastSquaresError::InvalidConfig {
                name: "max_iterations",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCriterion {
    /// Relative reduction of the sum of squares fell below `ftol`.
    Reduction,
    /// Scaled step fell below `xtol`.
    StepSize,
    /// Gradient orthogonality fell below `gtol`.
    Gradient,
    /// Residuals vanished.
    ExactFit,
    /// No damping level produced a decrease; the point is a numerical minimum.
    DampingLimit,
}

#[derive(Debug, Clone)]
pub struct LeastSquaresSolution {
    pub parameters: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Jacobian of the residuals at `parameters`, one row per residual.
    pub jacobian: DenseMatrix,
    pub sum_of_squares: f64,
    pub iterations: usize,
    pub criterion: ConvergenceCriterion,
}

impl LeastSquaresSolution {
    /// `J^T J` at the solution.
    pub fn normal_matrix(&self) -> DenseMatrix {
        normal_matrix(&self.jacobian)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LeastSquaresError {
    #[error("parameter vector length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid bounds for parameter {index}: [{lower}, {upper}]")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    #[error("parameter scale for index {index} must be finite and > 0, got {scale}")]
    InvalidScale { index: usize, scale: f64 },
    #[error("solver setting '{name}' is invalid: {value}")]
    InvalidConfig { name: &'static str, value: String },
    #[error("problem has {residuals} residuals for {parameters} parameters")]
    Underdetermined { residuals: usize, parameters: usize },
    #[error("residual became non-finite at iteration {iterations}")]
    NonFiniteResidual {
        iterations: usize,
        parameters: Vec<f64>,
    },
    #[error("no convergence within {iterations} iterations")]
    MaxIterations {
        iterations: usize,
        parameters: Vec<f64>,
    },
    #[error("normal matrix is singular at iteration {iterations}: {source}")]
    SingularNormalMatrix {
        iterations: usize,
        parameters: Vec<f64>,
        source: LuError,
    },
}

impl LeastSquaresError {
    /// Last parameter vector and iteration count for failures that happen
    /// inside the iteration loop.
    pub fn last_iterate(&self) -> Option<(&[f64], usize)> {
        match self {
            Self::NonFiniteResidual {
                iterations,
                parameters,
            }
            | Self::MaxIterations {
                iterations,
                parameters,
            }
            | Self::SingularNormalMatrix {
                iterations,
                parameters,
                ..
            } => Some((parameters.as_slice(), *iterations)),
            _ => None,
        }
    }
}

/// Bounded Levenberg-Marquardt with Marquardt diagonal damping
/// `(J^T J + lambda diag(J^T J)) delta = -J^T r`.
///
/// Parameters pinned at a bound whose descent direction points outward are
/// frozen for the step; every trial point is clamped into the box.
pub fn minimize_least_squares<P>(
    problem: &P,
    initial: &[f64],
    space: &ParameterSpace,
    config: &SolverConfig,
) -> Result<LeastSquaresSolution, LeastSquaresError>
where
    P: LeastSquaresProblem + ?Sized,
{
    config.validate()?;
    let dimension = problem.parameter_count();
    if initial.len() != dimension {
        return Err(LeastSquaresError::DimensionMismatch {
            expected: dimension,
            actual: initial.len(),
        });
    }
    if space.dimension() != dimension {
        return Err(LeastSquaresError::DimensionMismatch {
            expected: dimension,
            actual: space.dimension(),
        });
    }
    if problem.residual_count() < dimension {
        return Err(LeastSquaresError::Underdetermined {
            residuals: problem.residual_count(),
            parameters: dimension,
        });
    }

    let mut parameters = initial.to_vec();
    space.clamp(&mut parameters);
    let mut residuals = problem.residuals(&parameters);
    if !all_finite(&residuals) {
        return Err(LeastSquaresError::NonFiniteResidual {
            iterations: 0,
            parameters,
        });
    }
    let mut cost = sum_of_squares(&residuals);
    let mut damping = config.initial_damping;

    for iteration in 1..=config.max_iterations {
        let jacobian = finite_difference_jacobian(problem, &parameters, space, config.diff_step);
        if !matrix_is_finite(&jacobian) {
            return Err(LeastSquaresError::NonFiniteResidual {
                iterations: iteration,
                parameters,
            });
        }

        if cost == 0.0 {
            return Ok(solution(
                parameters,
                residuals,
                jacobian,
                iteration,
                ConvergenceCriterion::ExactFit,
            ));
        }

        let normal = normal_matrix(&jacobian);
        let gradient = transpose_times(&jacobian, &residuals);
        let free: Vec<usize> = (0..dimension)
            .filter(|index| !pinned_at_bound(*index, &parameters, &gradient, space))
            .collect();

        if gradient_cosine(&normal, &gradient, &free, cost) <= config.gtol {
            return Ok(solution(
                parameters,
                residuals,
                jacobian,
                iteration,
                ConvergenceCriterion::Gradient,
            ));
        }

        loop {
            let step = match damped_step(&normal, &gradient, &free, damping) {
                Ok(step) => step,
                Err(source) => {
                    return Err(LeastSquaresError::SingularNormalMatrix {
                        iterations: iteration,
                        parameters,
                        source,
                    });
                }
            };

            let mut trial = parameters.clone();
            for (value, delta) in trial.iter_mut().zip(&step) {
                *value += delta;
            }
            space.clamp(&mut trial);
            let trial_residuals = problem.residuals(&trial);
            let trial_cost = if all_finite(&trial_residuals) {
                sum_of_squares(&trial_residuals)
            } else {
                f64::INFINITY
            };

            if trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                let step_norm = scaled_norm(
                    trial.iter().zip(&parameters).map(|(new, old)| new - old),
                    &space.scale,
                );
                let parameter_norm = scaled_norm(parameters.iter().copied(), &space.scale);

                debug!(
                    iteration,
                    cost = trial_cost,
                    damping,
                    reduction,
                    "levenberg-marquardt step accepted"
                );

                parameters = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                damping = (damping / DAMPING_FACTOR).max(MIN_DAMPING);

                let criterion = if reduction <= config.ftol {
                    Some(ConvergenceCriterion::Reduction)
                } else if step_norm <= config.xtol * (config.xtol + parameter_norm) {
                    Some(ConvergenceCriterion::StepSize)
                } else {
                    None
                };
                if let Some(criterion) = criterion {
                    let jacobian =
                        finite_difference_jacobian(problem, &parameters, space, config.diff_step);
                    return Ok(solution(parameters, residuals, jacobian, iteration, criterion));
                }
                break;
            }

            damping *= DAMPING_FACTOR;
            if damping > MAX_DAMPING {
                return Ok(solution(
                    parameters,
                    residuals,
                    jacobian,
                    iteration,
                    ConvergenceCriterion::DampingLimit,
                ));
            }
        }
    }

    Err(LeastSquaresError::MaxIterations {
        iterations: config.max_iterations,
        parameters,
    })
}

fn solution(
    parameters: Vec<f64>,
    residuals: Vec<f64>,
    jacobian: DenseMatrix,
    iterations: usize,
    criterion: ConvergenceCriterion,
) -> LeastSquaresSolution {
    let sum_of_squares = sum_of_squares(&residuals);
    LeastSquaresSolution {
        parameters,
        residuals,
        jacobian,
        sum_of_squares,
        iterations,
        criterion,
    }
}

/// Central differences with a step of `diff_step * scale`, one-sided when the
/// symmetric stencil would leave the box.
fn finite_difference_jacobian<P>(
    problem: &P,
    parameters: &[f64],
    space: &ParameterSpace,
    diff_step: f64,
) -> DenseMatrix
where
    P: LeastSquaresProblem + ?Sized,
{
    let rows = problem.residual_count();
    let cols = parameters.len();
    let mut jacobian = DenseMatrix::zeros(rows, cols);
    let mut shifted = parameters.to_vec();

    for col in 0..cols {
        let value = parameters[col];
        let step = diff_step * space.scale[col];
        let forward_room = value + step <= space.upper[col];
        let backward_room = value - step >= space.lower[col];

        let (high, low) = match (forward_room, backward_room) {
            (true, true) => (value + step, value - step),
            (true, false) => (value + step, value),
            (false, true) => (value, value - step),
            (false, false) => {
                // Box narrower than the step: the parameter is effectively fixed.
                continue;
            }
        };

        shifted[col] = high;
        let upper_residuals = problem.residuals(&shifted);
        shifted[col] = low;
        let lower_residuals = problem.residuals(&shifted);
        shifted[col] = value;

        let width = high - low;
        for row in 0..rows {
            jacobian[(row, col)] = (upper_residuals[row] - lower_residuals[row]) / width;
        }
    }

    jacobian
}

pub(crate) fn normal_matrix(jacobian: &DenseMatrix) -> DenseMatrix {
    let rows = jacobian.nrows();
    let cols = jacobian.ncols();
    let mut normal = DenseMatrix::zeros(cols, cols);
    for i in 0..cols {
        for j in i..cols {
            let mut sum = 0.0;
            for row in 0..rows {
                sum += jacobian[(row, i)] * jacobian[(row, j)];
            }
            normal[(i, j)] = sum;
            normal[(j, i)] = sum;
        }
    }
    normal
}

fn transpose_times(jacobian: &DenseMatrix, residuals: &[f64]) -> Vec<f64> {
    (0..jacobian.ncols())
        .map(|col| {
            residuals
                .iter()
                .enumerate()
                .map(|(row, value)| jacobian[(row, col)] * value)
                .sum()
        })
        .collect()
}

/// A parameter on a bound is frozen when the descent direction `-g` would
/// push it further out of the box.
fn pinned_at_bound(
    index: usize,
    parameters: &[f64],
    gradient: &[f64],
    space: &ParameterSpace,
) -> bool {
    let descent = -gradient[index];
    (parameters[index] <= space.lower[index] && descent < 0.0)
        || (parameters[index] >= space.upper[index] && descent > 0.0)
}

fn gradient_cosine(normal: &DenseMatrix, gradient: &[f64], free: &[usize], cost: f64) -> f64 {
    let residual_norm = cost.sqrt();
    free.iter()
        .map(|index| {
            let column_norm = normal[(*index, *index)].sqrt();
            if column_norm == 0.0 {
                0.0
            } else {
                gradient[*index].abs() / (column_norm * residual_norm)
            }
        })
        .fold(0.0, f64::max)
}

fn damped_step(
    normal: &DenseMatrix,
    gradient: &[f64],
    free: &[usize],
    damping: f64,
) -> Result<Vec<f64>, LuError> {
    let mut step = vec![0.0; gradient.len()];
    if free.is_empty() {
        return Ok(step);
    }

    let mut reduced = DenseMatrix::zeros(free.len(), free.len());
    for (row, i) in free.iter().enumerate() {
        for (col, j) in free.iter().enumerate() {
            reduced[(row, col)] = normal[(*i, *j)];
        }
        reduced[(row, row)] *= 1.0 + damping;
    }
    let rhs: Vec<f64> = free.iter().map(|index| -gradient[*index]).collect();
    let reduced_step = solve_normal_equations(&reduced, &rhs)?;
    for (index, value) in free.iter().zip(reduced_step) {
        step[*index] = value;
    }
    Ok(step)
}

fn scaled_norm(values: impl Iterator<Item = f64>, scale: &[f64]) -> f64 {
    values
        .zip(scale)
        .map(|(value, s)| (value / s).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn sum_of_squares(values: &[f64]) -> f64 {
    values.iter().map(|value| value * value).sum()
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|value| value.is_finite())
}

fn matrix_is_finite(matrix: &DenseMatrix) -> bool {
    (0..matrix.nrows()).all(|row| (0..matrix.ncols()).all(|col| matrix[(row, col)].is_finite()))
}

#[cfg(test)]
mod tests {
    use super::{
        ConvergenceCriterion, LeastSquaresError, LeastSquaresProblem, ParameterSpace, SolverConfig,
        minimize_least_squares,
    };

    struct Exponential {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl Exponential {
        fn synthetic(amplitude: f64, rate: f64) -> Self {
            let x: Vec<f64> = (0..40).map(|index| index as f64 * 0.1).collect();
            let y = x.iter().map(|value| amplitude * (-rate * value).exp()).collect();
            Self { x, y }
        }
    }

    impl LeastSquaresProblem for Exponential {
        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }

        fn residuals(&self, parameters: &[f64]) -> Vec<f64> {
            self.x
                .iter()
                .zip(&self.y)
                .map(|(x, y)| parameters[0] * (-parameters[1] * x).exp() - y)
                .collect()
        }
    }

    struct Diverging;

    impl LeastSquaresProblem for Diverging {
        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            3
        }

        fn residuals(&self, parameters: &[f64]) -> Vec<f64> {
            vec![f64::NAN * parameters[0]; 3]
        }
    }

    #[test]
    fn recovers_exponential_decay_parameters() {
        let problem = Exponential::synthetic(2.5, 0.7);
        let space = ParameterSpace::unbounded(vec![1.0, 1.0]).expect("space");
        let config = SolverConfig::default();
        let solution =
            minimize_least_squares(&problem, &[1.0, 0.2], &space, &config).expect("fit converges");

        assert!((solution.parameters[0] - 2.5).abs() < 1.0e-6);
        assert!((solution.parameters[1] - 0.7).abs() < 1.0e-6);
        assert!(solution.sum_of_squares < 1.0e-12);
        assert_eq!(solution.jacobian.nrows(), 40);
        assert_eq!(solution.normal_matrix().ncols(), 2);
    }

    #[test]
    fn respects_active_bounds() {
        let problem = Exponential::synthetic(2.5, 0.7);
        let space = ParameterSpace::new(vec![0.0, 0.0], vec![2.0, 5.0], vec![1.0, 1.0])
            .expect("space");
        let config = SolverConfig::default();
        let solution =
            minimize_least_squares(&problem, &[1.0, 0.2], &space, &config).expect("fit converges");

        assert_eq!(solution.parameters[0], 2.0);
        assert!(solution.parameters[1] > 0.0 && solution.parameters[1] < 0.7);
        assert_ne!(solution.criterion, ConvergenceCriterion::ExactFit);
    }

    #[test]
    fn non_finite_residual_reports_iterate() {
        let space = ParameterSpace::unbounded(vec![1.0]).expect("space");
        let error = minimize_least_squares(&Diverging, &[0.5], &space, &SolverConfig::default())
            .expect_err("nan residuals must fail");
        assert!(matches!(error, LeastSquaresError::NonFiniteResidual { .. }));
        assert_eq!(error.last_iterate(), Some((&[0.5][..], 0)));
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let problem = Exponential::synthetic(2.5, 0.7);
        let space = ParameterSpace::unbounded(vec![1.0, 1.0]).expect("space");
        let config = SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        };
        let error = minimize_least_squares(&problem, &[1.0, 0.2], &space, &config)
            .expect_err("one iteration is not enough");
        assert!(matches!(
            error,
            LeastSquaresError::MaxIterations { iterations: 1, .. }
        ));
    }

    #[test]
    fn rejects_inverted_bounds_and_bad_config() {
        assert!(matches!(
            ParameterSpace::new(vec![1.0], vec![0.0], vec![1.0]),
            Err(LeastSquaresError::InvalidBounds { index: 0, .. })
        ));
        let config = SolverConfig {
            ftol: -1.0,
            ..SolverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LeastSquaresError::InvalidConfig { name: "ftol", .. })
        ));
    }
}
