use tracing::debug;

/// Log10 search range for the smoothing weight, relative to `mean(h)^3` on
/// the unit-normalized abscissa.
const SMOOTHING_DECADES: (f64, f64) = (-6.0, 12.0);
const SMOOTHING_BISECTIONS: usize = 80;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplineError {
    #[error("spline needs at least 2 knots, got {actual}")]
    InsufficientKnots { actual: usize },
    #[error("spline knot length mismatch: x={x}, y={y}")]
    LengthMismatch { x: usize, y: usize },
    #[error(
        "spline knots must be finite and strictly increasing, index {index} has {current} after {previous}"
    )]
    NonIncreasingKnots {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("smoothing spline needs at least 4 points, got {actual}")]
    TooFewSmoothingPoints { actual: usize },
    #[error("smoothing target must be finite and >= 0, got {value}")]
    InvalidSmoothing { value: f64 },
    #[error("smoothing spline system lost positive definiteness at row {row}")]
    NotPositiveDefinite { row: usize },
}

/// Natural cubic spline (zero curvature at both end knots), extended linearly
/// beyond the knot range.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalCubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    curvature: Vec<f64>,
}

impl NaturalCubicSpline {
    pub fn new(knots: Vec<f64>, values: Vec<f64>) -> Result<Self, SplineError> {
        if knots.len() != values.len() {
            return Err(SplineError::LengthMismatch {
                x: knots.len(),
                y: values.len(),
            });
        }
        if knots.len() < 2 {
            return Err(SplineError::InsufficientKnots {
                actual: knots.len(),
            });
        }
        for index in 1..knots.len() {
            let previous = knots[index - 1];
            let current = knots[index];
            if !previous.is_finite() || !current.is_finite() || current <= previous {
                return Err(SplineError::NonIncreasingKnots {
                    index,
                    previous,
                    current,
                });
            }
        }

        let curvature = natural_curvature(&knots, &values);
        Ok(Self {
            knots,
            values,
            curvature,
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.knots.len() - 1;
        if x <= self.knots[0] {
            return self.values[0] + self.end_slope(0) * (x - self.knots[0]);
        }
        if x >= self.knots[last] {
            return self.values[last] + self.end_slope(last) * (x - self.knots[last]);
        }

        let upper = self.knots.partition_point(|knot| *knot < x).max(1);
        let lower = upper - 1;
        let h = self.knots[upper] - self.knots[lower];
        let a = (self.knots[upper] - x) / h;
        let b = (x - self.knots[lower]) / h;
        a * self.values[lower]
            + b * self.values[upper]
            + ((a * a * a - a) * self.curvature[lower] + (b * b * b - b) * self.curvature[upper])
                * h
                * h
                / 6.0
    }

    pub fn evaluate_all(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|value| self.evaluate(*value)).collect()
    }

    fn end_slope(&self, index: usize) -> f64 {
        let last = self.knots.len() - 1;
        if index == 0 {
            let h = self.knots[1] - self.knots[0];
            (self.values[1] - self.values[0]) / h
                - h * (2.0 * self.curvature[0] + self.curvature[1]) / 6.0
        } else {
            let h = self.knots[last] - self.knots[last - 1];
            (self.values[last] - self.values[last - 1]) / h
                + h * (self.curvature[last - 1] + 2.0 * self.curvature[last]) / 6.0
        }
    }
}

/// Cubic smoothing spline (Reinsch) whose residual sum of squares against
/// `y` equals `residual_target`, returned as the natural spline through the
/// smoothed values. A target at or above the straight-line residual gives
/// the least-squares line; a target of zero interpolates.
pub fn fit_smoothing_spline(
    x: &[f64],
    y: &[f64],
    residual_target: f64,
) -> Result<NaturalCubicSpline, SplineError> {
    if x.len() != y.len() {
        return Err(SplineError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.len() < 4 {
        return Err(SplineError::TooFewSmoothingPoints { actual: x.len() });
    }
    if !residual_target.is_finite() || residual_target < 0.0 {
        return Err(SplineError::InvalidSmoothing {
            value: residual_target,
        });
    }
    let interpolating = NaturalCubicSpline::new(x.to_vec(), y.to_vec())?;
    if residual_target == 0.0 {
        return Ok(interpolating);
    }

    let system = ReinschSystem::new(x);
    let reference = system.mean_step.powi(3);
    let weight_at = |decade: f64| reference * 10.0_f64.powf(decade);
    let (mut low, mut high) = SMOOTHING_DECADES;
    let (smoothest, smoothest_rss) = system.smooth(y, weight_at(high))?;
    if smoothest_rss <= residual_target {
        debug!(residual_target, smoothest_rss, "smoothing target reaches the straight line");
        return NaturalCubicSpline::new(x.to_vec(), smoothest);
    }
    let (roughest, roughest_rss) = system.smooth(y, weight_at(low))?;
    if roughest_rss >= residual_target {
        return NaturalCubicSpline::new(x.to_vec(), roughest);
    }

    // The residual sum of squares grows monotonically with the weight.
    let mut best = roughest;
    for _ in 0..SMOOTHING_BISECTIONS {
        let middle = 0.5 * (low + high);
        let (smoothed, rss) = system.smooth(y, weight_at(middle))?;
        if rss > residual_target {
            high = middle;
        } else {
            low = middle;
            best = smoothed;
        }
        if high - low < 1.0e-10 {
            break;
        }
    }
    debug!(residual_target, decade = low, "smoothing weight selected");
    NaturalCubicSpline::new(x.to_vec(), best)
}

/// Band matrices of the Reinsch formulation on `t = (x - x0) / (xn - x0)`:
/// `Q` (n x n-2, second divided differences) and `R` (tridiagonal).
struct ReinschSystem {
    /// Column `k` of `Q` holds `[a, b, c]` at rows `k, k+1, k+2`.
    q_columns: Vec<[f64; 3]>,
    r_diagonal: Vec<f64>,
    r_upper: Vec<f64>,
    mean_step: f64,
}

impl ReinschSystem {
    fn new(x: &[f64]) -> Self {
        let span = x[x.len() - 1] - x[0];
        let steps: Vec<f64> = x.windows(2).map(|pair| (pair[1] - pair[0]) / span).collect();
        let interior = x.len() - 2;
        let q_columns = (0..interior)
            .map(|k| {
                let (left, right) = (steps[k], steps[k + 1]);
                [1.0 / left, -1.0 / left - 1.0 / right, 1.0 / right]
            })
            .collect();
        let r_diagonal = (0..interior)
            .map(|k| (steps[k] + steps[k + 1]) / 3.0)
            .collect();
        let r_upper = (0..interior).map(|k| steps[k + 1] / 6.0).collect();
        Self {
            q_columns,
            r_diagonal,
            r_upper,
            mean_step: 1.0 / steps.len() as f64,
        }
    }

    /// Smoothed values `g = y - weight Q gamma` with
    /// `(R + weight Q^T Q) gamma = Q^T y`, plus their residual sum of squares.
    fn smooth(&self, y: &[f64], weight: f64) -> Result<(Vec<f64>, f64), SplineError> {
        let q = &self.q_columns;
        let interior = q.len();
        let mut diagonal = vec![0.0; interior];
        let mut first = vec![0.0; interior];
        let mut second = vec![0.0; interior];
        let mut rhs = vec![0.0; interior];
        for k in 0..interior {
            let [a, b, c] = q[k];
            diagonal[k] = self.r_diagonal[k] + weight * (a * a + b * b + c * c);
            if k + 1 < interior {
                let [next_a, next_b, _] = q[k + 1];
                first[k] = self.r_upper[k] + weight * (b * next_a + c * next_b);
            }
            if k + 2 < interior {
                second[k] = weight * c * q[k + 2][0];
            }
            rhs[k] = a * y[k] + b * y[k + 1] + c * y[k + 2];
        }

        let gamma = solve_pentadiagonal(&diagonal, &first, &second, &rhs)?;
        let mut smoothed = y.to_vec();
        for (k, (column, value)) in q.iter().zip(&gamma).enumerate() {
            for (offset, entry) in column.iter().enumerate() {
                smoothed[k + offset] -= weight * entry * value;
            }
        }
        let rss = smoothed
            .iter()
            .zip(y)
            .map(|(fit, value)| (value - fit).powi(2))
            .sum::<f64>();
        Ok((smoothed, rss))
    }
}

/// Symmetric positive definite pentadiagonal solve by banded LDL^T.
/// `first[k]` is entry (k, k+1) and `second[k]` entry (k, k+2).
fn solve_pentadiagonal(
    diagonal: &[f64],
    first: &[f64],
    second: &[f64],
    rhs: &[f64],
) -> Result<Vec<f64>, SplineError> {
    let count = diagonal.len();
    let mut d = vec![0.0; count];
    // l1[k] = L(k, k-1), l2[k] = L(k, k-2)
    let mut l1 = vec![0.0; count + 1];
    let mut l2 = vec![0.0; count + 2];
    for k in 0..count {
        let mut pivot = diagonal[k];
        if k >= 1 {
            pivot -= d[k - 1] * l1[k] * l1[k];
        }
        if k >= 2 {
            pivot -= d[k - 2] * l2[k] * l2[k];
        }
        if !pivot.is_finite() || pivot <= 0.0 {
            return Err(SplineError::NotPositiveDefinite { row: k });
        }
        d[k] = pivot;
        l2[k + 2] = second[k] / pivot;
        let coupling = if k >= 1 { l2[k + 1] * d[k - 1] * l1[k] } else { 0.0 };
        l1[k + 1] = (first[k] - coupling) / pivot;
    }

    let mut z = vec![0.0; count];
    for k in 0..count {
        let mut value = rhs[k];
        if k >= 1 {
            value -= l1[k] * z[k - 1];
        }
        if k >= 2 {
            value -= l2[k] * z[k - 2];
        }
        z[k] = value;
    }

    let mut solution = vec![0.0; count];
    for k in (0..count).rev() {
        let mut value = z[k] / d[k];
        if k + 1 < count {
            value -= l1[k + 1] * solution[k + 1];
        }
        if k + 2 < count {
            value -= l2[k + 2] * solution[k + 2];
        }
        solution[k] = value;
    }
    Ok(solution)
}

/// Second derivatives at the knots from the tridiagonal continuity system.
fn natural_curvature(knots: &[f64], values: &[f64]) -> Vec<f64> {
    let count = knots.len();
    let mut curvature = vec![0.0; count];
    if count < 3 {
        return curvature;
    }

    let interior = count - 2;
    let mut diagonal = vec![0.0; interior];
    let mut upper = vec![0.0; interior];
    let mut rhs = vec![0.0; interior];
    for row in 0..interior {
        let index = row + 1;
        let h_left = knots[index] - knots[index - 1];
        let h_right = knots[index + 1] - knots[index];
        diagonal[row] = 2.0 * (h_left + h_right);
        upper[row] = h_right;
        rhs[row] = 6.0
            * ((values[index + 1] - values[index]) / h_right
                - (values[index] - values[index - 1]) / h_left);
    }

    for row in 1..interior {
        let lower = knots[row + 1] - knots[row];
        let factor = lower / diagonal[row - 1];
        diagonal[row] -= factor * upper[row - 1];
        rhs[row] -= factor * rhs[row - 1];
    }

    for row in (0..interior).rev() {
        let next = if row + 1 < interior {
            curvature[row + 2]
        } else {
            0.0
        };
        curvature[row + 1] = (rhs[row] - upper[row] * next) / diagonal[row];
    }

    curvature
}
