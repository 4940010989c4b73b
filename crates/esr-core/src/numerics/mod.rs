pub mod faddeeva;
pub mod fft;
pub mod hilbert;
pub mod least_squares;
pub mod linalg;
pub mod polynomial;
pub mod search;
pub mod spline;

pub use faddeeva::{dawson, faddeeva, faddeeva_derivative};
pub use hilbert::analytic_signal;
pub use least_squares::{
    ConvergenceCriterion, LeastSquaresError, LeastSquaresProblem, LeastSquaresSolution,
    ParameterSpace, SolverConfig, minimize_least_squares,
};
pub use linalg::{LuError, invert_normal_matrix, solve_normal_equations};
pub use polynomial::{PolynomialFit, fit_polynomial, fit_polynomial_soft_l1};
pub use search::{GoldenSectionOutcome, golden_section_minimize};
pub use spline::{NaturalCubicSpline, fit_smoothing_spline};

use faer::Mat;

pub type DenseMatrix = Mat<f64>;

pub const MAD_TO_SIGMA: f64 = 1.4826;

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    stable_sum(values) / values.len() as f64
}

pub fn root_mean_square(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let squares: Vec<f64> = values.iter().map(|value| value * value).collect();
    (stable_sum(&squares) / values.len() as f64).sqrt()
}

pub fn linear_grid(start: f64, end: f64, count: usize) -> Option<Vec<f64>> {
    if count < 2 {
        return None;
    }

    let step = (end - start) / ((count - 1) as f64);
    let mut grid = Vec::with_capacity(count);
    for index in 0..count {
        grid.push(start + step * (index as f64));
    }

    if let Some(last) = grid.last_mut() {
        *last = end;
    }

    Some(grid)
}

/// Median of `values`; zero for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[middle - 1] + sorted[middle])
    } else {
        sorted[middle]
    }
}

/// Median absolute deviation scaled by 1.4826, a standard deviation estimate
/// for normally distributed values that ignores outliers.
pub fn scaled_mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|value| (value - center).abs()).collect();
    MAD_TO_SIGMA * median(&deviations)
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    let terms: Vec<f64> = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .collect();
    stable_sum(&terms)
}

/// Running trapezoidal integral starting at zero, same length as the input.
pub fn cumulative_trapezoid(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut integral = Vec::with_capacity(x.len());
    let mut sum = 0.0;
    let mut correction = 0.0;
    if !x.is_empty() {
        integral.push(0.0);
    }
    for (xs, ys) in x.windows(2).zip(y.windows(2)) {
        kahan_add(&mut sum, &mut correction, 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]));
        integral.push(sum);
    }
    integral
}

/// Derivative on a non-uniform grid: second-order central differences in the
/// interior, first-order one-sided differences at the ends.
pub fn gradient(x: &[f64], y: &[f64]) -> Vec<f64> {
    let count = x.len();
    if count < 2 {
        return vec![0.0; count];
    }

    let mut derivative = vec![0.0; count];
    derivative[0] = (y[1] - y[0]) / (x[1] - x[0]);
    derivative[count - 1] = (y[count - 1] - y[count - 2]) / (x[count - 1] - x[count - 2]);
    for index in 1..count - 1 {
        let h_left = x[index] - x[index - 1];
        let h_right = x[index + 1] - x[index];
        derivative[index] = (h_left * h_left * y[index + 1]
            - h_right * h_right * y[index - 1]
            + (h_right * h_right - h_left * h_left) * y[index])
            / (h_left * h_right * (h_left + h_right));
    }
    derivative
}
