use super::linalg::{LuError, solve_normal_equations};
use super::{DenseMatrix, MAD_TO_SIGMA, median};
use tracing::debug;

const SOFT_L1_MAX_PASSES: usize = 200;
const SOFT_L1_TOLERANCE: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolynomialFitError {
    #[error("polynomial fit length mismatch: x={x}, y={y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("polynomial fit has {points} points but {weights} weights")]
    WeightCountMismatch { points: usize, weights: usize },
    #[error("polynomial fit weight {index} must be finite and >= 0, got {value}")]
    InvalidWeight { index: usize, value: f64 },
    #[error("polynomial of order {order} needs at least {required} points, got {actual}")]
    TooFewPoints {
        order: usize,
        required: usize,
        actual: usize,
    },
    #[error("polynomial normal equations could not be solved: {0}")]
    Singular(#[from] LuError),
}

/// Least-squares polynomial in a normalized abscissa `t = (x - center) / half_span`,
/// which keeps the Vandermonde normal equations well conditioned for field
/// values clustered around a large offset.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialFit {
    center: f64,
    half_span: f64,
    coefficients: Vec<f64>,
}

impl PolynomialFit {
    pub fn order(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let t = (x - self.center) / self.half_span;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |accumulator, coefficient| accumulator * t + coefficient)
    }

    pub fn evaluate_all(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|value| self.evaluate(*value)).collect()
    }
}

pub fn fit_polynomial(
    x: &[f64],
    y: &[f64],
    order: usize,
) -> Result<PolynomialFit, PolynomialFitError> {
    fit_polynomial_weighted(x, y, &vec![1.0; y.len()], order)
}

/// Least squares with per-point weights on the squared residuals.
pub fn fit_polynomial_weighted(
    x: &[f64],
    y: &[f64],
    weights: &[f64],
    order: usize,
) -> Result<PolynomialFit, PolynomialFitError> {
    if x.len() != y.len() {
        return Err(PolynomialFitError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if weights.len() != y.len() {
        return Err(PolynomialFitError::WeightCountMismatch {
            points: y.len(),
            weights: weights.len(),
        });
    }
    if let Some((index, value)) = weights
        .iter()
        .enumerate()
        .find(|(_, weight)| !weight.is_finite() || **weight < 0.0)
    {
        return Err(PolynomialFitError::InvalidWeight {
            index,
            value: *value,
        });
    }
    let terms = order + 1;
    if x.len() < terms {
        return Err(PolynomialFitError::TooFewPoints {
            order,
            required: terms,
            actual: x.len(),
        });
    }

    let (min, max) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
            (min.min(*value), max.max(*value))
        });
    let center = 0.5 * (min + max);
    let half_span = if max > min { 0.5 * (max - min) } else { 1.0 };

    let mut normal = DenseMatrix::zeros(terms, terms);
    let mut rhs = vec![0.0; terms];
    let mut powers = vec![0.0; terms];
    for ((x_value, y_value), weight) in x.iter().zip(y).zip(weights) {
        let t = (x_value - center) / half_span;
        let mut power = 1.0;
        for slot in powers.iter_mut() {
            *slot = power;
            power *= t;
        }
        for row in 0..terms {
            rhs[row] += weight * powers[row] * y_value;
            for col in 0..terms {
                normal[(row, col)] += weight * powers[row] * powers[col];
            }
        }
    }

    let coefficients = solve_normal_equations(&normal, &rhs)?;
    Ok(PolynomialFit {
        center,
        half_span,
        coefficients,
    })
}

/// Robust fit under the soft-L1 loss `2 (sqrt(1 + (r/c)^2) - 1)`, solved by
/// iteratively reweighted least squares. Each pass reweights residual `r` by
/// `1 / sqrt(1 + (r/c)^2)` where `c` is 1.4826 times the median absolute
/// residual of the previous pass, so isolated outliers lose their pull as the
/// fit tightens.
pub fn fit_polynomial_soft_l1(
    x: &[f64],
    y: &[f64],
    order: usize,
) -> Result<PolynomialFit, PolynomialFitError> {
    let mut fit = fit_polynomial(x, y, order)?;
    let magnitude = y
        .iter()
        .fold(f64::MIN_POSITIVE, |largest, value| largest.max(value.abs()));

    for pass in 1..=SOFT_L1_MAX_PASSES {
        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(x_value, y_value)| y_value - fit.evaluate(*x_value))
            .collect();
        let magnitudes: Vec<f64> = residuals.iter().map(|residual| residual.abs()).collect();
        let spread = MAD_TO_SIGMA * median(&magnitudes);
        if spread <= SOFT_L1_TOLERANCE * magnitude {
            debug!(pass, "soft-l1 residual spread vanished");
            return Ok(fit);
        }

        let weights: Vec<f64> = residuals
            .iter()
            .map(|residual| 1.0 / (1.0 + (residual / spread).powi(2)).sqrt())
            .collect();
        let next = fit_polynomial_weighted(x, y, &weights, order)?;
        let change = next
            .coefficients
            .iter()
            .zip(&fit.coefficients)
            .map(|(lhs, rhs)| (lhs - rhs).abs())
            .fold(0.0, f64::max);
        let size = next
            .coefficients
            .iter()
            .fold(magnitude, |largest, value| largest.max(value.abs()));
        fit = next;
        if change <= SOFT_L1_TOLERANCE * size {
            debug!(pass, spread, "soft-l1 fit converged");
            return Ok(fit);
        }
    }

    debug!(passes = SOFT_L1_MAX_PASSES, "soft-l1 fit stopped at the pass limit");
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::{
        PolynomialFitError, fit_polynomial, fit_polynomial_soft_l1, fit_polynomial_weighted,
    };
    use crate::numerics::linear_grid;

    #[test]
    fn recovers_quadratic_around_large_offset() {
        let x = linear_grid(0.33, 0.35, 201).expect("grid");
        let truth = |value: f64| 0.5 - 40.0 * (value - 0.34) + 9.0e4 * (value - 0.34).powi(2);
        let y: Vec<f64> = x.iter().map(|value| truth(*value)).collect();

        let fit = fit_polynomial(&x, &y, 2).expect("fit");
        assert_eq!(fit.order(), 2);
        for value in [0.33, 0.3412, 0.35] {
            assert!((fit.evaluate(value) - truth(value)).abs() < 1.0e-9);
        }
    }

    #[test]
    fn order_five_stays_well_conditioned() {
        let x = linear_grid(0.3, 0.4, 500).expect("grid");
        let y: Vec<f64> = x.iter().map(|value| (value * 20.0).sin()).collect();
        let fit = fit_polynomial(&x, &y, 5).expect("fit");
        let residual = fit
            .evaluate_all(&x)
            .iter()
            .zip(&y)
            .map(|(lhs, rhs)| (lhs - rhs).abs())
            .fold(0.0, f64::max);
        assert!(residual < 1.0e-3);
    }

    #[test]
    fn rejects_too_few_points() {
        let error = fit_polynomial(&[0.0, 1.0], &[0.0, 1.0], 2).expect_err("too few points");
        assert_eq!(
            error,
            PolynomialFitError::TooFewPoints {
                order: 2,
                required: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn zero_weight_removes_a_point() {
        let x = linear_grid(0.0, 1.0, 11).expect("grid");
        let mut y: Vec<f64> = x.iter().map(|value| 2.0 * value - 1.0).collect();
        y[4] += 10.0;
        let mut weights = vec![1.0; x.len()];
        weights[4] = 0.0;

        let fit = fit_polynomial_weighted(&x, &y, &weights, 1).expect("fit");
        assert!((fit.evaluate(0.4) + 0.2).abs() < 1.0e-12);

        let error = fit_polynomial_weighted(&x, &y, &[1.0; 3], 1).expect_err("short weights");
        assert!(matches!(error, PolynomialFitError::WeightCountMismatch { weights: 3, .. }));
        weights[0] = f64::NAN;
        let error = fit_polynomial_weighted(&x, &y, &weights, 1).expect_err("NaN weight");
        assert!(matches!(error, PolynomialFitError::InvalidWeight { index: 0, .. }));
    }

    #[test]
    fn soft_l1_ignores_an_isolated_spike() {
        let x = linear_grid(0.33, 0.35, 101).expect("grid");
        let truth = |value: f64| 1.0 + 30.0 * (value - 0.34) - 2.0e4 * (value - 0.34).powi(2);
        let mut y: Vec<f64> = x.iter().map(|value| truth(*value)).collect();
        y[17] += 25.0;

        let plain = fit_polynomial(&x, &y, 2).expect("fit");
        assert!((plain.evaluate(x[17]) - truth(x[17])).abs() > 0.1);

        let robust = fit_polynomial_soft_l1(&x, &y, 2).expect("robust fit");
        for value in &x {
            assert!((robust.evaluate(*value) - truth(*value)).abs() < 1.0e-6);
        }
    }
}
