use num_complex::Complex64;
use std::f64::consts::PI;

const INV_SQRT_PI: f64 = 0.564_189_583_547_756_3;

/// Faddeeva function `w(z) = exp(-z^2) erfc(-iz)` for `Im z >= 0`, using the
/// four-region rational approximation of Humlicek (relative error near 1e-4).
///
/// `Re w` on the real axis is the Gaussian, `Im w` is `2/sqrt(pi)` times the
/// Dawson integral; off-axis the pair forms the Voigt and its dispersion.
pub fn faddeeva(z: Complex64) -> Complex64 {
    let x = z.re;
    let y = z.im.max(0.0);
    let t = Complex64::new(y, -x);
    let s = x.abs() + y;

    if s >= 15.0 {
        return t * 0.564_189_6 / (t * t + 0.5);
    }

    if s >= 5.5 {
        let u = t * t;
        return t * (u * 0.564_189_6 + 1.410_474) / (u * (u + 3.0) + 0.75);
    }

    if y >= 0.195 * x.abs() - 0.176 {
        let numerator = t * (t * (t * (t * 0.564_223_6 + 3.778_987) + 11.964_82) + 20.209_33)
            + 16.495_5;
        let denominator = t
            * (t * (t * (t * (t + 6.699_398) + 21.692_74) + 39.271_21) + 38.823_63)
            + 16.495_5;
        return numerator / denominator;
    }

    let u = t * t;
    let numerator = t * nested_difference(
        u,
        0.564_19,
        &[1.320_522, 35.766_83, 219.031_3, 1_540.787, 3_321.990_5, 36_183.31],
    );
    let denominator = nested_difference(
        u,
        1.0,
        &[1.841_439, 61.570_37, 364.219_1, 2_186.181, 9_022.228, 24_322.84, 32_066.6],
    );
    u.exp() - numerator / denominator
}

/// Evaluates `c_n - u (c_{n-1} - u (... - u * leading))` from the innermost
/// coefficient outwards.
fn nested_difference(u: Complex64, leading: f64, coefficients: &[f64]) -> Complex64 {
    coefficients
        .iter()
        .fold(Complex64::new(leading, 0.0), |acc, coefficient| {
            -(u * acc) + *coefficient
        })
}

/// Derivative `w'(z) = -2 z w(z) + 2i/sqrt(pi)`.
pub fn faddeeva_derivative(z: Complex64) -> Complex64 {
    -2.0 * z * faddeeva(z) + Complex64::new(0.0, 2.0 * INV_SQRT_PI)
}

/// Dawson integral `F(x) = sqrt(pi)/2 Im w(x)` for real arguments.
pub fn dawson(x: f64) -> f64 {
    0.5 * PI.sqrt() * faddeeva(Complex64::new(x, 0.0)).im
}

#[cfg(test)]
mod tests {
    use super::{dawson, faddeeva, faddeeva_derivative};
    use num_complex::Complex64;

    fn assert_close(actual: Complex64, expected: Complex64, tolerance: f64) {
        assert!(
            (actual - expected).norm() < tolerance,
            "actual={actual}, expected={expected}"
        );
    }

    #[test]
    fn matches_reference_values_in_each_region() {
        assert_close(faddeeva(Complex64::new(0.0, 0.0)), Complex64::new(1.0, 0.0), 1.0e-4);
        assert_close(
            faddeeva(Complex64::new(1.0, 0.0)),
            Complex64::new(0.367_879_4, 0.607_157_9),
            1.0e-4,
        );
        assert_close(
            faddeeva(Complex64::new(1.0, 1.0)),
            Complex64::new(0.304_744_2, 0.208_218_9),
            5.0e-4,
        );
        // Far field tends to i / (sqrt(pi) z).
        let far = Complex64::new(20.0, 0.5);
        let asymptote = Complex64::new(0.0, super::INV_SQRT_PI) / far;
        assert_close(faddeeva(far), asymptote, 1.0e-4);
    }

    #[test]
    fn dawson_integral_peaks_near_0_924() {
        assert!((dawson(0.924_138_6) - 0.541_044_2).abs() < 1.0e-4);
        assert!((dawson(-1.0) + dawson(1.0)).abs() < 1.0e-6);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let z = Complex64::new(0.7, 0.4);
        let h = 1.0e-5;
        let numeric = (faddeeva(z + h) - faddeeva(z - h)) / (2.0 * h);
        assert_close(faddeeva_derivative(z), numeric, 2.0e-3);
    }
}
