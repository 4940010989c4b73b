use super::describe;
use crate::domain::{EsrError, EsrResult, Spectrum};
use crate::numerics::{DenseMatrix, invert_normal_matrix};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SmoothingMethod {
    SavitzkyGolay { window: usize, polyorder: usize },
}

pub fn smooth(spectrum: &Spectrum, method: &SmoothingMethod) -> EsrResult<Spectrum> {
    const OPERATION: &str = "smooth";
    let signal = match method {
        SmoothingMethod::SavitzkyGolay { window, polyorder } => {
            savitzky_golay(OPERATION, spectrum.signal(), *window, *polyorder)?
        }
    };
    spectrum.derive_signal(OPERATION, describe(method), signal, spectrum.domain_kind())
}

/// Savitzky-Golay filter on sample index. Interior points use the centre row
/// of the least-squares projection; the first and last half-window take the
/// matching rows of the polynomial fitted to the first and last window.
fn savitzky_golay(
    operation: &'static str,
    signal: &[f64],
    window: usize,
    polyorder: usize,
) -> EsrResult<Vec<f64>> {
    if window % 2 == 0 {
        return Err(EsrError::parameter(
            operation,
            format!("Savitzky-Golay window must be odd, got {window}"),
        ));
    }
    if window <= polyorder {
        return Err(EsrError::parameter(
            operation,
            format!("Savitzky-Golay window {window} must exceed polyorder {polyorder}"),
        ));
    }
    if window > signal.len() {
        return Err(EsrError::parameter(
            operation,
            format!(
                "Savitzky-Golay window {window} exceeds the trace length {}",
                signal.len()
            ),
        ));
    }

    let projection = projection_matrix(window, polyorder)
        .map_err(|error| EsrError::parameter(operation, error.to_string()))?;
    let half = window / 2;
    let count = signal.len();
    let apply = |row: usize, start: usize| -> f64 {
        (0..window)
            .map(|col| projection[(row, col)] * signal[start + col])
            .sum()
    };

    let smoothed = (0..count)
        .map(|index| {
            if index < half {
                apply(index, 0)
            } else if index + half >= count {
                let start = count - window;
                apply(index - start, start)
            } else {
                apply(half, index - half)
            }
        })
        .collect();
    Ok(smoothed)
}

/// Hat matrix `A (A^T A)^-1 A^T` of the local polynomial basis, with sample
/// offsets scaled to [-1, 1] to keep the normal matrix well conditioned.
fn projection_matrix(
    window: usize,
    polyorder: usize,
) -> Result<DenseMatrix, crate::numerics::LuError> {
    let half = (window / 2).max(1) as f64;
    let terms = polyorder + 1;
    let mut design = DenseMatrix::zeros(window, terms);
    for row in 0..window {
        let t = (row as f64 - (window / 2) as f64) / half;
        let mut power = 1.0;
        for col in 0..terms {
            design[(row, col)] = power;
            power *= t;
        }
    }

    let mut normal = DenseMatrix::zeros(terms, terms);
    for i in 0..terms {
        for j in 0..terms {
            normal[(i, j)] = (0..window)
                .map(|row| design[(row, i)] * design[(row, j)])
                .sum();
        }
    }
    let inverse = invert_normal_matrix(&normal)?;

    let mut projection = DenseMatrix::zeros(window, window);
    for row in 0..window {
        for col in 0..window {
            let mut value = 0.0;
            for i in 0..terms {
                for j in 0..terms {
                    value += design[(row, i)] * inverse[(i, j)] * design[(col, j)];
                }
            }
            projection[(row, col)] = value;
        }
    }
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use super::{SmoothingMethod, smooth};
    use crate::domain::{EsrErrorKind, Spectrum, SpectrumMetadata};

    fn trace(signal: Vec<f64>) -> Spectrum {
        let field = (0..signal.len())
            .map(|index| 0.33 + 1.0e-5 * index as f64)
            .collect();
        Spectrum::derivative(field, signal, SpectrumMetadata::default()).expect("valid trace")
    }

    #[test]
    fn preserves_polynomials_up_to_polyorder_including_edges() {
        let signal: Vec<f64> = (0..40)
            .map(|index| {
                let x = index as f64 * 0.1;
                1.0 - 2.0 * x + 0.5 * x * x - 0.05 * x * x * x
            })
            .collect();
        let smoothed = smooth(
            &trace(signal.clone()),
            &SmoothingMethod::SavitzkyGolay {
                window: 9,
                polyorder: 3,
            },
        )
        .expect("smooth");
        for (filtered, original) in smoothed.signal().iter().zip(&signal) {
            assert!((filtered - original).abs() < 1.0e-9);
        }
    }

    #[test]
    fn attenuates_alternating_noise() {
        let signal: Vec<f64> = (0..50)
            .map(|index| if index % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let smoothed = smooth(
            &trace(signal),
            &SmoothingMethod::SavitzkyGolay {
                window: 11,
                polyorder: 2,
            },
        )
        .expect("smooth");
        let interior_peak = smoothed.signal()[10..40]
            .iter()
            .fold(0.0_f64, |peak, value| peak.max(value.abs()));
        assert!(interior_peak < 0.2);
    }

    #[test]
    fn rejects_invalid_windows() {
        let spectrum = trace(vec![0.0; 10]);
        for (window, polyorder) in [(4, 2), (3, 3), (11, 2)] {
            let error = smooth(
                &spectrum,
                &SmoothingMethod::SavitzkyGolay { window, polyorder },
            )
            .expect_err("invalid window");
            assert_eq!(error.kind(), EsrErrorKind::Parameter);
        }
    }
}
