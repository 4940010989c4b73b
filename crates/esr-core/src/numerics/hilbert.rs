use super::fft::{Direction, fft};
use num_complex::Complex64;

/// Analytic signal `x + i H[x]` by the discrete Fourier method: keep DC (and
/// Nyquist for even lengths), double positive frequencies, drop negative ones.
pub fn analytic_signal(signal: &[f64]) -> Vec<Complex64> {
    let count = signal.len();
    if count == 0 {
        return Vec::new();
    }

    let mut spectrum: Vec<Complex64> =
        signal.iter().map(|value| Complex64::new(*value, 0.0)).collect();
    fft(&mut spectrum, Direction::Forward);
    for (frequency, coefficient) in spectrum.iter_mut().enumerate() {
        *coefficient *= analytic_weight(frequency, count);
    }
    fft(&mut spectrum, Direction::Inverse);

    let scale = 1.0 / count as f64;
    spectrum.into_iter().map(|value| value * scale).collect()
}

fn analytic_weight(frequency: usize, count: usize) -> f64 {
    if frequency == 0 || (count % 2 == 0 && frequency == count / 2) {
        1.0
    } else if frequency < count.div_ceil(2) {
        2.0
    } else {
        0.0
    }
}
