use num_complex::Complex64;
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `exp(-2 pi i j k / n)` kernel.
    Forward,
    /// `exp(+2 pi i j k / n)` kernel, without the `1/n` factor.
    Inverse,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Self::Forward => -1.0,
            Self::Inverse => 1.0,
        }
    }
}

/// In-place unnormalized discrete Fourier transform of any length.
///
/// Powers of two run an iterative radix-2 transform; other lengths are
/// mapped onto a power-of-two circular convolution (Bluestein chirp-z), so
/// every length costs O(n log n).
pub fn fft(values: &mut [Complex64], direction: Direction) {
    let count = values.len();
    if count <= 1 {
        return;
    }
    if count.is_power_of_two() {
        radix2(values, direction);
    } else {
        bluestein(values, direction);
    }
}

fn radix2(values: &mut [Complex64], direction: Direction) {
    let count = values.len();
    let bits = count.trailing_zeros();
    for index in 0..count {
        let reversed = index.reverse_bits() >> (usize::BITS - bits);
        if index < reversed {
            values.swap(index, reversed);
        }
    }

    let mut length = 2;
    while length <= count {
        let half = length / 2;
        let angle = direction.sign() * 2.0 * PI / length as f64;
        for start in (0..count).step_by(length) {
            for offset in 0..half {
                let twiddle = Complex64::from_polar(1.0, angle * offset as f64);
                let even = values[start + offset];
                let odd = values[start + offset + half] * twiddle;
                values[start + offset] = even + odd;
                values[start + offset + half] = even - odd;
            }
        }
        length *= 2;
    }
}

/// `X_k = c_k sum_j (x_j c_j) conj(c_(k-j))` with chirp `c_m = exp(sign i pi m^2 / n)`.
fn bluestein(values: &mut [Complex64], direction: Direction) {
    let count = values.len();
    let padded = (2 * count - 1).next_power_of_two();
    // m^2 is reduced mod 2n before scaling so the phase stays small.
    let chirp: Vec<Complex64> = (0..count)
        .map(|m| {
            let phase = ((m * m) % (2 * count)) as f64 * PI / count as f64;
            Complex64::from_polar(1.0, direction.sign() * phase)
        })
        .collect();

    let zero = Complex64::new(0.0, 0.0);
    let mut weighted = vec![zero; padded];
    for ((slot, value), factor) in weighted.iter_mut().zip(values.iter()).zip(&chirp) {
        *slot = *value * *factor;
    }
    let mut kernel = vec![zero; padded];
    kernel[0] = chirp[0].conj();
    for m in 1..count {
        kernel[m] = chirp[m].conj();
        kernel[padded - m] = chirp[m].conj();
    }

    radix2(&mut weighted, Direction::Forward);
    radix2(&mut kernel, Direction::Forward);
    for (lhs, rhs) in weighted.iter_mut().zip(&kernel) {
        *lhs *= *rhs;
    }
    radix2(&mut weighted, Direction::Inverse);

    let scale = 1.0 / padded as f64;
    for ((value, convolved), factor) in values.iter_mut().zip(&weighted).zip(&chirp) {
        *value = *convolved * *factor * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, fft};
    use num_complex::Complex64;
    use std::f64::consts::PI;

    fn direct(values: &[Complex64], sign: f64) -> Vec<Complex64> {
        let count = values.len();
        (0..count)
            .map(|frequency| {
                values
                    .iter()
                    .enumerate()
                    .map(|(sample, value)| {
                        let phase = sign * 2.0 * PI * ((frequency * sample) % count) as f64
                            / count as f64;
                        *value * Complex64::from_polar(1.0, phase)
                    })
                    .sum()
            })
            .collect()
    }

    fn samples(count: usize) -> Vec<Complex64> {
        (0..count)
            .map(|index| {
                let t = index as f64;
                Complex64::new((0.37 * t).sin() + 0.1 * t, (1.3 * t).cos() - 0.5)
            })
            .collect()
    }

    #[test]
    fn matches_the_direct_transform_for_any_length() {
        for count in [1_usize, 2, 7, 8, 12, 100, 257] {
            let input = samples(count);
            for (direction, sign) in [(Direction::Forward, -1.0), (Direction::Inverse, 1.0)] {
                let mut fast = input.clone();
                fft(&mut fast, direction);
                let expected = direct(&input, sign);
                let magnitude = expected.iter().map(|value| value.norm()).fold(1.0, f64::max);
                for (lhs, rhs) in fast.iter().zip(&expected) {
                    assert!(
                        (lhs - rhs).norm() < 1.0e-11 * magnitude,
                        "count={count}, {direction:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn inverse_undoes_forward_up_to_length() {
        let input = samples(45);
        let mut values = input.clone();
        fft(&mut values, Direction::Forward);
        fft(&mut values, Direction::Inverse);
        for (value, original) in values.iter().zip(&input) {
            assert!((*value / 45.0 - *original).norm() < 1.0e-12);
        }
    }
}
