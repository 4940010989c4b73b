use super::model::{AmplitudeSign, ComponentGuess};
use crate::numerics::cumulative_trapezoid;

/// Starting values read off the derivative trace: width is the field span
/// between the signal extrema, the center their midpoint, the amplitude half
/// their difference (negative when the high-field lobe is the positive one).
pub(crate) fn single_component(field: &[f64], signal: &[f64], min_width: f64) -> ComponentGuess {
    estimate_between(field, signal, 0, field.len(), min_width)
}

/// One guess per component. Maxima of the once-integrated signal are ranked
/// by height, the strongest `components` are kept and each neighbourhood
/// (bounded by the midpoints to adjacent peaks) is estimated like a single
/// line. Missing peaks are filled with evenly spaced placeholders.
pub(crate) fn multiple_components(
    field: &[f64],
    signal: &[f64],
    components: usize,
    sign: AmplitudeSign,
    min_width: f64,
) -> Vec<ComponentGuess> {
    if components <= 1 {
        return vec![single_component(field, signal, min_width)];
    }

    let orientation = if sign == AmplitudeSign::Negative {
        -1.0
    } else {
        1.0
    };
    let absorption: Vec<f64> = cumulative_trapezoid(field, signal)
        .into_iter()
        .map(|value| orientation * value)
        .collect();

    let mut candidates: Vec<usize> = (1..absorption.len().saturating_sub(1))
        .filter(|index| {
            absorption[*index] > absorption[index - 1]
                && absorption[*index] >= absorption[index + 1]
        })
        .collect();
    candidates.sort_by(|a, b| absorption[*b].total_cmp(&absorption[*a]));

    // Noise ripples on top of one line must not count as a second peak.
    let count = field.len();
    let exclusion = (field[count - 1] - field[0]) / (4 * components) as f64;
    let mut peaks: Vec<usize> = Vec::with_capacity(components);
    for candidate in candidates {
        if peaks.len() == components {
            break;
        }
        if peaks
            .iter()
            .all(|peak| (field[*peak] - field[candidate]).abs() >= exclusion)
        {
            peaks.push(candidate);
        }
    }

    let placeholders = (1..=components).map(|slot| (slot * (count - 1)) / (components + 1));
    for candidate in placeholders {
        if peaks.len() == components {
            break;
        }
        if !peaks.contains(&candidate) {
            peaks.push(candidate);
        }
    }
    while peaks.len() < components {
        peaks.push(count / 2);
    }
    peaks.sort_unstable();

    let fallback_width = (field[count - 1] - field[0]) / (2 * components) as f64;
    (0..components)
        .map(|position| {
            let peak = peaks[position];
            let start = if position == 0 {
                0
            } else {
                (peaks[position - 1] + peak).div_ceil(2)
            };
            let end = if position + 1 == components {
                count
            } else {
                (peak + peaks[position + 1]) / 2 + 1
            };
            let end = end.max(start + 2).min(count);
            let mut guess = estimate_between(field, signal, start, end, min_width);
            if end.saturating_sub(start) < 3 {
                guess.center_field_t = field[peak];
                guess.peak_to_peak_width_t = fallback_width.max(min_width);
            }
            guess
        })
        .collect()
}

fn estimate_between(
    field: &[f64],
    signal: &[f64],
    start: usize,
    end: usize,
    min_width: f64,
) -> ComponentGuess {
    let (mut max_index, mut min_index) = (start, start);
    for index in start..end {
        if signal[index] > signal[max_index] {
            max_index = index;
        }
        if signal[index] < signal[min_index] {
            min_index = index;
        }
    }

    let width = (field[min_index] - field[max_index]).abs().max(min_width);
    let center = 0.5 * (field[min_index] + field[max_index]);
    let half_difference = 0.5 * (signal[max_index] - signal[min_index]);
    let amplitude = if max_index <= min_index {
        half_difference
    } else {
        -half_difference
    };

    ComponentGuess {
        center_field_t: center,
        peak_to_peak_width_t: width,
        amplitude,
        phase_fraction: None,
    }
}
