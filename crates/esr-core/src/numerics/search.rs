/// Result of a bounded one-dimensional minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoldenSectionOutcome {
    pub argument: f64,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const INV_GOLDEN_RATIO: f64 = 0.618_033_988_749_894_9;

/// Golden-section search for a minimum of `objective` on `[lower, upper]`.
///
/// Stops when the bracket is narrower than `tolerance` or after
/// `max_iterations` shrink steps. Both endpoints are compared against the
/// interior optimum before returning, so minima sitting on a bound are found
/// even when the objective is not unimodal over the whole interval.
pub fn golden_section_minimize<F>(
    mut objective: F,
    lower: f64,
    upper: f64,
    tolerance: f64,
    max_iterations: usize,
) -> GoldenSectionOutcome
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = if lower <= upper {
        (lower, upper)
    } else {
        (upper, lower)
    };
    let tolerance = tolerance.abs().max(f64::EPSILON);

    let mut c = b - INV_GOLDEN_RATIO * (b - a);
    let mut d = a + INV_GOLDEN_RATIO * (b - a);
    let mut fc = objective(c);
    let mut fd = objective(d);
    let mut iterations = 0;

    while (b - a) > tolerance && iterations < max_iterations {
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_GOLDEN_RATIO * (b - a);
            fc = objective(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_GOLDEN_RATIO * (b - a);
            fd = objective(d);
        }
        iterations += 1;
    }

    let converged = (b - a) <= tolerance;
    let (mut argument, mut value) = if fc <= fd { (c, fc) } else { (d, fd) };
    for endpoint in [lower, upper] {
        let endpoint_value = objective(endpoint);
        if endpoint_value < value {
            argument = endpoint;
            value = endpoint_value;
        }
    }

    GoldenSectionOutcome {
        argument,
        value,
        iterations,
        converged,
    }
}
