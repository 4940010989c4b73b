//! Spectrum-to-spectrum preprocessing. Every operation validates its
//! parameters, leaves the input untouched and returns a derived spectrum whose
//! provenance records the call.

mod baseline;
mod integration;
mod phase;
mod range;
mod smoothing;

pub use baseline::{
    BaselineMethod, MAX_POLYNOMIAL_ORDER, SplineAnchors, estimate_baseline, remove_baseline,
};
pub use integration::{
    AreaIntegration, BackgroundPolicy, DEFAULT_TAIL_FRACTION, to_absorption, to_area, to_derivative,
};
pub use phase::{PhaseMode, PhaseSearch, find_auto_phase, phase_correct};
pub use range::{select_region, subset};
pub use smoothing::{SmoothingMethod, smooth};

use serde::Serialize;

/// Compact JSON rendering of operation parameters for provenance records.
pub(crate) fn describe<T: Serialize>(parameters: &T) -> String {
    serde_json::to_string(parameters).unwrap_or_default()
}
