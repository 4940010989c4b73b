use super::CliError;
use anyhow::Context;
use esr_core::common::units::t_to_mt;
use esr_core::modules::quantitation::QuantitationResult;
use esr_core::modules::session::SessionRecord;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Writes `value` as pretty JSON to `path`, creating parent directories, or to
/// stdout when no path is given.
pub(super) fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create report directory '{}'", parent.display())
                })?;
            }
            fs::write(path, rendered + "\n")
                .with_context(|| format!("failed to write report '{}'", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

pub(super) fn render_session_summary(record: &SessionRecord) -> String {
    let mut summary = format!("Input: {}\n", record.input);
    if let Some(fit) = &record.results.fit {
        summary.push_str(&format!(
            "Fit: {} x{} (reduced chi-square {:.4e}, {} iterations)\n",
            fit.shape.name(),
            fit.components.len(),
            fit.reduced_chi_square,
            fit.iterations
        ));
        for (index, line) in fit.components.iter().enumerate() {
            summary.push_str(&format!(
                "  [{index}] center {:.4} mT, dBpp {:.4} mT, amplitude {:.4e}\n",
                t_to_mt(line.center_field_t),
                t_to_mt(line.peak_to_peak_width_t),
                line.amplitude
            ));
        }
    }
    if let Some(physics) = &record.results.physics {
        summary.push_str(&format!(
            "g-factor: {:.5} +/- {:.1e}\n",
            physics.g_factor, physics.g_factor_uncertainty
        ));
        summary.push_str(&format!(
            "Linewidth ({:?}): {:.4} mT\n",
            physics.linewidth_convention,
            t_to_mt(physics.linewidth_t)
        ));
        if let Some(hyperfine) = &physics.hyperfine {
            summary.push_str(&format!(
                "Hyperfine: {:.4} mT ({:.3} MHz)\n",
                hyperfine.spacing_mt, hyperfine.a_mhz
            ));
        }
        if let Some(t2) = physics.t2_seconds {
            summary.push_str(&format!("T2: {t2:.3e} s\n"));
        }
        for flag in &physics.flags {
            summary.push_str(&format!("Flag: {flag:?}\n"));
        }
    }
    if let Some(integral) = &record.results.double_integral {
        summary.push_str(&format!(
            "Double integral: {:.6e} +/- {:.1e} ({:?} baseline)\n",
            integral.area, integral.area_uncertainty, integral.quality
        ));
    }
    if let Some(quantitation) = &record.results.quantitation {
        summary.push_str(&render_quantitation_summary(quantitation));
    }
    summary
}

pub(super) fn render_quantitation_summary(result: &QuantitationResult) -> String {
    format!(
        "Spin count: {:.6e} +/- {:.1e} (reference {}, {:?} baseline)\n",
        result.calibrated_spin_count,
        result.spin_count_uncertainty,
        result.calibration_reference_id,
        result.baseline_quality_flag
    )
}
