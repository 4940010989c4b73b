use super::CliError;
use super::loader::load_spectrum;
use super::report::{render_quantitation_summary, render_session_summary, write_json};
use anyhow::Context;
use esr_core::common::units::{ghz_to_hz, mt_to_t};
use esr_core::modules::fitting::{FitConfig, LineShape};
use esr_core::modules::physics::{FrequencySource, PhysicsOptions};
use esr_core::modules::preprocess::{BackgroundPolicy, BaselineMethod};
use esr_core::modules::quantitation::{
    ReferenceStandard, SampleNormalization, calibrate, double_integrate,
};
use esr_core::modules::session::{
    AnalysisRecipe, PreprocessStep, QuantitationSettings, load_analysis_recipe, replay,
    run_analysis,
};
use globset::Glob;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(super) enum ShapeArg {
    Lorentzian,
    Gaussian,
    Voigt,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(super) enum PolicyArg {
    None,
    Endpoints,
    LinearTails,
    PolynomialTails,
}

#[derive(clap::Args, Default)]
pub(super) struct PreprocessFlags {
    /// Lower bound of the region of interest, mT
    #[arg(long, requires = "field_max_mt")]
    field_min_mt: Option<f64>,

    /// Upper bound of the region of interest, mT
    #[arg(long, requires = "field_min_mt")]
    field_max_mt: Option<f64>,

    /// Subtract a polynomial baseline of this order fitted outside the region
    #[arg(long)]
    baseline_order: Option<usize>,

    /// Fit the baseline polynomial with a soft-L1 loss that discounts spikes
    #[arg(long, requires = "baseline_order")]
    baseline_robust: bool,
}

impl PreprocessFlags {
    fn steps(&self) -> Vec<PreprocessStep> {
        let mut steps = Vec::new();
        if let (Some(min), Some(max)) = (self.field_min_mt, self.field_max_mt) {
            steps.push(PreprocessStep::SelectRegion {
                field_min_t: mt_to_t(min),
                field_max_t: mt_to_t(max),
            });
        }
        if let Some(order) = self.baseline_order {
            let baseline = if self.baseline_robust {
                BaselineMethod::RobustPolynomial { order }
            } else {
                BaselineMethod::Polynomial { order }
            };
            steps.push(PreprocessStep::RemoveBaseline { baseline });
        }
        steps
    }
}

#[derive(clap::Args)]
pub(super) struct AnalyzeArgs {
    /// Two-column spectrum file (field, derivative signal)
    input: PathBuf,

    /// JSON analysis recipe; replaces the preprocessing and fit flags
    #[arg(long)]
    recipe: Option<PathBuf>,

    /// Line shape fitted to every component
    #[arg(long, value_enum, default_value = "lorentzian")]
    shape: ShapeArg,

    /// Lorentzian share of the Voigt width
    #[arg(long, default_value_t = 0.5)]
    lorentzian_fraction: f64,

    /// Number of fitted components
    #[arg(long, default_value_t = 1)]
    components: usize,

    /// Microwave frequency to assume when the file carries none, GHz
    #[arg(long)]
    frequency_ghz: Option<f64>,

    /// Also double-integrate the processed trace
    #[arg(long)]
    integrate: bool,

    /// JSON report path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    preprocess: PreprocessFlags,
}

impl AnalyzeArgs {
    fn recipe(&self, file_has_frequency: bool) -> Result<AnalysisRecipe, CliError> {
        let mut recipe = match &self.recipe {
            Some(path) => load_analysis_recipe(path).map_err(anyhow::Error::from)?,
            None => {
                let shape = match self.shape {
                    ShapeArg::Lorentzian => LineShape::Lorentzian,
                    ShapeArg::Gaussian => LineShape::Gaussian,
                    ShapeArg::Voigt => LineShape::Voigt {
                        lorentzian_fraction: self.lorentzian_fraction,
                    },
                };
                AnalysisRecipe {
                    steps: self.preprocess.steps(),
                    fit: Some(FitConfig::new(shape, self.components)),
                    physics: Some(PhysicsOptions::default()),
                    quantitation: self.integrate.then(QuantitationSettings::default),
                }
            }
        };
        if let Some(frequency_ghz) = self.frequency_ghz.filter(|_| !file_has_frequency) {
            let physics = recipe.physics.get_or_insert_with(PhysicsOptions::default);
            physics.frequency = FrequencySource::Assumed {
                frequency_hz: ghz_to_hz(frequency_ghz),
            };
        }
        Ok(recipe)
    }
}

pub(super) fn run_analyze_command(args: AnalyzeArgs) -> Result<i32, CliError> {
    let raw = load_spectrum(&args.input)?;
    let file_has_frequency = raw.metadata().frequency_hz.is_some();
    if args.frequency_ghz.is_some() && file_has_frequency {
        warn!("--frequency-ghz ignored; the file records its own frequency");
    }
    let recipe = args.recipe(file_has_frequency)?;

    let record = run_analysis(&raw, &recipe, args.input.display().to_string())?;
    write_json(args.output.as_deref(), &record)?;
    if args.output.is_some() {
        print!("{}", render_session_summary(&record));
    }
    Ok(0)
}

#[derive(clap::Args)]
pub(super) struct QuantifyArgs {
    /// Sample spectrum file
    sample: PathBuf,

    /// Reference standard spectrum file
    #[arg(long)]
    reference: PathBuf,

    /// Known spin count of the reference standard
    #[arg(long)]
    reference_spins: f64,

    /// Uncertainty of the reference spin count
    #[arg(long)]
    reference_spins_uncertainty: Option<f64>,

    /// Identifier reported for the reference (defaults to its file stem)
    #[arg(long)]
    reference_id: Option<String>,

    /// Secondary background subtracted before the second integration
    #[arg(long, value_enum, default_value = "linear-tails")]
    policy: PolicyArg,

    /// Share of points per side used as baseline tails
    #[arg(long, default_value_t = 0.05)]
    tail_fraction: f64,

    /// Polynomial order for the polynomial-tails policy
    #[arg(long, default_value_t = 2)]
    tail_order: usize,

    /// Tail excursion relative to the absorption peak that flags a degraded baseline
    #[arg(long, default_value_t = 0.05)]
    quality_threshold: f64,

    /// Sample scans
    #[arg(long)]
    scans: Option<f64>,

    /// Sample receiver gain
    #[arg(long)]
    receiver_gain: Option<f64>,

    /// Sample mass or concentration
    #[arg(long)]
    mass: Option<f64>,

    /// Reference scans
    #[arg(long)]
    reference_scans: Option<f64>,

    /// Reference receiver gain
    #[arg(long)]
    reference_receiver_gain: Option<f64>,

    /// Reference mass or concentration
    #[arg(long)]
    reference_mass: Option<f64>,

    /// JSON report path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    preprocess: PreprocessFlags,
}

impl QuantifyArgs {
    fn policy(&self) -> BackgroundPolicy {
        match self.policy {
            PolicyArg::None => BackgroundPolicy::None,
            PolicyArg::Endpoints => BackgroundPolicy::Endpoints,
            PolicyArg::LinearTails => BackgroundPolicy::LinearTails {
                tail_fraction: self.tail_fraction,
            },
            PolicyArg::PolynomialTails => BackgroundPolicy::PolynomialTails {
                order: self.tail_order,
                tail_fraction: self.tail_fraction,
            },
        }
    }
}

pub(super) fn run_quantify_command(args: QuantifyArgs) -> Result<i32, CliError> {
    let steps = args.preprocess.steps();
    let policy = args.policy();

    let reference_trace = replay(&load_spectrum(&args.reference)?, &steps)?;
    let reference_integral = double_integrate(&reference_trace, &policy, args.quality_threshold)?;
    let sample_trace = replay(&load_spectrum(&args.sample)?, &steps)?;
    let sample_integral = double_integrate(&sample_trace, &policy, args.quality_threshold)?;

    let reference = ReferenceStandard {
        id: args.reference_id.clone().unwrap_or_else(|| file_stem(&args.reference)),
        area: reference_integral.area,
        area_uncertainty: reference_integral.area_uncertainty,
        spin_count: args.reference_spins,
        spin_count_uncertainty: args.reference_spins_uncertainty,
        normalization: SampleNormalization {
            scans: args.reference_scans,
            receiver_gain: args.reference_receiver_gain,
            mass_or_concentration: args.reference_mass,
        },
    };
    let normalization = SampleNormalization {
        scans: args.scans,
        receiver_gain: args.receiver_gain,
        mass_or_concentration: args.mass,
    };
    let result = calibrate(&sample_integral, &reference, &normalization)?;

    write_json(args.output.as_deref(), &result)?;
    if args.output.is_some() {
        print!("{}", render_quantitation_summary(&result));
    }
    Ok(0)
}

#[derive(clap::Args)]
pub(super) struct BatchArgs {
    /// Directory holding the spectra
    directory: PathBuf,

    /// JSON analysis recipe applied to every file
    #[arg(long)]
    recipe: PathBuf,

    /// File-name glob selecting the spectra
    #[arg(long, default_value = "*.{csv,txt,dat}")]
    pattern: String,

    /// Directory receiving one report per input plus summary.json
    #[arg(long)]
    output_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct BatchEntry {
    input: String,
    report: Option<String>,
    exit_code: i32,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    recipe: String,
    processed: usize,
    failed: usize,
    entries: Vec<BatchEntry>,
}

pub(super) fn run_batch_command(args: BatchArgs) -> Result<i32, CliError> {
    let matcher = Glob::new(&args.pattern)
        .map_err(|source| {
            CliError::Usage(format!("invalid --pattern '{}': {source}", args.pattern))
        })?
        .compile_matcher();
    let recipe = load_analysis_recipe(&args.recipe).map_err(anyhow::Error::from)?;
    let inputs = matching_files(&args.directory, |name| matcher.is_match(name))?;
    if inputs.is_empty() {
        return Err(CliError::Usage(format!(
            "no files in '{}' match '{}'",
            args.directory.display(),
            args.pattern
        )));
    }

    let mut entries = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let report_path = args.output_dir.join(format!("{}.json", file_stem(input)));
        let outcome = load_spectrum(input).and_then(|raw| {
            let record = run_analysis(&raw, &recipe, input.display().to_string())?;
            write_json(Some(&report_path), &record)
        });
        let entry = match outcome {
            Ok(()) => BatchEntry {
                input: input.display().to_string(),
                report: Some(report_path.display().to_string()),
                exit_code: 0,
                error: None,
            },
            Err(error) => {
                warn!(input = %input.display(), error = %error, "batch entry failed");
                BatchEntry {
                    input: input.display().to_string(),
                    report: None,
                    exit_code: error.exit_code(),
                    error: Some(error.diagnostic_line()),
                }
            }
        };
        entries.push(entry);
    }

    let failed = entries.iter().filter(|entry| entry.exit_code != 0).count();
    let exit_code = entries
        .iter()
        .map(|entry| entry.exit_code)
        .max()
        .unwrap_or(0);
    let summary = BatchSummary {
        recipe: args.recipe.display().to_string(),
        processed: entries.len(),
        failed,
        entries,
    };
    write_json(Some(&args.output_dir.join("summary.json")), &summary)?;
    info!(processed = summary.processed, failed, "batch finished");
    println!(
        "Batch status: {} ({} of {} failed)",
        if failed == 0 { "PASS" } else { "FAIL" },
        failed,
        summary.processed
    );
    Ok(exit_code)
}

fn matching_files(
    directory: &Path,
    mut matches: impl FnMut(&str) -> bool,
) -> Result<Vec<PathBuf>, CliError> {
    let entries = fs::read_dir(directory)
        .with_context(|| format!("failed to list directory '{}'", directory.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to list directory '{}'", directory.display()))?;
        let path = entry.path();
        let selected = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| matches(name));
        if selected {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spectrum".to_string())
}
