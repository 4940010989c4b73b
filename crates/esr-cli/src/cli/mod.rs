mod commands;
mod loader;
mod report;

use clap::Parser;
use esr_core::EsrError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub(crate) const LOG_ENV: &str = "ESR_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";
const USAGE_EXIT_CODE: i32 = 2;
const IO_EXIT_CODE: i32 = 3;

pub fn run_from_env() -> i32 {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", error.diagnostic_line());
            error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("esr".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Stderr logging filtered by `ESR_LOG` (same syntax as `RUST_LOG`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok();
}

#[derive(Parser)]
#[command(name = "esr", about = "ESR/EPR spectrum analysis")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Preprocess, fit and extract physical parameters from one trace
    Analyze(commands::AnalyzeArgs),
    /// Double-integrate a sample and calibrate it against a reference trace
    Quantify(commands::QuantifyArgs),
    /// Apply one recipe to every matching trace in a directory
    Batch(commands::BatchArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Analyze(args) => commands::run_analyze_command(args),
        CliCommand::Quantify(args) => commands::run_quantify_command(args),
        CliCommand::Batch(args) => commands::run_batch_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(EsrError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EsrError> for CliError {
    fn from(error: EsrError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => USAGE_EXIT_CODE,
            Self::Compute(error) => error.exit_code(),
            Self::Internal(_) => IO_EXIT_CODE,
        }
    }

    pub fn diagnostic_line(&self) -> String {
        match self {
            Self::Usage(message) => format!("ERROR: UsageError {}", message.trim_end()),
            Self::Compute(error) => error.diagnostic_line(),
            Self::Internal(error) => format!("ERROR: IoError {error:#}"),
        }
    }
}
