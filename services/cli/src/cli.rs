use crate::commands::{run_etl, run_geocode, run_outbreak, EtlArgs, GeocodeArgs, RunArgs};
use crate::infra::MetricsSink;
use clap::{Parser, Subcommand};
use wnv_outbreak::config::AppConfig;
use wnv_outbreak::error::AppError;
use wnv_outbreak::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "West Nile Outbreak",
    about = "Geocode reported addresses and build the West Nile outbreak map",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run ETL, analysis and map export end to end (default command)
    Run(RunArgs),
    /// Fetch and geocode the address sheet, then load it as a point layer
    Etl(EtlArgs),
    /// Geocode a single street address and print the match
    Geocode(GeocodeArgs),
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(RunArgs::default()));

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let metrics = MetricsSink::install(config.pipeline.metrics_path())?;
    info!(environment = ?config.environment, "west nile outbreak orchestrator starting");

    let result = match command {
        Command::Run(args) => run_outbreak(config.pipeline, args),
        Command::Etl(args) => run_etl(&config.pipeline, args),
        Command::Geocode(args) => run_geocode(&config.pipeline, args),
    };

    metrics.flush();
    result
}
