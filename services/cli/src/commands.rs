use crate::infra::Backends;
use chrono::Local;
use clap::Args;
use wnv_outbreak::config::PipelineConfig;
use wnv_outbreak::error::AppError;
use wnv_outbreak::workflows::analysis::AnalysisReport;
use wnv_outbreak::workflows::etl::{
    AddressSheetEtl, CensusGeocoder, EtlOutcome, Geocoder, PublishedSheetSource, SpatialEtl,
};
use wnv_outbreak::workflows::prompt::StdinPrompt;
use wnv_outbreak::workflows::publish::Publication;
use wnv_outbreak::workflows::{EtlStage, OutbreakRun, RunOptions, RunServices, RunSummary};

#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Run against an in-memory workspace and map instead of ArcPy
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Reuse the exclusion point layer already in the workspace
    #[arg(long)]
    pub(crate) skip_etl: bool,
    /// Name of the intersect output layer (skips the prompt)
    #[arg(long)]
    pub(crate) intersect_output: Option<String>,
    /// Map subtitle appended to the layout title (skips the prompt)
    #[arg(long)]
    pub(crate) subtitle: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct EtlArgs {
    /// Load points into an in-memory workspace instead of ArcPy
    #[arg(long)]
    pub(crate) dry_run: bool,
}

#[derive(Args, Debug)]
pub(crate) struct GeocodeArgs {
    /// Street address, without city or state
    pub(crate) address: String,
}

pub(crate) fn run_outbreak(mut config: PipelineConfig, args: RunArgs) -> Result<(), AppError> {
    let RunArgs {
        dry_run,
        skip_etl,
        intersect_output,
        subtitle,
    } = args;

    if intersect_output.is_some() {
        config.intersect_output = intersect_output;
    }
    if subtitle.is_some() {
        config.map.subtitle = subtitle;
    }

    let backends = Backends::build(&config, dry_run)?;
    let source = PublishedSheetSource::new(config.remote_url.clone(), &config.http)?;
    let geocoder = CensusGeocoder::new(config.geocoder.clone(), &config.http)?;
    let input = StdinPrompt;
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: backends.engine.as_ref(),
        map: backends.map.as_ref(),
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions { skip_etl }).execute()?;
    render_run_summary(&summary, dry_run);
    Ok(())
}

pub(crate) fn run_etl(config: &PipelineConfig, args: EtlArgs) -> Result<(), AppError> {
    let backends = Backends::build(config, args.dry_run)?;
    let source = PublishedSheetSource::new(config.remote_url.clone(), &config.http)?;
    let geocoder = CensusGeocoder::new(config.geocoder.clone(), &config.http)?;

    let outcome =
        AddressSheetEtl::new(config, &source, &geocoder, backends.engine.as_ref()).process()?;
    render_etl(&outcome);
    Ok(())
}

pub(crate) fn run_geocode(config: &PipelineConfig, args: GeocodeArgs) -> Result<(), AppError> {
    let geocoder = CensusGeocoder::new(config.geocoder.clone(), &config.http)?;
    let query = geocoder.qualified_address(&args.address);

    match geocoder.geocode(&args.address)? {
        Some(point) => println!("{query}: {}, {} ({})", point.x, point.y, point.category),
        None => println!("{query}: no match"),
    }
    Ok(())
}

fn render_run_summary(summary: &RunSummary, dry_run: bool) {
    println!("West Nile outbreak run");
    if dry_run {
        println!("Mode: dry run (in-memory workspace)");
    }
    println!(
        "Started {} | finished {} ({} ms)",
        summary.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        summary.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        (summary.finished_at - summary.started_at).num_milliseconds()
    );

    match &summary.etl {
        EtlStage::Loaded(outcome) => render_etl(outcome),
        EtlStage::Skipped => println!("\nETL skipped"),
        EtlStage::Failed(err) => {
            println!("\nETL failed: {err}");
            println!("- Continued with the existing exclusion layer");
        }
    }
    render_analysis(&summary.analysis);
    render_publication(&summary.publication);
}

fn render_etl(outcome: &EtlOutcome) {
    let report = &outcome.report;
    println!("\nGeocoding");
    println!(
        "- {} records: {} matched, {} unmatched, {} failed",
        report.total,
        report.matched(),
        report.unmatched,
        report.failed
    );
    println!("- Point table: {}", report.table.display());
    println!(
        "- Layer {}: {} features",
        outcome.layer.name, outcome.layer.feature_count
    );
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
}

fn render_analysis(report: &AnalysisReport) {
    println!("\nAnalysis");
    for buffer in &report.buffers {
        match &buffer.result {
            Ok(layer) => println!(
                "- buffer {} -> {} ({} features)",
                buffer.source, layer.name, layer.feature_count
            ),
            Err(err) => println!("- buffer {} skipped: {err}", buffer.source),
        }
    }
    for (stage, layer) in [
        ("intersect", &report.intersect),
        ("erase", &report.erase),
        ("spatial join", &report.join),
    ] {
        if let Some(layer) = layer {
            println!(
                "- {stage} -> {} ({} {} features)",
                layer.name,
                layer.feature_count,
                layer.kind.label()
            );
        }
    }
    if let Some(failure) = &report.failure {
        println!("- halted: {failure}");
    }
}

fn render_publication(publication: &Publication) {
    println!("\nMap");
    if !publication.added.is_empty() {
        println!("- Added: {}", publication.added.join(", "));
    }
    if !publication.present.is_empty() {
        println!("- Already on map: {}", publication.present.join(", "));
    }
    if !publication.skipped.is_empty() {
        println!("- Not found: {}", publication.skipped.join(", "));
    }
    println!(
        "- Symbology applied: {} | join filter applied: {} | titles updated: {}",
        publication.styled, publication.filtered, publication.titles_updated
    );
    for warning in &publication.warnings {
        println!("  warning: {warning}");
    }
    println!("- PDF: {}", publication.pdf_path.display());
}
