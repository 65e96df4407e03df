use crate::config::TelemetryConfig;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

pub const GEOCODE_RECORDS: &str = "wnv_geocode_records_total";
pub const STAGE_RUNS: &str = "wnv_stage_runs_total";
pub const LAYERS_PUBLISHED: &str = "wnv_layers_published_total";

#[derive(Debug)]
pub enum TelemetryError {
    EnvFilter { value: String, source: ParseError },
    LogFile { path: PathBuf, source: std::io::Error },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
    Metrics(BuildError),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::EnvFilter { value, .. } => {
                write!(
                    f,
                    "invalid log level/filter '{}': unable to build EnvFilter",
                    value
                )
            }
            TelemetryError::LogFile { path, .. } => {
                write!(f, "unable to open log file {}", path.display())
            }
            TelemetryError::Subscriber(err) => write!(f, "telemetry error: {err}"),
            TelemetryError::Metrics(err) => write!(f, "metrics recorder error: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::EnvFilter { source, .. } => Some(source),
            TelemetryError::LogFile { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
            TelemetryError::Metrics(err) => Some(err),
        }
    }
}

/// Installs the global subscriber. Events go to stderr, or to `log_file`
/// when one is configured. Each run starts that file afresh.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(&config.log_level).map_err(|source| TelemetryError::EnvFilter {
                value: config.log_level.clone(),
                source,
            })?
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_ansi(false);

    match &config.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(TelemetryError::Subscriber)
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(TelemetryError::Subscriber),
    }
}

fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Installs the global Prometheus recorder without an HTTP listener; the
/// handle renders the text exposition format on demand.
pub fn install_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(TelemetryError::Metrics)?;

    metrics::describe_counter!(GEOCODE_RECORDS, "Address records processed by outcome");
    metrics::describe_counter!(STAGE_RUNS, "Pipeline stage executions by stage and outcome");
    metrics::describe_counter!(LAYERS_PUBLISHED, "Layers added to the map document");

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_reported() {
        std::env::remove_var("RUST_LOG");
        let config = TelemetryConfig {
            log_level: "wnv=loudest".to_string(),
            log_file: None,
        };

        match init(&config) {
            Err(TelemetryError::EnvFilter { value, .. }) => assert_eq!(value, "wnv=loudest"),
            other => panic!("expected filter error, got {other:?}"),
        }
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        std::env::remove_var("RUST_LOG");
        let dir = tempfile::tempdir().expect("temp dir");
        let config = TelemetryConfig {
            log_level: "info".to_string(),
            log_file: Some(dir.path().join("missing").join("wnv.log")),
        };

        let error = init(&config).expect_err("parent directory is missing");
        assert!(matches!(error, TelemetryError::LogFile { .. }));
    }

    #[test]
    fn log_file_is_truncated_on_open() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("wnv.log");
        std::fs::write(&path, "previous run\nmore lines\n").expect("seed log");

        let mut file = open_log_file(&path).expect("log file opens");
        writeln!(file, "this run").expect("write log");
        drop(file);

        assert_eq!(
            std::fs::read_to_string(&path).expect("read log"),
            "this run\n"
        );
    }
}
