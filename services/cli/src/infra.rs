use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use tracing::{info, warn};
use wnv_outbreak::config::PipelineConfig;
use wnv_outbreak::error::AppError;
use wnv_outbreak::gis::{
    ArcPyEngine, ArcPyMapDocument, GeoEngine, GeometryKind, MapDocument, MemoryMap,
    MemoryWorkspace, PythonRunner,
};
use wnv_outbreak::telemetry;

/// Engine and map document a command runs against.
#[derive(Debug)]
pub(crate) struct Backends {
    pub(crate) engine: Box<dyn GeoEngine>,
    pub(crate) map: Box<dyn MapDocument>,
}

impl Backends {
    /// ArcPy-backed engine and map, or in-memory stand-ins when `dry_run`.
    pub(crate) fn build(config: &PipelineConfig, dry_run: bool) -> Result<Self, AppError> {
        if dry_run {
            info!("dry run: using in-memory workspace and map");
            return Ok(Self::in_memory(config));
        }

        let engine_runner = python_runner(config)?;
        let map_runner = python_runner(config)?;
        Ok(Self {
            engine: Box::new(ArcPyEngine::new(
                engine_runner,
                &config.workspace,
                config.overwrite_output,
            )),
            map: Box::new(ArcPyMapDocument::new(map_runner, &config.project)),
        })
    }

    /// Seeds the workspace with the configured source layers so every stage
    /// has something to work on.
    fn in_memory(config: &PipelineConfig) -> Self {
        let layers = &config.layers;
        let mut workspace = MemoryWorkspace::new()
            .with_root(&config.workspace)
            .with_overwrite(config.overwrite_output)
            .with_layer(&layers.address_layer, GeometryKind::Point, 1);
        for source in &layers.buffer_sources {
            workspace = workspace.with_layer(source, GeometryKind::Polygon, 1);
        }

        Self {
            engine: Box::new(workspace),
            map: Box::new(MemoryMap::new()),
        }
    }
}

fn python_runner(config: &PipelineConfig) -> Result<PythonRunner, AppError> {
    Ok(PythonRunner::new(&config.python, config.engine_timeout)?
        .with_leading_args(config.python_args.clone()))
}

/// Writes the Prometheus text snapshot next to the project outputs.
pub(crate) struct MetricsSink {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl MetricsSink {
    pub(crate) fn install(path: PathBuf) -> Result<Self, AppError> {
        Ok(Self {
            handle: telemetry::install_metrics()?,
            path,
        })
    }

    pub(crate) fn flush(&self) {
        match std::fs::write(&self.path, self.handle.render()) {
            Ok(()) => info!(path = %self.path.display(), "metrics snapshot written"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "unable to write metrics snapshot"),
        }
    }
}
