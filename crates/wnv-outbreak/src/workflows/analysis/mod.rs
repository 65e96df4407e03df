//! Buffer → intersect → erase → spatial join, each stage gated on the layers
//! it needs.

mod naming;

pub use naming::{buffer_layer_name, sanitize_layer_name, MAX_LAYER_NAME_CHARS};

use crate::config::LayerConfig;
use crate::gis::{
    describe_layer, BufferDistance, EngineError, GeoEngine, JoinAttributes, JoinOperation,
    JoinType, LayerRef,
};
use crate::telemetry;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Buffer,
    Intersect,
    Erase,
    SpatialJoin,
}

impl StageKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Intersect => "intersect",
            Self::Erase => "erase",
            Self::SpatialJoin => "spatial_join",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(StageKind),
    Done(StageKind),
    Complete,
    Failed(StageKind),
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("none of the intersect inputs exist: {}", .candidates.join(", "))]
    NoInputLayers { candidates: Vec<String> },
    #[error("{stage} input layer {layer} does not exist")]
    MissingInput { stage: StageKind, layer: String },
    #[error("{stage} did not create {layer}")]
    OutputNotCreated { stage: StageKind, layer: String },
    #[error("{stage} failed: {source}")]
    Engine {
        stage: StageKind,
        #[source]
        source: EngineError,
    },
}

impl StageError {
    fn engine(stage: StageKind) -> impl FnOnce(EngineError) -> Self {
        move |source| Self::Engine { stage, source }
    }
}

/// Layer names for one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPlan {
    pub buffer_sources: Vec<String>,
    pub buffer_distance: BufferDistance,
    pub exclusion_layer: String,
    pub intersect_inputs: Vec<String>,
    pub intersect_output: String,
    pub erase_output: String,
    pub address_layer: String,
    pub join_output: String,
}

impl AnalysisPlan {
    /// Builds the plan; `requested_intersect` is sanitized and falls back to
    /// the configured default name.
    pub fn from_config(layers: &LayerConfig, requested_intersect: &str) -> Self {
        Self {
            buffer_sources: layers.buffer_sources.clone(),
            buffer_distance: layers.buffer_distance,
            exclusion_layer: layers.exclusion_layer.clone(),
            intersect_inputs: layers.intersect_layers.clone(),
            intersect_output: sanitize_layer_name(
                requested_intersect,
                &layers.default_intersect_output,
            ),
            erase_output: layers.erase_output.clone(),
            address_layer: layers.address_layer.clone(),
            join_output: layers.join_output.clone(),
        }
    }

    pub fn exclusion_buffer(&self) -> String {
        buffer_layer_name(&self.exclusion_layer)
    }

    /// Sources buffered in order: configured layers, then the exclusion layer.
    pub fn buffer_inputs(&self) -> Vec<String> {
        let mut inputs = self.buffer_sources.clone();
        if !inputs.contains(&self.exclusion_layer) {
            inputs.push(self.exclusion_layer.clone());
        }
        inputs
    }
}

#[derive(Debug)]
pub struct BufferResult {
    pub source: String,
    pub output: String,
    pub result: Result<LayerRef, StageError>,
}

#[derive(Debug)]
pub struct AnalysisReport {
    pub buffers: Vec<BufferResult>,
    pub intersect: Option<LayerRef>,
    pub erase: Option<LayerRef>,
    pub join: Option<LayerRef>,
    pub state: PipelineState,
    pub failure: Option<StageError>,
}

impl AnalysisReport {
    /// Names of the intersect, erase and join layers that were produced.
    pub fn produced_layers(&self) -> Vec<String> {
        [&self.intersect, &self.erase, &self.join]
            .into_iter()
            .flatten()
            .map(|layer| layer.name.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Complete
    }
}

#[derive(Debug)]
pub struct AnalysisPipeline<'a> {
    engine: &'a dyn GeoEngine,
    plan: AnalysisPlan,
}

impl<'a> AnalysisPipeline<'a> {
    pub fn new(engine: &'a dyn GeoEngine, plan: AnalysisPlan) -> Self {
        Self { engine, plan }
    }

    /// Runs every stage in order. Buffer failures are per layer; any other
    /// stage failure stops the run and is returned in the report.
    pub fn run(&self) -> AnalysisReport {
        let mut report = AnalysisReport {
            buffers: Vec::new(),
            intersect: None,
            erase: None,
            join: None,
            state: PipelineState::Pending,
            failure: None,
        };

        self.transition(&mut report, PipelineState::Running(StageKind::Buffer));
        report.buffers = self.buffer_all();
        self.transition(&mut report, PipelineState::Done(StageKind::Buffer));

        self.transition(&mut report, PipelineState::Running(StageKind::Intersect));
        let intersect = match self.record(StageKind::Intersect, self.intersect()) {
            Ok(layer) => layer,
            Err(err) => return self.fail(report, StageKind::Intersect, err),
        };
        report.intersect = Some(intersect.clone());
        self.transition(&mut report, PipelineState::Done(StageKind::Intersect));

        self.transition(&mut report, PipelineState::Running(StageKind::Erase));
        let erased = match self.record(StageKind::Erase, self.erase(&intersect.name)) {
            Ok(layer) => layer,
            Err(err) => return self.fail(report, StageKind::Erase, err),
        };
        report.erase = Some(erased.clone());
        self.transition(&mut report, PipelineState::Done(StageKind::Erase));

        self.transition(&mut report, PipelineState::Running(StageKind::SpatialJoin));
        match self.record(StageKind::SpatialJoin, self.spatial_join(&erased.name)) {
            Ok(layer) => report.join = Some(layer),
            Err(err) => return self.fail(report, StageKind::SpatialJoin, err),
        }

        self.transition(&mut report, PipelineState::Complete);
        info!(layers = ?report.produced_layers(), "analysis complete");
        report
    }

    /// Buffers each source layer into `buf_<name>`. Missing sources are
    /// skipped without calling the engine.
    pub fn buffer_all(&self) -> Vec<BufferResult> {
        self.plan
            .buffer_inputs()
            .into_iter()
            .map(|source| {
                let output = buffer_layer_name(&source);
                let result = self.buffer(&source, &output);
                match &result {
                    Ok(layer) => {
                        info!(layer = %layer.name, features = layer.feature_count, "buffer created");
                        count_stage(StageKind::Buffer, "ok");
                    }
                    Err(err @ StageError::MissingInput { .. }) => {
                        warn!(layer = %source, error = %err, "skipping buffer");
                        count_stage(StageKind::Buffer, "skipped");
                    }
                    Err(err) => {
                        error!(layer = %source, error = %err, "buffer failed");
                        count_stage(StageKind::Buffer, "failed");
                    }
                }
                BufferResult {
                    source,
                    output,
                    result,
                }
            })
            .collect()
    }

    fn buffer(&self, source: &str, output: &str) -> Result<LayerRef, StageError> {
        self.require(StageKind::Buffer, source)?;
        debug!(layer = source, output, distance = %self.plan.buffer_distance, "buffering");
        self.engine
            .buffer(source, output, &self.plan.buffer_distance)
            .map_err(StageError::engine(StageKind::Buffer))?;
        self.verify(StageKind::Buffer, output)
    }

    /// Intersects whichever configured inputs exist.
    pub fn intersect(&self) -> Result<LayerRef, StageError> {
        let mut existing = Vec::new();
        for name in &self.plan.intersect_inputs {
            if self.exists(StageKind::Intersect, name)? {
                existing.push(name.clone());
            } else {
                warn!(layer = %name, "intersect input missing; leaving it out");
            }
        }
        if existing.is_empty() {
            return Err(StageError::NoInputLayers {
                candidates: self.plan.intersect_inputs.clone(),
            });
        }

        let output = &self.plan.intersect_output;
        debug!(inputs = ?existing, output = %output, "intersecting");
        self.engine
            .intersect(&existing, output, JoinAttributes::All)
            .map_err(StageError::engine(StageKind::Intersect))?;
        self.verify(StageKind::Intersect, output)
    }

    /// Removes the exclusion buffer from `input`.
    pub fn erase(&self, input: &str) -> Result<LayerRef, StageError> {
        let exclusion = self.plan.exclusion_buffer();
        self.require(StageKind::Erase, input)?;
        self.require(StageKind::Erase, &exclusion)?;

        let output = &self.plan.erase_output;
        debug!(input, erase = %exclusion, output = %output, "erasing");
        self.engine
            .erase(input, &exclusion, output)
            .map_err(StageError::engine(StageKind::Erase))?;
        self.verify(StageKind::Erase, output)
    }

    /// Joins the address layer to `join_layer`, one to one, keeping all
    /// addresses.
    pub fn spatial_join(&self, join_layer: &str) -> Result<LayerRef, StageError> {
        let target = &self.plan.address_layer;
        self.require(StageKind::SpatialJoin, target)?;
        self.require(StageKind::SpatialJoin, join_layer)?;

        let output = &self.plan.join_output;
        debug!(target = %target, join = join_layer, output = %output, "joining");
        self.engine
            .spatial_join(
                target,
                join_layer,
                output,
                JoinOperation::OneToOne,
                JoinType::KeepAll,
            )
            .map_err(StageError::engine(StageKind::SpatialJoin))?;
        self.verify(StageKind::SpatialJoin, output)
    }

    fn transition(&self, report: &mut AnalysisReport, next: PipelineState) {
        debug!(from = ?report.state, to = ?next, "analysis state");
        report.state = next;
    }

    fn record(
        &self,
        stage: StageKind,
        result: Result<LayerRef, StageError>,
    ) -> Result<LayerRef, StageError> {
        match &result {
            Ok(layer) => {
                info!(stage = %stage, layer = %layer.name, features = layer.feature_count, "stage complete");
                count_stage(stage, "ok");
            }
            Err(err) => {
                error!(stage = %stage, error = %err, "stage failed");
                count_stage(stage, "failed");
            }
        }
        result
    }

    fn fail(&self, mut report: AnalysisReport, stage: StageKind, err: StageError) -> AnalysisReport {
        warn!(stage = %stage, "halting analysis; later stages skipped");
        self.transition(&mut report, PipelineState::Failed(stage));
        report.failure = Some(err);
        report
    }

    fn exists(&self, stage: StageKind, name: &str) -> Result<bool, StageError> {
        self.engine.exists(name).map_err(StageError::engine(stage))
    }

    fn require(&self, stage: StageKind, name: &str) -> Result<(), StageError> {
        if self.exists(stage, name)? {
            Ok(())
        } else {
            Err(StageError::MissingInput {
                stage,
                layer: name.to_string(),
            })
        }
    }

    fn verify(&self, stage: StageKind, output: &str) -> Result<LayerRef, StageError> {
        describe_layer(self.engine, output)
            .map_err(StageError::engine(stage))?
            .ok_or_else(|| StageError::OutputNotCreated {
                stage,
                layer: output.to_string(),
            })
    }
}

fn count_stage(stage: StageKind, outcome: &'static str) {
    metrics::counter!(telemetry::STAGE_RUNS, "stage" => stage.label(), "outcome" => outcome)
        .increment(1);
}
