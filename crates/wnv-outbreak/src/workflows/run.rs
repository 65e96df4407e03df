use crate::config::PipelineConfig;
use crate::gis::{GeoEngine, MapDocument};
use crate::workflows::analysis::{AnalysisPipeline, AnalysisPlan, AnalysisReport};
use crate::workflows::etl::{
    AddressSheetEtl, AddressSource, EtlError, EtlOutcome, Geocoder, SpatialEtl,
};
use crate::workflows::prompt::{
    answer_or_prompt, sanitize_subtitle, InputProvider, INTERSECT_PROMPT, SUBTITLE_PROMPT,
};
use crate::workflows::publish::{MapPublisher, Publication, PublishError, PublishPlan};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("unable to read {what}: {source}")]
    Prompt {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse the exclusion layer already in the workspace.
    pub skip_etl: bool,
}

/// What the ETL stage of a run did.
#[derive(Debug)]
pub enum EtlStage {
    Skipped,
    Loaded(EtlOutcome),
    /// The run went on with whatever exclusion layer the workspace held.
    Failed(EtlError),
}

impl EtlStage {
    pub fn outcome(&self) -> Option<&EtlOutcome> {
        match self {
            Self::Loaded(outcome) => Some(outcome),
            Self::Skipped | Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&EtlError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Skipped | Self::Loaded(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub etl: EtlStage,
    pub analysis: AnalysisReport,
    pub publication: Publication,
}

/// External collaborators of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunServices<'a> {
    pub source: &'a dyn AddressSource,
    pub geocoder: &'a dyn Geocoder,
    pub engine: &'a dyn GeoEngine,
    pub map: &'a dyn MapDocument,
    pub input: &'a dyn InputProvider,
}

/// One full outbreak analysis: map setup, ETL, analysis, publication. Only a
/// failed prompt or PDF export ends the run early.
#[derive(Debug)]
pub struct OutbreakRun<'a> {
    config: &'a PipelineConfig,
    services: RunServices<'a>,
    options: RunOptions,
}

impl<'a> OutbreakRun<'a> {
    pub fn new(config: &'a PipelineConfig, services: RunServices<'a>, options: RunOptions) -> Self {
        Self {
            config,
            services,
            options,
        }
    }

    pub fn execute(&self) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        let RunServices {
            source,
            geocoder,
            engine,
            map,
            input,
        } = self.services;
        let publisher = MapPublisher::new(map, engine, PublishPlan::from_config(self.config));

        if let Some(wkid) = self.config.map.spatial_reference {
            if let Err(err) = publisher.prepare(wkid) {
                warn!(error = %err, "continuing without map spatial reference");
            }
        }

        let etl = if self.options.skip_etl {
            info!("skipping etl; using existing exclusion layer");
            EtlStage::Skipped
        } else {
            info!("starting etl");
            match AddressSheetEtl::new(self.config, source, geocoder, engine).process() {
                Ok(outcome) => EtlStage::Loaded(outcome),
                Err(err) => {
                    error!(error = %err, "etl failed; continuing with existing layers");
                    EtlStage::Failed(err)
                }
            }
        };

        let requested = answer_or_prompt(
            self.config.intersect_output.as_deref(),
            input,
            INTERSECT_PROMPT,
        )
        .map_err(|source| RunError::Prompt {
            what: "intersect layer name",
            source,
        })?;
        let plan = AnalysisPlan::from_config(&self.config.layers, &requested);
        info!(output = %plan.intersect_output, "starting analysis");
        let analysis = AnalysisPipeline::new(engine, plan).run();

        let subtitle = answer_or_prompt(self.config.map.subtitle.as_deref(), input, SUBTITLE_PROMPT)
            .map_err(|source| RunError::Prompt {
                what: "map subtitle",
                source,
            })?;
        let publication = publisher.publish(&analysis.produced_layers(), &sanitize_subtitle(&subtitle))?;

        let finished_at = Utc::now();
        info!(
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            etl_failed = etl.failure().is_some(),
            analysis_complete = analysis.is_complete(),
            pdf = %publication.pdf_path.display(),
            "run finished"
        );

        Ok(RunSummary {
            started_at,
            finished_at,
            etl,
            analysis,
            publication,
        })
    }
}
