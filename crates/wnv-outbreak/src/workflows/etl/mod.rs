//! Address sheet → geocoded points → point layer.

mod geocoder;
mod loader;
mod source;
mod table;

pub use geocoder::{CensusGeocoder, GeocodeError, GeocodedPoint, Geocoder, PointCategory};
pub use loader::{LayerLoader, LoadError};
pub use source::{AddressSource, PublishedSheetSource, SourceError};
pub use table::{
    read_address_records, write_point_table, AddressRecord, TableError, POINT_TABLE_HEADER,
    STREET_ADDRESS_COLUMN,
};

use crate::config::PipelineConfig;
use crate::gis::{GeoEngine, LayerRef};
use crate::telemetry;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("unable to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result of geocoding every fetched record.
#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    pub total: usize,
    pub points: Vec<GeocodedPoint>,
    /// Records the service answered for without a match, plus blank ones.
    pub unmatched: usize,
    /// Records whose lookup failed outright.
    pub failed: usize,
    /// One entry per unmatched record.
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub table: PathBuf,
}

impl TransformReport {
    pub fn matched(&self) -> usize {
        self.points.len()
    }
}

#[derive(Debug, Clone)]
pub struct EtlOutcome {
    pub records: usize,
    pub report: TransformReport,
    pub layer: LayerRef,
}

/// Extract, transform and load steps of a spatial ETL job. `process` runs
/// them in order and stops at the first failure.
pub trait SpatialEtl {
    fn extract(&self) -> Result<Vec<AddressRecord>, EtlError>;

    fn transform(&self, records: &[AddressRecord]) -> Result<TransformReport, EtlError>;

    fn load(&self, report: &TransformReport) -> Result<LayerRef, EtlError>;

    fn process(&self) -> Result<EtlOutcome, EtlError> {
        let records = self.extract()?;
        let report = self.transform(&records)?;
        let layer = self.load(&report)?;
        Ok(EtlOutcome {
            records: records.len(),
            report,
            layer,
        })
    }
}

/// ETL over a published address sheet: fetch, geocode, load as points.
#[derive(Debug)]
pub struct AddressSheetEtl<'a> {
    config: &'a PipelineConfig,
    source: &'a dyn AddressSource,
    geocoder: &'a dyn Geocoder,
    engine: &'a dyn GeoEngine,
}

impl<'a> AddressSheetEtl<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        source: &'a dyn AddressSource,
        geocoder: &'a dyn Geocoder,
        engine: &'a dyn GeoEngine,
    ) -> Self {
        Self {
            config,
            source,
            geocoder,
            engine,
        }
    }
}

impl SpatialEtl for AddressSheetEtl<'_> {
    fn extract(&self) -> Result<Vec<AddressRecord>, EtlError> {
        info!("extracting addresses from published sheet");
        let raw = self.source.fetch()?;

        let raw_path = self.config.raw_table_path();
        std::fs::write(&raw_path, &raw).map_err(|source| EtlError::Io {
            path: raw_path.clone(),
            source,
        })?;

        let records = read_address_records(raw.as_bytes())?;
        info!(records = records.len(), table = %raw_path.display(), "address sheet saved");
        Ok(records)
    }

    fn transform(&self, records: &[AddressRecord]) -> Result<TransformReport, EtlError> {
        let mut report = TransformReport {
            total: records.len(),
            table: self.config.geocoded_table_path(),
            ..TransformReport::default()
        };

        for record in records {
            let street = record.street_address.trim();
            if street.is_empty() {
                warn!("skipping record without a street address");
                report.unmatched += 1;
                report.warnings.push("record without a street address".to_string());
                metrics::counter!(telemetry::GEOCODE_RECORDS, "outcome" => "unmatched").increment(1);
                continue;
            }

            debug!(address = street, "geocoding record");
            match self.geocoder.geocode(street) {
                Ok(Some(point)) => {
                    report.points.push(point);
                    metrics::counter!(telemetry::GEOCODE_RECORDS, "outcome" => "matched").increment(1);
                }
                Ok(None) => {
                    warn!(address = street, "no geocode match");
                    report.unmatched += 1;
                    report.warnings.push(format!("no geocode match for {street}"));
                    metrics::counter!(telemetry::GEOCODE_RECORDS, "outcome" => "unmatched").increment(1);
                }
                Err(err) => {
                    error!(address = street, error = %err, "geocoding failed");
                    report.failed += 1;
                    report.errors.push(format!("{street}: {err}"));
                    metrics::counter!(telemetry::GEOCODE_RECORDS, "outcome" => "failed").increment(1);
                }
            }
        }

        let file = File::create(&report.table).map_err(|source| EtlError::Io {
            path: report.table.clone(),
            source,
        })?;
        write_point_table(BufWriter::new(file), &report.points)?;

        info!(
            total = report.total,
            matched = report.matched(),
            unmatched = report.unmatched,
            failed = report.failed,
            table = %report.table.display(),
            "geocoding complete"
        );
        Ok(report)
    }

    fn load(&self, report: &TransformReport) -> Result<LayerRef, EtlError> {
        info!(layer = %self.config.layers.exclusion_layer, "loading geocoded points");
        let layer = LayerLoader::new(self.engine)
            .materialize_points(&report.table, &self.config.layers.exclusion_layer)?;
        Ok(layer)
    }
}
