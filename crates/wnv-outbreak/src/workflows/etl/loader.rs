use crate::gis::{describe_layer, EngineError, GeoEngine, LayerRef};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("point table {} has no rows to load", .0.display())]
    EmptyTable(PathBuf),
    #[error("point table {} is unreadable: {source}", .path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("layer {0} was not created")]
    OutputNotCreated(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Hands geocoded tables to the engine as point layers.
#[derive(Debug)]
pub struct LayerLoader<'a> {
    engine: &'a dyn GeoEngine,
}

impl<'a> LayerLoader<'a> {
    pub fn new(engine: &'a dyn GeoEngine) -> Self {
        Self { engine }
    }

    /// Materializes `table`'s `X`/`Y` columns as the point layer `output`,
    /// replacing any previous layer of that name.
    pub fn materialize_points(&self, table: &Path, output: &str) -> Result<LayerRef, LoadError> {
        let rows = count_rows(table)?;
        if rows == 0 {
            return Err(LoadError::EmptyTable(table.to_path_buf()));
        }

        debug!(table = %table.display(), layer = output, rows, "creating point layer");
        self.engine.points_from_table(table, "X", "Y", output)?;

        let layer = describe_layer(self.engine, output)?
            .ok_or_else(|| LoadError::OutputNotCreated(output.to_string()))?;
        info!(layer = %layer.name, features = layer.feature_count, "point layer loaded");
        Ok(layer)
    }
}

fn count_rows(table: &Path) -> Result<u64, LoadError> {
    let unreadable = |source: csv::Error| LoadError::Table {
        path: table.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(table)
        .map_err(unreadable)?;

    let mut rows = 0;
    for record in reader.records() {
        record.map_err(unreadable)?;
        rows += 1;
    }
    Ok(rows)
}
