use crate::config::PipelineConfig;
use crate::gis::{FillStyle, GeoEngine, MapDocument, MapError};
use crate::telemetry;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const JOIN_FILTER: &str = "Join_Count = 1";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("unable to set map spatial reference to {wkid}: {source}")]
    SpatialReference {
        wkid: u32,
        #[source]
        source: MapError,
    },
    #[error("unable to export map to {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: MapError,
    },
}

/// Map-side settings for one publication.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPlan {
    pub symbolized_layer: String,
    pub style: FillStyle,
    pub filtered_layer: String,
    pub filter: String,
    pub pdf_path: PathBuf,
}

impl PublishPlan {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            symbolized_layer: config.layers.symbolized_layer.clone(),
            style: FillStyle::hazard_zone(),
            filtered_layer: config.layers.join_output.clone(),
            filter: JOIN_FILTER.to_string(),
            pdf_path: config.pdf_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publication {
    pub pdf_path: PathBuf,
    /// Layers newly added to the map.
    pub added: Vec<String>,
    /// Layers already on the map from an earlier run.
    pub present: Vec<String>,
    /// Requested layers that do not exist in the workspace.
    pub skipped: Vec<String>,
    pub styled: bool,
    pub filtered: bool,
    pub titles_updated: usize,
    pub warnings: Vec<String>,
}

/// Adds analysis layers to the map document and exports the layout.
#[derive(Debug)]
pub struct MapPublisher<'a> {
    map: &'a dyn MapDocument,
    engine: &'a dyn GeoEngine,
    plan: PublishPlan,
}

impl<'a> MapPublisher<'a> {
    pub fn new(map: &'a dyn MapDocument, engine: &'a dyn GeoEngine, plan: PublishPlan) -> Self {
        Self { map, engine, plan }
    }

    pub fn prepare(&self, wkid: u32) -> Result<(), PublishError> {
        self.map
            .set_spatial_reference(wkid)
            .map_err(|source| PublishError::SpatialReference { wkid, source })?;
        info!(wkid, "map spatial reference set");
        Ok(())
    }

    /// Every step before the export is best effort; only the export itself
    /// can fail the publication.
    pub fn publish(&self, layers: &[String], subtitle: &str) -> Result<Publication, PublishError> {
        let mut publication = Publication {
            pdf_path: self.plan.pdf_path.clone(),
            ..Publication::default()
        };

        let on_map = match self.map.layer_names() {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "unable to list map layers");
                publication.warnings.push(format!("listing map layers: {err}"));
                Vec::new()
            }
        };

        for name in layers {
            self.add_layer(name, &on_map, &mut publication);
        }

        if self.is_on_map(&self.plan.filtered_layer, &publication) {
            match self
                .map
                .set_definition_query(&self.plan.filtered_layer, &self.plan.filter)
            {
                Ok(()) => {
                    info!(layer = %self.plan.filtered_layer, filter = %self.plan.filter, "definition query applied");
                    publication.filtered = true;
                }
                Err(err) => self.best_effort(&mut publication, "definition query", err),
            }
        }

        if self.is_on_map(&self.plan.symbolized_layer, &publication) {
            match self
                .map
                .apply_symbology(&self.plan.symbolized_layer, &self.plan.style)
            {
                Ok(()) => {
                    info!(layer = %self.plan.symbolized_layer, "simple renderer applied");
                    publication.styled = true;
                }
                Err(err) => self.best_effort(&mut publication, "symbology", err),
            }
        } else {
            debug!(layer = %self.plan.symbolized_layer, "symbolized layer not on map");
        }

        if !subtitle.is_empty() {
            match self.map.append_to_title(&format!(" {subtitle}")) {
                Ok(count) => {
                    info!(elements = count, subtitle, "layout title updated");
                    publication.titles_updated = count;
                }
                Err(err) => self.best_effort(&mut publication, "title", err),
            }
        }

        if let Err(err) = self.map.save() {
            self.best_effort(&mut publication, "save", err);
        }

        self.map
            .export_pdf(&self.plan.pdf_path)
            .map_err(|source| PublishError::Export {
                path: self.plan.pdf_path.clone(),
                source,
            })?;
        info!(pdf = %self.plan.pdf_path.display(), "map exported");

        Ok(publication)
    }

    fn add_layer(&self, name: &str, on_map: &[String], publication: &mut Publication) {
        match self.engine.exists(name) {
            Ok(true) => {}
            Ok(false) => {
                warn!(layer = name, "layer does not exist; not adding to map");
                publication.skipped.push(name.to_string());
                return;
            }
            Err(err) => {
                warn!(layer = name, error = %err, "unable to check layer; not adding to map");
                publication.skipped.push(name.to_string());
                publication.warnings.push(format!("{name}: {err}"));
                return;
            }
        }

        if on_map.iter().any(|existing| existing == name) {
            debug!(layer = name, "layer already on map");
            publication.present.push(name.to_string());
            return;
        }

        let path = self.engine.layer_path(name);
        match self.map.add_layer_from_path(&path) {
            Ok(()) => {
                info!(layer = name, path = %path.display(), "layer added to map");
                metrics::counter!(telemetry::LAYERS_PUBLISHED).increment(1);
                publication.added.push(name.to_string());
            }
            Err(err) => {
                error!(layer = name, error = %err, "unable to add layer to map");
                publication.warnings.push(format!("{name}: {err}"));
            }
        }
    }

    fn is_on_map(&self, name: &str, publication: &Publication) -> bool {
        publication
            .added
            .iter()
            .chain(&publication.present)
            .any(|layer| layer == name)
    }

    fn best_effort(&self, publication: &mut Publication, step: &str, err: MapError) {
        error!(step, error = %err, "map step failed; continuing");
        publication.warnings.push(format!("{step}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gis::{GeometryKind, MemoryMap, MemoryWorkspace};

    fn plan() -> PublishPlan {
        PublishPlan {
            symbolized_layer: "erased_intersect".to_string(),
            style: FillStyle::hazard_zone(),
            filtered_layer: "target_addresses".to_string(),
            filter: JOIN_FILTER.to_string(),
            pdf_path: PathBuf::from("/out/WestNileOutbreak_Map.pdf"),
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn publishes_existing_layers_and_skips_missing_ones() {
        let workspace = MemoryWorkspace::new()
            .with_layer("intersect", GeometryKind::Polygon, 3)
            .with_layer("erased_intersect", GeometryKind::Polygon, 2)
            .with_layer("target_addresses", GeometryKind::Point, 40);
        let map = MemoryMap::new();
        let publisher = MapPublisher::new(&map, &workspace, plan());

        let publication = publisher
            .publish(
                &names(&["intersect", "erased_intersect", "target_addresses", "ghost"]),
                "June 2024",
            )
            .expect("exported");

        assert_eq!(
            publication.added,
            vec!["intersect", "erased_intersect", "target_addresses"]
        );
        assert_eq!(publication.skipped, vec!["ghost"]);
        assert!(publication.styled);
        assert!(publication.filtered);
        assert_eq!(map.definition_query("target_addresses").as_deref(), Some(JOIN_FILTER));
        assert_eq!(map.symbology("erased_intersect"), Some(FillStyle::hazard_zone()));
        assert_eq!(map.title_texts(), vec!["West Nile Virus Outbreak June 2024"]);
        assert_eq!(map.exports(), vec![PathBuf::from("/out/WestNileOutbreak_Map.pdf")]);
        assert_eq!(map.save_count(), 1);
    }

    #[test]
    fn republishing_does_not_duplicate_layers() {
        let workspace =
            MemoryWorkspace::new().with_layer("erased_intersect", GeometryKind::Polygon, 2);
        let map = MemoryMap::new().with_layers(&["erased_intersect"]);
        let publisher = MapPublisher::new(&map, &workspace, plan());

        let publication = publisher
            .publish(&names(&["erased_intersect"]), "")
            .expect("exported");

        assert!(publication.added.is_empty());
        assert_eq!(publication.present, vec!["erased_intersect"]);
        assert!(publication.styled);
        assert_eq!(publication.titles_updated, 0);
        assert_eq!(map.layer_names().expect("layers"), vec!["erased_intersect"]);
    }

    #[test]
    fn missing_symbolized_layer_still_exports() {
        let workspace = MemoryWorkspace::new();
        let map = MemoryMap::new();
        let publisher = MapPublisher::new(&map, &workspace, plan());

        let publication = publisher.publish(&[], "").expect("exported anyway");

        assert!(!publication.styled);
        assert_eq!(map.exports().len(), 1);
    }

    #[test]
    fn styling_and_filter_failures_are_warnings() {
        let workspace = MemoryWorkspace::new()
            .with_layer("erased_intersect", GeometryKind::Polygon, 2)
            .with_layer("target_addresses", GeometryKind::Point, 40);
        let map = MemoryMap::new()
            .failing_symbology()
            .failing_definition_query();
        let publisher = MapPublisher::new(&map, &workspace, plan());

        let publication = publisher
            .publish(&names(&["erased_intersect", "target_addresses"]), "June 2024")
            .expect("exported anyway");

        assert!(!publication.styled);
        assert!(!publication.filtered);
        assert_eq!(publication.warnings.len(), 2);
        assert!(publication.warnings[0].starts_with("definition query: "));
        assert!(publication.warnings[1].starts_with("symbology: "));
        assert_eq!(map.symbology("erased_intersect"), None);
        assert_eq!(map.definition_query("target_addresses"), None);
        assert_eq!(map.title_texts(), vec!["West Nile Virus Outbreak June 2024"]);
        assert_eq!(map.exports(), vec![PathBuf::from("/out/WestNileOutbreak_Map.pdf")]);
    }

    #[test]
    fn export_failure_is_terminal() {
        let workspace = MemoryWorkspace::new();
        let map = MemoryMap::new().failing_export();
        let publisher = MapPublisher::new(&map, &workspace, plan());

        let error = publisher.publish(&[], "June").expect_err("export fails");

        assert!(matches!(error, PublishError::Export { .. }));
    }

    #[test]
    fn prepare_sets_spatial_reference() {
        let workspace = MemoryWorkspace::new();
        let map = MemoryMap::new();

        MapPublisher::new(&map, &workspace, plan())
            .prepare(26953)
            .expect("spatial reference");

        assert_eq!(map.spatial_reference(), Some(26953));
    }
}
