//! End-to-end behaviour of the outbreak run against in-memory collaborators:
//! ETL table output, analysis gating, map publication and re-runs.

mod common {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use wnv_outbreak::config::{AppConfig, PipelineConfig};
    use wnv_outbreak::gis::{GeometryKind, MemoryWorkspace};
    use wnv_outbreak::http::HttpError;
    use wnv_outbreak::workflows::etl::{
        AddressSource, GeocodeError, GeocodedPoint, Geocoder, SourceError,
    };

    pub(super) const SCENARIO_SHEET: &str =
        "Street Address\n\"123 Main St\"\n\"999 Nowhere Ave\"\n";

    #[derive(Debug)]
    pub(super) struct FakeSource {
        body: Option<String>,
        fetches: Mutex<usize>,
    }

    impl FakeSource {
        pub(super) fn serving(body: &str) -> Self {
            Self {
                body: Some(body.to_string()),
                fetches: Mutex::new(0),
            }
        }

        pub(super) fn unavailable() -> Self {
            Self {
                body: None,
                fetches: Mutex::new(0),
            }
        }

        pub(super) fn fetches(&self) -> usize {
            *self.fetches.lock().expect("source mutex poisoned")
        }
    }

    impl AddressSource for FakeSource {
        fn fetch(&self) -> Result<String, SourceError> {
            *self.fetches.lock().expect("source mutex poisoned") += 1;
            self.body.clone().ok_or_else(|| {
                SourceError::Unavailable(HttpError::Status {
                    url: "https://sheets.example.test/addresses.csv".to_string(),
                    status: 503,
                })
            })
        }
    }

    #[derive(Debug, Default)]
    pub(super) struct FakeGeocoder {
        matches: HashMap<String, GeocodedPoint>,
        failing: Vec<String>,
        lookups: Mutex<Vec<String>>,
    }

    impl FakeGeocoder {
        pub(super) fn with_match(mut self, address: &str, x: f64, y: f64) -> Self {
            self.matches
                .insert(address.to_string(), GeocodedPoint::residential(x, y));
            self
        }

        pub(super) fn failing_on(mut self, address: &str) -> Self {
            self.failing.push(address.to_string());
            self
        }

        pub(super) fn lookups(&self) -> Vec<String> {
            self.lookups.lock().expect("geocoder mutex poisoned").clone()
        }
    }

    impl Geocoder for FakeGeocoder {
        fn geocode(&self, street_address: &str) -> Result<Option<GeocodedPoint>, GeocodeError> {
            self.lookups
                .lock()
                .expect("geocoder mutex poisoned")
                .push(street_address.to_string());
            if self.failing.iter().any(|address| address == street_address) {
                return Err(GeocodeError::Request(HttpError::Status {
                    url: "https://geocoder.example.test".to_string(),
                    status: 500,
                }));
            }
            Ok(self.matches.get(street_address).copied())
        }
    }

    pub(super) fn scenario_geocoder() -> FakeGeocoder {
        FakeGeocoder::default().with_match("123 Main St", -105.27, 40.01)
    }

    pub(super) fn config(proj_dir: &Path, extra: &[(&str, &str)]) -> PipelineConfig {
        let mut values: HashMap<String, String> = HashMap::from([
            (
                "remote_url".to_string(),
                "https://sheets.example.test/addresses.csv".to_string(),
            ),
            ("proj_dir".to_string(), proj_dir.display().to_string()),
        ]);
        for (key, value) in extra {
            values.insert(key.to_string(), value.to_string());
        }
        AppConfig::from_lookup(|key| values.get(key).cloned())
            .expect("config loads")
            .pipeline
    }

    /// The configured source layers plus the address layer the join targets.
    pub(super) fn county_workspace() -> MemoryWorkspace {
        MemoryWorkspace::new()
            .with_root("/data/WestNileOutbreak.gdb")
            .with_layer("Mosquito_Larval_Sites", GeometryKind::Point, 12)
            .with_layer("Wetlands", GeometryKind::Polygon, 30)
            .with_layer("Lakes_and_Reservoirs", GeometryKind::Polygon, 5)
            .with_layer("OSMP_Properties", GeometryKind::Polygon, 8)
            .with_layer("Addresses", GeometryKind::Point, 500)
    }
}

use common::{
    config, county_workspace, scenario_geocoder, FakeGeocoder, FakeSource, SCENARIO_SHEET,
};
use wnv_outbreak::gis::{
    EngineCall, FillStyle, GeometryKind, MapDocument, MemoryMap, MemoryWorkspace,
};
use wnv_outbreak::workflows::analysis::{
    AnalysisPipeline, AnalysisPlan, PipelineState, StageError, StageKind,
};
use wnv_outbreak::workflows::etl::{
    AddressSheetEtl, EtlError, LoadError, SourceError, SpatialEtl,
};
use wnv_outbreak::workflows::prompt::{ScriptedInput, INTERSECT_PROMPT, SUBTITLE_PROMPT};
use wnv_outbreak::workflows::publish::JOIN_FILTER;
use wnv_outbreak::workflows::{EtlStage, OutbreakRun, RunOptions, RunServices};

#[test]
fn matched_addresses_become_point_table_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let source = FakeSource::serving(SCENARIO_SHEET);
    let geocoder = scenario_geocoder();
    let workspace = MemoryWorkspace::new();

    let outcome = AddressSheetEtl::new(&config, &source, &geocoder, &workspace)
        .process()
        .expect("etl succeeds");

    let table = std::fs::read_to_string(config.geocoded_table_path()).expect("point table");
    assert_eq!(table, "X,Y,Type\n-105.27,40.01,Residential\n");
    assert_eq!(outcome.records, 2);
    assert_eq!(outcome.layer.name, "avoid_points");
    assert_eq!(outcome.layer.kind, GeometryKind::Point);
    assert_eq!(outcome.layer.feature_count, 1);
    assert_eq!(
        std::fs::read_to_string(config.raw_table_path()).expect("raw table"),
        SCENARIO_SHEET
    );
}

#[test]
fn every_unmatched_record_leaves_one_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let source = FakeSource::serving(
        "Street Address,Reported\n\
         123 Main St,2024-06-01\n\
         999 Nowhere Ave,2024-06-02\n\
         ,2024-06-03\n\
         1 Pearl St,2024-06-04\n\
         77 Broken Rd,2024-06-05\n",
    );
    let geocoder = scenario_geocoder()
        .with_match("1 Pearl St", -105.28, 40.02)
        .failing_on("77 Broken Rd");
    let workspace = MemoryWorkspace::new();
    let etl = AddressSheetEtl::new(&config, &source, &geocoder, &workspace);

    let records = etl.extract().expect("extract");
    let report = etl.transform(&records).expect("transform");

    assert_eq!(report.total, 5);
    assert_eq!(report.matched(), 2);
    assert_eq!(report.unmatched, 2);
    assert_eq!(report.warnings.len(), report.unmatched);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        geocoder.lookups(),
        vec!["123 Main St", "999 Nowhere Ave", "1 Pearl St", "77 Broken Rd"]
    );
}

#[test]
fn full_run_publishes_the_outbreak_map() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let source = FakeSource::serving(SCENARIO_SHEET);
    let geocoder = scenario_geocoder();
    let workspace = county_workspace();
    let map = MemoryMap::new();
    let input = ScriptedInput::new(["  My Output  ", "June 2024"]);
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions::default())
        .execute()
        .expect("run succeeds");

    assert!(summary.analysis.is_complete());
    assert_eq!(
        summary.analysis.produced_layers(),
        vec!["My_Output", "erased_intersect", "target_addresses"]
    );
    assert_eq!(summary.etl.outcome().map(|etl| etl.layer.feature_count), Some(1));
    assert!(summary.finished_at >= summary.started_at);
    assert_eq!(input.asked(), vec![INTERSECT_PROMPT, SUBTITLE_PROMPT]);

    assert!(workspace.calls().contains(&EngineCall::Intersect {
        inputs: vec![
            "buf_Mosquito_Larval_Sites".to_string(),
            "buf_Wetlands".to_string()
        ],
        output: "My_Output".to_string(),
        attributes: "ALL",
    }));
    assert!(workspace.calls().contains(&EngineCall::Buffer {
        input: "avoid_points".to_string(),
        output: "buf_avoid_points".to_string(),
        distance: "1500 Feet".to_string(),
    }));

    let publication = summary.publication;
    assert_eq!(
        publication.added,
        vec!["My_Output", "erased_intersect", "target_addresses"]
    );
    assert!(publication.styled);
    assert!(publication.filtered);
    assert_eq!(map.spatial_reference(), Some(26953));
    assert_eq!(map.definition_query("target_addresses").as_deref(), Some(JOIN_FILTER));
    assert_eq!(map.symbology("erased_intersect"), Some(FillStyle::hazard_zone()));
    assert_eq!(map.title_texts(), vec!["West Nile Virus Outbreak June 2024"]);
    assert_eq!(map.exports(), vec![config.pdf_path()]);
}

#[test]
fn rerunning_yields_the_same_layers_and_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(
        dir.path(),
        &[("intersect_output", "intersect"), ("map_subtitle", "June 2024")],
    );
    let source = FakeSource::serving(SCENARIO_SHEET);
    let geocoder = scenario_geocoder();
    let workspace = county_workspace();
    let map = MemoryMap::new();
    let input = ScriptedInput::default();
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };
    let run = OutbreakRun::new(&config, services, RunOptions::default());

    run.execute().expect("first run");
    let first = workspace.snapshot();
    let first_map = map.layer_names().expect("map layers");

    let second = run.execute().expect("second run");

    assert_eq!(workspace.snapshot(), first);
    assert_eq!(map.layer_names().expect("map layers"), first_map);
    assert!(second.publication.added.is_empty());
    assert_eq!(second.publication.present.len(), 3);
    assert!(input.asked().is_empty());
    assert_eq!(source.fetches(), 2);
}

#[test]
fn missing_intersect_inputs_halt_before_erase_and_join() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(
        dir.path(),
        &[("intersect_output", "intersect"), ("map_subtitle", "June 2024")],
    );
    let source = FakeSource::serving(SCENARIO_SHEET);
    let geocoder = scenario_geocoder();
    let workspace = MemoryWorkspace::new().with_layer("Addresses", GeometryKind::Point, 500);
    let map = MemoryMap::new();
    let input = ScriptedInput::default();
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions::default())
        .execute()
        .expect("run finishes");

    assert_eq!(
        summary.analysis.state,
        PipelineState::Failed(StageKind::Intersect)
    );
    assert!(matches!(
        summary.analysis.failure,
        Some(StageError::NoInputLayers { .. })
    ));
    assert!(summary.analysis.produced_layers().is_empty());
    assert!(!workspace.calls().iter().any(|call| matches!(
        call,
        EngineCall::Intersect { .. } | EngineCall::Erase { .. } | EngineCall::SpatialJoin { .. }
    )));
    assert!(summary.publication.added.is_empty());
    assert_eq!(map.exports().len(), 1);
}

#[test]
fn erase_without_exclusion_buffer_never_reaches_the_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let workspace = MemoryWorkspace::new().with_layer("intersect", GeometryKind::Polygon, 4);
    let plan = AnalysisPlan::from_config(&config.layers, "intersect");

    let error = AnalysisPipeline::new(&workspace, plan)
        .erase("intersect")
        .expect_err("exclusion buffer is missing");

    assert!(matches!(
        error,
        StageError::MissingInput { stage: StageKind::Erase, ref layer } if layer == "buf_avoid_points"
    ));
    assert!(workspace.calls().is_empty());
    assert!(!workspace.layer_names().contains(&"erased_intersect".to_string()));
}

#[test]
fn intersect_uses_only_the_buffer_layers_that_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[("intersect_layers", "A,B")]);
    let plan = AnalysisPlan::from_config(&config.layers, "  My Output  ");
    let workspace = MemoryWorkspace::new().with_layer("A", GeometryKind::Polygon, 3);

    let layer = AnalysisPipeline::new(&workspace, plan.clone())
        .intersect()
        .expect("intersect runs on A");

    assert_eq!(layer.name, "My_Output");
    assert_eq!(
        workspace.calls(),
        vec![EngineCall::Intersect {
            inputs: vec!["A".to_string()],
            output: "My_Output".to_string(),
            attributes: "ALL",
        }]
    );

    let empty = MemoryWorkspace::new();
    let error = AnalysisPipeline::new(&empty, plan)
        .intersect()
        .expect_err("neither input exists");
    assert!(matches!(error, StageError::NoInputLayers { ref candidates } if candidates == &["A", "B"]));
    assert!(empty.calls().is_empty());
}

#[test]
fn etl_without_any_match_still_publishes_the_map() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let source = FakeSource::serving(SCENARIO_SHEET);
    let geocoder = FakeGeocoder::default();
    let workspace = county_workspace();
    let map = MemoryMap::new();
    let input = ScriptedInput::new(["intersect", "June 2024"]);
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions::default())
        .execute()
        .expect("run finishes");

    assert!(matches!(
        summary.etl,
        EtlStage::Failed(EtlError::Load(LoadError::EmptyTable(_)))
    ));
    assert!(summary.etl.outcome().is_none());
    assert_eq!(input.asked(), vec![INTERSECT_PROMPT, SUBTITLE_PROMPT]);
    assert_eq!(
        summary.analysis.state,
        PipelineState::Failed(StageKind::Erase)
    );
    assert!(matches!(
        summary.analysis.failure,
        Some(StageError::MissingInput { stage: StageKind::Erase, ref layer }) if layer == "buf_avoid_points"
    ));
    assert_eq!(summary.analysis.produced_layers(), vec!["intersect"]);
    assert_eq!(map.exports(), vec![config.pdf_path()]);
}

#[test]
fn unavailable_source_falls_back_to_the_existing_exclusion_layer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(
        dir.path(),
        &[("intersect_output", "intersect"), ("map_subtitle", "June 2024")],
    );
    let source = FakeSource::unavailable();
    let geocoder = scenario_geocoder();
    let workspace = county_workspace().with_layer("avoid_points", GeometryKind::Point, 7);
    let map = MemoryMap::new();
    let input = ScriptedInput::default();
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions::default())
        .execute()
        .expect("run finishes");

    assert!(matches!(
        summary.etl.failure(),
        Some(EtlError::Source(SourceError::Unavailable(_)))
    ));
    assert_eq!(source.fetches(), 1);
    assert!(geocoder.lookups().is_empty());
    assert!(summary.analysis.is_complete());
    assert!(workspace.calls().contains(&EngineCall::Buffer {
        input: "avoid_points".to_string(),
        output: "buf_avoid_points".to_string(),
        distance: "1500 Feet".to_string(),
    }));
    assert!(workspace
        .calls()
        .iter()
        .any(|call| matches!(call, EngineCall::Intersect { .. })));
    assert_eq!(
        summary.publication.added,
        vec!["intersect", "erased_intersect", "target_addresses"]
    );
    assert_eq!(map.exports().len(), 1);
}

#[test]
fn unavailable_source_stops_before_geocoding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &[]);
    let source = FakeSource::unavailable();
    let geocoder = scenario_geocoder();
    let workspace = MemoryWorkspace::new();

    let error = AddressSheetEtl::new(&config, &source, &geocoder, &workspace)
        .process()
        .expect_err("source is down");

    assert!(matches!(error, EtlError::Source(SourceError::Unavailable(_))));
    assert_eq!(source.fetches(), 1);
    assert!(geocoder.lookups().is_empty());
    assert!(!config.raw_table_path().exists());
}

#[test]
fn skipping_etl_reuses_the_existing_exclusion_layer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(
        dir.path(),
        &[("intersect_output", "intersect"), ("map_subtitle", "")],
    );
    let source = FakeSource::unavailable();
    let geocoder = FakeGeocoder::default();
    let workspace = county_workspace().with_layer("avoid_points", GeometryKind::Point, 7);
    let map = MemoryMap::new();
    let input = ScriptedInput::new(["Late June"]);
    let services = RunServices {
        source: &source,
        geocoder: &geocoder,
        engine: &workspace,
        map: &map,
        input: &input,
    };

    let summary = OutbreakRun::new(&config, services, RunOptions { skip_etl: true })
        .execute()
        .expect("run succeeds");

    assert!(matches!(summary.etl, EtlStage::Skipped));
    assert!(summary.analysis.is_complete());
    assert_eq!(source.fetches(), 0);
    assert_eq!(input.asked(), vec![SUBTITLE_PROMPT]);
    assert_eq!(map.title_texts(), vec!["West Nile Virus Outbreak Late June"]);
}
