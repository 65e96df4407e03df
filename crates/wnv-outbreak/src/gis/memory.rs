use super::{
    BufferDistance, EngineError, FillStyle, GeoEngine, GeometryKind, JoinAttributes,
    JoinOperation, JoinType, MapDocument, MapError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One engine invocation as observed by [`MemoryWorkspace`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    PointsFromTable { table: PathBuf, output: String },
    Buffer { input: String, output: String, distance: String },
    Intersect { inputs: Vec<String>, output: String, attributes: &'static str },
    Erase { input: String, erase: String, output: String },
    SpatialJoin { target: String, join: String, output: String, operation: &'static str },
}

#[derive(Debug, Clone, Copy)]
struct StoredLayer {
    kind: GeometryKind,
    features: u64,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    layers: BTreeMap<String, StoredLayer>,
    calls: Vec<EngineCall>,
}

/// In-process workspace that tracks layer names, kinds and feature counts
/// without computing geometry. Backs `--dry-run` and the test suites.
#[derive(Debug)]
pub struct MemoryWorkspace {
    root: PathBuf,
    overwrite: bool,
    failing: Vec<&'static str>,
    failing_layers: Vec<(&'static str, String)>,
    skipped_outputs: Vec<String>,
    state: Mutex<WorkspaceState>,
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("memory.gdb"),
            overwrite: true,
            failing: Vec::new(),
            failing_layers: Vec::new(),
            skipped_outputs: Vec::new(),
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_layer(self, name: &str, kind: GeometryKind, features: u64) -> Self {
        self.lock()
            .layers
            .insert(name.to_string(), StoredLayer { kind, features });
        self
    }

    /// Makes every call of `operation` (`"buffer"`, `"erase"`, ...) fail.
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.push(operation);
        self
    }

    /// Makes `operation` fail whenever `layer` is one of its inputs.
    pub fn failing_on(mut self, operation: &'static str, layer: &str) -> Self {
        self.failing_layers.push((operation, layer.to_string()));
        self
    }

    /// Accepts writes to `output` but never materializes the layer.
    pub fn dropping_output(mut self, output: &str) -> Self {
        self.skipped_outputs.push(output.to_string());
        self
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.lock().layers.keys().cloned().collect()
    }

    /// `(name, feature count)` for every layer, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.lock()
            .layers
            .iter()
            .map(|(name, layer)| (name.clone(), layer.features))
            .collect()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self, operation: &'static str, inputs: &[&str]) -> Result<(), EngineError> {
        let on_layer = self
            .failing_layers
            .iter()
            .any(|(failing, layer)| *failing == operation && inputs.contains(&layer.as_str()));
        if on_layer || self.failing.contains(&operation) {
            return Err(EngineError::Execution {
                operation,
                message: "simulated engine failure".to_string(),
            });
        }
        Ok(())
    }

    fn input(state: &WorkspaceState, name: &str) -> Result<StoredLayer, EngineError> {
        state
            .layers
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    fn write(
        &self,
        state: &mut WorkspaceState,
        output: &str,
        layer: StoredLayer,
    ) -> Result<(), EngineError> {
        if !self.overwrite && state.layers.contains_key(output) {
            return Err(EngineError::AlreadyExists(output.to_string()));
        }
        if self.skipped_outputs.iter().any(|skipped| skipped == output) {
            return Ok(());
        }
        state.layers.insert(output.to_string(), layer);
        Ok(())
    }
}

impl GeoEngine for MemoryWorkspace {
    fn points_from_table(
        &self,
        table: &Path,
        x_field: &str,
        y_field: &str,
        output: &str,
    ) -> Result<(), EngineError> {
        let operation = "points_from_table";
        let mut state = self.lock();
        state.calls.push(EngineCall::PointsFromTable {
            table: table.to_path_buf(),
            output: output.to_string(),
        });
        self.check_failure(operation, &[])?;

        let execution = |message: String| EngineError::Execution { operation, message };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(table)
            .map_err(|err| execution(err.to_string()))?;
        let headers = reader.headers().map_err(|err| execution(err.to_string()))?;
        for field in [x_field, y_field] {
            if !headers.iter().any(|header| header == field) {
                return Err(execution(format!("table has no {field} column")));
            }
        }

        let mut features = 0;
        for record in reader.records() {
            record.map_err(|err| execution(err.to_string()))?;
            features += 1;
        }

        self.write(
            &mut state,
            output,
            StoredLayer {
                kind: GeometryKind::Point,
                features,
            },
        )
    }

    fn buffer(
        &self,
        input: &str,
        output: &str,
        distance: &BufferDistance,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Buffer {
            input: input.to_string(),
            output: output.to_string(),
            distance: distance.to_string(),
        });
        self.check_failure("buffer", &[input])?;

        let source = Self::input(&state, input)?;
        self.write(
            &mut state,
            output,
            StoredLayer {
                kind: GeometryKind::Polygon,
                features: source.features,
            },
        )
    }

    fn intersect(
        &self,
        inputs: &[String],
        output: &str,
        attributes: JoinAttributes,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Intersect {
            inputs: inputs.to_vec(),
            output: output.to_string(),
            attributes: attributes.keyword(),
        });
        let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
        self.check_failure("intersect", &names)?;

        let mut features = u64::MAX;
        for name in inputs {
            features = features.min(Self::input(&state, name)?.features);
        }
        if inputs.is_empty() {
            features = 0;
        }

        self.write(
            &mut state,
            output,
            StoredLayer {
                kind: GeometryKind::Polygon,
                features,
            },
        )
    }

    fn erase(&self, input: &str, erase: &str, output: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Erase {
            input: input.to_string(),
            erase: erase.to_string(),
            output: output.to_string(),
        });
        self.check_failure("erase", &[input, erase])?;

        let source = Self::input(&state, input)?;
        Self::input(&state, erase)?;
        self.write(&mut state, output, source)
    }

    fn spatial_join(
        &self,
        target: &str,
        join: &str,
        output: &str,
        operation: JoinOperation,
        _join_type: JoinType,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::SpatialJoin {
            target: target.to_string(),
            join: join.to_string(),
            output: output.to_string(),
            operation: operation.keyword(),
        });
        self.check_failure("spatial_join", &[target, join])?;

        let source = Self::input(&state, target)?;
        Self::input(&state, join)?;
        self.write(&mut state, output, source)
    }

    fn exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.lock().layers.contains_key(name))
    }

    fn feature_count(&self, name: &str) -> Result<u64, EngineError> {
        Ok(Self::input(&self.lock(), name)?.features)
    }

    fn geometry_kind(&self, name: &str) -> Result<GeometryKind, EngineError> {
        Ok(Self::input(&self.lock(), name)?.kind)
    }

    fn layer_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TitleElement {
    name: String,
    text: String,
}

#[derive(Debug, Default)]
struct MapState {
    layers: Vec<String>,
    definition_queries: BTreeMap<String, String>,
    symbology: BTreeMap<String, FillStyle>,
    titles: Vec<TitleElement>,
    exports: Vec<PathBuf>,
    spatial_reference: Option<u32>,
    saves: usize,
}

/// In-process map document with a single layout.
#[derive(Debug)]
pub struct MemoryMap {
    failing_export: bool,
    failing_symbology: bool,
    failing_definition_query: bool,
    state: Mutex<MapState>,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMap {
    /// A map whose layout carries one `Title` element.
    pub fn new() -> Self {
        Self::with_title_elements(&[("Title", "West Nile Virus Outbreak")])
    }

    pub fn with_title_elements(elements: &[(&str, &str)]) -> Self {
        let titles = elements
            .iter()
            .map(|(name, text)| TitleElement {
                name: name.to_string(),
                text: text.to_string(),
            })
            .collect();
        Self {
            failing_export: false,
            failing_symbology: false,
            failing_definition_query: false,
            state: Mutex::new(MapState {
                titles,
                ..MapState::default()
            }),
        }
    }

    pub fn with_layers(self, names: &[&str]) -> Self {
        self.lock()
            .layers
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn failing_export(mut self) -> Self {
        self.failing_export = true;
        self
    }

    pub fn failing_symbology(mut self) -> Self {
        self.failing_symbology = true;
        self
    }

    pub fn failing_definition_query(mut self) -> Self {
        self.failing_definition_query = true;
        self
    }

    pub fn definition_query(&self, layer: &str) -> Option<String> {
        self.lock().definition_queries.get(layer).cloned()
    }

    pub fn symbology(&self, layer: &str) -> Option<FillStyle> {
        self.lock().symbology.get(layer).copied()
    }

    pub fn title_texts(&self) -> Vec<String> {
        self.lock()
            .titles
            .iter()
            .map(|element| element.text.clone())
            .collect()
    }

    pub fn exports(&self) -> Vec<PathBuf> {
        self.lock().exports.clone()
    }

    pub fn spatial_reference(&self) -> Option<u32> {
        self.lock().spatial_reference
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_layer(state: &MapState, layer: &str) -> Result<(), MapError> {
        if state.layers.iter().any(|name| name == layer) {
            Ok(())
        } else {
            Err(MapError::LayerNotFound(layer.to_string()))
        }
    }
}

impl MapDocument for MemoryMap {
    fn add_layer_from_path(&self, path: &Path) -> Result<(), MapError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| MapError::Execution(format!("{} names no layer", path.display())))?;
        self.lock().layers.push(name.to_string());
        Ok(())
    }

    fn layer_names(&self) -> Result<Vec<String>, MapError> {
        Ok(self.lock().layers.clone())
    }

    fn set_definition_query(&self, layer: &str, predicate: &str) -> Result<(), MapError> {
        if self.failing_definition_query {
            return Err(MapError::Execution(
                "simulated definition query failure".to_string(),
            ));
        }
        let mut state = self.lock();
        Self::require_layer(&state, layer)?;
        state
            .definition_queries
            .insert(layer.to_string(), predicate.to_string());
        Ok(())
    }

    fn apply_symbology(&self, layer: &str, style: &FillStyle) -> Result<(), MapError> {
        if self.failing_symbology {
            return Err(MapError::Execution("simulated symbology failure".to_string()));
        }
        let mut state = self.lock();
        Self::require_layer(&state, layer)?;
        state.symbology.insert(layer.to_string(), *style);
        Ok(())
    }

    fn append_to_title(&self, suffix: &str) -> Result<usize, MapError> {
        let mut state = self.lock();
        let mut changed = 0;
        for element in state
            .titles
            .iter_mut()
            .filter(|element| element.name.contains("Title"))
        {
            element.text.push_str(suffix);
            changed += 1;
        }
        Ok(changed)
    }

    fn export_pdf(&self, path: &Path) -> Result<(), MapError> {
        if self.failing_export {
            return Err(MapError::Execution("simulated export failure".to_string()));
        }
        let mut state = self.lock();
        if state.titles.is_empty() {
            return Err(MapError::NoLayout);
        }
        state.exports.push(path.to_path_buf());
        Ok(())
    }

    fn set_spatial_reference(&self, wkid: u32) -> Result<(), MapError> {
        self.lock().spatial_reference = Some(wkid);
        Ok(())
    }

    fn save(&self) -> Result<(), MapError> {
        self.lock().saves += 1;
        Ok(())
    }
}
