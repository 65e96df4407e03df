use super::{
    BufferDistance, EngineError, FillStyle, GeoEngine, GeometryKind, JoinAttributes,
    JoinOperation, JoinType, MapDocument, MapError,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

const ARGS_VAR: &str = "WNV_ARGS";
const EXIT_LAYER_NOT_FOUND: i32 = 3;
const EXIT_NO_LAYOUT: i32 = 4;

const ENGINE_PREAMBLE: &str = r#"import json, os, sys
import arcpy
args = json.loads(os.environ["WNV_ARGS"])
arcpy.env.workspace = args["workspace"]
arcpy.env.overwriteOutput = args["overwrite"]
"#;

const MAP_PREAMBLE: &str = r#"import json, os, sys
import arcpy
args = json.loads(os.environ["WNV_ARGS"])
aprx = arcpy.mp.ArcGISProject(args["project"])
m = aprx.listMaps()[0]

def find_layer(name):
    for lyr in m.listLayers():
        if lyr.name == name:
            return lyr
    sys.exit(3)
"#;

#[derive(Debug)]
pub(crate) enum ScriptFailure {
    Spawn(String),
    Timeout(u64),
    Exit { code: Option<i32>, output: String },
}

/// Runs short Python scripts through the configured interpreter. The script
/// is written to stdin and its arguments travel as JSON in `WNV_ARGS`.
#[derive(Debug)]
pub struct PythonRunner {
    python: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    runtime: Runtime,
}

impl PythonRunner {
    pub fn new(python: impl Into<PathBuf>, timeout: Duration) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            python: python.into(),
            leading_args: Vec::new(),
            timeout,
            runtime,
        })
    }

    /// Arguments placed before the script, e.g. `run -n arcgispro-py3 python`
    /// when the interpreter is launched through conda.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub(crate) fn run(&self, tag: &str, script: &str, args: &Value) -> Result<String, ScriptFailure> {
        debug!(script = tag, python = %self.python.display(), "running python script");
        self.runtime.block_on(self.run_async(script, args))
    }

    async fn run_async(&self, script: &str, args: &Value) -> Result<String, ScriptFailure> {
        let mut child = Command::new(&self.python)
            .args(&self.leading_args)
            .env("PYTHONIOENCODING", "utf-8")
            .env(ARGS_VAR, args.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ScriptFailure::Spawn(format!("{}: {err}", self.python.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScriptFailure::Spawn("python stdin unavailable".to_string()))?;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|err| ScriptFailure::Spawn(err.to_string()))?;
        drop(stdin);

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|err| ScriptFailure::Spawn(err.to_string()))?,
            Err(_) => return Err(ScriptFailure::Timeout(self.timeout.as_secs())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ScriptFailure::Exit {
                code: output.status.code(),
                output: format!("{stdout}\n{}", stderr.trim()).trim().to_string(),
            })
        }
    }
}

/// Geometry engine backed by arcpy geoprocessing tools.
#[derive(Debug)]
pub struct ArcPyEngine {
    runner: PythonRunner,
    workspace: PathBuf,
    overwrite: bool,
}

impl ArcPyEngine {
    pub fn new(runner: PythonRunner, workspace: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            runner,
            workspace: workspace.into(),
            overwrite,
        }
    }

    fn run(&self, operation: &'static str, body: &str, mut args: Value) -> Result<String, EngineError> {
        if let Value::Object(map) = &mut args {
            map.insert("workspace".into(), json!(self.workspace.to_string_lossy()));
            map.insert("overwrite".into(), json!(self.overwrite));
        }
        let script = format!("{ENGINE_PREAMBLE}{body}");
        self.runner
            .run(operation, &script, &args)
            .map_err(|failure| match failure {
                ScriptFailure::Spawn(message) => EngineError::Unavailable(message),
                ScriptFailure::Timeout(seconds) => EngineError::Timeout { operation, seconds },
                ScriptFailure::Exit { output, .. } => EngineError::Execution {
                    operation,
                    message: output,
                },
            })
    }
}

impl GeoEngine for ArcPyEngine {
    fn points_from_table(
        &self,
        table: &Path,
        x_field: &str,
        y_field: &str,
        output: &str,
    ) -> Result<(), EngineError> {
        self.run(
            "points_from_table",
            r#"arcpy.management.XYTableToPoint(args["table"], args["output"], args["x"], args["y"])"#,
            json!({ "table": table.to_string_lossy(), "output": output, "x": x_field, "y": y_field }),
        )
        .map(drop)
    }

    fn buffer(
        &self,
        input: &str,
        output: &str,
        distance: &BufferDistance,
    ) -> Result<(), EngineError> {
        self.run(
            "buffer",
            r#"arcpy.analysis.Buffer(args["input"], args["output"], args["distance"])"#,
            json!({ "input": input, "output": output, "distance": distance.to_string() }),
        )
        .map(drop)
    }

    fn intersect(
        &self,
        inputs: &[String],
        output: &str,
        attributes: JoinAttributes,
    ) -> Result<(), EngineError> {
        self.run(
            "intersect",
            r#"arcpy.analysis.Intersect(args["inputs"], args["output"], args["attributes"])"#,
            json!({ "inputs": inputs, "output": output, "attributes": attributes.keyword() }),
        )
        .map(drop)
    }

    fn erase(&self, input: &str, erase: &str, output: &str) -> Result<(), EngineError> {
        self.run(
            "erase",
            r#"arcpy.analysis.Erase(in_features=args["input"], erase_features=args["erase"], out_feature_class=args["output"])"#,
            json!({ "input": input, "erase": erase, "output": output }),
        )
        .map(drop)
    }

    fn spatial_join(
        &self,
        target: &str,
        join: &str,
        output: &str,
        operation: JoinOperation,
        join_type: JoinType,
    ) -> Result<(), EngineError> {
        self.run(
            "spatial_join",
            r#"arcpy.analysis.SpatialJoin(
    target_features=args["target"],
    join_features=args["join"],
    out_feature_class=args["output"],
    join_operation=args["operation"],
    join_type=args["join_type"],
)"#,
            json!({
                "target": target,
                "join": join,
                "output": output,
                "operation": operation.keyword(),
                "join_type": join_type.keyword(),
            }),
        )
        .map(drop)
    }

    fn exists(&self, name: &str) -> Result<bool, EngineError> {
        let answer = self.run(
            "exists",
            r#"print("true" if arcpy.Exists(args["name"]) else "false")"#,
            json!({ "name": name }),
        )?;
        Ok(answer.lines().last() == Some("true"))
    }

    fn feature_count(&self, name: &str) -> Result<u64, EngineError> {
        let answer = self.run(
            "feature_count",
            r#"print(int(arcpy.management.GetCount(args["name"])[0]))"#,
            json!({ "name": name }),
        )?;
        last_line(&answer)
            .parse::<u64>()
            .map_err(|_| EngineError::Execution {
                operation: "feature_count",
                message: format!("unexpected count output '{answer}'"),
            })
    }

    fn geometry_kind(&self, name: &str) -> Result<GeometryKind, EngineError> {
        let answer = self.run(
            "geometry_kind",
            r#"print(arcpy.Describe(args["name"]).shapeType)"#,
            json!({ "name": name }),
        )?;
        Ok(GeometryKind::from_label(last_line(&answer)))
    }

    fn layer_path(&self, name: &str) -> PathBuf {
        self.workspace.join(name)
    }
}

/// Map document backed by an ArcGIS Pro project file. Mutating calls save
/// the project before returning.
#[derive(Debug)]
pub struct ArcPyMapDocument {
    runner: PythonRunner,
    project: PathBuf,
}

impl ArcPyMapDocument {
    pub fn new(runner: PythonRunner, project: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            project: project.into(),
        }
    }

    fn run(&self, tag: &str, body: &str, mut args: Value) -> Result<String, MapError> {
        if let Value::Object(map) = &mut args {
            map.insert("project".into(), json!(self.project.to_string_lossy()));
        }
        let script = format!("{MAP_PREAMBLE}{body}");
        self.runner
            .run(tag, &script, &args)
            .map_err(|failure| match failure {
                ScriptFailure::Spawn(message) => MapError::Unavailable(message),
                ScriptFailure::Timeout(seconds) => MapError::Timeout(seconds),
                ScriptFailure::Exit {
                    code: Some(EXIT_LAYER_NOT_FOUND),
                    ..
                } => MapError::LayerNotFound(
                    args.get("layer")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                ),
                ScriptFailure::Exit {
                    code: Some(EXIT_NO_LAYOUT),
                    ..
                } => MapError::NoLayout,
                ScriptFailure::Exit { output, .. } => MapError::Execution(output),
            })
    }
}

impl MapDocument for ArcPyMapDocument {
    fn add_layer_from_path(&self, path: &Path) -> Result<(), MapError> {
        self.run(
            "add_layer",
            "m.addDataFromPath(args[\"path\"])\naprx.save()\n",
            json!({ "path": path.to_string_lossy() }),
        )
        .map(drop)
    }

    fn layer_names(&self) -> Result<Vec<String>, MapError> {
        let answer = self.run(
            "layer_names",
            "print(json.dumps([lyr.name for lyr in m.listLayers()]))\n",
            json!({}),
        )?;
        serde_json::from_str(last_line(&answer))
            .map_err(|err| MapError::Execution(format!("unexpected layer list: {err}")))
    }

    fn set_definition_query(&self, layer: &str, predicate: &str) -> Result<(), MapError> {
        self.run(
            "definition_query",
            "find_layer(args[\"layer\"]).definitionQuery = args[\"predicate\"]\naprx.save()\n",
            json!({ "layer": layer, "predicate": predicate }),
        )
        .map(drop)
    }

    fn apply_symbology(&self, layer: &str, style: &FillStyle) -> Result<(), MapError> {
        self.run(
            "symbology",
            r#"lyr = find_layer(args["layer"])
sym = lyr.symbology
sym.updateRenderer("SimpleRenderer")
sym.renderer.symbol.color = {"RGB": args["fill"]}
sym.renderer.symbol.outlineColor = {"RGB": args["outline"]}
sym.renderer.symbol.outlineWidth = args["width"]
lyr.symbology = sym
aprx.save()
"#,
            json!({
                "layer": layer,
                "fill": style.fill_rgba,
                "outline": style.outline_rgba,
                "width": style.outline_width,
            }),
        )
        .map(drop)
    }

    fn append_to_title(&self, suffix: &str) -> Result<usize, MapError> {
        let answer = self.run(
            "append_title",
            r#"layouts = aprx.listLayouts()
if not layouts:
    sys.exit(4)
changed = 0
for el in layouts[0].listElements():
    if "Title" in el.name:
        el.text = el.text + args["suffix"]
        changed += 1
aprx.save()
print(changed)
"#,
            json!({ "suffix": suffix }),
        )?;
        last_line(&answer)
            .parse::<usize>()
            .map_err(|_| MapError::Execution(format!("unexpected title output '{answer}'")))
    }

    fn export_pdf(&self, path: &Path) -> Result<(), MapError> {
        self.run(
            "export_pdf",
            r#"layouts = aprx.listLayouts()
if not layouts:
    sys.exit(4)
layouts[0].exportToPDF(args["path"])
"#,
            json!({ "path": path.to_string_lossy() }),
        )
        .map(drop)
    }

    fn set_spatial_reference(&self, wkid: u32) -> Result<(), MapError> {
        self.run(
            "spatial_reference",
            "m.spatialReference = arcpy.SpatialReference(args[\"wkid\"])\naprx.save()\n",
            json!({ "wkid": wkid }),
        )
        .map(drop)
    }

    fn save(&self) -> Result<(), MapError> {
        self.run("save", "aprx.save()\n", json!({})).map(drop)
    }
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default().trim()
}
