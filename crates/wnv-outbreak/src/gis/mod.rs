//! Seams to the external geospatial engine and map document.
//!
//! The orchestrator never touches geometry: it names layers, asks the engine
//! to derive new layers from existing ones, and asks whether a name exists.

mod arcpy;
mod memory;

pub use arcpy::{ArcPyEngine, ArcPyMapDocument, PythonRunner};
pub use memory::{EngineCall, MemoryMap, MemoryWorkspace};

use serde::Serialize;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Polyline,
    Polygon,
    Unknown,
}

impl GeometryKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::Polyline => "Polyline",
            Self::Polygon => "Polygon",
            Self::Unknown => "Unknown",
        }
    }

    pub(crate) fn from_label(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "point" | "multipoint" => Self::Point,
            "polyline" => Self::Polyline,
            "polygon" => Self::Polygon,
            _ => Self::Unknown,
        }
    }
}

/// A layer that verifiably existed in the workspace when it was described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRef {
    pub name: String,
    pub kind: GeometryKind,
    pub feature_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearUnit {
    Feet,
    Meters,
    Miles,
    Kilometers,
}

impl LinearUnit {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Feet => "Feet",
            Self::Meters => "Meters",
            Self::Miles => "Miles",
            Self::Kilometers => "Kilometers",
        }
    }
}

/// Buffer distance in the engine's `"<value> <Unit>"` notation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferDistance {
    pub value: f64,
    pub unit: LinearUnit,
}

impl BufferDistance {
    pub const fn feet(value: f64) -> Self {
        Self {
            value,
            unit: LinearUnit::Feet,
        }
    }
}

impl fmt::Display for BufferDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDistance(pub String);

impl fmt::Display for InvalidDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a distance such as `1500 feet`", self.0)
    }
}

impl std::error::Error for InvalidDistance {}

impl FromStr for BufferDistance {
    type Err = InvalidDistance;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDistance(raw.to_string());
        let mut parts = raw.split_whitespace();
        let value = parts
            .next()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
            .ok_or_else(invalid)?;
        let unit = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("ft" | "foot" | "feet") => LinearUnit::Feet,
            Some("m" | "meter" | "meters" | "metre" | "metres") => LinearUnit::Meters,
            Some("mi" | "mile" | "miles") => LinearUnit::Miles,
            Some("km" | "kilometer" | "kilometers" | "kilometre" | "kilometres") => {
                LinearUnit::Kilometers
            }
            _ => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { value, unit })
    }
}

/// Which attributes an intersect carries over from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAttributes {
    All,
    NoFid,
    OnlyFid,
}

impl JoinAttributes {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::NoFid => "NO_FID",
            Self::OnlyFid => "ONLY_FID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOperation {
    OneToOne,
    OneToMany,
}

impl JoinOperation {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::OneToOne => "JOIN_ONE_TO_ONE",
            Self::OneToMany => "JOIN_ONE_TO_MANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    KeepAll,
    KeepCommon,
}

impl JoinType {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::KeepAll => "KEEP_ALL",
            Self::KeepCommon => "KEEP_COMMON",
        }
    }
}

/// Simple fill renderer: RGBA fill, RGBA outline, outline width in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillStyle {
    pub fill_rgba: [u8; 4],
    pub outline_rgba: [u8; 4],
    pub outline_width: f32,
}

impl FillStyle {
    /// Translucent red fill with a solid black outline.
    pub const fn hazard_zone() -> Self {
        Self {
            fill_rgba: [255, 0, 0, 50],
            outline_rgba: [0, 0, 0, 100],
            outline_width: 1.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{operation} failed: {message}")]
    Execution {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
    #[error("layer {0} already exists and overwrite is disabled")]
    AlreadyExists(String),
    #[error("layer {0} not found")]
    NotFound(String),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map operation failed: {0}")]
    Execution(String),
    #[error("map operation timed out after {0}s")]
    Timeout(u64),
    #[error("layer {0} is not in the map")]
    LayerNotFound(String),
    #[error("project has no layout to export")]
    NoLayout,
    #[error("map document unavailable: {0}")]
    Unavailable(String),
}

/// Geometry operations consumed from the external engine. Every operation
/// writes its output under the given name, replacing any existing layer when
/// the engine runs with overwrite enabled.
pub trait GeoEngine: Debug {
    fn points_from_table(
        &self,
        table: &Path,
        x_field: &str,
        y_field: &str,
        output: &str,
    ) -> Result<(), EngineError>;

    fn buffer(
        &self,
        input: &str,
        output: &str,
        distance: &BufferDistance,
    ) -> Result<(), EngineError>;

    fn intersect(
        &self,
        inputs: &[String],
        output: &str,
        attributes: JoinAttributes,
    ) -> Result<(), EngineError>;

    fn erase(&self, input: &str, erase: &str, output: &str) -> Result<(), EngineError>;

    fn spatial_join(
        &self,
        target: &str,
        join: &str,
        output: &str,
        operation: JoinOperation,
        join_type: JoinType,
    ) -> Result<(), EngineError>;

    fn exists(&self, name: &str) -> Result<bool, EngineError>;

    fn feature_count(&self, name: &str) -> Result<u64, EngineError>;

    fn geometry_kind(&self, name: &str) -> Result<GeometryKind, EngineError>;

    /// Full path of a layer, as the map document expects it.
    fn layer_path(&self, name: &str) -> PathBuf;
}

/// Project document operations consumed by the publisher.
pub trait MapDocument: Debug {
    fn add_layer_from_path(&self, path: &Path) -> Result<(), MapError>;

    fn layer_names(&self) -> Result<Vec<String>, MapError>;

    fn set_definition_query(&self, layer: &str, predicate: &str) -> Result<(), MapError>;

    fn apply_symbology(&self, layer: &str, style: &FillStyle) -> Result<(), MapError>;

    /// Appends `suffix` to every layout element whose name contains "Title";
    /// returns how many elements changed.
    fn append_to_title(&self, suffix: &str) -> Result<usize, MapError>;

    fn export_pdf(&self, path: &Path) -> Result<(), MapError>;

    fn set_spatial_reference(&self, wkid: u32) -> Result<(), MapError>;

    fn save(&self) -> Result<(), MapError>;
}

/// Looks a layer up and describes it, or `None` when it does not exist.
pub fn describe_layer(engine: &dyn GeoEngine, name: &str) -> Result<Option<LayerRef>, EngineError> {
    if !engine.exists(name)? {
        return Ok(None);
    }

    Ok(Some(LayerRef {
        name: name.to_string(),
        kind: engine.geometry_kind(name)?,
        feature_count: engine.feature_count(name)?,
    }))
}
