use crate::gis::BufferDistance;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod file;

pub use file::FileSettings;

const DEFAULT_GEOCODER_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress";

/// Distinguishes runtime behavior for different stages of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub pipeline: PipelineConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Reads `.env`, the optional YAML file named by `WNV_CONFIG_FILE`, and
    /// `WNV_*` environment overrides, in increasing precedence.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match env::var("WNV_CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => FileSettings::read(Path::new(path.trim()))?,
            _ => FileSettings::default(),
        };

        Self::from_lookup(|key| env::var(env_key(key)).ok().or_else(|| file.get(key)))
    }

    /// Builds the configuration from any key lookup. Keys are the lower-case
    /// names used in the YAML file (`remote_url`, `proj_dir`, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings { lookup: &lookup };

        let environment =
            AppEnvironment::from_str(&settings.string("env").unwrap_or_default());

        let remote_url = settings
            .string("remote_url")
            .ok_or(ConfigError::Missing("remote_url"))?;
        let proj_dir = PathBuf::from(settings.string("proj_dir").unwrap_or_else(|| ".".into()));
        let workspace = settings
            .string("workspace")
            .map(PathBuf::from)
            .unwrap_or_else(|| proj_dir.join("WestNileOutbreak.gdb"));
        let project = settings
            .string("project")
            .map(PathBuf::from)
            .unwrap_or_else(|| proj_dir.join("WestNileOutbreak.aprx"));

        let buffer_distance = match settings.string("buffer_distance") {
            Some(raw) => raw.parse::<BufferDistance>().map_err(|_| ConfigError::Invalid {
                key: "buffer_distance",
                value: raw,
            })?,
            None => BufferDistance::feet(1500.0),
        };

        let layers = LayerConfig {
            buffer_sources: settings.list(
                "buffer_layers",
                &[
                    "Mosquito_Larval_Sites",
                    "Wetlands",
                    "Lakes_and_Reservoirs",
                    "OSMP_Properties",
                ],
            ),
            buffer_distance,
            intersect_layers: settings.list(
                "intersect_layers",
                &["buf_Mosquito_Larval_Sites", "buf_Wetlands"],
            ),
            exclusion_layer: settings.string_or("exclusion_layer", "avoid_points"),
            address_layer: settings.string_or("address_layer", "Addresses"),
            default_intersect_output: settings.string_or("default_intersect_output", "intersect"),
            erase_output: settings.string_or("erase_output", "erased_intersect"),
            join_output: settings.string_or("join_output", "target_addresses"),
            symbolized_layer: settings.string_or("symbolized_layer", "erased_intersect"),
        };

        let geocoder = GeocoderConfig {
            endpoint: settings.string_or("geocoder_url", DEFAULT_GEOCODER_URL),
            benchmark: settings.string_or("geocoder_benchmark", "2020"),
            locality_suffix: settings.string_or("locality_suffix", "Boulder CO"),
        };

        let max_attempts = settings.number("http_max_attempts", 3)?;
        let http = HttpConfig {
            timeout: Duration::from_secs(settings.number("http_timeout_secs", 30)?),
            max_attempts: u32::try_from(max_attempts)
                .map_err(|_| ConfigError::Invalid {
                    key: "http_max_attempts",
                    value: max_attempts.to_string(),
                })?
                .max(1),
        };

        let map = MapConfig {
            pdf_name: settings.string_or("pdf_name", "WestNileOutbreak_Map.pdf"),
            spatial_reference: match settings.string("spatial_reference") {
                Some(raw) if raw.eq_ignore_ascii_case("none") => None,
                Some(raw) => Some(raw.parse::<u32>().map_err(|_| ConfigError::Invalid {
                    key: "spatial_reference",
                    value: raw,
                })?),
                None => Some(26953),
            },
            subtitle: settings.string("map_subtitle"),
        };

        let pipeline = PipelineConfig {
            remote_url,
            proj_dir,
            workspace,
            project,
            python: PathBuf::from(settings.string_or("python", "python")),
            python_args: settings.list("python_args", &[]),
            overwrite_output: settings.flag("overwrite", true)?,
            engine_timeout: Duration::from_secs(settings.number("engine_timeout_secs", 600)?),
            intersect_output: settings.string("intersect_output"),
            layers,
            geocoder,
            http,
            map,
        };

        let telemetry = TelemetryConfig {
            log_level: settings.string_or("log_level", "info"),
            log_file: settings.string("log_file").map(PathBuf::from),
        };

        Ok(Self {
            environment,
            pipeline,
            telemetry,
        })
    }
}

/// Everything one pipeline run needs. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub remote_url: String,
    pub proj_dir: PathBuf,
    pub workspace: PathBuf,
    pub project: PathBuf,
    pub python: PathBuf,
    /// Arguments placed before the script (e.g. `run -n arcgispro-py3 python`).
    pub python_args: Vec<String>,
    pub overwrite_output: bool,
    pub engine_timeout: Duration,
    /// Answers the intersect-name prompt when set.
    pub intersect_output: Option<String>,
    pub layers: LayerConfig,
    pub geocoder: GeocoderConfig,
    pub http: HttpConfig,
    pub map: MapConfig,
}

impl PipelineConfig {
    pub fn raw_table_path(&self) -> PathBuf {
        self.proj_dir.join("addresses.csv")
    }

    pub fn geocoded_table_path(&self) -> PathBuf {
        self.proj_dir.join("new_addresses.csv")
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.proj_dir.join(&self.map.pdf_name)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.proj_dir.join("wnv_metrics.prom")
    }
}

/// Layer names the analysis stages read and write.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub buffer_sources: Vec<String>,
    pub buffer_distance: BufferDistance,
    pub intersect_layers: Vec<String>,
    pub exclusion_layer: String,
    pub address_layer: String,
    pub default_intersect_output: String,
    pub erase_output: String,
    pub join_output: String,
    pub symbolized_layer: String,
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub endpoint: String,
    pub benchmark: String,
    pub locality_suffix: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub pdf_name: String,
    pub spatial_reference: Option<u32>,
    /// Answers the subtitle prompt when set.
    pub subtitle: Option<String>,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

fn env_key(key: &str) -> String {
    format!("WNV_{}", key.to_ascii_uppercase())
}

struct Settings<'a, F> {
    lookup: &'a F,
}

impl<F> Settings<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn list(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.string(key) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            None => default.iter().map(|item| item.to_string()).collect(),
        }
    }

    fn number(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.string(key) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value: raw }),
            },
            None => Ok(default),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
    FileRead { path: PathBuf, source: std::io::Error },
    FileParse { path: PathBuf, source: serde_yaml::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => {
                write!(f, "{} must be set (or `{}` in the config file)", env_key(key), key)
            }
            ConfigError::Invalid { key, value } => {
                write!(f, "{} has an invalid value '{}'", env_key(key), value)
            }
            ConfigError::FileRead { path, .. } => {
                write!(f, "unable to read config file {}", path.display())
            }
            ConfigError::FileParse { path, .. } => {
                write!(f, "config file {} is not a flat YAML mapping", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Missing(_) | ConfigError::Invalid { .. } => None,
            ConfigError::FileRead { source, .. } => Some(source),
            ConfigError::FileParse { source, .. } => Some(source),
        }
    }
}
