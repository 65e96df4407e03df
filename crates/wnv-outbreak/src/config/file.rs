use super::ConfigError;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Flat key/value view of the optional YAML configuration file.
///
/// Scalars are kept as their string form and sequences are joined with
/// commas so they read the same way as the `WNV_*` list variables.
#[derive(Debug, Clone, Default)]
pub struct FileSettings {
    values: BTreeMap<String, String>,
}

impl FileSettings {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let mapping: BTreeMap<String, Value> = serde_yaml::from_str(raw)?;
        let values = mapping
            .into_iter()
            .filter_map(|(key, value)| {
                scalar_text(&value).map(|text| (key.trim().to_ascii_lowercase(), text))
            })
            .collect();

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Null | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}
