//! File-backed `MetadataStore` reading the per-jail `config.json` records.

use crate::error::{JailpackError, JailpackResult};
use crate::provider::MetadataStore;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Stores each jail's fields in `{root}/{jail}/config.json`.
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    root: PathBuf,
}

impl JsonMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of the record for `jail` (e.g. `jails/abc`).
    pub fn record_path(&self, jail: &str) -> PathBuf {
        self.root.join(jail).join(CONFIG_FILE)
    }

    fn read_record(&self, path: &Path) -> JailpackResult<Option<Map<String, Value>>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(Some(map)),
            other => Err(JailpackError::Metadata(format!(
                "{} holds a {} instead of an object",
                path.display(),
                json_kind(&other)
            ))),
        }
    }
}

impl MetadataStore for JsonMetadataStore {
    fn get_field(&self, jail: &str, key: &str) -> JailpackResult<Option<String>> {
        let path = self.record_path(jail);
        let Some(record) = self.read_record(&path)? else {
            return Ok(None);
        };
        Ok(match record.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    /// Rewrite one field, keeping numeric fields numeric when the new value parses.
    fn set_field(&self, jail: &str, key: &str, value: &str) -> JailpackResult<()> {
        let path = self.record_path(jail);
        let mut record = self.read_record(&path)?.ok_or_else(|| {
            JailpackError::Metadata(format!("no configuration record at {}", path.display()))
        })?;

        let numeric = matches!(record.get(key), Some(Value::Number(_)));
        let new_value = match value.parse::<i64>() {
            Ok(number) if numeric => Value::from(number),
            _ => Value::String(value.to_string()),
        };
        record.insert(key.to_string(), new_value);

        let rendered = serde_json::to_string_pretty(&Value::Object(record))?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, rendered)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
