//! Path-aware loading of schema documents and config files.
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::schema::SchemaDocument;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("{path}: {message}")]
    Json { path: String, message: String },
    #[error("{path}: JSON pointer `{pointer}` selects nothing")]
    Pointer { path: String, pointer: String },
    #[error("{path}: jq filter failed: {message}")]
    Jq { path: String, message: String },
}

/// How raw input is narrowed before it is read as schema documents.
#[derive(Debug, Clone, Default)]
pub struct LoadSettings {
    pub json_pointer: Option<String>,
    pub jq_expr: Option<String>,
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path} → {}", err.into_inner())
    })
}

pub fn from_value_with_path<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path} → {}", err.into_inner())
    })
}

/// Reads one input file. A jq filter may fan one file out into several
/// documents; documents without an `id` are keyed by their file path.
pub fn load_documents(path: &Path, settings: &LoadSettings) -> Result<Vec<SchemaDocument>, LoadError> {
    let display = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io { path: display.clone(), source })?;
    parse_documents(&display, &source, settings)
}

pub fn parse_documents(origin: &str, source: &str, settings: &LoadSettings) -> Result<Vec<SchemaDocument>, LoadError> {
    let value: Value = from_str_with_path(source).map_err(|message| LoadError::Json { path: origin.to_string(), message })?;
    let value = match &settings.json_pointer {
        Some(pointer) => value
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| LoadError::Pointer { path: origin.to_string(), pointer: pointer.clone() })?,
        None => value,
    };
    let values = match &settings.jq_expr {
        Some(filter) => crate::jq_exec::run_jaq(filter, &value)
            .map_err(|err| LoadError::Jq { path: origin.to_string(), message: format!("{err:#}") })?,
        None => vec![value],
    };
    let many = values.len() > 1;
    values
        .into_iter()
        .enumerate()
        .map(|(index, mut value)| {
            if let Value::Object(map) = &mut value {
                if !map.contains_key("id") {
                    let id = if many { format!("{origin}#{index}") } else { origin.to_string() };
                    map.insert("id".to_string(), Value::String(id));
                }
            }
            from_value_with_path::<SchemaDocument>(value)
                .map_err(|message| LoadError::Json { path: origin.to_string(), message })
        })
        .collect()
}
