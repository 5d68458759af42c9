//! Read-only run configuration. Shared across parallel runs; never mutated
//! by a pass.
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether and how structurally identical generated types are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum CompressionPolicy {
    /// Identical shapes stay distinct, one type per originating context.
    Off,
    /// Merge plain object types and anonymous array/map shapes.
    #[default]
    Default,
    /// Additionally merge error structures and generic-based types.
    ErrorStructureAndGenerics,
}

impl CompressionPolicy {
    pub fn enabled(self) -> bool {
        !matches!(self, CompressionPolicy::Off)
    }

    pub fn compresses_error_structures(self) -> bool {
        matches!(self, CompressionPolicy::ErrorStructureAndGenerics)
    }

    pub fn compresses_generics(self) -> bool {
        matches!(self, CompressionPolicy::ErrorStructureAndGenerics)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamingRules {
    pub interface_prefix: String,
    pub accessor_prefix: String,
    pub type_parameter_prefix: String,
    /// Wire-less name of the additional-properties bag.
    pub extension_property: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            interface_prefix: "I".to_string(),
            accessor_prefix: "get".to_string(),
            type_parameter_prefix: "T".to_string(),
            extension_property: "additionalProperties".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    pub compression: CompressionPolicy,
    /// Package for documents that do not declare a namespace.
    pub default_namespace: String,
    /// Synthesize JSON-RPC envelopes for documents that list methods.
    pub jsonrpc: bool,
    /// Run the generic resolver.
    pub generify: bool,
    /// How many objects must carry their own additional-properties bag before
    /// they share a contract interface; `0` turns it off.
    pub additional_properties_interface_after: usize,
    pub naming: NamingRules,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compression: CompressionPolicy::Default,
            default_namespace: "generated.model".to_string(),
            jsonrpc: true,
            generify: true,
            additional_properties_interface_after: 2,
            naming: NamingRules::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },
}

impl Options {
    pub fn with_compression(mut self, policy: CompressionPolicy) -> Self {
        self.compression = policy;
        self
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        crate::path_de::from_str_with_path::<Options>(&source)
            .map_err(|message| ConfigError::Parse { path: display, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let options: Options = serde_json::from_str(
            r#"{
                "compression": "errorStructureAndGenerics",
                "additionalPropertiesInterfaceAfter": 0,
                "naming": { "interfacePrefix": "Has" }
            }"#,
        )
        .unwrap();
        assert_eq!(options.compression, CompressionPolicy::ErrorStructureAndGenerics);
        assert_eq!(options.naming.interface_prefix, "Has");
        assert_eq!(options.naming.accessor_prefix, "get");
        assert_eq!(options.default_namespace, "generated.model");
        assert!(options.jsonrpc);
        assert_eq!(options.additional_properties_interface_after, 0);
        assert_eq!(Options::default().additional_properties_interface_after, 2);
    }

    #[test]
    fn policy_flags() {
        assert!(!CompressionPolicy::Off.enabled());
        assert!(CompressionPolicy::Default.enabled());
        assert!(!CompressionPolicy::Default.compresses_error_structures());
        assert!(CompressionPolicy::ErrorStructureAndGenerics.compresses_generics());
    }
}
