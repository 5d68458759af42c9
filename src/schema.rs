//! Input boundary: an already parsed and dereferenced schema document.
//!
//! The shapes mirror JSON Schema / OpenRPC closely enough that real documents
//! deserialize directly; anything we do not model is ignored by serde.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDocument {
    /// Stable document identity; path-like (`some/base/pkg.json`).
    pub id: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub schemas: IndexMap<String, Schema>,
    #[serde(default)]
    pub methods: Vec<RpcMethod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcMethod {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ContentDescriptor>,
    #[serde(default)]
    pub result: Option<ContentDescriptor>,
    #[serde(default)]
    pub errors: Vec<RpcError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub schema: Schema,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Schema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaTypes {
    One(String),
    Many(Vec<String>),
}

impl SchemaTypes {
    pub fn names(&self) -> Vec<&str> {
        match self {
            SchemaTypes::One(s) => vec![s.as_str()],
            SchemaTypes::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<Schema>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discriminator {
    pub property_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub types: Option<SchemaTypes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<Schema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Discriminator>,
}

impl Schema {
    pub fn type_names(&self) -> Vec<&str> {
        self.types.as_ref().map(SchemaTypes::names).unwrap_or_default()
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.type_names().contains(&name)
    }

    pub fn is_object_like(&self) -> bool {
        self.has_type("object") || !self.properties.is_empty() || self.additional_properties.is_some()
    }

    /// No structural keyword at all: accepts any value.
    pub fn is_unconstrained(&self) -> bool {
        self.reference.is_none()
            && self.types.is_none()
            && self.properties.is_empty()
            && self.additional_properties.is_none()
            && self.items.is_none()
            && self.all_of.is_empty()
            && self.one_of.is_none()
            && self.any_of.is_none()
            && self.enum_values.is_none()
            && self.constant.is_none()
    }

    /// A bare primitive with nothing narrowing it (the "open" enum fallback).
    pub fn bare_primitive(&self) -> Option<&str> {
        let names = self.type_names();
        let simple = self.reference.is_none()
            && self.enum_values.is_none()
            && self.constant.is_none()
            && self.properties.is_empty()
            && self.one_of.is_none()
            && self.any_of.is_none()
            && self.all_of.is_empty();
        match names.as_slice() {
            [one] if simple && matches!(*one, "string" | "integer" | "number") => Some(one),
            _ => None,
        }
    }

    pub fn is_null_only(&self) -> bool {
        self.type_names() == ["null"] && self.reference.is_none()
    }

    /// `oneOf` (exclusive) or `anyOf` candidates, possibly empty.
    pub fn composition(&self) -> Option<(&[Schema], bool)> {
        match (&self.one_of, &self.any_of) {
            (Some(one_of), _) => Some((one_of.as_slice(), true)),
            (None, Some(any_of)) => Some((any_of.as_slice(), false)),
            (None, None) => None,
        }
    }

    /// Only a `$ref`, possibly annotated; names another schema.
    pub fn is_bare_reference(&self) -> bool {
        self.reference.is_some()
            && self.types.is_none()
            && self.properties.is_empty()
            && self.additional_properties.is_none()
            && self.items.is_none()
            && self.all_of.is_empty()
            && self.composition().is_none()
            && self.enum_values.is_none()
            && self.constant.is_none()
    }
}

/// Splits a `$ref` into (document id, schema name). An empty document part
/// means "this document".
pub fn split_reference(reference: &str) -> (&str, &str) {
    let (document, pointer) = match reference.split_once('#') {
        Some((document, pointer)) => (document, pointer),
        None => ("", reference),
    };
    let name = pointer.rsplit('/').next().unwrap_or(pointer);
    (document, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_forms() {
        assert_eq!(split_reference("Thing"), ("", "Thing"));
        assert_eq!(split_reference("#/components/schemas/Thing"), ("", "Thing"));
        assert_eq!(split_reference("other/api.json#/definitions/Thing"), ("other/api.json", "Thing"));
    }

    #[test]
    fn deserializes_openrpc_flavored_document() {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "id": "api.json",
            "schemas": {
                "Thing": {
                    "type": ["object", "null"],
                    "properties": { "id": { "type": "string" } },
                    "required": ["id"],
                    "additionalProperties": { "type": "integer" }
                }
            },
            "methods": [{
                "name": "list_things",
                "params": [{ "name": "limit", "schema": { "type": "integer" } }],
                "result": { "name": "things", "schema": { "type": "array", "items": { "$ref": "Thing" } } },
                "errors": [{ "code": 100, "message": "Server is busy" }]
            }]
        }))
        .unwrap();
        let thing = &doc.schemas["Thing"];
        assert!(thing.has_type("null"));
        assert!(matches!(thing.additional_properties, Some(AdditionalProperties::Schema(_))));
        assert_eq!(doc.methods[0].errors[0].code, Some(100));
        assert!(!doc.methods[0].params[0].required);
    }

    #[test]
    fn bare_primitive_detection() {
        let s: Schema = serde_json::from_value(json!({ "type": "string" })).unwrap();
        assert_eq!(s.bare_primitive(), Some("string"));
        let e: Schema = serde_json::from_value(json!({ "type": "string", "enum": ["a"] })).unwrap();
        assert_eq!(e.bare_primitive(), None);
    }
}
