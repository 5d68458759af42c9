//! Canonical JSON-RPC 2.0 envelopes for documents that list methods.
//!
//! Envelopes are expressed as ordinary schemas and fed through the regular
//! builder, so they get docs, defaults and raw parents like any other input.
use indexmap::IndexMap;
use serde_json::Value;

use crate::graph::TypeRole;
use crate::naming::pascal_case;
use crate::schema::{ContentDescriptor, RpcError, RpcMethod, Schema, SchemaDocument, SchemaTypes};

pub(super) const JSONRPC_VERSION: &str = "2.0";
pub const UNKNOWN_ERROR_CODE: i64 = -1;
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown Error";

#[derive(Debug, Clone)]
pub(super) struct Envelope {
    pub schema: Schema,
    pub role: TypeRole,
    pub pointer: String,
}

// ------- schema shorthands -------

fn typed(name: &str) -> Schema {
    Schema { types: Some(SchemaTypes::One(name.to_string())), ..Schema::default() }
}

fn with_default(mut schema: Schema, value: impl Into<Value>) -> Schema {
    schema.default = Some(value.into());
    schema
}

fn described(mut schema: Schema, description: Option<&String>) -> Schema {
    if schema.description.is_none() {
        schema.description = description.cloned();
    }
    schema
}

fn reference(name: &str) -> Schema {
    Schema { reference: Some(name.to_string()), ..Schema::default() }
}

fn object(properties: Vec<(&str, Schema)>, required: &[&str]) -> Schema {
    Schema {
        types: Some(SchemaTypes::One("object".to_string())),
        properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        required: required.iter().map(|s| s.to_string()).collect(),
        ..Schema::default()
    }
}

fn extending(parent: &str, own: Schema, description: Option<&String>) -> Schema {
    Schema { all_of: vec![reference(parent), own], description: description.cloned(), ..Schema::default() }
}

fn jsonrpc_version() -> Schema {
    with_default(typed("string"), JSONRPC_VERSION)
}

fn error_suffix(code: Option<i64>) -> String {
    match code {
        Some(code) if code < 0 => format!("Minus{}", code.unsigned_abs()),
        Some(code) => code.to_string(),
        None => "Unknown".to_string(),
    }
}

// ------- envelope set -------

/// All envelope schemas for `document`, keyed by schema name, in the order
/// they are declared.
pub(super) fn envelopes(document: &SchemaDocument) -> IndexMap<String, Envelope> {
    let mut out = IndexMap::new();
    if document.methods.is_empty() {
        return out;
    }
    let mut put = |name: String, schema: Schema, role: TypeRole, pointer: String| {
        out.insert(name, Envelope { schema, role, pointer });
    };

    put(
        "JsonRpcRequest".into(),
        object(
            vec![("id", typed("string")), ("jsonrpc", jsonrpc_version()), ("method", typed("string"))],
            &["id", "method"],
        ),
        TypeRole::Request,
        "/methods".into(),
    );
    put("JsonRpcRequestParams".into(), object(Vec::new(), &[]), TypeRole::RequestParams, "/methods".into());
    put(
        "JsonRpcResponse".into(),
        object(vec![("id", typed("string")), ("jsonrpc", jsonrpc_version())], &["id"]),
        TypeRole::Response,
        "/methods".into(),
    );
    put("JsonRpcError".into(), error_body(&RpcError::default(), None), TypeRole::Error, "/methods".into());
    put(
        "JsonRpcErrorResponse".into(),
        object(
            vec![("id", typed("string")), ("jsonrpc", jsonrpc_version()), ("error", reference("JsonRpcError"))],
            &["error"],
        ),
        TypeRole::ErrorResponse,
        "/methods".into(),
    );
    put(
        "ErrorUnknown".into(),
        extending("JsonRpcErrorResponse", object(vec![("error", reference("ErrorUnknownError"))], &["error"]), None),
        TypeRole::ErrorResponse,
        "/methods".into(),
    );
    put(
        "ErrorUnknownError".into(),
        extending("JsonRpcError", error_body(&RpcError::default(), None), None),
        TypeRole::Error,
        "/methods".into(),
    );

    for (index, method) in document.methods.iter().enumerate() {
        let pointer = format!("/methods/{index}");
        for (name, envelope) in method_envelopes(method, &pointer) {
            put(name, envelope.schema, envelope.role, envelope.pointer);
        }
    }
    out
}

fn error_body(error: &RpcError, description: Option<&String>) -> Schema {
    let mut code = with_default(typed("integer"), error.code.unwrap_or(UNKNOWN_ERROR_CODE));
    code.constant = error.code.map(Value::from);
    let message = with_default(typed("string"), error.message.clone().unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()));
    let data = error.data.clone().unwrap_or_default();
    let mut body = object(vec![("code", code), ("message", message), ("data", data)], &["code", "message"]);
    body.description = description.cloned();
    body
}

fn property_of(descriptor: &ContentDescriptor) -> Schema {
    described(descriptor.schema.clone(), descriptor.description.as_ref())
}

fn method_envelopes(method: &RpcMethod, pointer: &str) -> Vec<(String, Envelope)> {
    let base = pascal_case(&method.name);
    let mut out = Vec::new();
    let mut put = |name: String, schema: Schema, role: TypeRole| {
        out.push((name, Envelope { schema, role, pointer: pointer.to_string() }));
    };

    // 1) request + params
    let params_name = format!("{base}RequestParams");
    let required: Vec<&str> = method.params.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();
    let params = object(method.params.iter().map(|p| (p.name.as_str(), property_of(p))).collect(), &required);
    put(params_name.clone(), extending("JsonRpcRequestParams", params, None), TypeRole::RequestParams);

    let mut method_literal = typed("string");
    method_literal.constant = Some(Value::String(method.name.clone()));
    let request = object(vec![("method", method_literal), ("params", reference(&params_name))], &["method", "params"]);
    put(format!("{base}Request"), extending("JsonRpcRequest", request, method.description.as_ref()), TypeRole::Request);

    // 2) response
    let result = method.result.as_ref().map(property_of).unwrap_or_default();
    let response = object(vec![("result", result)], &["result"]);
    put(format!("{base}Response"), extending("JsonRpcResponse", response, None), TypeRole::Response);

    // 3) one error response per declared error
    for error in &method.errors {
        let name = format!("{base}Error{}", error_suffix(error.code));
        let body_name = format!("{name}Error");
        let envelope = object(vec![("error", reference(&body_name))], &["error"]);
        put(name, extending("JsonRpcErrorResponse", envelope, None), TypeRole::ErrorResponse);
        put(body_name, extending("JsonRpcError", error_body(error, None), error.message.as_ref()), TypeRole::Error);
    }
    out
}
