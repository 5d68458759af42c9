//! Type Compressor: merges structurally identical types by redirect.
//!
//! Keys are built from resolved refs, so each round can expose new
//! duplicates (two wrappers become equal once their payloads merged); rounds
//! repeat until nothing merges.
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::config::CompressionPolicy;
use crate::error::ModelError;
use crate::graph::{Literal, Stage, TypeGraph, TypeKind, TypeRef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionReport {
    pub policy: CompressionPolicy,
    pub merges: Vec<Merge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Merge {
    pub survivor: String,
    pub survivor_ref: TypeRef,
    pub removed: Vec<String>,
}

impl CompressionReport {
    pub fn removed_count(&self) -> usize {
        self.merges.iter().map(|m| m.removed.len()).sum()
    }
}

pub fn compress(graph: &mut TypeGraph, policy: CompressionPolicy) -> Result<CompressionReport, ModelError> {
    let mut report = CompressionReport { policy, merges: Vec::new() };
    if policy.enabled() {
        loop {
            let merges = round(graph, policy)?;
            if merges.is_empty() {
                break;
            }
            report.merges.extend(merges);
        }
        graph.canonicalize();
    }
    graph.advance(Stage::Compressed);
    Ok(report)
}

// ------- keys -------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TyKey {
    Ref(TypeRef),
    /// A parameter of the object being keyed, by position.
    OwnParam(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PropertyKey {
    wire_name: String,
    ty: TyKey,
    required: bool,
    nullable: bool,
    constant: Option<Literal>,
    default_value: Option<Literal>,
    extension: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ShapeKey {
    Array(TypeRef),
    Map(TypeRef),
    Application(TypeRef, Vec<TypeRef>),
    Object { properties: Vec<PropertyKey>, base: Option<TypeRef> },
}

/// What must also agree before two same-shaped members may merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartitionKey {
    bounds: Vec<Option<TypeRef>>,
    interfaces: Vec<TypeRef>,
}

fn eligible(graph: &TypeGraph, r: TypeRef, policy: CompressionPolicy) -> bool {
    let node = graph.node(r);
    match &node.kind {
        TypeKind::Array(_) | TypeKind::Map(_) => true,
        TypeKind::Generic(_) => policy.compresses_generics(),
        TypeKind::Object(o) => {
            let applied = o.base.is_some_and(|b| matches!(graph.kind(b), TypeKind::Generic(_)));
            if node.role.is_error_structure() {
                policy.compresses_error_structures()
            } else if applied {
                policy.compresses_generics()
            } else {
                true
            }
        }
        _ => false,
    }
}

fn shape_key(graph: &TypeGraph, r: TypeRef) -> Option<ShapeKey> {
    let resolve = |t: TypeRef| graph.resolve(t);
    Some(match graph.kind(r) {
        TypeKind::Array(item) => ShapeKey::Array(resolve(*item)),
        TypeKind::Map(value) => ShapeKey::Map(resolve(*value)),
        TypeKind::Generic(g) => ShapeKey::Application(resolve(g.of), g.args.iter().map(|a| resolve(*a)).collect()),
        TypeKind::Object(o) => {
            let mut properties: Vec<PropertyKey> = o
                .properties
                .iter()
                .map(|p| {
                    let ty = resolve(p.ty);
                    let ty = match graph.kind(ty) {
                        TypeKind::Parameter(param) if resolve(param.owner) == r => TyKey::OwnParam(param.index),
                        _ => TyKey::Ref(ty),
                    };
                    PropertyKey {
                        wire_name: p.wire_name.clone(),
                        ty,
                        required: p.required,
                        nullable: p.nullable,
                        constant: p.constant.clone(),
                        default_value: p.default_value.clone(),
                        extension: p.extension,
                    }
                })
                .collect();
            properties.sort_by(|a, b| a.wire_name.cmp(&b.wire_name));
            ShapeKey::Object { properties, base: o.base.map(resolve) }
        }
        _ => return None,
    })
}

fn partition_key(graph: &TypeGraph, r: TypeRef) -> PartitionKey {
    match graph.object(r) {
        Some(o) => {
            let mut interfaces: Vec<TypeRef> = o.interfaces.iter().map(|i| graph.resolve(i.interface)).collect();
            interfaces.sort();
            PartitionKey {
                bounds: o.params.iter().map(|p| p.upper_bound.map(|b| graph.resolve(b))).collect(),
                interfaces,
            }
        }
        None => PartitionKey { bounds: Vec::new(), interfaces: Vec::new() },
    }
}

// ------- rounds -------

fn round(graph: &mut TypeGraph, policy: CompressionPolicy) -> Result<Vec<Merge>, ModelError> {
    // 1) group by shape, discovery order
    let mut groups: IndexMap<ShapeKey, Vec<TypeRef>> = IndexMap::new();
    for r in graph.live_refs() {
        if !eligible(graph, r, policy) {
            continue;
        }
        if let Some(key) = shape_key(graph, r) {
            groups.entry(key).or_default().push(r);
        }
    }

    let incoming = incoming_refs(graph);
    let mut merges = Vec::new();
    for members in groups.into_values().filter(|g| g.len() > 1) {
        // 2) split by what the shape key does not cover
        let mut partitions: IndexMap<PartitionKey, Vec<TypeRef>> = IndexMap::new();
        for &r in &members {
            partitions.entry(partition_key(graph, r)).or_default().push(r);
        }
        if policy.compresses_error_structures() {
            check_error_structures(graph, &partitions)?;
        }

        // 3) merge each partition into its most referenced member
        for part in partitions.into_values().filter(|p| p.len() > 1) {
            let survivor = part
                .iter()
                .copied()
                .max_by(|a, b| {
                    let (ca, cb) = (incoming.get(a).copied().unwrap_or(0), incoming.get(b).copied().unwrap_or(0));
                    ca.cmp(&cb).then(b.cmp(a))
                })
                .unwrap_or(part[0]);
            let removed: Vec<TypeRef> = part.into_iter().filter(|r| *r != survivor).collect();
            let merge = Merge {
                survivor: graph.describe(survivor),
                survivor_ref: survivor,
                removed: removed.iter().map(|r| graph.describe(*r)).collect(),
            };
            for r in removed {
                graph.redirect(r, survivor);
            }
            debug!(survivor = %merge.survivor, removed = ?merge.removed, "merged identical types");
            merges.push(merge);
        }
    }
    Ok(merges)
}

fn check_error_structures(
    graph: &TypeGraph,
    partitions: &IndexMap<PartitionKey, Vec<TypeRef>>,
) -> Result<(), ModelError> {
    let mut first: Option<TypeRef> = None;
    for part in partitions.values() {
        let Some(member) = part.iter().copied().find(|r| graph.node(*r).role.is_error_structure()) else {
            continue;
        };
        match first {
            None => first = Some(member),
            Some(survivor) => {
                return Err(ModelError::CompressionPolicyConflict {
                    location: graph.location(member),
                    survivor: graph.describe(survivor),
                    member: graph.describe(member),
                    reason: "identical error structures differ in generic bounds or implemented interfaces".to_string(),
                });
            }
        }
    }
    Ok(())
}

fn incoming_refs(graph: &TypeGraph) -> HashMap<TypeRef, usize> {
    let mut counts = HashMap::new();
    for (_, node) in graph.live() {
        for child in node.kind.children() {
            *counts.entry(graph.resolve(child)).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::config::Options;
    use crate::generics::resolve_generics;
    use crate::inheritance::normalize_inheritance;
    use crate::package::resolve_packages;
    use crate::schema::SchemaDocument;
    use crate::unions::synthesize;
    use serde_json::{json, Value};

    fn compressed(document: Value, policy: CompressionPolicy) -> Result<(TypeGraph, CompressionReport), ModelError> {
        let doc: SchemaDocument = serde_json::from_value(document).unwrap();
        let options = Options::default().with_compression(policy);
        let mut graph = build(&[doc], &options)?;
        resolve_packages(&mut graph)?;
        normalize_inheritance(&mut graph, &options)?;
        resolve_generics(&mut graph, &options)?;
        synthesize(&mut graph, &options)?;
        let report = compress(&mut graph, policy)?;
        graph.validate()?;
        Ok((graph, report))
    }

    fn twins() -> Value {
        json!({
            "id": "api.json",
            "namespace": "m",
            "schemas": {
                "Holder": {
                    "type": "object",
                    "properties": {
                        "first": { "type": "object", "properties": { "x": { "type": "string" } } },
                        "second": { "type": "object", "properties": { "x": { "type": "string" } } },
                        "tags": { "type": "array", "items": { "type": "string" } },
                        "labels": { "type": "array", "items": { "type": "string" } }
                    }
                },
                "Point": { "type": "object", "properties": { "x": { "type": "string" } } }
            }
        })
    }

    #[test]
    fn identical_objects_and_arrays_merge() {
        let (graph, report) = compressed(twins(), CompressionPolicy::Default).unwrap();
        let holder = graph
            .live()
            .find(|(_, n)| n.qualified_name().is_some_and(|q| q.local == "Holder"))
            .map(|(r, _)| r)
            .unwrap();
        let o = graph.object(holder).unwrap();
        assert_eq!(o.properties[0].ty, o.properties[1].ty);
        assert_eq!(o.properties[2].ty, o.properties[3].ty);
        assert_eq!(report.removed_count(), 3);
        // ties go to the first discovered member
        assert_eq!(graph.describe(o.properties[0].ty), "m.First");
    }

    #[test]
    fn off_policy_is_a_no_op() {
        let (graph, report) = compressed(twins(), CompressionPolicy::Off).unwrap();
        assert!(report.merges.is_empty());
        assert_eq!(graph.stage(), Stage::Compressed);
        let objects = graph.live().filter(|(_, n)| n.kind.as_object().is_some()).count();
        assert_eq!(objects, 4);
    }

    #[test]
    fn error_structures_merge_only_when_asked() {
        let document = json!({
            "id": "rpc.json",
            "namespace": "m",
            "methods": [
                { "name": "a", "params": [], "errors": [{ "code": 7, "message": "Busy" }] },
                { "name": "b", "params": [], "errors": [{ "code": 7, "message": "Busy" }] }
            ]
        });
        let errors = |graph: &TypeGraph| -> Vec<String> {
            graph
                .live()
                .filter(|(_, n)| n.role == crate::graph::TypeRole::Error)
                .map(|(r, _)| graph.describe(r))
                .collect()
        };

        let (graph, _) = compressed(document.clone(), CompressionPolicy::Default).unwrap();
        assert_eq!(errors(&graph), ["m.JsonRpcError", "m.ErrorUnknownError", "m.AError7Error", "m.BError7Error"]);

        let (graph, report) = compressed(document, CompressionPolicy::ErrorStructureAndGenerics).unwrap();
        // the shared bodies differ in code constant and defaults, so they stay
        assert_eq!(errors(&graph), ["m.JsonRpcError", "m.ErrorUnknownError", "m.AError7Error"]);
        let merged = |survivor: &str| report.merges.iter().find(|m| m.survivor == survivor).map(|m| m.removed.clone());
        assert_eq!(merged("m.AError7Error"), Some(vec!["m.BError7Error".to_string()]));
        assert_eq!(merged("m.AError7"), Some(vec!["m.BError7".to_string()]));
    }

    #[test]
    fn merge_decisions_are_stable() {
        let run = || compressed(twins(), CompressionPolicy::Default).unwrap().1;
        assert_eq!(run(), run());
    }
}
