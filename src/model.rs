//! Finalized Model: the frozen graph handed to renderers.
//!
//! Read-only apart from the per-enum registries, which load on first use and
//! then live as long as the model.
use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;

use crate::compress::CompressionReport;
use crate::error::SchemaLocation;
use crate::graph::{
    Literal, PrimitiveKind, QualifiedName, Stage, TypeGraph, TypeKind, TypeNode, TypeRef, TypeRole, UnknownValueStrategy,
};
use crate::runtime::{EnumRegistry, StructuralCoercer, UnionValue};

#[derive(Debug)]
pub struct FinalizedModel {
    graph: TypeGraph,
    report: CompressionReport,
    names: IndexMap<String, TypeRef>,
    registries: HashMap<TypeRef, OnceCell<EnumRegistry>>,
}

impl FinalizedModel {
    pub(crate) fn freeze(graph: TypeGraph, report: CompressionReport) -> Self {
        let mut names = IndexMap::new();
        let mut registries = HashMap::new();
        for (r, node) in graph.live() {
            if let Some(q) = node.qualified_name() {
                names.insert(q.to_string(), r);
            }
            if matches!(node.kind, TypeKind::Enum(_)) {
                registries.insert(r, OnceCell::new());
            }
        }
        Self { graph, report, names, registries }
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    pub fn node(&self, r: TypeRef) -> &TypeNode {
        self.graph.node(r)
    }

    pub fn get(&self, r: TypeRef) -> Option<&TypeNode> {
        self.graph.try_node(r)
    }

    pub fn qualified_name(&self, r: TypeRef) -> Option<&QualifiedName> {
        self.graph.try_node(r)?.qualified_name()
    }

    /// Lookup by `package.Local`.
    pub fn find(&self, qualified: &str) -> Option<TypeRef> {
        self.names.get(qualified).copied()
    }

    /// Declared types in discovery order.
    pub fn declared(&self) -> impl Iterator<Item = (&str, TypeRef)> {
        self.names.iter().map(|(name, r)| (name.as_str(), *r))
    }

    pub fn describe(&self, r: TypeRef) -> String {
        self.graph.describe(r)
    }

    pub fn report(&self) -> &CompressionReport {
        &self.report
    }

    pub fn enum_registry(&self, r: TypeRef) -> Option<&EnumRegistry> {
        let r = self.graph.resolve(r);
        let cell = self.registries.get(&r)?;
        let TypeKind::Enum(e) = self.graph.kind(r) else { return None };
        Some(cell.get_or_init(|| EnumRegistry::new(e)))
    }

    /// Wraps `raw` as an instance of union `r`; `None` when `r` is no union.
    pub fn union_value(&self, r: TypeRef, raw: Value) -> Option<UnionValue> {
        match self.graph.kind(self.graph.resolve(r)) {
            TypeKind::Union(u) => Some(UnionValue::new(u, raw)),
            _ => None,
        }
    }

    pub fn coercer(&self) -> StructuralCoercer<'_> {
        StructuralCoercer::new(&self.graph)
    }

    pub fn dump(&self) -> ModelDump {
        let graph = &self.graph;
        let expr = |r: TypeRef| TypeExpr { id: graph.resolve(r), display: graph.describe(r) };
        let types = graph
            .live()
            .map(|(r, node)| TypeDump {
                id: r,
                name: node.qualified_name().map(|q| q.to_string()),
                role: node.role,
                origin: graph.location(r),
                docs: node.docs.clone(),
                kind: match &node.kind {
                    TypeKind::Primitive(p) => KindDump::Primitive { primitive: p.kind, format: p.format.clone() },
                    TypeKind::Array(item) => KindDump::Array { item: expr(*item) },
                    TypeKind::Map(value) => KindDump::Map { value: expr(*value) },
                    TypeKind::Object(o) => KindDump::Object {
                        base: o.base.map(expr),
                        interfaces: o.interfaces.iter().map(|i| expr(i.interface)).collect(),
                        params: o
                            .params
                            .iter()
                            .map(|p| ParamDump { name: p.name.clone(), upper_bound: p.upper_bound.map(expr) })
                            .collect(),
                        properties: o
                            .properties
                            .iter()
                            .map(|p| PropertyDump {
                                name: p.name.clone(),
                                wire_name: p.wire_name.clone(),
                                ty: expr(p.ty),
                                required: p.required,
                                nullable: p.nullable,
                                default_value: p.default_value.clone(),
                                constant: p.constant.clone(),
                                extension: p.extension,
                            })
                            .collect(),
                    },
                    TypeKind::Interface(i) => KindDump::Interface {
                        source: i.source.map(expr),
                        methods: i
                            .methods
                            .iter()
                            .map(|m| MethodDump { name: m.name.clone(), returns: expr(m.returns), nullable: m.nullable })
                            .collect(),
                    },
                    TypeKind::Enum(e) => KindDump::Enum {
                        cases: e.cases.iter().map(|c| (c.name.clone(), c.wire_value.clone())).collect(),
                        unknown: e.unknown.clone(),
                        variants: e.variants.iter().map(|v| (v.name.clone(), v.cases.clone())).collect(),
                    },
                    TypeKind::Union(u) => KindDump::Union {
                        exclusive: u.exclusive,
                        discriminator: u.discriminator.clone(),
                        raw: u.raw.map(expr),
                        accessors: u
                            .accessors
                            .iter()
                            .map(|a| AccessorDump { name: a.name.clone(), candidate: expr(a.candidate), tag: a.tag.clone() })
                            .collect(),
                    },
                    TypeKind::Generic(g) => KindDump::Generic { of: expr(g.of), args: g.args.iter().map(|a| expr(*a)).collect() },
                    TypeKind::Parameter(p) => KindDump::Parameter { owner: expr(p.owner), index: p.index },
                    TypeKind::Pending => KindDump::Pending,
                },
            })
            .collect();
        ModelDump { stage: graph.stage(), types, compression: self.report.clone() }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DUMP
// ————————————————————————————————————————————————————————————————————————————

/// Stable JSON view of a finalized model.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDump {
    pub stage: Stage,
    pub types: Vec<TypeDump>,
    pub compression: CompressionReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDump {
    pub id: TypeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: TypeRole,
    pub origin: SchemaLocation,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docs: Vec<String>,
    #[serde(flatten)]
    pub kind: KindDump,
}

#[derive(Debug, Serialize)]
pub struct TypeExpr {
    #[serde(rename = "ref")]
    pub id: TypeRef,
    pub display: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KindDump {
    Primitive {
        primitive: PrimitiveKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Array {
        item: TypeExpr,
    },
    Map {
        value: TypeExpr,
    },
    Object {
        base: Option<TypeExpr>,
        interfaces: Vec<TypeExpr>,
        params: Vec<ParamDump>,
        properties: Vec<PropertyDump>,
    },
    Interface {
        source: Option<TypeExpr>,
        methods: Vec<MethodDump>,
    },
    Enum {
        cases: Vec<(String, Literal)>,
        unknown: UnknownValueStrategy,
        variants: Vec<(String, Vec<usize>)>,
    },
    Union {
        exclusive: bool,
        discriminator: Option<String>,
        raw: Option<TypeExpr>,
        accessors: Vec<AccessorDump>,
    },
    Generic {
        of: TypeExpr,
        args: Vec<TypeExpr>,
    },
    Parameter {
        owner: TypeExpr,
        index: usize,
    },
    Pending,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDump {
    pub name: String,
    pub upper_bound: Option<TypeExpr>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDump {
    pub name: String,
    pub wire_name: String,
    #[serde(rename = "type")]
    pub ty: TypeExpr,
    pub required: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Literal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant: Option<Literal>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub extension: bool,
}

#[derive(Debug, Serialize)]
pub struct MethodDump {
    pub name: String,
    pub returns: TypeExpr,
    pub nullable: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessorDump {
    pub name: String,
    pub candidate: TypeExpr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<Literal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::pipeline::Pipeline;
    use crate::schema::SchemaDocument;
    use serde_json::json;

    fn model() -> FinalizedModel {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "id": "pets.json",
            "namespace": "zoo",
            "schemas": {
                "Tag": { "enum": ["tag", "species"] },
                "TagOrString": { "oneOf": [{ "$ref": "Tag" }, { "type": "string" }] },
                "Pet": {
                    "type": "object",
                    "required": ["name"],
                    "properties": { "name": { "type": "string" }, "tag": { "$ref": "TagOrString" } }
                }
            }
        }))
        .unwrap();
        Pipeline::new(Options::default()).run(&[doc]).unwrap()
    }

    #[test]
    fn lookup_by_qualified_name() {
        let model = model();
        let pet = model.find("zoo.Pet").unwrap();
        assert_eq!(model.qualified_name(pet).unwrap().local, "Pet");
        assert!(model.find("zoo.Nope").is_none());
        let declared: Vec<&str> = model.declared().map(|(name, _)| name).collect();
        assert_eq!(declared, ["zoo.Tag", "zoo.TagOrString", "zoo.Pet"]);
    }

    #[test]
    fn enum_registry_loads_once() {
        let model = model();
        let open = model.find("zoo.TagOrString").unwrap();
        let first = model.enum_registry(open).unwrap() as *const EnumRegistry;
        let second = model.enum_registry(open).unwrap() as *const EnumRegistry;
        assert_eq!(first, second);

        let registry = model.enum_registry(open).unwrap();
        assert!(registry.is_open());
        let a = registry.get(&Literal::from("unknown"));
        let b = registry.get(&Literal::from("unknown"));
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert!(model.enum_registry(model.find("zoo.Pet").unwrap()).is_none());
    }

    #[test]
    fn dump_is_plain_json() {
        let model = model();
        let dump = serde_json::to_value(model.dump()).unwrap();
        let pet = dump["types"].as_array().unwrap().iter().find(|t| t["name"] == "zoo.Pet").unwrap();
        assert_eq!(pet["kind"], "object");
        assert_eq!(pet["properties"][0]["wireName"], "name");
        assert_eq!(pet["properties"][0]["type"]["display"], "string");
        assert_eq!(pet["properties"][1]["type"]["display"], "zoo.TagOrString");
        assert_eq!(dump["stage"], "compressed");
    }
}
