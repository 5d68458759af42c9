//! Generic Resolver: a supertype whose subtypes differ only in the type of a
//! shared field becomes generic in that field.
//!
//! Lifting happens per supertype (ancestors first). Spreading then makes the
//! parameters transitive through wrapper chains: when a parameter is bounded
//! by a raw generic declaration `G` and every use site passes something that
//! reaches `G<Y…>`, the supertype also takes `G`'s parameters and every site
//! is extended with `Y…`.
use std::collections::HashSet;

use tracing::debug;

use crate::config::Options;
use crate::error::ModelError;
use crate::graph::{
    GenericType, ParameterRef, PropertyNode, Stage, TypeGraph, TypeKind, TypeNode, TypeParameter, TypeRef, TypeRole,
};
use crate::naming::pascal_case;
use crate::structure;

pub fn resolve_generics(graph: &mut TypeGraph, options: &Options) -> Result<(), ModelError> {
    for supertype in supertypes(graph) {
        lift(graph, supertype, options);
    }
    spread(graph);
    check_arity(graph)?;
    graph.advance(Stage::Generified);
    Ok(())
}

// ————————————————————————————————————————————————————————————————————————————
// LIFTING
// ————————————————————————————————————————————————————————————————————————————

/// Objects that are the direct base of at least two objects, shallowest first.
fn supertypes(graph: &TypeGraph) -> Vec<TypeRef> {
    let mut out: Vec<(usize, TypeRef)> = Vec::new();
    for (r, node) in graph.live() {
        if node.kind.as_object().is_none() {
            continue;
        }
        if direct_subtypes(graph, r).len() >= 2 {
            out.push((graph.base_chain(r).len(), r));
        }
    }
    out.sort_by_key(|(depth, r)| (*depth, *r));
    out.into_iter().map(|(_, r)| r).collect()
}

fn direct_subtypes(graph: &TypeGraph, supertype: TypeRef) -> Vec<TypeRef> {
    graph
        .live()
        .filter(|(_, n)| n.kind.as_object().and_then(|o| o.base).is_some_and(|b| graph.object_decl(b) == Some(supertype)))
        .map(|(r, _)| r)
        .collect()
}

/// A field every subtype declares for itself with a varying type.
struct Lifted {
    wire_name: String,
    /// Per subtype, same order as the subtype list.
    args: Vec<TypeRef>,
    template: PropertyNode,
}

fn lift(graph: &mut TypeGraph, supertype: TypeRef, options: &Options) {
    let subtypes = direct_subtypes(graph, supertype);
    let lifted = liftable(graph, supertype, &subtypes);
    if lifted.is_empty() {
        return;
    }

    let prefix = &options.naming.type_parameter_prefix;
    let first_index = graph.object(supertype).map_or(0, |o| o.params.len());
    let origin = graph.node(supertype).origin.clone();

    for (k, field) in lifted.iter().enumerate() {
        let name = if lifted.len() == 1 { prefix.clone() } else { format!("{prefix}{}", pascal_case(&field.template.name)) };
        let upper_bound = common_bound(graph, &field.args);
        let index = first_index + k;
        let placeholder = graph.add(
            TypeNode::new(TypeKind::Parameter(ParameterRef { owner: supertype, index }), origin.clone())
                .with_role(TypeRole::Synthesized),
        );
        if let Some(object) = graph.object_mut(supertype) {
            object.params.push(TypeParameter { name: name.clone(), upper_bound });
            match object.property_mut(&field.wire_name) {
                Some(existing) => existing.ty = placeholder,
                None => object.push_property(PropertyNode { ty: placeholder, ..field.template.clone() }),
            }
        }
        debug!(supertype = %graph.describe(supertype), param = %name, field = %field.wire_name, "lifted type parameter");
    }

    for (i, &sub) in subtypes.iter().enumerate() {
        let args: Vec<TypeRef> = lifted.iter().map(|f| f.args[i]).collect();
        let sub_origin = graph.node(sub).origin.clone();
        let application = graph.add(
            TypeNode::new(TypeKind::Generic(GenericType { of: supertype, args }), sub_origin)
                .with_role(TypeRole::Synthesized),
        );
        if let Some(object) = graph.object_mut(sub) {
            for field in &lifted {
                object.remove_property(&field.wire_name);
            }
            object.base = Some(application);
        }
    }
}

fn liftable(graph: &TypeGraph, supertype: TypeRef, subtypes: &[TypeRef]) -> Vec<Lifted> {
    let Some(first) = subtypes.first().and_then(|s| graph.object(*s)) else {
        return Vec::new();
    };
    let declared = graph.object(supertype);
    let mut out = Vec::new();

    'fields: for property in first.properties.iter().filter(|p| !p.extension) {
        let mut args = Vec::with_capacity(subtypes.len());
        for &sub in subtypes {
            let Some(other) = graph.object(sub).and_then(|o| o.property(&property.wire_name)) else {
                continue 'fields;
            };
            if other.required != property.required
                || other.nullable != property.nullable
                || other.constant.is_some()
                || other.extension
            {
                continue 'fields;
            }
            args.push(graph.resolve(other.ty));
        }

        // at least two shapes, judged structurally
        let mut shapes: Vec<TypeRef> = Vec::new();
        for &arg in &args {
            if !shapes.iter().any(|s| structure::equivalent(graph, *s, arg)) {
                shapes.push(arg);
            }
        }
        if shapes.len() < 2 {
            continue;
        }

        if let Some(own) = declared.and_then(|o| o.property(&property.wire_name)) {
            if own.constant.is_some() || !args.iter().all(|a| graph.is_subtype_of(*a, own.ty)) {
                continue;
            }
        }
        out.push(Lifted { wire_name: property.wire_name.clone(), args, template: property.clone() });
    }
    out
}

/// Narrowest object or interface that is an ancestor-or-self of every arg.
fn common_bound(graph: &TypeGraph, args: &[TypeRef]) -> Option<TypeRef> {
    let (first, rest) = args.split_first()?;
    let lineages: Vec<Vec<TypeRef>> = rest.iter().map(|a| graph.ancestors_or_self(*a)).collect();
    graph
        .ancestors_or_self(*first)
        .into_iter()
        .filter(|c| matches!(graph.kind(*c), TypeKind::Object(_) | TypeKind::Interface(_)))
        .find(|c| lineages.iter().all(|l| l.contains(c)))
}

// ————————————————————————————————————————————————————————————————————————————
// WRAPPER CHAINS
// ————————————————————————————————————————————————————————————————————————————

/// Only parameters that exist before spreading starts are spread, each at
/// most once; parameters added here never spread again.
fn spread(graph: &mut TypeGraph) {
    let mut pending: HashSet<(TypeRef, usize)> = graph
        .live()
        .filter_map(|(r, n)| n.kind.as_object().map(|o| (r, o.params.len())))
        .flat_map(|(r, count)| (0..count).map(move |i| (r, i)))
        .collect();
    loop {
        let Some((owner, index, generic, site_args)) = next_spread(graph, &pending) else {
            break;
        };
        pending.remove(&(owner, index));

        let inner: Vec<TypeParameter> = graph.object(generic).map(|o| o.params.clone()).unwrap_or_default();
        let first_new = graph.object(owner).map_or(0, |o| o.params.len());
        let origin = graph.node(owner).origin.clone();

        let mut placeholders = Vec::with_capacity(inner.len());
        for k in 0..inner.len() {
            placeholders.push(graph.add(
                TypeNode::new(TypeKind::Parameter(ParameterRef { owner, index: first_new + k }), origin.clone())
                    .with_role(TypeRole::Synthesized),
            ));
        }
        let bound = graph.add(
            TypeNode::new(TypeKind::Generic(GenericType { of: generic, args: placeholders }), origin.clone())
                .with_role(TypeRole::Synthesized),
        );

        if let Some(object) = graph.object_mut(owner) {
            for param in &inner {
                let mut name = param.name.clone();
                let mut n = 2;
                while object.params.iter().any(|p| p.name == name) {
                    name = format!("{}{n}", param.name);
                    n += 1;
                }
                object.params.push(TypeParameter { name, upper_bound: param.upper_bound });
            }
            object.params[index].upper_bound = Some(bound);
        }
        for (site, extra) in site_args {
            if let TypeKind::Generic(application) = &mut graph.node_mut(site).kind {
                application.args.extend(extra);
            }
        }
        debug!(owner = %graph.describe(owner), through = %graph.describe(generic), "spread parameters through wrapper");
    }
}

type Spread = (TypeRef, usize, TypeRef, Vec<(TypeRef, Vec<TypeRef>)>);

/// First pending parameter bounded by another raw generic declaration whose
/// every use site reaches an application of that declaration.
fn next_spread(graph: &TypeGraph, pending: &HashSet<(TypeRef, usize)>) -> Option<Spread> {
    for (owner, node) in graph.live() {
        let Some(object) = node.kind.as_object() else { continue };
        for (index, param) in object.params.iter().enumerate() {
            if !pending.contains(&(owner, index)) {
                continue;
            }
            let Some(bound) = param.upper_bound else { continue };
            let bound = graph.resolve(bound);
            let raw_generic = bound != owner && graph.object(bound).is_some_and(|o| !o.params.is_empty());
            if !raw_generic {
                continue;
            }
            let sites: Vec<(TypeRef, TypeRef)> = applications_of(graph, owner)
                .into_iter()
                .filter_map(|site| match graph.kind(site) {
                    TypeKind::Generic(g) => g.args.get(index).map(|arg| (site, *arg)),
                    _ => None,
                })
                .collect();
            if sites.is_empty() {
                continue;
            }
            let reached: Option<Vec<(TypeRef, Vec<TypeRef>)>> = sites
                .iter()
                .map(|(site, arg)| reaches(graph, *arg, bound).map(|ys| (*site, ys)))
                .collect();
            if let Some(site_args) = reached {
                return Some((owner, index, bound, site_args));
            }
        }
    }
    None
}

fn applications_of(graph: &TypeGraph, declaration: TypeRef) -> Vec<TypeRef> {
    graph
        .live()
        .filter(|(_, n)| matches!(&n.kind, TypeKind::Generic(g) if graph.resolve(g.of) == declaration))
        .map(|(r, _)| r)
        .collect()
}

/// Arguments of the first application of `generic` found on `arg` or its
/// base chain.
fn reaches(graph: &TypeGraph, arg: TypeRef, generic: TypeRef) -> Option<Vec<TypeRef>> {
    let mut at = graph.resolve(arg);
    for _ in 0..64 {
        if let TypeKind::Generic(g) = graph.kind(at) {
            if graph.resolve(g.of) == generic {
                return Some(g.args.clone());
            }
        }
        let decl = graph.object_decl(at)?;
        at = graph.resolve(graph.object(decl)?.base?);
    }
    None
}

fn check_arity(graph: &TypeGraph) -> Result<(), ModelError> {
    for (r, node) in graph.live() {
        if let TypeKind::Generic(g) = &node.kind {
            let expected = graph.object(g.of).map_or(0, |o| o.params.len());
            if expected != g.args.len() {
                return Err(ModelError::InconsistentGenericArity {
                    location: graph.location(r),
                    generic: graph.describe(g.of),
                    expected,
                    found: g.args.len(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::inheritance::normalize_inheritance;
    use crate::package::resolve_packages;
    use crate::schema::SchemaDocument;
    use serde_json::{json, Value};

    fn generified(schemas: Value) -> TypeGraph {
        let doc: SchemaDocument = serde_json::from_value(json!({ "id": "api.json", "namespace": "m", "schemas": schemas })).unwrap();
        let options = Options::default();
        let mut graph = build(&[doc], &options).unwrap();
        resolve_packages(&mut graph).unwrap();
        normalize_inheritance(&mut graph, &options).unwrap();
        resolve_generics(&mut graph, &options).unwrap();
        graph.validate().unwrap();
        graph
    }

    fn find(graph: &TypeGraph, local: &str) -> TypeRef {
        graph
            .live()
            .find(|(_, n)| n.qualified_name().is_some_and(|q| q.local == local))
            .map(|(r, _)| r)
            .unwrap_or_else(|| panic!("no type {local}"))
    }

    fn with(parent: &str, props: Value, required: &[&str]) -> Value {
        json!({ "allOf": [{ "$ref": parent }, { "type": "object", "properties": props, "required": required }] })
    }

    #[test]
    fn varying_field_becomes_bounded_parameter() {
        let graph = generified(json!({
            "Payload": { "type": "object", "properties": { "kind": { "type": "string" } } },
            "DataA": with("Payload", json!({ "a": { "type": "string" } }), &[]),
            "DataB": with("Payload", json!({ "b": { "type": "string" } }), &[]),
            "Envelope": { "type": "object", "properties": { "id": { "type": "string" } } },
            "A": with("Envelope", json!({ "data": { "$ref": "DataA" } }), &["data"]),
            "B": with("Envelope", json!({ "data": { "$ref": "DataB" } }), &["data"])
        }));
        let envelope = find(&graph, "Envelope");
        let object = graph.object(envelope).unwrap();
        assert_eq!(object.params.len(), 1);
        assert_eq!(object.params[0].name, "T");
        assert_eq!(object.params[0].upper_bound, Some(find(&graph, "Payload")));
        assert!(matches!(graph.kind(object.property("data").unwrap().ty), TypeKind::Parameter(_)));

        let a = graph.object(find(&graph, "A")).unwrap();
        assert!(a.property("data").is_none());
        assert_eq!(graph.describe(a.base.unwrap()), "m.Envelope<m.DataA>");
        assert!(object.property("data").unwrap().required);
    }

    #[test]
    fn unrelated_arguments_are_unbounded_and_names_follow_fields() {
        let graph = generified(json!({
            "Base": { "type": "object" },
            "X": with("Base", json!({ "left": { "type": "string" }, "right": { "type": "integer" } }), &[]),
            "Y": with("Base", json!({ "left": { "type": "boolean" }, "right": { "type": "number" } }), &[])
        }));
        let object = graph.object(find(&graph, "Base")).unwrap();
        let names: Vec<_> = object.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["TLeft", "TRight"]);
        assert!(object.params.iter().all(|p| p.upper_bound.is_none()));
    }

    #[test]
    fn disagreeing_requiredness_is_not_lifted() {
        let graph = generified(json!({
            "Base": { "type": "object" },
            "X": with("Base", json!({ "v": { "type": "string" } }), &["v"]),
            "Y": with("Base", json!({ "v": { "type": "integer" } }), &[])
        }));
        assert!(graph.object(find(&graph, "Base")).unwrap().params.is_empty());
        assert!(graph.object(find(&graph, "X")).unwrap().property("v").is_some());
    }

    #[test]
    fn same_shaped_fields_stay_put() {
        let graph = generified(json!({
            "Base": { "type": "object" },
            "X": with("Base", json!({ "tags": { "type": "array", "items": { "type": "string" } } }), &[]),
            "Y": with("Base", json!({ "tags": { "type": "array", "items": { "type": "string" } } }), &[])
        }));
        assert!(graph.object(find(&graph, "Base")).unwrap().params.is_empty());
    }

    #[test]
    fn parameters_spread_through_wrapper_chains() {
        let graph = generified(json!({
            "Envelope": { "type": "object", "properties": { "id": { "type": "string" } } },
            "Params": { "type": "object" },
            "D1": { "type": "object", "properties": { "one": { "type": "string" } } },
            "D2": { "type": "object", "properties": { "two": { "type": "string" } } },
            "P1": with("Params", json!({ "data": { "$ref": "D1" } }), &[]),
            "P2": with("Params", json!({ "data": { "$ref": "D2" } }), &[]),
            "E1": with("Envelope", json!({ "params": { "$ref": "P1" } }), &[]),
            "E2": with("Envelope", json!({ "params": { "$ref": "P2" } }), &[])
        }));
        let envelope = graph.object(find(&graph, "Envelope")).unwrap();
        let names: Vec<_> = envelope.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["T", "T2"]);
        let bound = envelope.params[0].upper_bound.unwrap();
        assert_eq!(graph.describe(bound), "m.Params<T2>");

        let e1 = graph.object(find(&graph, "E1")).unwrap();
        assert_eq!(graph.describe(e1.base.unwrap()), "m.Envelope<m.P1, m.D1>");
        let e2 = graph.object(find(&graph, "E2")).unwrap();
        assert_eq!(graph.describe(e2.base.unwrap()), "m.Envelope<m.P2, m.D2>");
    }

    #[test]
    fn self_referential_subtypes_terminate() {
        let graph = generified(json!({
            "Node": { "type": "object" },
            "Leaf": with("Node", json!({ "next": { "$ref": "Leaf" }, "leaf": { "type": "string" } }), &[]),
            "Branch": with("Node", json!({ "next": { "$ref": "Branch" }, "branch": { "type": "integer" } }), &[])
        }));
        let node = find(&graph, "Node");
        let object = graph.object(node).unwrap();
        assert_eq!(object.params.len(), 1);
        assert_eq!(object.params[0].upper_bound, Some(node));
        let leaf = graph.object(find(&graph, "Leaf")).unwrap();
        assert_eq!(graph.describe(leaf.base.unwrap()), "m.Node<m.Leaf>");
    }
}
