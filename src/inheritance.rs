//! Inheritance Normalizer: raw multi-parent declarations become one base plus
//! ordered contract interfaces.
//!
//! The first surviving parent is the base. Every other parent P contributes
//! an interface `I<P>` with accessor signatures for what P's chain adds over
//! the base chain; those properties are copied onto the child so the object
//! still carries every field it declared through P.
//!
//! Objects that each carry an additional-properties bag additionally share one
//! contract for it once there are enough of them.
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::builder::parents_first;
use crate::config::Options;
use crate::error::ModelError;
use crate::graph::{
    ImplementedInterface, InterfaceType, MethodSignature, NameHint, PropertyNode, Stage, TypeGraph, TypeKind, TypeNode,
    TypeRef, TypeRole,
};
use crate::naming::{accessor, pascal_case};
use crate::package::claim;
use crate::structure;

pub fn normalize_inheritance(graph: &mut TypeGraph, options: &Options) -> Result<(), ModelError> {
    let objects: Vec<TypeRef> = graph.live().filter(|(_, n)| n.kind.as_object().is_some()).map(|(r, _)| r).collect();
    let order = parents_first(graph, &objects)?;
    let mut interfaces: HashMap<(TypeRef, Vec<String>), TypeRef> = HashMap::new();

    for child in order {
        let declared = graph.object(child).map(|o| o.parents.clone()).unwrap_or_default();
        if declared.is_empty() {
            continue;
        }
        let parents = drop_superfluous(graph, &declared);
        let base = parents[0];

        let mut base_wires: HashSet<String> = graph.all_properties(base).into_iter().map(|p| p.wire_name).collect();
        let own_wires: HashSet<String> =
            graph.object(child).map(|o| o.properties.iter().map(|p| p.wire_name.clone()).collect()).unwrap_or_default();
        let mut copied: Vec<PropertyNode> = Vec::new();
        let mut implemented: Vec<ImplementedInterface> = Vec::new();

        for &parent in &parents[1..] {
            let declared_at = declared.iter().position(|p| graph.resolve(*p) == parent).unwrap_or(0);
            let missing: Vec<PropertyNode> =
                graph.all_properties(parent).into_iter().filter(|p| !base_wires.contains(&p.wire_name)).collect();
            let signature: Vec<String> = missing.iter().map(|p| p.wire_name.clone()).collect();

            let interface = match interfaces.get(&(parent, signature.clone())) {
                Some(existing) => *existing,
                None => {
                    let created = synthesize_interface(graph, child, parent, &missing, options)?;
                    interfaces.insert((parent, signature), created);
                    created
                }
            };

            // the contract, then whatever the parent already promised
            let mut contracts = vec![interface];
            if let Some(object) = graph.object(parent) {
                contracts.extend(object.interfaces.iter().map(|i| i.interface));
            }
            for contract in contracts {
                let contract = graph.resolve(contract);
                let inherited = graph.ancestors_or_self(base).contains(&contract);
                if !inherited && !implemented.iter().any(|i| i.interface == contract) {
                    implemented.push(ImplementedInterface { interface: contract, declared_at });
                }
            }

            for property in missing {
                base_wires.insert(property.wire_name.clone());
                if !own_wires.contains(&property.wire_name) {
                    copied.push(property);
                }
            }
        }

        let Some(object) = graph.object_mut(child) else { continue };
        object.parents.clear();
        object.base = Some(base);
        object.interfaces.extend(implemented);
        if !copied.is_empty() {
            let own = std::mem::take(&mut object.properties);
            for property in copied.into_iter().chain(own) {
                object.push_property(property);
            }
        }
        debug!(child = %graph.describe(child), base = %graph.describe(base), "normalized inheritance");
    }

    shared_extension_interface(graph, options)?;
    graph.advance(Stage::Normalized);
    Ok(())
}

/// Parents that are already reachable through another declared parent.
fn drop_superfluous(graph: &TypeGraph, declared: &[TypeRef]) -> Vec<TypeRef> {
    let resolved: Vec<TypeRef> = declared.iter().map(|p| graph.resolve(*p)).collect();
    let mut out: Vec<TypeRef> = Vec::new();
    for (i, &p) in resolved.iter().enumerate() {
        if out.contains(&p) {
            continue;
        }
        let covered = resolved.iter().enumerate().any(|(j, &q)| j != i && q != p && lineage(graph, q).contains(&p));
        if !covered {
            out.push(p);
        }
    }
    // a diamond where every parent covers the other cannot happen after the
    // cycle check; keep the first declared one regardless
    if out.is_empty() {
        out.push(resolved[0]);
    }
    out
}

/// Everything `r` inherits from: its base chain plus the objects its
/// interfaces were derived from, transitively.
fn lineage(graph: &TypeGraph, r: TypeRef) -> Vec<TypeRef> {
    let mut out = Vec::new();
    let mut stack = vec![r];
    while let Some(at) = stack.pop() {
        for ancestor in graph.ancestors_or_self(at).into_iter().skip(1) {
            let next = match graph.kind(ancestor) {
                TypeKind::Interface(i) => match i.source {
                    Some(source) => graph.resolve(source),
                    None => continue,
                },
                _ => ancestor,
            };
            if next != r && !out.contains(&next) {
                out.push(next);
                stack.push(next);
            }
        }
    }
    out
}

/// Interface for `parent` as seen from `child`. The name is `I<Parent>`; a
/// second projection of the same parent is qualified by the child's name.
fn synthesize_interface(
    graph: &mut TypeGraph,
    child: TypeRef,
    parent: TypeRef,
    missing: &[PropertyNode],
    options: &Options,
) -> Result<TypeRef, ModelError> {
    let naming = &options.naming;
    let methods = missing
        .iter()
        .map(|p| MethodSignature {
            name: accessor(&naming.accessor_prefix, &p.name),
            wire_name: p.wire_name.clone(),
            returns: p.ty,
            nullable: p.nullable || !p.required,
        })
        .collect();
    let parent_node = graph.node(parent);
    let (local, package) = match parent_node.qualified_name() {
        Some(q) => (q.local.clone(), q.package.clone()),
        None => (parent_node.name.as_ref().map(|n| n.local()).unwrap_or_default(), String::new()),
    };
    let origin = parent_node.origin.clone();
    let mut segments: Vec<String> = graph.node(child).qualified_name().map(|q| q.local.clone()).into_iter().collect();
    segments.push(format!("{}{local}", naming.interface_prefix));
    let node = TypeNode::new(TypeKind::Interface(InterfaceType { methods, source: Some(parent) }), origin)
        .named(NameHint::inferred(segments, 1))
        .with_role(TypeRole::Synthesized);
    let interface = graph.add(node);
    let name = claim(graph, interface, &package)?;

    if let Some(object) = graph.object_mut(parent) {
        if !object.implements(interface) {
            let declared_at = object.interfaces.len();
            object.interfaces.push(ImplementedInterface { interface, declared_at });
        }
    }
    debug!(interface = %name, methods = missing.len(), "synthesized contract interface");
    Ok(interface)
}

/// One `I<ExtensionProperty>` contract implemented by every object that
/// declares its own bag. Bags of differing value types share
/// `Map<string, any>`; subtypes of a carrier inherit the contract.
fn shared_extension_interface(graph: &mut TypeGraph, options: &Options) -> Result<(), ModelError> {
    let threshold = options.additional_properties_interface_after;
    let bags: Vec<(TypeRef, TypeRef)> =
        graph.live().filter_map(|(r, n)| n.kind.as_object()?.extension().map(|p| (r, p.ty))).collect();
    let carriers: Vec<(TypeRef, TypeRef)> = bags
        .iter()
        .copied()
        .filter(|(r, _)| !graph.base_chain(*r).iter().any(|a| bags.iter().any(|(b, _)| b == a)))
        .collect();
    if threshold == 0 || carriers.len() < threshold {
        return Ok(());
    }

    let (first, first_bag) = carriers[0];
    let origin = graph.node(first).origin.clone();
    let returns = if carriers.iter().all(|(_, bag)| structure::equivalent(graph, first_bag, *bag)) {
        first_bag
    } else {
        let any = graph.opaque(origin.clone());
        graph.add(TypeNode::new(TypeKind::Map(any), origin.clone()))
    };

    let naming = &options.naming;
    let method = MethodSignature {
        name: accessor(&naming.accessor_prefix, &naming.extension_property),
        wire_name: naming.extension_property.clone(),
        returns,
        nullable: false,
    };
    let (package, mut segments) = match graph.node(first).qualified_name() {
        Some(q) => (q.package.clone(), vec![q.local.clone()]),
        None => (String::new(), Vec::new()),
    };
    segments.push(format!("{}{}", naming.interface_prefix, pascal_case(&naming.extension_property)));
    let node = TypeNode::new(TypeKind::Interface(InterfaceType { methods: vec![method], source: None }), origin)
        .named(NameHint::inferred(segments, 1))
        .with_role(TypeRole::Synthesized);
    let interface = graph.add(node);
    let name = claim(graph, interface, &package)?;

    for &(carrier, _) in &carriers {
        if let Some(object) = graph.object_mut(carrier) {
            let declared_at = object.interfaces.iter().map(|i| i.declared_at + 1).max().unwrap_or(1);
            object.interfaces.push(ImplementedInterface { interface, declared_at });
        }
    }
    debug!(interface = %name, carriers = carriers.len(), "shared additional-properties contract");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::package::resolve_packages;
    use crate::schema::SchemaDocument;
    use serde_json::{json, Value};

    fn normalized(schemas: Value) -> TypeGraph {
        let doc: SchemaDocument = serde_json::from_value(json!({ "id": "api.json", "namespace": "m", "schemas": schemas })).unwrap();
        let options = Options::default();
        let mut graph = build(&[doc], &options).unwrap();
        resolve_packages(&mut graph).unwrap();
        normalize_inheritance(&mut graph, &options).unwrap();
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

    fn object(props: &[&str]) -> Value {
        let properties: serde_json::Map<String, Value> =
            props.iter().map(|p| (p.to_string(), json!({ "type": "string" }))).collect();
        json!({ "type": "object", "properties": properties })
    }

    #[test]
    fn extra_parents_become_ordered_interfaces() {
        let graph = normalized(json!({
            "A": object(&["a"]),
            "B": object(&["b"]),
            "C": object(&["c"]),
            "Out": { "allOf": [{ "$ref": "A" }, { "$ref": "C" }, { "$ref": "B" }, object(&["own"])] }
        }));
        let out = graph.object(find(&graph, "Out")).unwrap();
        assert_eq!(out.base, Some(find(&graph, "A")));
        let order: Vec<(String, usize)> =
            out.interfaces.iter().map(|i| (graph.describe(i.interface), i.declared_at)).collect();
        assert_eq!(order, [("m.IC".to_string(), 1), ("m.IB".to_string(), 2)]);
        let wires: Vec<_> = graph.all_properties(find(&graph, "Out")).into_iter().map(|p| p.wire_name).collect();
        assert_eq!(wires, ["a", "c", "b", "own"]);

        // the non-chosen parent implements its own contract
        let b = graph.object(find(&graph, "B")).unwrap();
        assert!(b.implements(find(&graph, "IB")));
        let TypeKind::Interface(ib) = graph.kind(find(&graph, "IB")) else { panic!() };
        assert_eq!(ib.methods[0].name, "getB");
        assert!(ib.methods[0].nullable);
    }

    #[test]
    fn superfluous_parent_is_dropped() {
        let graph = normalized(json!({
            "Abs": object(&["x"]),
            "B": { "allOf": [{ "$ref": "Abs" }, object(&["b"])] },
            "Child": { "allOf": [{ "$ref": "Abs" }, { "$ref": "B" }] }
        }));
        let child = graph.object(find(&graph, "Child")).unwrap();
        assert_eq!(child.base, Some(find(&graph, "B")));
        assert!(child.interfaces.is_empty());
    }

    #[test]
    fn interfaces_are_reused_per_parent_and_signature() {
        let graph = normalized(json!({
            "A": object(&["a"]),
            "B": object(&["b"]),
            "Out1": { "allOf": [{ "$ref": "A" }, { "$ref": "B" }] },
            "Out2": { "allOf": [{ "$ref": "A" }, { "$ref": "B" }] }
        }));
        let count = graph.live().filter(|(_, n)| matches!(n.kind, TypeKind::Interface(_))).count();
        assert_eq!(count, 1);
        let ib = find(&graph, "IB");
        assert!(graph.is_subtype_of(find(&graph, "Out1"), ib));
        assert!(graph.is_subtype_of(find(&graph, "Out2"), ib));
    }

    #[test]
    fn same_parent_with_another_signature_gets_a_qualified_interface() {
        let graph = normalized(json!({
            "A": object(&["a"]),
            "B": object(&["b"]),
            "C": object(&["b", "c"]),
            "Out1": { "allOf": [{ "$ref": "A" }, { "$ref": "B" }, { "$ref": "C" }] },
            "Out2": { "allOf": [{ "$ref": "A" }, { "$ref": "C" }] }
        }));
        let methods = |local: &str| -> Vec<String> {
            let TypeKind::Interface(i) = graph.kind(find(&graph, local)) else { panic!("{local} is no interface") };
            i.methods.iter().map(|m| m.wire_name.clone()).collect()
        };
        assert_eq!(methods("IC"), ["c"]);
        assert_eq!(methods("Out2IC"), ["b", "c"]);

        let out2 = graph.object(find(&graph, "Out2")).unwrap();
        let names: Vec<String> = out2.interfaces.iter().map(|i| graph.describe(i.interface)).collect();
        assert_eq!(names, ["m.Out2IC", "m.IC"]);
        let c = graph.object(find(&graph, "C")).unwrap();
        assert!(c.implements(find(&graph, "IC")) && c.implements(find(&graph, "Out2IC")));
    }

    #[test]
    fn covered_properties_make_a_marker_interface() {
        let graph = normalized(json!({
            "A": object(&["x", "y"]),
            "B": object(&["x"]),
            "Out": { "allOf": [{ "$ref": "A" }, { "$ref": "B" }] }
        }));
        let TypeKind::Interface(ib) = graph.kind(find(&graph, "IB")) else { panic!() };
        assert!(ib.methods.is_empty());
    }

    fn with_bag(mut schema: Value, value: Value) -> Value {
        schema["additionalProperties"] = value;
        schema
    }

    #[test]
    fn extension_bags_share_one_contract() {
        let graph = normalized(json!({
            "A": with_bag(object(&["a"]), json!({ "type": "integer" })),
            "B": with_bag(object(&["b"]), json!({ "type": "integer" })),
            "C": { "allOf": [{ "$ref": "A" }, object(&["c"])] },
            "Plain": object(&["p"])
        }));
        let shared = find(&graph, "IAdditionalProperties");
        let TypeKind::Interface(contract) = graph.kind(shared) else { panic!("not an interface") };
        assert!(contract.source.is_none());
        assert_eq!(contract.methods[0].name, "getAdditionalProperties");
        let TypeKind::Map(value) = graph.kind(contract.methods[0].returns) else { panic!("not a map") };
        assert_eq!(graph.describe(*value), "integer");

        assert!(graph.object(find(&graph, "A")).unwrap().implements(shared));
        assert!(graph.object(find(&graph, "B")).unwrap().implements(shared));
        assert!(!graph.object(find(&graph, "C")).unwrap().implements(shared));
        assert!(graph.is_subtype_of(find(&graph, "C"), shared));
        assert!(!graph.is_subtype_of(find(&graph, "Plain"), shared));
    }

    #[test]
    fn differing_bags_fall_back_to_any_values() {
        let graph = normalized(json!({
            "A": with_bag(object(&["a"]), json!(true)),
            "B": with_bag(object(&["b"]), json!({ "type": "integer" }))
        }));
        let TypeKind::Interface(contract) = graph.kind(find(&graph, "IAdditionalProperties")) else { panic!() };
        assert_eq!(graph.describe(contract.methods[0].returns), "Map<string, any>");
    }

    #[test]
    fn a_single_bag_gets_no_contract() {
        let graph = normalized(json!({ "A": with_bag(object(&["a"]), json!(true)), "Plain": object(&["p"]) }));
        assert!(graph.live().all(|(_, n)| !matches!(n.kind, TypeKind::Interface(_))));
    }
}
