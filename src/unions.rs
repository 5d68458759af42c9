//! Union/Enum Synthesizer.
//!
//! Unions get an opaque raw slot plus one lazily-coerced accessor per
//! candidate, optionally tagged by a discriminator. Enums get unique case
//! names and deduplicated wire values.
use std::collections::HashSet;

use tracing::debug;

use crate::config::Options;
use crate::error::ModelError;
use crate::graph::{EnumType, Literal, Stage, TypeGraph, TypeKind, TypeRef, UnionAccessor, UnionType};
use crate::naming::{accessor, pascal_case};
use crate::structure;

pub fn synthesize(graph: &mut TypeGraph, options: &Options) -> Result<(), ModelError> {
    for r in graph.live_refs() {
        match graph.kind(r).clone() {
            TypeKind::Union(union) => {
                let union = wrap_union(graph, r, union, options)?;
                graph.node_mut(r).kind = TypeKind::Union(union);
            }
            TypeKind::Enum(e) => {
                graph.node_mut(r).kind = TypeKind::Enum(finish_enum(e));
            }
            _ => {}
        }
    }
    graph.advance(Stage::Synthesized);
    Ok(())
}

fn wrap_union(graph: &mut TypeGraph, r: TypeRef, mut union: UnionType, options: &Options) -> Result<UnionType, ModelError> {
    // 1) identity dedup, then structural distinctness
    let mut candidates: Vec<TypeRef> = Vec::new();
    for c in union.candidates.iter().map(|c| graph.resolve(*c)) {
        if !candidates.contains(&c) {
            candidates.push(c);
        }
    }
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            if structure::equivalent(graph, *a, *b) {
                return Err(ModelError::IllegalUnionCandidateOverlap {
                    location: graph.location(r),
                    union: graph.describe(r),
                    first: graph.describe(*a),
                    second: graph.describe(*b),
                });
            }
        }
    }

    // 2) discriminator: declared, else detected from distinct constants
    let explicit = union.discriminator.clone();
    let discriminator = explicit.clone().or_else(|| detect_discriminator(graph, &candidates));
    let tags: Vec<Option<Literal>> = candidates
        .iter()
        .map(|c| {
            let wire = discriminator.as_deref()?;
            let constant = graph.all_properties(*c).into_iter().find(|p| p.wire_name == wire).and_then(|p| p.constant);
            match (constant, &explicit) {
                (Some(constant), _) => Some(constant),
                (None, Some(_)) => Some(Literal::String(shape_name(graph, *c))),
                (None, None) => None,
            }
        })
        .collect();

    // 3) accessors + raw slot
    let mut taken = HashSet::new();
    let mut accessors = Vec::with_capacity(candidates.len());
    for (candidate, tag) in candidates.iter().zip(tags) {
        let base = accessor(&options.naming.accessor_prefix, &shape_name(graph, *candidate));
        let mut name = base.clone();
        let mut n = 2;
        while !taken.insert(name.clone()) {
            name = format!("{base}{n}");
            n += 1;
        }
        accessors.push(UnionAccessor { name, candidate: *candidate, tag });
    }
    let raw = graph.opaque(graph.node(r).origin.clone());

    debug!(union = %graph.describe(r), candidates = candidates.len(), discriminator = ?discriminator, "wrapped union");
    union.candidates = candidates;
    union.accessors = accessors;
    union.raw = Some(raw);
    union.discriminator = discriminator;
    Ok(union)
}

/// A wire name on which every candidate carries a distinct constant.
fn detect_discriminator(graph: &TypeGraph, candidates: &[TypeRef]) -> Option<String> {
    if candidates.len() < 2 {
        return None;
    }
    let properties: Vec<_> = candidates.iter().map(|c| graph.all_properties(*c)).collect();
    properties[0].iter().filter(|p| p.constant.is_some()).map(|p| p.wire_name.clone()).find(|wire| {
        let mut seen = HashSet::new();
        properties.iter().all(|props| {
            props
                .iter()
                .find(|p| &p.wire_name == wire)
                .and_then(|p| p.constant.clone())
                .is_some_and(|c| seen.insert(c))
        })
    })
}

/// Identifier-friendly name of a candidate, for accessors and implicit tags.
pub(crate) fn shape_name(graph: &TypeGraph, r: TypeRef) -> String {
    let node = graph.node(r);
    if node.kind.is_declared() {
        if let Some(name) = &node.name {
            return name.local();
        }
    }
    match &node.kind {
        TypeKind::Primitive(p) => pascal_case(p.format.as_deref().unwrap_or(p.kind.as_str())),
        TypeKind::Array(item) => format!("{}List", shape_name(graph, *item)),
        TypeKind::Map(value) => format!("{}Map", shape_name(graph, *value)),
        TypeKind::Generic(g) => shape_name(graph, g.of),
        TypeKind::Parameter(_) => pascal_case(&graph.describe(r)),
        other => pascal_case(other.label()),
    }
}

/// First occurrence of a wire value wins; clashing case names get `_2`, `_3`…
fn finish_enum(mut e: EnumType) -> EnumType {
    let mut remap = Vec::with_capacity(e.cases.len());
    let mut cases = Vec::with_capacity(e.cases.len());
    for case in e.cases.drain(..) {
        match cases.iter().position(|c: &crate::graph::EnumCase| c.wire_value == case.wire_value) {
            Some(at) => remap.push(at),
            None => {
                remap.push(cases.len());
                cases.push(case);
            }
        }
    }
    let mut taken = HashSet::new();
    for case in &mut cases {
        let base = case.name.clone();
        let mut n = 2;
        while !taken.insert(case.name.clone()) {
            case.name = format!("{base}_{n}");
            n += 1;
        }
    }
    for variant in &mut e.variants {
        let mut members: Vec<usize> = Vec::with_capacity(variant.cases.len());
        for old in &variant.cases {
            let at = remap.get(*old).copied().unwrap_or(*old);
            if !members.contains(&at) {
                members.push(at);
            }
        }
        variant.cases = members;
    }
    e.cases = cases;
    e
}
