//! Package Resolver: canonical package and globally unique qualified name for
//! every declared type.
//!
//! Assignment depends only on document identity, namespace and discovery
//! order, so re-running over the same input reproduces every name.
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::error::{ModelError, SchemaLocation};
use crate::graph::{DocumentId, QualifiedName, Stage, TypeGraph, TypeRef};

pub fn resolve_packages(graph: &mut TypeGraph) -> Result<(), ModelError> {
    check_document_ids(graph)?;

    let declared: Vec<TypeRef> = graph
        .live()
        .filter(|(_, n)| n.kind.is_declared() && n.name.is_some())
        .map(|(r, _)| r)
        .collect();
    // documents pulled apart by a cross-document collision: node → suffix depth
    let mut depth: HashMap<TypeRef, usize> = HashMap::new();

    loop {
        let groups = collisions(graph, &declared, &depth);
        if groups.is_empty() {
            break;
        }
        for members in groups {
            let documents: Vec<DocumentId> = distinct(members.iter().map(|r| graph.node(*r).origin.document));
            if documents.len() > 1 {
                split_documents(graph, &members, &documents, &mut depth)?;
            } else {
                extend_names(graph, &members)?;
            }
        }
    }

    for r in declared {
        let package = package_of(graph, r, &depth);
        let node = graph.node_mut(r);
        if let Some(name) = &mut node.name {
            name.qualified = Some(QualifiedName { package, local: name.hint.render() });
        }
    }
    graph.advance(Stage::Packaged);
    Ok(())
}

/// Gives a node appended by a later pass its qualified name in `package`,
/// extending its hint past names that are already taken.
pub(crate) fn claim(graph: &mut TypeGraph, r: TypeRef, package: &str) -> Result<QualifiedName, ModelError> {
    let taken: HashMap<String, TypeRef> = graph
        .live()
        .filter(|(other, _)| *other != r)
        .filter_map(|(other, n)| n.qualified_name().map(|q| (q.to_string(), other)))
        .collect();
    let location = graph.location(r);
    let Some(mut hint) = graph.node(r).name.as_ref().map(|n| n.hint.clone()) else {
        return Err(ModelError::InvariantViolation {
            location,
            invariant: "named-declarations",
            detail: format!("synthesized node {r} has no name hint"),
        });
    };
    let qualified = loop {
        let candidate = QualifiedName { package: package.to_string(), local: hint.render() };
        match taken.get(&candidate.to_string()) {
            None => break candidate,
            Some(other) if !hint.extend() => {
                return Err(ModelError::UnresolvableNameCollision {
                    location,
                    name: candidate.to_string(),
                    other: graph.location(*other),
                });
            }
            Some(_) => {}
        }
    };
    if let Some(name) = graph.node_mut(r).name.as_mut() {
        name.hint = hint;
        name.qualified = Some(qualified.clone());
    }
    Ok(qualified)
}

fn check_document_ids(graph: &TypeGraph) -> Result<(), ModelError> {
    let mut seen = HashSet::new();
    for doc in graph.documents() {
        if !seen.insert(doc.uri.as_str()) {
            return Err(ModelError::UnresolvableNameCollision {
                location: SchemaLocation::new(doc.uri.clone(), ""),
                name: doc.uri.clone(),
                other: SchemaLocation::new(doc.uri.clone(), ""),
            });
        }
    }
    Ok(())
}

fn package_of(graph: &TypeGraph, r: TypeRef, depth: &HashMap<TypeRef, usize>) -> String {
    let doc = graph.document(graph.node(r).origin.document);
    match depth.get(&r) {
        Some(&k) if k > 0 => {
            let start = doc.segments.len().saturating_sub(k);
            let suffix = doc.segments[start..].join(".");
            if doc.namespace.is_empty() { suffix } else { format!("{}.{suffix}", doc.namespace) }
        }
        _ => doc.namespace.clone(),
    }
}

/// Colliding groups, ordered by their first-discovered member.
fn collisions(graph: &TypeGraph, declared: &[TypeRef], depth: &HashMap<TypeRef, usize>) -> Vec<Vec<TypeRef>> {
    let mut by_name: BTreeMap<(String, String), Vec<TypeRef>> = BTreeMap::new();
    for &r in declared {
        let Some(name) = &graph.node(r).name else { continue };
        by_name.entry((package_of(graph, r, depth), name.hint.render())).or_default().push(r);
    }
    let mut groups: Vec<Vec<TypeRef>> = by_name.into_values().filter(|g| g.len() > 1).collect();
    groups.sort_by_key(|g| g[0]);
    groups
}

fn distinct<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Members from different documents all move below their namespace, using
/// the shortest trailing path slice that tells the documents apart.
fn split_documents(
    graph: &TypeGraph,
    members: &[TypeRef],
    documents: &[DocumentId],
    depth: &mut HashMap<TypeRef, usize>,
) -> Result<(), ModelError> {
    let floor = members.iter().filter_map(|r| depth.get(r)).max().map_or(1, |d| d + 1);
    let longest = documents.iter().map(|d| graph.document(*d).segments.len()).max().unwrap_or(0);
    let tail = |doc: DocumentId, k: usize| {
        let segments = &graph.document(doc).segments;
        segments[segments.len().saturating_sub(k)..].join(".")
    };
    let found = (floor..=longest).find(|&k| {
        let tails: Vec<String> = documents.iter().map(|d| tail(*d, k)).collect();
        distinct(tails.iter()).len() == tails.len()
    });
    let Some(k) = found else {
        let (first, second) = (members[0], members[1]);
        return Err(ModelError::UnresolvableNameCollision {
            location: graph.location(second),
            name: graph.node(second).name.as_ref().map(|n| n.hint.render()).unwrap_or_default(),
            other: graph.location(first),
        });
    };
    for &r in members {
        depth.insert(r, k);
    }
    debug!(
        name = %graph.node(members[0]).name.as_ref().map(|n| n.hint.render()).unwrap_or_default(),
        depth = k,
        "split cross-document collision into per-document packages"
    );
    Ok(())
}

/// Same document: the explicit member (else the first discovered) keeps the
/// name, the others pull in their next naming qualifier.
fn extend_names(graph: &mut TypeGraph, members: &[TypeRef]) -> Result<(), ModelError> {
    let keeper = members
        .iter()
        .copied()
        .find(|r| graph.node(*r).name.as_ref().is_some_and(|n| n.hint.explicit))
        .unwrap_or(members[0]);
    let kept_at = graph.location(keeper);
    for &r in members.iter().filter(|r| **r != keeper) {
        let location = graph.location(r);
        let Some(name) = graph.node_mut(r).name.as_mut() else { continue };
        let before = name.hint.render();
        if !name.hint.extend() {
            return Err(ModelError::UnresolvableNameCollision { location, name: before, other: kept_at });
        }
        debug!(from = %before, to = %name.hint.render(), "extended colliding name");
    }
    Ok(())
}
