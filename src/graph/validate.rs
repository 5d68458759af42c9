use std::collections::{HashMap, HashSet};

use super::{Stage, TypeGraph, TypeKind, TypeRef};
use crate::error::ModelError;
use crate::structure;

/// Checks the graph invariants that the current stage promises.
pub(super) fn validate(graph: &TypeGraph) -> Result<(), ModelError> {
    let stage = graph.stage();
    let mut names: HashMap<String, TypeRef> = HashMap::new();

    for (r, node) in graph.live() {
        // 1. no dangling refs, no leftover reservations
        for child in node.kind.children() {
            if !graph.contains(child) {
                return Err(ModelError::DanglingReference { location: graph.location(r), reference: child });
            }
        }
        if matches!(node.kind, TypeKind::Pending) {
            return Err(ModelError::InvariantViolation {
                location: graph.location(r),
                invariant: "complete-build",
                detail: format!("slot {r} was reserved but never built"),
            });
        }

        // 7. the extension bag closes the property list
        if let TypeKind::Object(obj) = &node.kind {
            let last = obj.properties.len().saturating_sub(1);
            if let Some((_, bag)) = obj.properties.iter().enumerate().find(|(i, p)| p.extension && *i != last) {
                return Err(ModelError::InvariantViolation {
                    location: graph.location(r),
                    invariant: "extension-last",
                    detail: format!("`{}` declares `{}` before other properties", graph.describe(r), bag.wire_name),
                });
            }
        }

        match &node.kind {
            // 2. single inheritance
            TypeKind::Object(obj) if stage >= Stage::Normalized && !obj.parents.is_empty() => {
                return Err(ModelError::InvariantViolation {
                    location: graph.location(r),
                    invariant: "single-inheritance",
                    detail: format!("`{}` still lists {} raw parents", graph.describe(r), obj.parents.len()),
                });
            }
            // 4. enum wire values
            TypeKind::Enum(e) => {
                let mut seen = HashSet::new();
                for case in &e.cases {
                    if !seen.insert(&case.wire_value) {
                        return Err(ModelError::shape(
                            graph.location(r),
                            format!("enum `{}` repeats value {}", graph.describe(r), case.wire_value),
                        ));
                    }
                }
            }
            // 5. union candidates
            TypeKind::Union(u) if stage >= Stage::Synthesized => {
                for (i, a) in u.candidates.iter().enumerate() {
                    for b in &u.candidates[i + 1..] {
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
            }
            // 6. generic arity
            TypeKind::Generic(g) => {
                let expected = graph.object(g.of).map(|o| o.params.len());
                match expected {
                    Some(expected) if expected == g.args.len() => {}
                    Some(expected) => {
                        return Err(ModelError::InconsistentGenericArity {
                            location: graph.location(r),
                            generic: graph.describe(g.of),
                            expected,
                            found: g.args.len(),
                        });
                    }
                    None => {
                        return Err(ModelError::InvariantViolation {
                            location: graph.location(r),
                            invariant: "generic-target",
                            detail: format!("application of non-object `{}`", graph.describe(g.of)),
                        });
                    }
                }
            }
            TypeKind::Parameter(p) => {
                let declared = graph.object(p.owner).map(|o| o.params.len()).unwrap_or(0);
                if p.index >= declared {
                    return Err(ModelError::InconsistentGenericArity {
                        location: graph.location(r),
                        generic: graph.describe(p.owner),
                        expected: declared,
                        found: p.index + 1,
                    });
                }
            }
            _ => {}
        }

        // 3. unique qualified names
        if stage >= Stage::Packaged && node.kind.is_declared() {
            let Some(q) = node.qualified_name() else {
                return Err(ModelError::InvariantViolation {
                    location: graph.location(r),
                    invariant: "named-declarations",
                    detail: format!("{} {r} has no qualified name", node.kind.label()),
                });
            };
            if let Some(other) = names.insert(q.to_string(), r) {
                return Err(ModelError::UnresolvableNameCollision {
                    location: graph.location(r),
                    name: q.to_string(),
                    other: graph.location(other),
                });
            }
        }
    }
    Ok(())
}
