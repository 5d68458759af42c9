//! Structural identity: two types are "the same" when their shapes match,
//! independent of name, package, docs or declaring document.
//!
//! Comparison is coinductive (a pair already under comparison is assumed
//! equal), so recursive types terminate. Works within one graph or across
//! two, which is what the compression-toggle check needs.

use std::collections::HashSet;

use crate::graph::{PropertyNode, TypeGraph, TypeKind, TypeRef};

pub fn equivalent(graph: &TypeGraph, a: TypeRef, b: TypeRef) -> bool {
    Comparison::new(graph, graph).types(a, b)
}

pub fn equivalent_across(left: &TypeGraph, a: TypeRef, right: &TypeGraph, b: TypeRef) -> bool {
    Comparison::new(left, right).types(a, b)
}

struct Comparison<'g> {
    left: &'g TypeGraph,
    right: &'g TypeGraph,
    same_graph: bool,
    assumed: HashSet<(TypeRef, TypeRef)>,
}

impl<'g> Comparison<'g> {
    fn new(left: &'g TypeGraph, right: &'g TypeGraph) -> Self {
        Self { left, right, same_graph: std::ptr::eq(left, right), assumed: HashSet::new() }
    }

    fn types(&mut self, a: TypeRef, b: TypeRef) -> bool {
        let a = self.left.resolve(a);
        let b = self.right.resolve(b);
        if self.same_graph && a == b {
            return true;
        }
        if !self.assumed.insert((a, b)) {
            return true;
        }
        let (Some(na), Some(nb)) = (self.left.try_node(a), self.right.try_node(b)) else {
            return false;
        };
        match (&na.kind, &nb.kind) {
            (TypeKind::Primitive(x), TypeKind::Primitive(y)) => x == y,
            (TypeKind::Array(x), TypeKind::Array(y)) | (TypeKind::Map(x), TypeKind::Map(y)) => self.types(*x, *y),
            (TypeKind::Object(x), TypeKind::Object(y)) => {
                self.properties(&x.properties, &y.properties)
                    && self.optional(x.base, y.base)
                    && self.lists(&x.parents, &y.parents)
                    && x.params.len() == y.params.len()
                    && x.params.iter().zip(&y.params).all(|(p, q)| self.optional(p.upper_bound, q.upper_bound))
                    && x.interfaces.len() == y.interfaces.len()
                    && x.interfaces.iter().zip(&y.interfaces).all(|(i, j)| self.types(i.interface, j.interface))
            }
            (TypeKind::Interface(x), TypeKind::Interface(y)) => {
                x.methods.len() == y.methods.len()
                    && x.methods.iter().zip(&y.methods).all(|(m, n)| {
                        m.wire_name == n.wire_name && m.nullable == n.nullable && self.types(m.returns, n.returns)
                    })
            }
            (TypeKind::Enum(x), TypeKind::Enum(y)) => {
                let mut xs: Vec<_> = x.cases.iter().map(|c| &c.wire_value).collect();
                let mut ys: Vec<_> = y.cases.iter().map(|c| &c.wire_value).collect();
                xs.sort();
                ys.sort();
                xs == ys && x.unknown == y.unknown
            }
            (TypeKind::Union(x), TypeKind::Union(y)) => {
                x.discriminator == y.discriminator && self.lists(&x.candidates, &y.candidates)
            }
            (TypeKind::Generic(x), TypeKind::Generic(y)) => self.types(x.of, y.of) && self.lists(&x.args, &y.args),
            (TypeKind::Parameter(x), TypeKind::Parameter(y)) => x.index == y.index && self.types(x.owner, y.owner),
            _ => false,
        }
    }

    fn optional(&mut self, a: Option<TypeRef>, b: Option<TypeRef>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.types(a, b),
            _ => false,
        }
    }

    fn lists(&mut self, a: &[TypeRef], b: &[TypeRef]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.types(*x, *y))
    }

    fn properties(&mut self, a: &[PropertyNode], b: &[PropertyNode]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut xs: Vec<&PropertyNode> = a.iter().collect();
        let mut ys: Vec<&PropertyNode> = b.iter().collect();
        xs.sort_by(|p, q| p.wire_name.cmp(&q.wire_name));
        ys.sort_by(|p, q| p.wire_name.cmp(&q.wire_name));
        xs.iter().zip(&ys).all(|(p, q)| {
            p.wire_name == q.wire_name
                && p.required == q.required
                && p.nullable == q.nullable
                && p.constant == q.constant
                && p.default_value == q.default_value
                && p.extension == q.extension
                && self.types(p.ty, q.ty)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ObjectType, Origin, PrimitiveKind, TypeNode};

    fn origin(g: &mut TypeGraph) -> Origin {
        let document = match g.documents().first() {
            Some(d) => d.id,
            None => g.add_document("t.json", "t"),
        };
        Origin { document, pointer: String::new() }
    }

    fn object_with(g: &mut TypeGraph, wire: &str, ty: TypeRef) -> TypeRef {
        let o = origin(g);
        let mut obj = ObjectType::default();
        obj.push_property(PropertyNode {
            name: wire.into(),
            wire_name: wire.into(),
            ty,
            required: true,
            nullable: false,
            default_value: None,
            constant: None,
            docs: vec!["ignored".into()],
            extension: false,
        });
        g.add(TypeNode::new(TypeKind::Object(obj), o))
    }

    #[test]
    fn names_and_docs_do_not_matter() {
        let mut g = TypeGraph::new();
        let o = origin(&mut g);
        let s = g.primitive(PrimitiveKind::String, None, o.clone());
        let i = g.primitive(PrimitiveKind::Integer, None, o);
        let a = object_with(&mut g, "orderid", s);
        let b = object_with(&mut g, "orderid", s);
        let c = object_with(&mut g, "orderid", i);
        assert!(equivalent(&g, a, b));
        assert!(!equivalent(&g, a, c));
    }

    #[test]
    fn self_referential_shapes_terminate() {
        let mut g = TypeGraph::new();
        let o = origin(&mut g);
        let a = g.add(TypeNode::new(TypeKind::Object(ObjectType::default()), o.clone()));
        let b = g.add(TypeNode::new(TypeKind::Object(ObjectType::default()), o.clone()));
        // children: List<Self>, built after both nodes exist
        let list_a = g.add(TypeNode::new(TypeKind::Array(a), o.clone()));
        let list_b = g.add(TypeNode::new(TypeKind::Array(b), o));
        for (node, list) in [(a, list_a), (b, list_b)] {
            let obj = g.object_mut(node).unwrap();
            obj.push_property(PropertyNode {
                name: "children".into(),
                wire_name: "children".into(),
                ty: list,
                required: false,
                nullable: false,
                default_value: None,
                constant: None,
                docs: Vec::new(),
                extension: false,
            });
        }
        assert!(equivalent(&g, a, b));
    }
}
