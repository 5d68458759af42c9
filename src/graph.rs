//! Type Graph: the arena that exclusively owns every [`TypeNode`].
//!
//! Everything else holds [`TypeRef`]s. A slot is either live or a redirect to
//! another slot; resolving follows redirects, so a merge never invalidates a
//! reference that was handed out earlier. Slot order is discovery order.
pub mod literal;
pub mod node;
mod validate;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

pub use literal::Literal;
pub use node::*;

use crate::error::{ModelError, SchemaLocation};

// ————————————————————————————————————————————————————————————————————————————
// HANDLES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeRef(u32);

impl TypeRef {
    pub fn from_index(index: usize) -> Self {
        TypeRef(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentId(u32);

impl DocumentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub uri: String,
    pub namespace: String,
    /// Directory segments plus file stem of `uri`, used to disambiguate
    /// packages across documents.
    pub segments: Vec<String>,
}

/// Last pass whose rewrites are committed; decides which invariants
/// `validate` enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    #[default]
    Built,
    Packaged,
    Normalized,
    Generified,
    Synthesized,
    Compressed,
}

#[derive(Debug, Clone)]
enum Slot {
    Live(TypeNode),
    Redirect(TypeRef),
}

// ————————————————————————————————————————————————————————————————————————————
// ARENA
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default)]
pub struct TypeGraph {
    slots: Vec<Slot>,
    documents: Vec<DocumentInfo>,
    primitives: HashMap<PrimitiveType, TypeRef>,
    stage: Stage,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, stage: Stage) {
        self.stage = stage;
    }

    // -------------------------------- documents -------------------------------- //

    pub(crate) fn add_document(&mut self, uri: &str, namespace: &str) -> DocumentId {
        let id = DocumentId(self.documents.len() as u32);
        self.documents.push(DocumentInfo {
            id,
            uri: uri.to_string(),
            namespace: namespace.to_string(),
            segments: path_segments(uri),
        });
        id
    }

    pub fn document(&self, id: DocumentId) -> &DocumentInfo {
        &self.documents[id.index()]
    }

    pub fn documents(&self) -> &[DocumentInfo] {
        &self.documents
    }

    // -------------------------------- nodes -------------------------------- //

    pub(crate) fn add(&mut self, node: TypeNode) -> TypeRef {
        let r = TypeRef(self.slots.len() as u32);
        self.slots.push(Slot::Live(node));
        r
    }

    /// Shared primitive node for `(kind, format)`.
    pub(crate) fn primitive(&mut self, kind: PrimitiveKind, format: Option<String>, origin: Origin) -> TypeRef {
        let key = PrimitiveType { kind, format };
        if let Some(r) = self.primitives.get(&key) {
            return *r;
        }
        let r = self.add(TypeNode::new(TypeKind::Primitive(key.clone()), origin));
        self.primitives.insert(key, r);
        r
    }

    pub(crate) fn opaque(&mut self, origin: Origin) -> TypeRef {
        self.primitive(PrimitiveKind::Any, None, origin)
    }

    /// Follows redirects to the live slot.
    pub fn resolve(&self, r: TypeRef) -> TypeRef {
        let mut at = r;
        // Redirect chains are acyclic: `redirect` only ever points at a live slot.
        while let Some(Slot::Redirect(next)) = self.slots.get(at.index()) {
            at = *next;
        }
        at
    }

    pub fn contains(&self, r: TypeRef) -> bool {
        matches!(self.slots.get(self.resolve(r).index()), Some(Slot::Live(_)))
    }

    pub fn try_node(&self, r: TypeRef) -> Option<&TypeNode> {
        match self.slots.get(self.resolve(r).index()) {
            Some(Slot::Live(node)) => Some(node),
            _ => None,
        }
    }

    /// Panics only on a dangling ref, which `validate` rules out after every pass.
    pub fn node(&self, r: TypeRef) -> &TypeNode {
        match self.try_node(r) {
            Some(node) => node,
            None => panic!("dangling type reference {r}"),
        }
    }

    pub(crate) fn node_mut(&mut self, r: TypeRef) -> &mut TypeNode {
        let at = self.resolve(r);
        match self.slots.get_mut(at.index()) {
            Some(Slot::Live(node)) => node,
            _ => panic!("dangling type reference {r}"),
        }
    }

    pub fn kind(&self, r: TypeRef) -> &TypeKind {
        &self.node(r).kind
    }

    pub fn object(&self, r: TypeRef) -> Option<&ObjectType> {
        self.kind(r).as_object()
    }

    pub(crate) fn object_mut(&mut self, r: TypeRef) -> Option<&mut ObjectType> {
        self.node_mut(r).kind.as_object_mut()
    }

    /// Makes `from` resolve to `to`. Reserved for the type compressor.
    pub(crate) fn redirect(&mut self, from: TypeRef, to: TypeRef) {
        let from = self.resolve(from);
        let to = self.resolve(to);
        if from != to {
            self.slots[from.index()] = Slot::Redirect(to);
        }
    }

    /// Live slots in discovery order.
    pub fn live(&self) -> impl Iterator<Item = (TypeRef, &TypeNode)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(node) => Some((TypeRef::from_index(i), node)),
            Slot::Redirect(_) => None,
        })
    }

    pub fn live_refs(&self) -> Vec<TypeRef> {
        self.live().map(|(r, _)| r).collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Rewrites every held ref to its resolved target.
    pub(crate) fn canonicalize(&mut self) {
        let resolved: Vec<TypeRef> = (0..self.slots.len())
            .map(|i| self.resolve(TypeRef::from_index(i)))
            .collect();
        for slot in &mut self.slots {
            if let Slot::Live(node) = slot {
                node.kind.for_each_ref_mut(&mut |r| *r = resolved[r.index()]);
            }
        }
    }

    // -------------------------------- queries -------------------------------- //

    /// The object declaration behind `r`, seeing through generic applications.
    pub fn object_decl(&self, r: TypeRef) -> Option<TypeRef> {
        let r = self.resolve(r);
        match self.kind(r) {
            TypeKind::Object(_) => Some(r),
            TypeKind::Generic(g) => self.object_decl(g.of),
            _ => None,
        }
    }

    /// Base chain of an object, nearest first, as declarations.
    pub fn base_chain(&self, r: TypeRef) -> Vec<TypeRef> {
        let mut out = Vec::new();
        let mut at = self.object_decl(r);
        while let Some(decl) = at {
            let Some(base) = self.object(decl).and_then(|o| o.base) else { break };
            let Some(next) = self.object_decl(base) else { break };
            if next == decl || out.contains(&next) {
                break;
            }
            out.push(next);
            at = Some(next);
        }
        out
    }

    /// `r` itself, its base chain, then every interface along that chain.
    pub fn ancestors_or_self(&self, r: TypeRef) -> Vec<TypeRef> {
        let r = self.resolve(r);
        let Some(decl) = self.object_decl(r) else {
            return vec![r];
        };
        let mut out = vec![decl];
        out.extend(self.base_chain(decl));
        let chain = out.clone();
        for t in chain {
            if let Some(obj) = self.object(t) {
                for i in &obj.interfaces {
                    let i = self.resolve(i.interface);
                    if !out.contains(&i) {
                        out.push(i);
                    }
                }
            }
        }
        out
    }

    pub fn is_subtype_of(&self, sub: TypeRef, sup: TypeRef) -> bool {
        let sup = self.object_decl(sup).unwrap_or_else(|| self.resolve(sup));
        self.ancestors_or_self(sub).contains(&sup)
    }

    /// Properties visible on an object: base chain first (root-most), then own.
    /// Redeclared wire names keep the most derived declaration.
    pub fn all_properties(&self, r: TypeRef) -> Vec<PropertyNode> {
        let Some(decl) = self.object_decl(r) else {
            return Vec::new();
        };
        let mut chain = self.base_chain(decl);
        chain.reverse();
        chain.push(decl);
        let mut out: Vec<PropertyNode> = Vec::new();
        for t in chain {
            let Some(obj) = self.object(t) else { continue };
            for p in &obj.properties {
                match out.iter_mut().find(|q| q.wire_name == p.wire_name) {
                    Some(existing) => *existing = p.clone(),
                    None => out.push(p.clone()),
                }
            }
        }
        out
    }

    pub fn location(&self, r: TypeRef) -> SchemaLocation {
        match self.try_node(r) {
            Some(node) => SchemaLocation {
                document: self.document(node.origin.document).uri.clone(),
                pointer: node.origin.pointer.clone(),
            },
            None => SchemaLocation::unknown(),
        }
    }

    /// Human readable type expression, for logs and diagnostics.
    pub fn describe(&self, r: TypeRef) -> String {
        self.describe_depth(r, 0)
    }

    fn describe_depth(&self, r: TypeRef, depth: usize) -> String {
        if depth > 8 {
            return "…".to_string();
        }
        let Some(node) = self.try_node(r) else {
            return format!("<dangling {r}>");
        };
        if let Some(name) = &node.name {
            if node.kind.is_declared() {
                return match &name.qualified {
                    Some(q) => q.to_string(),
                    None => name.hint.render(),
                };
            }
        }
        match &node.kind {
            TypeKind::Primitive(p) => match &p.format {
                Some(format) => format!("{}({format})", p.kind.as_str()),
                None => p.kind.as_str().to_string(),
            },
            TypeKind::Array(item) => format!("List<{}>", self.describe_depth(*item, depth + 1)),
            TypeKind::Map(value) => format!("Map<string, {}>", self.describe_depth(*value, depth + 1)),
            TypeKind::Generic(g) => {
                let args: Vec<String> = g.args.iter().map(|a| self.describe_depth(*a, depth + 1)).collect();
                format!("{}<{}>", self.describe_depth(g.of, depth + 1), args.join(", "))
            }
            TypeKind::Parameter(p) => self
                .object(p.owner)
                .and_then(|o| o.params.get(p.index))
                .map(|param| param.name.clone())
                .unwrap_or_else(|| format!("<param {}>", p.index)),
            other => format!("<{} {r}>", other.label()),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        validate::validate(self)
    }
}

/// `a/b/pkg.json` → `["a", "b", "pkg"]`.
fn path_segments(uri: &str) -> Vec<String> {
    let path = uri.split(['#', '?']).next().unwrap_or(uri);
    let path = path.rsplit_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let mut segments: Vec<String> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
        .collect();
    if let Some(last) = segments.last_mut() {
        if let Some((stem, _ext)) = last.rsplit_once('.') {
            if !stem.is_empty() {
                *last = stem.to_string();
            }
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin { document: DocumentId(0), pointer: String::new() }
    }

    #[test]
    fn path_segments_drop_extension_and_scheme() {
        assert_eq!(path_segments("some/base/pkg.json"), ["some", "base", "pkg"]);
        assert_eq!(path_segments("https://host/api/openrpc.json"), ["host", "api", "openrpc"]);
        assert_eq!(path_segments("./x.y.json"), ["x.y"]);
    }

    #[test]
    fn primitives_are_interned_by_kind_and_format() {
        let mut g = TypeGraph::new();
        g.add_document("a.json", "a");
        let s1 = g.primitive(PrimitiveKind::String, None, origin());
        let s2 = g.primitive(PrimitiveKind::String, None, origin());
        let date = g.primitive(PrimitiveKind::String, Some("date".into()), origin());
        assert_eq!(s1, s2);
        assert_ne!(s1, date);
    }

    #[test]
    fn redirect_keeps_old_handles_valid() {
        let mut g = TypeGraph::new();
        g.add_document("a.json", "a");
        let a = g.add(TypeNode::new(TypeKind::Object(ObjectType::default()), origin()));
        let b = g.add(TypeNode::new(TypeKind::Object(ObjectType::default()), origin()));
        let arr = g.add(TypeNode::new(TypeKind::Array(b), origin()));
        g.redirect(b, a);
        assert_eq!(g.resolve(b), a);
        assert!(g.contains(b));
        assert_eq!(g.live_refs(), vec![a, arr]);
        g.canonicalize();
        assert!(matches!(g.kind(arr), TypeKind::Array(item) if *item == a));
    }

    #[test]
    fn extension_bag_out_of_place_is_rejected() {
        let mut g = TypeGraph::new();
        g.add_document("a.json", "a");
        let string = g.primitive(PrimitiveKind::String, None, origin());
        let prop = |wire: &str, extension: bool| PropertyNode {
            name: wire.to_string(),
            wire_name: wire.to_string(),
            ty: string,
            required: false,
            nullable: false,
            default_value: None,
            constant: None,
            docs: Vec::new(),
            extension,
        };
        let mut obj = ObjectType::default();
        obj.properties = vec![prop("additionalProperties", true), prop("a", false)];
        g.add(TypeNode::new(TypeKind::Object(obj.clone()), origin()));
        assert!(matches!(
            g.validate(),
            Err(ModelError::InvariantViolation { invariant: "extension-last", .. })
        ));

        let mut g = TypeGraph::new();
        g.add_document("a.json", "a");
        let string = g.primitive(PrimitiveKind::String, None, origin());
        obj.properties.reverse();
        for p in &mut obj.properties {
            p.ty = string;
        }
        g.add(TypeNode::new(TypeKind::Object(obj), origin()));
        assert!(g.validate().is_ok());
    }
}
