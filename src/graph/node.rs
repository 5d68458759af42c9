use std::fmt;

use serde::Serialize;

use super::{DocumentId, Literal, TypeRef};

// ————————————————————————————————————————————————————————————————————————————
// NAMES
// ————————————————————————————————————————————————————————————————————————————

/// How a declared type wants to be called, before packaging.
///
/// `segments` run outermost → innermost naming context (already PascalCase);
/// the rendered local name is the concatenation of the last `used` segments.
/// Extending a hint pulls in one more enclosing segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHint {
    pub segments: Vec<String>,
    pub used: usize,
    /// Keyed by the schema author (component name), not derived from context.
    pub explicit: bool,
}

impl NameHint {
    pub fn explicit(name: impl Into<String>) -> Self {
        Self { segments: vec![name.into()], used: 1, explicit: true }
    }

    /// `min` is how many trailing segments the first rendering uses.
    pub fn inferred(segments: Vec<String>, min: usize) -> Self {
        let used = min.clamp(1, segments.len().max(1));
        Self { segments, used, explicit: false }
    }

    pub fn render(&self) -> String {
        let start = self.segments.len().saturating_sub(self.used);
        self.segments[start..].concat()
    }

    pub fn can_extend(&self) -> bool {
        self.used < self.segments.len()
    }

    pub fn extend(&mut self) -> bool {
        if self.can_extend() {
            self.used += 1;
            true
        } else {
            false
        }
    }

    /// Innermost segment, i.e. the most specific name part.
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualifiedName {
    pub package: String,
    pub local: String,
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.package.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{}.{}", self.package, self.local)
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeName {
    pub hint: NameHint,
    pub qualified: Option<QualifiedName>,
}

impl TypeName {
    pub fn new(hint: NameHint) -> Self {
        Self { hint, qualified: None }
    }

    /// Resolved local name if packaged, else the current rendering of the hint.
    pub fn local(&self) -> String {
        match &self.qualified {
            Some(q) => q.local.clone(),
            None => self.hint.render(),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// NODES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub document: DocumentId,
    /// JSON pointer of the originating fragment inside its document.
    pub pointer: String,
}

/// What part of the generated surface a type plays. Only the compressor
/// cares, to honor the error-structure sub-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TypeRole {
    #[default]
    Model,
    Request,
    RequestParams,
    Response,
    ErrorResponse,
    Error,
    /// Created by a pass after the builder (interfaces, applications, slots).
    Synthesized,
}

impl TypeRole {
    pub fn is_error_structure(self) -> bool {
        matches!(self, TypeRole::ErrorResponse | TypeRole::Error)
    }
}

#[derive(Debug, Clone)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub name: Option<TypeName>,
    pub origin: Origin,
    pub docs: Vec<String>,
    pub role: TypeRole,
}

impl TypeNode {
    pub fn new(kind: TypeKind, origin: Origin) -> Self {
        Self { kind, name: None, origin, docs: Vec::new(), role: TypeRole::Model }
    }

    pub fn named(mut self, hint: NameHint) -> Self {
        self.name = Some(TypeName::new(hint));
        self
    }

    pub fn with_role(mut self, role: TypeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_docs(mut self, docs: Vec<String>) -> Self {
        self.docs = docs;
        self
    }

    pub fn qualified_name(&self) -> Option<&QualifiedName> {
        self.name.as_ref().and_then(|n| n.qualified.as_ref())
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Primitive(PrimitiveType),
    Array(TypeRef),
    /// String-keyed map; the ref is the value type.
    Map(TypeRef),
    Object(ObjectType),
    Interface(InterfaceType),
    Enum(EnumType),
    Union(UnionType),
    /// Application of a generic object declaration.
    Generic(GenericType),
    /// Use of a type parameter inside its declaring object.
    Parameter(ParameterRef),
    /// Slot reserved for a named schema that is still being built.
    Pending,
}

impl TypeKind {
    /// Kinds that become named, packaged declarations.
    pub fn is_declared(&self) -> bool {
        matches!(
            self,
            TypeKind::Object(_) | TypeKind::Interface(_) | TypeKind::Enum(_) | TypeKind::Union(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TypeKind::Primitive(_) => "primitive",
            TypeKind::Array(_) => "array",
            TypeKind::Map(_) => "map",
            TypeKind::Object(_) => "object",
            TypeKind::Interface(_) => "interface",
            TypeKind::Enum(_) => "enum",
            TypeKind::Union(_) => "union",
            TypeKind::Generic(_) => "generic",
            TypeKind::Parameter(_) => "parameter",
            TypeKind::Pending => "pending",
        }
    }

    pub fn as_object(&self) -> Option<&ObjectType> {
        match self {
            TypeKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectType> {
        match self {
            TypeKind::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Every TypeRef held by this node, in a stable order.
    pub fn children(&self) -> Vec<TypeRef> {
        let mut out = Vec::new();
        let mut kind = self.clone();
        kind.for_each_ref_mut(&mut |r| out.push(*r));
        out
    }

    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut TypeRef)) {
        match self {
            TypeKind::Primitive(_) | TypeKind::Pending => {}
            TypeKind::Array(item) | TypeKind::Map(item) => f(item),
            TypeKind::Object(o) => {
                for p in &mut o.properties {
                    f(&mut p.ty);
                }
                for parent in &mut o.parents {
                    f(parent);
                }
                if let Some(base) = &mut o.base {
                    f(base);
                }
                for i in &mut o.interfaces {
                    f(&mut i.interface);
                }
                for param in &mut o.params {
                    if let Some(bound) = &mut param.upper_bound {
                        f(bound);
                    }
                }
            }
            TypeKind::Interface(i) => {
                if let Some(source) = &mut i.source {
                    f(source);
                }
                for m in &mut i.methods {
                    f(&mut m.returns);
                }
            }
            TypeKind::Enum(e) => {
                for v in &mut e.variants {
                    if let Some(source) = &mut v.source {
                        f(source);
                    }
                }
            }
            TypeKind::Union(u) => {
                for c in &mut u.candidates {
                    f(c);
                }
                if let Some(raw) = &mut u.raw {
                    f(raw);
                }
                for a in &mut u.accessors {
                    f(&mut a.candidate);
                }
            }
            TypeKind::Generic(g) => {
                f(&mut g.of);
                for a in &mut g.args {
                    f(a);
                }
            }
            TypeKind::Parameter(p) => f(&mut p.owner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PrimitiveKind {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    /// Opaque / untyped value.
    Any,
}

impl PrimitiveKind {
    pub fn from_schema_name(name: &str) -> Option<Self> {
        Some(match name {
            "string" => PrimitiveKind::String,
            "integer" => PrimitiveKind::Integer,
            "number" => PrimitiveKind::Number,
            "boolean" => PrimitiveKind::Boolean,
            "null" => PrimitiveKind::Null,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
            PrimitiveKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimitiveType {
    pub kind: PrimitiveKind,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyNode {
    /// In-model identifier.
    pub name: String,
    /// Field name as serialized.
    pub wire_name: String,
    pub ty: TypeRef,
    pub required: bool,
    pub nullable: bool,
    pub default_value: Option<Literal>,
    /// Fixed literal value (`const`, request `method`, discriminator tags).
    pub constant: Option<Literal>,
    pub docs: Vec<String>,
    /// The reserved additional-properties bag.
    pub extension: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplementedInterface {
    pub interface: TypeRef,
    /// Position of the originating parent in the schema's declaration.
    pub declared_at: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeParameter {
    pub name: String,
    pub upper_bound: Option<TypeRef>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectType {
    pub properties: Vec<PropertyNode>,
    /// Raw declared parents as the schema states them; drained by the
    /// inheritance normalizer.
    pub parents: Vec<TypeRef>,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<ImplementedInterface>,
    pub params: Vec<TypeParameter>,
}

impl ObjectType {
    pub fn property(&self, wire_name: &str) -> Option<&PropertyNode> {
        self.properties.iter().find(|p| p.wire_name == wire_name)
    }

    pub fn property_mut(&mut self, wire_name: &str) -> Option<&mut PropertyNode> {
        self.properties.iter_mut().find(|p| p.wire_name == wire_name)
    }

    /// Appends a property, keeping the extension bag last.
    pub fn push_property(&mut self, property: PropertyNode) {
        if property.extension {
            self.properties.retain(|p| !p.extension);
            self.properties.push(property);
            return;
        }
        match self.properties.iter().position(|p| p.extension) {
            Some(at) => self.properties.insert(at, property),
            None => self.properties.push(property),
        }
    }

    pub fn remove_property(&mut self, wire_name: &str) -> Option<PropertyNode> {
        let at = self.properties.iter().position(|p| p.wire_name == wire_name)?;
        Some(self.properties.remove(at))
    }

    pub fn extension(&self) -> Option<&PropertyNode> {
        self.properties.iter().find(|p| p.extension)
    }

    pub fn implements(&self, interface: TypeRef) -> bool {
        self.interfaces.iter().any(|i| i.interface == interface)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub wire_name: String,
    pub returns: TypeRef,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct InterfaceType {
    pub methods: Vec<MethodSignature>,
    /// The non-chosen parent this contract was derived from; `None` for
    /// contracts shared by unrelated objects.
    pub source: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum UnknownValueStrategy {
    #[default]
    None,
    SentinelRegistry { fallback: PrimitiveKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumCase {
    pub name: String,
    pub wire_value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    /// Enum the group was composed from, when it was a named one.
    pub source: Option<TypeRef>,
    /// Indices into `EnumType::cases`.
    pub cases: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumType {
    pub cases: Vec<EnumCase>,
    pub unknown: UnknownValueStrategy,
    pub variants: Vec<EnumVariant>,
}

impl EnumType {
    pub fn case_of(&self, wire_value: &Literal) -> Option<usize> {
        self.cases.iter().position(|c| &c.wire_value == wire_value)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.unknown, UnknownValueStrategy::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionAccessor {
    pub name: String,
    pub candidate: TypeRef,
    /// Fixed discriminant literal when the union is tagged.
    pub tag: Option<Literal>,
}

#[derive(Debug, Clone, Default)]
pub struct UnionType {
    pub candidates: Vec<TypeRef>,
    /// Slot holding the untyped payload; set by the synthesizer.
    pub raw: Option<TypeRef>,
    pub accessors: Vec<UnionAccessor>,
    pub discriminator: Option<String>,
    /// `oneOf` (exactly one) rather than `anyOf`.
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericType {
    pub of: TypeRef,
    pub args: Vec<TypeRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterRef {
    pub owner: TypeRef,
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(wire: &str, extension: bool) -> PropertyNode {
        PropertyNode {
            name: wire.to_string(),
            wire_name: wire.to_string(),
            ty: TypeRef::from_index(0),
            required: false,
            nullable: false,
            default_value: None,
            constant: None,
            docs: Vec::new(),
            extension,
        }
    }

    #[test]
    fn extension_bag_stays_last() {
        let mut obj = ObjectType::default();
        obj.push_property(prop("a", false));
        obj.push_property(prop("additionalProperties", true));
        obj.push_property(prop("b", false));
        let wires: Vec<_> = obj.properties.iter().map(|p| p.wire_name.as_str()).collect();
        assert_eq!(wires, ["a", "b", "additionalProperties"]);
    }

    #[test]
    fn name_hint_extends_outward() {
        let mut hint = NameHint::inferred(vec!["GetThing".into(), "Result".into(), "Data".into()], 1);
        assert_eq!(hint.render(), "Data");
        assert!(hint.extend());
        assert_eq!(hint.render(), "ResultData");
        assert!(hint.extend());
        assert_eq!(hint.render(), "GetThingResultData");
        assert!(!hint.extend());
    }
}
