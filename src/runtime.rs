//! Runtime contract that generated code honors: interned open enums and
//! lazily coerced union views. Renderers emit the target-language
//! equivalent; this is the reference behavior the model is tested against.
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{EnumType, Literal, PrimitiveKind, TypeGraph, TypeKind, TypeRef, UnionType, UnknownValueStrategy};

// ————————————————————————————————————————————————————————————————————————————
// ENUM REGISTRY
// ————————————————————————————————————————————————————————————————————————————

/// One interned enum value. Compare with [`Arc::ptr_eq`], never by content.
#[derive(Debug)]
pub struct EnumValue {
    pub literal: Literal,
    /// Case name when the value is a declared case.
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct EnumRegistry {
    known: Vec<Arc<EnumValue>>,
    variants: Vec<(String, Vec<usize>)>,
    open: bool,
    interned: Mutex<IndexMap<Literal, Arc<EnumValue>>>,
}

impl EnumRegistry {
    pub fn new(e: &EnumType) -> Self {
        let known: Vec<Arc<EnumValue>> = e
            .cases
            .iter()
            .map(|c| Arc::new(EnumValue { literal: c.wire_value.clone(), name: Some(c.name.clone()) }))
            .collect();
        let interned = known.iter().map(|v| (v.literal.clone(), v.clone())).collect();
        Self {
            variants: e.variants.iter().map(|v| (v.name.clone(), v.cases.clone())).collect(),
            open: !matches!(e.unknown, UnknownValueStrategy::None),
            known,
            interned: Mutex::new(interned),
        }
    }

    /// The singleton for `raw`, created on first sight.
    pub fn get(&self, raw: &Literal) -> Arc<EnumValue> {
        let mut interned = self.interned.lock().unwrap_or_else(PoisonError::into_inner);
        interned
            .entry(raw.clone())
            .or_insert_with(|| Arc::new(EnumValue { literal: raw.clone(), name: None }))
            .clone()
    }

    pub fn from_json(&self, raw: &Value) -> Arc<EnumValue> {
        self.get(&Literal::from_json(raw))
    }

    /// Declared cases, in declaration order.
    pub fn known(&self) -> &[Arc<EnumValue>] {
        &self.known
    }

    pub fn is_known(&self, value: &Arc<EnumValue>) -> bool {
        self.known.iter().any(|k| Arc::ptr_eq(k, value))
    }

    pub fn is_variant(&self, value: &Arc<EnumValue>, variant: &str) -> bool {
        self.variants
            .iter()
            .filter(|(name, _)| name == variant)
            .flat_map(|(_, cases)| cases)
            .any(|&i| self.known.get(i).is_some_and(|k| Arc::ptr_eq(k, value)))
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of distinct values interned so far, known cases included.
    pub fn len(&self) -> usize {
        self.interned.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ————————————————————————————————————————————————————————————————————————————
// UNION VIEWS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoerceError {
    #[error("at `{path}`: expected {expected}, found {found}")]
    Mismatch { path: String, expected: String, found: String },
    #[error("at `{path}`: missing required property `{property}`")]
    Missing { path: String, property: String },
    #[error("no accessor `{0}` on this union")]
    NoSuchAccessor(String),
}

/// Turns a raw payload into a value of `target`.
pub trait Coercer {
    fn coerce(&self, raw: &Value, target: TypeRef) -> Result<Value, CoerceError>;
}

/// A union instance: the untouched payload plus one memoized view per
/// accessor. The coercer runs at most once per accessor, failures included.
#[derive(Debug)]
pub struct UnionValue {
    raw: Value,
    accessors: Vec<(String, TypeRef, Option<Literal>)>,
    discriminator: Option<String>,
    views: Vec<OnceCell<Result<Value, CoerceError>>>,
}

impl UnionValue {
    pub fn new(union: &UnionType, raw: Value) -> Self {
        let accessors: Vec<_> = union.accessors.iter().map(|a| (a.name.clone(), a.candidate, a.tag.clone())).collect();
        let views = accessors.iter().map(|_| OnceCell::new()).collect();
        Self { raw, accessors, discriminator: union.discriminator.clone(), views }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn accessor_names(&self) -> impl Iterator<Item = &str> {
        self.accessors.iter().map(|(name, _, _)| name.as_str())
    }

    /// `None` when `index` names no accessor.
    pub fn view(&self, index: usize, coercer: &dyn Coercer) -> Option<&Result<Value, CoerceError>> {
        let (_, candidate, _) = self.accessors.get(index)?;
        let cell = self.views.get(index)?;
        Some(cell.get_or_init(|| coercer.coerce(&self.raw, *candidate)))
    }

    pub fn view_named(&self, accessor: &str, coercer: &dyn Coercer) -> Result<&Value, CoerceError> {
        let missing = || CoerceError::NoSuchAccessor(accessor.to_string());
        let index = self.accessors.iter().position(|(name, _, _)| name == accessor).ok_or_else(missing)?;
        self.view(index, coercer).ok_or_else(missing)?.as_ref().map_err(Clone::clone)
    }

    /// Accessor whose tag matches the payload's discriminator value.
    pub fn discriminate(&self) -> Option<usize> {
        let wire = self.discriminator.as_deref()?;
        let tag = Literal::from_json(self.raw.get(wire)?);
        self.accessors.iter().position(|(_, _, t)| t.as_ref() == Some(&tag))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCTURAL COERCER
// ————————————————————————————————————————————————————————————————————————————

/// Checks a payload against the model's shape and returns the accepted
/// value. Unknown object keys survive only where an extension bag exists.
pub struct StructuralCoercer<'g> {
    graph: &'g TypeGraph,
}

/// Parameter bindings in scope: declaring object → arguments.
type Bindings = Vec<(TypeRef, Vec<TypeRef>)>;

impl<'g> StructuralCoercer<'g> {
    pub fn new(graph: &'g TypeGraph) -> Self {
        Self { graph }
    }

    fn check(&self, value: &Value, r: TypeRef, env: &Bindings, path: &str) -> Result<Value, CoerceError> {
        let graph = self.graph;
        let r = graph.resolve(r);
        let mismatch = |expected: &str| CoerceError::Mismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            found: json_kind(value).to_string(),
        };
        match graph.kind(r) {
            TypeKind::Primitive(p) => match accepts(p.kind, value) {
                true => Ok(value.clone()),
                false => Err(mismatch(p.kind.as_str())),
            },
            TypeKind::Array(item) => {
                let items = value.as_array().ok_or_else(|| mismatch("array"))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.check(v, *item, env, &format!("{path}/{i}")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            TypeKind::Map(inner) => {
                let entries = value.as_object().ok_or_else(|| mismatch("object"))?;
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), self.check(v, *inner, env, &format!("{path}/{k}"))?);
                }
                Ok(Value::Object(out))
            }
            TypeKind::Object(_) | TypeKind::Generic(_) => self.object(value, r, env, path),
            TypeKind::Interface(_) => match value.is_object() {
                true => Ok(value.clone()),
                false => Err(mismatch("object")),
            },
            TypeKind::Enum(e) => {
                let literal = Literal::from_json(value);
                if e.case_of(&literal).is_some() {
                    return Ok(value.clone());
                }
                match &e.unknown {
                    UnknownValueStrategy::SentinelRegistry { fallback } if accepts(*fallback, value) => Ok(value.clone()),
                    _ => Err(mismatch(&graph.describe(r))),
                }
            }
            TypeKind::Union(u) => u
                .candidates
                .iter()
                .find_map(|c| self.check(value, *c, env, path).ok())
                .ok_or_else(|| mismatch(&graph.describe(r))),
            TypeKind::Parameter(p) => {
                let bound = env.iter().rev().find(|(owner, _)| *owner == graph.resolve(p.owner)).and_then(|(_, args)| args.get(p.index));
                match bound {
                    Some(arg) => self.check(value, *arg, env, path),
                    None => {
                        let upper = graph.object(p.owner).and_then(|o| o.params.get(p.index)).and_then(|t| t.upper_bound);
                        match upper {
                            Some(upper) => self.check(value, upper, env, path),
                            None => Ok(value.clone()),
                        }
                    }
                }
            }
            TypeKind::Pending => Err(mismatch("a built type")),
        }
    }

    fn object(&self, value: &Value, r: TypeRef, env: &Bindings, path: &str) -> Result<Value, CoerceError> {
        let graph = self.graph;
        let entries = value.as_object().ok_or_else(|| CoerceError::Mismatch {
            path: path.to_string(),
            expected: "object".to_string(),
            found: json_kind(value).to_string(),
        })?;

        // 1) bindings introduced by this application and the base chain
        let mut env = env.clone();
        let mut at = Some(r);
        while let Some(t) = at {
            if let TypeKind::Generic(g) = graph.kind(t) {
                env.push((graph.resolve(g.of), g.args.clone()));
            }
            at = graph.object_decl(t).and_then(|d| graph.object(d)).and_then(|o| o.base);
        }

        // 2) declared properties
        let properties = graph.all_properties(r);
        let mut out = serde_json::Map::new();
        let mut bag = None;
        for property in &properties {
            if property.extension {
                bag = Some(property.ty);
                continue;
            }
            let here = format!("{path}/{}", property.wire_name);
            match entries.get(&property.wire_name) {
                None if property.required => {
                    return Err(CoerceError::Missing { path: path.to_string(), property: property.wire_name.clone() });
                }
                None => {}
                Some(Value::Null) if property.nullable || !property.required => {
                    out.insert(property.wire_name.clone(), Value::Null);
                }
                Some(v) => {
                    if let Some(constant) = &property.constant {
                        if &Literal::from_json(v) != constant {
                            return Err(CoerceError::Mismatch {
                                path: here,
                                expected: constant.to_string(),
                                found: v.to_string(),
                            });
                        }
                    }
                    out.insert(property.wire_name.clone(), self.check(v, property.ty, &env, &here)?);
                }
            }
        }

        // 3) whatever is left goes to the extension bag, if any
        if let Some(bag) = bag {
            let value_ty = match graph.kind(bag) {
                TypeKind::Map(v) => *v,
                _ => bag,
            };
            for (k, v) in entries.iter().filter(|(k, _)| !properties.iter().any(|p| &p.wire_name == *k)) {
                out.insert(k.clone(), self.check(v, value_ty, &env, &format!("{path}/{k}"))?);
            }
        }
        Ok(Value::Object(out))
    }
}

impl Coercer for StructuralCoercer<'_> {
    fn coerce(&self, raw: &Value, target: TypeRef) -> Result<Value, CoerceError> {
        self.check(raw, target, &Vec::new(), "")
    }
}

fn accepts(kind: PrimitiveKind, value: &Value) -> bool {
    match kind {
        PrimitiveKind::String => value.is_string(),
        PrimitiveKind::Integer => value.is_i64() || value.is_u64(),
        PrimitiveKind::Number => value.is_number(),
        PrimitiveKind::Boolean => value.is_boolean(),
        PrimitiveKind::Null => value.is_null(),
        PrimitiveKind::Any => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
