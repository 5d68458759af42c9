//! Model Builder: parsed schema documents → a raw [`TypeGraph`].
//!
//! Every named schema that declares a type reserves its slot before anything
//! is built, so references can be handed out in any order and the reservation
//! order doubles as first-discovery order. Named schemas that only rename
//! something else (a `$ref`, a primitive, an array, `X | null`) are aliases:
//! they are built on first use and get no node of their own.
mod jsonrpc;

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Options;
use crate::error::{ModelError, SchemaLocation};
use crate::graph::{
    DocumentId, EnumCase, EnumType, EnumVariant, Literal, NameHint, ObjectType, Origin, PrimitiveKind, PropertyNode,
    TypeGraph, TypeKind, TypeNode, TypeRef, TypeRole, UnionType, UnknownValueStrategy,
};
use crate::naming::{camel_case, pascal_case, upper_snake_case};
use crate::schema::{split_reference, AdditionalProperties, Schema, SchemaDocument};

pub use jsonrpc::{UNKNOWN_ERROR_CODE, UNKNOWN_ERROR_MESSAGE};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// What a schema fragment contributes at its use site.
#[derive(Debug, Clone)]
struct Built {
    ty: TypeRef,
    nullable: bool,
    constant: Option<Literal>,
}

impl Built {
    fn plain(ty: TypeRef) -> Self {
        Self { ty, nullable: false, constant: None }
    }
}

#[derive(Debug, Clone)]
struct NamedSchema<'a> {
    schema: &'a Schema,
    name: String,
    pointer: String,
    /// Reserved slot; `None` for aliases.
    slot: Option<TypeRef>,
}

type NamedKey = (usize, String);

/// An enum contributing cases to a composed enum.
#[derive(Debug, Clone)]
struct EnumSource<'a> {
    slot: Option<TypeRef>,
    name: Option<String>,
    schema: &'a Schema,
}

/// Naming context of an inline fragment: enclosing names, outermost first.
#[derive(Debug, Clone)]
struct NameCtx {
    segments: Vec<String>,
    min: usize,
}

impl NameCtx {
    fn root(name: &str) -> Self {
        Self { segments: vec![pascal_case(name)], min: 1 }
    }

    fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(pascal_case(segment));
        Self { segments, min: 1 }
    }

    /// Untitled composition candidates render with their owner's name.
    fn candidate(&self, segment: &str) -> Self {
        Self { min: 2, ..self.child(segment) }
    }

    fn hint(&self, schema: &Schema) -> NameHint {
        match &schema.title {
            Some(title) if !pascal_case(title).is_empty() => {
                let mut segments = self.segments.clone();
                segments.pop();
                segments.push(pascal_case(title));
                NameHint::inferred(segments, 1)
            }
            _ => NameHint::inferred(self.segments.clone(), self.min),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENTRY
// ————————————————————————————————————————————————————————————————————————————

pub fn build(documents: &[SchemaDocument], options: &Options) -> Result<TypeGraph, ModelError> {
    let envelopes: Vec<_> = documents
        .iter()
        .map(|doc| if options.jsonrpc { jsonrpc::envelopes(doc) } else { Default::default() })
        .collect();

    let mut builder = Builder::new(documents, options);

    // 1) reserve: user schemas first, then envelopes, document by document
    for (index, doc) in documents.iter().enumerate() {
        for (name, schema) in &doc.schemas {
            builder.reserve(index, name, schema, format!("/schemas/{}", escape_pointer(name)), TypeRole::Model);
        }
        for (name, envelope) in &envelopes[index] {
            if doc.schemas.contains_key(name) {
                debug!(document = %doc.id, %name, "document declares its own envelope type");
                continue;
            }
            builder.reserve(index, name, &envelope.schema, envelope.pointer.clone(), envelope.role);
        }
    }

    // 2) build every named schema, aliases included so bad refs surface
    for key in builder.order.clone() {
        builder.build_named(&key)?;
    }

    // 3) raw inheritance sanity + doc inheritance
    let mut graph = builder.graph;
    check_parents(&mut graph)?;
    debug!(nodes = graph.slot_count(), "model built");
    Ok(graph)
}

struct Builder<'a> {
    graph: TypeGraph,
    options: &'a Options,
    documents: &'a [SchemaDocument],
    doc_ids: Vec<DocumentId>,
    doc_index: HashMap<&'a str, usize>,
    named: HashMap<NamedKey, NamedSchema<'a>>,
    order: Vec<NamedKey>,
    aliases: HashMap<NamedKey, Built>,
    resolving: Vec<NamedKey>,
}

impl<'a> Builder<'a> {
    fn new(documents: &'a [SchemaDocument], options: &'a Options) -> Self {
        let mut graph = TypeGraph::new();
        let mut doc_ids = Vec::with_capacity(documents.len());
        let mut doc_index = HashMap::new();
        for (index, doc) in documents.iter().enumerate() {
            let namespace = doc.namespace.clone().unwrap_or_else(|| options.default_namespace.clone());
            doc_ids.push(graph.add_document(&doc.id, &namespace));
            doc_index.entry(doc.id.as_str()).or_insert(index);
        }
        Self {
            graph,
            options,
            documents,
            doc_ids,
            doc_index,
            named: HashMap::new(),
            order: Vec::new(),
            aliases: HashMap::new(),
            resolving: Vec::new(),
        }
    }

    fn origin(&self, doc: usize, pointer: &str) -> Origin {
        Origin { document: self.doc_ids[doc], pointer: pointer.to_string() }
    }

    fn location(&self, doc: usize, pointer: &str) -> SchemaLocation {
        SchemaLocation::new(self.documents[doc].id.clone(), pointer)
    }

    fn reserve(&mut self, doc: usize, name: &str, schema: &'a Schema, pointer: String, role: TypeRole) {
        let slot = declares(schema).then(|| {
            let display = if pascal_case(name).is_empty() { name.to_string() } else { pascal_case(name) };
            let node = TypeNode::new(TypeKind::Pending, self.origin(doc, &pointer))
                .named(NameHint::explicit(display))
                .with_role(role);
            self.graph.add(node)
        });
        let key = (doc, name.to_string());
        self.order.push(key.clone());
        self.named.insert(key, NamedSchema { schema, name: name.to_string(), pointer, slot });
    }

    fn build_named(&mut self, key: &NamedKey) -> Result<(), ModelError> {
        let Some(entry) = self.named.get(key).cloned() else {
            return Ok(());
        };
        match entry.slot {
            Some(slot) => {
                let ctx = NameCtx::root(&entry.name);
                self.declare(key.0, entry.schema, &ctx, &entry.pointer, Some(slot))?;
            }
            None => {
                self.resolve_named(key.0, &entry.name, &entry.pointer)?;
            }
        }
        Ok(())
    }

    // -------------------------------- references -------------------------------- //

    fn resolve_ref(&mut self, doc: usize, reference: &str, pointer: &str) -> Result<Built, ModelError> {
        let (document, name) = split_reference(reference);
        let target = if document.is_empty() {
            doc
        } else {
            match self.doc_index.get(document) {
                Some(index) => *index,
                None => {
                    return Err(ModelError::shape(
                        self.location(doc, pointer),
                        format!("reference `{reference}` names unknown document `{document}`"),
                    ));
                }
            }
        };
        if !self.named.contains_key(&(target, name.to_string())) {
            return Err(ModelError::shape(self.location(doc, pointer), format!("dangling reference `{reference}`")));
        }
        self.resolve_named(target, name, pointer)
    }

    fn resolve_named(&mut self, doc: usize, name: &str, use_site: &str) -> Result<Built, ModelError> {
        let key = (doc, name.to_string());
        let Some(entry) = self.named.get(&key).cloned() else {
            return Err(ModelError::shape(self.location(doc, use_site), format!("dangling reference `{name}`")));
        };
        if let Some(slot) = entry.slot {
            return Ok(Built::plain(slot));
        }
        if let Some(built) = self.aliases.get(&key) {
            return Ok(built.clone());
        }
        if self.resolving.contains(&key) {
            return Err(ModelError::shape(
                self.location(doc, &entry.pointer),
                format!("alias cycle through `{name}`"),
            ));
        }
        self.resolving.push(key.clone());
        let built = self.build_type(doc, entry.schema, &NameCtx::root(name), &entry.pointer);
        self.resolving.pop();
        let built = built?;
        self.aliases.insert(key, built.clone());
        Ok(built)
    }

    /// Enum behind a candidate, inline or through (possibly aliased) refs.
    fn enum_target(&self, doc: usize, schema: &'a Schema) -> Option<EnumSource<'a>> {
        let mut at = (doc, schema);
        let mut named: Option<NamedKey> = None;
        for _ in 0..16 {
            let (doc, schema) = at;
            if schema.enum_values.is_some() {
                let slot = named.as_ref().and_then(|k| self.named.get(k)).and_then(|e| e.slot);
                let name = named.map(|(_, name)| name).or_else(|| schema.title.clone());
                return Some(EnumSource { slot, name, schema });
            }
            let reference = schema.reference.as_deref().filter(|_| schema.is_bare_reference())?;
            let (document, target) = split_reference(reference);
            let target_doc = if document.is_empty() { doc } else { *self.doc_index.get(document)? };
            let key = (target_doc, target.to_string());
            let entry = self.named.get(&key)?;
            at = (target_doc, entry.schema);
            named = Some(key);
        }
        None
    }

    // -------------------------------- shapes -------------------------------- //

    fn build_type(&mut self, doc: usize, schema: &'a Schema, ctx: &NameCtx, pointer: &str) -> Result<Built, ModelError> {
        // 1) references
        if let Some(reference) = &schema.reference {
            if !schema.is_bare_reference() {
                warn!(document = %self.documents[doc].id, %pointer, "keywords next to `$ref` are ignored");
            }
            let mut built = self.resolve_ref(doc, reference, pointer)?;
            built.nullable |= schema.nullable;
            return Ok(built);
        }
        check_shape(schema).map_err(|reason| ModelError::shape(self.location(doc, pointer), reason))?;

        let nullable = schema.nullable
            || schema.has_type("null")
            || schema.enum_values.as_ref().is_some_and(|values| values.contains(&Value::Null));
        let constant = schema.constant.as_ref().map(Literal::from_json);

        // 2) declarations get a node of their own
        if declares(schema) && !is_inline_map(schema) {
            let ty = self.declare(doc, schema, ctx, pointer, None)?;
            return Ok(Built { ty, nullable, constant });
        }

        // 3) `X | null` collapses into a nullable X
        if let Some((candidates, exclusive)) = schema.composition() {
            let keyword = if exclusive { "oneOf" } else { "anyOf" };
            let had_null = candidates.iter().any(Schema::is_null_only);
            return match candidates.iter().enumerate().find(|(_, c)| !c.is_null_only()) {
                Some((index, only)) => {
                    let mut built = self.build_type(doc, only, ctx, &format!("{pointer}/{keyword}/{index}"))?;
                    built.nullable |= had_null || nullable;
                    Ok(built)
                }
                None => {
                    let ty = self.graph.primitive(PrimitiveKind::Null, None, self.origin(doc, pointer));
                    Ok(Built { ty, nullable: true, constant })
                }
            };
        }

        // 4) maps, arrays, primitives
        let origin = self.origin(doc, pointer);
        if is_inline_map(schema) {
            let value = self.extension_value(doc, schema, ctx, pointer)?;
            let ty = self.graph.add(TypeNode::new(TypeKind::Map(value), origin));
            return Ok(Built { ty, nullable, constant });
        }
        let kinds: Vec<&str> = schema.type_names().into_iter().filter(|t| *t != "null").collect();
        let ty = match kinds.first().copied() {
            Some("array") => self.array(doc, schema, ctx, pointer)?,
            Some(name) => match PrimitiveKind::from_schema_name(name) {
                Some(kind) => self.graph.primitive(kind, schema.format.clone(), origin),
                None => {
                    return Err(ModelError::shape(self.location(doc, pointer), format!("unknown type `{name}`")));
                }
            },
            None if schema.items.is_some() => self.array(doc, schema, ctx, pointer)?,
            None if schema.has_type("null") => self.graph.primitive(PrimitiveKind::Null, None, origin),
            None => {
                let kind = constant.as_ref().map(literal_kind).unwrap_or(PrimitiveKind::Any);
                self.graph.primitive(kind, schema.format.clone(), origin)
            }
        };
        Ok(Built { ty, nullable, constant })
    }

    fn array(&mut self, doc: usize, schema: &'a Schema, ctx: &NameCtx, pointer: &str) -> Result<TypeRef, ModelError> {
        let item = match &schema.items {
            Some(items) => {
                let leaf = ctx.segments.last().cloned().unwrap_or_default();
                let mut item_ctx = ctx.clone();
                if let Some(last) = item_ctx.segments.last_mut() {
                    *last = format!("{leaf}Item");
                }
                self.build_type(doc, items, &item_ctx, &format!("{pointer}/items"))?.ty
            }
            None => self.graph.opaque(self.origin(doc, pointer)),
        };
        Ok(self.graph.add(TypeNode::new(TypeKind::Array(item), self.origin(doc, pointer))))
    }

    /// Fills (or allocates) the slot of a declared type.
    fn declare(
        &mut self,
        doc: usize,
        schema: &'a Schema,
        ctx: &NameCtx,
        pointer: &str,
        slot: Option<TypeRef>,
    ) -> Result<TypeRef, ModelError> {
        check_shape(schema).map_err(|reason| ModelError::shape(self.location(doc, pointer), reason))?;
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let node = TypeNode::new(TypeKind::Pending, self.origin(doc, pointer)).named(ctx.hint(schema));
                self.graph.add(node)
            }
        };

        let mut docs: Vec<String> = schema.description.iter().cloned().collect();
        let kind = if let Some(values) = &schema.enum_values {
            TypeKind::Enum(self.plain_enum(doc, values, pointer)?)
        } else if let Some((candidates, exclusive)) = schema.composition() {
            self.composition(doc, schema, candidates, exclusive, ctx, pointer)?
        } else if let Some((intersection, extra)) = self.intersected_enum(doc, schema, pointer)? {
            docs.extend(extra);
            TypeKind::Enum(intersection)
        } else {
            let (object, extra) = self.object(doc, schema, ctx, pointer)?;
            docs.extend(extra);
            TypeKind::Object(object)
        };

        let node = self.graph.node_mut(slot);
        node.kind = kind;
        node.docs = docs;
        Ok(slot)
    }

    fn plain_enum(&mut self, doc: usize, values: &[Value], pointer: &str) -> Result<EnumType, ModelError> {
        let mut cases = Vec::new();
        let mut seen = HashSet::new();
        for value in values.iter().filter(|v| !v.is_null()) {
            let literal = Literal::from_json(value);
            if !seen.insert(literal.clone()) {
                return Err(ModelError::shape(self.location(doc, pointer), format!("enum repeats value {literal}")));
            }
            cases.push(EnumCase { name: upper_snake_case(&literal.display_text()), wire_value: literal });
        }
        Ok(EnumType { cases, ..EnumType::default() })
    }

    fn composition(
        &mut self,
        doc: usize,
        schema: &'a Schema,
        candidates: &'a [Schema],
        exclusive: bool,
        ctx: &NameCtx,
        pointer: &str,
    ) -> Result<TypeKind, ModelError> {
        let keyword = if exclusive { "oneOf" } else { "anyOf" };
        let live: Vec<(usize, &'a Schema)> = candidates.iter().enumerate().filter(|(_, c)| !c.is_null_only()).collect();

        // enum-like members (enums, constants, refs to named enums) vs the open fallback
        let mut enum_like = Vec::new();
        let mut fallbacks = Vec::new();
        let mut constants_only = true;
        for &(index, candidate) in &live {
            if let Some(target) = self.enum_target(doc, candidate) {
                constants_only = false;
                enum_like.push((index, Some(target)));
            } else if candidate.constant.is_some() && candidate.properties.is_empty() {
                enum_like.push((index, None));
            } else if let Some(primitive) = candidate.bare_primitive() {
                constants_only = false;
                fallbacks.push(primitive);
            } else {
                break;
            }
        }
        let all_classified = enum_like.len() + fallbacks.len() == live.len();
        let open = !enum_like.is_empty() && !fallbacks.is_empty();
        if all_classified && (open || (constants_only && !enum_like.is_empty())) {
            return Ok(TypeKind::Enum(self.composed_enum(candidates, &enum_like, &fallbacks, doc, pointer)?));
        }

        let mut union = UnionType {
            discriminator: schema.discriminator.as_ref().map(|d| d.property_name.clone()),
            exclusive,
            ..UnionType::default()
        };
        for (index, candidate) in live {
            let segment = match &candidate.title {
                Some(title) => title.clone(),
                None => format!("Option{}", index + 1),
            };
            let built = self.build_type(doc, candidate, &ctx.candidate(&segment), &format!("{pointer}/{keyword}/{index}"))?;
            union.candidates.push(built.ty);
        }
        Ok(TypeKind::Union(union))
    }

    fn composed_enum(
        &self,
        candidates: &'a [Schema],
        enum_like: &[(usize, Option<EnumSource<'a>>)],
        fallbacks: &[&str],
        doc: usize,
        pointer: &str,
    ) -> Result<EnumType, ModelError> {
        let mut out = EnumType::default();
        for (index, target) in enum_like {
            let (values, variant) = match target {
                Some(source) => {
                    let values: Vec<Value> = source.schema.enum_values.clone().unwrap_or_default();
                    (values, source.name.as_ref().map(|name| (pascal_case(name), source.slot)))
                }
                None => {
                    let candidate = &candidates[*index];
                    let values: Vec<Value> = candidate.constant.iter().cloned().collect();
                    (values, candidate.title.as_ref().map(|t| (pascal_case(t), None)))
                }
            };
            let mut members = Vec::new();
            for value in values.iter().filter(|v| !v.is_null()) {
                let literal = Literal::from_json(value);
                let at = match out.case_of(&literal) {
                    Some(at) => at,
                    None => {
                        out.cases.push(EnumCase { name: upper_snake_case(&literal.display_text()), wire_value: literal });
                        out.cases.len() - 1
                    }
                };
                members.push(at);
            }
            if let Some((name, source)) = variant {
                out.variants.push(EnumVariant { name, source, cases: members });
            }
        }
        if let Some(first) = fallbacks.first() {
            if let Some(other) = fallbacks.iter().find(|f| *f != first) {
                return Err(ModelError::shape(
                    self.location(doc, pointer),
                    format!("open enum has more than one fallback type (`{first}`, `{other}`)"),
                ));
            }
            let fallback = PrimitiveKind::from_schema_name(first).unwrap_or(PrimitiveKind::Any);
            out.unknown = UnknownValueStrategy::SentinelRegistry { fallback };
        }
        Ok(out)
    }

    /// `allOf` over enums, narrowed by bare primitives and description-only
    /// fragments: the values every enum member shares that fit every primitive,
    /// plus each member's description in order. `None` when any member is
    /// something else, so the fragment builds as an object.
    fn intersected_enum(
        &self,
        doc: usize,
        schema: &'a Schema,
        pointer: &str,
    ) -> Result<Option<(EnumType, Vec<String>)>, ModelError> {
        if schema.all_of.is_empty() || !schema.properties.is_empty() || schema.additional_properties.is_some() {
            return Ok(None);
        }
        let mut value_sets: Vec<Vec<Literal>> = Vec::new();
        let mut kinds: Vec<PrimitiveKind> =
            schema.type_names().into_iter().filter_map(PrimitiveKind::from_schema_name).filter(|k| *k != PrimitiveKind::Null).collect();
        let mut docs = Vec::new();
        for member in &schema.all_of {
            if let Some(source) = self.enum_target(doc, member) {
                let values = source.schema.enum_values.iter().flatten().filter(|v| !v.is_null());
                value_sets.push(values.map(Literal::from_json).collect());
                docs.extend(member.description.as_ref().or(source.schema.description.as_ref()).cloned());
            } else if let Some(primitive) = member.bare_primitive() {
                kinds.extend(PrimitiveKind::from_schema_name(primitive));
                docs.extend(member.description.iter().cloned());
            } else if member.is_unconstrained() {
                docs.extend(member.description.iter().cloned());
            } else {
                return Ok(None);
            }
        }
        let Some((first, rest)) = value_sets.split_first() else {
            return Ok(None);
        };

        // integer narrows number; anything else must agree
        let mut narrowest: Option<PrimitiveKind> = None;
        for kind in kinds {
            narrowest = match (narrowest, kind) {
                (None, k) => Some(k),
                (Some(a), b) if a == b => Some(a),
                (Some(PrimitiveKind::Number), PrimitiveKind::Integer) | (Some(PrimitiveKind::Integer), PrimitiveKind::Number) => {
                    Some(PrimitiveKind::Integer)
                }
                (Some(a), b) => {
                    return Err(ModelError::shape(
                        self.location(doc, pointer),
                        format!("allOf mixes primitive types `{}` and `{}`", a.as_str(), b.as_str()),
                    ));
                }
            };
        }
        let fits = |literal: &Literal| match narrowest {
            None => true,
            Some(PrimitiveKind::Number) => matches!(literal, Literal::Integer(_) | Literal::Number(_)),
            Some(kind) => literal_kind(literal) == kind,
        };

        let cases: Vec<EnumCase> = first
            .iter()
            .filter(|v| fits(v) && rest.iter().all(|set| set.contains(*v)))
            .map(|v| EnumCase { name: upper_snake_case(&v.display_text()), wire_value: v.clone() })
            .collect();
        if cases.is_empty() {
            return Err(ModelError::shape(self.location(doc, pointer), "allOf intersection leaves no enum values"));
        }
        debug!(document = %self.documents[doc].id, %pointer, cases = cases.len(), "intersected enum");
        Ok(Some((EnumType { cases, ..EnumType::default() }, docs)))
    }

    /// Own properties, then inline `allOf` fragments; `$ref` members become raw parents.
    fn object(
        &mut self,
        doc: usize,
        schema: &'a Schema,
        ctx: &NameCtx,
        pointer: &str,
    ) -> Result<(ObjectType, Vec<String>), ModelError> {
        let mut object = ObjectType::default();
        let mut docs = Vec::new();
        let mut required: HashSet<String> = HashSet::new();
        self.merge_fragment(doc, schema, ctx, pointer, &mut object, &mut docs, &mut required)?;
        for property in &mut object.properties {
            if required.contains(&property.wire_name) && !property.extension {
                property.required = true;
            }
        }
        Ok((object, docs))
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_fragment(
        &mut self,
        doc: usize,
        fragment: &'a Schema,
        ctx: &NameCtx,
        pointer: &str,
        object: &mut ObjectType,
        docs: &mut Vec<String>,
        required: &mut HashSet<String>,
    ) -> Result<(), ModelError> {
        required.extend(fragment.required.iter().cloned());

        for (wire, property_schema) in &fragment.properties {
            let at = format!("{pointer}/properties/{}", escape_pointer(wire));
            let built = self.build_type(doc, property_schema, &ctx.child(wire), &at)?;
            let property = PropertyNode {
                name: property_name(wire),
                wire_name: wire.clone(),
                ty: built.ty,
                required: false,
                nullable: built.nullable,
                default_value: property_schema.default.as_ref().map(Literal::from_json),
                constant: built.constant,
                docs: property_schema.description.iter().cloned().collect(),
                extension: false,
            };
            match object.property_mut(wire) {
                Some(existing) => {
                    existing.docs.extend(property.docs);
                    existing.nullable |= property.nullable;
                    existing.default_value = existing.default_value.take().or(property.default_value);
                    existing.constant = existing.constant.take().or(property.constant);
                }
                None => object.push_property(property),
            }
        }

        if matches!(fragment.additional_properties, Some(AdditionalProperties::Allowed(true) | AdditionalProperties::Schema(_))) {
            let value = self.extension_value(doc, fragment, ctx, pointer)?;
            let map = self.graph.add(TypeNode::new(TypeKind::Map(value), self.origin(doc, pointer)));
            let wire = self.options.naming.extension_property.clone();
            object.push_property(PropertyNode {
                name: wire.clone(),
                wire_name: wire,
                ty: map,
                required: false,
                nullable: false,
                default_value: None,
                constant: None,
                docs: Vec::new(),
                extension: true,
            });
        }

        for (index, member) in fragment.all_of.iter().enumerate() {
            let at = format!("{pointer}/allOf/{index}");
            if let Some(reference) = member.reference.as_deref().filter(|_| member.is_bare_reference()) {
                let parent = self.resolve_ref(doc, reference, &at)?;
                object.parents.push(parent.ty);
            } else if member.is_object_like() || !member.all_of.is_empty() {
                check_shape(member).map_err(|reason| ModelError::shape(self.location(doc, &at), reason))?;
                docs.extend(member.description.iter().cloned());
                self.merge_fragment(doc, member, ctx, &at, object, docs, required)?;
            } else {
                return Err(ModelError::shape(self.location(doc, &at), "allOf member is not an object"));
            }
        }
        Ok(())
    }

    fn extension_value(&mut self, doc: usize, schema: &'a Schema, ctx: &NameCtx, pointer: &str) -> Result<TypeRef, ModelError> {
        match &schema.additional_properties {
            Some(AdditionalProperties::Schema(value)) => {
                let value_ctx = ctx.child(&self.options.naming.extension_property);
                Ok(self.build_type(doc, value, &value_ctx, &format!("{pointer}/additionalProperties"))?.ty)
            }
            _ => Ok(self.graph.opaque(self.origin(doc, pointer))),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SHAPE RULES
// ————————————————————————————————————————————————————————————————————————————

/// Whether a fragment becomes a declared node (object, enum, union) rather
/// than a use of some other type.
fn declares(schema: &Schema) -> bool {
    if schema.reference.is_some() {
        return false;
    }
    if schema.enum_values.is_some() || !schema.all_of.is_empty() {
        return true;
    }
    if let Some((candidates, _)) = schema.composition() {
        return candidates.iter().filter(|c| !c.is_null_only()).count() >= 2 || !schema.properties.is_empty();
    }
    schema.is_object_like()
}

/// Anonymous `{type: object}` / `{additionalProperties: X}` without own
/// properties is a plain string-keyed map.
fn is_inline_map(schema: &Schema) -> bool {
    schema.reference.is_none()
        && schema.properties.is_empty()
        && schema.all_of.is_empty()
        && schema.enum_values.is_none()
        && schema.composition().is_none()
        && schema.is_object_like()
}

fn check_shape(schema: &Schema) -> Result<(), String> {
    if let Some(values) = &schema.enum_values {
        if values.iter().all(Value::is_null) {
            return Err("enum declares no values".into());
        }
        if !schema.properties.is_empty() {
            return Err("enum cannot declare properties".into());
        }
    }
    if let Some((candidates, exclusive)) = schema.composition() {
        let keyword = if exclusive { "oneOf" } else { "anyOf" };
        if candidates.is_empty() {
            return Err(format!("{keyword} has no candidates"));
        }
        if !schema.properties.is_empty() {
            return Err(format!("{keyword} cannot be combined with properties"));
        }
    }
    let kinds: Vec<&str> = schema.type_names().into_iter().filter(|t| *t != "null").collect();
    if kinds.len() > 1 {
        return Err(format!("multiple non-null types {kinds:?}"));
    }
    if matches!(schema.additional_properties, Some(AdditionalProperties::Allowed(true) | AdditionalProperties::Schema(_)))
        && kinds.first().is_some_and(|k| *k != "object")
    {
        return Err(format!("additionalProperties on non-object type `{}`", kinds[0]));
    }
    Ok(())
}

fn literal_kind(literal: &Literal) -> PrimitiveKind {
    match literal {
        Literal::Null => PrimitiveKind::Null,
        Literal::Bool(_) => PrimitiveKind::Boolean,
        Literal::Integer(_) => PrimitiveKind::Integer,
        Literal::Number(_) => PrimitiveKind::Number,
        Literal::String(_) => PrimitiveKind::String,
        Literal::Raw(_) => PrimitiveKind::Any,
    }
}

fn property_name(wire: &str) -> String {
    let name = camel_case(wire);
    if name.is_empty() { wire.to_string() } else { name }
}

fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ————————————————————————————————————————————————————————————————————————————
// RAW INHERITANCE
// ————————————————————————————————————————————————————————————————————————————

/// Parents must be objects and acyclic. Then every redeclared property is
/// prefixed with the docs each parent chain contributes for it, in parent
/// declaration order.
fn check_parents(graph: &mut TypeGraph) -> Result<(), ModelError> {
    let objects: Vec<TypeRef> = graph.live().filter(|(_, n)| n.kind.as_object().is_some()).map(|(r, _)| r).collect();
    for &r in &objects {
        for parent in graph.object(r).map(|o| o.parents.clone()).unwrap_or_default() {
            if graph.object(parent).is_none() {
                return Err(ModelError::shape(
                    graph.location(r),
                    format!("allOf member `{}` is not an object", graph.describe(parent)),
                ));
            }
        }
    }

    let order = parents_first(graph, &objects)?;
    for r in order {
        let parents = graph.object(r).map(|o| o.parents.clone()).unwrap_or_default();
        if parents.is_empty() {
            continue;
        }
        let wires: Vec<String> = graph.object(r).map(|o| o.properties.iter().map(|p| p.wire_name.clone()).collect()).unwrap_or_default();
        for wire in wires {
            let inherited: Option<Vec<String>> = parents
                .iter()
                .filter_map(|p| visible_docs(graph, *p, &wire, 0))
                .reduce(|mut all, next| {
                    all.extend(next);
                    all
                });
            if let (Some(mut docs), Some(object)) = (inherited, graph.object_mut(r)) {
                if let Some(property) = object.property_mut(&wire) {
                    docs.append(&mut property.docs);
                    property.docs = docs;
                }
            }
        }
    }
    Ok(())
}

fn visible_docs(graph: &TypeGraph, r: TypeRef, wire: &str, depth: usize) -> Option<Vec<String>> {
    let object = graph.object(r)?;
    if let Some(property) = object.property(wire) {
        return Some(property.docs.clone());
    }
    if depth > 64 {
        return None;
    }
    object.parents.iter().filter_map(|p| visible_docs(graph, *p, wire, depth + 1)).reduce(|mut all, next| {
        all.extend(next);
        all
    })
}

/// Topological order over raw parents; a cycle is a shape error.
pub(crate) fn parents_first(graph: &TypeGraph, objects: &[TypeRef]) -> Result<Vec<TypeRef>, ModelError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }
    fn visit(
        graph: &TypeGraph,
        r: TypeRef,
        marks: &mut HashMap<TypeRef, Mark>,
        out: &mut Vec<TypeRef>,
    ) -> Result<(), ModelError> {
        let r = graph.resolve(r);
        match marks.get(&r) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Open) => {
                return Err(ModelError::shape(
                    graph.location(r),
                    format!("inheritance cycle through `{}`", graph.describe(r)),
                ));
            }
            None => {}
        }
        marks.insert(r, Mark::Open);
        for parent in graph.object(r).map(|o| o.parents.clone()).unwrap_or_default() {
            visit(graph, parent, marks, out)?;
        }
        marks.insert(r, Mark::Done);
        out.push(r);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut out = Vec::with_capacity(objects.len());
    for &r in objects {
        visit(graph, r, &mut marks, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> SchemaDocument {
        serde_json::from_value(value).unwrap()
    }

    fn find(graph: &TypeGraph, name: &str) -> TypeRef {
        graph
            .live()
            .find(|(_, n)| n.name.as_ref().is_some_and(|t| t.hint.render() == name))
            .map(|(r, _)| r)
            .unwrap_or_else(|| panic!("no type named {name}"))
    }

    fn build_one(value: Value) -> Result<TypeGraph, ModelError> {
        build(&[doc(value)], &Options::default())
    }

    #[test]
    fn objects_properties_and_extension_bag() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Thing": {
                    "type": "object",
                    "description": "A thing.",
                    "properties": {
                        "order_id": { "type": "string", "description": "Id." },
                        "count": { "type": ["integer", "null"], "default": 3 }
                    },
                    "required": ["order_id"],
                    "additionalProperties": { "type": "integer" }
                }
            }
        }))
        .unwrap();
        let thing = find(&graph, "Thing");
        let object = graph.object(thing).unwrap();
        let wires: Vec<_> = object.properties.iter().map(|p| p.wire_name.as_str()).collect();
        assert_eq!(wires, ["order_id", "count", "additionalProperties"]);
        assert_eq!(object.properties[0].name, "orderId");
        assert!(object.properties[0].required);
        assert!(object.properties[1].nullable);
        assert_eq!(object.properties[1].default_value, Some(Literal::Integer(3)));
        assert!(object.properties[2].extension);
        assert!(matches!(graph.kind(object.properties[2].ty), TypeKind::Map(_)));
        assert_eq!(graph.node(thing).docs, vec!["A thing.".to_string()]);
        graph.validate().unwrap();
    }

    #[test]
    fn all_of_refs_become_raw_parents_and_docs_concatenate() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Base": { "type": "object", "properties": { "id": { "type": "string", "description": "Base id." } } },
                "Other": { "type": "object", "properties": { "x": { "type": "integer" } } },
                "Child": {
                    "allOf": [
                        { "$ref": "#/components/schemas/Base" },
                        { "$ref": "Other" },
                        { "properties": { "id": { "type": "string", "description": "Child id." } } }
                    ]
                }
            }
        }))
        .unwrap();
        let (base, other, child) = (find(&graph, "Base"), find(&graph, "Other"), find(&graph, "Child"));
        let object = graph.object(child).unwrap();
        assert_eq!(object.parents, vec![base, other]);
        assert_eq!(object.property("id").unwrap().docs, vec!["Base id.".to_string(), "Child id.".to_string()]);
    }

    #[test]
    fn redeclared_property_collects_docs_from_every_parent() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Root": { "type": "object", "properties": { "id": { "type": "string", "description": "docRoot" } } },
                "A": { "type": "object", "properties": { "id": { "type": "string", "description": "docA" } } },
                "B": { "allOf": [{ "$ref": "Root" }] },
                "Other": { "type": "object", "properties": { "id": { "type": "string", "description": "docB" } } },
                "Sibling": {
                    "allOf": [
                        { "$ref": "A" },
                        { "$ref": "Other" },
                        { "properties": { "id": { "type": "string", "description": "docC" } } }
                    ]
                },
                "Child": {
                    "allOf": [
                        { "$ref": "A" },
                        { "$ref": "B" },
                        { "properties": { "id": { "type": "string", "description": "docC" } } }
                    ]
                }
            }
        }))
        .unwrap();
        let child = graph.object(find(&graph, "Child")).unwrap();
        assert_eq!(child.property("id").unwrap().docs, ["docA", "docRoot", "docC"]);
        let sibling = graph.object(find(&graph, "Sibling")).unwrap();
        assert_eq!(sibling.property("id").unwrap().docs, ["docA", "docB", "docC"]);
    }

    #[test]
    fn aliases_and_nullable_collapse_get_no_node() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Target": { "type": "object", "properties": { "a": { "type": "string" } } },
                "Alias": { "$ref": "Target" },
                "Holder": {
                    "type": "object",
                    "properties": {
                        "maybe": { "oneOf": [{ "$ref": "Alias" }, { "type": "null" }] }
                    }
                }
            }
        }))
        .unwrap();
        let holder = graph.object(find(&graph, "Holder")).unwrap();
        let maybe = holder.property("maybe").unwrap();
        assert_eq!(maybe.ty, find(&graph, "Target"));
        assert!(maybe.nullable);
        assert!(graph.live().all(|(_, n)| n.name.as_ref().is_none_or(|t| t.hint.render() != "Alias")));
    }

    #[test]
    fn open_enum_from_composition() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Species": { "enum": ["SpeciesA", "SpeciesB"] },
                "Tag": { "enum": ["TagA", "TagB"] },
                "TagOrSpeciesOrString": { "anyOf": [{ "$ref": "Tag" }, { "$ref": "Species" }, { "type": "string" }] }
            }
        }))
        .unwrap();
        let open = find(&graph, "TagOrSpeciesOrString");
        let TypeKind::Enum(e) = graph.kind(open) else { panic!("expected enum") };
        assert_eq!(e.cases.len(), 4);
        assert_eq!(e.cases[2].name, "SPECIES_A");
        assert_eq!(e.unknown, UnknownValueStrategy::SentinelRegistry { fallback: PrimitiveKind::String });
        assert_eq!(e.variants.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(), ["Tag", "Species"]);
        assert_eq!(e.variants[1].source, Some(find(&graph, "Species")));
    }

    #[test]
    fn enum_intersection_keeps_shared_values_and_every_description() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Status": { "description": "Order status", "enum": ["open", "closed", "void", 7] },
                "Active": {
                    "description": "Statuses still in play",
                    "allOf": [
                        { "$ref": "Status" },
                        { "enum": ["open", "void", "held", 7], "description": "Reportable" },
                        { "type": "string" },
                        { "description": "Never archived" }
                    ]
                }
            }
        }))
        .unwrap();
        let active = find(&graph, "Active");
        let TypeKind::Enum(e) = graph.kind(active) else { panic!("expected enum") };
        let wires: Vec<String> = e.cases.iter().map(|c| c.wire_value.display_text()).collect();
        assert_eq!(wires, ["open", "void"]);
        assert_eq!(e.unknown, UnknownValueStrategy::default());
        assert_eq!(graph.node(active).docs, ["Statuses still in play", "Order status", "Reportable", "Never archived"]);
    }

    #[test]
    fn one_of_builds_union_with_inline_candidates() {
        let graph = build_one(json!({
            "id": "a.json",
            "schemas": {
                "Data": {
                    "oneOf": [
                        { "title": "AbortData", "type": "object", "properties": { "orderid": { "type": "string" } } },
                        { "title": "DefaultData", "type": "object", "properties": { "inlineResult": { "type": "boolean" } } }
                    ]
                }
            }
        }))
        .unwrap();
        let TypeKind::Union(u) = graph.kind(find(&graph, "Data")) else { panic!("expected union") };
        assert!(u.exclusive);
        assert_eq!(u.candidates, vec![find(&graph, "AbortData"), find(&graph, "DefaultData")]);
    }

    #[test]
    fn shape_errors() {
        let cases = [
            json!({ "Bad": { "$ref": "Missing" } }),
            json!({ "A": { "$ref": "B" }, "B": { "$ref": "A" } }),
            json!({ "Bad": { "enum": [] } }),
            json!({ "Bad": { "enum": ["a", "a"] } }),
            json!({ "Bad": { "enum": ["a"], "properties": { "x": {} } } }),
            json!({ "Bad": { "oneOf": [] } }),
            json!({ "Bad": { "type": ["string", "integer"] } }),
            json!({ "Bad": { "allOf": [{ "type": "string" }] } }),
            json!({ "Bad": { "type": "string", "additionalProperties": true } }),
            json!({ "S": { "type": "string" }, "Bad": { "allOf": [{ "$ref": "S" }] } }),
            json!({ "A": { "allOf": [{ "$ref": "B" }] }, "B": { "allOf": [{ "$ref": "A" }] } }),
            json!({ "Bad": { "oneOf": [{ "enum": ["a", "b"] }, { "type": "string" }, { "type": "integer" }] } }),
            json!({ "Bad": { "allOf": [{ "enum": ["a", 1] }, { "type": "string" }, { "type": "integer" }] } }),
            json!({ "Bad": { "allOf": [{ "enum": ["a"] }, { "enum": ["b"] }] } }),
        ];
        for schemas in cases {
            let result = build_one(json!({ "id": "a.json", "schemas": schemas.clone() }));
            assert!(matches!(result, Err(ModelError::SchemaShapeError { .. })), "{schemas} -> {result:?}");
        }
    }

    #[test]
    fn cross_document_reference() {
        let a = doc(json!({ "id": "base/pkg.json", "schemas": { "Shared": { "type": "object" } } }));
        let b = doc(json!({
            "id": "other/pkg.json",
            "schemas": { "User": { "type": "object", "properties": { "s": { "$ref": "base/pkg.json#/definitions/Shared" } } } }
        }));
        let graph = build(&[a, b], &Options::default()).unwrap();
        let user = graph.object(find(&graph, "User")).unwrap();
        assert_eq!(user.property("s").unwrap().ty, find(&graph, "Shared"));
    }

    #[test]
    fn jsonrpc_envelopes_have_roles_and_constants() {
        let graph = build_one(json!({
            "id": "api.json",
            "methods": [{ "name": "list_things", "params": [], "errors": [{ "code": 100 }] }]
        }))
        .unwrap();
        let request = find(&graph, "ListThingsRequest");
        assert_eq!(graph.node(request).role, TypeRole::Request);
        let method = graph.object(request).unwrap().property("method").unwrap();
        assert_eq!(method.constant, Some(Literal::from("list_things")));
        let error = find(&graph, "ListThingsError100Error");
        assert_eq!(graph.node(error).role, TypeRole::Error);
        let message = graph.object(error).unwrap().property("message").unwrap();
        assert_eq!(message.default_value, Some(Literal::from(UNKNOWN_ERROR_MESSAGE)));
        graph.validate().unwrap();
    }
}
