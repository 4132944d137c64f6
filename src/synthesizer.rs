//! Type synthesis - maps JSON Schema nodes onto GraphQL types.
//!
//! Every object and enum node is identified by `(location, pointer, direction)`,
//! where the pointer is the node's JSON pointer inside its document. A node
//! reached through a `$ref` has the same identity as when visited in place. The
//! identity is registered before the node's children are visited, so a
//! repeated visit (including a cyclic `$ref`) returns the same type name
//! instead of creating a duplicate.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::builder::{SchemaBuilder, TypeRegistry};
use crate::error::SchemaError;
use crate::loader::{base_name, navigate_fragment, resolve_location, split_ref, FileCache};
use crate::scalars::{self, ScalarRegistry};
use crate::types::{
    json_type_name, Direction, EnumValueDefinition, FieldDefinition, TypeDescriptor, TypeIdentity,
    TypeKind, TypeRef,
};

/// Where a node lives and how types under it are named.
#[derive(Debug, Clone)]
struct Scope {
    location: String,
    prefix: String,
    direction: Direction,
}

/// Position of a node: its JSON pointer inside the document and the dotted
/// path used for naming.
#[derive(Debug, Clone, Default)]
struct NodePath {
    identity: String,
    name: String,
}

impl NodePath {
    fn property(&self, name: &str) -> Self {
        let segment = format!("properties/{}", escape_pointer_segment(name));
        Self {
            identity: join_path(&self.identity, &segment, '/'),
            name: join_path(&self.name, name, '.'),
        }
    }

    /// Array items share the naming path of the array.
    fn items(&self, tuple: bool) -> Self {
        let segment = if tuple { "items/0" } else { "items" };
        Self {
            identity: join_path(&self.identity, segment, '/'),
            name: self.name.clone(),
        }
    }

    fn all_of_branch(&self, index: usize) -> Self {
        Self {
            identity: join_path(&self.identity, &format!("allOf/{}", index), '/'),
            name: self.name.clone(),
        }
    }
}

fn join_path(base: &str, segment: &str, separator: char) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", base, separator, segment)
    }
}

fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// A property gathered from an object schema and its `allOf` branches,
/// with the position it was declared at.
struct MergedProperty {
    schema: Value,
    scope: Scope,
    path: NodePath,
}

/// Synthesizes types into a [`SchemaBuilder`], resolving `$ref`s from a [`FileCache`].
///
/// Referenced documents must already be in the cache (see
/// [`crate::loader::prefetch_refs`]).
pub struct TypeSynthesizer<'a> {
    builder: &'a SchemaBuilder,
    scalars: &'a ScalarRegistry,
    files: &'a FileCache,
}

impl<'a> TypeSynthesizer<'a> {
    pub fn new(
        builder: &'a SchemaBuilder,
        scalars: &'a ScalarRegistry,
        files: &'a FileCache,
    ) -> Self {
        Self {
            builder,
            scalars,
            files,
        }
    }

    /// Synthesize the type of `node`.
    ///
    /// * `pointer` - JSON pointer of the node inside its document (empty for the root)
    /// * `name_prefix` - prefix for derived names, usually the document's base name
    /// * `location` - file path or URL the node was loaded from
    /// * `explicit_name` - used verbatim for the root type when given
    pub fn synthesize(
        &self,
        node: &Value,
        pointer: &str,
        name_prefix: &str,
        location: &str,
        direction: Direction,
        explicit_name: Option<&str>,
    ) -> Result<TypeRef, SchemaError> {
        let scope = Scope {
            location: location.to_string(),
            prefix: explicit_name.unwrap_or(name_prefix).to_string(),
            direction,
        };
        let path = pointer_path(pointer);

        let mut registry = self.builder.registry();
        self.visit(&mut registry, node, &scope, &path, explicit_name)
    }

    fn visit(
        &self,
        registry: &mut TypeRegistry<'_>,
        node: &Value,
        scope: &Scope,
        path: &NodePath,
        explicit_name: Option<&str>,
    ) -> Result<TypeRef, SchemaError> {
        let Value::Object(schema) = node else {
            // `true`, `{}` and other non-object schemas accept anything.
            return Ok(TypeRef::named(scalars::JSON));
        };

        if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
            return self.visit_ref(registry, reference, scope, explicit_name);
        }

        if let Some(values) = schema.get("enum").and_then(|e| e.as_array()) {
            if !values.is_empty() {
                return self.visit_enum(registry, schema, values, scope, path, explicit_name);
            }
        }

        match schema_type(schema).as_deref() {
            Some("object") => self.visit_object(registry, schema, scope, path, explicit_name),
            Some("array") => {
                let (items, item_path) = match schema.get("items") {
                    // First element wins for tuple-style items.
                    Some(Value::Array(items)) => (items.first(), path.items(true)),
                    other => (other, path.items(false)),
                };
                let item_type = match items {
                    Some(items) => self.visit(registry, items, scope, &item_path, explicit_name)?,
                    None => TypeRef::named(scalars::JSON),
                };
                Ok(item_type.list())
            }
            Some("string") => Ok(TypeRef::named(
                schema
                    .get("format")
                    .and_then(|f| f.as_str())
                    .and_then(|f| self.scalars.for_format(f))
                    .unwrap_or("String"),
            )),
            Some("integer") => Ok(TypeRef::named("Int")),
            Some("number") => Ok(TypeRef::named("Float")),
            Some("boolean") => Ok(TypeRef::named("Boolean")),
            Some("null") => Ok(TypeRef::named(scalars::VOID)),
            other => {
                if let Some(other) = other {
                    tracing::debug!(location = %scope.location, path = %path.identity, schema_type = other, "unrecognized schema type, using JSON");
                }
                Ok(TypeRef::named(scalars::JSON))
            }
        }
    }

    fn visit_ref(
        &self,
        registry: &mut TypeRegistry<'_>,
        reference: &str,
        scope: &Scope,
        explicit_name: Option<&str>,
    ) -> Result<TypeRef, SchemaError> {
        let (file_part, fragment) = split_ref(reference);
        let fragment = fragment.unwrap_or("#");

        let (location, prefix) = if file_part.is_empty() {
            (scope.location.clone(), scope.prefix.clone())
        } else {
            let location = resolve_location(&scope.location, file_part);
            let prefix = base_name(&location);
            (location, prefix)
        };

        let document: Arc<Value> =
            self.files
                .get(&location)
                .ok_or_else(|| SchemaError::UnresolvedRef {
                    reference: reference.to_string(),
                    location: scope.location.clone(),
                })?;
        let target = navigate_fragment(&document, fragment).ok_or_else(|| {
            SchemaError::InvalidPointer {
                pointer: fragment.to_string(),
                location: location.clone(),
            }
        })?;

        let target_scope = Scope {
            location,
            prefix,
            direction: scope.direction,
        };
        self.visit(
            registry,
            target,
            &target_scope,
            &pointer_path(fragment),
            explicit_name,
        )
    }

    fn visit_object(
        &self,
        registry: &mut TypeRegistry<'_>,
        schema: &Map<String, Value>,
        scope: &Scope,
        path: &NodePath,
        explicit_name: Option<&str>,
    ) -> Result<TypeRef, SchemaError> {
        let (properties, required) = self.collect_properties(schema, scope, path)?;
        if properties.is_empty() {
            // Free-form objects and maps have no fixed fields.
            return Ok(TypeRef::named(scalars::JSON));
        }

        let identity = self.identity(scope, path);
        if let Some(existing) = registry.lookup(&identity) {
            if explicit_name.is_some_and(|name| name != existing) {
                tracing::warn!(%identity, existing = %existing, "schema already synthesized under another name");
            }
            return Ok(TypeRef::Named(existing));
        }

        let name = explicit_name
            .map(str::to_string)
            .unwrap_or_else(|| derive_name(&scope.prefix, &path.name, scope.direction));
        let kind = match scope.direction {
            Direction::Input => TypeKind::InputObject,
            Direction::Output => TypeKind::Object,
        };

        registry.claim(identity, &name)?;
        let mut descriptor = TypeDescriptor::new(name.clone(), kind);
        descriptor.description = description(schema);
        registry.put_type(descriptor.clone());

        let mut field_names = HashSet::new();
        for (property, merged) in &properties {
            let mut ty = self.visit(
                registry,
                &merged.schema,
                &merged.scope,
                &merged.path.property(property),
                None,
            )?;
            if required.contains(property.as_str()) {
                ty = ty.non_null();
            }

            let field_name = unique_name(sanitize_name(property), &mut field_names);
            let source_name = (field_name != *property).then(|| property.clone());
            descriptor.fields.push(
                FieldDefinition::new(field_name, ty)
                    .with_description(merged.schema.as_object().and_then(description))
                    .with_source_name(source_name),
            );
        }

        tracing::debug!(name = %name, fields = descriptor.fields.len(), "synthesized type");
        registry.put_type(descriptor);
        Ok(TypeRef::Named(name))
    }

    /// Properties and required names of an object schema, merging `allOf` branches.
    ///
    /// Each property keeps the scope and pointer it was declared at, so refs
    /// inside properties pulled in from another document resolve against it.
    fn collect_properties(
        &self,
        schema: &Map<String, Value>,
        scope: &Scope,
        path: &NodePath,
    ) -> Result<(IndexMap<String, MergedProperty>, HashSet<String>), SchemaError> {
        let mut properties = IndexMap::new();
        let mut required = HashSet::new();
        self.merge_properties(schema, scope, path, &mut properties, &mut required, 0)?;
        Ok((properties, required))
    }

    fn merge_properties(
        &self,
        schema: &Map<String, Value>,
        scope: &Scope,
        path: &NodePath,
        properties: &mut IndexMap<String, MergedProperty>,
        required: &mut HashSet<String>,
        depth: usize,
    ) -> Result<(), SchemaError> {
        // allOf chains through refs can loop; deep nesting is not meaningful.
        if depth > 32 {
            return Ok(());
        }

        if let Some(Value::Object(props)) = schema.get("properties") {
            for (name, value) in props {
                properties
                    .entry(name.clone())
                    .or_insert_with(|| MergedProperty {
                        schema: value.clone(),
                        scope: scope.clone(),
                        path: path.clone(),
                    });
            }
        }
        if let Some(Value::Array(names)) = schema.get("required") {
            required.extend(names.iter().filter_map(|n| n.as_str()).map(String::from));
        }

        if let Some(Value::Array(branches)) = schema.get("allOf") {
            for (index, branch) in branches.iter().enumerate() {
                let Some(branch) = branch.as_object() else {
                    continue;
                };
                match branch.get("$ref").and_then(|r| r.as_str()) {
                    Some(reference) => {
                        let (file_part, fragment) = split_ref(reference);
                        let target_scope = if file_part.is_empty() {
                            scope.clone()
                        } else {
                            let location = resolve_location(&scope.location, file_part);
                            Scope {
                                prefix: base_name(&location),
                                location,
                                direction: scope.direction,
                            }
                        };
                        let document = self.files.get(&target_scope.location).ok_or_else(|| {
                            SchemaError::UnresolvedRef {
                                reference: reference.to_string(),
                                location: scope.location.clone(),
                            }
                        })?;
                        let fragment = fragment.unwrap_or("#");
                        let target = navigate_fragment(&document, fragment)
                            .and_then(|t| t.as_object())
                            .ok_or_else(|| SchemaError::InvalidPointer {
                                pointer: fragment.to_string(),
                                location: target_scope.location.clone(),
                            })?;
                        self.merge_properties(
                            target,
                            &target_scope,
                            &pointer_path(fragment),
                            properties,
                            required,
                            depth + 1,
                        )?;
                    }
                    None => self.merge_properties(
                        branch,
                        scope,
                        &path.all_of_branch(index),
                        properties,
                        required,
                        depth + 1,
                    )?,
                }
            }
        }
        Ok(())
    }

    fn visit_enum(
        &self,
        registry: &mut TypeRegistry<'_>,
        schema: &Map<String, Value>,
        values: &[Value],
        scope: &Scope,
        path: &NodePath,
        explicit_name: Option<&str>,
    ) -> Result<TypeRef, SchemaError> {
        let identity = self.identity(scope, path);
        if let Some(existing) = registry.lookup(&identity) {
            return Ok(TypeRef::Named(existing));
        }

        let name = explicit_name
            .map(str::to_string)
            .unwrap_or_else(|| derive_name(&scope.prefix, &path.name, scope.direction));
        registry.claim(identity, &name)?;

        let mut descriptor = TypeDescriptor::new(name.clone(), TypeKind::Enum);
        descriptor.description = description(schema);
        descriptor.values = enum_values(values);
        registry.put_type(descriptor);
        Ok(TypeRef::Named(name))
    }

    fn identity(&self, scope: &Scope, path: &NodePath) -> TypeIdentity {
        TypeIdentity {
            location: scope.location.clone(),
            path: path.identity.clone(),
            direction: scope.direction,
        }
    }
}

/// Declared type of a schema node, inferring it from the keywords present.
fn schema_type(schema: &Map<String, Value>) -> Option<String> {
    match schema.get("type") {
        Some(Value::String(ty)) => return Some(ty.clone()),
        // ["string", "null"] and friends: the first non-null member decides.
        Some(Value::Array(types)) => {
            let ty = types
                .iter()
                .filter_map(|t| t.as_str())
                .find(|t| *t != "null")
                .or_else(|| types.iter().filter_map(|t| t.as_str()).next());
            return ty.map(String::from);
        }
        Some(other) => {
            tracing::debug!(actual = json_type_name(other), "ignoring non-string schema type");
        }
        None => {}
    }

    if schema.contains_key("properties") || schema.contains_key("allOf") {
        Some("object".to_string())
    } else if schema.contains_key("items") {
        Some("array".to_string())
    } else {
        None
    }
}

fn description(schema: &Map<String, Value>) -> Option<String> {
    schema
        .get("description")
        .and_then(|d| d.as_str())
        .map(String::from)
}

/// Position of the node a JSON pointer fragment names.
///
/// The naming path keeps property and definition names and drops the
/// keywords that contain them, so `#/properties/owner` is named like the
/// `owner` property itself.
fn pointer_path(fragment: &str) -> NodePath {
    let segments: Vec<&str> = fragment
        .trim_start_matches('#')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let mut names = Vec::new();
    let mut iter = segments.iter().map(|s| s.replace("~1", "/").replace("~0", "~")).peekable();
    while let Some(segment) = iter.next() {
        match segment.as_str() {
            "properties" | "definitions" | "$defs" => names.extend(iter.next()),
            "items" | "allOf" => {
                if iter.peek().is_some_and(|s| s.parse::<usize>().is_ok()) {
                    iter.next();
                }
            }
            _ => names.push(segment),
        }
    }

    NodePath {
        identity: segments.join("/"),
        name: names.join("."),
    }
}

/// `<Prefix>_<Segment>_...`, with an `Input` suffix for input types.
pub fn derive_name(prefix: &str, path: &str, direction: Direction) -> String {
    let mut parts = vec![pascal_case(prefix)];
    parts.extend(
        path.split('.')
            .filter(|s| !s.is_empty())
            .map(pascal_case),
    );
    let mut name = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        name.push_str("Type");
    }
    if direction == Direction::Input {
        name.push_str("Input");
    }
    name
}

fn pascal_case(s: &str) -> String {
    let mut out = String::new();
    for word in s.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Replace characters that are not valid in a GraphQL name.
///
/// Object fields whose name changes keep the original key as
/// [`FieldDefinition::source_name`]; the composed schema renames payload keys
/// to match.
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        return "_EMPTY".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", name, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Enum members for a list of literals. Each member keeps its literal.
fn enum_values(values: &[Value]) -> Vec<EnumValueDefinition> {
    let mut taken = HashSet::new();
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|value| {
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let mut name = sanitize_name(&raw);
            // Reserved words cannot be enum members.
            if matches!(name.as_str(), "true" | "false" | "null") {
                name = name.to_ascii_uppercase();
            }
            EnumValueDefinition {
                name: unique_name(name, &mut taken),
                value: value.clone(),
            }
        })
        .collect()
}
