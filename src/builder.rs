//! Schema builder: the shared type registry and the composed schema it produces.
//!
//! Type synthesis claims names through [`TypeRegistry`], which maps every
//! `(location, pointer, direction)` identity to exactly one type name. Operation
//! compilation registers root fields together with their resolvers. The base
//! GraphQL SDL, when configured, is imported before anything else.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use graphql_parser::schema::{self as sdl, Definition, TypeDefinition, TypeExtension};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ResolverError, SchemaError};
use crate::executor::{OperationResolver, ResolveParams, ResolverOutput};
use crate::scalars::{ScalarRegistry, BUILT_IN_SCALARS};
use crate::types::{
    ArgumentDefinition, EnumValueDefinition, FieldDefinition, OperationKind, TypeDescriptor,
    TypeIdentity, TypeKind, TypeRef,
};

const ROOT_KINDS: [OperationKind; 3] = [
    OperationKind::Query,
    OperationKind::Mutation,
    OperationKind::Subscription,
];

/// A field on one of the root operation types.
#[derive(Clone)]
pub struct RootField {
    pub definition: FieldDefinition,
    /// Base-schema fields have no resolver of their own.
    pub resolver: Option<Arc<OperationResolver>>,
}

#[derive(Default)]
struct BuilderState {
    types: IndexMap<String, TypeDescriptor>,
    /// Who claimed each type name, for conflict messages.
    owners: HashMap<String, String>,
    identities: HashMap<TypeIdentity, String>,
    roots: HashMap<OperationKind, IndexMap<String, RootField>>,
}

/// Accumulates types and root fields for one compilation.
#[derive(Default)]
pub struct SchemaBuilder {
    state: Mutex<BuilderState>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BuilderState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusive access to the type registry. Must not be held across an `.await`.
    pub fn registry(&self) -> TypeRegistry<'_> {
        TypeRegistry { state: self.lock() }
    }

    /// Register every scalar of `registry`.
    pub fn add_scalars(&self, registry: &ScalarRegistry) {
        let mut state = self.lock();
        for scalar in registry.scalars() {
            let mut descriptor = TypeDescriptor::new(scalar.name, TypeKind::Scalar);
            descriptor.description = Some(scalar.description.to_string());
            state
                .owners
                .entry(scalar.name.to_string())
                .or_insert_with(|| "scalar registry".to_string());
            state
                .types
                .entry(scalar.name.to_string())
                .or_insert(descriptor);
        }
    }

    /// Register a root field. A later registration under the same name replaces it.
    pub fn add_field(
        &self,
        kind: OperationKind,
        definition: FieldDefinition,
        resolver: Option<Arc<OperationResolver>>,
    ) {
        let mut state = self.lock();
        let fields = state.roots.entry(kind).or_default();
        if fields.contains_key(&definition.name) {
            tracing::warn!(kind = %kind, field = %definition.name, "replacing existing root field");
        }
        fields.insert(
            definition.name.clone(),
            RootField {
                definition,
                resolver,
            },
        );
    }

    /// Import the type definitions of a GraphQL SDL document.
    pub fn add_sdl(&self, location: &str, source: &str) -> Result<(), SchemaError> {
        let document =
            sdl::parse_schema::<String>(source).map_err(|e| SchemaError::InvalidSdl {
                location: location.to_string(),
                message: e.to_string(),
            })?;

        for definition in document.definitions {
            match definition {
                Definition::TypeDefinition(typedef) => self.add_type_definition(location, typedef)?,
                Definition::TypeExtension(TypeExtension::Object(extension)) => {
                    let fields = extension.fields.into_iter().map(convert_field).collect();
                    self.add_object_fields(location, extension.name, None, fields)?;
                }
                Definition::TypeExtension(_) => {
                    tracing::warn!(location, "ignoring non-object type extension in base schema");
                }
                Definition::SchemaDefinition(_) | Definition::DirectiveDefinition(_) => {}
            }
        }
        Ok(())
    }

    fn add_type_definition(
        &self,
        location: &str,
        typedef: TypeDefinition<'_, String>,
    ) -> Result<(), SchemaError> {
        let descriptor = match typedef {
            TypeDefinition::Object(object) => {
                let fields = object.fields.into_iter().map(convert_field).collect();
                return self.add_object_fields(location, object.name, object.description, fields);
            }
            TypeDefinition::InputObject(input) => {
                let mut descriptor = TypeDescriptor::new(input.name, TypeKind::InputObject);
                descriptor.description = input.description;
                descriptor.fields = input
                    .fields
                    .into_iter()
                    .map(|field| {
                        FieldDefinition::new(field.name, convert_type(field.value_type))
                            .with_description(field.description)
                    })
                    .collect();
                descriptor
            }
            TypeDefinition::Enum(enum_type) => {
                let mut descriptor = TypeDescriptor::new(enum_type.name, TypeKind::Enum);
                descriptor.description = enum_type.description;
                descriptor.values = enum_type
                    .values
                    .into_iter()
                    .map(|value| EnumValueDefinition {
                        value: Value::String(value.name.clone()),
                        name: value.name,
                    })
                    .collect();
                descriptor
            }
            TypeDefinition::Scalar(scalar) => {
                let mut descriptor = TypeDescriptor::new(scalar.name, TypeKind::Scalar);
                descriptor.description = scalar.description;
                descriptor
            }
            TypeDefinition::Interface(iface) => {
                tracing::warn!(location, name = %iface.name, "interfaces are not supported; skipping");
                return Ok(());
            }
            TypeDefinition::Union(union_type) => {
                tracing::warn!(location, name = %union_type.name, "unions are not supported; skipping");
                return Ok(());
            }
        };

        let mut state = self.lock();
        claim_name(&mut state, &descriptor.name, format!("{}#{}", location, descriptor.name))?;
        state.types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    fn add_object_fields(
        &self,
        location: &str,
        name: String,
        description: Option<String>,
        fields: Vec<FieldDefinition>,
    ) -> Result<(), SchemaError> {
        if let Some(kind) = OperationKind::parse(&name).filter(|k| k.as_str() == name) {
            for field in fields {
                self.add_field(kind, field, None);
            }
            return Ok(());
        }

        let mut state = self.lock();
        let owner = format!("{}#{}", location, name);
        if state.owners.get(&name) != Some(&owner) {
            claim_name(&mut state, &name, owner)?;
        }
        let descriptor = state
            .types
            .entry(name.clone())
            .or_insert_with(|| TypeDescriptor::new(name, TypeKind::Object));
        if description.is_some() {
            descriptor.description = description;
        }
        descriptor.fields.extend(fields);
        Ok(())
    }

    /// Validate type references and produce the composed schema.
    pub fn build_schema(&self) -> Result<ComposedSchema, SchemaError> {
        let state = self.lock();

        let query_fields = state
            .roots
            .get(&OperationKind::Query)
            .map(|f| f.len())
            .unwrap_or(0);
        if query_fields == 0 {
            return Err(SchemaError::EmptyQuery);
        }

        let known = |name: &str| BUILT_IN_SCALARS.contains(&name) || state.types.contains_key(name);

        for descriptor in state.types.values() {
            for field in &descriptor.fields {
                check_field(&descriptor.name, field, &known)?;
            }
        }
        for kind in ROOT_KINDS {
            if let Some(fields) = state.roots.get(&kind) {
                for root in fields.values() {
                    check_field(kind.as_str(), &root.definition, &known)?;
                }
            }
        }

        Ok(ComposedSchema {
            types: state.types.clone(),
            roots: state.roots.clone(),
        })
    }
}

fn check_field(
    parent: &str,
    field: &FieldDefinition,
    known: &dyn Fn(&str) -> bool,
) -> Result<(), SchemaError> {
    let referenced = std::iter::once(&field.ty).chain(field.args.iter().map(|a| &a.ty));
    for ty in referenced {
        if !known(ty.base_name()) {
            return Err(SchemaError::UnknownType {
                parent: parent.to_string(),
                field: field.name.clone(),
                name: ty.base_name().to_string(),
            });
        }
    }
    Ok(())
}

fn claim_name(state: &mut BuilderState, name: &str, owner: String) -> Result<(), SchemaError> {
    if let Some(existing) = state.owners.get(name) {
        return Err(SchemaError::TypeNameConflict {
            name: name.to_string(),
            existing: existing.clone(),
            incoming: owner,
        });
    }
    state.owners.insert(name.to_string(), owner);
    Ok(())
}

fn convert_type(ty: sdl::Type<'_, String>) -> TypeRef {
    match ty {
        sdl::Type::NamedType(name) => TypeRef::Named(name),
        sdl::Type::ListType(inner) => convert_type(*inner).list(),
        sdl::Type::NonNullType(inner) => convert_type(*inner).non_null(),
    }
}

fn convert_field(field: sdl::Field<'_, String>) -> FieldDefinition {
    FieldDefinition {
        name: field.name,
        ty: convert_type(field.field_type),
        description: field.description,
        args: field
            .arguments
            .into_iter()
            .map(|arg| ArgumentDefinition {
                name: arg.name,
                ty: convert_type(arg.value_type),
                description: arg.description,
            })
            .collect(),
        source_name: None,
    }
}

/// Locked view of the builder's type registry.
pub struct TypeRegistry<'a> {
    state: MutexGuard<'a, BuilderState>,
}

impl TypeRegistry<'_> {
    /// Name already assigned to `identity`, if any.
    pub fn lookup(&self, identity: &TypeIdentity) -> Option<String> {
        self.state.identities.get(identity).cloned()
    }

    /// Assign `name` to `identity`.
    ///
    /// Fails when another identity or the base schema already owns the name.
    pub fn claim(&mut self, identity: TypeIdentity, name: &str) -> Result<(), SchemaError> {
        claim_name(&mut self.state, name, identity.to_string())?;
        self.state.identities.insert(identity, name.to_string());
        Ok(())
    }

    /// Insert or replace a type definition.
    pub fn put_type(&mut self, descriptor: TypeDescriptor) {
        self.state
            .types
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDescriptor> {
        self.state.types.get(name)
    }
}

/// The finished schema: named types plus root fields with their resolvers.
#[derive(Clone)]
pub struct ComposedSchema {
    types: IndexMap<String, TypeDescriptor>,
    roots: HashMap<OperationKind, IndexMap<String, RootField>>,
}

impl ComposedSchema {
    pub fn type_named(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn root_fields(&self, kind: OperationKind) -> impl Iterator<Item = &RootField> {
        self.roots.get(&kind).into_iter().flat_map(|f| f.values())
    }

    pub fn root_field(&self, kind: OperationKind, name: &str) -> Option<&RootField> {
        self.roots.get(&kind)?.get(name)
    }

    pub fn resolver(&self, kind: OperationKind, name: &str) -> Option<Arc<OperationResolver>> {
        self.root_field(kind, name)?.resolver.clone()
    }

    /// Invoke the resolver registered for a root field.
    ///
    /// Arguments are sent with upstream payload keys and results come back
    /// keyed by field name, for fields whose name differs from their key.
    pub async fn resolve_field(
        &self,
        kind: OperationKind,
        name: &str,
        mut params: ResolveParams,
    ) -> Result<ResolverOutput, ResolverError> {
        let unknown = || ResolverError::UnknownField {
            kind: kind.to_string(),
            field: name.to_string(),
        };
        let root = self.root_field(kind, name).ok_or_else(unknown)?;
        let resolver = root.resolver.clone().ok_or_else(unknown)?;

        if !self.has_source_names() {
            return resolver.resolve(params).await;
        }

        for arg in &root.definition.args {
            if let Some(value) = params.args.remove(&arg.name) {
                let value = rename_keys(&self.types, &arg.ty, value, KeyDirection::ToPayload);
                params.args.insert(arg.name.clone(), value);
            }
        }

        let ty = root.definition.ty.clone();
        match resolver.resolve(params).await? {
            ResolverOutput::Value(value) => Ok(ResolverOutput::Value(rename_keys(
                &self.types,
                &ty,
                value,
                KeyDirection::ToField,
            ))),
            ResolverOutput::Stream(stream) => {
                let types = self.types.clone();
                Ok(ResolverOutput::Stream(
                    stream
                        .map(move |value| rename_keys(&types, &ty, value, KeyDirection::ToField))
                        .boxed(),
                ))
            }
        }
    }

    fn has_source_names(&self) -> bool {
        self.types
            .values()
            .flat_map(|t| &t.fields)
            .any(|f| f.source_name.is_some())
    }

    /// Print the schema as GraphQL SDL.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();

        for descriptor in self.types.values() {
            write_description(&mut out, descriptor.description.as_deref(), "");
            match descriptor.kind {
                TypeKind::Scalar => {
                    let _ = writeln!(out, "scalar {}", descriptor.name);
                }
                TypeKind::Enum => {
                    let _ = writeln!(out, "enum {} {{", descriptor.name);
                    for value in &descriptor.values {
                        let _ = writeln!(out, "  {}", value.name);
                    }
                    out.push_str("}\n");
                }
                TypeKind::Object | TypeKind::InputObject => {
                    let keyword = if descriptor.kind == TypeKind::Object {
                        "type"
                    } else {
                        "input"
                    };
                    let _ = writeln!(out, "{} {} {{", keyword, descriptor.name);
                    for field in &descriptor.fields {
                        write_field(&mut out, field);
                    }
                    out.push_str("}\n");
                }
            }
            out.push('\n');
        }

        for kind in ROOT_KINDS {
            let Some(fields) = self.roots.get(&kind).filter(|f| !f.is_empty()) else {
                continue;
            };
            let _ = writeln!(out, "type {} {{", kind);
            for root in fields.values() {
                write_field(&mut out, &root.definition);
            }
            out.push_str("}\n\n");
        }

        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out.push('\n');
        out
    }
}

#[derive(Clone, Copy)]
enum KeyDirection {
    ToPayload,
    ToField,
}

/// Rename object keys of `value` between field names and payload keys,
/// following the fields of `ty`.
fn rename_keys(
    types: &IndexMap<String, TypeDescriptor>,
    ty: &TypeRef,
    value: Value,
    direction: KeyDirection,
) -> Value {
    match (ty, value) {
        (TypeRef::NonNull(inner), value) => rename_keys(types, inner, value, direction),
        (TypeRef::List(inner), Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| rename_keys(types, inner, item, direction))
                .collect(),
        ),
        (TypeRef::Named(name), Value::Object(object)) => {
            let Some(descriptor) = types.get(name) else {
                return Value::Object(object);
            };
            let mut renamed = serde_json::Map::new();
            for (key, item) in object {
                let field = descriptor.fields.iter().find(|f| match direction {
                    KeyDirection::ToField => f.payload_key() == key,
                    KeyDirection::ToPayload => f.name == key,
                });
                match field {
                    Some(field) => {
                        let key = match direction {
                            KeyDirection::ToField => field.name.clone(),
                            KeyDirection::ToPayload => field.payload_key().to_string(),
                        };
                        renamed.insert(key, rename_keys(types, &field.ty, item, direction));
                    }
                    None => {
                        renamed.insert(key, item);
                    }
                }
            }
            Value::Object(renamed)
        }
        (_, value) => value,
    }
}

fn write_description(out: &mut String, description: Option<&str>, indent: &str) {
    let Some(description) = description else {
        return;
    };
    // A trailing quote would run into the closing delimiter of a block string.
    if description.ends_with('"') {
        let _ = writeln!(out, "{}\"{}\"", indent, escape_string(description));
    } else {
        let escaped = description.replace("\"\"\"", "\\\"\"\"");
        let _ = writeln!(out, "{}\"\"\"{}\"\"\"", indent, escaped);
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn write_field(out: &mut String, field: &FieldDefinition) {
    write_description(out, field.description.as_deref(), "  ");
    let _ = write!(out, "  {}", field.name);
    if !field.args.is_empty() {
        let args: Vec<String> = field
            .args
            .iter()
            .map(|arg| format!("{}: {}", arg.name, arg.ty))
            .collect();
        let _ = write!(out, "({})", args.join(", "));
    }
    let _ = writeln!(out, ": {}", field.ty);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn identity(path: &str) -> TypeIdentity {
        TypeIdentity {
            location: "/schemas/item.json".into(),
            path: path.into(),
            direction: Direction::Output,
        }
    }

    fn query_field(builder: &SchemaBuilder, name: &str, ty: TypeRef) {
        builder.add_field(OperationKind::Query, FieldDefinition::new(name, ty), None);
    }

    #[test]
    fn claim_is_exclusive_per_name() {
        let builder = SchemaBuilder::new();
        let mut registry = builder.registry();
        registry.claim(identity(""), "Item").unwrap();
        assert_eq!(registry.lookup(&identity("")), Some("Item".to_string()));

        let result = registry.claim(identity("other"), "Item");
        assert!(matches!(
            result,
            Err(SchemaError::TypeNameConflict { name, .. }) if name == "Item"
        ));
    }

    #[test]
    fn build_requires_query_fields() {
        let builder = SchemaBuilder::new();
        assert!(matches!(
            builder.build_schema(),
            Err(SchemaError::EmptyQuery)
        ));
    }

    #[test]
    fn build_rejects_unknown_types() {
        let builder = SchemaBuilder::new();
        query_field(&builder, "item", TypeRef::named("Missing"));
        assert!(matches!(
            builder.build_schema(),
            Err(SchemaError::UnknownType { name, .. }) if name == "Missing"
        ));
    }

    #[test]
    fn imports_base_sdl() {
        let builder = SchemaBuilder::new();
        builder
            .add_sdl(
                "base.graphql",
                r#"
                "A user"
                type User { id: ID! tags: [String!] }
                input UserFilter { name: String }
                enum Role { ADMIN MEMBER }
                scalar Cursor
                type Query { me(token: String): User }
                "#,
            )
            .unwrap();

        let schema = builder.build_schema().unwrap();
        let user = schema.type_named("User").unwrap();
        assert_eq!(user.kind, TypeKind::Object);
        assert_eq!(user.description.as_deref(), Some("A user"));
        assert_eq!(user.field("tags").unwrap().ty.to_string(), "[String!]");
        assert_eq!(schema.type_named("Role").unwrap().values.len(), 2);
        assert_eq!(
            schema.type_named("UserFilter").unwrap().kind,
            TypeKind::InputObject
        );

        let me = schema.root_field(OperationKind::Query, "me").unwrap();
        assert!(me.resolver.is_none());
        assert_eq!(me.definition.args[0].name, "token");
    }

    #[test]
    fn base_sdl_object_extension_merges_fields() {
        let builder = SchemaBuilder::new();
        builder
            .add_sdl(
                "base.graphql",
                "type User { id: ID! } extend type User { name: String } type Query { me: User }",
            )
            .unwrap();
        let schema = builder.build_schema().unwrap();
        assert_eq!(schema.type_named("User").unwrap().fields.len(), 2);
    }

    #[test]
    fn invalid_sdl_errors() {
        let builder = SchemaBuilder::new();
        let result = builder.add_sdl("base.graphql", "type {");
        assert!(matches!(result, Err(SchemaError::InvalidSdl { .. })));
    }

    #[test]
    fn sdl_conflicts_with_synthesized_type() {
        let builder = SchemaBuilder::new();
        builder.registry().claim(identity(""), "Item").unwrap();
        let result = builder.add_sdl("base.graphql", "scalar Item");
        assert!(matches!(result, Err(SchemaError::TypeNameConflict { .. })));
    }

    #[test]
    fn prints_sdl() {
        let builder = SchemaBuilder::new();
        builder.add_scalars(&ScalarRegistry::new(false));
        {
            let mut registry = builder.registry();
            let mut item = TypeDescriptor::new("Item", TypeKind::Object);
            item.fields
                .push(FieldDefinition::new("id", TypeRef::named("Int").non_null()));
            registry.put_type(item);
        }
        let mut field = FieldDefinition::new("item", TypeRef::named("Item"));
        field.args.push(ArgumentDefinition {
            name: "id".into(),
            ty: TypeRef::named("ID").non_null(),
            description: None,
        });
        builder.add_field(OperationKind::Query, field, None);

        let printed = builder.build_schema().unwrap().to_sdl();
        assert!(printed.contains("scalar DateTime"));
        assert!(printed.contains("type Item {\n  id: Int!\n}"));
        assert!(printed.contains("type Query {\n  item(id: ID!): Item\n}"));
        assert!(!printed.contains("scalar Timestamp"));
        assert!(printed.ends_with("}\n"));
    }

    #[test]
    fn printed_descriptions_reparse() {
        let builder = SchemaBuilder::new();
        {
            let mut registry = builder.registry();
            let mut item = TypeDescriptor::new("Item", TypeKind::Object);
            item.description = Some(r#"say "hi""#.into());
            item.fields.push(
                FieldDefinition::new("id", TypeRef::named("Int"))
                    .with_description(Some(r#"ends with """"#.into())),
            );
            item.fields.push(
                FieldDefinition::new("name", TypeRef::named("String"))
                    .with_description(Some("a \"\"\" b\nsecond line".into())),
            );
            registry.put_type(item);
        }
        query_field(&builder, "item", TypeRef::named("Item"));

        let printed = builder.build_schema().unwrap().to_sdl();
        assert!(printed.contains(r#""say \"hi\"""#));

        let document = sdl::parse_schema::<String>(&printed).unwrap();
        let item = document
            .definitions
            .into_iter()
            .find_map(|definition| match definition {
                Definition::TypeDefinition(TypeDefinition::Object(object))
                    if object.name == "Item" =>
                {
                    Some(object)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(item.description.as_deref(), Some(r#"say "hi""#));
        assert_eq!(
            item.fields[0].description.as_deref(),
            Some(r#"ends with """"#)
        );
        assert_eq!(
            item.fields[1].description.as_deref(),
            Some("a \"\"\" b\nsecond line")
        );
    }
}
