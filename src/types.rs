//! Core types shared by the synthesizer, compiler and schema builder.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the JSON type name for log and error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Direction of a synthesized type.
///
/// The same JSON Schema node yields distinct input and output types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Root operation type a field is registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Parse a root type name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Some(OperationKind::Query),
            "mutation" => Some(OperationKind::Mutation),
            "subscription" => Some(OperationKind::Subscription),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }

    /// Kind derived from the HTTP method when none is configured.
    pub fn from_method(method: HttpMethod) -> Self {
        if method == HttpMethod::Get {
            OperationKind::Query
        } else {
            OperationKind::Mutation
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of a REST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "PATCH" => Some(HttpMethod::Patch),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    /// Method derived from the operation kind when none is configured.
    pub fn from_kind(kind: OperationKind) -> Self {
        if kind == OperationKind::Mutation {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }

    /// Whether a request `input` can be sent with this method.
    pub fn accepts_input(&self) -> bool {
        matches!(
            self,
            HttpMethod::Get | HttpMethod::Delete | HttpMethod::Post | HttpMethod::Put
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a named type, possibly wrapped in list and non-null modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn list(self) -> Self {
        TypeRef::List(Box::new(self))
    }

    /// Wrap in non-null. Already non-null references are returned as-is.
    pub fn non_null(self) -> Self {
        match self {
            TypeRef::NonNull(_) => self,
            other => TypeRef::NonNull(Box::new(other)),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Name of the innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

/// Kind of a named type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Object,
    InputObject,
    Enum,
    Scalar,
}

/// Argument of an output field.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub description: Option<String>,
}

/// Field of an object or input object type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub description: Option<String>,
    pub args: Vec<ArgumentDefinition>,
    /// Payload key the field is read from, when it differs from `name`.
    pub source_name: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            args: Vec::new(),
            source_name: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_source_name(mut self, source_name: Option<String>) -> Self {
        self.source_name = source_name;
        self
    }

    /// Key this field occupies in upstream payloads.
    pub fn payload_key(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.name)
    }
}

/// Enum member with the literal it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDefinition {
    pub name: String,
    pub value: Value,
}

/// A synthesized or imported named type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub values: Vec<EnumValueDefinition>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            fields: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Stable identity of a JSON Schema node within one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeIdentity {
    /// File path or URL the node was loaded from.
    pub location: String,
    /// JSON pointer of the node inside that document, without the leading `#/`.
    pub path: String,
    pub direction: Direction,
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Input => "input",
            Direction::Output => "output",
        };
        if self.path.is_empty() {
            write!(f, "{} ({})", self.location, direction)
        } else {
            write!(f, "{}#{} ({})", self.location, self.path, direction)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_and_kind_cross_derivation() {
        assert_eq!(
            HttpMethod::from_kind(OperationKind::Mutation),
            HttpMethod::Post
        );
        assert_eq!(HttpMethod::from_kind(OperationKind::Query), HttpMethod::Get);
        assert_eq!(
            OperationKind::from_method(HttpMethod::Get),
            OperationKind::Query
        );
        assert_eq!(
            OperationKind::from_method(HttpMethod::Delete),
            OperationKind::Mutation
        );
    }

    #[test]
    fn operation_kind_parse_is_case_insensitive() {
        assert_eq!(OperationKind::parse("query"), Some(OperationKind::Query));
        assert_eq!(
            OperationKind::parse("Mutation"),
            Some(OperationKind::Mutation)
        );
        assert_eq!(OperationKind::parse("fragment"), None);
    }

    #[test]
    fn type_ref_display() {
        let ty = TypeRef::named("Item").non_null().list().non_null();
        assert_eq!(ty.to_string(), "[Item!]!");
        assert_eq!(ty.base_name(), "Item");
    }

    #[test]
    fn non_null_is_idempotent() {
        let ty = TypeRef::named("Int").non_null().non_null();
        assert_eq!(ty.to_string(), "Int!");
    }

    #[test]
    fn methods_accepting_input() {
        assert!(HttpMethod::Get.accepts_input());
        assert!(HttpMethod::Put.accepts_input());
        assert!(!HttpMethod::Patch.accepts_input());
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("Patch"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("TRACE"), None);
    }

    #[test]
    fn method_deserializes_uppercase() {
        let method: HttpMethod = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(method, HttpMethod::Delete);
    }
}
