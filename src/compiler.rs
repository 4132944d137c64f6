//! Operation compilation.
//!
//! Turns one [`OperationConfig`] into a root field on the schema builder plus
//! the [`OperationResolver`] that serves it.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::builder::SchemaBuilder;
use crate::config::OperationConfig;
use crate::error::{CompileError, ConfigError};
use crate::executor::{HttpDispatcher, OperationResolver, PubSub};
use crate::inference::SampleInferencer;
use crate::interpolate::{placeholders, ContextVariables, Placeholder};
use crate::loader::{base_name, prefetch_refs, ContentFetcher, FileCache};
use crate::scalars::{self, ScalarRegistry};
use crate::synthesizer::TypeSynthesizer;
use crate::types::{
    ArgumentDefinition, Direction, FieldDefinition, HttpMethod, OperationKind, TypeRef,
};

/// Where one side (request or response) of an operation gets its type from.
struct TypeSource<'a> {
    sample: Option<&'a str>,
    schema: Option<&'a str>,
    type_name: Option<&'a str>,
    direction: Direction,
}

impl<'a> TypeSource<'a> {
    fn request(op: &'a OperationConfig) -> Self {
        Self {
            sample: op.request_sample.as_deref(),
            schema: op.request_schema.as_deref(),
            type_name: op.request_type_name.as_deref(),
            direction: Direction::Input,
        }
    }

    fn response(op: &'a OperationConfig) -> Self {
        Self {
            sample: op.response_sample.as_deref(),
            schema: op.response_schema.as_deref(),
            type_name: op.response_type_name.as_deref(),
            direction: Direction::Output,
        }
    }

    fn is_declared(&self) -> bool {
        self.sample.is_some() || self.schema.is_some() || self.type_name.is_some()
    }
}

/// Compiles operations against shared stores.
///
/// One compiler serves a whole compilation pass; every operation shares its
/// file cache, builder and context-variable set.
pub struct OperationCompiler {
    fetcher: Arc<dyn ContentFetcher>,
    files: Arc<FileCache>,
    inferencer: Arc<SampleInferencer>,
    builder: Arc<SchemaBuilder>,
    scalars: Arc<ScalarRegistry>,
    context_variables: Arc<ContextVariables>,
    dispatcher: Arc<dyn HttpDispatcher>,
    pubsub: Arc<dyn PubSub>,
    base_url: String,
    operation_headers: IndexMap<String, String>,
    schema_headers: HashMap<String, String>,
}

impl OperationCompiler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        files: Arc<FileCache>,
        inferencer: Arc<SampleInferencer>,
        builder: Arc<SchemaBuilder>,
        scalars: Arc<ScalarRegistry>,
        dispatcher: Arc<dyn HttpDispatcher>,
        pubsub: Arc<dyn PubSub>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            files,
            inferencer,
            builder,
            scalars,
            context_variables: Arc::new(ContextVariables::new()),
            dispatcher,
            pubsub,
            base_url: base_url.into(),
            operation_headers: IndexMap::new(),
            schema_headers: HashMap::new(),
        }
    }

    /// Header templates sent with every operation.
    pub fn with_operation_headers(mut self, headers: IndexMap<String, String>) -> Self {
        self.operation_headers = headers;
        self
    }

    /// Headers used to fetch schema documents.
    pub fn with_schema_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.schema_headers = headers;
        self
    }

    pub fn context_variables(&self) -> Vec<String> {
        self.context_variables.to_vec()
    }

    /// Compile one operation and register its root field.
    pub async fn compile(&self, op: OperationConfig) -> Result<(), CompileError> {
        let (kind, method) = operation_kind_and_method(&op)?;

        let request_source = TypeSource::request(&op);
        let response_source = TypeSource::response(&op);
        if request_source.is_declared() && !method.accepts_input() {
            return Err(ConfigError::UnknownMethod {
                field: op.field.clone(),
                method: method.to_string(),
            }
            .into());
        }

        let (request_type, response_type) = tokio::try_join!(
            self.resolve_type(&request_source),
            self.resolve_type(&response_source),
        )?;

        let mut headers = self.operation_headers.clone();
        headers.extend(op.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut args = self.template_arguments(&op, &headers);
        if let Some(request_type) = request_type {
            args.insert(
                "input".to_string(),
                ArgumentDefinition {
                    name: "input".to_string(),
                    ty: request_type.non_null(),
                    description: None,
                },
            );
        }

        let mut field = FieldDefinition::new(
            op.field.clone(),
            response_type.unwrap_or_else(|| TypeRef::named(scalars::JSON)),
        )
        .with_description(op.description.clone());
        field.args = args.into_values().collect();

        let mut resolver = OperationResolver::new(
            op.field.clone(),
            method,
            self.base_url.clone(),
            op.path.clone(),
            self.dispatcher.clone(),
        )
        .with_headers(headers);
        if let Some(topic) = &op.pubsub_topic {
            resolver = resolver.with_topic(topic.clone(), self.pubsub.clone());
        }

        tracing::info!(field = %op.field, kind = %kind, method = %method, "compiled operation");
        self.builder.add_field(kind, field, Some(Arc::new(resolver)));
        Ok(())
    }

    /// Resolve one side of an operation to a type.
    ///
    /// A sample wins over a schema file unless the schema file is newer. A bare
    /// type name refers to a type defined elsewhere, e.g. in the base schema.
    async fn resolve_type(&self, source: &TypeSource<'_>) -> Result<Option<TypeRef>, CompileError> {
        let location = match source.sample {
            Some(sample) => match self.inferencer.infer_or_load(sample, source.schema).await? {
                Some(inferred) => {
                    let location = source.schema.unwrap_or(sample);
                    self.files.insert_if_absent(location, inferred);
                    Some(location)
                }
                None => source.schema,
            },
            None => source.schema,
        };

        let Some(location) = location else {
            return Ok(source.type_name.map(TypeRef::named));
        };

        prefetch_refs(
            &self.files,
            self.fetcher.as_ref(),
            &self.schema_headers,
            location,
        )
        .await?;
        let document = self
            .files
            .load(location, self.fetcher.as_ref(), &self.schema_headers)
            .await?;

        let synthesizer = TypeSynthesizer::new(&self.builder, &self.scalars, &self.files);
        let ty = synthesizer.synthesize(
            &document,
            "",
            &base_name(location),
            location,
            source.direction,
            source.type_name,
        )?;
        Ok(Some(ty))
    }

    /// Arguments implied by `{args.*}` placeholders; records `{context.*}` names.
    fn template_arguments(
        &self,
        op: &OperationConfig,
        headers: &IndexMap<String, String>,
    ) -> IndexMap<String, ArgumentDefinition> {
        let path_placeholders = placeholders(&op.path);
        let templates = std::iter::once(op.path.as_str())
            .chain(op.pubsub_topic.as_deref())
            .chain(headers.values().map(String::as_str));

        let mut args = IndexMap::new();
        for template in templates {
            for path in placeholders(template) {
                match Placeholder::parse(&path) {
                    Placeholder::Context(name) => self.context_variables.insert(&name),
                    Placeholder::Argument(name) => {
                        let in_path = path_placeholders.contains(&path);
                        args.entry(name.clone()).or_insert_with(|| ArgumentDefinition {
                            ty: if in_path {
                                TypeRef::named("ID").non_null()
                            } else {
                                TypeRef::named("String")
                            },
                            name,
                            description: None,
                        });
                    }
                    Placeholder::Env(_) | Placeholder::Other(_) => {}
                }
            }
        }
        args
    }
}

/// Apply the kind/method defaulting rules.
fn operation_kind_and_method(
    op: &OperationConfig,
) -> Result<(OperationKind, HttpMethod), ConfigError> {
    let kind = op
        .kind
        .as_deref()
        .map(|kind| {
            OperationKind::parse(kind).ok_or_else(|| ConfigError::UnknownKind {
                field: op.field.clone(),
                kind: kind.to_string(),
            })
        })
        .transpose()?;
    let method = op
        .method
        .as_deref()
        .map(|method| {
            HttpMethod::parse(method).ok_or_else(|| ConfigError::UnknownMethod {
                field: op.field.clone(),
                method: method.to_string(),
            })
        })
        .transpose()?;

    Ok(match (kind, method) {
        (Some(kind), Some(method)) => (kind, method),
        (Some(kind), None) => (kind, HttpMethod::from_kind(kind)),
        (None, Some(method)) => (OperationKind::from_method(method), method),
        (None, None) if op.pubsub_topic.is_some() => (OperationKind::Subscription, HttpMethod::Get),
        (None, None) => (OperationKind::Query, HttpMethod::Get),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::executor::{InMemoryPubSub, ReqwestDispatcher};
    use crate::loader::DefaultFetcher;
    use std::fs;
    use tempfile::TempDir;

    fn compiler(builder: Arc<SchemaBuilder>) -> OperationCompiler {
        let fetcher: Arc<dyn ContentFetcher> = Arc::new(DefaultFetcher::new());
        let inferencer = Arc::new(SampleInferencer::new(
            fetcher.clone(),
            Arc::new(InMemoryCache::new()),
            HashMap::new(),
        ));
        let scalars = Arc::new(ScalarRegistry::default());
        builder.add_scalars(&scalars);
        OperationCompiler::new(
            fetcher,
            Arc::new(FileCache::new()),
            inferencer,
            builder,
            scalars,
            Arc::new(ReqwestDispatcher::new()),
            Arc::new(InMemoryPubSub::new()),
            "http://api.test",
        )
    }

    fn op(field: &str) -> OperationConfig {
        OperationConfig {
            field: field.to_string(),
            path: format!("/{}", field),
            ..OperationConfig::default()
        }
    }

    fn path_str(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn kind_and_method_defaults() {
        let mut operation = op("x");
        assert_eq!(
            operation_kind_and_method(&operation).unwrap(),
            (OperationKind::Query, HttpMethod::Get)
        );

        operation.kind = Some("Mutation".into());
        assert_eq!(
            operation_kind_and_method(&operation).unwrap(),
            (OperationKind::Mutation, HttpMethod::Post)
        );

        operation.kind = None;
        operation.method = Some("DELETE".into());
        assert_eq!(
            operation_kind_and_method(&operation).unwrap(),
            (OperationKind::Mutation, HttpMethod::Delete)
        );

        operation.method = None;
        operation.pubsub_topic = Some("items".into());
        assert_eq!(
            operation_kind_and_method(&operation).unwrap(),
            (OperationKind::Subscription, HttpMethod::Get)
        );
    }

    #[test]
    fn unparseable_kind_and_method_are_config_errors() {
        let mut operation = op("x");
        operation.method = Some("TRACE".into());
        assert!(matches!(
            operation_kind_and_method(&operation),
            Err(ConfigError::UnknownMethod { .. })
        ));

        operation.method = None;
        operation.kind = Some("Fragment".into());
        assert!(matches!(
            operation_kind_and_method(&operation),
            Err(ConfigError::UnknownKind { .. })
        ));
    }

    #[tokio::test]
    async fn sample_becomes_response_type() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("item.json"), r#"{"id": 1, "name": "x"}"#).unwrap();

        let builder = Arc::new(SchemaBuilder::new());
        let compiler = compiler(builder.clone());
        let mut operation = op("item");
        operation.path = "/items/{args.id}".into();
        operation.response_sample = Some(path_str(&dir, "item.json"));
        compiler.compile(operation).await.unwrap();

        let schema = builder.build_schema().unwrap();
        let field = schema.root_field(OperationKind::Query, "item").unwrap();
        assert_eq!(field.definition.ty.to_string(), "Item");
        assert_eq!(field.definition.args.len(), 1);
        assert_eq!(field.definition.args[0].name, "id");
        assert_eq!(field.definition.args[0].ty.to_string(), "ID!");

        let item = schema.type_named("Item").unwrap();
        assert_eq!(item.field("id").unwrap().ty.to_string(), "Int");
        assert_eq!(item.field("name").unwrap().ty.to_string(), "String");
    }

    #[tokio::test]
    async fn request_schema_adds_non_null_input_argument() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("new-item.json"),
            r#"{"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}"#,
        )
        .unwrap();

        let builder = Arc::new(SchemaBuilder::new());
        let compiler = compiler(builder.clone());
        let mut operation = op("createItem");
        operation.method = Some("POST".into());
        operation.request_schema = Some(path_str(&dir, "new-item.json"));
        compiler.compile(operation).await.unwrap();

        builder.add_field(
            OperationKind::Query,
            FieldDefinition::new("ping", TypeRef::named("String")),
            None,
        );
        let schema = builder.build_schema().unwrap();
        let field = schema.root_field(OperationKind::Mutation, "createItem").unwrap();
        assert_eq!(field.definition.ty.to_string(), "JSON");
        let input = &field.definition.args[0];
        assert_eq!(input.name, "input");
        assert_eq!(input.ty.to_string(), "NewItemInput!");
        assert_eq!(
            schema
                .type_named("NewItemInput")
                .unwrap()
                .field("name")
                .unwrap()
                .ty
                .to_string(),
            "String!"
        );
    }

    #[tokio::test]
    async fn request_with_patch_is_rejected_at_compile_time() {
        let builder = Arc::new(SchemaBuilder::new());
        let compiler = compiler(builder.clone());
        let mut operation = op("patchItem");
        operation.method = Some("PATCH".into());
        operation.request_type_name = Some("ItemPatch".into());

        let result = compiler.compile(operation).await;
        assert!(matches!(
            result,
            Err(CompileError::Config(ConfigError::UnknownMethod { method, .. })) if method == "PATCH"
        ));
    }

    #[tokio::test]
    async fn placeholders_become_arguments_and_context_variables() {
        let builder = Arc::new(SchemaBuilder::new());
        let compiler = compiler(builder.clone()).with_operation_headers(IndexMap::from([(
            "Authorization".to_string(),
            "Bearer {context.token}".to_string(),
        )]));
        let mut operation = op("posts");
        operation.path = "/users/{args.userId}/posts".into();
        operation.headers = IndexMap::from([
            ("X-Filter".to_string(), "{args.filter}".to_string()),
            ("X-Tenant".to_string(), "{context.tenant}".to_string()),
        ]);
        compiler.compile(operation).await.unwrap();

        let schema = builder.build_schema().unwrap();
        let field = schema.root_field(OperationKind::Query, "posts").unwrap();
        let args: Vec<String> = field
            .definition
            .args
            .iter()
            .map(|a| format!("{}: {}", a.name, a.ty))
            .collect();
        assert_eq!(args, vec!["userId: ID!", "filter: String"]);
        assert_eq!(compiler.context_variables(), vec!["token", "tenant"]);
    }

    #[tokio::test]
    async fn bare_type_name_references_existing_type() {
        let builder = Arc::new(SchemaBuilder::new());
        builder
            .add_sdl("base.graphql", "type User { id: ID! }")
            .unwrap();
        let compiler = compiler(builder.clone());
        let mut operation = op("me");
        operation.response_type_name = Some("User".into());
        compiler.compile(operation).await.unwrap();

        let schema = builder.build_schema().unwrap();
        assert_eq!(
            schema
                .root_field(OperationKind::Query, "me")
                .unwrap()
                .definition
                .ty
                .to_string(),
            "User"
        );
    }

    #[tokio::test]
    async fn missing_schema_file_is_load_error() {
        let builder = Arc::new(SchemaBuilder::new());
        let compiler = compiler(builder);
        let mut operation = op("item");
        operation.response_schema = Some("/nonexistent/item.json".into());

        let result = compiler.compile(operation).await;
        let err = result.unwrap_err();
        assert!(matches!(err, CompileError::Load(_)));
        assert_eq!(err.exit_code(), 3);
    }
}
