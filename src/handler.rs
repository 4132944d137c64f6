//! Compilation orchestration: configuration in, composed schema out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;

use crate::builder::{ComposedSchema, SchemaBuilder};
use crate::cache::{InMemoryCache, KeyValueCache};
use crate::compiler::OperationCompiler;
use crate::config::{load_config, HandlerConfig, OperationConfig};
use crate::error::CompileError;
use crate::executor::{HttpDispatcher, InMemoryPubSub, PubSub, ReqwestDispatcher};
use crate::inference::SampleInferencer;
use crate::interpolate::interpolate;
use crate::loader::{ContentFetcher, DefaultFetcher, FileCache};
use crate::scalars::ScalarRegistry;

/// External services a compilation uses.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub cache: Arc<dyn KeyValueCache>,
    pub dispatcher: Arc<dyn HttpDispatcher>,
    pub pubsub: Arc<dyn PubSub>,
}

impl Collaborators {
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn HttpDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = pubsub;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fetcher: Arc::new(DefaultFetcher::new()),
            cache: Arc::new(InMemoryCache::new()),
            dispatcher: Arc::new(ReqwestDispatcher::new()),
            pubsub: Arc::new(InMemoryPubSub::new()),
        }
    }
}

/// Result of a compilation pass.
#[derive(Clone)]
pub struct CompiledSchema {
    pub schema: ComposedSchema,
    /// Names of every `{context.*}` variable the resolvers read.
    pub context_variables: Vec<String>,
}

/// Compile every operation of `config` into one schema.
///
/// Operations with an explicit response type name are compiled first so their
/// names win over derived ones for shared schema files. Operations within a batch
/// compile concurrently; the first failure aborts the pass.
pub async fn compile_schema(
    config: &HandlerConfig,
    collaborators: &Collaborators,
) -> Result<CompiledSchema, CompileError> {
    let scalars = Arc::new(ScalarRegistry::new(!config.disable_timestamp_scalar));
    let builder = Arc::new(SchemaBuilder::new());
    builder.add_scalars(&scalars);

    let schema_headers: HashMap<String, String> = config
        .schema_headers
        .iter()
        .map(|(name, value)| (name.clone(), interpolate(value, &Value::Null)))
        .collect();

    if let Some(base_schema) = &config.base_schema {
        tracing::debug!(location = %base_schema, "loading base schema");
        let source = collaborators
            .fetcher
            .fetch(base_schema, &schema_headers)
            .await?;
        builder.add_sdl(base_schema, &source)?;
    }

    let inferencer = Arc::new(SampleInferencer::new(
        collaborators.fetcher.clone(),
        collaborators.cache.clone(),
        schema_headers.clone(),
    ));
    let compiler = OperationCompiler::new(
        collaborators.fetcher.clone(),
        Arc::new(FileCache::new()),
        inferencer,
        builder.clone(),
        scalars,
        collaborators.dispatcher.clone(),
        collaborators.pubsub.clone(),
        config.base_url.clone(),
    )
    .with_operation_headers(config.operation_headers.clone())
    .with_schema_headers(schema_headers);

    let (named, unnamed): (Vec<OperationConfig>, Vec<OperationConfig>) = config
        .operations
        .iter()
        .cloned()
        .partition(OperationConfig::has_explicit_response_type_name);

    for batch in [named, unnamed] {
        try_join_all(batch.into_iter().map(|op| compiler.compile(op))).await?;
    }

    let schema = builder.build_schema()?;
    let context_variables = compiler.context_variables();
    tracing::info!(
        operations = config.operations.len(),
        types = schema.types().count(),
        "compiled schema"
    );

    Ok(CompiledSchema {
        schema,
        context_variables,
    })
}

/// Load a configuration file and compile it.
pub async fn compile_file(
    path: &Path,
    collaborators: &Collaborators,
) -> Result<CompiledSchema, CompileError> {
    let config = load_config(path)?;
    compile_schema(&config, collaborators).await
}
