//! REST Schema Compiler
//!
//! Compiles REST endpoints described by JSON Schemas (or sample payloads) into
//! a typed GraphQL schema whose root fields resolve by calling the endpoints.
//!
//! # Example
//!
//! ```
//! use rest_schema_compiler::{Direction, FileCache, ScalarRegistry, SchemaBuilder, TypeSynthesizer};
//! use serde_json::json;
//!
//! let builder = SchemaBuilder::new();
//! let scalars = ScalarRegistry::default();
//! builder.add_scalars(&scalars);
//! let files = FileCache::new();
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "id": { "type": "integer" },
//!         "createdAt": { "type": "string", "format": "date-time" }
//!     },
//!     "required": ["id"]
//! });
//!
//! let ty = TypeSynthesizer::new(&builder, &scalars, &files)
//!     .synthesize(&schema, "", "item", "item.json", Direction::Output, None)
//!     .unwrap();
//! assert_eq!(ty.to_string(), "Item");
//!
//! let registry = builder.registry();
//! let item = registry.get_type("Item").unwrap();
//! assert_eq!(item.field("id").unwrap().ty.to_string(), "Int!");
//! assert_eq!(item.field("createdAt").unwrap().ty.to_string(), "DateTime");
//! ```
//!
//! # Type mapping
//!
//! | JSON Schema | GraphQL |
//! |-------------|---------|
//! | `object` with properties | object type (input object for requests) |
//! | `array` | list of the item type |
//! | `enum` | enum type |
//! | `string` with a known `format` | `Date`, `DateTime`, `Time`, `EmailAddress`, `URL`, `IPv4`, `IPv6`, `PhoneNumber` |
//! | `string` / `integer` / `number` / `boolean` | `String` / `Int` / `Float` / `Boolean` |
//! | `null` | `Void` |
//! | anything else | `JSON` |
//!
//! # Compiling a configuration
//!
//! ```no_run
//! use std::path::Path;
//! use rest_schema_compiler::{compile_file, Collaborators};
//!
//! # async fn run() -> Result<(), rest_schema_compiler::CompileError> {
//! let compiled = compile_file(Path::new("rest.yaml"), &Collaborators::default()).await?;
//! println!("{}", compiled.schema.to_sdl());
//! # Ok(())
//! # }
//! ```

mod builder;
mod cache;
mod compiler;
mod config;
mod error;
mod executor;
mod handler;
mod inference;
mod interpolate;
mod loader;
mod scalars;
mod synthesizer;
mod types;

pub use builder::{ComposedSchema, RootField, SchemaBuilder, TypeRegistry};
pub use cache::{CachedSchemaEntry, InMemoryCache, KeyValueCache};
pub use compiler::OperationCompiler;
pub use config::{load_config, HandlerConfig, OperationConfig};
pub use error::{CompileError, ConfigError, LoadError, ResolverError, SchemaError};
pub use executor::{
    join_url, normalize_response, HttpDispatcher, HttpRequest, HttpResponse, InMemoryPubSub,
    OperationResolver, PubSub, ReqwestDispatcher, ResolveParams, ResolverOutput,
};
pub use handler::{compile_file, compile_schema, Collaborators, CompiledSchema};
pub use inference::{detect_format, infer_schema, SampleInferencer};
pub use interpolate::{interpolate, placeholders, ContextVariables, Placeholder};
pub use loader::{
    base_name, is_url, navigate_fragment, parse_json, prefetch_refs, resolve_config_location,
    resolve_location, ContentFetcher, DefaultFetcher, FileCache,
};
pub use scalars::{ScalarDefinition, ScalarRegistry, BUILT_IN_SCALARS};
pub use synthesizer::{derive_name, sanitize_name, TypeSynthesizer};
pub use types::{
    json_type_name, ArgumentDefinition, Direction, EnumValueDefinition, FieldDefinition,
    HttpMethod, OperationKind, TypeDescriptor, TypeIdentity, TypeKind, TypeRef,
};
