//! Error types for schema loading, type synthesis, compilation and request execution.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Errors while retrieving schema, sample or SDL content.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to fetch {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("invalid JSON in {location}: {source}")]
    InvalidJson {
        location: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::InvalidJson { .. } => 2,
            _ => 3,
        }
    }
}

/// Errors during type synthesis and schema composition.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unresolved $ref \"{reference}\" in {location}")]
    UnresolvedRef { reference: String, location: String },

    #[error("JSON pointer {pointer} not found in {location}")]
    InvalidPointer { pointer: String, location: String },

    #[error("type name \"{name}\" is claimed by both {existing} and {incoming}")]
    TypeNameConflict {
        name: String,
        existing: String,
        incoming: String,
    },

    #[error("field {parent}.{field} references unknown type \"{name}\"")]
    UnknownType {
        parent: String,
        field: String,
        name: String,
    },

    #[error("invalid GraphQL SDL in {location}: {message}")]
    InvalidSdl { location: String, message: String },

    #[error("composed schema has no Query fields")]
    EmptyQuery,
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Configuration errors detected before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("operation \"{field}\": unknown method {method} for an operation with request input")]
    UnknownMethod { field: String, method: String },

    #[error("operation \"{field}\": unknown operation type {kind}")]
    UnknownKind { field: String, kind: String },

    #[error("cannot read config {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid base URL \"{url}\": {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl ConfigError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::ReadError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors aborting a compilation pass.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CompileError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Load(e) => e.exit_code(),
            CompileError::Schema(e) => e.exit_code(),
            CompileError::Config(e) => e.exit_code(),
        }
    }
}

/// Errors raised by a resolver at request time.
///
/// Upstream failures keep the exact payload the origin reported.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("unknown method {method}")]
    UnknownMethod { method: String },

    #[error("invalid request URL \"{url}\": {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{body}")]
    NonJsonResponse { body: String },

    #[error("{}", aggregate_message(errors))]
    Aggregate { errors: Vec<Value> },

    #[error("{}", payload_message(payload))]
    Upstream { payload: Value },

    #[error("no resolver registered for {kind}.{field}")]
    UnknownField { kind: String, field: String },

    #[error("field {field} is a subscription; subscribe to it instead")]
    NotAQuery { field: String },
}

impl ResolverError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolverError::Transport { .. } => 3,
            ResolverError::UnknownMethod { .. }
            | ResolverError::InvalidUrl { .. }
            | ResolverError::UnknownField { .. }
            | ResolverError::NotAQuery { .. } => 2,
            _ => 1,
        }
    }
}

fn payload_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => payload.to_string(),
        },
        other => other.to_string(),
    }
}

fn aggregate_message(errors: &[Value]) -> String {
    errors
        .iter()
        .map(payload_message)
        .collect::<Vec<_>>()
        .join("; ")
}
