//! Handler configuration.
//!
//! Configuration is YAML (JSON is accepted as a subset). Keys are camelCase.
//! Relative file locations are resolved against the directory of the
//! configuration file by [`load_config`].

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::loader::resolve_config_location;

/// Top-level configuration of one REST source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    /// Origin every operation path is joined onto.
    pub base_url: String,

    /// GraphQL SDL document imported before any operation is compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_schema: Option<String>,

    /// Headers sent when fetching schema and sample documents.
    /// Values may use `{env.NAME}` placeholders.
    #[serde(default)]
    pub schema_headers: HashMap<String, String>,

    /// Header templates sent with every operation request.
    #[serde(default)]
    pub operation_headers: IndexMap<String, String>,

    /// Leave the `Timestamp` scalar out of the registry.
    #[serde(default)]
    pub disable_timestamp_scalar: bool,

    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

/// One REST endpoint exposed as a root field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    pub field: String,

    /// `Query`, `Mutation` or `Subscription`; derived from the method when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// HTTP method; derived from the kind when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Path template joined onto the base URL.
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type_name: Option<String>,

    /// Header templates for this operation; override global ones of the same name.
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Resolve by subscribing to this topic template instead of sending a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_topic: Option<String>,
}

impl OperationConfig {
    /// Whether the response type is explicitly named.
    pub fn has_explicit_response_type_name(&self) -> bool {
        self.response_type_name.is_some()
    }

    fn resolve_locations(&mut self, base_dir: &Path) {
        for location in [
            &mut self.response_sample,
            &mut self.response_schema,
            &mut self.request_sample,
            &mut self.request_schema,
        ]
        .into_iter()
        .flatten()
        {
            *location = resolve_config_location(base_dir, location);
        }
    }
}

impl HandlerConfig {
    /// Parse configuration text. Locations are left as written.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve every relative file location against `base_dir`.
    pub fn resolve_locations(&mut self, base_dir: &Path) {
        if let Some(base_schema) = &mut self.base_schema {
            *base_schema = resolve_config_location(base_dir, base_schema);
        }
        for operation in &mut self.operations {
            operation.resolve_locations(base_dir);
        }
    }

    /// Fail early on a base URL that cannot be parsed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<HandlerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = HandlerConfig::parse(path, &content)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    config.resolve_locations(base_dir);
    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        operations = config.operations.len(),
        "loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
baseUrl: http://api.test
baseSchema: ./base.graphql
operationHeaders:
  Authorization: "Bearer {context.token}"
operations:
  - field: item
    type: Query
    method: get
    path: /items/{args.id}
    responseSample: ./samples/item.json
    responseTypeName: Item
  - field: createItem
    path: /items
    requestSchema: /abs/item-input.json
    responseSchema: https://schemas.test/item.json
"#;

    #[test]
    fn parses_camel_case_keys() {
        let config = HandlerConfig::parse(Path::new("config.yaml"), CONFIG).unwrap();
        assert_eq!(config.base_url, "http://api.test");
        assert!(!config.disable_timestamp_scalar);
        assert_eq!(
            config.operation_headers.get("Authorization").map(String::as_str),
            Some("Bearer {context.token}")
        );

        let item = &config.operations[0];
        assert_eq!(item.kind.as_deref(), Some("Query"));
        assert_eq!(item.method.as_deref(), Some("get"));
        assert!(item.has_explicit_response_type_name());

        let create = &config.operations[1];
        assert_eq!(create.kind, None);
        assert!(!create.has_explicit_response_type_name());

        let request_only = OperationConfig {
            request_type_name: Some("Filter".into()),
            ..OperationConfig::default()
        };
        assert!(!request_only.has_explicit_response_type_name());
    }

    #[test]
    fn load_resolves_relative_locations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, CONFIG).unwrap();

        let config = load_config(&path).unwrap();
        let base = dir.path().to_string_lossy().into_owned();

        assert_eq!(
            config.base_schema.as_deref(),
            Some(format!("{}/base.graphql", base).as_str())
        );
        assert_eq!(
            config.operations[0].response_sample.as_deref(),
            Some(format!("{}/samples/item.json", base).as_str())
        );
        assert_eq!(
            config.operations[1].request_schema.as_deref(),
            Some("/abs/item-input.json")
        );
        assert_eq!(
            config.operations[1].response_schema.as_deref(),
            Some("https://schemas.test/item.json")
        );
    }

    #[test]
    fn accepts_json_config() {
        let config = HandlerConfig::parse(
            Path::new("config.json"),
            r#"{"baseUrl": "http://api.test", "operations": [{"field": "ping", "path": "/ping"}]}"#,
        )
        .unwrap();
        assert_eq!(config.operations[0].field, "ping");
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = load_config(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let result = HandlerConfig::parse(Path::new("bad.yaml"), "operations: [");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "baseUrl: not a url\noperations: []\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }
}
