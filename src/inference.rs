//! Sample-to-schema inference.
//!
//! A sample payload stands in for a JSON Schema: its shape is turned into a
//! schema that describes it. Inferred schemas are persisted either to a
//! configured schema file or to the key-value cache, and are only reused while
//! they are newer than the sample they came from.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::cache::{CachedSchemaEntry, KeyValueCache};
use crate::error::LoadError;
use crate::loader::{is_url, modified_time, parse_json, ContentFetcher};

struct FormatPatterns {
    date_time: Regex,
    date: Regex,
    time: Regex,
    email: Regex,
}

fn format_patterns() -> &'static FormatPatterns {
    static PATTERNS: OnceLock<FormatPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| FormatPatterns {
        date_time: Regex::new(
            r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:\d{2})$",
        )
        .expect("date-time pattern is valid"),
        date: Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern is valid"),
        time: Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:\d{2})?$")
            .expect("time pattern is valid"),
        email: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"),
    })
}

/// Detect the JSON Schema `format` of a sample string.
pub fn detect_format(s: &str) -> Option<&'static str> {
    let patterns = format_patterns();
    if patterns.date_time.is_match(s) {
        Some("date-time")
    } else if patterns.date.is_match(s) {
        Some("date")
    } else if patterns.time.is_match(s) {
        Some("time")
    } else if s.parse::<Ipv4Addr>().is_ok() {
        Some("ipv4")
    } else if s.contains(':') && s.parse::<Ipv6Addr>().is_ok() {
        Some("ipv6")
    } else if patterns.email.is_match(s) {
        Some("email")
    } else if s.contains("://") && url::Url::parse(s).is_ok() {
        Some("uri")
    } else {
        None
    }
}

/// Infer a JSON Schema from a sample value.
///
/// Properties are never required, objects reject additional properties, and
/// an array is described by its first element.
pub fn infer_schema(sample: &Value) -> Value {
    match sample {
        Value::Object(obj) => {
            let properties: Map<String, Value> = obj
                .iter()
                .map(|(key, value)| (key.clone(), infer_schema(value)))
                .collect();
            json!({
                "type": "object",
                "properties": properties,
                "additionalProperties": false
            })
        }
        Value::Array(items) => {
            let item_schema = items.first().map(infer_schema).unwrap_or_else(|| json!({}));
            json!({ "type": "array", "items": item_schema })
        }
        Value::String(s) => match detect_format(s) {
            Some(format) => json!({ "type": "string", "format": format }),
            None => json!({ "type": "string" }),
        },
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "type": "integer" }),
        Value::Number(_) => json!({ "type": "number" }),
        Value::Bool(_) => json!({ "type": "boolean" }),
        Value::Null => json!({ "type": "null" }),
    }
}

/// Infers schemas from sample files, reusing cached or persisted results.
pub struct SampleInferencer {
    fetcher: Arc<dyn ContentFetcher>,
    cache: Arc<dyn KeyValueCache>,
    headers: HashMap<String, String>,
}

impl SampleInferencer {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        cache: Arc<dyn KeyValueCache>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            headers,
        }
    }

    /// Return the schema inferred from `sample_path`.
    ///
    /// Returns `None` when `schema_path` is a local file newer than the sample:
    /// that file is authoritative and should be loaded instead.
    pub async fn infer_or_load(
        &self,
        sample_path: &str,
        schema_path: Option<&str>,
    ) -> Result<Option<Value>, LoadError> {
        let sample_modified = modified_time(sample_path).await;

        if let Some(schema_path) = schema_path.filter(|p| !is_url(p)) {
            if let Some(schema_modified) = modified_time(schema_path).await {
                let newer = match sample_modified {
                    Some(sample_modified) => schema_modified > sample_modified,
                    None => true,
                };
                if newer {
                    tracing::debug!(sample_path, schema_path, "schema file is newer than sample");
                    return Ok(None);
                }
            }
        }

        if let Some(cached) = self.cache.get(sample_path) {
            match CachedSchemaEntry::from_value(cached) {
                Some(entry) if entry.is_fresh(sample_modified) => {
                    tracing::debug!(sample_path, "using cached inferred schema");
                    return Ok(Some(entry.schema));
                }
                _ => {
                    tracing::debug!(sample_path, "evicting stale inferred schema");
                    self.cache.delete(sample_path);
                }
            }
        }

        let content = self.fetcher.fetch(sample_path, &self.headers).await?;
        let sample = parse_json(sample_path, &content)?;
        let schema = infer_schema(&sample);

        match schema_path {
            Some(schema_path) => write_schema(schema_path, &schema).await,
            None => self
                .cache
                .set(sample_path, CachedSchemaEntry::new(schema.clone()).to_value()),
        }

        Ok(Some(schema))
    }
}

/// Persist an inferred schema. Failures are logged, never returned.
async fn write_schema(schema_path: &str, schema: &Value) {
    if is_url(schema_path) {
        tracing::warn!(schema_path, "cannot write inferred schema to a URL");
        return;
    }

    let content = match serde_json::to_string_pretty(schema) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(schema_path, error = %e, "failed to serialize inferred schema");
            return;
        }
    };

    if let Some(parent) = Path::new(schema_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(schema_path, error = %e, "failed to create schema directory");
                return;
            }
        }
    }

    match tokio::fs::write(schema_path, content).await {
        Ok(()) => tracing::info!(schema_path, "wrote inferred schema"),
        Err(e) => tracing::warn!(schema_path, error = %e, "failed to write inferred schema"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{millis_since_epoch, InMemoryCache};
    use crate::loader::DefaultFetcher;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn inferencer(cache: Arc<InMemoryCache>) -> SampleInferencer {
        SampleInferencer::new(Arc::new(DefaultFetcher::new()), cache, HashMap::new())
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn mtime(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().modified().unwrap()
    }

    #[test]
    fn infers_object_shape() {
        let schema = infer_schema(&json!({
            "id": 1,
            "price": 9.5,
            "name": "x",
            "active": true,
            "note": null,
            "tags": ["a", 1]
        }));

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema.get("required").is_none());
        assert_eq!(schema["properties"]["id"], json!({ "type": "integer" }));
        assert_eq!(schema["properties"]["price"], json!({ "type": "number" }));
        assert_eq!(schema["properties"]["name"], json!({ "type": "string" }));
        assert_eq!(schema["properties"]["active"], json!({ "type": "boolean" }));
        assert_eq!(schema["properties"]["note"], json!({ "type": "null" }));
        assert_eq!(
            schema["properties"]["tags"],
            json!({ "type": "array", "items": { "type": "string" } })
        );
    }

    #[test]
    fn empty_array_items_accept_anything() {
        assert_eq!(
            infer_schema(&json!([])),
            json!({ "type": "array", "items": {} })
        );
    }

    #[test]
    fn detects_string_formats() {
        assert_eq!(detect_format("2024-01-31T10:15:30Z"), Some("date-time"));
        assert_eq!(detect_format("2024-01-31"), Some("date"));
        assert_eq!(detect_format("10:15:30"), Some("time"));
        assert_eq!(detect_format("192.168.0.1"), Some("ipv4"));
        assert_eq!(detect_format("2001:db8::1"), Some("ipv6"));
        assert_eq!(detect_format("jane@example.com"), Some("email"));
        assert_eq!(detect_format("https://example.com/a"), Some("uri"));
        assert_eq!(detect_format("plain text"), None);
    }

    #[test]
    fn inferred_schema_accepts_its_sample() {
        let sample = json!({
            "id": 7,
            "email": "jane@example.com",
            "createdAt": "2024-01-31T10:15:30Z",
            "items": [{ "sku": "a-1", "qty": 2 }, { "sku": "b-2", "qty": 1 }]
        });
        let schema = infer_schema(&sample);
        let validator = jsonschema::validator_for(&schema).unwrap();
        assert!(validator.is_valid(&sample));

        // Additional properties are rejected.
        assert!(!validator.is_valid(&json!({ "id": 7, "extra": true })));
    }

    #[tokio::test]
    async fn newer_schema_file_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        let schema = dir.path().join("item.schema.json");
        std::fs::write(&sample, r#"{"id": 1}"#).unwrap();
        std::fs::write(&schema, r#"{"type": "object"}"#).unwrap();
        set_mtime(&schema, mtime(&sample) + Duration::from_secs(10));

        let result = inferencer(Arc::new(InMemoryCache::new()))
            .infer_or_load(sample.to_str().unwrap(), schema.to_str())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn older_schema_file_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        let schema = dir.path().join("item.schema.json");
        std::fs::write(&schema, r#"{"type": "string"}"#).unwrap();
        std::fs::write(&sample, r#"{"id": 1}"#).unwrap();
        set_mtime(&schema, mtime(&sample) - Duration::from_secs(10));

        let cache = Arc::new(InMemoryCache::new());
        let result = inferencer(cache.clone())
            .infer_or_load(sample.to_str().unwrap(), schema.to_str())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["properties"]["id"]["type"], "integer");
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&schema).unwrap()).unwrap();
        assert_eq!(written, result);
        // Persisted to the schema file, not the cache.
        assert!(cache.get(sample.to_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn missing_schema_file_is_created() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        let schema = dir.path().join("generated/item.schema.json");
        std::fs::write(&sample, r#"{"name": "x"}"#).unwrap();

        inferencer(Arc::new(InMemoryCache::new()))
            .infer_or_load(sample.to_str().unwrap(), schema.to_str())
            .await
            .unwrap()
            .unwrap();
        assert!(schema.exists());
    }

    #[tokio::test]
    async fn fresh_cache_entry_is_returned_unchanged() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        std::fs::write(&sample, r#"{"id": 1}"#).unwrap();
        let key = sample.to_str().unwrap();

        let cache = Arc::new(InMemoryCache::new());
        let cached = CachedSchemaEntry {
            timestamp: millis_since_epoch(mtime(&sample)) + 1_000,
            schema: json!({ "title": "cached" }),
        };
        cache.set(key, cached.to_value());

        let result = inferencer(cache.clone())
            .infer_or_load(key, None)
            .await
            .unwrap();
        assert_eq!(result, Some(json!({ "title": "cached" })));
        assert_eq!(cache.get(key), Some(cached.to_value()));
    }

    #[tokio::test]
    async fn stale_cache_entry_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        std::fs::write(&sample, r#"{"id": 1}"#).unwrap();
        let key = sample.to_str().unwrap();

        let cache = Arc::new(InMemoryCache::new());
        let stale = CachedSchemaEntry {
            timestamp: millis_since_epoch(mtime(&sample)) - 1_000,
            schema: json!({ "title": "stale" }),
        };
        cache.set(key, stale.to_value());

        let result = inferencer(cache.clone())
            .infer_or_load(key, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["properties"]["id"]["type"], "integer");

        let entry = CachedSchemaEntry::from_value(cache.get(key).unwrap()).unwrap();
        assert_eq!(entry.schema, result);
        assert!(entry.timestamp > stale.timestamp);
    }

    #[tokio::test]
    async fn touching_sample_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("item.json");
        std::fs::write(&sample, r#"{"id": 1}"#).unwrap();
        set_mtime(&sample, SystemTime::now() - Duration::from_secs(60));
        let key = sample.to_str().unwrap();

        let cache = Arc::new(InMemoryCache::new());
        let inferencer = inferencer(cache.clone());
        let first = inferencer.infer_or_load(key, None).await.unwrap().unwrap();
        assert_eq!(first["properties"]["id"]["type"], "integer");

        // The sample changes after the entry was created.
        std::fs::write(&sample, r#"{"id": "one"}"#).unwrap();
        set_mtime(&sample, SystemTime::now() + Duration::from_secs(60));

        let second = inferencer.infer_or_load(key, None).await.unwrap().unwrap();
        assert_eq!(second["properties"]["id"]["type"], "string");
    }

    #[tokio::test]
    async fn remote_sample_is_fetched_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/samples/user.json")
            .with_body(r#"{"email": "jane@example.com"}"#)
            .expect(1)
            .create_async()
            .await;
        let url = format!("{}/samples/user.json", server.url());

        let inferencer = inferencer(Arc::new(InMemoryCache::new()));
        let first = inferencer.infer_or_load(&url, None).await.unwrap().unwrap();
        let second = inferencer.infer_or_load(&url, None).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first["properties"]["email"]["format"], "email");
        mock.assert_async().await;
    }
}
