//! Content retrieval and the shared external file cache.
//!
//! Schema files, sample payloads and the base SDL are fetched through a
//! [`ContentFetcher`]. Parsed JSON documents are kept in a [`FileCache`] keyed
//! by location so a document referenced by several operations, or by both the
//! input and output side of one operation, is fetched and parsed only once.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LoadError;

/// Default timeout for fetching remote schema files.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves raw content from a file path or URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(
        &self,
        location: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, LoadError>;
}

/// Reads local files with `tokio::fs` and URLs with `reqwest`.
#[derive(Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for DefaultFetcher {
    async fn fetch(
        &self,
        location: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, LoadError> {
        if is_url(location) {
            let mut request = self.client.get(location);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request
                .send()
                .await
                .map_err(|source| LoadError::NetworkError {
                    url: location.to_string(),
                    source,
                })?;

            // Check for HTTP errors before reading the body
            if !response.status().is_success() {
                return Err(LoadError::HttpStatus {
                    url: location.to_string(),
                    status: response.status().as_u16(),
                });
            }

            response
                .text()
                .await
                .map_err(|source| LoadError::NetworkError {
                    url: location.to_string(),
                    source,
                })
        } else {
            let path = Path::new(location);
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| match source.kind() {
                    std::io::ErrorKind::NotFound => LoadError::FileNotFound {
                        path: path.to_path_buf(),
                    },
                    _ => LoadError::ReadError {
                        path: path.to_path_buf(),
                        source,
                    },
                })
        }
    }
}

/// Parse fetched content as JSON, naming the location on failure.
pub fn parse_json(location: &str, content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson {
        location: location.to_string(),
        source,
    })
}

/// Parsed documents keyed by location, shared across one compilation.
///
/// Inserts never replace an existing document.
#[derive(Debug, Default)]
pub struct FileCache {
    documents: Mutex<HashMap<String, Arc<Value>>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &str) -> Option<Arc<Value>> {
        self.lock().get(location).cloned()
    }

    pub fn contains(&self, location: &str) -> bool {
        self.lock().contains_key(location)
    }

    /// Store a document unless one is already cached for `location`.
    ///
    /// Returns whichever document ends up cached.
    pub fn insert_if_absent(&self, location: &str, document: Value) -> Arc<Value> {
        self.lock()
            .entry(location.to_string())
            .or_insert_with(|| Arc::new(document))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Return the cached document, fetching and parsing it on a miss.
    pub async fn load(
        &self,
        location: &str,
        fetcher: &dyn ContentFetcher,
        headers: &HashMap<String, String>,
    ) -> Result<Arc<Value>, LoadError> {
        if let Some(document) = self.get(location) {
            return Ok(document);
        }

        tracing::debug!(location, "fetching schema document");
        let content = fetcher.fetch(location, headers).await?;
        let document = parse_json(location, &content)?;
        Ok(self.insert_if_absent(location, document))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Value>>> {
        // A poisoned map still holds complete entries.
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Load `location` and every document it transitively references via `$ref`.
///
/// After this returns, type synthesis can resolve all external references
/// from the cache without suspending.
pub async fn prefetch_refs(
    cache: &FileCache,
    fetcher: &dyn ContentFetcher,
    headers: &HashMap<String, String>,
    location: &str,
) -> Result<(), LoadError> {
    let mut visited = HashSet::new();
    let mut pending = vec![location.to_string()];

    while let Some(current) = pending.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }

        let document = cache.load(&current, fetcher, headers).await?;

        let mut refs = Vec::new();
        collect_refs(&document, &mut refs);
        for reference in refs {
            let (file_part, _) = split_ref(&reference);
            if file_part.is_empty() {
                continue;
            }
            let target = resolve_location(&current, file_part);
            if !visited.contains(&target) {
                pending.push(target);
            }
        }
    }

    Ok(())
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.get("$ref").and_then(|v| v.as_str()) {
                out.push(reference.to_string());
            }
            for child in obj.values() {
                collect_refs(child, out);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Split a `$ref` into its document part and optional `#` fragment.
pub fn split_ref(reference: &str) -> (&str, Option<&str>) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], Some(&reference[idx..])),
        None => (reference, None),
    }
}

/// Resolve a referenced document relative to the document referencing it.
pub fn resolve_location(base: &str, reference: &str) -> String {
    if is_url(reference) {
        return reference.to_string();
    }

    if is_url(base) {
        return match url::Url::parse(base).and_then(|b| b.join(reference)) {
            Ok(joined) => joined.to_string(),
            Err(_) => reference.to_string(),
        };
    }

    let reference_path = Path::new(reference);
    let joined = if reference_path.is_absolute() {
        reference_path.to_path_buf()
    } else {
        Path::new(base)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(reference_path)
    };
    normalize_path(&joined).to_string_lossy().into_owned()
}

/// Resolve a configured location against the directory of the config file.
pub fn resolve_config_location(base_dir: &Path, location: &str) -> String {
    if is_url(location) || Path::new(location).is_absolute() {
        return location.to_string();
    }
    normalize_path(&base_dir.join(location))
        .to_string_lossy()
        .into_owned()
}

/// Lexically remove `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/Pet").
///
/// The fragment should start with '#'. An empty pointer returns the whole document.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(document);
    }

    let mut current = document;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            other => other.get(&key)?,
        };
    }
    Some(current)
}

/// Base name of a file path or URL, without its final extension.
pub fn base_name(location: &str) -> String {
    let trimmed = location.split(['?', '#']).next().unwrap_or(location);
    let last = trimmed
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(trimmed);
    Path::new(last)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| last.to_string())
}

/// Last modification time of a local file. URLs and missing files have none.
pub async fn modified_time(location: &str) -> Option<SystemTime> {
    if is_url(location) {
        return None;
    }
    tokio::fs::metadata(location).await.ok()?.modified().ok()
}
