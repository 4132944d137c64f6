//! Key-value store for inferred schemas.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimal key-value cache contract.
///
/// TTL and eviction policy belong to the implementation.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn delete(&self, key: &str);
}

/// Process-local cache without expiry.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.lock().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.lock().remove(key);
    }
}

/// Inferred schema stored under its sample path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSchemaEntry {
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub schema: Value,
}

impl CachedSchemaEntry {
    pub fn new(schema: Value) -> Self {
        Self {
            timestamp: millis_since_epoch(SystemTime::now()),
            schema,
        }
    }

    /// An entry is valid only while it is strictly newer than the sample.
    ///
    /// Samples without a modification time (URLs) never invalidate entries.
    pub fn is_fresh(&self, sample_modified: Option<SystemTime>) -> bool {
        match sample_modified {
            Some(modified) => self.timestamp > millis_since_epoch(modified),
            None => true,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode a cached value. Values of any other shape are ignored.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

pub(crate) fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
