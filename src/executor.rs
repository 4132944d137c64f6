//! Request execution for compiled operations.
//!
//! Each root field gets an [`OperationResolver`]. At invocation time it
//! interpolates the path and header templates against `{root, args, context,
//! info}`, sends the request through an [`HttpDispatcher`], and normalizes the
//! upstream body into either a value or a [`ResolverError`]. Fields with a
//! pub/sub topic return a stream of published payloads instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::error::ResolverError;
use crate::interpolate::interpolate;
use crate::types::HttpMethod;

/// Default timeout for upstream requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered messages per pub/sub topic before slow subscribers lag.
const TOPIC_CAPACITY: usize = 64;

/// A fully interpolated upstream request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// Status and full text of an upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub text: String,
}

/// Sends requests upstream. Caching, pooling and timeouts belong to the implementation.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, ResolverError>;
}

/// Dispatches with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestDispatcher {
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, ResolverError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes()).map_err(
            |_| ResolverError::UnknownMethod {
                method: request.method.to_string(),
            },
        )?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let transport = |e: reqwest::Error| ResolverError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        Ok(HttpResponse { status, text })
    }
}

/// Topic-based publish/subscribe used by subscription fields.
pub trait PubSub: Send + Sync {
    /// Stream of payloads published to `topic` from now on.
    fn subscribe(&self, topic: &str) -> BoxStream<'static, Value>;

    /// Publish to every current subscriber; returns how many received it.
    fn publish(&self, topic: &str, payload: Value) -> usize;
}

/// Process-local pub/sub over `tokio::sync::broadcast` channels.
#[derive(Default)]
pub struct InMemoryPubSub {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl PubSub for InMemoryPubSub {
    fn subscribe(&self, topic: &str) -> BoxStream<'static, Value> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();
        stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(topic = %topic, skipped, "subscriber lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }

    fn publish(&self, topic: &str, payload: Value) -> usize {
        self.sender(topic).send(payload).unwrap_or(0)
    }
}

/// The four-part execution context a resolver is invoked with.
#[derive(Debug, Clone, Default)]
pub struct ResolveParams {
    pub root: Value,
    pub args: Map<String, Value>,
    pub context: Value,
    pub info: Value,
}

impl ResolveParams {
    pub fn new(args: Map<String, Value>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_root(mut self, root: Value) -> Self {
        self.root = root;
        self
    }

    /// Data the interpolation templates are resolved against.
    pub fn interpolation_data(&self) -> Value {
        json!({
            "root": self.root,
            "args": self.args,
            "context": self.context,
            "info": self.info,
        })
    }
}

/// Result of a resolver invocation.
pub enum ResolverOutput {
    Value(Value),
    /// Lazy, ordinarily infinite stream of published payloads.
    Stream(BoxStream<'static, Value>),
}

impl ResolverOutput {
    pub fn into_value(self) -> Option<Value> {
        match self {
            ResolverOutput::Value(value) => Some(value),
            ResolverOutput::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<BoxStream<'static, Value>> {
        match self {
            ResolverOutput::Stream(stream) => Some(stream),
            ResolverOutput::Value(_) => None,
        }
    }
}

impl std::fmt::Debug for ResolverOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolverOutput::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ResolverOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Resolver compiled from one operation.
pub struct OperationResolver {
    field: String,
    method: HttpMethod,
    base_url: String,
    path: String,
    headers: IndexMap<String, String>,
    dispatcher: Arc<dyn HttpDispatcher>,
    topic: Option<(String, Arc<dyn PubSub>)>,
}

impl OperationResolver {
    pub fn new(
        field: impl Into<String>,
        method: HttpMethod,
        base_url: impl Into<String>,
        path: impl Into<String>,
        dispatcher: Arc<dyn HttpDispatcher>,
    ) -> Self {
        Self {
            field: field.into(),
            method,
            base_url: base_url.into(),
            path: path.into(),
            headers: IndexMap::new(),
            dispatcher,
            topic: None,
        }
    }

    /// Header templates, interpolated on every request.
    pub fn with_headers(mut self, headers: IndexMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Resolve through a pub/sub topic template instead of HTTP.
    pub fn with_topic(mut self, topic: impl Into<String>, pubsub: Arc<dyn PubSub>) -> Self {
        self.topic = Some((topic.into(), pubsub));
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn is_subscription(&self) -> bool {
        self.topic.is_some()
    }

    pub async fn resolve(&self, params: ResolveParams) -> Result<ResolverOutput, ResolverError> {
        if let Some((topic, pubsub)) = &self.topic {
            let topic = interpolate(topic, &params.interpolation_data());
            tracing::debug!(field = %self.field, topic = %topic, "subscribing");
            return Ok(ResolverOutput::Stream(pubsub.subscribe(&topic)));
        }

        let request = self.build_request(&params)?;
        tracing::debug!(field = %self.field, method = %request.method, url = %request.url, "dispatching request");
        let response = self.dispatcher.dispatch(request).await?;
        normalize_response(&response.text).map(ResolverOutput::Value)
    }

    /// Interpolate templates and attach `input` according to the method.
    pub fn build_request(&self, params: &ResolveParams) -> Result<HttpRequest, ResolverError> {
        let data = params.interpolation_data();
        let path = interpolate(&self.path, &data);
        let mut url = join_url(&self.base_url, &path);

        let mut headers = IndexMap::new();
        for (name, template) in &self.headers {
            let value = interpolate(template, &data);
            // A header whose variables are all missing is left out.
            if !value.is_empty() {
                headers.insert(name.clone(), value);
            }
        }

        let mut body = None;
        if let Some(input) = params.args.get("input").filter(|v| !v.is_null()) {
            match self.method {
                HttpMethod::Get | HttpMethod::Delete => {
                    url = append_query(&url, input)?;
                }
                HttpMethod::Post | HttpMethod::Put => {
                    body = Some(input.to_string());
                    headers
                        .entry("Content-Type".to_string())
                        .or_insert_with(|| "application/json".to_string());
                }
                other => {
                    return Err(ResolverError::UnknownMethod {
                        method: other.to_string(),
                    })
                }
            }
        }

        Ok(HttpRequest {
            method: self.method,
            url,
            headers,
            body,
        })
    }
}

/// Join an interpolated path onto the base URL.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Flatten the top-level pairs of `input` into the query string.
fn append_query(url: &str, input: &Value) -> Result<String, ResolverError> {
    let mut parsed = url::Url::parse(url).map_err(|source| ResolverError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let pairs: Vec<(String, String)> = match input {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect(),
        other => vec![("input".to_string(), query_value(other))],
    };

    if !pairs.is_empty() {
        let mut query = parsed.query_pairs_mut();
        for (key, value) in &pairs {
            query.append_pair(key, value);
        }
    }
    Ok(parsed.to_string())
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn an upstream body into the resolved value or the error it reports.
pub fn normalize_response(text: &str) -> Result<Value, ResolverError> {
    let body: Value = serde_json::from_str(text).map_err(|_| ResolverError::NonJsonResponse {
        body: text.to_string(),
    })?;

    if let Value::Object(map) = &body {
        for key in ["errors", "_errors"] {
            match map.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(errors)) => {
                    return Err(ResolverError::Aggregate {
                        errors: errors.clone(),
                    })
                }
                Some(other) => {
                    return Err(ResolverError::Aggregate {
                        errors: vec![other.clone()],
                    })
                }
            }
        }
        if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
            return Err(ResolverError::Upstream {
                payload: error.clone(),
            });
        }
    }

    Ok(body)
}
