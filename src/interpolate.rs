//! Interpolation templates and the context variables they reference.
//!
//! A template is a string with `{path}` placeholders, e.g. `/items/{args.id}`
//! or `Bearer {context.token}`. Paths are dotted lookups into the resolver's
//! execution data `{root, args, context, info}`. `env.NAME` reads the process
//! environment.

use std::sync::{Mutex, OnceLock};

use indexmap::IndexSet;
use regex::Regex;
use serde_json::Value;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"))
}

/// What a placeholder path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// `context.NAME`: must be supplied by the caller's execution context.
    Context(String),
    /// `args.NAME`: becomes a field argument.
    Argument(String),
    /// `env.NAME`
    Env(String),
    /// Anything else (`root.*`, `info.*`).
    Other(String),
}

impl Placeholder {
    pub fn parse(path: &str) -> Self {
        let head_and_name = |prefix: &str| {
            path.strip_prefix(prefix)
                .map(|rest| rest.split('.').next().unwrap_or(rest).to_string())
                .filter(|name| !name.is_empty())
        };

        if let Some(name) = head_and_name("context.") {
            Placeholder::Context(name)
        } else if let Some(name) = head_and_name("args.") {
            Placeholder::Argument(name)
        } else if let Some(name) = path.strip_prefix("env.").filter(|n| !n.is_empty()) {
            Placeholder::Env(name.to_string())
        } else {
            Placeholder::Other(path.to_string())
        }
    }
}

/// Placeholder paths of `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_pattern()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Replace every placeholder with the value found at its path in `data`.
///
/// Missing values render as the empty string. Strings are inserted raw; any
/// other value is inserted as its JSON text.
pub fn interpolate(template: &str, data: &Value) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = caps[1].trim();
            if let Placeholder::Env(name) = Placeholder::parse(path) {
                return std::env::var(name).unwrap_or_default();
            }
            match lookup(data, path) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    Some(current)
}

/// Ordered, deduplicated names of every `context.*` variable in the configuration.
#[derive(Debug, Default)]
pub struct ContextVariables {
    names: Mutex<IndexSet<String>>,
}

impl ContextVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str) {
        self.names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string());
    }

    /// Record the context variables referenced by `template`.
    pub fn record_template(&self, template: &str) {
        for path in placeholders(template) {
            if let Placeholder::Context(name) = Placeholder::parse(&path) {
                self.insert(&name);
            }
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
