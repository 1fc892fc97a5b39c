//! Transforms turning a generator's raw text into sub-tasks.
//!
//! Transform names are resolved lazily, when a dynamic node is reached, so
//! an unknown name surfaces as [`Error::UnknownTransform`] at run time
//! rather than during validation.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::{Error, Result};
use crate::tlog_debug;

/// Name of the transform used when a dynamic node names none.
pub const DEFAULT_TRANSFORM: &str = "parse_list";

/// A pure function from raw generator text to ordered sub-tasks.
pub type TransformFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Named transforms available to dynamic nodes.
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, TransformFn>,
}

impl TransformRegistry {
    /// A registry with no transforms at all.
    pub fn empty() -> Self {
        Self {
            transforms: BTreeMap::new(),
        }
    }

    /// Register (or replace) a transform.
    pub fn register<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.transforms.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Result<TransformFn> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTransform {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.transforms.keys().map(String::as_str).collect()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_TRANSFORM, parse_list);
        registry
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

/// Extract a list of sub-tasks from free-form generator output.
///
/// Prefers a JSON array spanning the first `[` to the last `]`. If there
/// is none, or it does not parse, falls back to one item per non-empty
/// line with bullet and numbering markers removed.
pub fn parse_list(text: &str) -> Vec<String> {
    let text = text.trim();

    if let Some(items) = parse_json_array(text) {
        return items;
    }

    tlog_debug!("parse_list: no JSON array, falling back to line splitting");
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let values: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
    )
}

/// Leading bullet (`-`, `*`, `•`) or number (`1.`, `2)`) of a list line.
static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]+|\d+[.)])\s*").unwrap());

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    match LIST_MARKER_RE.find(line) {
        Some(m) => line[m.end()..].trim(),
        None => line,
    }
}
