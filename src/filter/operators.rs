//! Custom query operators.
//!
//! Each operator is a constructor that binds a field path and its
//! configuration into a [`Predicate`]. Configuration problems surface at
//! compile time; a document whose field has the wrong type fails the
//! predicate with [`FilterError::TypeMismatch`].

use std::collections::HashMap;

use serde_json::Value;

use super::calendar;
use super::compile::Predicate;
use super::errors::{type_name, FilterError, FilterResult};
use super::path::FieldPath;
use super::QueryContext;
use crate::semantic::cosine_similarity;

/// Builds a predicate from a field path and operator configuration.
pub type OperatorFactory = fn(&FieldPath, &Value, &QueryContext) -> FilterResult<Predicate>;

/// Named custom operators available to the compiler.
#[derive(Clone)]
pub struct OperatorRegistry {
    operators: HashMap<&'static str, OperatorFactory>,
}

impl OperatorRegistry {
    /// A registry with no custom operators.
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: OperatorFactory) {
        self.operators.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<OperatorFactory> {
        self.operators.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operators.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("$keyword", keyword);
        registry.register("$text", text);
        registry.register("$year", calendar::year);
        registry.register("$month", calendar::month);
        registry.register("$day", calendar::day);
        registry.register("$dayOfWeek", calendar::day_of_week);
        registry.register("$time", calendar::time);
        registry.register("$date", calendar::date);
        registry
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Resolve `path` in `doc`, requiring a string.
pub fn resolve_string(operator: &str, path: &FieldPath, doc: &Value) -> FilterResult<String> {
    match path.resolve(doc) {
        Some(Value::String(s)) => Ok(s),
        other => Err(FilterError::TypeMismatch {
            operator: operator.to_string(),
            path: path.to_string(),
            found: type_name(other.as_ref()),
        }),
    }
}

/// Read the search string from `"text"` or `{ "$search": "text" }`.
fn search_config(operator: &str, config: &Value) -> FilterResult<String> {
    let search = match config {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("$search")
            .or_else(|| map.get("search"))
            .and_then(Value::as_str),
        _ => None,
    };

    match search {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(FilterError::config(operator, "expected $search option")),
    }
}

/// `$keyword`: case-insensitive substring match.
pub fn keyword(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    let needle = search_config("$keyword", config)?.to_lowercase();
    let path = path.clone();

    Ok(Predicate::new("$keyword", move |doc| {
        let value = resolve_string("$keyword", &path, doc)?;
        Ok(value.to_lowercase().contains(&needle))
    }))
}

/// `$text`: every search token appears in the value, or the value is
/// semantically close to the search.
///
/// The search embedding is computed here, once. Per document the token
/// check runs first; the passage embedding is only requested when it fails.
pub fn text(path: &FieldPath, config: &Value, ctx: &QueryContext) -> FilterResult<Predicate> {
    let search = search_config("$text", config)?;
    let tokens = tokenize(&search);

    let semantic = match ctx.embedder() {
        Some(embedder) => Some((embedder.clone(), embedder.embed_query(&search)?)),
        None => None,
    };
    let threshold = ctx.similarity_threshold();

    log::debug!(
        "compiled $text on '{path}' for {search:?} (semantic: {})",
        semantic.is_some()
    );

    let path = path.clone();
    Ok(Predicate::new("$text", move |doc| {
        let value = resolve_string("$text", &path, doc)?;

        let lower = value.to_lowercase();
        if tokens.iter().all(|token| lower.contains(token.as_str())) {
            return Ok(true);
        }

        match &semantic {
            Some((embedder, query)) => {
                let passage = embedder.embed_passage(&value)?;
                Ok(cosine_similarity(query, &passage) > threshold)
            }
            None => Ok(false),
        }
    }))
}

/// Lowercased alphanumeric runs of `search`.
fn tokenize(search: &str) -> Vec<String> {
    search
        // Unicode letters count as word characters, so "Müller" stays one token.
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
