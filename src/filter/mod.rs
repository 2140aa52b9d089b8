//! Document filters in the embedded-document query language, extended with
//! keyword, semantic and calendar operators.
//!
//! A filter is compiled once against a [`QueryContext`] and then tested
//! against any number of JSON documents.

mod calendar;
mod compile;
mod errors;
mod eval;
mod operators;
mod path;

use std::sync::Arc;

use serde_json::Value;

use crate::semantic::{TextEmbedder, DEFAULT_SIMILARITY_THRESHOLD};

pub use compile::{Matcher, Predicate};
pub use errors::{FilterError, FilterResult};
pub use operators::{resolve_string, OperatorFactory, OperatorRegistry};
pub use path::FieldPath;

/// What a filter is compiled against: the embedder used by `$text`, the
/// semantic threshold and the custom operators.
#[derive(Clone)]
pub struct QueryContext {
    embedder: Option<Arc<dyn TextEmbedder>>,
    similarity_threshold: f32,
    operators: OperatorRegistry,
}

impl QueryContext {
    /// No embedder (`$text` matches on tokens only) and the default operators.
    pub fn new() -> Self {
        Self {
            embedder: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            operators: OperatorRegistry::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Register an extra custom operator, replacing any of the same name.
    pub fn with_operator(mut self, name: &'static str, factory: OperatorFactory) -> Self {
        self.operators.register(name, factory);
        self
    }

    pub fn embedder(&self) -> Option<&Arc<dyn TextEmbedder>> {
        self.embedder.as_ref()
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled filter.
#[derive(Debug)]
pub struct Query {
    matcher: Matcher,
}

impl Query {
    /// Compile `filter`. Custom operators are bound here; `$text` embeds its
    /// search string during this call.
    pub fn compile(filter: &Value, ctx: &QueryContext) -> FilterResult<Self> {
        let matcher = compile::compile(filter, ctx)?;
        Ok(Self { matcher })
    }

    /// Whether `doc` matches.
    pub fn test(&self, doc: &Value) -> FilterResult<bool> {
        self.matcher.test(doc)
    }

    /// Documents that match, in order. The first evaluation error aborts.
    pub fn filter<'a>(&self, docs: &'a [Value]) -> FilterResult<Vec<&'a Value>> {
        let mut matched = Vec::new();
        for doc in docs {
            if self.test(doc)? {
                matched.push(doc);
            }
        }
        Ok(matched)
    }
}
