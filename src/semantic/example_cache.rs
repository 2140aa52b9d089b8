//! Few-shot example store ranked by semantic similarity.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::BridgeError;
use crate::semantic::client::TextEmbedder;
use crate::semantic::similarity::cosine_similarity;

/// One phrase of a request and how it was interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    #[serde(alias = "request")]
    pub phrase: String,
    pub interpretation: String,
}

/// A worked example: a search request and the filter it maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub request: String,
    #[serde(default)]
    pub interpretation: Vec<Interpretation>,
    pub query: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// An example paired with its similarity to a search.
#[derive(Debug, Clone, Serialize)]
pub struct RankedExample<'a> {
    pub similarity: f32,
    pub example: &'a Example,
}

struct Entry {
    example: Example,
    vector: Vec<f32>,
}

/// Examples stored together with the passage embedding of their request.
pub struct ExampleCache {
    embedder: Arc<dyn TextEmbedder>,
    entries: Vec<Entry>,
}

impl ExampleCache {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    /// Embed the example's request and store it.
    pub fn add(&mut self, example: Example) -> Result<(), BridgeError> {
        let vector = self.embedder.embed_passage(&example.request)?;
        log::debug!("cached example '{}'", example.request);
        self.entries.push(Entry { example, vector });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every example with its similarity to `search`, best first.
    ///
    /// Examples whose similarity is undefined (NaN) are ranked last.
    pub fn find(&self, search: &str) -> Result<Vec<RankedExample<'_>>, BridgeError> {
        let query = self.embedder.embed_query(search)?;

        let mut ranked: Vec<RankedExample<'_>> = self
            .entries
            .iter()
            .map(|entry| RankedExample {
                similarity: cosine_similarity(&query, &entry.vector),
                example: &entry.example,
            })
            .collect();

        ranked.sort_by(|a, b| match (a.similarity.is_nan(), b.similarity.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b.similarity.total_cmp(&a.similarity),
        });

        Ok(ranked)
    }

    /// The example most similar to `search`, if any.
    pub fn best(&self, search: &str) -> Result<Option<RankedExample<'_>>, BridgeError> {
        Ok(self.find(search)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Maps a handful of words onto fixed axes.
    struct Keywords;

    impl Keywords {
        fn vector(text: &str) -> Vec<f32> {
            let text = text.to_lowercase();
            ["spa", "golf", "dinner"]
                .iter()
                .map(|word| if text.contains(word) { 1.0 } else { 0.0 })
                .collect()
        }
    }

    impl TextEmbedder for Keywords {
        fn embed_query(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
            Ok(Self::vector(text))
        }

        fn embed_passage(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
            Ok(Self::vector(text))
        }
    }

    fn example(request: &str) -> Example {
        Example {
            request: request.to_string(),
            interpretation: vec![],
            query: json!({}),
            context: None,
        }
    }

    #[test]
    fn test_find_ranks_best_first() {
        let mut cache = ExampleCache::new(Arc::new(Keywords));
        cache.add(example("golf lessons")).unwrap();
        cache.add(example("spa bookings")).unwrap();
        cache.add(example("spa and dinner")).unwrap();
        assert_eq!(cache.len(), 3);

        let ranked = cache.find("spa").unwrap();
        let order: Vec<&str> = ranked.iter().map(|r| r.example.request.as_str()).collect();
        assert_eq!(order, vec!["spa bookings", "spa and dinner", "golf lessons"]);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_similarity_ranks_last() {
        let mut cache = ExampleCache::new(Arc::new(Keywords));
        cache.add(example("weather report")).unwrap(); // zero vector
        cache.add(example("golf")).unwrap();

        let ranked = cache.find("golf and spa").unwrap();
        assert_eq!(ranked[0].example.request, "golf");
        assert!(ranked[1].similarity.is_nan());
    }

    #[test]
    fn test_best_on_empty_cache() {
        let cache = ExampleCache::new(Arc::new(Keywords));
        assert!(cache.is_empty());
        assert!(cache.best("spa").unwrap().is_none());
    }

    #[test]
    fn test_example_deserializes_without_optional_fields() {
        let ex: Example = serde_json::from_value(json!({
            "request": "bookings for tomorrow",
            "query": {"date": {"$date": "2024-05-16"}}
        }))
        .unwrap();
        assert!(ex.interpretation.is_empty());
        assert!(ex.context.is_none());
    }
}
