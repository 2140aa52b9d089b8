//! Worker-side embedding service.
//!
//! Runs on the bridge's worker thread:
//! - Lazily loads the embedding model on the first request
//! - Keeps it for the lifetime of the worker
//! - Enforces a constant output dimensionality

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::bridge::{Handler, WorkerError};
use crate::semantic::embeddings::{Embedder, EmbeddingError, Role};

/// A request for one embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedRequest {
    Query(String),
    Passage(String),
}

impl EmbedRequest {
    pub fn role(&self) -> Role {
        match self {
            EmbedRequest::Query(_) => Role::Query,
            EmbedRequest::Passage(_) => Role::Passage,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            EmbedRequest::Query(text) | EmbedRequest::Passage(text) => text,
        }
    }
}

/// Embedding handler owned by the worker thread.
///
/// `load` is called on the first request; a failed load is not cached, so
/// the next request tries again.
pub struct EmbeddingService<E, F> {
    load: F,
    model: OnceCell<E>,
    dimensions: Option<usize>,
}

impl<E, F> EmbeddingService<E, F>
where
    E: Embedder,
    F: Fn() -> Result<E, EmbeddingError>,
{
    pub fn new(load: F) -> Self {
        Self {
            load,
            model: OnceCell::new(),
            dimensions: None,
        }
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Output dimensionality, known after the first embedding.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed(&mut self, request: &EmbedRequest) -> Result<Vec<f32>, EmbeddingError> {
        let load = &self.load;
        let model = self.model.get_or_try_init(|| {
            log::info!("Loading embedding model...");
            let model = load()?;
            log::debug!("embedding model ready");
            Ok::<_, EmbeddingError>(model)
        })?;

        let vector = model.embed(request.role(), request.text())?;

        match self.dimensions {
            Some(expected) if expected != vector.len() => {
                Err(EmbeddingError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                })
            }
            Some(_) => Ok(vector),
            None => {
                self.dimensions = Some(vector.len());
                Ok(vector)
            }
        }
    }
}

impl<E, F> Handler for EmbeddingService<E, F>
where
    E: Embedder,
    F: Fn() -> Result<E, EmbeddingError>,
{
    type Request = EmbedRequest;
    type Response = Vec<f32>;

    async fn handle(&mut self, request: EmbedRequest) -> Result<Vec<f32>, WorkerError> {
        self.embed(&request).map_err(WorkerError::from)
    }
}
