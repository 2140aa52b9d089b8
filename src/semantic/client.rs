//! Caller-side access to the embedding worker.

use crate::bridge::{BridgeError, BridgeOptions, SyncBridge};
use crate::config::Config;
use crate::semantic::embeddings::{Embedder, EmbeddingError, FastEmbedder};
use crate::semantic::service::{EmbedRequest, EmbeddingService};

/// Blocking text embedding, usable from synchronous predicates.
pub trait TextEmbedder: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, BridgeError>;
    fn embed_passage(&self, text: &str) -> Result<Vec<f32>, BridgeError>;
}

/// Embeds text on a dedicated worker thread through a [`SyncBridge`].
pub struct EmbeddingClient {
    bridge: SyncBridge<EmbedRequest, Vec<f32>>,
}

impl EmbeddingClient {
    /// Start a worker backed by the fastembed model named in `config`.
    ///
    /// The model itself is loaded by the worker on the first request.
    pub fn start(config: &Config) -> Result<Self, BridgeError> {
        let model = config.embedding.model.clone();
        let cache_dir = config.cache_dir();
        let show_progress = config.embedding.show_download_progress;

        log::debug!("starting embedding worker for model '{model}'");

        Self::with_embedder(config.bridge.options(), move || {
            let embedder = FastEmbedder::new(&model, cache_dir.clone(), show_progress)?;
            log::info!("embedding model '{}' loaded", embedder.name());
            Ok(embedder)
        })
    }

    /// Start a worker whose model is produced by `load`.
    pub fn with_embedder<E, F>(options: BridgeOptions, load: F) -> Result<Self, BridgeError>
    where
        E: Embedder + 'static,
        F: Fn() -> Result<E, EmbeddingError> + Send + 'static,
    {
        let bridge = SyncBridge::spawn("embedding-worker", options, move || {
            Ok(EmbeddingService::new(load))
        })?;

        Ok(Self { bridge })
    }
}

impl TextEmbedder for EmbeddingClient {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
        self.bridge.call(EmbedRequest::Query(text.to_string()))
    }

    fn embed_passage(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
        self.bridge.call(EmbedRequest::Passage(text.to_string()))
    }
}
