//! Local text embeddings and similarity.
//!
//! This module provides embedding inference with fastembed-rs, run on a
//! dedicated worker thread and reached through the blocking bridge.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for embedding generation
//! - `service`: Worker-side handler that owns the model
//! - `client`: Caller-side blocking embedder
//! - `similarity`: Cosine similarity and normalization
//! - `example_cache`: Few-shot examples ranked by similarity

pub mod client;
pub mod embeddings;
pub mod example_cache;
pub mod service;
pub mod similarity;

pub use client::{EmbeddingClient, TextEmbedder};
pub use embeddings::{Embedder, EmbeddingError, FastEmbedder, Role};
pub use example_cache::{Example, ExampleCache, Interpretation, RankedExample};
pub use service::{EmbedRequest, EmbeddingService};
pub use similarity::cosine_similarity;

/// Default embedding model name (multilingual, with query/passage prefixes)
pub const DEFAULT_MODEL: &str = "multilingual-e5-base";

/// Similarity above which a `$text` predicate counts as a semantic match
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;
