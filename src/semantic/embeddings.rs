//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - Model selection by name with configurable cache directory
//! - Role framing (`query: ` / `passage: `) for asymmetric models
//! - Unit-length output vectors

use fastembed::{InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::bridge::WorkerError;
use crate::semantic::similarity::normalize;

/// Which side of an asymmetric comparison a text is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A search string
    Query,
    /// A candidate text searched against
    Passage,
}

impl Role {
    /// Input prefix expected by E5-style models.
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Query => "query: ",
            Role::Passage => "passage: ",
        }
    }
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<EmbeddingError> for WorkerError {
    fn from(err: EmbeddingError) -> Self {
        let name = match &err {
            EmbeddingError::InitFailed(_) => "InitFailed",
            EmbeddingError::EmbeddingFailed(_) => "EmbeddingFailed",
            EmbeddingError::InvalidModel(_) => "InvalidModel",
            EmbeddingError::DimensionMismatch { .. } => "DimensionMismatch",
        };
        WorkerError::new(name, err.to_string())
    }
}

/// Models selectable by name. The e5 family expects the role prefixes.
const SUPPORTED_MODELS: &[(&str, fastembed::EmbeddingModel)] = &[
    ("multilingual-e5-small", fastembed::EmbeddingModel::MultilingualE5Small),
    ("multilingual-e5-base", fastembed::EmbeddingModel::MultilingualE5Base),
    ("multilingual-e5-large", fastembed::EmbeddingModel::MultilingualE5Large),
    ("all-MiniLM-L6-v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15),
    ("bge-large-en-v1.5", fastembed::EmbeddingModel::BGELargeENV15),
];

/// Something that turns text into a vector.
pub trait Embedder {
    fn embed(&self, role: Role, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
}

impl FastEmbedder {
    /// Load the named model, downloading it into `cache_dir/models` if needed.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(show_download_progress);

        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Look a model up by name, ignoring case.
    pub(crate) fn parse_model_name(
        name: &str,
    ) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        SUPPORTED_MODELS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, model)| model.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = SUPPORTED_MODELS.iter().map(|(n, _)| *n).collect();
                EmbeddingError::InvalidModel(format!(
                    "{name} (supported: {})",
                    known.join(", ")
                ))
            })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, role: Role, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let input = format!("{}{}", role.prefix(), text);
        let embeddings = model
            .embed(vec![input], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let mut vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        normalize(&mut vector);
        Ok(vector)
    }
}
