use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::bridge::channel::MIN_CAPACITY;
use crate::bridge::{BridgeOptions, DEFAULT_BUFFER_SIZE};
use crate::filter::QueryContext;
use crate::semantic::{FastEmbedder, DEFAULT_MODEL, DEFAULT_SIMILARITY_THRESHOLD};

const CONFIG_FILE: &str = "config.yaml";

/// Default directory for downloaded models, relative to the base dir
const DEFAULT_CACHE_DIR: &str = ".cache";
/// Default time allowed for the worker handshake
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;

/// Configuration for the embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "multilingual-e5-base")
    #[serde(default = "default_model")]
    pub model: String,

    /// Where models are downloaded; relative paths are under the base dir
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            cache_dir: default_cache_dir(),
            show_download_progress: true,
        }
    }
}

/// Configuration for the embedding worker bridge
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Response buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Worker handshake timeout; `null` waits forever
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: Option<u64>,

    /// Per-call timeout; `null` waits forever
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            startup_timeout_ms: default_startup_timeout_ms(),
            call_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            buffer_size: self.buffer_size,
            startup_timeout: self.startup_timeout_ms.map(Duration::from_millis),
            call_timeout: self.call_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Configuration for filter evaluation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Use embeddings in `$text`; otherwise it matches on tokens only
    #[serde(default = "default_true")]
    pub semantic: bool,

    /// Cosine similarity a `$text` match must exceed [-1.0, 1.0]
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            semantic: true,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_startup_timeout_ms() -> Option<u64> {
    Some(DEFAULT_STARTUP_TIMEOUT_MS)
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        FastEmbedder::parse_model_name(&self.embedding.model)?;

        if self.bridge.buffer_size < MIN_CAPACITY {
            bail!(
                "bridge.buffer_size must be at least {MIN_CAPACITY}, got {}",
                self.bridge.buffer_size
            );
        }
        if self.bridge.startup_timeout_ms == Some(0) {
            bail!("bridge.startup_timeout_ms must be greater than 0");
        }
        if self.bridge.call_timeout_ms == Some(0) {
            bail!("bridge.call_timeout_ms must be greater than 0");
        }

        let threshold = self.query.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            bail!("query.similarity_threshold must be between -1.0 and 1.0, got {threshold}");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if
    /// the file does not exist.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote default config to {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config
            .validate()
            .with_context(|| format!("invalid {}", path.display()))?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Model cache directory, resolved against the base dir.
    pub fn cache_dir(&self) -> PathBuf {
        let dir = Path::new(&self.embedding.cache_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_path.join(dir)
        }
    }

    /// A query context carrying the configured threshold (no embedder).
    pub fn query_context(&self) -> QueryContext {
        QueryContext::new().with_similarity_threshold(self.query.similarity_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.embedding.model, "multilingual-e5-base");
        assert_eq!(config.embedding.cache_dir, ".cache");
        assert_eq!(config.bridge.buffer_size, 65536);
        assert_eq!(config.bridge.startup_timeout_ms, Some(30_000));
        assert_eq!(config.bridge.call_timeout_ms, None);
        assert!(config.query.semantic);
        assert!((config.query.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_options() {
        let bridge = BridgeConfig {
            buffer_size: 1024,
            startup_timeout_ms: None,
            call_timeout_ms: Some(1500),
        };
        let options = bridge.options();
        assert_eq!(options.buffer_size, 1024);
        assert_eq!(options.startup_timeout, None);
        assert_eq!(options.call_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.query.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bridge.buffer_size = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bridge.call_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.model = "word2vec".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_dir_resolution() {
        let mut config = Config::default();
        config.base_path = PathBuf::from("/srv/docsift");
        assert_eq!(config.cache_dir(), PathBuf::from("/srv/docsift/.cache"));

        config.embedding.cache_dir = "/var/cache/models".to_string();
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/models"));
    }
}
