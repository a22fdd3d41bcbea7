//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`LawRagConfig`] struct, which holds the LLM endpoint settings, the
//! embedding backend and every data path the knowledge base reads or writes, and a
//! [`load_config`] function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! ```no_run
//! use law_rag::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.data.laws);
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::PathBuf};
use tracing::debug;

use crate::embedding::{EmbeddingProvider, HashingEmbedder, MiniLmEmbedder};
use crate::error::EmbeddingError;
use crate::llm::CompletionSettings;

/// Represents the application's configuration.
///
/// Everything except `api_key` has a default, so a minimal file only needs the key.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct LawRagConfig {
    /// The API key used to authenticate requests to the completion API.
    pub api_key: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used by every agent.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    // Knowledge items retrieved per analysis.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub data: DataPaths,
}

/// Which encoder backs the knowledge index.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    MiniLm,
    Hashing,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,

    /// Hugging Face model id for the `minilm` backend.
    pub model_id: String,

    pub revision: String,

    /// Output width of the `hashing` backend. The `minilm` width comes from the model.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::MiniLm,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
            dimension: 384,
        }
    }
}

impl EmbeddingConfig {
    /// Construct the configured provider. Loading `minilm` may download the model.
    pub fn build_provider(&self) -> Result<Box<dyn EmbeddingProvider>, EmbeddingError> {
        let provider: Box<dyn EmbeddingProvider> = match self.backend {
            EmbeddingBackend::MiniLm => {
                Box::new(MiniLmEmbedder::load(&self.model_id, &self.revision)?)
            }
            EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(self.dimension)),
        };
        Ok(provider)
    }
}

/// Locations of the two collections and of the persisted index.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DataPaths {
    pub laws: PathBuf,
    pub cases: PathBuf,
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::in_dir("data")
    }
}

impl DataPaths {
    /// The conventional file names under `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            laws: dir.join("laws.json"),
            cases: dir.join("cases.json"),
            index: dir.join("knowledge_index.bin"),
            metadata: dir.join("knowledge_metadata.json"),
        }
    }
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_top_k() -> usize {
    10
}

impl LawRagConfig {
    /// A config with every default filled in and the given key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_k: default_top_k(),
            embedding: EmbeddingConfig::default(),
            data: DataPaths::default(),
        }
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid configuration.
pub fn load_config(file: &str) -> Result<LawRagConfig, Box<dyn Error>> {
    debug!("Loading config: {file}");
    let content = fs::read_to_string(file)?;
    let config: LawRagConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}
