//! # Embedding providers
//!
//! The retrieval engine only needs two things from an encoder: a fixed output
//! [`dimension`](EmbeddingProvider::dimension) and a batch
//! [`encode`](EmbeddingProvider::encode) call. This module defines that seam and two
//! implementations:
//!
//! - [`MiniLmEmbedder`]: a sentence-transformers BERT model run with Candle (pure Rust),
//!   weights fetched from the Hugging Face Hub on first use.
//! - [`HashingEmbedder`]: a deterministic, offline bag-of-character-n-grams encoder.
//!   No download, no model; useful on air-gapped machines and in tests.
//!
//! Neither output is trusted to be normalized. The engine normalizes every vector
//! itself before it reaches the index.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Maps text to fixed-width dense vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Width of every vector returned by [`encode`](Self::encode).
    fn dimension(&self) -> usize;

    /// Encode a batch of texts, one vector per text, in input order.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<T> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).encode(texts)
    }
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).encode(texts)
    }
}

/// Sentence embeddings with a BERT-family model via Candle.
pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl MiniLmEmbedder {
    /// Longest token sequence fed to the model; longer inputs are truncated.
    const MAX_TOKENS: usize = 512;

    /// Download (or reuse from the local Hugging Face cache) and load `model_id`.
    pub fn load(model_id: &str, revision: &str) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        info!("Loading embedding model {model_id}@{revision}");

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
        let api_repo = api.repo(repo);

        let fetch = |name: &str| {
            api_repo
                .get(name)
                .map_err(|e| EmbeddingError::Download(format!("{name}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let raw_config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&raw_config)
            .map_err(|e| EmbeddingError::Model(format!("invalid model config: {e}")))?;
        let dimension = serde_json::from_str::<Value>(&raw_config)
            .ok()
            .and_then(|v| v["hidden_size"].as_u64())
            .ok_or_else(|| EmbeddingError::Model("model config has no hidden_size".into()))?
            as usize;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: Self::MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        // SAFETY: the safetensors file is owned by the hub cache and not modified while mapped.
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        Ok(pooled.to_vec1::<f32>()?)
    }

    /// Mean over token embeddings weighted by the attention mask.
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> Result<Tensor, EmbeddingError> {
        // [1, seq_len, 1] so it broadcasts over [1, seq_len, hidden]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }
}

impl EmbeddingProvider for MiniLmEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let progress = ProgressBar::new(texts.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("encoding {bar:40} {pos}/{len} ({eta})") {
            progress.set_style(style);
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode_one(text)?);
            progress.inc(1);
        }
        progress.finish_and_clear();
        debug!("Encoded {} texts", vectors.len());
        Ok(vectors)
    }
}

/// Deterministic offline encoder: character unigrams and bigrams hashed into
/// `dimension` signed buckets.
///
/// Texts that share characters score higher than texts that don't, which is enough to
/// rank statutes against a query sharing their key terms (e.g. "盗窃").
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, gram: &str) -> (usize, f32) {
        let hash = blake3::hash(gram.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        let value = u64::from_le_bytes(word);
        let sign = if value >> 63 == 0 { 1.0 } else { -1.0 };
        ((value % self.dimension as u64) as usize, sign)
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        for c in &chars {
            let (slot, sign) = self.bucket(c.encode_utf8(&mut [0; 4]));
            vector[slot] += sign;
        }
        for pair in chars.windows(2) {
            let gram: String = pair.iter().collect();
            let (slot, sign) = self.bucket(&gram);
            vector[slot] += 2.0 * sign;
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::Model(
                "hashing embedder needs a non-zero dimension".into(),
            ));
        }
        Ok(texts.iter().map(|text| self.encode_one(text)).collect())
    }
}
