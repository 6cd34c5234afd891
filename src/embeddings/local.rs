//! Local sentence-transformers embeddings using candle.

use super::Embedder;
use crate::chunker::Tokenizer;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::path::PathBuf;
use tracing::info;

fn embedding_err(context: &str, err: impl std::fmt::Display) -> RagError {
    RagError::Embedding(format!("{}: {}", context, err))
}

/// Fetch a file from a Hugging Face model repo (cached locally by hf-hub).
fn fetch(model_id: &str, file: &str) -> Result<PathBuf> {
    let api = Api::new().map_err(|e| embedding_err("Failed to create HF Hub API", e))?;
    api.repo(Repo::new(model_id.to_string(), RepoType::Model))
        .get(file)
        .map_err(|e| embedding_err(&format!("Failed to get {} from {}", file, model_id), e))
}

/// Mean-pooled, L2-normalized BERT sentence embeddings.
pub struct LocalEmbeddingModel {
    model: BertModel,
    tokenizer: tokenizers::Tokenizer,
    device: Device,
    dimension: usize,
}

impl LocalEmbeddingModel {
    /// Load all-MiniLM-L6-v2, the model the corpus index is usually built with.
    pub fn load_minilm() -> Result<Self> {
        Self::load("sentence-transformers/all-MiniLM-L6-v2")
    }

    /// Load a sentence-transformers model by Hugging Face id.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let config_path = fetch(model_id, "config.json")?;
        let tokenizer_path = fetch(model_id, "tokenizer.json")?;
        let weights_path = fetch(model_id, "model.safetensors")
            .or_else(|_| fetch(model_id, "pytorch_model.bin"))?;

        let config_text =
            std::fs::read_to_string(&config_path).map_err(|e| RagError::io(&config_path, e))?;
        let config: BertConfig = serde_json::from_str(&config_text)
            .map_err(|e| embedding_err("Failed to parse model config", e))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| embedding_err("Failed to load tokenizer", e))?;

        // SAFETY: the weights file is owned by the hf-hub cache and not mutated while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| embedding_err("Failed to load model weights", e))?
        };

        let model =
            BertModel::load(vb, &config).map_err(|e| embedding_err("Failed to load BERT model", e))?;

        info!(model = model_id, dimension = config.hidden_size, "loaded local embedding model");

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.hidden_size,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[&str]) -> candle_core::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| candle_core::Error::Msg(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut ids = Vec::with_capacity(texts.len() * max_len);
        let mut mask = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let mut padded_ids = encoding.get_ids().to_vec();
            let mut padded_mask = encoding.get_attention_mask().to_vec();
            padded_ids.resize(max_len, 0);
            padded_mask.resize(max_len, 0);
            ids.extend(padded_ids);
            mask.extend(padded_mask);
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(mask, shape, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over non-padding positions.
        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = (summed / counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norms)?;

        normalized.to_vec2::<f32>()
    }
}

#[async_trait]
impl Embedder for LocalEmbeddingModel {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode_batch(texts)
            .map_err(|e| embedding_err("Local embedding failed", e))
    }
}

/// Hugging Face tokenizer usable by the chunker (token ids as `u32`).
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    /// Load `tokenizer.json` from a Hugging Face repo, e.g. `Xenova/gpt-4` for cl100k.
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let path = fetch(model_id, "tokenizer.json")?;
        let inner = tokenizers::Tokenizer::from_file(&path)
            .map_err(|e| embedding_err("Failed to load tokenizer", e))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    type Token = u32;

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| embedding_err("Tokenization failed", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.inner
            .decode(tokens, false)
            .map_err(|e| embedding_err("Detokenization failed", e))
    }
}
