//! Local ONNX embedding backend using `all-MiniLM-L6-v2`.
//!
//! Uses the `ort` crate for ONNX Runtime and `tokenizers` for tokenization.
//! Produces 384-dimensional embeddings entirely offline.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::embeddings::{EmbeddingBackend, EmbeddingError, OnnxConfig};

/// Local ONNX embedding client using `all-MiniLM-L6-v2`.
pub struct OnnxEmbeddingClient {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingClient")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingClient {
    /// Create a new ONNX embedding client.
    ///
    /// Loads the ONNX model and tokenizer from the paths specified in `config`.
    /// Returns `EmbeddingError::ModelNotFound` if either file is missing.
    pub fn new(config: OnnxConfig) -> Result<Self, EmbeddingError> {
        if !config.model_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.model_path.display().to_string(),
            });
        }
        if !config.tokenizer_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.tokenizer_path.display().to_string(),
            });
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(1)?))
            .and_then(|mut b| b.commit_from_file(&config.model_path))
            .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: config.dimensions,
        })
    }

    /// Embed a batch of texts on the blocking thread pool.
    ///
    /// The whole batch runs in one `spawn_blocking` call so the session lock
    /// is taken once per batch instead of once per text.
    async fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let dimensions = self.dimensions;

        tokio::task::spawn_blocking(move || {
            let mut session_guard = session
                .lock()
                .map_err(|e| EmbeddingError::OnnxInference(format!("session lock poisoned: {e}")))?;
            texts
                .iter()
                .map(|text| embed_sync(&mut session_guard, &tokenizer, text, dimensions))
                .collect()
        })
        .await
        .map_err(|e| EmbeddingError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vecs = self.embed_blocking(vec![text.to_string()]).await?;
        vecs.pop().ok_or(EmbeddingError::MissingEmbedding {
            expected: 1,
            actual: 0,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_blocking(texts.to_vec()).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Tokenize one text, run the model, and pool the hidden states into a
/// single normalized vector.
fn embed_sync(
    session: &mut Session,
    tokenizer: &tokenizers::Tokenizer,
    text: &str,
    expected_dims: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let token_type_ids: Vec<i64> = encoding
        .get_type_ids()
        .iter()
        .map(|&t| t as i64)
        .collect();

    // Single-text batch, so every tensor is [1, seq_len].
    let shape = vec![1i64, input_ids.len() as i64];
    let inputs = ort::inputs! {
        "input_ids" => input_tensor(shape.clone(), input_ids)?,
        "attention_mask" => input_tensor(shape.clone(), attention_mask.clone())?,
        "token_type_ids" => input_tensor(shape, token_type_ids)?,
    };

    let outputs = session
        .run(inputs)
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    // The model emits hidden states shaped [1, seq_len, hidden_dim].
    let (out_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;
    if out_shape.len() != 3 {
        return Err(EmbeddingError::OnnxInference(format!(
            "Expected 3D output, got {}D",
            out_shape.len()
        )));
    }

    let mut pooled = mean_pool(
        data,
        out_shape[1] as usize,
        out_shape[2] as usize,
        &attention_mask,
    );
    l2_normalize(&mut pooled);

    if pooled.len() != expected_dims {
        return Err(EmbeddingError::InvalidDimensions {
            expected: expected_dims,
            actual: pooled.len(),
        });
    }

    Ok(pooled)
}

fn input_tensor(shape: Vec<i64>, values: Vec<i64>) -> Result<Tensor<i64>, EmbeddingError> {
    Tensor::from_array((shape, values)).map_err(|e| EmbeddingError::OnnxInference(e.to_string()))
}

/// Average the token vectors, weighting each position by its attention mask
/// so padding never dilutes the embedding.
fn mean_pool(data: &[f32], seq_len: usize, hidden_dim: usize, attention_mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;

    for (tok_idx, row) in data.chunks_exact(hidden_dim).take(seq_len).enumerate() {
        let mask = attention_mask.get(tok_idx).copied().unwrap_or(0) as f32;
        if mask > 0.0 {
            mask_sum += mask;
            for (p, v) in pooled.iter_mut().zip(row) {
                *p += v * mask;
            }
        }
    }
    if mask_sum > 0.0 {
        for v in &mut pooled {
            *v /= mask_sum;
        }
    }
    pooled
}

/// Scale a vector to unit length. Zero vectors are left alone.
fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Resolve the default model directory.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("parley/models")
}

/// Resolve paths for the ONNX model and tokenizer.
///
/// If `onnx_model_path` from config is empty, uses the default location.
pub fn resolve_onnx_paths(onnx_model_path: &str) -> (PathBuf, PathBuf) {
    if onnx_model_path.is_empty() {
        let dir = default_model_dir();
        (
            dir.join("all-MiniLM-L6-v2.onnx"),
            dir.join("all-MiniLM-L6-v2-tokenizer.json"),
        )
    } else {
        let model = PathBuf::from(onnx_model_path);
        let stem = model
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let tokenizer = model.with_file_name(format!("{stem}-tokenizer.json"));
        (model, tokenizer)
    }
}

// ============================================================================
// TESTS
// ============================================================================
