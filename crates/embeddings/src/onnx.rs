//! Sentence-Transformers inference with ONNX Runtime

use ndarray::Array2;
use ort::{session::Session, value::TensorRef};
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::{normalize_vector, EmbedError, Embedder, EmbeddingConfig};

/// Text embeddings extractor (e.g., all-MiniLM-L6-v2, 384-dim)
pub struct OnnxTextEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
    dimension: Option<usize>,
}

impl OnnxTextEmbedder {
    /// Load the model and tokenizer named by `config`.
    ///
    /// # Errors
    /// Returns [`EmbedError::Unavailable`] when either file cannot be loaded
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbedError> {
        let model_path = config
            .model_path
            .clone()
            .ok_or_else(|| EmbedError::Unavailable("no ONNX model path configured".to_string()))?;
        let tokenizer_path = match &config.tokenizer_path {
            Some(path) => path.clone(),
            None => default_tokenizer_path(&model_path)?,
        };

        info!("Loading text embedding model from: {}", model_path.display());
        let session = Session::builder()
            .and_then(|mut builder| builder.commit_from_file(&model_path))
            .map_err(|e| {
                EmbedError::Unavailable(format!(
                    "Failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        info!("Loading tokenizer from: {}", tokenizer_path.display());
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::Unavailable(format!("Failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..Default::default()
            }))
            .map_err(|e| EmbedError::Unavailable(format!("Failed to configure truncation: {e}")))?;

        Ok(Self {
            session,
            tokenizer,
            config,
            dimension: None,
        })
    }

    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Backend(format!("Tokenization failed: {e}")))?;

        let attention_mask = encoding.get_attention_mask();
        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&t| i64::from(t)).collect();
        let mask_i64: Vec<i64> = attention_mask.iter().map(|&m| i64::from(m)).collect();
        let seq_len = input_ids.len();

        let shape_err = |e: ndarray::ShapeError| {
            EmbedError::Backend(format!("Failed to build input tensor: {e}"))
        };
        let input_ids_array =
            Array2::from_shape_vec((1, seq_len), input_ids).map_err(shape_err)?;
        let attention_mask_array =
            Array2::from_shape_vec((1, seq_len), mask_i64).map_err(shape_err)?;
        // Single-sentence input: all token types are zero
        let token_type_ids_array = Array2::<i64>::zeros((1, seq_len));

        let input_ids_tensor =
            TensorRef::from_array_view(input_ids_array.view()).map_err(classify)?;
        let attention_mask_tensor =
            TensorRef::from_array_view(attention_mask_array.view()).map_err(classify)?;
        let token_type_ids_tensor =
            TensorRef::from_array_view(token_type_ids_array.view()).map_err(classify)?;

        let outputs = self
            .session
            .run(ort::inputs![
                input_ids_tensor,
                attention_mask_tensor,
                token_type_ids_tensor
            ])
            .map_err(classify)?;

        // last_hidden_state [1, seq_len, hidden_dim]
        let (shape, hidden_states) = outputs[0].try_extract_tensor::<f32>().map_err(classify)?;
        if shape.len() != 3 {
            return Err(EmbedError::Backend(format!(
                "Unexpected hidden state shape {shape:?}"
            )));
        }
        let hidden_dim = shape[2] as usize;

        // Mean pooling weighted by the attention mask
        let mut pooled = vec![0.0f32; hidden_dim];
        let mut sum_mask = 0.0f32;
        for (i, &mask) in attention_mask.iter().enumerate().take(seq_len) {
            let mask = mask as f32;
            sum_mask += mask;
            let row = &hidden_states[i * hidden_dim..(i + 1) * hidden_dim];
            for (pooled_val, hidden) in pooled.iter_mut().zip(row) {
                *pooled_val += hidden * mask;
            }
        }
        if sum_mask > 0.0 {
            for val in &mut pooled {
                *val /= sum_mask;
            }
        }

        if self.config.normalize {
            normalize_vector(&mut pooled);
        }
        Ok(pooled)
    }
}

impl Embedder for OnnxTextEmbedder {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(
            "Extracting text embeddings for {} texts using {}",
            texts.len(),
            self.config.model
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = self.embed_one(text)?;
            match self.dimension {
                Some(expected) if expected != embedding.len() => {
                    return Err(EmbedError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
                Some(_) => {}
                None => self.dimension = Some(embedding.len()),
            }
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }
}

/// `tokenizer.json` next to the model file
fn default_tokenizer_path(model_path: &Path) -> Result<PathBuf, EmbedError> {
    model_path
        .parent()
        .map(|dir| dir.join("tokenizer.json"))
        .ok_or_else(|| EmbedError::Unavailable("Invalid model path".to_string()))
}

/// ONNX Runtime reports allocation failures as plain errors; sort them out by message
fn classify(err: ort::Error) -> EmbedError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    let exhausted = ["out of memory", "bad_alloc", "failed to allocate"];
    if exhausted.iter().any(|needle| lower.contains(needle)) {
        EmbedError::ResourceExhausted(message)
    } else {
        EmbedError::Backend(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_path() {
        let result = OnnxTextEmbedder::new(EmbeddingConfig::default());
        assert!(matches!(result, Err(EmbedError::Unavailable(_))));
    }

    #[test]
    fn test_default_tokenizer_path() {
        let path = default_tokenizer_path(Path::new("models/minilm/model.onnx")).unwrap();
        assert_eq!(path, PathBuf::from("models/minilm/tokenizer.json"));
    }

    #[test]
    #[ignore] // Requires all-MiniLM-L6-v2 ONNX model and tokenizer
    fn test_minilm_embeddings_are_unit_length() {
        let config = EmbeddingConfig {
            model_path: Some(PathBuf::from("models/all-MiniLM-L6-v2/model.onnx")),
            ..Default::default()
        };
        let mut embedder = OnnxTextEmbedder::new(config).unwrap();
        let vectors = embedder
            .embed(&["Krebs cycle ATP yield".to_string(), "bar chart".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 384);
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
