//! Text embeddings for questions and region descriptions
//!
//! The matcher only needs batch-in, vectors-out. Two backends are provided:
//! - [`LexicalEmbedder`]: deterministic hashed bag-of-words, always available
//! - `OnnxTextEmbedder`: Sentence-Transformers (e.g., all-MiniLM-L6-v2) via
//!   ONNX Runtime, behind the `onnx` feature

pub mod lexical;
#[cfg(feature = "onnx")]
pub mod onnx;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use visual_region_common::RegionError;

pub use lexical::LexicalEmbedder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxTextEmbedder;

/// Errors that can occur while embedding text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    /// Memory or runtime exhaustion; callers may keep earlier batches
    #[error("Resource exhausted while embedding: {0}")]
    ResourceExhausted(String),

    #[error("Embedding backend failed: {0}")]
    Backend(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<EmbedError> for RegionError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::ResourceExhausted(msg) => RegionError::ResourceExhausted(msg),
            other => RegionError::CollaboratorUnavailable(other.to_string()),
        }
    }
}

/// Batch text embedding backend.
///
/// Every call must return one vector per input text, all of the same
/// dimensionality for the lifetime of the embedder.
pub trait Embedder {
    /// Short identifier for logs
    fn name(&self) -> &str;

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2")
    pub model: String,
    /// Path to the ONNX model; without it the lexical embedder is used
    pub model_path: Option<PathBuf>,
    /// Path to `tokenizer.json`; defaults to the file next to the model
    pub tokenizer_path: Option<PathBuf>,
    /// Maximum tokens per text
    pub max_length: usize,
    /// Whether to normalize embeddings to unit length
    pub normalize: bool,
    /// Vector size of the lexical embedder
    pub lexical_dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            model_path: None,
            tokenizer_path: None,
            max_length: 256,
            normalize: true,
            lexical_dimension: lexical::DEFAULT_DIMENSION,
        }
    }
}

/// Scale `vec` to unit length; near-zero vectors are left untouched
pub fn normalize_vector(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; zero when either vector has no magnitude
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= 1e-12 || norm_b <= 1e-12 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_vector(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        normalize_vector(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_error_conversion() {
        let exhausted: RegionError = EmbedError::ResourceExhausted("oom".to_string()).into();
        assert_eq!(exhausted, RegionError::ResourceExhausted("oom".to_string()));

        let backend: RegionError = EmbedError::Backend("boom".to_string()).into();
        assert!(matches!(backend, RegionError::CollaboratorUnavailable(_)));
    }

    #[test]
    fn test_embedding_config_defaults() {
        let config: EmbeddingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.model, "all-MiniLM-L6-v2");
        assert_eq!(config.max_length, 256);
        assert!(config.normalize);
        assert!(config.model_path.is_none());
    }
}
