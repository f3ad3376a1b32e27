//! Hashed bag-of-words embedder
//!
//! Lower-cased alphanumeric tokens are hashed (FNV-1a) into a fixed number of
//! buckets. Texts that share distinctive vocabulary end up close in cosine
//! space; common function words are ignored.

use crate::{normalize_vector, EmbedError, Embedder};

pub const DEFAULT_DIMENSION: usize = 512;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "does", "for", "from", "how", "in", "is",
    "it", "of", "on", "or", "the", "this", "to", "was", "what", "which", "with",
];

/// Deterministic embedder that needs no model files
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dimension: usize,
}

impl LexicalEmbedder {
    /// Create an embedder producing `dimension`-sized vectors (at least 1)
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize_vector(&mut vector);
        vector
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for LexicalEmbedder {
    fn name(&self) -> &str {
        "lexical"
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}
