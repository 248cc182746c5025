//! Offline embedder based on signed feature hashing.
//!
//! Each lowercased word and each pair of adjacent words is hashed into one
//! of `dimension` buckets with a hash-derived sign. The result is
//! deterministic and needs no model, which makes it suitable for tests and
//! local experiments. It captures lexical overlap only.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::EmbeddingError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(parts: &[&str]) -> u64 {
    let mut hash = FNV_OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hash ^= 0x1f;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        for byte in part.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
    batch_size: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize, batch_size: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let mut vector = vec![0.0f32; self.dimension];
        let mut add = |hash: u64, weight: f32| {
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        };

        if words.is_empty() {
            add(fnv1a(&[text]), 1.0);
        }
        for word in &words {
            add(fnv1a(&[word.as_str()]), 1.0);
        }
        for pair in words.windows(2) {
            add(fnv1a(&[pair[0].as_str(), pair[1].as_str()]), 0.5);
        }

        // Colliding features can cancel out exactly.
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn test_deterministic() {
        let provider = HashingEmbeddingProvider::new(64, 8);
        assert_eq!(provider.embed_one("Hello world"), provider.embed_one("hello, WORLD"));
    }

    #[test]
    fn test_lexical_similarity() {
        let provider = HashingEmbeddingProvider::new(256, 8);
        let a = provider.embed_one("the cat sat on the mat");
        let b = provider.embed_one("the cat sat on a mat");
        let c = provider.embed_one("quantum chromodynamics lecture notes");
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[test]
    fn test_never_zero() {
        let provider = HashingEmbeddingProvider::new(16, 8);
        for text in ["", "!!!", "a"] {
            assert!(provider.embed_one(text).iter().any(|x| *x != 0.0));
        }
    }

    #[tokio::test]
    async fn test_embed_preserves_order() {
        let provider = HashingEmbeddingProvider::new(32, 8);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = provider.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], provider.embed_one("beta"));
    }
}
