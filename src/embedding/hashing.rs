//! Local hashed term-frequency embedder.
//!
//! Deterministic dense vectors from FNV-1a hashed terms, L2 normalised.
//! Needs no network and is always available, which makes it the default for
//! offline runs and tests.

use std::collections::BTreeMap;

/// Function words that carry no retrieval signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "should", "that", "the", "this", "to", "what", "which",
    "with",
];

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut tf: BTreeMap<String, f32> = BTreeMap::new();
        let mut total = 0.0f32;
        for term in terms(text) {
            *tf.entry(term).or_default() += 1.0;
            total += 1.0;
        }

        let mut vec = vec![0.0f32; self.dimensions];
        if total == 0.0 {
            return vec;
        }

        for (term, count) in &tf {
            // Longer terms are rarer; weight them up a little.
            let idf = 1.0 + (term.len() as f32).ln();
            vec[hash_term(term, self.dimensions)] += (count / total) * idf;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }

    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// FNV-1a bucket index.
fn hash_term(term: &str, dims: usize) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in term.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % dims as u64) as usize
}

/// Lowercase alphanumeric terms, stop words removed, plural `s` folded.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(|s| s.to_lowercase())
        .filter(|s| !STOP_WORDS.contains(&s.as_str()))
        .map(|s| match s.strip_suffix('s') {
            Some(stem) if stem.len() >= 3 && !stem.ends_with('s') => stem.to_string(),
            _ => s,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn empty_text_returns_zero_vector() {
        let v = HashingEmbedder::new(64).embed("");
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn output_is_normalized() {
        let v = HashingEmbedder::new(256).embed("same day access to treatment");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[test]
    fn deterministic() {
        let e = HashingEmbedder::new(256);
        assert_eq!(e.embed("harm reduction services"), e.embed("harm reduction services"));
    }

    #[test]
    fn plural_and_stop_words_fold_together() {
        let e = HashingEmbedder::new(256);
        let a = e.embed("What are the standards for naloxone?");
        let b = e.embed("naloxone standard");
        assert!(cosine_similarity(&a, &b) > 0.99);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let e = HashingEmbedder::new(256);
        let q = e.embed("harm reduction at the point of care");
        let near = e.embed("Harm reduction interventions are offered at every contact");
        let far = e.embed("Independent advocacy supports people to be heard");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }
}
