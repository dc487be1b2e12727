//! Read-only index of embedded graph node labels.
//!
//! Built once at startup. Anchors the planner's fallback query when the
//! utterance names no recognised entity.

use tokio::time::Instant;
use tracing::info;

use crate::bounded::CallFailure;
use crate::embedding::{EmbeddingService, cosine_similarity};

#[derive(Debug, Clone)]
struct LabelEntry {
    node_id: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    entries: Vec<LabelEntry>,
}

impl LabelIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Embed `(node_id, label)` pairs in one batch.
    pub async fn build(
        labels: Vec<(String, String)>,
        embeddings: &EmbeddingService,
        deadline: Option<Instant>,
    ) -> Result<Self, CallFailure> {
        let texts: Vec<String> = labels.iter().map(|(_, label)| label.clone()).collect();
        let vectors = embeddings.embed_batch(&texts, deadline).await?;
        let entries: Vec<LabelEntry> = labels
            .into_iter()
            .zip(vectors)
            .map(|((node_id, _), vector)| LabelEntry { node_id, vector })
            .collect();
        info!(labels = entries.len(), "label index built");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `k` node ids by descending similarity, ties broken by id.
    /// Labels with no positive similarity are never returned.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<String> {
        let mut scored: Vec<(f32, &str)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.vector), e.node_id.as_str()))
            .filter(|(sim, _)| *sim > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(k).map(|(_, id)| id.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded::CallPolicy;
    use crate::embedding::{EmbeddingProvider, hashing::HashingEmbedder};
    use std::time::Duration;

    fn service() -> EmbeddingService {
        EmbeddingService::new(
            EmbeddingProvider::Hashing(HashingEmbedder::new(128)),
            CallPolicy::new(Duration::from_secs(1), 0),
        )
    }

    #[tokio::test]
    async fn nearest_prefers_matching_label() {
        let svc = service();
        let index = LabelIndex::build(
            vec![
                ("concept:naloxone".into(), "Naloxone".into()),
                ("concept:harm-reduction".into(), "Harm reduction".into()),
                ("org:phs".into(), "Public Health Scotland".into()),
            ],
            &svc,
            None,
        )
        .await
        .unwrap();
        assert_eq!(index.len(), 3);

        let q = svc.embed("where can I get naloxone kits", None).await.unwrap();
        let hits = index.nearest(&q, 2);
        assert_eq!(hits.first().map(String::as_str), Some("concept:naloxone"));
    }

    #[test]
    fn empty_index_returns_nothing() {
        assert!(LabelIndex::empty().nearest(&[1.0, 0.0], 3).is_empty());
    }
}
