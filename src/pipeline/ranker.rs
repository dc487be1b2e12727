//! Relevance ranking.
//!
//! composite = semantic_weight * max(cos(utterance, fact), 0)
//!           + structural_weight * authority(relation) * weight * hop_decay^hops
//!
//! Query roots have no incoming relation and take full authority.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::config::RankerConfig;
use crate::embedding::cosine_similarity;
use crate::model::{FactCandidate, FactKey, RankedFact, RelationKind, Score};

#[derive(Debug, Clone)]
pub struct RelevanceRanker {
    config: RankerConfig,
}

impl RelevanceRanker {
    pub fn new(config: &RankerConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Score, merge and order `candidates`.
    ///
    /// `candidate_embeddings[i]` belongs to `candidates[i]`. When the utterance
    /// embedding is missing or the lengths disagree, every semantic term is
    /// zero and ordering falls back to graph structure alone.
    ///
    /// Candidates with the same [`FactKey`] collapse into the one with the
    /// highest composite score, kept at the position of the first occurrence.
    /// Output is sorted by composite score descending, then hop count
    /// ascending; remaining ties keep input order.
    pub fn rank(
        &self,
        candidates: Vec<FactCandidate>,
        utterance_embedding: Option<&[f32]>,
        candidate_embeddings: &[Vec<f32>],
    ) -> Vec<RankedFact> {
        let semantic_usable = utterance_embedding.is_some() && candidate_embeddings.len() == candidates.len();
        if utterance_embedding.is_some() && !semantic_usable {
            debug!(
                candidates = candidates.len(),
                embeddings = candidate_embeddings.len(),
                "embedding count mismatch, ranking on structure only"
            );
        }

        let mut merged: Vec<RankedFact> = Vec::with_capacity(candidates.len());
        let mut slot_of: HashMap<FactKey, usize> = HashMap::new();

        for (i, candidate) in candidates.into_iter().enumerate() {
            let semantic = match utterance_embedding {
                Some(u) if semantic_usable => cosine_similarity(u, &candidate_embeddings[i]).max(0.0),
                _ => 0.0,
            };
            let structural = self.structural(&candidate);
            let composite =
                self.config.semantic_weight * semantic + self.config.structural_weight * structural;
            let ranked = RankedFact { candidate, score: Score { semantic, structural, composite } };

            match slot_of.get(&ranked.candidate.key) {
                Some(&slot) => {
                    if ranked.score.composite > merged[slot].score.composite {
                        merged[slot] = ranked;
                    }
                }
                None => {
                    slot_of.insert(ranked.candidate.key.clone(), merged.len());
                    merged.push(ranked);
                }
            }
        }

        // Vec::sort_by is stable.
        merged.sort_by(rank_order);
        merged
    }

    /// Graph-structural signal in `[0, 1]`.
    pub fn structural(&self, candidate: &FactCandidate) -> f32 {
        let authority = candidate.relation.map_or(1.0, |r| self.authority(r));
        let decay = self.config.hop_decay.powi(candidate.hops.min(i32::MAX as u32) as i32);
        authority * candidate.weight.clamp(0.0, 1.0) * decay
    }

    fn authority(&self, relation: RelationKind) -> f32 {
        self.config.authority.get(&relation).copied().unwrap_or(0.0)
    }
}

/// Composite score descending, then hops ascending.
pub fn rank_order(a: &RankedFact, b: &RankedFact) -> Ordering {
    b.score
        .composite
        .total_cmp(&a.score.composite)
        .then_with(|| a.candidate.hops.cmp(&b.candidate.hops))
}
