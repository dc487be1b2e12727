//! Embedding service adapter.
//!
//! [`EmbeddingProvider`] is an enum over concrete backends, built once at
//! startup by [`build`]. [`EmbeddingService`] wraps a provider with the
//! bounded-call policy used by the pipeline.

pub mod hashing;
pub mod label_index;
pub mod openai;

use thiserror::Error;
use tokio::time::Instant;

use crate::bounded::{CallFailure, CallPolicy, bounded_call};
use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
    #[error("embedding request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Hashing(hashing::HashingEmbedder),
    OpenAi(openai::OpenAiEmbedder),
}

impl EmbeddingProvider {
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            EmbeddingProvider::Hashing(p) => Ok(p.embed_batch(texts)),
            EmbeddingProvider::OpenAi(p) => p.embed_batch(texts).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Hashing(_) => "hashing",
            EmbeddingProvider::OpenAi(_) => "openai",
        }
    }
}

/// Construct an `EmbeddingProvider` from config and an optional API key.
pub fn build(
    config: &EmbeddingConfig,
    api_key: Option<String>,
) -> Result<EmbeddingProvider, EmbeddingError> {
    match config.provider.as_str() {
        "hashing" => Ok(EmbeddingProvider::Hashing(hashing::HashingEmbedder::new(config.dimensions))),
        "openai" => {
            let p = openai::OpenAiEmbedder::new(
                config.openai.api_base_url.clone(),
                config.openai.model.clone(),
                config.timeout,
                api_key,
            )?;
            Ok(EmbeddingProvider::OpenAi(p))
        }
        other => Err(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// A provider plus its timeout and retry policy.
#[derive(Debug, Clone)]
pub struct EmbeddingService {
    provider: EmbeddingProvider,
    policy: CallPolicy,
}

impl EmbeddingService {
    pub fn new(provider: EmbeddingProvider, policy: CallPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn embed(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>, CallFailure> {
        let mut out = self.embed_batch(&[text.to_string()], deadline).await?;
        out.pop().ok_or(CallFailure::Failed {
            service: "embedding",
            attempts: 1,
            message: "provider returned no vectors".into(),
        })
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
        deadline: Option<Instant>,
    ) -> Result<Vec<Vec<f32>>, CallFailure> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let provider = &self.provider;
        bounded_call("embedding", self.policy, deadline, |_| provider.embed_batch(texts)).await
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    let sim = dot / (na.sqrt() * nb.sqrt());
    if sim.is_finite() { sim.clamp(-1.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hashing_service() -> EmbeddingService {
        EmbeddingService::new(
            EmbeddingProvider::Hashing(hashing::HashingEmbedder::new(64)),
            CallPolicy::new(Duration::from_secs(1), 1),
        )
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut cfg = crate::config::Config::default().embedding;
        cfg.provider = "word2vec".into();
        assert!(matches!(build(&cfg, None), Err(EmbeddingError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_call() {
        let out = hashing_service().embed_batch(&[], None).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn single_embed_returns_one_vector() {
        let v = hashing_service().embed("naloxone", None).await.unwrap();
        assert_eq!(v.len(), 64);
    }

    #[tokio::test]
    async fn unreachable_provider_surfaces_call_failure() {
        let provider = openai::OpenAiEmbedder::new(
            "http://127.0.0.1:9/v1/embeddings".into(),
            "test".into(),
            Duration::from_secs(1),
            None,
        )
        .unwrap();
        let service = EmbeddingService::new(
            EmbeddingProvider::OpenAi(provider),
            CallPolicy::new(Duration::from_secs(2), 1),
        );
        let err = service.embed("naloxone", None).await.unwrap_err();
        assert_eq!(err.attempts(), 2);
    }
}
