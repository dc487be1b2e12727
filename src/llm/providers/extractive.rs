//! Offline provider that answers by quoting the top context passages.
//!
//! Needs no model or network. Output follows the same `Answer:` convention as
//! a real model so the generation post-processing path is exercised.

use tracing::debug;

use crate::llm::{LlmResponse, ProviderError};
use crate::model::GenerationRequest;

#[derive(Debug, Clone)]
pub struct ExtractiveProvider {
    max_passages: usize,
}

impl ExtractiveProvider {
    pub fn new(max_passages: usize) -> Self {
        Self { max_passages: max_passages.max(1) }
    }

    pub async fn complete(&self, request: &GenerationRequest) -> Result<LlmResponse, ProviderError> {
        if request.passages.is_empty() {
            return Err(ProviderError::Request("no passages to quote".into()));
        }
        let quoted: Vec<String> = request
            .passages
            .iter()
            .take(self.max_passages)
            .map(|p| {
                let sentence = p.text.trim().trim_end_matches('.');
                format!("{sentence} [{}].", p.source_id)
            })
            .collect();
        debug!(quoted = quoted.len(), "extractive answer");
        Ok(LlmResponse {
            text: format!("Answer: From the MAT standards: {}", quoted.join(" ")),
            usage: None,
        })
    }
}
