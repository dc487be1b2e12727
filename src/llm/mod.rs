//! Language-model service adapter.
//!
//! `LlmProvider` is an enum over concrete provider implementations built once
//! at startup by [`providers::build`]. Provider instances are shared immutable
//! capabilities; clone them freely.

pub mod prompt;
pub mod providers;

use thiserror::Error;

use crate::model::GenerationRequest;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Extractive(providers::extractive::ExtractiveProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// One round-trip. Timeouts and retries are the caller's concern.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.complete(request).await,
            LlmProvider::Extractive(p) => p.complete(request).await,
            LlmProvider::Scripted(p) => p.complete(request).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAiCompatible(_) => "openai",
            LlmProvider::Extractive(_) => "extractive",
            LlmProvider::Scripted(_) => "scripted",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.model(),
            LlmProvider::Extractive(_) => "extractive",
            LlmProvider::Scripted(_) => "scripted",
        }
    }
}
