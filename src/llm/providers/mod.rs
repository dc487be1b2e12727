//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory, called at startup.
//! Adding a new backend = new module + new match arm.

pub mod extractive;
pub mod openai_compatible;
pub mod scripted;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never TOML) and is `None`
/// for keyless local models.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "extractive" => Ok(LlmProvider::Extractive(extractive::ExtractiveProvider::new(
            config.extractive_passages,
        ))),
        "scripted" => Ok(LlmProvider::Scripted(scripted::ScriptedProvider::new(
            "Scripted answer based on {sources}.",
        ))),
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn builds_each_known_provider() {
        let mut cfg = Config::default().llm;
        for name in ["extractive", "scripted", "openai"] {
            cfg.provider = name.into();
            let p = build(&cfg, None).unwrap();
            assert_eq!(p.name(), name);
        }
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut cfg = Config::default().llm;
        cfg.provider = "oracle".into();
        assert!(matches!(build(&cfg, None), Err(ProviderError::UnknownProvider(_))));
    }
}
