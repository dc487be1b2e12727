//! Answer generation.
//!
//! Wraps the language-model provider in a bounded call: one attempt with the
//! full context, one retry with the top facts only, then a degraded reply.
//! Never returns an error.

use std::path::PathBuf;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::bounded::{CallFailure, CallPolicy, bounded_call};
use crate::config::GenerationConfig;
use crate::llm::prompt::answer_prompt;
use crate::llm::{LlmProvider, ProviderError};
use crate::model::{
    AssembledContext, DegradeReason, Degradation, GenerationMode, GenerationRequest,
    GenerationResult, PipelineState, Utterance,
};

/// Marker after which the model's actual reply starts.
const ANSWER_MARKER: &str = "Answer:";

/// A trailing fragment after the last full stop shorter than this is dropped.
const MIN_TRAILING_FRAGMENT: usize = 10;

#[derive(Debug, Clone)]
pub struct GenerationOrchestrator {
    provider: LlmProvider,
    policy: CallPolicy,
    retry_top_k: usize,
    max_answer_chars: usize,
    prompts_dir: PathBuf,
    no_context_message: String,
    unavailable_message: String,
}

/// One successful attempt.
struct Reply {
    text: String,
    context: AssembledContext,
    attempt: u32,
}

impl GenerationOrchestrator {
    pub fn new(provider: LlmProvider, config: &GenerationConfig) -> Self {
        Self {
            provider,
            policy: CallPolicy::new(config.timeout, 1),
            retry_top_k: config.retry_top_k,
            max_answer_chars: config.max_answer_chars,
            prompts_dir: config.prompts_dir.clone(),
            no_context_message: config.no_context_message.clone(),
            unavailable_message: config.unavailable_message.clone(),
        }
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Degraded reply used when no answer can be produced, recording why.
    pub fn unavailable(
        &self,
        stage: PipelineState,
        reason: DegradeReason,
        detail: impl Into<String>,
    ) -> GenerationResult {
        GenerationResult {
            text: self.unavailable_message.clone(),
            citations: Vec::new(),
            mode: GenerationMode::Unavailable,
            fallback: true,
            degraded: true,
            attempts: 0,
            latency_ms: 0,
            degradations: vec![Degradation::new(stage, reason, detail)],
        }
    }

    pub async fn generate(
        &self,
        utterance: &Utterance,
        context: &AssembledContext,
        deadline: Option<Instant>,
    ) -> GenerationResult {
        let started = Instant::now();

        if context.is_empty() {
            info!("no context, returning no-context reply");
            return GenerationResult {
                text: self.no_context_message.clone(),
                citations: Vec::new(),
                mode: GenerationMode::NoContext,
                fallback: true,
                degraded: true,
                attempts: 0,
                latency_ms: 0,
                degradations: Vec::new(),
            };
        }

        let outcome = bounded_call("llm", self.policy, deadline, |attempt| {
            let sent = if attempt == 0 { context.clone() } else { context.shortened(self.retry_top_k) };
            let request = self.request_for(utterance, &sent);
            async move {
                let response = self.provider.complete(&request).await?;
                let text = postprocess(&response.text, &request.question, self.max_answer_chars);
                if text.is_empty() {
                    return Err(ProviderError::Request("empty reply after cleanup".into()));
                }
                Ok(Reply { text, context: sent, attempt })
            }
        })
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Reply { text, context: sent, attempt }) => {
                let retried = attempt > 0;
                let mut degradations = Vec::new();
                if retried {
                    degradations.push(Degradation::new(
                        PipelineState::Generating,
                        DegradeReason::GenerationRetried,
                        format!("answered from top {} of {} facts", sent.len(), context.len()),
                    ));
                }
                info!(
                    attempts = attempt + 1,
                    latency_ms,
                    facts = sent.len(),
                    "answer generated"
                );
                GenerationResult {
                    text,
                    citations: sent.citations(),
                    mode: if retried { GenerationMode::Shortened } else { GenerationMode::Full },
                    fallback: retried,
                    degraded: retried,
                    attempts: attempt + 1,
                    latency_ms,
                    degradations,
                }
            }
            Err(failure) => {
                let reason = match failure {
                    CallFailure::TimedOut { .. } => DegradeReason::GenerationTimeout,
                    CallFailure::Failed { .. } => DegradeReason::GenerationFailed,
                    CallFailure::DeadlineExceeded { .. } => DegradeReason::DeadlineExceeded,
                };
                warn!(reason = reason.code(), error = %failure, "generation degraded");
                GenerationResult {
                    attempts: failure.attempts(),
                    latency_ms,
                    ..self.unavailable(PipelineState::Generating, reason, failure.to_string())
                }
            }
        }
    }

    fn request_for(&self, utterance: &Utterance, context: &AssembledContext) -> GenerationRequest {
        let prompt = answer_prompt(&self.prompts_dir, &context.render(), &utterance.text);
        GenerationRequest {
            system: prompt.system,
            prompt: prompt.prompt,
            question: utterance.text.trim().to_string(),
            passages: context.passages(),
            history: utterance.history().to_vec(),
        }
    }
}

/// Strip echoed prompt scaffolding and tidy the reply.
pub fn postprocess(raw: &str, question: &str, max_chars: usize) -> String {
    let reply = match raw.rfind(ANSWER_MARKER) {
        Some(i) => &raw[i + ANSWER_MARKER.len()..],
        None => raw,
    };
    let question = question.trim();
    let kept: Vec<&str> = reply
        .lines()
        .filter(|line| {
            let l = line.trim();
            let echoed = !question.is_empty() && l == question;
            !(echoed || l.starts_with("Context:") || l.starts_with("Question:"))
        })
        .collect();
    clean_response(kept.join("\n").trim(), max_chars)
}

/// Drop a short trailing fragment after the last full stop and cap the length.
pub fn clean_response(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let mut out = match text.rfind('.') {
        Some(i) if text[i + 1..].trim().chars().count() < MIN_TRAILING_FRAGMENT => &text[..=i],
        _ => text,
    }
    .to_string();

    if let Some((cut, _)) = out.char_indices().nth(max_chars) {
        out.truncate(cut);
        out.push_str("...");
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::Config;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::model::{ContextEntry, FactCandidate, FactKey, RankedFact, Score, Turn};

    fn context(ids: &[&str]) -> AssembledContext {
        let mut ctx = AssembledContext::empty(1500);
        for id in ids {
            let entry = ContextEntry {
                fact: RankedFact {
                    candidate: FactCandidate {
                        key: FactKey::Node { id: (*id).into() },
                        source_id: (*id).into(),
                        url: None,
                        text: format!("{id} says something useful"),
                        path: vec![],
                        hops: 0,
                        relation: None,
                        weight: 1.0,
                    },
                    score: Score { semantic: 0.0, structural: 1.0, composite: 0.3 },
                },
                tokens: 8,
            };
            ctx.total_tokens += entry.tokens;
            ctx.entries.push(entry);
        }
        ctx
    }

    fn orchestrator(provider: ScriptedProvider) -> GenerationOrchestrator {
        let mut cfg = Config::default().generation;
        cfg.timeout = Duration::from_secs(2);
        cfg.retry_top_k = 2;
        GenerationOrchestrator::new(LlmProvider::Scripted(provider), &cfg)
    }

    #[tokio::test]
    async fn full_context_answer_cites_every_source() {
        let provider = ScriptedProvider::new("Answer: Based on {sources}.");
        let g = orchestrator(provider.clone());
        let r = g.generate(&Utterance::new("What does MAT05 require?"), &context(&["MAT05", "MAT05-C1", "concept:ost"]), None).await;
        assert_eq!(r.mode, GenerationMode::Full);
        assert!(!r.fallback && !r.degraded);
        assert_eq!(r.text, "Based on MAT05, MAT05-C1, concept:ost.");
        let ids: Vec<&str> = r.citations.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["MAT05", "MAT05-C1", "concept:ost"]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn empty_context_skips_the_model() {
        let provider = ScriptedProvider::new("should not be used");
        let g = orchestrator(provider.clone());
        let r = g.generate(&Utterance::new("anything"), &AssembledContext::empty(1500), None).await;
        assert_eq!(r.mode, GenerationMode::NoContext);
        assert_eq!(r.text, Config::default().generation.no_context_message);
        assert!(r.citations.is_empty());
        assert!(r.fallback);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retries_with_shortened_context() {
        let provider = ScriptedProvider::new("Answer: From {sources}.")
            .with_delays(vec![Duration::from_secs(10)]);
        let g = orchestrator(provider.clone());
        let r = g.generate(&Utterance::new("q"), &context(&["a", "b", "c", "d"]), None).await;
        assert_eq!(r.mode, GenerationMode::Shortened);
        assert_eq!(r.attempts, 2);
        assert!(r.fallback && r.degraded);
        assert_eq!(r.text, "From a, b.");
        assert_eq!(r.citations.len(), 2);
        assert_eq!(r.degradations[0].reason, DegradeReason::GenerationRetried);
        let requests = provider.requests();
        assert_eq!(requests[0].passages.len(), 4);
        assert_eq!(requests[1].passages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_surface_unavailable() {
        let provider = ScriptedProvider::new("Answer: never")
            .with_delays(vec![Duration::from_secs(10), Duration::from_secs(10)]);
        let g = orchestrator(provider);
        let r = g.generate(&Utterance::new("q"), &context(&["a"]), None).await;
        assert_eq!(r.mode, GenerationMode::Unavailable);
        assert_eq!(r.text, Config::default().generation.unavailable_message);
        assert_eq!(r.attempts, 2);
        assert_eq!(r.degradations[0].reason, DegradeReason::GenerationTimeout);
    }

    #[tokio::test]
    async fn provider_error_surfaces_unavailable() {
        let g = orchestrator(ScriptedProvider::failing("connection refused"));
        let r = g.generate(&Utterance::new("q"), &context(&["a"]), None).await;
        assert_eq!(r.mode, GenerationMode::Unavailable);
        assert_eq!(r.degradations[0].reason, DegradeReason::GenerationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn passed_deadline_is_deadline_exceeded() {
        let provider = ScriptedProvider::new("Answer: x.");
        let g = orchestrator(provider.clone());
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;
        let r = g.generate(&Utterance::new("q"), &context(&["a"]), Some(deadline)).await;
        assert_eq!(r.degradations[0].reason, DegradeReason::DeadlineExceeded);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn history_is_forwarded() {
        let provider = ScriptedProvider::new("Answer: ok then, fine.");
        let g = orchestrator(provider.clone());
        let history: crate::model::History =
            vec![Turn::user("Tell me about MAT01"), Turn::assistant("MAT01 is same-day access.")].into();
        let utterance = Utterance::new("And that standard?").with_history(history);
        g.generate(&utterance, &context(&["MAT01"]), None).await;
        assert_eq!(provider.requests()[0].history.len(), 2);
        assert!(provider.requests()[0].prompt.contains("[MAT01] MAT01 says something useful"));
    }

    #[test]
    fn postprocess_strips_scaffolding() {
        let raw = "Context:\n[MAT01] x\n\nQuestion: What is MAT01?\n\nAnswer: MAT01 is about same day access.";
        assert_eq!(postprocess(raw, "What is MAT01?", 500), "MAT01 is about same day access.");
    }

    #[test]
    fn postprocess_drops_echoed_question_line() {
        let raw = "What is MAT01?\nMAT01 covers same day access.";
        assert_eq!(postprocess(raw, "What is MAT01?", 500), "MAT01 covers same day access.");
    }

    #[test]
    fn clean_response_drops_short_trailing_fragment() {
        assert_eq!(clean_response("MAT 4 covers harm reduction. It a", 500), "MAT 4 covers harm reduction.");
        assert_eq!(
            clean_response("MAT 4 covers harm reduction. It also covers naloxone", 500),
            "MAT 4 covers harm reduction. It also covers naloxone"
        );
    }

    #[test]
    fn clean_response_caps_length_on_char_boundary() {
        let long = "é".repeat(30);
        let out = clean_response(&long, 10);
        assert_eq!(out, format!("{}...", "é".repeat(10)));
    }
}
