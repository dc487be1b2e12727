//! Per-request pipeline.
//!
//! `Received -> Extracting -> Planning -> Traversing -> Ranking -> Assembling
//! -> Generating -> Completed | Failed`
//!
//! Only extraction and planning errors lead to `Failed`. Every other stage
//! failure becomes a [`Degradation`] and the request still completes. One
//! deadline, `now + request_budget`, bounds every external call; once it has
//! passed, remaining stages are skipped and the degraded reply is returned.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::bounded::CallPolicy;
use crate::config::Config;
use crate::embedding::label_index::LabelIndex;
use crate::embedding::{EmbeddingProvider, EmbeddingService};
use crate::error::{AppError, PipelineError};
use crate::graph::GraphStore;
use crate::llm::LlmProvider;
use crate::logger;
use crate::model::{
    DegradeReason, Degradation, ExtractedEntity, ExtractedIntent, FactCandidate,
    GenerationResult, GraphQuery, PipelineState, Utterance,
};
use crate::pipeline::assembler::ContextAssembler;
use crate::pipeline::executor::TraversalExecutor;
use crate::pipeline::extractor::EntityIntentExtractor;
use crate::pipeline::generator::GenerationOrchestrator;
use crate::pipeline::planner::{self, FallbackAnchor, QueryPlanner};
use crate::pipeline::ranker::RelevanceRanker;

/// The external collaborators a coordinator talks to.
#[derive(Debug, Clone)]
pub struct Adapters {
    pub llm: LlmProvider,
    pub embedding: EmbeddingProvider,
    pub graph: GraphStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: PipelineState,
    pub elapsed_ms: u64,
}

/// Per-request trace for debug display and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Every state entered, in order, starting with `Received`.
    pub transitions: Vec<PipelineState>,
    pub timings: Vec<StageTiming>,
    pub queries: Vec<GraphQuery>,
    pub candidates_retrieved: usize,
    pub facts_ranked: usize,
    pub facts_in_context: usize,
    pub context_tokens: usize,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub request_id: Uuid,
    /// `Completed` or `Failed`.
    pub state: PipelineState,
    pub intent: ExtractedIntent,
    pub entities: Vec<ExtractedEntity>,
    pub result: GenerationResult,
    pub diagnostics: Diagnostics,
}

impl PipelineResponse {
    pub fn is_degraded(&self) -> bool {
        self.result.degraded
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.result.degradations
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub service_name: String,
    pub llm_provider: &'static str,
    pub llm_model: String,
    pub embedding_provider: &'static str,
    pub graph_backend: &'static str,
    pub indexed_labels: usize,
    pub token_budget: usize,
    pub request_budget_ms: u64,
}

/// Tracks state transitions, stage timings and degradations for one request.
struct Trace {
    diagnostics: Diagnostics,
    degradations: Vec<Degradation>,
    started: Instant,
    stage_started: Instant,
}

impl Trace {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            diagnostics: Diagnostics {
                transitions: vec![PipelineState::Received],
                ..Diagnostics::default()
            },
            degradations: Vec::new(),
            started: now,
            stage_started: now,
        }
    }

    fn state(&self) -> PipelineState {
        self.diagnostics.transitions.last().copied().unwrap_or(PipelineState::Received)
    }

    fn enter(&mut self, next: PipelineState) {
        let current = self.state();
        if current != PipelineState::Received {
            self.diagnostics.timings.push(StageTiming {
                stage: current,
                elapsed_ms: self.stage_started.elapsed().as_millis() as u64,
            });
        }
        debug!(from = %current, to = %next, "pipeline transition");
        self.diagnostics.transitions.push(next);
        self.stage_started = Instant::now();
    }

    fn degrade(&mut self, reason: DegradeReason, detail: impl Into<String>) {
        let d = Degradation::new(self.state(), reason, detail);
        debug!(degradation = %d, "degraded");
        self.degradations.push(d);
    }
}

#[derive(Debug, Clone)]
pub struct PipelineCoordinator {
    config: Arc<Config>,
    extractor: EntityIntentExtractor,
    planner: QueryPlanner,
    executor: TraversalExecutor,
    ranker: RelevanceRanker,
    assembler: ContextAssembler,
    generator: GenerationOrchestrator,
    embeddings: EmbeddingService,
    labels: Arc<LabelIndex>,
}

impl PipelineCoordinator {
    /// Build every adapter from configuration and its secrets.
    pub async fn from_config(config: Arc<Config>) -> Result<Self, AppError> {
        let llm = crate::llm::providers::build(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Provider(e.to_string()))?;
        let embedding = crate::embedding::build(&config.embedding, config.embedding_api_key.clone())
            .map_err(|e| AppError::Provider(e.to_string()))?;
        let graph = crate::graph::build(&config.graph, config.neo4j_password.clone())
            .map_err(|e| AppError::Provider(e.to_string()))?;
        Self::with_adapters(config, Adapters { llm, embedding, graph }).await
    }

    /// Build around caller-supplied adapters. Validates the configuration and
    /// embeds the graph's node labels for fallback anchoring; if that fails the
    /// coordinator starts with an empty label index and falls back to keywords.
    pub async fn with_adapters(config: Arc<Config>, adapters: Adapters) -> Result<Self, AppError> {
        config.validate()?;

        let embeddings = EmbeddingService::new(
            adapters.embedding,
            CallPolicy::new(config.embedding.timeout, config.embedding.retries),
        );

        let labels = match adapters.graph.node_labels().await {
            Ok(labels) => match LabelIndex::build(labels, &embeddings, None).await {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "label index unavailable, fallback queries use keywords");
                    LabelIndex::empty()
                }
            },
            Err(e) => {
                warn!(error = %e, "could not list graph labels, fallback queries use keywords");
                LabelIndex::empty()
            }
        };

        info!(
            llm = adapters.llm.name(),
            embedding = embeddings.provider_name(),
            graph = adapters.graph.backend_name(),
            labels = labels.len(),
            "pipeline ready"
        );

        Ok(Self {
            extractor: EntityIntentExtractor::new(&config.extractor),
            planner: QueryPlanner::new(&config.planner),
            executor: TraversalExecutor::new(adapters.graph, config.executor.query_timeout),
            ranker: RelevanceRanker::new(&config.ranker),
            assembler: ContextAssembler::new(&config.context),
            generator: GenerationOrchestrator::new(adapters.llm, &config.generation),
            embeddings,
            labels: Arc::new(labels),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            service_name: self.config.service_name.clone(),
            llm_provider: self.generator.provider().name(),
            llm_model: self.generator.provider().model().to_string(),
            embedding_provider: self.embeddings.provider_name(),
            graph_backend: self.executor.store().backend_name(),
            indexed_labels: self.labels.len(),
            token_budget: self.assembler.default_budget(),
            request_budget_ms: self.config.pipeline.request_budget.as_millis() as u64,
        }
    }

    /// Run one utterance through every stage. Never returns an error: the
    /// worst case is a `Failed` or degraded response with an explanatory reply.
    pub async fn handle(&self, utterance: Utterance) -> PipelineResponse {
        let span = logger::request_span(utterance.request_id);
        self.run(utterance).instrument(span).await
    }

    async fn run(&self, utterance: Utterance) -> PipelineResponse {
        let deadline = Instant::now() + self.config.pipeline.request_budget;
        let mut trace = Trace::new();
        info!(chars = utterance.text.chars().count(), "request received");

        // Extracting
        trace.enter(PipelineState::Extracting);
        let (intent, entities) = match self.extractor.extract(&utterance.text, utterance.history()) {
            Ok(extracted) => extracted,
            Err(e) => {
                return self.fail(&utterance, trace, ExtractedIntent::general(0.0), Vec::new(), e);
            }
        };
        debug!(intent = %intent.category, confidence = intent.confidence, entities = entities.len(), "extracted");
        if let Some(expired) = self.check_deadline(&utterance, &mut trace, deadline, &intent, &entities) {
            return expired;
        }

        // Planning
        trace.enter(PipelineState::Planning);
        if entities.is_empty() {
            trace.degrade(DegradeReason::IntentOnlyQuery, "no entity reached the confidence threshold");
        }
        let utterance_embedding = match self.embeddings.embed(&utterance.text, Some(deadline)).await {
            Ok(v) => Some(v),
            Err(e) => {
                trace.degrade(DegradeReason::EmbeddingUnavailable, e.to_string());
                None
            }
        };
        let fallback = self.fallback_anchor(&utterance.text, utterance_embedding.as_deref());
        let queries = match self.planner.plan(&intent, &entities, fallback) {
            Ok(q) => q,
            Err(e) => return self.fail(&utterance, trace, intent, entities, e),
        };
        trace.diagnostics.queries = queries.clone();
        if let Some(expired) = self.check_deadline(&utterance, &mut trace, deadline, &intent, &entities) {
            return expired;
        }

        // Traversing
        trace.enter(PipelineState::Traversing);
        let outcomes = self.executor.execute_all(&queries, Some(deadline)).await;
        let mut candidates: Vec<FactCandidate> = Vec::new();
        for outcome in outcomes {
            if let Some(d) = outcome.degradation {
                trace.degradations.push(d);
            }
            candidates.extend(outcome.candidates);
        }
        merge_order(&mut candidates);
        trace.diagnostics.candidates_retrieved = candidates.len();
        if let Some(expired) = self.check_deadline(&utterance, &mut trace, deadline, &intent, &entities) {
            return expired;
        }

        // Ranking
        trace.enter(PipelineState::Ranking);
        let candidate_embeddings = if candidates.is_empty() || utterance_embedding.is_none() {
            Vec::new()
        } else {
            let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
            match self.embeddings.embed_batch(&texts, Some(deadline)).await {
                Ok(v) => v,
                Err(e) => {
                    trace.degrade(DegradeReason::EmbeddingUnavailable, e.to_string());
                    Vec::new()
                }
            }
        };
        let ranked = self.ranker.rank(candidates, utterance_embedding.as_deref(), &candidate_embeddings);
        trace.diagnostics.facts_ranked = ranked.len();
        if let Some(expired) = self.check_deadline(&utterance, &mut trace, deadline, &intent, &entities) {
            return expired;
        }

        // Assembling
        trace.enter(PipelineState::Assembling);
        let context = self.assembler.assemble(ranked, self.assembler.default_budget());
        if trace.diagnostics.facts_ranked == 0 {
            trace.degrade(DegradeReason::NoCandidates, "traversal returned no facts");
        } else if context.is_empty() {
            trace.degrade(
                DegradeReason::NothingFitBudget,
                format!("no fact fits a budget of {} tokens", context.budget),
            );
        }
        trace.diagnostics.facts_in_context = context.len();
        trace.diagnostics.context_tokens = context.total_tokens;
        if let Some(expired) = self.check_deadline(&utterance, &mut trace, deadline, &intent, &entities) {
            return expired;
        }

        // Generating
        trace.enter(PipelineState::Generating);
        let result = self.generator.generate(&utterance, &context, Some(deadline)).await;

        self.finish(&utterance, trace, PipelineState::Completed, intent, entities, result)
    }

    /// Fallback anchor for a plan with no entities.
    fn fallback_anchor(&self, text: &str, embedding: Option<&[f32]>) -> FallbackAnchor {
        if let Some(v) = embedding {
            let nearest = self.labels.nearest(v, self.planner.fallback_anchors());
            if !nearest.is_empty() {
                return FallbackAnchor::Labels(nearest);
            }
        }
        FallbackAnchor::Keywords(planner::keywords(text))
    }

    fn check_deadline(
        &self,
        utterance: &Utterance,
        trace: &mut Trace,
        deadline: Instant,
        intent: &ExtractedIntent,
        entities: &[ExtractedEntity],
    ) -> Option<PipelineResponse> {
        if Instant::now() < deadline {
            return None;
        }
        let stage = trace.state();
        warn!(%stage, "request budget exhausted");
        let result = self.generator.unavailable(
            stage,
            DegradeReason::DeadlineExceeded,
            format!("request budget of {:?} exhausted", self.config.pipeline.request_budget),
        );
        let trace = std::mem::replace(trace, Trace::new());
        Some(self.finish(
            utterance,
            trace,
            PipelineState::Completed,
            intent.clone(),
            entities.to_vec(),
            result,
        ))
    }

    fn fail(
        &self,
        utterance: &Utterance,
        trace: Trace,
        intent: ExtractedIntent,
        entities: Vec<ExtractedEntity>,
        error: PipelineError,
    ) -> PipelineResponse {
        warn!(error = %error, "request failed");
        let reason = match error {
            PipelineError::Extraction(_) => DegradeReason::ExtractionFailed,
            PipelineError::Planning(_) => DegradeReason::PlanningFailed,
        };
        let result = self.generator.unavailable(trace.state(), reason, error.to_string());
        self.finish(utterance, trace, PipelineState::Failed, intent, entities, result)
    }

    fn finish(
        &self,
        utterance: &Utterance,
        mut trace: Trace,
        terminal: PipelineState,
        intent: ExtractedIntent,
        entities: Vec<ExtractedEntity>,
        mut result: GenerationResult,
    ) -> PipelineResponse {
        trace.enter(terminal);
        trace.degradations.append(&mut result.degradations);
        result.degradations = trace.degradations;
        result.degraded |= !result.degradations.is_empty();
        trace.diagnostics.total_ms = trace.started.elapsed().as_millis() as u64;

        info!(
            state = %terminal,
            mode = ?result.mode,
            degraded = result.degraded,
            citations = result.citations.len(),
            total_ms = trace.diagnostics.total_ms,
            "request finished"
        );

        PipelineResponse {
            request_id: utterance.request_id,
            state: terminal,
            intent,
            entities,
            result,
            diagnostics: trace.diagnostics,
        }
    }
}

/// Deterministic merge order for traversal results: hop count, then fact
/// identity. Makes ranking independent of task completion order.
fn merge_order(candidates: &mut [FactCandidate]) {
    candidates.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.key.cmp(&b.key)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactKey, RelationKind};

    fn candidate(id: &str, hops: u32) -> FactCandidate {
        FactCandidate {
            key: FactKey::Node { id: id.into() },
            source_id: id.into(),
            url: None,
            text: id.into(),
            path: vec![],
            hops,
            relation: None,
            weight: 1.0,
        }
    }

    #[test]
    fn merge_order_is_independent_of_input_order() {
        let mut a = vec![candidate("MAT02", 1), candidate("MAT01", 1), candidate("MAT05", 0)];
        let mut b = vec![candidate("MAT01", 1), candidate("MAT05", 0), candidate("MAT02", 1)];
        merge_order(&mut a);
        merge_order(&mut b);
        assert_eq!(a, b);
        assert_eq!(a[0].source_id, "MAT05");
    }

    #[test]
    fn merge_order_keeps_node_before_edge_of_same_hop() {
        let mut facts = vec![
            FactCandidate {
                key: FactKey::Edge { from: "MAT01".into(), relation: RelationKind::Requires, to: "concept:ost".into() },
                ..candidate("MAT01", 1)
            },
            candidate("concept:ost", 1),
        ];
        merge_order(&mut facts);
        assert!(matches!(facts[0].key, FactKey::Node { .. }));
    }

    #[test]
    fn trace_records_transitions_and_timings() {
        let mut trace = Trace::new();
        trace.enter(PipelineState::Extracting);
        trace.degrade(DegradeReason::IntentOnlyQuery, "none");
        trace.enter(PipelineState::Planning);
        assert_eq!(
            trace.diagnostics.transitions,
            vec![PipelineState::Received, PipelineState::Extracting, PipelineState::Planning]
        );
        assert_eq!(trace.diagnostics.timings.len(), 1);
        assert_eq!(trace.degradations[0].stage, PipelineState::Extracting);
    }
}
