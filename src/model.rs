//! Request-scoped data model.
//!
//! Every value here is created by exactly one pipeline stage and handed to the
//! next by value or shared reference. Nothing is mutated after hand-off.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Conversation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Immutable snapshot of prior turns, oldest first.
pub type History = Arc<[Turn]>;

/// A raw user question as received from the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct Utterance {
    pub request_id: Uuid,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub history: Option<History>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            text: text.into(),
            received_at: Utc::now(),
            history: None,
        }
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    /// Prior turns, or an empty slice for a first question.
    pub fn history(&self) -> &[Turn] {
        self.history.as_deref().unwrap_or(&[])
    }
}

// ── Extraction ────────────────────────────────────────────────────────────────

/// Closed set of intent categories. `General` is the fallback member for
/// anything classified below the confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    DefinitionLookup,
    ImplementationGuidance,
    Comparison,
    General,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 4] = [
        IntentCategory::DefinitionLookup,
        IntentCategory::ImplementationGuidance,
        IntentCategory::Comparison,
        IntentCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::DefinitionLookup => "definition_lookup",
            IntentCategory::ImplementationGuidance => "implementation_guidance",
            IntentCategory::Comparison => "comparison",
            IntentCategory::General => "general",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown intent category '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtractedIntent {
    pub category: IntentCategory,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
}

impl ExtractedIntent {
    pub fn general(confidence: f32) -> Self {
        Self { category: IntentCategory::General, confidence }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    MatStandard,
    Organization,
    Location,
    Concept,
}

/// Byte range of a mention inside the utterance text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedEntity {
    /// Surface text as it appeared in the utterance (or the coreference phrase).
    pub mention: String,
    pub span: Span,
    /// Graph node id, e.g. `"MAT05"` or `"org:phs"`.
    pub canonical_id: String,
    pub entity_type: EntityType,
    pub confidence: f32,
}

// ── Graph queries ─────────────────────────────────────────────────────────────

/// Relationship types in the MAT knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Defines,
    Requires,
    Implements,
    PartOf,
    Supports,
    Provides,
    AimsAt,
    RelatedTo,
    Mentions,
}

impl RelationKind {
    pub const ALL: [RelationKind; 9] = [
        RelationKind::Defines,
        RelationKind::Requires,
        RelationKind::Implements,
        RelationKind::PartOf,
        RelationKind::Supports,
        RelationKind::Provides,
        RelationKind::AimsAt,
        RelationKind::RelatedTo,
        RelationKind::Mentions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Defines => "defines",
            RelationKind::Requires => "requires",
            RelationKind::Implements => "implements",
            RelationKind::PartOf => "part_of",
            RelationKind::Supports => "supports",
            RelationKind::Provides => "provides",
            RelationKind::AimsAt => "aims_at",
            RelationKind::RelatedTo => "related_to",
            RelationKind::Mentions => "mentions",
        }
    }

    /// Relationship type name as stored in Cypher (`DEFINES`, `PART_OF`, ...).
    pub fn cypher_type(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    /// Verb phrase used when rendering an edge as a sentence.
    pub fn phrase(&self) -> &'static str {
        match self {
            RelationKind::Defines => "defines",
            RelationKind::Requires => "requires",
            RelationKind::Implements => "implements",
            RelationKind::PartOf => "is part of",
            RelationKind::Supports => "supports",
            RelationKind::Provides => "provides",
            RelationKind::AimsAt => "aims at",
            RelationKind::RelatedTo => "relates to",
            RelationKind::Mentions => "mentions",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = String;

    /// Accepts both config spelling (`part_of`) and Cypher spelling (`PART_OF`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        RelationKind::ALL
            .into_iter()
            .find(|r| r.as_str() == lower)
            .ok_or_else(|| format!("unknown relation kind '{s}'"))
    }
}

/// Why a query exists in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    Entity,
    CrossEntity,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryAnchor {
    /// Traverse outward from these node ids.
    Nodes { ids: Vec<String> },
    /// Shortest path between two nodes.
    ShortestPath { from: String, to: String },
    /// Anchor on nodes whose label matches any term, at most `max_anchors` of them.
    Keywords { terms: Vec<String>, max_anchors: usize },
}

/// A traversal specification. Built once by the planner, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphQuery {
    /// Position-derived id (`q0`, `q1`, ...), stable for identical plans.
    pub id: String,
    pub origin: QueryOrigin,
    pub anchor: QueryAnchor,
    /// Relationship filter; empty means any relationship.
    pub relations: Vec<RelationKind>,
    pub max_hops: u32,
    pub result_cap: usize,
}

impl GraphQuery {
    pub fn allows(&self, relation: RelationKind) -> bool {
        self.relations.is_empty() || self.relations.contains(&relation)
    }
}

// ── Facts ─────────────────────────────────────────────────────────────────────

/// Identity of the underlying graph element a candidate refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactKey {
    Node { id: String },
    Edge { from: String, relation: RelationKind, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStep {
    Node(String),
    Relation(RelationKind),
}

/// A node or edge returned by traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactCandidate {
    pub key: FactKey,
    /// Citation identifier shown to the user.
    pub source_id: String,
    /// Optional source document link.
    pub url: Option<String>,
    /// Textual content scored against the utterance and sent to the model.
    pub text: String,
    /// Path from the query root, alternating nodes and relations.
    pub path: Vec<PathStep>,
    pub hops: u32,
    /// Relation through which the fact was reached; `None` for query roots.
    pub relation: Option<RelationKind>,
    /// Relationship weight in `(0, 1]`; `1.0` for roots.
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub semantic: f32,
    pub structural: f32,
    pub composite: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFact {
    pub candidate: FactCandidate,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub fact: RankedFact,
    /// Estimated token cost of the rendered entry.
    pub tokens: usize,
}

impl ContextEntry {
    /// Single line as sent to the language model.
    pub fn render(&self) -> String {
        render_fact(&self.fact.candidate)
    }
}

pub(crate) fn render_fact(candidate: &FactCandidate) -> String {
    format!("[{}] {}", candidate.source_id, candidate.text)
}

/// Token-bounded, ordered selection of ranked facts.
///
/// Invariant: `total_tokens <= budget`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    pub total_tokens: usize,
    pub budget: usize,
    /// Candidates left out because they would not fit.
    pub skipped: usize,
}

impl AssembledContext {
    pub fn empty(budget: usize) -> Self {
        Self { entries: Vec::new(), total_tokens: 0, budget, skipped: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The top `k` entries only. Used for the shortened-context retry.
    pub fn shortened(&self, k: usize) -> AssembledContext {
        let entries: Vec<ContextEntry> = self.entries.iter().take(k).cloned().collect();
        let total_tokens = entries.iter().map(|e| e.tokens).sum();
        AssembledContext {
            skipped: self.skipped + self.entries.len().saturating_sub(entries.len()),
            entries,
            total_tokens,
            budget: self.budget,
        }
    }

    /// Citations in context order, one per distinct source id.
    pub fn citations(&self) -> Vec<Citation> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.fact.candidate.source_id.clone()))
            .map(|e| Citation {
                source_id: e.fact.candidate.source_id.clone(),
                url: e.fact.candidate.url.clone(),
            })
            .collect()
    }

    pub fn passages(&self) -> Vec<Passage> {
        self.entries
            .iter()
            .map(|e| Passage {
                source_id: e.fact.candidate.source_id.clone(),
                text: e.fact.candidate.text.clone(),
            })
            .collect()
    }

    /// Context block as inserted into the prompt, one fact per line.
    pub fn render(&self) -> String {
        self.entries.iter().map(ContextEntry::render).collect::<Vec<_>>().join("\n")
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    pub source_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub source_id: String,
    pub url: Option<String>,
}

/// Outbound payload to the language-model service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system: Option<String>,
    /// Fully rendered user prompt (context + history + question).
    pub prompt: String,
    pub question: String,
    pub passages: Vec<Passage>,
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Answer generated from the full assembled context.
    Full,
    /// Answer generated on retry from the top-K facts only.
    Shortened,
    /// No facts were retrieved; the explicit no-context message was returned.
    NoContext,
    /// Generation failed or ran out of time; the degraded message was returned.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub citations: Vec<Citation>,
    pub mode: GenerationMode,
    /// `true` whenever `mode` is not [`GenerationMode::Full`].
    pub fallback: bool,
    /// `true` when this or any upstream stage degraded.
    pub degraded: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    pub degradations: Vec<Degradation>,
}

// ── Pipeline state & degradation ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Extracting,
    Planning,
    Traversing,
    Ranking,
    Assembling,
    Generating,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Extracting => "extracting",
            PipelineState::Planning => "planning",
            PipelineState::Traversing => "traversing",
            PipelineState::Ranking => "ranking",
            PipelineState::Assembling => "assembling",
            PipelineState::Generating => "generating",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code attached to every degraded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// No entity passed the threshold; the plan is a single fallback query.
    IntentOnlyQuery,
    EmbeddingUnavailable,
    TraversalTimeout,
    TraversalFailed,
    NoCandidates,
    NothingFitBudget,
    GenerationRetried,
    GenerationTimeout,
    GenerationFailed,
    DeadlineExceeded,
    PlanningFailed,
    ExtractionFailed,
}

impl DegradeReason {
    pub fn code(&self) -> &'static str {
        match self {
            DegradeReason::IntentOnlyQuery => "intent_only_query",
            DegradeReason::EmbeddingUnavailable => "embedding_unavailable",
            DegradeReason::TraversalTimeout => "traversal_timeout",
            DegradeReason::TraversalFailed => "traversal_failed",
            DegradeReason::NoCandidates => "no_candidates",
            DegradeReason::NothingFitBudget => "nothing_fit_budget",
            DegradeReason::GenerationRetried => "generation_retried",
            DegradeReason::GenerationTimeout => "generation_timeout",
            DegradeReason::GenerationFailed => "generation_failed",
            DegradeReason::DeadlineExceeded => "deadline_exceeded",
            DegradeReason::PlanningFailed => "planning_failed",
            DegradeReason::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub stage: PipelineState,
    pub reason: DegradeReason,
    pub detail: String,
}

impl Degradation {
    pub fn new(stage: PipelineState, reason: DegradeReason, detail: impl Into<String>) -> Self {
        Self { stage, reason, detail: detail.into() }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.reason, self.stage, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, tokens: usize) -> ContextEntry {
        ContextEntry {
            fact: RankedFact {
                candidate: FactCandidate {
                    key: FactKey::Node { id: source.into() },
                    source_id: source.into(),
                    url: None,
                    text: format!("text of {source}"),
                    path: vec![PathStep::Node(source.into())],
                    hops: 0,
                    relation: None,
                    weight: 1.0,
                },
                score: Score { semantic: 0.0, structural: 1.0, composite: 0.3 },
            },
            tokens,
        }
    }

    #[test]
    fn relation_kind_parses_both_spellings() {
        assert_eq!("part_of".parse::<RelationKind>().unwrap(), RelationKind::PartOf);
        assert_eq!("PART_OF".parse::<RelationKind>().unwrap(), RelationKind::PartOf);
        assert!("owns".parse::<RelationKind>().is_err());
        assert_eq!(RelationKind::AimsAt.cypher_type(), "AIMS_AT");
    }

    #[test]
    fn intent_category_round_trips_through_str() {
        for c in IntentCategory::ALL {
            assert_eq!(c.as_str().parse::<IntentCategory>().unwrap(), c);
        }
    }

    #[test]
    fn shortened_keeps_top_entries_and_recounts_tokens() {
        let ctx = AssembledContext {
            entries: vec![entry("A", 10), entry("B", 20), entry("C", 30)],
            total_tokens: 60,
            budget: 100,
            skipped: 1,
        };
        let short = ctx.shortened(2);
        assert_eq!(short.len(), 2);
        assert_eq!(short.total_tokens, 30);
        assert_eq!(short.skipped, 2);
        assert!(short.total_tokens <= short.budget);
    }

    #[test]
    fn citations_are_unique_and_ordered() {
        let ctx = AssembledContext {
            entries: vec![entry("B", 1), entry("A", 1), entry("B", 1)],
            total_tokens: 3,
            budget: 10,
            skipped: 0,
        };
        let ids: Vec<String> = ctx.citations().into_iter().map(|c| c.source_id).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn utterance_without_history_has_empty_slice() {
        let u = Utterance::new("What does MAT05 require?");
        assert!(u.history().is_empty());
        let h: History = vec![Turn::user("hi")].into();
        let u = u.with_history(h);
        assert_eq!(u.history().len(), 1);
    }

    #[test]
    fn degrade_reason_codes_are_snake_case() {
        assert_eq!(DegradeReason::TraversalTimeout.code(), "traversal_timeout");
        let d = Degradation::new(PipelineState::Traversing, DegradeReason::TraversalTimeout, "q0");
        assert_eq!(d.to_string(), "traversal_timeout at traversing: q0");
    }
}
