//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the path given with `-f`), resolves asset
//! paths against the config file's directory, applies the
//! `MAT_RAG_LOG_LEVEL` override and pulls secrets from the environment.
//! The resolved [`Config`] is validated before it is handed out.

use std::{
    collections::{BTreeMap, HashMap},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::model::{IntentCategory, RelationKind};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

pub const LLM_PROVIDERS: [&str; 3] = ["openai", "extractive", "scripted"];
pub const EMBEDDING_PROVIDERS: [&str; 2] = ["hashing", "openai"];
pub const GRAPH_BACKENDS: [&str; 2] = ["memory", "neo4j"];

/// Relations followed by definition lookups unless `[planner.relations]` says otherwise.
const DEFINITION_RELATIONS: [RelationKind; 3] =
    [RelationKind::Defines, RelationKind::Requires, RelationKind::PartOf];

const DEFAULT_AUTHORITY: [(RelationKind, f32); 9] = [
    (RelationKind::Defines, 1.0),
    (RelationKind::Requires, 0.9),
    (RelationKind::Implements, 0.8),
    (RelationKind::PartOf, 0.7),
    (RelationKind::Supports, 0.6),
    (RelationKind::Provides, 0.6),
    (RelationKind::AimsAt, 0.5),
    (RelationKind::RelatedTo, 0.4),
    (RelationKind::Mentions, 0.3),
];

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Below this the intent falls back to `general`.
    pub intent_threshold: f32,
    /// Entities below this are dropped.
    pub entity_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub definition_hops: u32,
    pub implementation_hops: u32,
    pub comparison_hops: u32,
    pub general_hops: u32,
    /// Hop ceiling for cross-entity shortest-path queries.
    pub path_max_hops: u32,
    pub result_cap: usize,
    /// Label-index neighbours used to anchor the no-entity fallback query.
    pub fallback_anchors: usize,
    /// Relationship filter per intent. Missing or empty means any relation.
    pub relation_filters: BTreeMap<IntentCategory, Vec<RelationKind>>,
}

impl PlannerConfig {
    pub fn hops_for(&self, intent: IntentCategory) -> u32 {
        match intent {
            IntentCategory::DefinitionLookup => self.definition_hops,
            IntentCategory::ImplementationGuidance => self.implementation_hops,
            IntentCategory::Comparison => self.comparison_hops,
            IntentCategory::General => self.general_hops,
        }
    }

    pub fn relations_for(&self, intent: IntentCategory) -> Vec<RelationKind> {
        self.relation_filters.get(&intent).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RankerConfig {
    pub semantic_weight: f32,
    pub structural_weight: f32,
    /// Structural score multiplier per hop.
    pub hop_decay: f32,
    /// Authority weight per relation. Missing relations score `0.0`.
    pub authority: BTreeMap<RelationKind, f32>,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub token_budget: usize,
    pub max_facts: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub timeout: Duration,
    /// Facts kept for the shortened-context retry.
    pub retry_top_k: usize,
    pub max_answer_chars: usize,
    /// Directory holding `system.md` and `answer.txt`.
    pub prompts_dir: PathBuf,
    pub no_context_message: String,
    pub unavailable_message: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// End-to-end latency budget for one request.
    pub request_budget: Duration,
    /// Conversation turns kept by the console session.
    pub history_turns: usize,
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// Full embeddings endpoint URL.
    pub api_base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"hashing"` or `"openai"`.
    pub provider: String,
    /// Vector width for the hashing provider.
    pub dimensions: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub openai: OpenAiEmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// Base URL of the Neo4j HTTP API, e.g. `http://localhost:7474`.
    pub url: String,
    pub database: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// `"memory"` or `"neo4j"`.
    pub backend: String,
    /// Graph JSON for the memory backend (already resolved).
    pub path: PathBuf,
    pub neo4j: Neo4jConfig,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Maps to `default` in `[llm]`.
    pub provider: String,
    pub openai: OpenAiConfig,
    /// Passages quoted by the extractive provider.
    pub extractive_passages: usize,
}

/// Fully-resolved configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub extractor: ExtractorConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub ranker: RankerConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
    pub pipeline: PipelineConfig,
    pub embedding: EmbeddingConfig,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    /// From `LLM_API_KEY`. Never sourced from TOML.
    pub llm_api_key: Option<String>,
    /// From `EMBEDDING_API_KEY`, falling back to `LLM_API_KEY`.
    pub embedding_api_key: Option<String>,
    /// From `NEO4J_PASSWORD`.
    pub neo4j_password: Option<String>,
}

impl Default for Config {
    /// Built-in defaults with assets under `config/`, offline providers and no
    /// secrets. Does not read the environment.
    fn default() -> Self {
        let relation_filters =
            BTreeMap::from([(IntentCategory::DefinitionLookup, DEFINITION_RELATIONS.to_vec())]);
        let authority = BTreeMap::from(DEFAULT_AUTHORITY);
        build(RawConfig::default(), Path::new("config"), None, relation_filters, authority)
    }
}

impl Config {
    /// Check every cross-field constraint. Any violation is fatal at startup.
    pub fn validate(&self) -> Result<(), AppError> {
        check_unit("extractor.intent_threshold", self.extractor.intent_threshold)?;
        check_unit("extractor.entity_threshold", self.extractor.entity_threshold)?;

        let p = &self.planner;
        for (name, hops) in [
            ("planner.definition_hops", p.definition_hops),
            ("planner.implementation_hops", p.implementation_hops),
            ("planner.comparison_hops", p.comparison_hops),
            ("planner.general_hops", p.general_hops),
            ("planner.path_max_hops", p.path_max_hops),
        ] {
            if hops == 0 {
                return Err(AppError::Config(format!("{name} must be at least 1")));
            }
        }
        check_positive("planner.result_cap", p.result_cap)?;
        check_positive("planner.fallback_anchors", p.fallback_anchors)?;

        check_duration("executor.query_timeout_ms", self.executor.query_timeout)?;

        let r = &self.ranker;
        for (name, w) in [
            ("ranker.semantic_weight", r.semantic_weight),
            ("ranker.structural_weight", r.structural_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(AppError::Config(format!("{name} must be finite and non-negative")));
            }
        }
        let sum = r.semantic_weight + r.structural_weight;
        if (sum - 1.0).abs() > 0.001 {
            return Err(AppError::Config(format!(
                "ranker weights must sum to 1.0, got {sum:.3}"
            )));
        }
        if !r.hop_decay.is_finite() || r.hop_decay <= 0.0 || r.hop_decay > 1.0 {
            return Err(AppError::Config("ranker.hop_decay must be in (0, 1]".into()));
        }
        for (relation, weight) in &r.authority {
            check_unit(&format!("ranker.authority.{relation}"), *weight)?;
        }

        check_positive("context.token_budget", self.context.token_budget)?;
        check_positive("context.max_facts", self.context.max_facts)?;

        let g = &self.generation;
        check_duration("generation.timeout_seconds", g.timeout)?;
        check_positive("generation.retry_top_k", g.retry_top_k)?;
        check_positive("generation.max_answer_chars", g.max_answer_chars)?;

        check_duration("pipeline.request_budget_ms", self.pipeline.request_budget)?;
        check_positive("pipeline.history_turns", self.pipeline.history_turns)?;

        check_known("embedding.provider", &self.embedding.provider, &EMBEDDING_PROVIDERS)?;
        check_positive("embedding.dimensions", self.embedding.dimensions)?;
        check_duration("embedding.timeout_ms", self.embedding.timeout)?;
        check_known("graph.backend", &self.graph.backend, &GRAPH_BACKENDS)?;
        check_known("llm.default", &self.llm.provider, &LLM_PROVIDERS)?;

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), AppError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Config(format!("{name} must be in [0, 1], got {value}")));
    }
    Ok(())
}

fn check_positive(name: &str, value: usize) -> Result<(), AppError> {
    if value == 0 {
        return Err(AppError::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn check_duration(name: &str, value: Duration) -> Result<(), AppError> {
    if value.is_zero() {
        return Err(AppError::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn check_known(name: &str, value: &str, known: &[&str]) -> Result<(), AppError> {
    if !known.contains(&value) {
        return Err(AppError::Config(format!(
            "{name} '{value}' is not one of: {}",
            known.join(", ")
        )));
    }
    Ok(())
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    service: RawService,
    #[serde(default)]
    extractor: RawExtractor,
    #[serde(default)]
    planner: RawPlanner,
    #[serde(default)]
    executor: RawExecutor,
    #[serde(default)]
    ranker: RawRanker,
    #[serde(default)]
    context: RawContext,
    #[serde(default)]
    generation: RawGeneration,
    #[serde(default)]
    pipeline: RawPipeline,
    #[serde(default)]
    embedding: RawEmbedding,
    #[serde(default)]
    graph: RawGraph,
    #[serde(default)]
    llm: RawLlm,
}

#[derive(Deserialize)]
struct RawService {
    #[serde(default = "default_service_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawService {
    fn default() -> Self {
        Self { name: default_service_name(), log_level: default_log_level(), log_file: None }
    }
}

fn default_service_name() -> String { "mat-rag".to_string() }
fn default_log_level() -> String { "info".to_string() }

#[derive(Deserialize)]
#[serde(default)]
struct RawExtractor {
    intent_threshold: f32,
    entity_threshold: f32,
}

impl Default for RawExtractor {
    fn default() -> Self {
        Self { intent_threshold: 0.5, entity_threshold: 0.6 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawPlanner {
    definition_hops: u32,
    implementation_hops: u32,
    comparison_hops: u32,
    general_hops: u32,
    path_max_hops: u32,
    result_cap: usize,
    fallback_anchors: usize,
    /// `[planner.relations]`: intent name -> relation names.
    relations: HashMap<String, Vec<String>>,
}

impl Default for RawPlanner {
    fn default() -> Self {
        Self {
            definition_hops: 1,
            implementation_hops: 3,
            comparison_hops: 1,
            general_hops: 2,
            path_max_hops: 4,
            result_cap: 25,
            fallback_anchors: 3,
            relations: HashMap::from([(
                IntentCategory::DefinitionLookup.as_str().to_string(),
                DEFINITION_RELATIONS.iter().map(|r| r.as_str().to_string()).collect(),
            )]),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawExecutor {
    query_timeout_ms: u64,
}

impl Default for RawExecutor {
    fn default() -> Self {
        Self { query_timeout_ms: 2000 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawRanker {
    semantic_weight: f32,
    structural_weight: f32,
    hop_decay: f32,
    /// `[ranker.authority]`: relation name -> weight.
    authority: HashMap<String, f32>,
}

impl Default for RawRanker {
    fn default() -> Self {
        let authority = DEFAULT_AUTHORITY.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect();
        Self { semantic_weight: 0.7, structural_weight: 0.3, hop_decay: 0.5, authority }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawContext {
    token_budget: usize,
    max_facts: usize,
}

impl Default for RawContext {
    fn default() -> Self {
        Self { token_budget: 1500, max_facts: 12 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawGeneration {
    timeout_seconds: u64,
    retry_top_k: usize,
    max_answer_chars: usize,
    prompts_dir: String,
    no_context_message: String,
    unavailable_message: String,
}

impl Default for RawGeneration {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_top_k: 3,
            max_answer_chars: 1200,
            prompts_dir: "prompts".to_string(),
            no_context_message: "I could not find information about that in the MAT standards \
                knowledge base. Try naming a specific standard, for example \"What does MAT 5 require?\""
                .to_string(),
            unavailable_message: "I was unable to retrieve a full answer right now. \
                Please try again in a moment."
                .to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawPipeline {
    request_budget_ms: u64,
    history_turns: usize,
}

impl Default for RawPipeline {
    fn default() -> Self {
        Self { request_budget_ms: 45_000, history_turns: 10 }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(rename = "default", default = "default_embedding_provider")]
    provider: String,
    #[serde(default = "default_embedding_dimensions")]
    dimensions: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_embedding_retries")]
    retries: u32,
    #[serde(default)]
    openai: RawOpenAiEmbedding,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimensions: default_embedding_dimensions(),
            timeout_ms: default_embedding_timeout_ms(),
            retries: default_embedding_retries(),
            openai: RawOpenAiEmbedding::default(),
        }
    }
}

fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_dimensions() -> usize { 256 }
fn default_embedding_timeout_ms() -> u64 { 5000 }
fn default_embedding_retries() -> u32 { 1 }

#[derive(Deserialize)]
struct RawOpenAiEmbedding {
    #[serde(default = "default_embedding_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_embedding_model")]
    model: String,
}

impl Default for RawOpenAiEmbedding {
    fn default() -> Self {
        Self { api_base_url: default_embedding_api_base_url(), model: default_embedding_model() }
    }
}

fn default_embedding_api_base_url() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }

#[derive(Deserialize)]
struct RawGraph {
    #[serde(rename = "default", default = "default_graph_backend")]
    backend: String,
    #[serde(default = "default_graph_path")]
    path: String,
    #[serde(default)]
    neo4j: RawNeo4j,
}

impl Default for RawGraph {
    fn default() -> Self {
        Self { backend: default_graph_backend(), path: default_graph_path(), neo4j: RawNeo4j::default() }
    }
}

fn default_graph_backend() -> String { "memory".to_string() }
fn default_graph_path() -> String { "graph.json".to_string() }

#[derive(Deserialize)]
#[serde(default)]
struct RawNeo4j {
    url: String,
    database: String,
    user: String,
}

impl Default for RawNeo4j {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: "neo4j".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
    #[serde(default)]
    extractive: RawExtractive,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAiConfig::default(),
            extractive: RawExtractive::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawExtractive {
    max_passages: usize,
}

impl Default for RawExtractive {
    fn default() -> Self {
        Self { max_passages: 3 }
    }
}

fn default_llm_provider() -> String { "extractive".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (or `config/default.toml`), then apply env-var
/// overrides and secrets.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let log_level_override = env::var("MAT_RAG_LOG_LEVEL").ok();
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    let mut cfg = load_from(path, log_level_override.as_deref())?;

    cfg.llm_api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
    cfg.embedding_api_key = env::var("EMBEDDING_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .or_else(|| cfg.llm_api_key.clone());
    cfg.neo4j_password = env::var("NEO4J_PASSWORD").ok().filter(|k| !k.is_empty());

    Ok(cfg)
}

/// Internal loader. Accepts an explicit path and optional override.
/// Tests pass overrides directly instead of mutating env vars. Secrets are
/// left unset.
pub fn load_from(path: &Path, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let cfg = resolve(parsed, base_dir, log_level_override)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the named relation tables, then build the [`Config`].
fn resolve(
    mut parsed: RawConfig,
    base_dir: &Path,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let mut relation_filters = BTreeMap::new();
    for (intent, names) in std::mem::take(&mut parsed.planner.relations) {
        let intent: IntentCategory = intent
            .parse()
            .map_err(|e| AppError::Config(format!("planner.relations: {e}")))?;
        let relations = parse_relations(&names)
            .map_err(|e| AppError::Config(format!("planner.relations.{intent}: {e}")))?;
        relation_filters.insert(intent, relations);
    }

    let mut authority = BTreeMap::new();
    for (name, weight) in std::mem::take(&mut parsed.ranker.authority) {
        let relation: RelationKind = name
            .parse()
            .map_err(|e| AppError::Config(format!("ranker.authority: {e}")))?;
        authority.insert(relation, weight);
    }

    Ok(build(parsed, base_dir, log_level_override, relation_filters, authority))
}

/// Infallible field mapping. The raw relation tables are ignored in favour
/// of the typed `relation_filters` and `authority`.
fn build(
    parsed: RawConfig,
    base_dir: &Path,
    log_level_override: Option<&str>,
    relation_filters: BTreeMap<IntentCategory, Vec<RelationKind>>,
    authority: BTreeMap<RelationKind, f32>,
) -> Config {
    let s = parsed.service;
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();

    Config {
        service_name: s.name,
        log_level,
        log_file: s.log_file.map(|p| resolve_path(base_dir, &p)),
        extractor: ExtractorConfig {
            intent_threshold: parsed.extractor.intent_threshold,
            entity_threshold: parsed.extractor.entity_threshold,
        },
        planner: PlannerConfig {
            definition_hops: parsed.planner.definition_hops,
            implementation_hops: parsed.planner.implementation_hops,
            comparison_hops: parsed.planner.comparison_hops,
            general_hops: parsed.planner.general_hops,
            path_max_hops: parsed.planner.path_max_hops,
            result_cap: parsed.planner.result_cap,
            fallback_anchors: parsed.planner.fallback_anchors,
            relation_filters,
        },
        executor: ExecutorConfig {
            query_timeout: Duration::from_millis(parsed.executor.query_timeout_ms),
        },
        ranker: RankerConfig {
            semantic_weight: parsed.ranker.semantic_weight,
            structural_weight: parsed.ranker.structural_weight,
            hop_decay: parsed.ranker.hop_decay,
            authority,
        },
        context: ContextConfig {
            token_budget: parsed.context.token_budget,
            max_facts: parsed.context.max_facts,
        },
        generation: GenerationConfig {
            timeout: Duration::from_secs(parsed.generation.timeout_seconds),
            retry_top_k: parsed.generation.retry_top_k,
            max_answer_chars: parsed.generation.max_answer_chars,
            prompts_dir: resolve_path(base_dir, &parsed.generation.prompts_dir),
            no_context_message: parsed.generation.no_context_message,
            unavailable_message: parsed.generation.unavailable_message,
        },
        pipeline: PipelineConfig {
            request_budget: Duration::from_millis(parsed.pipeline.request_budget_ms),
            history_turns: parsed.pipeline.history_turns,
        },
        embedding: EmbeddingConfig {
            provider: parsed.embedding.provider,
            dimensions: parsed.embedding.dimensions,
            timeout: Duration::from_millis(parsed.embedding.timeout_ms),
            retries: parsed.embedding.retries,
            openai: OpenAiEmbeddingConfig {
                api_base_url: parsed.embedding.openai.api_base_url,
                model: parsed.embedding.openai.model,
            },
        },
        graph: GraphConfig {
            backend: parsed.graph.backend,
            path: resolve_path(base_dir, &parsed.graph.path),
            neo4j: Neo4jConfig {
                url: parsed.graph.neo4j.url,
                database: parsed.graph.neo4j.database,
                user: parsed.graph.neo4j.user,
            },
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
            extractive_passages: parsed.llm.extractive.max_passages,
        },
        llm_api_key: None,
        embedding_api_key: None,
        neo4j_password: None,
    }
}

fn parse_relations(names: &[String]) -> Result<Vec<RelationKind>, String> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let relation: RelationKind = name.parse()?;
        if !out.contains(&relation) {
            out.push(relation);
        }
    }
    Ok(out)
}

/// `~` expansion, then relative paths are joined onto `base_dir`.
fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[service]
name = "test-rag"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None).unwrap();
        assert_eq!(cfg.service_name, "test-rag");
        assert_eq!(cfg.extractor.entity_threshold, 0.6);
        assert_eq!(cfg.planner.hops_for(IntentCategory::ImplementationGuidance), 3);
        assert_eq!(cfg.context.token_budget, 1500);
        assert_eq!(cfg.executor.query_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.ranker.authority[&RelationKind::Defines], 1.0);
        assert_eq!(
            cfg.planner.relations_for(IntentCategory::DefinitionLookup),
            vec![RelationKind::Defines, RelationKind::Requires, RelationKind::PartOf]
        );
        assert!(cfg.planner.relations_for(IntentCategory::General).is_empty());
    }

    #[test]
    fn relative_asset_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, MINIMAL_TOML).unwrap();
        let cfg = load_from(&path, None).unwrap();
        assert_eq!(cfg.graph.path, dir.path().join("graph.json"));
        assert_eq!(cfg.generation.prompts_dir, dir.path().join("prompts"));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let f = write_toml(
            r#"
[ranker]
semantic_weight = 0.6
structural_weight = 0.3
"#,
        );
        let err = load_from(f.path(), None).unwrap_err().to_string();
        assert!(err.contains("sum to 1.0"), "got: {err}");
    }

    #[test]
    fn zero_hop_limit_rejected() {
        let f = write_toml("[planner]\ngeneral_hops = 0\n");
        let err = load_from(f.path(), None).unwrap_err().to_string();
        assert!(err.contains("planner.general_hops"));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let f = write_toml("[extractor]\nentity_threshold = 1.5\n");
        assert!(load_from(f.path(), None).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let f = write_toml("[llm]\ndefault = \"mystery\"\n");
        let err = load_from(f.path(), None).unwrap_err().to_string();
        assert!(err.contains("llm.default"));
    }

    #[test]
    fn unknown_relation_in_filters_rejected() {
        let f = write_toml("[planner.relations]\ncomparison = [\"owns\"]\n");
        let err = load_from(f.path(), None).unwrap_err().to_string();
        assert!(err.contains("unknown relation kind"));
    }

    #[test]
    fn hop_decay_bounds_checked() {
        let f = write_toml("[ranker]\nhop_decay = 0.0\n");
        assert!(load_from(f.path(), None).is_err());
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.llm.provider, "extractive");
        assert_eq!(cfg.graph.path, PathBuf::from("config/graph.json"));
        assert!(cfg.llm_api_key.is_none());
    }

    #[test]
    fn default_config_matches_default_toml_values() {
        let f = write_toml("");
        let loaded = load_from(f.path(), None).unwrap();
        let built = Config::default();
        assert_eq!(built.ranker.authority, loaded.ranker.authority);
        assert_eq!(built.ranker.authority.get(&RelationKind::Requires), Some(&0.9));
        assert_eq!(built.planner.relation_filters, loaded.planner.relation_filters);
        assert_eq!(
            built.planner.relations_for(IntentCategory::DefinitionLookup),
            vec![RelationKind::Defines, RelationKind::Requires, RelationKind::PartOf]
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.mat-rag");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".mat-rag"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("debug")).unwrap();
        assert_eq!(cfg.log_level, "debug");
    }
}
