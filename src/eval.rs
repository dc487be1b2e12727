//! Offline answer-quality evaluation.
//!
//! Runs a fixed set of MAT questions through [`PipelineCoordinator::handle`]
//! and scores each answer by keyword overlap with a reference answer,
//! coverage of the sources it was expected to cite, and pipeline latency.
//! Results are aggregated overall and per question category.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::model::{PipelineState, Utterance};
use crate::pipeline::coordinator::PipelineCoordinator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalCase {
    pub question: String,
    pub expected_answer: String,
    pub category: String,
    /// Source ids a good answer cites.
    pub expected_sources: Vec<String>,
}

impl EvalCase {
    pub fn new(question: &str, expected_answer: &str, category: &str, expected_sources: &[&str]) -> Self {
        Self {
            question: question.to_string(),
            expected_answer: expected_answer.to_string(),
            category: category.to_string(),
            expected_sources: expected_sources.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Questions answerable from the bundled graph, one per category.
pub fn default_cases() -> Vec<EvalCase> {
    vec![
        EvalCase::new(
            "What are the MAT standards?",
            "The MAT standards are ten Scottish standards for medication assisted treatment \
             covering access, choice and support.",
            "general",
            &["concept:mat"],
        ),
        EvalCase::new(
            "What is MAT Standard 1?",
            "MAT Standard 1 gives people the option to start MAT on the same day they present.",
            "specific_standard",
            &["MAT01"],
        ),
        EvalCase::new(
            "How are MAT standards implemented?",
            "MAT standards are implemented by alcohol and drug partnerships and health boards, \
             with support from national agencies.",
            "implementation",
            &["concept:mat"],
        ),
        EvalCase::new(
            "What is the aim of MAT?",
            "MAT uses medication with psychosocial support to treat opioid dependence and reduce harm.",
            "purpose",
            &["concept:mat"],
        ),
        EvalCase::new(
            "Which organisations support MAT?",
            "Public Health Scotland and the NHS support MAT implementation across Scotland.",
            "organisations",
            &["concept:mat", "org:phs"],
        ),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub question: String,
    pub category: String,
    pub expected: String,
    pub generated: String,
    pub state: PipelineState,
    pub degraded: bool,
    pub keyword_overlap: f64,
    pub citation_coverage: f64,
    pub length_ratio: f64,
    pub sources_found: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let mut n = 0usize;
        let (mut sum, mut min, mut max) = (0.0, f64::INFINITY, f64::NEG_INFINITY);
        for v in values {
            n += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if n == 0 {
            return Self { mean: 0.0, min: 0.0, max: 0.0 };
        }
        Self { mean: sum / n as f64, min, max }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub cases: usize,
    pub degraded: usize,
    pub keyword_overlap: Stats,
    pub citation_coverage: Stats,
    pub latency_ms: Stats,
    pub total_latency_ms: u64,
}

impl Summary {
    fn of(results: &[&CaseResult]) -> Self {
        Self {
            cases: results.len(),
            degraded: results.iter().filter(|r| r.degraded).count(),
            keyword_overlap: Stats::of(results.iter().map(|r| r.keyword_overlap)),
            citation_coverage: Stats::of(results.iter().map(|r| r.citation_coverage)),
            latency_ms: Stats::of(results.iter().map(|r| r.latency_ms as f64)),
            total_latency_ms: results.iter().map(|r| r.latency_ms).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub results: Vec<CaseResult>,
    pub summary: Summary,
    pub by_category: BTreeMap<String, Summary>,
}

impl EvalReport {
    pub fn from_results(results: Vec<CaseResult>) -> Self {
        let all: Vec<&CaseResult> = results.iter().collect();
        let summary = Summary::of(&all);

        let mut grouped: BTreeMap<&str, Vec<&CaseResult>> = BTreeMap::new();
        for r in &results {
            grouped.entry(r.category.as_str()).or_default().push(r);
        }
        let by_category = grouped
            .into_iter()
            .map(|(category, rs)| (category.to_string(), Summary::of(&rs)))
            .collect();

        Self { results, summary, by_category }
    }

    /// Markdown report for the console.
    pub fn render(&self) -> String {
        let s = &self.summary;
        let mut out = String::from("# MAT answer evaluation\n\n## Summary\n");
        let _ = writeln!(out, "- Cases: {} ({} degraded)", s.cases, s.degraded);
        let _ = writeln!(out, "- Total latency: {} ms", s.total_latency_ms);
        let _ = writeln!(out, "- Mean latency: {:.1} ms", s.latency_ms.mean);
        let _ = writeln!(
            out,
            "- Keyword overlap: mean {:.3}, min {:.3}, max {:.3}",
            s.keyword_overlap.mean, s.keyword_overlap.min, s.keyword_overlap.max
        );
        let _ = writeln!(out, "- Citation coverage: mean {:.3}", s.citation_coverage.mean);

        out.push_str("\n## Category performance\n");
        for (category, c) in &self.by_category {
            let _ = writeln!(
                out,
                "- {category}: overlap {:.3}, coverage {:.3}, latency {:.1} ms",
                c.keyword_overlap.mean, c.citation_coverage.mean, c.latency_ms.mean
            );
        }
        out
    }

    /// Write the report as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Run `cases` in order, each as a fresh conversation.
pub async fn run(coordinator: &PipelineCoordinator, cases: &[EvalCase]) -> EvalReport {
    let mut results = Vec::with_capacity(cases.len());
    for (i, case) in cases.iter().enumerate() {
        info!(case = i + 1, total = cases.len(), category = %case.category, "evaluating");
        let response = coordinator.handle(Utterance::new(case.question.as_str())).await;

        let cited: Vec<&str> = response.result.citations.iter().map(|c| c.source_id.as_str()).collect();
        let generated = response.result.text.clone();
        results.push(CaseResult {
            question: case.question.clone(),
            category: case.category.clone(),
            expected: case.expected_answer.clone(),
            keyword_overlap: keyword_overlap(&case.expected_answer, &generated),
            citation_coverage: citation_coverage(&case.expected_sources, &cited),
            length_ratio: length_ratio(&case.expected_answer, &generated),
            sources_found: cited.len(),
            latency_ms: response.diagnostics.total_ms,
            state: response.state,
            degraded: response.is_degraded(),
            generated,
        });
    }
    let report = EvalReport::from_results(results);
    info!(
        cases = report.summary.cases,
        keyword_overlap = report.summary.keyword_overlap.mean,
        citation_coverage = report.summary.citation_coverage.mean,
        "evaluation complete"
    );
    report
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Share of distinct reference words that appear in `generated`.
pub fn keyword_overlap(reference: &str, generated: &str) -> f64 {
    let reference: HashSet<String> = tokens(reference).collect();
    if reference.is_empty() {
        return 0.0;
    }
    let generated: HashSet<String> = tokens(generated).collect();
    reference.intersection(&generated).count() as f64 / reference.len() as f64
}

/// Share of `expected` source ids present in `cited`. Nothing expected is full coverage.
pub fn citation_coverage(expected: &[String], cited: &[&str]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let hits = expected.iter().filter(|e| cited.contains(&e.as_str())).count();
    hits as f64 / expected.len() as f64
}

/// Generated word count over reference word count.
pub fn length_ratio(reference: &str, generated: &str) -> f64 {
    let reference = reference.split_whitespace().count().max(1);
    generated.split_whitespace().count() as f64 / reference as f64
}
