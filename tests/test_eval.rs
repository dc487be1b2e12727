//! Evaluation over the bundled MAT graph with the offline providers.

use std::sync::Arc;

use mat_rag::config::Config;
use mat_rag::eval::{self, EvalCase};
use mat_rag::model::PipelineState;
use mat_rag::pipeline::PipelineCoordinator;

async fn coordinator() -> PipelineCoordinator {
    PipelineCoordinator::from_config(Arc::new(Config::default())).await.unwrap()
}

#[tokio::test]
async fn built_in_cases_run_against_bundled_graph() {
    let c = coordinator().await;
    let cases = eval::default_cases();

    let report = eval::run(&c, &cases).await;

    assert_eq!(report.results.len(), cases.len());
    assert_eq!(report.summary.cases, cases.len());
    assert_eq!(report.by_category.len(), cases.len());
    for r in &report.results {
        assert_ne!(r.state, PipelineState::Failed, "{}", r.question);
        assert!((0.0..=1.0).contains(&r.keyword_overlap));
        assert!((0.0..=1.0).contains(&r.citation_coverage));
    }

    let standard = &report.by_category["specific_standard"];
    assert_eq!(standard.cases, 1);
    assert_eq!(standard.citation_coverage.mean, 1.0);
    assert!(standard.keyword_overlap.mean > 0.0);

    let text = report.render();
    assert!(text.contains("## Category performance"));
    assert!(text.contains("- specific_standard:"));
}

#[tokio::test]
async fn uncited_source_scores_zero_coverage() {
    let c = coordinator().await;
    // The bundled graph has ten standards, so MAT11 can never be cited.
    let cases = vec![EvalCase::new(
        "Tell me about the weather on Mars.",
        "Nothing in the MAT standards covers this.",
        "out_of_scope",
        &["MAT11"],
    )];

    let report = eval::run(&c, &cases).await;

    let r = &report.results[0];
    assert_ne!(r.state, PipelineState::Failed);
    assert_eq!(r.citation_coverage, 0.0);
    assert_eq!(report.by_category["out_of_scope"].citation_coverage.mean, 0.0);
}
