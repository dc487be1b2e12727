//! Graph query planning.
//!
//! Turns intent and entities into an ordered, deterministic list of
//! [`GraphQuery`] values. With no entities the plan is exactly one fallback
//! query, anchored on label-index neighbours when those are available and on
//! utterance keywords otherwise.

use crate::config::PlannerConfig;
use crate::error::PipelineError;
use crate::model::{
    ExtractedEntity, ExtractedIntent, GraphQuery, IntentCategory, QueryAnchor, QueryOrigin,
};

/// Words ignored when deriving fallback keywords.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "does", "for",
    "from", "have", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "please", "should",
    "tell", "that", "the", "there", "this", "to", "us", "was", "we", "what", "when", "where",
    "which", "who", "why", "with", "would", "you",
];

/// Where the single no-entity fallback query is anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackAnchor {
    /// Node ids nearest to the utterance in the label index.
    Labels(Vec<String>),
    /// Utterance keywords matched against node labels.
    Keywords(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    config: PlannerConfig,
}

impl QueryPlanner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn fallback_anchors(&self) -> usize {
        self.config.fallback_anchors
    }

    /// Build the query plan.
    ///
    /// One query per distinct entity (sorted by canonical id) with the hop
    /// limit and relation filter of the intent. `comparison` adds one
    /// shortest-path query per consecutive entity pair.
    pub fn plan(
        &self,
        intent: &ExtractedIntent,
        entities: &[ExtractedEntity],
        fallback: FallbackAnchor,
    ) -> Result<Vec<GraphQuery>, PipelineError> {
        let max_hops = self.config.hops_for(intent.category);
        if max_hops == 0 {
            return Err(PipelineError::Planning(format!(
                "hop limit for {} is zero",
                intent.category
            )));
        }
        let result_cap = self.config.result_cap;
        if result_cap == 0 {
            return Err(PipelineError::Planning("result cap is zero".into()));
        }
        let relations = self.config.relations_for(intent.category);

        let mut anchors: Vec<&str> = entities.iter().map(|e| e.canonical_id.as_str()).collect();
        anchors.sort_unstable();
        anchors.dedup();

        let mut queries: Vec<GraphQuery> = Vec::new();
        let mut push = |origin: QueryOrigin, anchor: QueryAnchor, relations: Vec<_>, max_hops: u32| {
            queries.push(GraphQuery {
                id: format!("q{}", queries.len()),
                origin,
                anchor,
                relations,
                max_hops,
                result_cap,
            });
        };

        if anchors.is_empty() {
            let anchor = match fallback {
                FallbackAnchor::Labels(ids) if !ids.is_empty() => QueryAnchor::Nodes { ids },
                FallbackAnchor::Labels(_) => QueryAnchor::Keywords {
                    terms: Vec::new(),
                    max_anchors: self.config.fallback_anchors,
                },
                FallbackAnchor::Keywords(terms) => QueryAnchor::Keywords {
                    terms,
                    max_anchors: self.config.fallback_anchors,
                },
            };
            push(QueryOrigin::Fallback, anchor, relations, max_hops);
            return Ok(queries);
        }

        for id in &anchors {
            push(
                QueryOrigin::Entity,
                QueryAnchor::Nodes { ids: vec![(*id).to_string()] },
                relations.clone(),
                max_hops,
            );
        }

        if intent.category == IntentCategory::Comparison {
            let path_hops = self.config.path_max_hops;
            if path_hops == 0 {
                return Err(PipelineError::Planning("shortest-path hop limit is zero".into()));
            }
            for pair in anchors.windows(2) {
                push(
                    QueryOrigin::CrossEntity,
                    QueryAnchor::ShortestPath { from: pair[0].to_string(), to: pair[1].to_string() },
                    Vec::new(),
                    path_hops,
                );
            }
        }

        Ok(queries)
    }
}

/// Lowercase content words of `text`, in order, deduplicated.
pub fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let w = word.to_lowercase();
        if w.len() < 3 || STOP_WORDS.contains(&w.as_str()) || out.contains(&w) {
            continue;
        }
        out.push(w);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{EntityType, RelationKind, Span};

    fn planner() -> QueryPlanner {
        QueryPlanner::new(&Config::default().planner)
    }

    fn entity(id: &str) -> ExtractedEntity {
        ExtractedEntity {
            mention: id.into(),
            span: Span { start: 0, end: id.len() },
            canonical_id: id.into(),
            entity_type: EntityType::MatStandard,
            confidence: 0.95,
        }
    }

    fn intent(category: IntentCategory) -> ExtractedIntent {
        ExtractedIntent { category, confidence: 0.9 }
    }

    fn no_fallback() -> FallbackAnchor {
        FallbackAnchor::Keywords(Vec::new())
    }

    #[test]
    fn definition_is_one_hop_per_entity() {
        let plan = planner()
            .plan(&intent(IntentCategory::DefinitionLookup), &[entity("MAT05")], no_fallback())
            .unwrap();
        assert_eq!(plan.len(), 1);
        let q = &plan[0];
        assert_eq!(q.id, "q0");
        assert_eq!(q.anchor, QueryAnchor::Nodes { ids: vec!["MAT05".into()] });
        assert_eq!(q.max_hops, 1);
        assert_eq!(
            q.relations,
            vec![RelationKind::Defines, RelationKind::Requires, RelationKind::PartOf]
        );
        assert_eq!(q.origin, QueryOrigin::Entity);
    }

    #[test]
    fn implementation_uses_three_hops_any_relation() {
        let plan = planner()
            .plan(&intent(IntentCategory::ImplementationGuidance), &[entity("MAT01")], no_fallback())
            .unwrap();
        assert_eq!(plan[0].max_hops, 3);
        assert!(plan[0].relations.is_empty());
    }

    #[test]
    fn comparison_adds_pairwise_paths() {
        let entities = [entity("MAT04"), entity("MAT02"), entity("MAT09")];
        let plan = planner()
            .plan(&intent(IntentCategory::Comparison), &entities, no_fallback())
            .unwrap();
        assert_eq!(plan.len(), 5);
        assert!(plan[..3].iter().all(|q| q.max_hops == 1 && q.origin == QueryOrigin::Entity));
        assert_eq!(
            plan[3].anchor,
            QueryAnchor::ShortestPath { from: "MAT02".into(), to: "MAT04".into() }
        );
        assert_eq!(
            plan[4].anchor,
            QueryAnchor::ShortestPath { from: "MAT04".into(), to: "MAT09".into() }
        );
        assert_eq!(plan[4].max_hops, 4);
        assert_eq!(plan[4].id, "q4");
    }

    #[test]
    fn no_entities_gives_exactly_one_fallback_query() {
        let p = planner();
        for category in IntentCategory::ALL {
            for fallback in [
                FallbackAnchor::Labels(vec!["concept:naloxone".into()]),
                FallbackAnchor::Labels(Vec::new()),
                FallbackAnchor::Keywords(vec!["weather".into()]),
                FallbackAnchor::Keywords(Vec::new()),
            ] {
                let plan = p.plan(&intent(category), &[], fallback).unwrap();
                assert_eq!(plan.len(), 1);
                assert_eq!(plan[0].origin, QueryOrigin::Fallback);
            }
        }
    }

    #[test]
    fn label_fallback_anchors_on_nodes() {
        let plan = planner()
            .plan(
                &ExtractedIntent::general(0.2),
                &[],
                FallbackAnchor::Labels(vec!["concept:naloxone".into(), "MAT04".into()]),
            )
            .unwrap();
        assert_eq!(
            plan[0].anchor,
            QueryAnchor::Nodes { ids: vec!["concept:naloxone".into(), "MAT04".into()] }
        );
        assert_eq!(plan[0].max_hops, 2);
    }

    #[test]
    fn plan_is_deterministic_under_entity_order() {
        let p = planner();
        let a = [entity("MAT03"), entity("org:phs"), entity("MAT01")];
        let b = [entity("MAT01"), entity("MAT03"), entity("org:phs"), entity("MAT01")];
        let i = intent(IntentCategory::Comparison);
        let pa = p.plan(&i, &a, no_fallback()).unwrap();
        let pb = p.plan(&i, &b, no_fallback()).unwrap();
        assert_eq!(pa, pb);
        assert_eq!(
            serde_json::to_string(&pa).unwrap(),
            serde_json::to_string(&pb).unwrap()
        );
    }

    #[test]
    fn zero_hop_config_is_planning_error() {
        let mut cfg = Config::default().planner;
        cfg.general_hops = 0;
        let err = QueryPlanner::new(&cfg)
            .plan(&ExtractedIntent::general(0.1), &[], no_fallback())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Planning(_)));
    }

    #[test]
    fn keywords_drop_stop_words_and_duplicates() {
        assert_eq!(
            keywords("What is the best way to find naloxone, naloxone kits?"),
            vec!["best", "way", "find", "naloxone", "kits"]
        );
    }
}
