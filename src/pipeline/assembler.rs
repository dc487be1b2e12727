//! Token-bounded context assembly.

use tracing::debug;

use crate::config::ContextConfig;
use crate::model::{AssembledContext, ContextEntry, RankedFact, render_fact};
use crate::pipeline::ranker::rank_order;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_facts: usize,
    default_budget: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self { max_facts: config.max_facts, default_budget: config.token_budget }
    }

    pub fn default_budget(&self) -> usize {
        self.default_budget
    }

    /// Greedy selection in rank order.
    ///
    /// Input is stably sorted by [`rank_order`] first, so already-ranked
    /// facts keep their order. A fact either fits whole or is skipped; later,
    /// smaller facts may still fit after a skip. Selection stops at
    /// `max_facts` and `total_tokens` never exceeds `budget`.
    pub fn assemble(&self, mut ranked: Vec<RankedFact>, budget: usize) -> AssembledContext {
        ranked.sort_by(rank_order);
        let mut context = AssembledContext::empty(budget);

        for fact in ranked {
            if context.entries.len() >= self.max_facts {
                context.skipped += 1;
                continue;
            }
            let tokens = estimate_tokens(&render_fact(&fact.candidate));
            if context.total_tokens + tokens > budget {
                context.skipped += 1;
                continue;
            }
            context.total_tokens += tokens;
            context.entries.push(ContextEntry { fact, tokens });
        }

        debug!(
            facts = context.entries.len(),
            skipped = context.skipped,
            tokens = context.total_tokens,
            budget,
            "context assembled"
        );
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactCandidate, FactKey, Score};

    fn ranked(id: &str, text: &str, composite: f32) -> RankedFact {
        RankedFact {
            candidate: FactCandidate {
                key: FactKey::Node { id: id.into() },
                source_id: id.into(),
                url: None,
                text: text.into(),
                path: vec![],
                hops: 0,
                relation: None,
                weight: 1.0,
            },
            score: Score { semantic: 0.0, structural: 0.0, composite },
        }
    }

    fn assembler(max_facts: usize) -> ContextAssembler {
        ContextAssembler::new(&ContextConfig { token_budget: 100, max_facts })
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn everything_fits_in_order() {
        let facts = vec![ranked("a", "one", 0.9), ranked("b", "two", 0.5), ranked("c", "three", 0.1)];
        let ctx = assembler(10).assemble(facts, 100);
        let ids: Vec<&str> = ctx.entries.iter().map(|e| e.fact.candidate.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(ctx.skipped, 0);
        assert_eq!(ctx.total_tokens, ctx.entries.iter().map(|e| e.tokens).sum::<usize>());
    }

    #[test]
    fn oversized_fact_is_skipped_not_truncated() {
        // "[a] " + 40 chars = 44 chars = 11 tokens; "[b] xx" = 6 chars = 2 tokens
        let facts = vec![ranked("a", &"x".repeat(40), 0.9), ranked("b", "xx", 0.5)];
        let ctx = assembler(10).assemble(facts, 5);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.entries[0].fact.candidate.source_id, "b");
        assert_eq!(ctx.entries[0].fact.candidate.text, "xx");
        assert_eq!(ctx.skipped, 1);
        assert!(ctx.total_tokens <= 5);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let facts: Vec<RankedFact> = (0..50)
            .map(|i| ranked(&format!("f{i}"), &"word ".repeat(i % 7 + 1), 1.0 - i as f32 / 100.0))
            .collect();
        for budget in [0, 1, 3, 7, 20, 55, 200] {
            let ctx = assembler(50).assemble(facts.clone(), budget);
            assert!(ctx.total_tokens <= budget, "budget {budget}");
            assert_eq!(ctx.len() + ctx.skipped, facts.len());
        }
    }

    #[test]
    fn non_empty_when_any_fact_fits() {
        let ctx = assembler(10).assemble(vec![ranked("MAT05", "x", 1.0)], 1500);
        assert!(!ctx.is_empty());
    }

    #[test]
    fn no_candidates_is_empty_context() {
        let ctx = assembler(10).assemble(Vec::new(), 1500);
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_tokens, 0);
        assert_eq!(ctx.budget, 1500);
    }

    #[test]
    fn max_facts_caps_selection() {
        let facts: Vec<RankedFact> = (0..5).map(|i| ranked(&format!("f{i}"), "t", 1.0)).collect();
        let ctx = assembler(2).assemble(facts, 1000);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.skipped, 3);
    }

    #[test]
    fn unranked_input_is_ordered_first() {
        let facts = vec![ranked("low", "t", 0.1), ranked("high", "t", 0.9)];
        let ctx = assembler(1).assemble(facts, 1000);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.entries[0].fact.candidate.source_id, "high");
        assert_eq!(ctx.skipped, 1);
    }

    #[test]
    fn shortened_keeps_top_entries() {
        let facts: Vec<RankedFact> = (0..5).map(|i| ranked(&format!("f{i}"), "text", 1.0)).collect();
        let ctx = assembler(10).assemble(facts, 1000);
        let short = ctx.shortened(3);
        assert_eq!(short.len(), 3);
        assert_eq!(short.entries[0].fact.candidate.source_id, "f0");
        assert_eq!(short.skipped, 2);
        assert!(short.total_tokens < ctx.total_tokens);
    }
}
