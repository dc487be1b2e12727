//! In-memory graph store.
//!
//! Holds the whole graph behind an `Arc` with a prebuilt undirected adjacency
//! list. Traversals are breadth-first, so facts come out in hop order and the
//! result is identical for identical queries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::graph::{GraphEdge, GraphError, GraphNode, KnowledgeGraph};
use crate::model::{FactCandidate, FactKey, GraphQuery, PathStep, QueryAnchor, RelationKind};

#[derive(Debug)]
struct Inner {
    graph: KnowledgeGraph,
    index: HashMap<String, usize>,
    /// node id -> edge indices touching it, sorted by (neighbour id, relation).
    adjacency: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct InMemoryGraphStore {
    inner: Arc<Inner>,
    latency: Duration,
}

/// One BFS frontier entry.
struct Visit {
    node: usize,
    path: Vec<PathStep>,
    hops: u32,
    via: Option<(RelationKind, f32)>,
}

impl InMemoryGraphStore {
    pub fn new(graph: KnowledgeGraph) -> Self {
        let index: HashMap<String, usize> =
            graph.nodes.iter().enumerate().map(|(i, n)| (n.id.clone(), i)).collect();

        let mut adjacency: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, e) in graph.edges.iter().enumerate() {
            adjacency.entry(e.from.clone()).or_default().push(i);
            if e.to != e.from {
                adjacency.entry(e.to.clone()).or_default().push(i);
            }
        }
        for (node, edges) in adjacency.iter_mut() {
            edges.sort_by(|&a, &b| {
                let ea = &graph.edges[a];
                let eb = &graph.edges[b];
                other_end(ea, node)
                    .cmp(other_end(eb, node))
                    .then(ea.relation.cmp(&eb.relation))
            });
        }

        Self { inner: Arc::new(Inner { graph, index, adjacency }), latency: Duration::ZERO }
    }

    /// Simulated round-trip latency added to every traversal.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn node_count(&self) -> usize {
        self.inner.graph.nodes.len()
    }

    pub fn node_labels(&self) -> Vec<(String, String)> {
        let mut labels: Vec<(String, String)> = self
            .inner
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.label.clone()))
            .collect();
        labels.sort();
        labels
    }

    pub async fn traverse(&self, query: &GraphQuery) -> Result<Vec<FactCandidate>, GraphError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let facts = self.run(query);
        debug!(query = %query.id, facts = facts.len(), "memory traversal done");
        Ok(facts)
    }

    fn run(&self, query: &GraphQuery) -> Vec<FactCandidate> {
        match &query.anchor {
            QueryAnchor::Nodes { ids } => {
                let starts = self.resolve(ids.iter().map(String::as_str));
                self.bfs(&starts, query)
            }
            QueryAnchor::Keywords { terms, max_anchors } => {
                let starts = self.keyword_anchors(terms, *max_anchors);
                self.bfs(&starts, query)
            }
            QueryAnchor::ShortestPath { from, to } => self.shortest_path(from, to, query),
        }
    }

    /// Known node indices, first occurrence order. Unknown ids are skipped.
    fn resolve<'a>(&self, ids: impl Iterator<Item = &'a str>) -> Vec<usize> {
        let mut seen = HashSet::new();
        ids.filter_map(|id| self.inner.index.get(id).copied())
            .filter(|i| seen.insert(*i))
            .collect()
    }

    /// Nodes whose label or id matches the most terms, ties by id.
    fn keyword_anchors(&self, terms: &[String], max_anchors: usize) -> Vec<usize> {
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let mut scored: Vec<(usize, &str, usize)> = self
            .inner
            .graph
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                let label = n.label.to_lowercase();
                let id = n.id.to_lowercase();
                let hits = terms.iter().filter(|t| label.contains(t.as_str()) || id == **t).count();
                (hits > 0).then_some((hits, n.id.as_str(), i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(max_anchors).map(|(_, _, i)| i).collect()
    }

    fn bfs(&self, starts: &[usize], query: &GraphQuery) -> Vec<FactCandidate> {
        let g = &self.inner.graph;
        let mut out = Vec::new();
        let mut visited: HashSet<usize> = starts.iter().copied().collect();
        let mut seen_edges: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<Visit> = starts
            .iter()
            .map(|&i| Visit {
                node: i,
                path: vec![PathStep::Node(g.nodes[i].id.clone())],
                hops: 0,
                via: None,
            })
            .collect();

        while let Some(visit) = queue.pop_front() {
            if out.len() >= query.result_cap {
                break;
            }
            let node = &g.nodes[visit.node];
            out.push(node_fact(node, &visit));

            if visit.hops >= query.max_hops {
                continue;
            }
            for &ei in self.edges_of(&node.id) {
                let edge = &g.edges[ei];
                if !query.allows(edge.relation) {
                    continue;
                }
                let Some(&next) = self.inner.index.get(other_end(edge, &node.id)) else {
                    continue;
                };
                let mut path = visit.path.clone();
                path.push(PathStep::Relation(edge.relation));
                path.push(PathStep::Node(g.nodes[next].id.clone()));

                if edge.text.is_some() && seen_edges.insert(ei) && out.len() < query.result_cap {
                    if let Some(fact) = self.edge_fact(edge, &path, visit.hops + 1) {
                        out.push(fact);
                    }
                }
                if visited.insert(next) {
                    queue.push_back(Visit {
                        node: next,
                        path,
                        hops: visit.hops + 1,
                        via: Some((edge.relation, edge.weight)),
                    });
                }
            }
        }

        out.truncate(query.result_cap);
        out
    }

    fn shortest_path(&self, from: &str, to: &str, query: &GraphQuery) -> Vec<FactCandidate> {
        let g = &self.inner.graph;
        let (Some(&start), Some(&goal)) = (self.inner.index.get(from), self.inner.index.get(to))
        else {
            return Vec::new();
        };

        // node -> (parent node, edge index)
        let mut parent: HashMap<usize, (usize, usize)> = HashMap::new();
        let mut depth: HashMap<usize, u32> = HashMap::from([(start, 0)]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == goal {
                break;
            }
            let d = depth[&current];
            if d >= query.max_hops {
                continue;
            }
            let id = &g.nodes[current].id;
            for &ei in self.edges_of(id) {
                let edge = &g.edges[ei];
                if !query.allows(edge.relation) {
                    continue;
                }
                let Some(&next) = self.inner.index.get(other_end(edge, id)) else {
                    continue;
                };
                if !depth.contains_key(&next) {
                    depth.insert(next, d + 1);
                    parent.insert(next, (current, ei));
                    queue.push_back(next);
                }
            }
        }
        if !depth.contains_key(&goal) {
            return Vec::new();
        }

        // Walk back from the goal, then emit root-first.
        let mut chain: Vec<(usize, Option<usize>)> = vec![(goal, None)];
        let mut cursor = goal;
        while let Some(&(prev, ei)) = parent.get(&cursor) {
            if let Some(last) = chain.last_mut() {
                last.1 = Some(ei);
            }
            chain.push((prev, None));
            cursor = prev;
        }
        chain.reverse();

        let mut out = Vec::new();
        let mut path: Vec<PathStep> = Vec::new();
        for (hops, (node_idx, incoming)) in chain.into_iter().enumerate() {
            let hops = hops as u32;
            let node = &g.nodes[node_idx];
            let via = incoming.map(|ei: usize| {
                let e = &g.edges[ei];
                path.push(PathStep::Relation(e.relation));
                (e.relation, e.weight)
            });
            path.push(PathStep::Node(node.id.clone()));
            let visit = Visit { node: node_idx, path: path.clone(), hops, via };
            if let Some(ei) = incoming {
                let edge = &g.edges[ei];
                if edge.text.is_some() {
                    if let Some(fact) = self.edge_fact(edge, &path, hops) {
                        out.push(fact);
                    }
                }
            }
            out.push(node_fact(node, &visit));
        }
        out.truncate(query.result_cap);
        out
    }

    fn edges_of(&self, id: &str) -> &[usize] {
        self.inner.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn edge_fact(&self, edge: &GraphEdge, path: &[PathStep], hops: u32) -> Option<FactCandidate> {
        let text = edge.text.clone()?;
        let url = self
            .inner
            .index
            .get(&edge.from)
            .and_then(|&i| self.inner.graph.nodes[i].url.clone());
        Some(FactCandidate {
            key: FactKey::Edge {
                from: edge.from.clone(),
                relation: edge.relation,
                to: edge.to.clone(),
            },
            source_id: edge.from.clone(),
            url,
            text,
            path: path.to_vec(),
            hops,
            relation: Some(edge.relation),
            weight: edge.weight,
        })
    }
}

fn node_fact(node: &GraphNode, visit: &Visit) -> FactCandidate {
    let (relation, weight) = match visit.via {
        Some((r, w)) => (Some(r), w),
        None => (None, 1.0),
    };
    FactCandidate {
        key: FactKey::Node { id: node.id.clone() },
        source_id: node.id.clone(),
        url: node.url.clone(),
        text: node.fact_text(),
        path: visit.path.clone(),
        hops: visit.hops,
        relation,
        weight,
    }
}

fn other_end<'a>(edge: &'a GraphEdge, node: &str) -> &'a str {
    if edge.from == node { &edge.to } else { &edge.from }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryOrigin;

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph::from_json_str(
            r#"{
            "nodes": [
                {"id": "MAT01", "label": "MAT Standard 1", "kind": "standard", "text": "Same day access"},
                {"id": "MAT02", "label": "MAT Standard 2", "kind": "standard", "text": "Choice of medication"},
                {"id": "MAT03", "label": "MAT Standard 3", "kind": "standard", "text": "Assertive outreach"},
                {"id": "concept:ost", "label": "Opioid substitution therapy", "kind": "concept"},
                {"id": "org:phs", "label": "Public Health Scotland", "kind": "organization"}
            ],
            "edges": [
                {"from": "MAT01", "to": "concept:ost", "relation": "requires", "weight": 0.9,
                 "text": "MAT 1 requires OST to be offered on the day of presentation"},
                {"from": "MAT02", "to": "concept:ost", "relation": "requires"},
                {"from": "MAT03", "to": "MAT02", "relation": "related_to", "weight": 0.5},
                {"from": "org:phs", "to": "MAT01", "relation": "supports"}
            ]
        }"#,
        )
        .unwrap()
    }

    fn query(anchor: QueryAnchor, hops: u32, relations: Vec<RelationKind>) -> GraphQuery {
        GraphQuery {
            id: "q0".into(),
            origin: QueryOrigin::Entity,
            anchor,
            relations,
            max_hops: hops,
            result_cap: 25,
        }
    }

    fn ids(facts: &[FactCandidate]) -> Vec<String> {
        facts
            .iter()
            .map(|f| match &f.key {
                FactKey::Node { id } => id.clone(),
                FactKey::Edge { from, to, .. } => format!("{from}->{to}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn one_hop_from_anchor() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(QueryAnchor::Nodes { ids: vec!["MAT01".into()] }, 1, vec![]);
        let facts = store.traverse(&q).await.unwrap();
        assert_eq!(ids(&facts), vec!["MAT01", "MAT01->concept:ost", "concept:ost", "org:phs"]);
        assert_eq!(facts[0].hops, 0);
        assert_eq!(facts[0].relation, None);
        assert_eq!(facts[2].hops, 1);
        assert_eq!(facts[2].relation, Some(RelationKind::Requires));
        assert_eq!(facts[2].weight, 0.9);
    }

    #[tokio::test]
    async fn edge_fact_cites_its_from_node() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(QueryAnchor::Nodes { ids: vec!["concept:ost".into()] }, 1, vec![]);
        let facts = store.traverse(&q).await.unwrap();
        let edge = facts.iter().find(|f| matches!(f.key, FactKey::Edge { .. })).unwrap();
        assert_eq!(ids(std::slice::from_ref(edge)), vec!["MAT01->concept:ost"]);
        assert_eq!(edge.source_id, "MAT01");
        let node = facts.iter().find(|f| f.key == FactKey::Node { id: "MAT01".into() }).unwrap();
        assert_eq!(node.source_id, edge.source_id);
    }

    #[tokio::test]
    async fn relation_filter_limits_expansion() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(
            QueryAnchor::Nodes { ids: vec!["MAT01".into()] },
            3,
            vec![RelationKind::Supports],
        );
        let facts = store.traverse(&q).await.unwrap();
        assert_eq!(ids(&facts), vec!["MAT01", "org:phs"]);
    }

    #[tokio::test]
    async fn result_cap_is_respected() {
        let store = InMemoryGraphStore::new(graph());
        let mut q = query(QueryAnchor::Nodes { ids: vec!["MAT01".into()] }, 4, vec![]);
        q.result_cap = 2;
        assert_eq!(store.traverse(&q).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_anchor_yields_nothing() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(QueryAnchor::Nodes { ids: vec!["MAT09".into()] }, 2, vec![]);
        assert!(store.traverse(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shortest_path_between_standards() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(
            QueryAnchor::ShortestPath { from: "MAT01".into(), to: "MAT02".into() },
            4,
            vec![],
        );
        let facts = store.traverse(&q).await.unwrap();
        assert_eq!(ids(&facts), vec!["MAT01", "MAT01->concept:ost", "concept:ost", "MAT02"]);
        let last = facts.last().unwrap();
        assert_eq!(last.hops, 2);
        assert_eq!(
            last.path,
            vec![
                PathStep::Node("MAT01".into()),
                PathStep::Relation(RelationKind::Requires),
                PathStep::Node("concept:ost".into()),
                PathStep::Relation(RelationKind::Requires),
                PathStep::Node("MAT02".into()),
            ]
        );
    }

    #[tokio::test]
    async fn shortest_path_respects_hop_limit() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(
            QueryAnchor::ShortestPath { from: "MAT01".into(), to: "MAT03".into() },
            2,
            vec![],
        );
        assert!(store.traverse(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_anchor_matches_labels() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(
            QueryAnchor::Keywords { terms: vec!["opioid".into(), "therapy".into()], max_anchors: 1 },
            0,
            vec![],
        );
        let facts = store.traverse(&q).await.unwrap();
        assert_eq!(ids(&facts), vec!["concept:ost"]);
    }

    #[tokio::test]
    async fn repeated_traversal_is_identical() {
        let store = InMemoryGraphStore::new(graph());
        let q = query(QueryAnchor::Nodes { ids: vec!["concept:ost".into()] }, 2, vec![]);
        let a = store.traverse(&q).await.unwrap();
        let b = store.traverse(&q).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_simulated() {
        let store = InMemoryGraphStore::new(graph()).with_latency(Duration::from_millis(500));
        let q = query(QueryAnchor::Nodes { ids: vec!["MAT01".into()] }, 0, vec![]);
        let started = tokio::time::Instant::now();
        store.traverse(&q).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
