//! Neo4j graph store over the HTTP transactional endpoint.
//!
//! Each [`GraphQuery`] becomes one Cypher statement. Rows come back as
//! `[node_ids, rel_types, weights, id, label, text, url]` and are mapped to
//! node facts. Relationship types are matched case-insensitively against
//! [`RelationKind`]; unknown types read as `related_to`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, trace};

use crate::graph::GraphError;
use crate::model::{FactCandidate, FactKey, GraphQuery, PathStep, QueryAnchor, RelationKind};

#[derive(Debug, Clone)]
pub struct Neo4jStore {
    client: Client,
    /// `{url}/db/{database}/tx/commit`
    endpoint: String,
    user: String,
    password: Option<String>,
}

impl Neo4jStore {
    pub fn new(
        url: &str,
        database: &str,
        user: String,
        password: Option<String>,
    ) -> Result<Self, GraphError> {
        let client = Client::builder()
            .build()
            .map_err(|e| GraphError::Request(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/db/{database}/tx/commit", url.trim_end_matches('/'));
        Ok(Self { client, endpoint, user, password })
    }

    pub async fn traverse(&self, query: &GraphQuery) -> Result<Vec<FactCandidate>, GraphError> {
        let (statement, parameters) = cypher_for(query);
        let rows = self.run(statement, parameters).await?;
        let mut facts: Vec<FactCandidate> = rows.iter().filter_map(|r| row_to_fact(r)).collect();
        facts.truncate(query.result_cap);
        debug!(query = %query.id, facts = facts.len(), "neo4j traversal done");
        Ok(facts)
    }

    pub async fn node_labels(&self) -> Result<Vec<(String, String)>, GraphError> {
        let rows = self
            .run(
                "MATCH (n) WHERE n.id IS NOT NULL \
                 RETURN n.id, coalesce(n.label, n.id) ORDER BY n.id"
                    .to_string(),
                json!({}),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((row.first()?.as_str()?.to_string(), row.get(1)?.as_str()?.to_string())))
            .collect())
    }

    async fn run(&self, statement: String, parameters: Value) -> Result<Vec<Vec<Value>>, GraphError> {
        let payload = TxRequest { statements: vec![Statement { statement, parameters }] };
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "cypher request");
        }

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(password) = &self.password {
            req = req.basic_auth(&self.user, Some(password));
        }
        let response = req.send().await.map_err(|e| {
            error!(url = %self.endpoint, error = %e, "neo4j HTTP request failed (transport)");
            GraphError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "neo4j returned HTTP error");
            return Err(GraphError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Request(format!("failed to parse response body: {e}")))?;
        if let Some(err) = parsed.errors.first() {
            return Err(GraphError::Request(format!("{}: {}", err.code, err.message)));
        }
        Ok(parsed
            .results
            .into_iter()
            .flat_map(|r| r.data)
            .map(|d| d.row)
            .collect())
    }
}

const RETURN_PATH: &str = "RETURN [x IN nodes(p) | x.id] AS node_ids, \
     [r IN relationships(p) | type(r)] AS rel_types, \
     [r IN relationships(p) | coalesce(r.weight, 1.0)] AS weights, \
     n.id AS id, coalesce(n.label, n.id) AS label, coalesce(n.text, '') AS text, n.url AS url";

/// Cypher statement and parameters for one query.
///
/// Hop limits are inlined because Cypher does not accept parameters in
/// variable-length patterns; they are integers from the planner.
fn cypher_for(query: &GraphQuery) -> (String, Value) {
    let types: Vec<String> = query.relations.iter().map(RelationKind::cypher_type).collect();
    let hops = query.max_hops;

    let expand = format!(
        "MATCH p = (s)-[rels*0..{hops}]-(n) \
         WHERE size($types) = 0 OR all(r IN rels WHERE type(r) IN $types) \
         WITH n, p ORDER BY length(p) ASC \
         WITH n, collect(p)[0] AS p \
         {RETURN_PATH} \
         ORDER BY size(rel_types) ASC, id ASC LIMIT $cap"
    );

    match &query.anchor {
        QueryAnchor::Nodes { ids } => (
            format!("MATCH (s) WHERE s.id IN $ids {expand}"),
            json!({ "ids": ids, "types": types, "cap": query.result_cap }),
        ),
        QueryAnchor::Keywords { terms, max_anchors } => (
            format!(
                "MATCH (s) WHERE any(t IN $terms WHERE toLower(coalesce(s.label, s.id)) CONTAINS t) \
                 WITH s ORDER BY s.id LIMIT $anchors {expand}"
            ),
            json!({
                "terms": terms.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>(),
                "anchors": max_anchors,
                "types": types,
                "cap": query.result_cap,
            }),
        ),
        QueryAnchor::ShortestPath { from, to } => (
            format!(
                "MATCH (a {{id: $from}}), (b {{id: $to}}) \
                 MATCH sp = shortestPath((a)-[rels*..{hops}]-(b)) \
                 WHERE size($types) = 0 OR all(r IN rels WHERE type(r) IN $types) \
                 UNWIND range(0, length(sp)) AS i \
                 WITH nodes(sp)[i] AS n, \
                      [x IN nodes(sp)[0..i + 1] | x.id] AS node_ids, \
                      [r IN relationships(sp)[0..i] | type(r)] AS rel_types, \
                      [r IN relationships(sp)[0..i] | coalesce(r.weight, 1.0)] AS weights \
                 RETURN node_ids, rel_types, weights, n.id AS id, coalesce(n.label, n.id) AS label, \
                        coalesce(n.text, '') AS text, n.url AS url \
                 ORDER BY size(rel_types) ASC LIMIT $cap"
            ),
            json!({ "from": from, "to": to, "types": types, "cap": query.result_cap }),
        ),
    }
}

/// Map one result row to a node fact. Malformed rows are dropped.
fn row_to_fact(row: &[Value]) -> Option<FactCandidate> {
    let node_ids: Vec<&str> = row.first()?.as_array()?.iter().filter_map(Value::as_str).collect();
    let rel_types: Vec<RelationKind> = row
        .get(1)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(|t| t.parse().unwrap_or(RelationKind::RelatedTo))
        .collect();
    let weights: Vec<f32> = row.get(2)?.as_array()?.iter().filter_map(Value::as_f64).map(|w| w as f32).collect();
    let id = row.get(3)?.as_str()?.to_string();
    let label = row.get(4)?.as_str()?;
    let text = row.get(5).and_then(Value::as_str).unwrap_or_default();
    let url = row.get(6).and_then(Value::as_str).map(str::to_string);

    let mut path = Vec::with_capacity(node_ids.len() * 2);
    for (i, node) in node_ids.iter().enumerate() {
        if i > 0 {
            path.push(PathStep::Relation(*rel_types.get(i - 1)?));
        }
        path.push(PathStep::Node((*node).to_string()));
    }

    Some(FactCandidate {
        key: FactKey::Node { id: id.clone() },
        source_id: id,
        url,
        text: if text.is_empty() { label.to_string() } else { format!("{label}: {text}") },
        path,
        hops: rel_types.len() as u32,
        relation: rel_types.last().copied(),
        weight: weights.last().copied().unwrap_or(1.0).clamp(f32::EPSILON, 1.0),
    })
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TxRequest {
    statements: Vec<Statement>,
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryOrigin;

    fn query(anchor: QueryAnchor) -> GraphQuery {
        GraphQuery {
            id: "q0".into(),
            origin: QueryOrigin::Entity,
            anchor,
            relations: vec![RelationKind::Requires, RelationKind::PartOf],
            max_hops: 3,
            result_cap: 25,
        }
    }

    #[test]
    fn node_query_inlines_hops_and_binds_types() {
        let (cypher, params) = cypher_for(&query(QueryAnchor::Nodes { ids: vec!["MAT05".into()] }));
        assert!(cypher.contains("[rels*0..3]"));
        assert!(cypher.starts_with("MATCH (s) WHERE s.id IN $ids"));
        assert_eq!(params["types"], json!(["REQUIRES", "PART_OF"]));
        assert_eq!(params["cap"], json!(25));
    }

    #[test]
    fn shortest_path_query_binds_endpoints() {
        let (cypher, params) = cypher_for(&query(QueryAnchor::ShortestPath {
            from: "MAT02".into(),
            to: "MAT05".into(),
        }));
        assert!(cypher.contains("shortestPath((a)-[rels*..3]-(b))"));
        assert_eq!(params["from"], json!("MAT02"));
        assert_eq!(params["to"], json!("MAT05"));
    }

    #[test]
    fn row_maps_to_fact_with_path() {
        let row: Vec<Value> = vec![
            json!(["MAT05", "concept:ost"]),
            json!(["REQUIRES"]),
            json!([0.8]),
            json!("concept:ost"),
            json!("Opioid substitution therapy"),
            json!(""),
            Value::Null,
        ];
        let fact = row_to_fact(&row).unwrap();
        assert_eq!(fact.hops, 1);
        assert_eq!(fact.relation, Some(RelationKind::Requires));
        assert!((fact.weight - 0.8).abs() < 1e-6);
        assert_eq!(fact.text, "Opioid substitution therapy");
        assert_eq!(fact.path.len(), 3);
    }

    #[test]
    fn malformed_row_dropped() {
        let row: Vec<Value> = vec![json!("not a list")];
        assert!(row_to_fact(&row).is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_request_error() {
        let store = Neo4jStore::new("http://127.0.0.1:9", "neo4j", "neo4j".into(), None).unwrap();
        let err = store
            .traverse(&query(QueryAnchor::Nodes { ids: vec!["MAT01".into()] }))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Request(_)));
    }
}
