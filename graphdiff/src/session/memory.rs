//! In-memory property graph that answers [`GraphQuery`] directly.
//!
//! Used by the test suite and for dry runs of the comparison pipeline. Faults
//! can be injected to exercise the degraded paths: combined counts rejected,
//! one type failing every query, or the whole endpoint unreachable.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use super::GraphSession;
use crate::{
    errors::SessionError,
    query::{
        COLUMN_COUNT, COLUMN_KEY, COLUMN_LABEL, COLUMN_OK, COLUMN_PROPS, COLUMN_TYPE, GraphQuery, PropertyMap, Row,
        combined_count_column, key_string,
    },
};

#[derive(Debug, Clone)]
struct MemoryNode {
    labels: Vec<String>,
    properties: PropertyMap,
}

#[derive(Debug, Clone)]
struct MemoryRelationship {
    rel_type: String,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    reject_combined_counts: bool,
    failing_types: BTreeSet<String>,
    fail_listing: bool,
    unreachable: bool,
}

/// Shared record of every query a [`MemoryGraph`] received.
#[derive(Debug, Clone, Default)]
pub struct QueryLog {
    entries: Arc<Mutex<Vec<GraphQuery>>>,
}

impl QueryLog {
    fn push(&self, query: &GraphQuery) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(query.clone());
        }
    }

    pub fn queries(&self) -> Vec<GraphQuery> {
        self.entries.lock().map(|entries| entries.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of logged queries matching `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&GraphQuery) -> bool) -> usize {
        self.queries().iter().filter(|query| predicate(query)).count()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: Vec<MemoryNode>,
    relationships: Vec<MemoryRelationship>,
    faults: Faults,
    log: QueryLog,
}

/// A clone holds the same data and faults but records into its own query log.
impl Clone for MemoryGraph {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            relationships: self.relationships.clone(),
            faults: self.faults.clone(),
            log: QueryLog::default(),
        }
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with a single label. `properties` must be a JSON object.
    pub fn with_node(mut self, label: &str, properties: Value) -> Self {
        self.add_node(&[label], properties);
        self
    }

    pub fn with_relationship(mut self, rel_type: &str) -> Self {
        self.add_relationship(rel_type);
        self
    }

    pub fn add_node(&mut self, labels: &[&str], properties: Value) {
        let properties = match properties {
            Value::Object(map) => map,
            Value::Null => PropertyMap::new(),
            other => {
                let mut map = PropertyMap::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.nodes.push(MemoryNode {
            labels: labels.iter().map(|label| label.to_string()).collect(),
            properties,
        });
    }

    pub fn add_relationship(&mut self, rel_type: &str) {
        self.relationships.push(MemoryRelationship {
            rel_type: rel_type.to_string(),
        });
    }

    /// Reject every combined count query, forcing the per-type fallback.
    pub fn reject_combined_counts(mut self) -> Self {
        self.faults.reject_combined_counts = true;
        self
    }

    /// Fail every query that touches `type_name`.
    pub fn fail_type(mut self, type_name: &str) -> Self {
        self.faults.failing_types.insert(type_name.to_string());
        self
    }

    /// Fail label and relationship-type listing.
    pub fn fail_schema_listing(mut self) -> Self {
        self.faults.fail_listing = true;
        self
    }

    /// Fail every query with a connection error.
    pub fn unreachable(mut self) -> Self {
        self.faults.unreachable = true;
        self
    }

    pub fn query_log(&self) -> QueryLog {
        self.log.clone()
    }

    fn nodes_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a MemoryNode> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.labels.iter().any(|candidate| candidate == label))
    }

    fn node_count(&self, label: &str) -> u64 {
        self.nodes_with_label(label).count() as u64
    }

    fn relationship_count(&self, rel_type: &str) -> u64 {
        self.relationships
            .iter()
            .filter(|relationship| relationship.rel_type == rel_type)
            .count() as u64
    }

    fn check_faults(&self, query: &GraphQuery) -> Result<(), SessionError> {
        if self.faults.unreachable {
            return Err(SessionError::connection("memory graph marked unreachable"));
        }

        let listing = matches!(query, GraphQuery::ListLabels | GraphQuery::ListRelationshipTypes);
        if listing && self.faults.fail_listing {
            return Err(SessionError::query("schema procedures unavailable"));
        }

        let touched: Vec<&str> = match query {
            GraphQuery::CountNodesCombined { labels } => labels.iter().map(String::as_str).collect(),
            GraphQuery::CountRelationshipsCombined { rel_types } => rel_types.iter().map(String::as_str).collect(),
            other => other.subject().into_iter().collect(),
        };

        let combined = matches!(
            query,
            GraphQuery::CountNodesCombined { .. } | GraphQuery::CountRelationshipsCombined { .. }
        );
        if combined && self.faults.reject_combined_counts {
            return Err(SessionError::query("combined count query rejected"));
        }

        if let Some(failing) = touched.iter().find(|name| self.faults.failing_types.contains(**name)) {
            return Err(SessionError::query(format!("query on '{failing}' failed")));
        }

        Ok(())
    }

    fn answer(&self, query: &GraphQuery) -> Vec<Row> {
        match query {
            GraphQuery::Ping => vec![row(json!({ COLUMN_OK: 1 }))],
            GraphQuery::ListLabels => {
                let labels: BTreeSet<&str> = self
                    .nodes
                    .iter()
                    .flat_map(|node| node.labels.iter().map(String::as_str))
                    .collect();
                labels
                    .into_iter()
                    .map(|label| row(json!({ COLUMN_LABEL: label })))
                    .collect()
            }
            GraphQuery::ListRelationshipTypes => {
                let types: BTreeSet<&str> = self
                    .relationships
                    .iter()
                    .map(|relationship| relationship.rel_type.as_str())
                    .collect();
                types
                    .into_iter()
                    .map(|rel_type| row(json!({ COLUMN_TYPE: rel_type })))
                    .collect()
            }
            GraphQuery::CountNodes { label } => vec![row(json!({ COLUMN_COUNT: self.node_count(label) }))],
            GraphQuery::CountRelationships { rel_type } => {
                vec![row(json!({ COLUMN_COUNT: self.relationship_count(rel_type) }))]
            }
            GraphQuery::CountNodesCombined { labels } => {
                let mut counts = Row::new();
                for (i, label) in labels.iter().enumerate() {
                    counts.insert(combined_count_column(i), json!(self.node_count(label)));
                }
                vec![counts]
            }
            GraphQuery::CountRelationshipsCombined { rel_types } => {
                let mut counts = Row::new();
                for (i, rel_type) in rel_types.iter().enumerate() {
                    counts.insert(combined_count_column(i), json!(self.relationship_count(rel_type)));
                }
                vec![counts]
            }
            GraphQuery::KeyValues { label, property, limit } => {
                let keys: BTreeSet<String> = self
                    .nodes_with_label(label)
                    .filter_map(|node| node.properties.get(property).and_then(key_string))
                    .collect();
                keys.into_iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|key| row(json!({ COLUMN_KEY: key })))
                    .collect()
            }
            GraphQuery::FetchByKeys { label, property, keys } => {
                let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
                self.nodes_with_label(label)
                    .filter_map(|node| {
                        let key = node.properties.get(property).and_then(key_string)?;
                        wanted.contains(key.as_str()).then(|| {
                            row(json!({
                                COLUMN_KEY: key,
                                COLUMN_PROPS: Value::Object(node.properties.clone()),
                            }))
                        })
                    })
                    .collect()
            }
        }
    }
}

impl GraphSession for MemoryGraph {
    async fn run_query(&mut self, query: &GraphQuery) -> Result<Vec<Row>, SessionError> {
        self.log.push(query);
        self.check_faults(query)?;
        Ok(self.answer(query))
    }

    async fn close(self) {}
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> MemoryGraph {
        MemoryGraph::new()
            .with_node("Paper", json!({ "id": "p1", "title": "X" }))
            .with_node("Paper", json!({ "id": "p2", "title": "Y" }))
            .with_node("Task", json!({ "id": 7 }))
            .with_relationship("ADDRESSES_TASK")
    }

    #[tokio::test]
    async fn lists_labels_sorted() {
        let mut graph = sample_graph();
        let rows = graph.run_query(&GraphQuery::ListLabels).await.unwrap();
        let labels: Vec<&str> = rows.iter().filter_map(|r| r[COLUMN_LABEL].as_str()).collect();
        assert_eq!(labels, vec!["Paper", "Task"]);
    }

    #[tokio::test]
    async fn clone_starts_a_fresh_query_log() {
        let mut original = sample_graph();
        let mut copy = original.clone();
        let original_log = original.query_log();
        let copy_log = copy.query_log();

        copy.run_query(&GraphQuery::Ping).await.unwrap();
        assert!(original_log.is_empty());
        assert_eq!(copy_log.len(), 1);

        original.run_query(&GraphQuery::ListLabels).await.unwrap();
        assert_eq!(original_log.len(), 1);
        assert_eq!(copy_log.len(), 1);
    }

    #[tokio::test]
    async fn key_values_are_stringified_and_limited() {
        let mut graph = sample_graph();
        let rows = graph
            .run_query(&GraphQuery::KeyValues {
                label: "Paper".to_string(),
                property: "id".to_string(),
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][COLUMN_KEY], json!("p1"));

        let rows = graph
            .run_query(&GraphQuery::KeyValues {
                label: "Task".to_string(),
                property: "id".to_string(),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(rows[0][COLUMN_KEY], json!("7"));
    }

    #[tokio::test]
    async fn injected_faults_are_classified() {
        let mut graph = sample_graph().fail_type("Task");
        let err = graph
            .run_query(&GraphQuery::CountNodes {
                label: "Task".to_string(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_fatal());

        let mut graph = sample_graph().unreachable();
        let err = graph.run_query(&GraphQuery::Ping).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn log_records_failed_queries_too() {
        let mut graph = sample_graph().reject_combined_counts();
        let log = graph.query_log();
        let _ = graph
            .run_query(&GraphQuery::CountNodesCombined {
                labels: vec!["Paper".to_string()],
            })
            .await;
        assert_eq!(log.len(), 1);
    }
}
