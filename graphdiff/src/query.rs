//! Typed graph queries and their Cypher rendering.
//!
//! The comparison core never builds query text itself. It describes what it
//! needs as a [`GraphQuery`] and hands it to a [`GraphSession`](crate::session::GraphSession);
//! network adapters render it with [`GraphQuery::to_cypher`], in-memory
//! adapters interpret it directly.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::SessionError;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Full property map of one entity.
pub type PropertyMap = Map<String, Value>;

/// The two disjoint universes of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Relationship,
}

impl EntityKind {
    pub fn plural(self) -> &'static str {
        match self {
            Self::Node => "node labels",
            Self::Relationship => "relationship types",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphQuery {
    /// Connectivity check.
    Ping,
    ListLabels,
    ListRelationshipTypes,
    CountNodes { label: String },
    CountRelationships { rel_type: String },
    /// One row with a `c{i}` column per label, in input order.
    CountNodesCombined { labels: Vec<String> },
    /// One row with a `c{i}` column per type, in input order.
    CountRelationshipsCombined { rel_types: Vec<String> },
    /// Distinct stringified values of `property`, ascending, at most `limit`.
    KeyValues {
        label: String,
        property: String,
        limit: Option<usize>,
    },
    /// `key` + `props` rows for every node whose stringified `property` is in `keys`.
    FetchByKeys {
        label: String,
        property: String,
        keys: Vec<String>,
    },
}

/// Query text plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherStatement {
    pub text: String,
    pub params: Vec<(String, Value)>,
}

impl CypherStatement {
    fn new(text: String) -> Self {
        Self { text, params: Vec::new() }
    }

    fn param(mut self, name: &str, value: Value) -> Self {
        self.params.push((name.to_string(), value));
        self
    }
}

pub const COLUMN_OK: &str = "ok";
pub const COLUMN_LABEL: &str = "label";
pub const COLUMN_TYPE: &str = "type";
pub const COLUMN_COUNT: &str = "count";
pub const COLUMN_KEY: &str = "key";
pub const COLUMN_PROPS: &str = "props";

/// Column holding the `index`-th count of a combined count query.
pub fn combined_count_column(index: usize) -> String {
    format!("c{index}")
}

impl GraphQuery {
    /// Column names every row of this query carries.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Ping => vec![COLUMN_OK.to_string()],
            Self::ListLabels => vec![COLUMN_LABEL.to_string()],
            Self::ListRelationshipTypes => vec![COLUMN_TYPE.to_string()],
            Self::CountNodes { .. } | Self::CountRelationships { .. } => vec![COLUMN_COUNT.to_string()],
            Self::CountNodesCombined { labels } => CypherStatement::new(combined_count(labels, "n", |i, label| {
                format!("OPTIONAL MATCH (n{i}:{})", quote_identifier(label))
            })),
            Self::CountRelationshipsCombined { rel_types } => {
                CypherStatement::new(combined_count(rel_types, "r", |i, rel_type| {
                    format!("OPTIONAL MATCH ()-[r{i}:{}]->()", quote_identifier(rel_type))
                }))
            }
            Self::KeyValues { label, property, limit } => {
                let mut text = format!(
                    "MATCH (n:{label}) WHERE n.{prop} IS NOT NULL \
                     RETURN DISTINCT toString(n.{prop}) AS {COLUMN_KEY} ORDER BY {COLUMN_KEY}",
                    label = quote_identifier(label),
                    prop = quote_identifier(property),
                );
                match limit {
                    Some(limit) => {
                        text.push_str(" LIMIT $limit");
                        CypherStatement::new(text).param("limit", Value::from(*limit as u64))
                    }
                    None => CypherStatement::new(text),
                }
            }
            Self::FetchByKeys { label, property, keys } => CypherStatement::new(format!(
                "MATCH (n:{label}) WHERE toString(n.{prop}) IN $keys \
                 RETURN toString(n.{prop}) AS {COLUMN_KEY}, properties(n) AS {COLUMN_PROPS}",
                label = quote_identifier(label),
                prop = quote_identifier(property),
            ))
            .param("keys", Value::from(keys.clone())),
        }
    }
}

/// Chain of `OPTIONAL MATCH .. WITH count(..)` clauses carrying earlier counts forward.
fn combined_count(types: &[String], var: &str, pattern: impl Fn(usize, &str) -> String) -> String {
    let mut clauses = Vec::with_capacity(types.len() + 1);
    for (i, name) in types.iter().enumerate() {
        let carried: Vec<String> = (0..i).map(combined_count_column).collect();
        let mut with = carried.join(", ");
        if !with.is_empty() {
            with.push_str(", ");
        }
        clauses.push(format!(
            "{} WITH {with}count({var}{i}) AS {}",
            pattern(i, name),
            combined_count_column(i)
        ));
    }
    let returned: Vec<String> = (0..types.len()).map(combined_count_column).collect();
    clauses.push(format!("RETURN {}", returned.join(", ")));
    clauses.join(" ")
}

/// Backtick-quote a label, type or property name.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Stringify a property value the way `toString()` does for keys.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn row_str<'a>(row: &'a Row, column: &str) -> Result<&'a str, SessionError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::MissingColumn {
            column: column.to_string(),
        })
}

pub fn row_count(row: &Row, column: &str) -> Result<u64, SessionError> {
    row.get(column)
        .and_then(|value| value.as_u64().or_else(|| value.as_i64().map(|n| n.max(0) as u64)))
        .ok_or_else(|| SessionError::MissingColumn {
            column: column.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quotes_identifiers_with_backticks() {
        assert_eq!(quote_identifier("Paper"), "`Paper`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn combined_node_count_carries_previous_columns() {
        let query = GraphQuery::CountNodesCombined {
            labels: vec!["Paper".to_string(), "Task".to_string()],
        };
        let stmt = query.to_cypher();
        assert_eq!(
            stmt.text,
            "OPTIONAL MATCH (n0:`Paper`) WITH count(n0) AS c0 \
             OPTIONAL MATCH (n1:`Task`) WITH c0, count(n1) AS c1 RETURN c0, c1"
        );
        assert_eq!(query.columns(), vec!["c0", "c1"]);
    }

    #[test]
    fn combined_relationship_count_uses_directed_patterns() {
        let stmt = GraphQuery::CountRelationshipsCombined {
            rel_types: vec!["AUTHORED".to_string()],
        }
        .to_cypher();
        assert_eq!(
            stmt.text,
            "OPTIONAL MATCH ()-[r0:`AUTHORED`]->() WITH count(r0) AS c0 RETURN c0"
        );
    }

    #[test]
    fn relationship_counts_are_directed() {
        let stmt = GraphQuery::CountRelationships {
            rel_type: "HAS_CODE".to_string(),
        }
        .to_cypher();
        assert!(stmt.text.contains("()-[r:`HAS_CODE`]->()"));
    }

    #[test]
    fn key_values_binds_limit_only_when_bounded() {
        let bounded = GraphQuery::KeyValues {
            label: "Paper".to_string(),
            property: "arxiv_id".to_string(),
            limit: Some(10),
        }
        .to_cypher();
        assert!(bounded.text.ends_with("LIMIT $limit"));
        assert_eq!(bounded.params, vec![("limit".to_string(), json!(10))]);

        let unbounded = GraphQuery::KeyValues {
            label: "Paper".to_string(),
            property: "arxiv_id".to_string(),
            limit: None,
        }
        .to_cypher();
        assert!(!unbounded.text.contains("LIMIT"));
        assert!(unbounded.params.is_empty());
    }

    #[test]
    fn fetch_matches_by_set_membership() {
        let stmt = GraphQuery::FetchByKeys {
            label: "Dataset".to_string(),
            property: "id".to_string(),
            keys: vec!["d1".to_string(), "d2".to_string()],
        }
        .to_cypher();
        assert!(stmt.text.contains("IN $keys"));
        assert_eq!(stmt.params, vec![("keys".to_string(), json!(["d1", "d2"]))]);
    }

    #[test]
    fn key_string_matches_to_string_semantics() {
        assert_eq!(key_string(&json!("p1")), Some("p1".to_string()));
        assert_eq!(key_string(&json!(42)), Some("42".to_string()));
        assert_eq!(key_string(&json!(true)), Some("true".to_string()));
        assert_eq!(key_string(&Value::Null), None);
    }

    #[test]
    fn row_count_reports_missing_column() {
        let row: Row = json!({ "count": 3 }).as_object().cloned().unwrap_or_default();
        assert_eq!(row_count(&row, "count").ok(), Some(3));
        assert!(matches!(
            row_count(&row, "c0"),
            Err(SessionError::MissingColumn { .. })
        ));
    }
}
