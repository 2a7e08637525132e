//! Cardinality counting per node label / relationship type.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    errors::SessionError,
    query::{COLUMN_COUNT, EntityKind, GraphQuery, combined_count_column, row_count},
    schema::{SchemaScope, discover_types},
    session::GraphSession,
};

/// Types per combined count query; keeps statements under server size limits.
pub const COMBINED_COUNT_CHUNK: usize = 32;

/// Counts for one side, with every failure that was defaulted away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideCounts {
    pub counts: BTreeMap<String, u64>,
    /// Why type discovery failed, when it did.
    pub discovery_error: Option<String>,
    /// Types reported as 0 because their count query failed.
    pub failed: BTreeMap<String, String>,
}

pub async fn count_side<S: GraphSession>(
    session: &mut S,
    kind: EntityKind,
    scope: &SchemaScope,
) -> Result<SideCounts, SessionError> {
    let discovery = discover_types(session, kind, scope).await?;
    let mut side = count_types(session, kind, &discovery.types).await?;
    side.discovery_error = discovery.error;

    if let Some(allowed) = scope.allowed(kind) {
        for name in allowed {
            side.counts.entry(name.clone()).or_insert(0);
        }
    }

    Ok(side)
}

pub async fn count_types<S: GraphSession>(
    session: &mut S,
    kind: EntityKind,
    types: &BTreeSet<String>,
) -> Result<SideCounts, SessionError> {
    let names: Vec<String> = types.iter().cloned().collect();
    let mut side = SideCounts::default();

    for chunk in names.chunks(COMBINED_COUNT_CHUNK) {
        match count_combined(session, kind, chunk).await {
            Ok(chunk_counts) => side.counts.extend(chunk_counts),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!("combined {} count failed, counting one by one: {err}", kind.plural());
                for name in chunk {
                    match count_one(session, kind, name).await {
                        Ok(count) => {
                            side.counts.insert(name.clone(), count);
                        }
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            debug!("could not count {name}: {err}");
                            side.counts.insert(name.clone(), 0);
                            side.failed.insert(name.clone(), err.to_string());
                        }
                    }
                }
            }
        }
    }

    Ok(side)
}

async fn count_combined<S: GraphSession>(
    session: &mut S,
    kind: EntityKind,
    names: &[String],
) -> Result<BTreeMap<String, u64>, SessionError> {
    let query = match kind {
        EntityKind::Node => GraphQuery::CountNodesCombined { labels: names.to_vec() },
        EntityKind::Relationship => GraphQuery::CountRelationshipsCombined {
            rel_types: names.to_vec(),
        },
    };

    let rows = session.run_query(&query).await?;
    let row = rows
        .first()
        .ok_or_else(|| SessionError::query("combined count returned no rows"))?;

    names
        .iter()
        .enumerate()
        .map(|(i, name)| Ok((name.clone(), row_count(row, &combined_count_column(i))?)))
        .collect()
}

/// Count a single type; non-fatal failures default to 0.
async fn count_one<S: GraphSession>(session: &mut S, kind: EntityKind, name: &str) -> Result<u64, SessionError> {
    let query = match kind {
        EntityKind::Node => GraphQuery::CountNodes {
            label: name.to_string(),
        },
        EntityKind::Relationship => GraphQuery::CountRelationships {
            rel_type: name.to_string(),
        },
    };

    let rows = session.run_query(&query).await?;
    rows.first().map_or(Ok(0), |row| row_count(row, COLUMN_COUNT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryGraph;
    use serde_json::json;

    fn graph() -> MemoryGraph {
        MemoryGraph::new()
            .with_node("Paper", json!({ "id": "p1" }))
            .with_node("Paper", json!({ "id": "p2" }))
            .with_node("Dataset", json!({ "id": "d1" }))
            .with_relationship("USES_DATASET")
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn combined_query_counts_all_types_in_one_round_trip() {
        let mut session = graph();
        let log = session.query_log();
        let side = count_types(&mut session, EntityKind::Node, &set(&["Dataset", "Paper"]))
            .await
            .unwrap();
        assert_eq!(side.counts["Paper"], 2);
        assert_eq!(side.counts["Dataset"], 1);
        assert!(side.failed.is_empty());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_per_type_and_defaults_failures_to_zero() {
        let mut session = graph().fail_type("Dataset");
        let log = session.query_log();
        let side = count_types(&mut session, EntityKind::Node, &set(&["Dataset", "Paper"]))
            .await
            .unwrap();
        assert_eq!(side.counts["Paper"], 2);
        assert_eq!(side.counts["Dataset"], 0);
        assert!(side.failed["Dataset"].contains("Dataset"));
        assert!(!side.failed.contains_key("Paper"));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn large_type_sets_are_chunked() {
        let mut session = MemoryGraph::new();
        let names: BTreeSet<String> = (0..COMBINED_COUNT_CHUNK + 1).map(|i| format!("L{i}")).collect();
        let log = session.query_log();
        let side = count_types(&mut session, EntityKind::Node, &names).await.unwrap();
        assert_eq!(side.counts.len(), COMBINED_COUNT_CHUNK + 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn scoped_side_reports_absent_allow_listed_types_as_zero() {
        let mut session = graph();
        let counts = count_side(&mut session, EntityKind::Node, &SchemaScope::papers_with_code())
            .await
            .unwrap()
            .counts;
        assert_eq!(counts["Paper"], 2);
        assert_eq!(counts["Task"], 0);
        assert_eq!(counts["Author"], 0);
        assert_eq!(counts.len(), 5);

        let rel_counts = count_side(&mut session, EntityKind::Relationship, &SchemaScope::papers_with_code())
            .await
            .unwrap()
            .counts;
        assert_eq!(rel_counts["USES_DATASET"], 1);
        assert_eq!(rel_counts["HAS_CODE"], 0);
    }

    #[tokio::test]
    async fn listing_failure_is_kept_with_the_counts() {
        let mut session = graph().fail_schema_listing();
        let side = count_side(&mut session, EntityKind::Node, &SchemaScope::All).await.unwrap();
        assert!(side.counts.is_empty());
        assert!(side.discovery_error.is_some());
    }

    #[tokio::test]
    async fn connection_loss_propagates() {
        let mut session = graph().unreachable();
        let result = count_types(&mut session, EntityKind::Node, &set(&["Paper"])).await;
        assert!(result.unwrap_err().is_fatal());
    }
}
