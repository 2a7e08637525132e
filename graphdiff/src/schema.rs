//! Schema discovery: which node labels and relationship types a side holds.

use std::collections::BTreeSet;

use log::warn;
use serde::Serialize;

use crate::{
    errors::SessionError,
    query::{COLUMN_LABEL, COLUMN_TYPE, EntityKind, GraphQuery, row_str},
    session::GraphSession,
};

pub const PWC_NODE_LABELS: &[&str] = &["Paper", "Repository", "Dataset", "Task", "Author"];
pub const PWC_RELATIONSHIP_TYPES: &[&str] = &["AUTHORED", "HAS_CODE", "USES_DATASET", "ADDRESSES_TASK"];

/// Which types a run looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SchemaScope {
    /// Everything the endpoint reports.
    All,
    /// Only these types; anything else present on an endpoint is ignored.
    AllowList {
        node_labels: BTreeSet<String>,
        relationship_types: BTreeSet<String>,
    },
}

impl SchemaScope {
    /// Built-in allow list for Papers-with-Code graphs.
    pub fn papers_with_code() -> Self {
        Self::AllowList {
            node_labels: PWC_NODE_LABELS.iter().map(|label| label.to_string()).collect(),
            relationship_types: PWC_RELATIONSHIP_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Allow-listed types of `kind`, or `None` when unrestricted.
    pub fn allowed(&self, kind: EntityKind) -> Option<&BTreeSet<String>> {
        match self {
            Self::All => None,
            Self::AllowList {
                node_labels,
                relationship_types,
            } => Some(match kind {
                EntityKind::Node => node_labels,
                EntityKind::Relationship => relationship_types,
            }),
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, Self::AllowList { .. })
    }

    fn restrict(&self, kind: EntityKind, discovered: BTreeSet<String>) -> BTreeSet<String> {
        match self.allowed(kind) {
            None => discovered,
            Some(allowed) => discovered.into_iter().filter(|name| allowed.contains(name)).collect(),
        }
    }
}

pub async fn list_node_labels<S: GraphSession>(session: &mut S, scope: &SchemaScope) -> Result<BTreeSet<String>, SessionError> {
    list_types(session, EntityKind::Node, scope).await
}

pub async fn list_relationship_types<S: GraphSession>(
    session: &mut S,
    scope: &SchemaScope,
) -> Result<BTreeSet<String>, SessionError> {
    list_types(session, EntityKind::Relationship, scope).await
}

/// Types of `kind` present on the session, restricted to the scope.
///
/// Query failures degrade to an empty set; only fatal errors propagate.
pub async fn list_types<S: GraphSession>(
    session: &mut S,
    kind: EntityKind,
    scope: &SchemaScope,
) -> Result<BTreeSet<String>, SessionError> {
    Ok(discover_types(session, kind, scope).await?.types)
}

/// Result of listing the types of one kind on one side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub types: BTreeSet<String>,
    /// Set when listing failed and `types` is empty for that reason.
    pub error: Option<String>,
}

/// Like [`list_types`], but keeps the reason a non-fatal listing failure happened.
pub async fn discover_types<S: GraphSession>(
    session: &mut S,
    kind: EntityKind,
    scope: &SchemaScope,
) -> Result<Discovery, SessionError> {
    let (query, column) = match kind {
        EntityKind::Node => (GraphQuery::ListLabels, COLUMN_LABEL),
        EntityKind::Relationship => (GraphQuery::ListRelationshipTypes, COLUMN_TYPE),
    };

    match session.run_query(&query).await {
        Ok(rows) => {
            let discovered = rows
                .iter()
                .filter_map(|row| row_str(row, column).ok().map(str::to_string))
                .collect();
            Ok(Discovery {
                types: scope.restrict(kind, discovered),
                error: None,
            })
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!("could not list {}: {err}", kind.plural());
            Ok(Discovery {
                types: BTreeSet::new(),
                error: Some(err.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryGraph;
    use serde_json::json;

    fn graph() -> MemoryGraph {
        MemoryGraph::new()
            .with_node("Paper", json!({ "id": "p1" }))
            .with_node("Customer", json!({ "id": "c1" }))
            .with_relationship("HAS_CODE")
            .with_relationship("OWNS")
    }

    #[tokio::test]
    async fn unscoped_lists_everything() {
        let mut session = graph();
        let labels = list_node_labels(&mut session, &SchemaScope::All).await.unwrap();
        assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec!["Customer", "Paper"]);
    }

    #[tokio::test]
    async fn scoped_ignores_unknown_types() {
        let mut session = graph();
        let scope = SchemaScope::papers_with_code();
        let labels = list_node_labels(&mut session, &scope).await.unwrap();
        assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec!["Paper"]);
        let types = list_relationship_types(&mut session, &scope).await.unwrap();
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec!["HAS_CODE"]);
    }

    #[tokio::test]
    async fn query_failure_yields_empty_set() {
        let mut session = graph().fail_schema_listing();
        let labels = list_node_labels(&mut session, &SchemaScope::All).await.unwrap();
        assert!(labels.is_empty());

        let mut session = graph().unreachable();
        assert!(list_node_labels(&mut session, &SchemaScope::All).await.is_err());
    }

    #[tokio::test]
    async fn discovery_keeps_the_listing_failure() {
        let mut session = graph().fail_schema_listing();
        let discovery = discover_types(&mut session, EntityKind::Node, &SchemaScope::All)
            .await
            .unwrap();
        assert!(discovery.types.is_empty());
        assert!(discovery.error.unwrap().contains("schema procedures unavailable"));

        let mut session = graph();
        let discovery = discover_types(&mut session, EntityKind::Relationship, &SchemaScope::All)
            .await
            .unwrap();
        assert_eq!(discovery.types.len(), 2);
        assert!(discovery.error.is_none());
    }
}
