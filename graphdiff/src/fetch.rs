//! Batched retrieval of full property maps by key.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::{
    errors::SessionError,
    identity::PRIMARY_CONTENT_LABEL,
    query::{COLUMN_KEY, COLUMN_PROPS, GraphQuery, PropertyMap, row_str},
    session::GraphSession,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Records of the primary content label are wide; fetch them in smaller batches.
pub const PRIMARY_CONTENT_BATCH_SIZE: usize = 10;

/// Chunk size per label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSizing {
    pub default_size: usize,
    pub overrides: BTreeMap<String, usize>,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchSizing {
    pub fn new(default_size: usize) -> Self {
        Self {
            default_size: default_size.max(1),
            overrides: BTreeMap::from([(PRIMARY_CONTENT_LABEL.to_string(), PRIMARY_CONTENT_BATCH_SIZE)]),
        }
    }

    pub fn with_override(mut self, label: impl Into<String>, size: usize) -> Self {
        self.overrides.insert(label.into(), size.max(1));
        self
    }

    pub fn chunk_size_for(&self, label: &str) -> usize {
        self.overrides.get(label).copied().unwrap_or(self.default_size).max(1)
    }
}

/// Fetch the property maps of the nodes labelled `label` whose `property` is in `keys`.
///
/// Keys absent on the side are simply absent from the map. An empty key list
/// returns an empty map without touching the session.
pub async fn fetch_batch<S: GraphSession>(
    session: &mut S,
    label: &str,
    property: &str,
    keys: &[String],
) -> Result<HashMap<String, PropertyMap>, SessionError> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = session
        .run_query(&GraphQuery::FetchByKeys {
            label: label.to_string(),
            property: property.to_string(),
            keys: keys.to_vec(),
        })
        .await?;

    let mut records: HashMap<String, PropertyMap> = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = row_str(&row, COLUMN_KEY)?.to_string();
        let props = row
            .get(COLUMN_PROPS)
            .and_then(|value| value.as_object())
            .cloned()
            .unwrap_or_default();

        if records.contains_key(&key) {
            debug!("{label}: several nodes share {property} = {key}, keeping the first");
            continue;
        }
        records.insert(key, props);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryGraph;
    use serde_json::json;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn primary_content_uses_small_batches() {
        let sizing = BatchSizing::default();
        assert_eq!(sizing.chunk_size_for("Paper"), PRIMARY_CONTENT_BATCH_SIZE);
        assert_eq!(sizing.chunk_size_for("Dataset"), DEFAULT_BATCH_SIZE);

        let sizing = BatchSizing::new(0).with_override("Dataset", 25);
        assert_eq!(sizing.chunk_size_for("Task"), 1);
        assert_eq!(sizing.chunk_size_for("Dataset"), 25);
    }

    #[tokio::test]
    async fn empty_key_list_issues_no_query() {
        let mut session = MemoryGraph::new().with_node("Paper", json!({ "id": "p1" }));
        let log = session.query_log();
        let records = fetch_batch(&mut session, "Paper", "id", &[]).await.unwrap();
        assert!(records.is_empty());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn absent_keys_are_absent_from_the_result() {
        let mut session = MemoryGraph::new()
            .with_node("Dataset", json!({ "id": "d1", "name": "MNIST" }))
            .with_node("Dataset", json!({ "id": "d2", "name": "CIFAR" }));
        let records = fetch_batch(&mut session, "Dataset", "id", &keys(&["d1", "d9"]))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["d1"]["name"], json!("MNIST"));
    }

    #[tokio::test]
    async fn duplicate_keys_keep_the_first_record() {
        let mut session = MemoryGraph::new()
            .with_node("Task", json!({ "name": "seg", "rank": 1 }))
            .with_node("Task", json!({ "name": "seg", "rank": 2 }));
        let records = fetch_batch(&mut session, "Task", "name", &keys(&["seg"])).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["seg"]["rank"], json!(1));
    }
}
