//! Identity resolution: pick the property that identifies entities of a label.
//!
//! Graphs loaded by different pipelines rarely agree on a schema-level key,
//! so each label gets an ordered list of candidate properties. The first one
//! that is populated on at least one node wins for the whole run.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    errors::SessionError,
    query::{COLUMN_KEY, GraphQuery, row_str},
    session::GraphSession,
};

pub const DEFAULT_CANDIDATES: &[&str] = &["id", "arxiv_id", "url", "name"];

/// Label whose generated `id` is not stable across independently loaded graphs.
pub const PRIMARY_CONTENT_LABEL: &str = "Paper";

/// Cross-system identifiers first, the generated id only as a fallback.
pub const PRIMARY_CONTENT_CANDIDATES: &[&str] = &["arxiv_id", "url_abs", "id", "title"];

/// Ordered candidate key properties for one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeys(Vec<String>);

impl CandidateKeys {
    pub fn new<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(properties.into_iter().map(Into::into).collect())
    }

    pub fn generic() -> Self {
        Self::new(DEFAULT_CANDIDATES.iter().copied())
    }

    pub fn primary_content() -> Self {
        Self::new(PRIMARY_CONTENT_CANDIDATES.iter().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Label → candidate list, with a generic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStrategy {
    fallback: CandidateKeys,
    per_label: BTreeMap<String, CandidateKeys>,
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self {
            fallback: CandidateKeys::generic(),
            per_label: BTreeMap::from([(PRIMARY_CONTENT_LABEL.to_string(), CandidateKeys::primary_content())]),
        }
    }
}

impl KeyStrategy {
    /// Override the candidates of one label.
    pub fn with_label(mut self, label: impl Into<String>, candidates: CandidateKeys) -> Self {
        self.per_label.insert(label.into(), candidates);
        self
    }

    pub fn candidates_for(&self, label: &str) -> &CandidateKeys {
        self.per_label.get(label).unwrap_or(&self.fallback)
    }
}

/// Outcome of resolving one label on one side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedKeys {
    /// Property adopted as key, `None` when no candidate is populated.
    pub property: Option<String>,
    pub keys: BTreeSet<String>,
}

impl ResolvedKeys {
    pub fn is_resolved(&self) -> bool {
        self.property.is_some()
    }
}

/// Try `candidates` in order and return the keys of the first populated one.
///
/// `page_size` bounds how many keys are read (`None` reads them all). A lookup
/// that errors moves on to the next candidate; only fatal errors propagate.
pub async fn resolve_keys<S: GraphSession>(
    session: &mut S,
    label: &str,
    candidates: &CandidateKeys,
    page_size: Option<usize>,
) -> Result<ResolvedKeys, SessionError> {
    for property in candidates.iter() {
        match read_keys(session, label, property, page_size).await {
            Ok(keys) if !keys.is_empty() => {
                debug!("{label}: keyed by '{property}' ({} keys read)", keys.len());
                return Ok(ResolvedKeys {
                    property: Some(property.to_string()),
                    keys,
                });
            }
            Ok(_) => debug!("{label}: '{property}' is never populated"),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => debug!("{label}: probing '{property}' failed: {err}"),
        }
    }

    debug!("{label}: no identifying property found");
    Ok(ResolvedKeys::default())
}

/// Non-null stringified values of `property` on nodes labelled `label`.
pub async fn read_keys<S: GraphSession>(
    session: &mut S,
    label: &str,
    property: &str,
    page_size: Option<usize>,
) -> Result<BTreeSet<String>, SessionError> {
    let rows = session
        .run_query(&GraphQuery::KeyValues {
            label: label.to_string(),
            property: property.to_string(),
            limit: page_size,
        })
        .await?;

    rows.iter()
        .map(|row| row_str(row, COLUMN_KEY).map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryGraph;
    use serde_json::json;

    #[test]
    fn primary_content_label_prefers_stable_identifiers() {
        let strategy = KeyStrategy::default();
        let paper: Vec<&str> = strategy.candidates_for("Paper").iter().collect();
        assert_eq!(paper, PRIMARY_CONTENT_CANDIDATES);
        let dataset: Vec<&str> = strategy.candidates_for("Dataset").iter().collect();
        assert_eq!(dataset, DEFAULT_CANDIDATES);
    }

    #[test]
    fn overrides_replace_the_label_list() {
        let strategy = KeyStrategy::default().with_label("Repository", CandidateKeys::new(["url"]));
        let repo: Vec<&str> = strategy.candidates_for("Repository").iter().collect();
        assert_eq!(repo, vec!["url"]);
    }

    #[tokio::test]
    async fn first_populated_candidate_wins() {
        let mut session = MemoryGraph::new()
            .with_node("Repository", json!({ "url": "https://a", "name": "a" }))
            .with_node("Repository", json!({ "url": "https://b", "name": "b" }));
        let resolved = resolve_keys(&mut session, "Repository", &CandidateKeys::generic(), None)
            .await
            .unwrap();
        assert_eq!(resolved.property.as_deref(), Some("url"));
        assert_eq!(resolved.keys.len(), 2);
    }

    #[tokio::test]
    async fn page_size_bounds_the_key_set() {
        let mut session = MemoryGraph::new();
        for i in 0..5 {
            session.add_node(&["Dataset"], json!({ "id": format!("d{i}") }));
        }
        let resolved = resolve_keys(&mut session, "Dataset", &CandidateKeys::generic(), Some(2))
            .await
            .unwrap();
        assert_eq!(resolved.keys.into_iter().collect::<Vec<_>>(), vec!["d0", "d1"]);
    }

    #[tokio::test]
    async fn unkeyed_label_resolves_to_nothing() {
        let mut session = MemoryGraph::new().with_node("Task", json!({ "description": "x" }));
        let resolved = resolve_keys(&mut session, "Task", &CandidateKeys::generic(), Some(10))
            .await
            .unwrap();
        assert!(!resolved.is_resolved());
        assert!(resolved.keys.is_empty());
    }
}
