//! Comparison result data model and its JSON persistence.
//!
//! Every structure here is created fresh for one run and serialized as the
//! run's report. Maps are `BTreeMap` so the report is ordered by type name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{counter::SideCounts, errors::DiffError, query::PropertyMap, schema::SchemaScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// Per-run comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CompareMode {
    /// Compare at most `sample_size` source keys per type; target-only keys are not computed.
    Sampled { sample_size: usize },
    /// Compare the entire key universe of both sides.
    FullDiff,
}

impl CompareMode {
    /// Key page size for the identity resolver. A sample is at least one key,
    /// so a zero sample size can never make every label look unkeyed.
    pub fn page_size(self) -> Option<usize> {
        match self {
            Self::Sampled { sample_size } => Some(sample_size.max(1)),
            Self::FullDiff => None,
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, Self::FullDiff)
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sampled { sample_size } => write!(f, "sampled ({sample_size} per type)"),
            Self::FullDiff => f.write_str("full diff"),
        }
    }
}

/// Comparator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPhase {
    Init,
    CountNodes,
    CountRelationships,
    CompareTypes,
    Summarize,
    Done,
    Failed,
}

impl fmt::Display for ComparisonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "connecting",
            Self::CountNodes => "counting nodes",
            Self::CountRelationships => "counting relationships",
            Self::CompareTypes => "comparing content",
            Self::Summarize => "summarizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled { phase: ComparisonPhase },
    Failed { phase: ComparisonPhase, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountDifference {
    pub source: u64,
    pub target: u64,
    /// `target - source`
    pub difference: i64,
}

/// Count table for one kind of entity type on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountComparison {
    pub source_counts: BTreeMap<String, u64>,
    pub target_counts: BTreeMap<String, u64>,
    pub differences: BTreeMap<String, CountDifference>,
    pub identical_counts: Vec<String>,
    pub missing_in_target: Vec<String>,
    pub missing_in_source: Vec<String>,
    pub source_total: u64,
    pub target_total: u64,
    /// Set when listing types failed on that side; its counts are then incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_discovery_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_discovery_error: Option<String>,
    /// Types whose count query failed on that side and were reported as 0.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub source_count_errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub target_count_errors: BTreeMap<String, String>,
}

impl CountComparison {
    pub fn from_counts(source_counts: BTreeMap<String, u64>, target_counts: BTreeMap<String, u64>) -> Self {
        let mut comparison = Self {
            source_total: source_counts.values().sum(),
            target_total: target_counts.values().sum(),
            ..Self::default()
        };

        let types: std::collections::BTreeSet<&String> = source_counts.keys().chain(target_counts.keys()).collect();
        for name in types {
            let source = source_counts.get(name).copied().unwrap_or(0);
            let target = target_counts.get(name).copied().unwrap_or(0);

            if source == target {
                comparison.identical_counts.push(name.clone());
            } else {
                comparison.differences.insert(
                    name.clone(),
                    CountDifference {
                        source,
                        target,
                        difference: target as i64 - source as i64,
                    },
                );
            }

            if source > 0 && target == 0 {
                comparison.missing_in_target.push(name.clone());
            } else if source == 0 && target > 0 {
                comparison.missing_in_source.push(name.clone());
            }
        }

        comparison.source_counts = source_counts;
        comparison.target_counts = target_counts;
        comparison
    }

    /// Build the table from both sides' counts, keeping every recorded failure.
    pub fn from_sides(source: SideCounts, target: SideCounts) -> Self {
        Self {
            source_discovery_error: source.discovery_error,
            target_discovery_error: target.discovery_error,
            source_count_errors: source.failed,
            target_count_errors: target.failed,
            ..Self::from_counts(source.counts, target.counts)
        }
    }

    /// False when any count on either side is a default standing in for a failure.
    pub fn is_complete(&self) -> bool {
        self.source_discovery_error.is_none()
            && self.target_discovery_error.is_none()
            && self.source_count_errors.is_empty()
            && self.target_count_errors.is_empty()
    }

    /// The source was listed and counted without error and holds none of `name`.
    pub fn source_known_empty(&self, name: &str) -> bool {
        self.source_count(name) == 0
            && self.source_discovery_error.is_none()
            && !self.source_count_errors.contains_key(name)
    }

    pub fn source_count(&self, name: &str) -> u64 {
        self.source_counts.get(name).copied().unwrap_or(0)
    }

    pub fn target_count(&self, name: &str) -> u64 {
        self.target_counts.get(name).copied().unwrap_or(0)
    }

    pub fn types_match(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn totals_match(&self) -> bool {
        self.source_total == self.target_total
    }
}

/// One content-level divergence for a single key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Difference {
    MissingInTarget {
        key: String,
        source_data: Option<PropertyMap>,
    },
    MissingInSource {
        key: String,
        target_data: Option<PropertyMap>,
    },
    Different {
        key: String,
        source_data: PropertyMap,
        target_data: PropertyMap,
        changed_fields: Vec<String>,
    },
}

impl Difference {
    pub fn key(&self) -> &str {
        match self {
            Self::MissingInTarget { key, .. } | Self::MissingInSource { key, .. } | Self::Different { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No entities of this type on the source side.
    EmptySource,
    /// None of the candidate key properties is populated.
    NoIdentifyingProperty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TypeStatus {
    Compared,
    Skipped { reason: SkipReason },
    Failed { error: String },
    Cancelled,
}

/// Content comparison tallies for one node label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeComparison {
    pub label: String,
    pub status: TypeStatus,
    pub source_key_property: Option<String>,
    pub target_key_property: Option<String>,
    pub keys_compared: u64,
    pub identical: u64,
    pub different: u64,
    pub missing_in_target: u64,
    /// Only computed in full-diff mode. Always the full `|target keys - source keys|`;
    /// only the `differences` list is capped at the reporting limit.
    pub missing_in_source: u64,
    /// Capped at the run's reporting limit.
    pub differences: Vec<Difference>,
    /// True when more differences were found than `differences` holds.
    pub truncated: bool,
}

impl TypeComparison {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: TypeStatus::Compared,
            source_key_property: None,
            target_key_property: None,
            keys_compared: 0,
            identical: 0,
            different: 0,
            missing_in_target: 0,
            missing_in_source: 0,
            differences: Vec::new(),
            truncated: false,
        }
    }

    pub fn skipped(label: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            status: TypeStatus::Skipped { reason },
            ..Self::new(label)
        }
    }

    /// Record a difference, keeping at most `cap` of them in the list.
    pub fn push_difference(&mut self, difference: Difference, cap: usize) {
        if self.differences.len() < cap {
            self.differences.push(difference);
        } else {
            self.truncated = true;
        }
    }

    pub fn has_content_differences(&self) -> bool {
        self.different > 0 || self.missing_in_target > 0 || self.missing_in_source > 0
    }

    /// A type whose content the run could not vouch for.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self.status, TypeStatus::Failed { .. } | TypeStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TotalMatch {
    pub source: u64,
    pub target: u64,
    #[serde(rename = "match")]
    pub matches: bool,
}

impl TotalMatch {
    fn of(comparison: &CountComparison) -> Self {
        Self {
            source: comparison.source_total,
            target: comparison.target_total,
            matches: comparison.totals_match(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_nodes: TotalMatch,
    pub total_relationships: TotalMatch,
    pub node_types_match: bool,
    pub relationship_types_match: bool,
    pub content_match: bool,
    /// Every type was listed and counted on both sides.
    pub counts_complete: bool,
    pub identical: bool,
}

impl Summary {
    /// Every fact is computed independently; `identical` is their conjunction.
    pub fn derive(
        nodes: &CountComparison,
        relationships: &CountComparison,
        types: &BTreeMap<String, TypeComparison>,
    ) -> Self {
        let total_nodes = TotalMatch::of(nodes);
        let total_relationships = TotalMatch::of(relationships);
        let node_types_match = nodes.types_match();
        let relationship_types_match = relationships.types_match();
        let content_match = types
            .values()
            .all(|comparison| !comparison.has_content_differences() && !comparison.is_inconclusive());
        let counts_complete = nodes.is_complete() && relationships.is_complete();

        Self {
            total_nodes,
            total_relationships,
            node_types_match,
            relationship_types_match,
            content_match,
            counts_complete,
            identical: total_nodes.matches
                && total_relationships.matches
                && node_types_match
                && relationship_types_match
                && content_match
                && counts_complete,
        }
    }
}

/// Identifies one side in the report without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub source: EndpointInfo,
    pub target: EndpointInfo,
    pub mode: CompareMode,
    pub scope: SchemaScope,
    pub outcome: RunOutcome,
    pub node_comparison: CountComparison,
    pub relationship_comparison: CountComparison,
    pub type_comparisons: BTreeMap<String, TypeComparison>,
    pub summary: Summary,
}

impl ComparisonResult {
    pub fn new(source: EndpointInfo, target: EndpointInfo, mode: CompareMode, scope: SchemaScope) -> Self {
        let node_comparison = CountComparison::default();
        let relationship_comparison = CountComparison::default();
        let type_comparisons = BTreeMap::new();
        let summary = Summary::derive(&node_comparison, &relationship_comparison, &type_comparisons);
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            source,
            target,
            mode,
            scope,
            outcome: RunOutcome::Completed,
            node_comparison,
            relationship_comparison,
            type_comparisons,
            summary,
        }
    }

    /// Recompute the summary from the tables collected so far.
    pub fn summarize(&mut self) {
        self.summary = Summary::derive(
            &self.node_comparison,
            &self.relationship_comparison,
            &self.type_comparisons,
        );
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        let finished_at = Utc::now();
        self.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished_at);
        self.outcome = outcome;
    }

    /// Identical, and the run actually completed.
    pub fn is_identical(&self) -> bool {
        self.summary.identical && self.outcome == RunOutcome::Completed
    }

    pub fn to_json(&self) -> Result<String, DiffError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), DiffError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(name, count)| (name.to_string(), *count)).collect()
    }

    #[test]
    fn count_comparison_classifies_each_type() {
        let comparison = CountComparison::from_counts(
            counts(&[("Dataset", 3), ("Paper", 5), ("Author", 2)]),
            counts(&[("Dataset", 2), ("Paper", 5), ("Task", 4)]),
        );

        assert_eq!(comparison.identical_counts, vec!["Paper"]);
        assert_eq!(comparison.differences["Dataset"].difference, -1);
        assert_eq!(comparison.differences["Task"].difference, 4);
        assert_eq!(comparison.missing_in_target, vec!["Author"]);
        assert_eq!(comparison.missing_in_source, vec!["Task"]);
        assert_eq!(comparison.source_total, 10);
        assert_eq!(comparison.target_total, 11);
    }

    #[test]
    fn summary_reports_every_fact_even_when_already_different() {
        let nodes = CountComparison::from_counts(counts(&[("Paper", 2)]), counts(&[("Paper", 1)]));
        let relationships = CountComparison::from_counts(counts(&[("HAS_CODE", 1)]), counts(&[("HAS_CODE", 1)]));
        let mut types = BTreeMap::new();
        let mut paper = TypeComparison::new("Paper");
        paper.different = 1;
        types.insert("Paper".to_string(), paper);

        let summary = Summary::derive(&nodes, &relationships, &types);
        assert!(!summary.identical);
        assert!(!summary.total_nodes.matches);
        assert!(summary.total_relationships.matches);
        assert!(!summary.node_types_match);
        assert!(summary.relationship_types_match);
        assert!(!summary.content_match);
    }

    #[test]
    fn failed_type_is_not_vouched_for() {
        let empty = CountComparison::default();
        let mut types = BTreeMap::new();
        let mut paper = TypeComparison::new("Paper");
        paper.status = TypeStatus::Failed {
            error: "boom".to_string(),
        };
        types.insert("Paper".to_string(), paper);
        assert!(!Summary::derive(&empty, &empty, &types).content_match);

        types.insert(
            "Task".to_string(),
            TypeComparison::skipped("Task", SkipReason::NoIdentifyingProperty),
        );
        types.remove("Paper");
        assert!(Summary::derive(&empty, &empty, &types).identical);
    }

    #[test]
    fn defaulted_counts_are_not_vouched_for() {
        let source = SideCounts {
            counts: counts(&[("Paper", 0)]),
            discovery_error: None,
            failed: [("Paper".to_string(), "query failed".to_string())].into_iter().collect(),
        };
        let target = SideCounts {
            counts: counts(&[("Paper", 0)]),
            ..SideCounts::default()
        };
        let nodes = CountComparison::from_sides(source, target);
        assert!(nodes.types_match());
        assert!(!nodes.is_complete());
        assert!(!nodes.source_known_empty("Paper"));

        let summary = Summary::derive(&nodes, &CountComparison::default(), &BTreeMap::new());
        assert!(summary.content_match);
        assert!(!summary.counts_complete);
        assert!(!summary.identical);

        let unlisted = SideCounts {
            discovery_error: Some("schema procedures unavailable".to_string()),
            ..SideCounts::default()
        };
        let relationships = CountComparison::from_sides(SideCounts::default(), unlisted);
        assert!(!relationships.is_complete());
        assert!(!Summary::derive(&CountComparison::default(), &relationships, &BTreeMap::new()).identical);
        assert!(Summary::derive(&CountComparison::default(), &CountComparison::default(), &BTreeMap::new()).identical);
    }

    #[test]
    fn sampled_page_size_is_never_zero() {
        assert_eq!(CompareMode::Sampled { sample_size: 0 }.page_size(), Some(1));
        assert_eq!(CompareMode::Sampled { sample_size: 25 }.page_size(), Some(25));
        assert_eq!(CompareMode::FullDiff.page_size(), None);
    }

    #[test]
    fn differences_are_capped_but_flagged() {
        let mut comparison = TypeComparison::new("Paper");
        for i in 0..3 {
            comparison.push_difference(
                Difference::MissingInTarget {
                    key: format!("p{i}"),
                    source_data: None,
                },
                2,
            );
        }
        assert_eq!(comparison.differences.len(), 2);
        assert!(comparison.truncated);
    }

    #[test]
    fn report_serializes_summary_match_field() {
        let mut result = ComparisonResult::new(
            EndpointInfo {
                uri: "bolt://a".to_string(),
            },
            EndpointInfo {
                uri: "bolt://b".to_string(),
            },
            CompareMode::FullDiff,
            SchemaScope::All,
        );
        result.finish(RunOutcome::Completed);
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["total_nodes"]["match"], serde_json::json!(true));
        assert_eq!(json["outcome"]["status"], serde_json::json!("completed"));
        assert_eq!(json["mode"]["mode"], serde_json::json!("full_diff"));
        assert!(json["finished_at"].is_string());
    }
}
