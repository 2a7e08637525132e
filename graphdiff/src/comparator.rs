//! Comparison orchestration.
//!
//! The comparator owns one session per side and walks the run through its
//! phases: `Init → CountNodes → CountRelationships → CompareTypes → Summarize → Done`,
//! or `Failed` when a side becomes unreachable. Per-type failures are
//! recorded in the result and never abort sibling types.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    counter::count_side,
    equivalence::{changed_fields, equivalent},
    errors::{DiffError, SessionError},
    fetch::{BatchSizing, fetch_batch},
    identity::{KeyStrategy, read_keys, resolve_keys},
    progress::ProgressReporter,
    query::{EntityKind, GraphQuery},
    report::{
        CompareMode, ComparisonPhase, ComparisonResult, CountComparison, Difference, EndpointInfo, RunOutcome, Side,
        SkipReason, TypeComparison, TypeStatus,
    },
    schema::SchemaScope,
    session::GraphSession,
};

pub const DEFAULT_SAMPLE_SIZE: usize = 10;
pub const DEFAULT_MAX_REPORTED_DIFFERENCES: usize = 20;

#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub mode: CompareMode,
    pub batch: BatchSizing,
    pub scope: SchemaScope,
    pub keys: KeyStrategy,
    /// Cap on the Difference list kept per type. Tallies are never capped.
    pub max_reported_differences: usize,
    /// Run-level deadline, measured from the start of [`Comparator::run`].
    pub timeout: Option<Duration>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::Sampled {
                sample_size: DEFAULT_SAMPLE_SIZE,
            },
            batch: BatchSizing::default(),
            scope: SchemaScope::All,
            keys: KeyStrategy::default(),
            max_reported_differences: DEFAULT_MAX_REPORTED_DIFFERENCES,
            timeout: None,
        }
    }
}

/// Explicit cancellation or an elapsed deadline.
#[derive(Debug, Clone, Default)]
struct StopSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl StopSignal {
    fn fired(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// How a single type's comparison ended when no error occurred.
enum TypeRun {
    Finished,
    Cancelled,
}

type SideResult<T> = Result<T, (Side, SessionError)>;

fn on(side: Side) -> impl Fn(SessionError) -> (Side, SessionError) {
    move |err| (side, err)
}

pub struct Comparator<S, T> {
    source: S,
    target: T,
    source_info: EndpointInfo,
    target_info: EndpointInfo,
    options: CompareOptions,
    progress: ProgressReporter,
    stop: StopSignal,
    phase: ComparisonPhase,
    result: ComparisonResult,
}

impl<S, T> Comparator<S, T>
where
    S: GraphSession,
    T: GraphSession,
{
    pub fn new(source: S, target: T, options: CompareOptions) -> Self {
        let source_info = EndpointInfo {
            uri: Side::Source.to_string(),
        };
        let target_info = EndpointInfo {
            uri: Side::Target.to_string(),
        };
        let result = ComparisonResult::new(
            source_info.clone(),
            target_info.clone(),
            options.mode,
            options.scope.clone(),
        );

        Self {
            source,
            target,
            source_info,
            target_info,
            options,
            progress: ProgressReporter::default(),
            stop: StopSignal::default(),
            phase: ComparisonPhase::Init,
            result,
        }
    }

    /// Name both endpoints in the report.
    pub fn with_endpoints(mut self, source: EndpointInfo, target: EndpointInfo) -> Self {
        self.result.source = source.clone();
        self.result.target = target.clone();
        self.source_info = source;
        self.target_info = target;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.stop.token = token;
        self
    }

    /// Token that cancels this comparator's run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.token.clone()
    }

    pub fn phase(&self) -> ComparisonPhase {
        self.phase
    }

    /// Result as computed so far; complete once `run` has returned.
    pub fn partial(&self) -> &ComparisonResult {
        &self.result
    }

    pub async fn close(self) {
        self.source.close().await;
        self.target.close().await;
    }

    /// Run a full comparison.
    ///
    /// Returns `Err` only when a side is unreachable; everything else,
    /// including cancellation, ends in an `Ok` result whose `outcome` says
    /// how far the run got.
    pub async fn run(&mut self) -> Result<ComparisonResult, DiffError> {
        self.result = ComparisonResult::new(
            self.source_info.clone(),
            self.target_info.clone(),
            self.options.mode,
            self.options.scope.clone(),
        );
        self.stop.deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);

        match self.drive().await {
            Ok(outcome) => {
                let completed = outcome == RunOutcome::Completed;
                if completed {
                    self.enter(ComparisonPhase::Done);
                }
                self.result.finish(outcome);
                self.progress.finish(completed);
                Ok(self.result.clone())
            }
            Err(err) => {
                let phase = self.phase;
                warn!("comparison failed while {phase}: {err}");
                self.enter(ComparisonPhase::Failed);
                self.result.summarize();
                self.result.finish(RunOutcome::Failed {
                    phase,
                    error: err.to_string(),
                });
                self.progress.finish(false);
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<RunOutcome, DiffError> {
        self.enter(ComparisonPhase::Init);
        self.progress.plan(2);
        self.connect().await?;
        if let Some(outcome) = self.checkpoint() {
            return Ok(outcome);
        }

        self.enter(ComparisonPhase::CountNodes);
        self.result.node_comparison = self.count(EntityKind::Node).await?;
        self.progress.complete_unit();
        if let Some(outcome) = self.checkpoint() {
            return Ok(outcome);
        }

        self.enter(ComparisonPhase::CountRelationships);
        self.result.relationship_comparison = self.count(EntityKind::Relationship).await?;
        self.progress.complete_unit();
        if let Some(outcome) = self.checkpoint() {
            return Ok(outcome);
        }

        self.enter(ComparisonPhase::CompareTypes);
        if let Some(outcome) = self.compare_types().await? {
            return Ok(outcome);
        }

        self.enter(ComparisonPhase::Summarize);
        self.result.summarize();
        Ok(RunOutcome::Completed)
    }

    fn enter(&mut self, phase: ComparisonPhase) {
        self.phase = phase;
        info!("{phase}");
        self.progress.set_phase(phase);
    }

    fn checkpoint(&mut self) -> Option<RunOutcome> {
        if !self.stop.fired() {
            return None;
        }
        info!("comparison cancelled while {}", self.phase);
        self.result.summarize();
        Some(RunOutcome::Cancelled { phase: self.phase })
    }

    /// Both sides must answer a trivial query before any work starts.
    async fn connect(&mut self) -> Result<(), DiffError> {
        let ping = GraphQuery::Ping;
        let (source, target) = tokio::join!(self.source.run_query(&ping), self.target.run_query(&ping));
        source.map_err(|err| DiffError::connection(Side::Source, err))?;
        target.map_err(|err| DiffError::connection(Side::Target, err))?;
        Ok(())
    }

    async fn count(&mut self, kind: EntityKind) -> Result<CountComparison, DiffError> {
        let Self {
            source,
            target,
            options,
            progress,
            ..
        } = self;
        let scope = &options.scope;

        let (source_counts, target_counts) = progress
            .track(async {
                tokio::join!(
                    count_side(&mut *source, kind, scope),
                    count_side(&mut *target, kind, scope),
                )
            })
            .await;

        let source_counts = source_counts.map_err(|err| DiffError::connection(Side::Source, err))?;
        let target_counts = target_counts.map_err(|err| DiffError::connection(Side::Target, err))?;
        Ok(CountComparison::from_sides(source_counts, target_counts))
    }

    /// Compare the content of every node label, in name order.
    ///
    /// Returns the cancellation outcome if the run was stopped part way.
    async fn compare_types(&mut self) -> Result<Option<RunOutcome>, DiffError> {
        let nodes = &self.result.node_comparison;
        let labels: BTreeSet<String> = nodes
            .source_counts
            .keys()
            .chain(nodes.target_counts.keys())
            .cloned()
            .collect();
        let planned = labels
            .iter()
            .filter(|label| !self.result.node_comparison.source_known_empty(label))
            .count() as u64;
        self.progress.plan(2 + planned);

        for label in labels {
            if let Some(outcome) = self.checkpoint() {
                return Ok(Some(outcome));
            }

            if self.result.node_comparison.source_known_empty(&label) {
                debug!("{label}: no source entities, skipping content comparison");
                self.result
                    .type_comparisons
                    .insert(label.clone(), TypeComparison::skipped(label, SkipReason::EmptySource));
                continue;
            }

            let mut comparison = TypeComparison::new(&label);
            let run = self.compare_type(&label, &mut comparison).await;

            match run {
                Ok(TypeRun::Finished) => {}
                Ok(TypeRun::Cancelled) => {
                    comparison.status = TypeStatus::Cancelled;
                    self.result.type_comparisons.insert(label, comparison);
                    self.result.summarize();
                    return Ok(Some(RunOutcome::Cancelled { phase: self.phase }));
                }
                Err((side, err)) if err.is_fatal() => {
                    comparison.status = TypeStatus::Failed {
                        error: format!("{side}: {err}"),
                    };
                    self.result.type_comparisons.insert(label, comparison);
                    return Err(DiffError::connection(side, err));
                }
                Err((side, err)) => {
                    warn!("{label}: comparison failed on {side}: {err}");
                    comparison.status = TypeStatus::Failed {
                        error: format!("{side}: {err}"),
                    };
                }
            }

            self.result.type_comparisons.insert(label, comparison);
            self.progress.complete_unit();
        }

        Ok(None)
    }

    async fn compare_type(&mut self, label: &str, out: &mut TypeComparison) -> SideResult<TypeRun> {
        let Self {
            source,
            target,
            options,
            progress,
            stop,
            ..
        } = self;
        let candidates = options.keys.candidates_for(label);
        let page_size = options.mode.page_size();
        let cap = options.max_reported_differences;

        let (source_keys, target_keys) = progress
            .track(async {
                tokio::join!(
                    resolve_keys(&mut *source, label, candidates, page_size),
                    resolve_keys(&mut *target, label, candidates, page_size),
                )
            })
            .await;
        let source_keys = source_keys.map_err(on(Side::Source))?;
        let target_keys = target_keys.map_err(on(Side::Target))?;
        out.source_key_property = source_keys.property.clone();
        out.target_key_property = target_keys.property.clone();

        let Some(property) = source_keys.property else {
            out.status = TypeStatus::Skipped {
                reason: SkipReason::NoIdentifyingProperty,
            };
            return Ok(TypeRun::Finished);
        };

        let target_universe = if target_keys.property.as_deref() == Some(property.as_str()) {
            target_keys.keys
        } else {
            if let Some(target_property) = &target_keys.property {
                warn!("{label}: source keyed by '{property}', target by '{target_property}'; matching on '{property}'");
            }
            if options.mode.is_full() {
                progress
                    .track(read_keys(&mut *target, label, &property, None))
                    .await
                    .map_err(on(Side::Target))?
            } else {
                BTreeSet::new()
            }
        };

        let source_keys: Vec<String> = source_keys.keys.into_iter().collect();
        let chunk_size = options.batch.chunk_size_for(label);
        progress.begin_type(label, source_keys.len() as u64);

        for chunk in source_keys.chunks(chunk_size) {
            if stop.fired() {
                return Ok(TypeRun::Cancelled);
            }

            let (source_batch, target_batch) = progress
                .track(async {
                    tokio::join!(
                        fetch_batch(&mut *source, label, &property, chunk),
                        fetch_batch(&mut *target, label, &property, chunk),
                    )
                })
                .await;
            let source_batch = source_batch.map_err(on(Side::Source))?;
            let target_batch = target_batch.map_err(on(Side::Target))?;

            for key in chunk {
                out.keys_compared += 1;
                match (source_batch.get(key), target_batch.get(key)) {
                    (Some(source_data), Some(target_data)) if equivalent(Some(source_data), Some(target_data)) => {
                        out.identical += 1;
                    }
                    (Some(source_data), Some(target_data)) => {
                        out.different += 1;
                        out.push_difference(
                            Difference::Different {
                                key: key.clone(),
                                source_data: source_data.clone(),
                                target_data: target_data.clone(),
                                changed_fields: changed_fields(source_data, target_data),
                            },
                            cap,
                        );
                    }
                    (Some(source_data), None) => {
                        out.missing_in_target += 1;
                        out.push_difference(
                            Difference::MissingInTarget {
                                key: key.clone(),
                                source_data: Some(source_data.clone()),
                            },
                            cap,
                        );
                    }
                    (None, _) => debug!("{label}: source key {key} disappeared during the run"),
                }
            }
            progress.advance_items(chunk.len() as u64);
        }

        if !options.mode.is_full() {
            return Ok(TypeRun::Finished);
        }
        if stop.fired() {
            return Ok(TypeRun::Cancelled);
        }

        let source_set: HashSet<&String> = source_keys.iter().collect();
        let target_only: Vec<String> = target_universe
            .into_iter()
            .filter(|key| !source_set.contains(key))
            .collect();
        out.missing_in_source = target_only.len() as u64;
        if target_only.is_empty() {
            return Ok(TypeRun::Finished);
        }

        let room = cap.saturating_sub(out.differences.len());
        let reported = &target_only[..room.min(target_only.len())];
        progress.extend_items(reported.len() as u64);
        for chunk in reported.chunks(chunk_size) {
            let target_batch = progress
                .track(fetch_batch(&mut *target, label, &property, chunk))
                .await
                .map_err(on(Side::Target))?;
            for key in chunk {
                out.push_difference(
                    Difference::MissingInSource {
                        key: key.clone(),
                        target_data: target_batch.get(key).cloned(),
                    },
                    cap,
                );
            }
            progress.advance_items(chunk.len() as u64);
        }
        if target_only.len() > reported.len() {
            out.truncated = true;
        }

        Ok(TypeRun::Finished)
    }
}

/// Compare `source` against `target` with a fresh comparator.
pub async fn compare<S, T>(source: S, target: T, options: CompareOptions) -> Result<ComparisonResult, DiffError>
where
    S: GraphSession,
    T: GraphSession,
{
    let mut comparator = Comparator::new(source, target, options);
    let result = comparator.run().await;
    comparator.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryGraph;
    use serde_json::json;

    fn papers(titles: &[(&str, &str)]) -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        for (id, title) in titles {
            graph.add_node(&["Paper"], json!({ "arxiv_id": id, "title": title }));
        }
        graph
    }

    #[tokio::test]
    async fn phases_end_in_done() {
        let mut comparator = Comparator::new(
            papers(&[("1", "A")]),
            papers(&[("1", "A")]),
            CompareOptions::default(),
        );
        let result = comparator.run().await.unwrap();
        assert_eq!(comparator.phase(), ComparisonPhase::Done);
        assert!(result.is_identical());
    }

    #[tokio::test]
    async fn unreachable_target_fails_the_run() {
        let mut comparator = Comparator::new(
            papers(&[("1", "A")]),
            papers(&[("1", "A")]).unreachable(),
            CompareOptions::default(),
        );
        let err = comparator.run().await.unwrap_err();
        assert!(matches!(err, DiffError::Connection { side: Side::Target, .. }));
        assert_eq!(comparator.phase(), ComparisonPhase::Failed);
        assert!(matches!(
            comparator.partial().outcome,
            RunOutcome::Failed {
                phase: ComparisonPhase::Init,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failing_type_is_recorded_and_siblings_continue() {
        let source = papers(&[("1", "A")]).with_node("Dataset", json!({ "id": "d1" }));
        let target = papers(&[("1", "A")])
            .with_node("Dataset", json!({ "id": "d1" }))
            .fail_type("Dataset");
        let result = compare(source, target, CompareOptions::default()).await.unwrap();

        assert!(matches!(
            result.type_comparisons["Dataset"].status,
            TypeStatus::Failed { .. }
        ));
        assert_eq!(result.type_comparisons["Paper"].identical, 1);
        assert!(!result.summary.content_match);
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn differences_list_is_capped_but_tallies_are_not() {
        let source = papers(&[("1", "A"), ("2", "B"), ("3", "C")]);
        let target = papers(&[("1", "x"), ("2", "y"), ("3", "z")]);
        let options = CompareOptions {
            max_reported_differences: 2,
            ..CompareOptions::default()
        };
        let result = compare(source, target, options).await.unwrap();
        let paper = &result.type_comparisons["Paper"];
        assert_eq!(paper.different, 3);
        assert_eq!(paper.differences.len(), 2);
        assert!(paper.truncated);
        match &paper.differences[0] {
            Difference::Different { changed_fields, .. } => assert_eq!(changed_fields, &vec!["title".to_string()]),
            other => panic!("unexpected difference {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_run_returns_partial_result() {
        let token = CancellationToken::new();
        token.cancel();
        let mut comparator = Comparator::new(papers(&[("1", "A")]), papers(&[("1", "A")]), CompareOptions::default())
            .with_cancellation(token);
        let result = comparator.run().await.unwrap();
        assert_eq!(
            result.outcome,
            RunOutcome::Cancelled {
                phase: ComparisonPhase::Init
            }
        );
        assert!(!result.is_identical());
    }
}
