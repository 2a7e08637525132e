//! graphdiff core library.
//!
//! Reconciles two property-graph instances: discovers their schema, compares
//! per-type cardinalities, resolves a stable identity per node label and
//! compares entity content in batches. The [`Comparator`] drives a run and
//! produces a [`ComparisonResult`] that serializes to the JSON report.

pub mod comparator;
pub mod counter;
pub mod equivalence;
pub mod errors;
pub mod fetch;
pub mod identity;
pub mod progress;
pub mod query;
pub mod report;
pub mod schema;
pub mod session;

pub use comparator::{Comparator, CompareOptions, compare};
pub use errors::*;
pub use counter::SideCounts;
pub use fetch::BatchSizing;
pub use identity::{CandidateKeys, KeyStrategy};
pub use progress::{LogProgress, NoopProgress, ProgressReporter, ProgressSink, ProgressSnapshot};
pub use query::{EntityKind, GraphQuery, PropertyMap, Row};
pub use report::{
    CompareMode, ComparisonPhase, ComparisonResult, CountComparison, Difference, EndpointInfo, RunOutcome, Side,
    SkipReason, Summary, TypeComparison, TypeStatus,
};
pub use schema::SchemaScope;
pub use session::{Endpoint, GraphSession, MemoryGraph, Neo4jSession};

// Re-export the cancellation token so callers don't need a direct tokio-util dependency
pub use tokio_util::sync::CancellationToken;
