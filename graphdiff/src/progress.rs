//! Progress reporting for long comparison runs.
//!
//! A run is planned as units of work: the two count phases plus one unit per
//! type whose content is compared. Within a type, progress is tracked in
//! items (keys) so the reporter can derive a throughput and an ETA.
//!
//! Updates are throttled: never more often than `min_interval`, and a
//! heartbeat is emitted every `max_interval` while a query is in flight so a
//! slow round trip never looks like a stalled run.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::info;
use serde::Serialize;
use tokio::time::Instant;

use crate::report::ComparisonPhase;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: ComparisonPhase,
    pub units_done: u64,
    pub units_total: u64,
    pub current_type: Option<String>,
    pub items_done: u64,
    pub items_total: u64,
    pub items_per_second: f64,
    pub eta: Option<Duration>,
    pub elapsed: Duration,
    pub finished: bool,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.units_total == 0 {
            return if self.finished { 100.0 } else { 0.0 };
        }
        ((self.units_done as f64 / self.units_total as f64) * 100.0).min(100.0)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.units_done, self.units_total, self.phase)?;
        if let Some(current) = &self.current_type {
            write!(f, " {current} {}/{}", self.items_done, self.items_total)?;
            if self.items_per_second > 0.0 {
                write!(f, " ({:.1}/s)", self.items_per_second)?;
            }
        }
        if let Some(eta) = self.eta {
            write!(f, " eta {}s", eta.as_secs())?;
        }
        Ok(())
    }
}

/// Destination of progress updates.
pub trait ProgressSink {
    fn update(&mut self, snapshot: &ProgressSnapshot);

    /// Called exactly once when the run ends, whatever the outcome.
    fn finish(&mut self, snapshot: &ProgressSnapshot);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn update(&mut self, _snapshot: &ProgressSnapshot) {}

    fn finish(&mut self, _snapshot: &ProgressSnapshot) {}
}

/// Writes updates to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&mut self, snapshot: &ProgressSnapshot) {
        info!("{snapshot}");
    }

    fn finish(&mut self, snapshot: &ProgressSnapshot) {
        info!(
            "{} after {:.1}s ({:.0}% of planned work)",
            snapshot.phase,
            snapshot.elapsed.as_secs_f64(),
            snapshot.percent()
        );
    }
}

pub struct ProgressReporter {
    sink: Box<dyn ProgressSink>,
    min_interval: Duration,
    max_interval: Duration,
    started: Instant,
    last_emit: Option<Instant>,
    phase: ComparisonPhase,
    units_done: u64,
    units_total: u64,
    current_type: Option<String>,
    type_started: Instant,
    items_done: u64,
    items_total: u64,
    finished: bool,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("phase", &self.phase)
            .field("units_done", &self.units_done)
            .field("units_total", &self.units_total)
            .field("current_type", &self.current_type)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(NoopProgress)
    }
}

impl ProgressReporter {
    pub fn new(sink: impl ProgressSink + 'static) -> Self {
        let now = Instant::now();
        Self {
            sink: Box::new(sink),
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            started: now,
            last_emit: None,
            phase: ComparisonPhase::Init,
            units_done: 0,
            units_total: 0,
            current_type: None,
            type_started: now,
            items_done: 0,
            items_total: 0,
            finished: false,
        }
    }

    pub fn with_intervals(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self.max_interval = max_interval.max(min_interval);
        self
    }

    /// Set the number of planned units of work.
    pub fn plan(&mut self, units_total: u64) {
        self.units_total = units_total;
        self.units_done = self.units_done.min(units_total);
    }

    /// Phase changes are always reported.
    pub fn set_phase(&mut self, phase: ComparisonPhase) {
        self.phase = phase;
        self.emit();
    }

    pub fn begin_type(&mut self, name: &str, items_total: u64) {
        self.current_type = Some(name.to_string());
        self.type_started = Instant::now();
        self.items_done = 0;
        self.items_total = items_total;
        self.maybe_emit();
    }

    /// Raise the item total of the current type, e.g. once target-only keys are known.
    pub fn extend_items(&mut self, extra: u64) {
        self.items_total = self.items_total.saturating_add(extra);
    }

    pub fn advance_items(&mut self, items: u64) {
        self.items_done = self.items_done.saturating_add(items);
        self.maybe_emit();
    }

    pub fn complete_unit(&mut self) {
        self.units_done = self.units_done.saturating_add(1);
        self.current_type = None;
        self.maybe_emit();
    }

    /// Drive `fut` to completion, emitting a heartbeat every `max_interval` while it is pending.
    pub async fn track<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            let wait = self.max_interval.saturating_sub(self.since_last_emit());
            tokio::select! {
                biased;
                output = &mut fut => return output,
                _ = tokio::time::sleep(wait) => self.emit(),
            }
        }
    }

    /// Emit the final snapshot. On success the run is shown as complete;
    /// otherwise the tallies stay where they stopped.
    pub fn finish(&mut self, completed: bool) {
        if self.finished {
            return;
        }
        if completed {
            self.units_done = self.units_total;
            self.items_done = self.items_total;
        }
        self.finished = true;
        let snapshot = self.snapshot();
        self.sink.finish(&snapshot);
        self.last_emit = Some(Instant::now());
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        let type_elapsed = self.type_started.elapsed().as_secs_f64();
        let items_per_second = if self.current_type.is_some() && type_elapsed > 0.0 {
            self.items_done as f64 / type_elapsed
        } else {
            0.0
        };

        ProgressSnapshot {
            phase: self.phase,
            units_done: self.units_done,
            units_total: self.units_total,
            current_type: self.current_type.clone(),
            items_done: self.items_done,
            items_total: self.items_total,
            items_per_second,
            eta: self.eta(elapsed, items_per_second),
            elapsed,
            finished: self.finished,
        }
    }

    /// Remaining time, from item throughput inside a type, otherwise from unit pace.
    fn eta(&self, elapsed: Duration, items_per_second: f64) -> Option<Duration> {
        if self.finished {
            return None;
        }
        if items_per_second > 0.0 && self.items_total > self.items_done {
            let remaining = (self.items_total - self.items_done) as f64 / items_per_second;
            return Some(Duration::from_secs_f64(remaining));
        }
        if self.units_done == 0 || self.units_done >= self.units_total {
            return None;
        }
        let per_unit = elapsed.as_secs_f64() / self.units_done as f64;
        Some(Duration::from_secs_f64(per_unit * (self.units_total - self.units_done) as f64))
    }

    fn since_last_emit(&self) -> Duration {
        self.last_emit.unwrap_or(self.started).elapsed()
    }

    fn maybe_emit(&mut self) {
        if self.last_emit.is_none() || self.since_last_emit() >= self.min_interval {
            self.emit();
        }
    }

    fn emit(&mut self) {
        if self.finished {
            return;
        }
        let snapshot = self.snapshot();
        self.sink.update(&snapshot);
        self.last_emit = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        updates: Arc<Mutex<Vec<ProgressSnapshot>>>,
        finals: Arc<Mutex<Vec<ProgressSnapshot>>>,
    }

    impl ProgressSink for Recorder {
        fn update(&mut self, snapshot: &ProgressSnapshot) {
            self.updates.lock().unwrap().push(snapshot.clone());
        }

        fn finish(&mut self, snapshot: &ProgressSnapshot) {
            self.finals.lock().unwrap().push(snapshot.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_throttled_to_min_interval() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(recorder.clone());
        reporter.plan(3);
        reporter.begin_type("Paper", 100);
        for _ in 0..50 {
            reporter.advance_items(1);
        }
        assert_eq!(recorder.updates.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(300)).await;
        reporter.advance_items(1);
        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].items_done, 51);
        assert!(updates[1].items_per_second > 0.0);
        assert!(updates[1].eta.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_while_query_in_flight() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(recorder.clone());
        let value = reporter
            .track(async {
                tokio::time::sleep(Duration::from_secs(12)).await;
                7
            })
            .await;
        assert_eq!(value, 7);
        assert_eq!(recorder.updates.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_reports_completion_once() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(recorder.clone());
        reporter.plan(4);
        reporter.complete_unit();
        reporter.finish(true);
        reporter.finish(true);
        let finals = recorder.finals.lock().unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].units_done, 4);
        assert_eq!(finals[0].percent(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_on_failure_keeps_tallies() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(recorder.clone());
        reporter.plan(4);
        reporter.complete_unit();
        reporter.finish(false);
        let finals = recorder.finals.lock().unwrap();
        assert_eq!(finals[0].units_done, 1);
        assert!(finals[0].finished);
    }
}
