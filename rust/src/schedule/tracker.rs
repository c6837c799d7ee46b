//! Calculation epochs and dirty-state bookkeeping.

use chrono::NaiveDateTime;

use crate::graph::DependencyGraph;
use crate::models::{DateRange, TaskId};

/// Monotonic per-project pass counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Stored by records that must be recomputed on the next pass.
    pub const STALE: Epoch = Epoch(0);
}

/// What the next pass has to cover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirtyState {
    #[default]
    Clean,
    /// Only one task (and whatever depends on it) changed.
    Single(TaskId),
    Full,
}

/// Tracks the epoch counter, pending dirty state and the project bounds.
#[derive(Clone, Debug, Default)]
pub struct DirtyTracker {
    epoch: Epoch,
    dirty: DirtyState,
    earliest_start: Option<NaiveDateTime>,
    latest_finish: Option<NaiveDateTime>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the most recent pass. `Epoch::STALE` before the first pass.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.epoch.0
    }

    /// Advance the epoch for a new pass. Called exactly once per pass.
    pub fn begin_pass(&mut self) -> Epoch {
        self.epoch = Epoch(self.epoch.0 + 1);
        self.epoch
    }

    pub fn dirty(&self) -> DirtyState {
        self.dirty
    }

    /// Record a single-task edit. A second, different task widens to `Full`.
    pub fn mark_single(&mut self, task: TaskId) {
        self.dirty = match self.dirty {
            DirtyState::Clean => DirtyState::Single(task),
            DirtyState::Single(existing) if existing == task => DirtyState::Single(task),
            _ => DirtyState::Full,
        };
    }

    pub fn mark_full(&mut self) {
        self.dirty = DirtyState::Full;
    }

    /// Hand the pending state to a pass, leaving the tracker clean.
    pub fn take_dirty(&mut self) -> DirtyState {
        std::mem::take(&mut self.dirty)
    }

    /// Make every record in the graph stale so the next pass recomputes it.
    pub fn reset_all(&mut self, graph: &mut DependencyGraph) {
        graph.reset_records();
        self.dirty = DirtyState::Full;
    }

    pub fn set_bounds(&mut self, span: DateRange) {
        self.earliest_start = Some(span.start);
        self.latest_finish = Some(span.finish);
    }

    pub fn span(&self) -> Option<DateRange> {
        match (self.earliest_start, self.latest_finish) {
            (Some(start), Some(finish)) => Some(DateRange::new(start, finish)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_increments_once_per_pass() {
        let mut tracker = DirtyTracker::new();
        assert_eq!(tracker.epoch(), Epoch::STALE);
        assert_eq!(tracker.begin_pass(), Epoch(1));
        assert_eq!(tracker.begin_pass(), Epoch(2));
        assert_eq!(tracker.pass_count(), 2);
    }

    #[test]
    fn test_single_edits_coalesce() {
        let mut tracker = DirtyTracker::new();
        tracker.mark_single(TaskId(3));
        tracker.mark_single(TaskId(3));
        assert_eq!(tracker.dirty(), DirtyState::Single(TaskId(3)));
        tracker.mark_single(TaskId(4));
        assert_eq!(tracker.dirty(), DirtyState::Full);
        assert_eq!(tracker.take_dirty(), DirtyState::Full);
        assert_eq!(tracker.dirty(), DirtyState::Clean);
    }

    #[test]
    fn test_reset_all_marks_records_stale() {
        let mut graph = DependencyGraph::new();
        let mut tracker = DirtyTracker::new();
        tracker.reset_all(&mut graph);
        assert_eq!(tracker.dirty(), DirtyState::Full);
        for task in graph.all_tasks() {
            assert!(task.records().iter().all(|r| r.needs_recalc()));
        }
    }
}
