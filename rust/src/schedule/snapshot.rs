//! Immutable per-pass results for concurrent readers.

use chrono::Duration;
use rustc_hash::FxHashMap;

use crate::graph::DependencyGraph;
use crate::models::{DateRange, TaskId};

use super::critical::CriticalPathDetector;
use super::record::{ConstraintConflict, ScheduleMode};
use super::tracker::Epoch;

/// Dates and criticality of one real task at the end of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskSchedule {
    pub early: Option<DateRange>,
    pub late: Option<DateRange>,
    pub current: Option<DateRange>,
    pub slack: Option<Duration>,
    pub critical: bool,
}

/// Everything a reader needs from one completed pass.
///
/// Built once per pass and shared behind an `Arc`; never mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct ScheduleSnapshot {
    pub epoch: Epoch,
    pub span: Option<DateRange>,
    pub tasks: FxHashMap<TaskId, TaskSchedule>,
    pub conflicts: Vec<ConstraintConflict>,
}

impl ScheduleSnapshot {
    /// Copy the graph's current records. Sentinels are left out.
    pub fn capture(
        graph: &DependencyGraph,
        detector: &CriticalPathDetector,
        epoch: Epoch,
        span: Option<DateRange>,
        conflicts: Vec<ConstraintConflict>,
    ) -> Self {
        let tasks = graph
            .tasks()
            .map(|task| {
                let slack = detector.task_slack(graph, task.id);
                let schedule = TaskSchedule {
                    early: task.record(ScheduleMode::Early).dates,
                    late: task.record(ScheduleMode::Late).dates,
                    current: task.record(ScheduleMode::Current).dates,
                    slack,
                    critical: slack.is_some_and(|s| detector.is_critical(s)),
                };
                (task.id, schedule)
            })
            .collect();

        Self {
            epoch,
            span,
            tasks,
            conflicts,
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskSchedule> {
        self.tasks.get(&id)
    }

    /// Critical task ids, sorted.
    pub fn critical_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, schedule)| schedule.critical)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}
