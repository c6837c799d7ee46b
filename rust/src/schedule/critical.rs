//! Slack and critical flags derived from early and late dates.

use chrono::Duration;

use crate::graph::DependencyGraph;
use crate::models::{DateRange, TaskId};

use super::record::ScheduleMode;

/// Flags tasks whose slack is at or below a threshold.
///
/// A zero threshold reports only the tightest path; a positive one also flags
/// near-critical paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CriticalPathDetector {
    pub threshold: Duration,
}

impl Default for CriticalPathDetector {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl CriticalPathDetector {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// `late.start - early.start`. Negative when a deadline is missed.
    pub fn slack(early: DateRange, late: DateRange) -> Duration {
        late.start - early.start
    }

    pub fn is_critical(&self, slack: Duration) -> bool {
        slack <= self.threshold
    }

    /// Slack of a real task from its stored records, if both are computed.
    pub fn task_slack(&self, graph: &DependencyGraph, id: TaskId) -> Option<Duration> {
        let task = graph.task(id).ok()?;
        if task.is_sentinel() {
            return None;
        }
        let early = task.record(ScheduleMode::Early).dates?;
        let late = task.record(ScheduleMode::Late).dates?;
        Some(Self::slack(early, late))
    }

    /// Critical real tasks, by id.
    pub fn critical_tasks(&self, graph: &DependencyGraph) -> Vec<TaskId> {
        graph
            .tasks()
            .filter(|task| {
                self.task_slack(graph, task.id)
                    .is_some_and(|slack| self.is_critical(slack))
            })
            .map(|task| task.id)
            .collect()
    }
}
