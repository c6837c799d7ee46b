//! Summary task dates from their children.

use crate::graph::DependencyGraph;
use crate::models::{DateRange, TaskId};

use super::record::{CalcOutcome, ScheduleMode};
use super::tracker::Epoch;

/// Roll child dates up into every summary task, deepest first, for all modes.
///
/// A summary's range is the min start and max finish over its direct
/// children. Children are summaries or leaves; deeper summaries are settled
/// before their parents read them. Returns how many summary records changed.
pub fn roll_up_summaries(graph: &mut DependencyGraph, epoch: Epoch) -> usize {
    let mut changed = 0;
    for id in graph.summaries_by_depth() {
        for mode in ScheduleMode::ALL {
            let Some(dates) = children_range(graph, id, mode) else {
                continue;
            };
            if let Ok(task) = graph.task_mut(id) {
                if task.record_mut(mode).store(dates, epoch) == CalcOutcome::Changed {
                    changed += 1;
                }
            }
        }
    }
    changed
}

fn children_range(graph: &DependencyGraph, id: TaskId, mode: ScheduleMode) -> Option<DateRange> {
    let task = graph.task(id).ok()?;
    task.children
        .iter()
        .filter_map(|child| graph.task(*child).ok())
        .filter_map(|child| child.record(mode).dates)
        .reduce(DateRange::union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskSpec;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn d(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_nested_rollup_min_start_max_finish() {
        let mut graph = DependencyGraph::new();
        let top = graph.add_task(TaskSpec::new("top", Duration::zero())).unwrap();
        let mid = graph
            .add_task(TaskSpec::new("mid", Duration::zero()).with_parent(top))
            .unwrap();
        let x = graph
            .add_task(TaskSpec::new("x", Duration::days(3)).with_parent(mid))
            .unwrap();
        let y = graph
            .add_task(TaskSpec::new("y", Duration::days(5)).with_parent(mid))
            .unwrap();
        let z = graph
            .add_task(TaskSpec::new("z", Duration::days(1)).with_parent(top))
            .unwrap();

        let epoch = Epoch(1);
        let set = |graph: &mut DependencyGraph, id, start, finish| {
            let record = graph.task_mut(id).unwrap().record_mut(ScheduleMode::Early);
            record.store(DateRange::new(start, finish), epoch);
        };
        set(&mut graph, x, d(2025, 1, 3), d(2025, 1, 6));
        set(&mut graph, y, d(2025, 1, 2), d(2025, 1, 7));
        set(&mut graph, z, d(2025, 1, 8), d(2025, 1, 9));

        roll_up_summaries(&mut graph, epoch);

        let early = |graph: &DependencyGraph, id| graph.task(id).unwrap().record(ScheduleMode::Early).dates;
        assert_eq!(early(&graph, mid), Some(DateRange::new(d(2025, 1, 2), d(2025, 1, 7))));
        assert_eq!(early(&graph, top), Some(DateRange::new(d(2025, 1, 2), d(2025, 1, 9))));
        assert!(graph.task(top).unwrap().record(ScheduleMode::Early).is_current());
        // Modes with no child dates are left alone.
        assert_eq!(graph.task(top).unwrap().record(ScheduleMode::Late).dates, None);
    }
}
