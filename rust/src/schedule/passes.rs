//! The three-phase CPM pass over the traversal order.
//!
//! Phase 1 walks the order forward and fills early dates. Phase 2 walks it
//! backward from the finish boundary and fills late dates, but only when the
//! edit can have moved them. Phase 3 fills current dates and only runs when
//! some task is scheduled as late as possible; otherwise current dates are
//! the early dates. Summary tasks are never visited; their dates are rolled
//! up once the leaves are done.
//!
//! Every phase is incremental: a task is recomputed only when its record is
//! stale or one of its drivers changed earlier in the same sweep.

use chrono::NaiveDateTime;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::calendar::Calendar;
use crate::graph::{DependencyGraph, FINISH, START};
use crate::models::{ConstraintType, DateRange, ProjectSettings, TaskId};
use crate::{log_debug, log_passes, log_tasks};

use super::record::{CalcContext, CalcOutcome, ConstraintConflict, ScheduleMode};
use super::rollup::roll_up_summaries;
use super::tracker::{DirtyTracker, Epoch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    /// Incremental pass after an edit to one task.
    Fast(TaskId),
    /// Every record was reset beforehand.
    Full,
}

/// Summary of one completed pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    pub epoch: Epoch,
    pub kind: PassKind,
    pub backward_ran: bool,
    pub current_ran: bool,
    /// Task records recomputed across all phases.
    pub recomputed: usize,
    /// Every conflict known after the pass, by task id.
    pub conflicts: Vec<ConstraintConflict>,
}

/// Bounds derived from a task's drivers for one sweep.
#[derive(Default)]
struct Bounds {
    start: Option<NaiveDateTime>,
    finish: Option<NaiveDateTime>,
}

impl Bounds {
    fn latest(slot: &mut Option<NaiveDateTime>, candidate: NaiveDateTime) {
        *slot = Some(slot.map_or(candidate, |current| current.max(candidate)));
    }

    fn earliest(slot: &mut Option<NaiveDateTime>, candidate: NaiveDateTime) {
        *slot = Some(slot.map_or(candidate, |current| current.min(candidate)));
    }
}

/// Runs passes over one graph. Holds the borrows a pass needs and nothing else.
pub struct PassRunner<'a> {
    graph: &'a mut DependencyGraph,
    calendar: &'a dyn Calendar,
    settings: ProjectSettings,
    conflicts: &'a mut FxHashMap<TaskId, ConstraintConflict>,
    honor_required_dates: bool,
    verbosity: u8,
}

impl<'a> PassRunner<'a> {
    pub fn new(
        graph: &'a mut DependencyGraph,
        calendar: &'a dyn Calendar,
        settings: ProjectSettings,
        conflicts: &'a mut FxHashMap<TaskId, ConstraintConflict>,
    ) -> Self {
        Self {
            graph,
            calendar,
            settings,
            conflicts,
            honor_required_dates: false,
            verbosity: 0,
        }
    }

    pub fn honor_required_dates(mut self, honor: bool) -> Self {
        self.honor_required_dates = honor;
        self
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Run one pass. Advances the tracker's epoch exactly once.
    pub fn run(mut self, tracker: &mut DirtyTracker, kind: PassKind) -> PassReport {
        let epoch = tracker.begin_pass();
        let v = self.verbosity;
        log_passes!(v, "Pass {} started ({:?})", epoch.0, kind);

        let mut recomputed = 0;
        let project_start = self.calendar.normalize_boundary(self.settings.start);

        // Phase 1
        let no_force = FxHashSet::default();
        let early_changed =
            self.sweep_forward(ScheduleMode::Early, epoch, project_start, &no_force, &mut recomputed);
        tracker.set_bounds(self.project_span(project_start));

        let finish_early = self
            .dates(FINISH, ScheduleMode::Early)
            .map_or(project_start, |dates| dates.finish);
        let boundary = self.backward_boundary(finish_early);

        // Phase 2
        let backward_ran = self.affects_critical_path(kind, boundary);
        if backward_ran {
            self.sweep_backward(epoch, boundary, &mut recomputed);
        } else {
            log_debug!(v, "  Backward pass skipped: late dates unaffected");
        }

        // Phase 3
        let current_ran = self.has_reverse_scheduled();
        if current_ran {
            self.sweep_forward(
                ScheduleMode::Current,
                epoch,
                project_start,
                &early_changed,
                &mut recomputed,
            );
        } else {
            self.copy_early_to_current();
        }

        let rolled = roll_up_summaries(self.graph, epoch);
        log_debug!(v, "  Rolled up {} summary records", rolled);

        let mut conflicts: Vec<ConstraintConflict> = self.conflicts.values().copied().collect();
        conflicts.sort_by_key(|c| c.task);

        log_passes!(
            v,
            "Pass {} finished: {} records recomputed, backward={}, current={}, {} conflicts",
            epoch.0,
            recomputed,
            backward_ran,
            current_ran,
            conflicts.len()
        );

        PassReport {
            epoch,
            kind,
            backward_ran,
            current_ran,
            recomputed,
            conflicts,
        }
    }

    /// Forward sweep for `Early` or `Current` dates. Returns the tasks whose
    /// dates changed. Tasks in `force` are recomputed even when clean.
    fn sweep_forward(
        &mut self,
        mode: ScheduleMode,
        epoch: Epoch,
        project_start: NaiveDateTime,
        force: &FxHashSet<TaskId>,
        recomputed: &mut usize,
    ) -> FxHashSet<TaskId> {
        let v = self.verbosity;
        let mut changed = FxHashSet::default();
        let order = self.graph.order().to_vec();

        for id in order {
            if id == START {
                if self.store(START, mode, DateRange::at(project_start), epoch) {
                    changed.insert(START);
                }
                continue;
            }
            let Ok(task) = self.graph.task(id) else {
                continue;
            };
            let duration = task.duration;
            let constraint = task.constraint;
            let stale = task.record(mode).needs_recalc();
            let late = task.record(ScheduleMode::Late).dates;
            let reverse = mode == ScheduleMode::Current && constraint.is_reverse_scheduled();

            let moved = !changed.is_empty() && self.drivers_moved(id, true, &changed);
            if !(stale || moved || reverse || force.contains(&id)) {
                continue;
            }

            let bounds = self.forward_bounds(id, mode);
            let ctx = CalcContext {
                task: id,
                mode,
                epoch,
                calendar: self.calendar,
                duration,
                constraint,
                start_bound: bounds.start,
                finish_bound: bounds.finish,
                fallback: project_start,
                late,
                honor_required_dates: self.honor_required_dates,
            };
            let Ok(task) = self.graph.task_mut(id) else {
                continue;
            };
            let record = task.record_mut(mode);
            let before = record.dates;
            record.invalidate();
            let (outcome, conflict) = record.calc_dates(&ctx);
            let after = record.dates;
            *recomputed += 1;

            if mode == ScheduleMode::Early {
                self.conflicts.remove(&id);
                if let Some(conflict) = conflict {
                    log_tasks!(
                        v,
                        "  Conflict on {}: {:?} wants {} but links give {}",
                        id,
                        conflict.constraint,
                        conflict.required,
                        conflict.computed
                    );
                    self.conflicts.insert(id, conflict);
                }
            }
            if outcome == CalcOutcome::Changed {
                log_tasks!(v, "  {} {:?}: {:?} -> {:?}", id, mode, before, after);
                changed.insert(id);
            }
        }
        changed
    }

    fn sweep_backward(&mut self, epoch: Epoch, boundary: NaiveDateTime, recomputed: &mut usize) {
        let v = self.verbosity;
        let mut changed = FxHashSet::default();
        let order = self.graph.order().to_vec();

        for &id in order.iter().rev() {
            if id == FINISH {
                if self.store(FINISH, ScheduleMode::Late, DateRange::at(boundary), epoch) {
                    log_tasks!(v, "  Backward boundary moved to {}", boundary);
                    changed.insert(FINISH);
                }
                continue;
            }
            let Ok(task) = self.graph.task(id) else {
                continue;
            };
            let duration = task.duration;
            let constraint = task.constraint;
            let stale = task.record(ScheduleMode::Late).needs_recalc();

            let moved = !changed.is_empty() && self.drivers_moved(id, false, &changed);
            if !(stale || moved) {
                continue;
            }

            let bounds = self.backward_bounds(id);
            let ctx = CalcContext {
                task: id,
                mode: ScheduleMode::Late,
                epoch,
                calendar: self.calendar,
                duration,
                constraint,
                start_bound: bounds.start,
                finish_bound: bounds.finish,
                fallback: boundary,
                late: None,
                honor_required_dates: self.honor_required_dates,
            };
            let Ok(task) = self.graph.task_mut(id) else {
                continue;
            };
            let record = task.record_mut(ScheduleMode::Late);
            record.invalidate();
            let (outcome, _) = record.calc_dates(&ctx);
            *recomputed += 1;
            if outcome == CalcOutcome::Changed {
                log_tasks!(v, "  {} Late: {:?}", id, record.dates);
                changed.insert(id);
            }
        }
    }

    /// Latest start/finish the predecessors of a leaf allow.
    fn forward_bounds(&self, id: TaskId, mode: ScheduleMode) -> Bounds {
        let mut bounds = Bounds::default();
        for link in self.graph.incoming_links(id) {
            let Ok(dep) = self.graph.dependency(link) else {
                continue;
            };
            let Some(pred) = self.dates(dep.predecessor, mode) else {
                continue;
            };
            let anchor = if dep.relation.from_start() {
                pred.start
            } else {
                pred.finish
            };
            let candidate = self.calendar.add_duration(anchor, dep.lag);
            if dep.relation.to_start() {
                Bounds::latest(&mut bounds.start, candidate);
            } else {
                Bounds::latest(&mut bounds.finish, candidate);
            }
        }
        bounds
    }

    /// Earliest late start/finish the successors of a leaf allow.
    fn backward_bounds(&self, id: TaskId) -> Bounds {
        let mut bounds = Bounds::default();
        for link in self.graph.outgoing_links(id) {
            let Ok(dep) = self.graph.dependency(link) else {
                continue;
            };
            let Some(succ) = self.dates(dep.successor, ScheduleMode::Late) else {
                continue;
            };
            let anchor = if dep.relation.to_start() {
                succ.start
            } else {
                succ.finish
            };
            let candidate = self.calendar.subtract_duration(anchor, dep.lag);
            if dep.relation.from_start() {
                Bounds::earliest(&mut bounds.start, candidate);
            } else {
                Bounds::earliest(&mut bounds.finish, candidate);
            }
        }
        bounds
    }

    /// Whether any driver of `id` changed in the current sweep.
    fn drivers_moved(&self, id: TaskId, forward: bool, changed: &FxHashSet<TaskId>) -> bool {
        let links = if forward {
            self.graph.incoming_links(id)
        } else {
            self.graph.outgoing_links(id)
        };
        links.into_iter().any(|link| {
            self.graph.dependency(link).is_ok_and(|dep| {
                let driver = if forward { dep.predecessor } else { dep.successor };
                self.graph
                    .leaves_of(driver)
                    .iter()
                    .any(|leaf| changed.contains(leaf))
            })
        })
    }

    /// Dates of a task as a driver; summaries span their leaves.
    fn dates(&self, id: TaskId, mode: ScheduleMode) -> Option<DateRange> {
        self.graph
            .leaves_of(id)
            .into_iter()
            .filter_map(|leaf| self.graph.task(leaf).ok()?.record(mode).dates)
            .reduce(DateRange::union)
    }

    /// Store fixed dates on a sentinel. Returns whether they changed.
    fn store(&mut self, id: TaskId, mode: ScheduleMode, dates: DateRange, epoch: Epoch) -> bool {
        self.graph
            .task_mut(id)
            .map(|task| task.record_mut(mode).store(dates, epoch) == CalcOutcome::Changed)
            .unwrap_or(false)
    }

    /// Earliest start and latest finish over real leaf tasks.
    fn project_span(&self, project_start: NaiveDateTime) -> DateRange {
        self.graph
            .tasks()
            .filter(|task| !task.is_summary())
            .filter_map(|task| task.record(ScheduleMode::Early).dates)
            .reduce(DateRange::union)
            .unwrap_or(DateRange::at(project_start))
    }

    /// The instant the backward pass starts from. Records a conflict on the
    /// finish sentinel when the deadline is missed.
    fn backward_boundary(&mut self, finish_early: NaiveDateTime) -> NaiveDateTime {
        self.conflicts.remove(&FINISH);
        let Some(deadline) = self.settings.finish_deadline else {
            return finish_early;
        };
        let deadline = self.calendar.normalize_boundary(deadline);
        if finish_early > deadline {
            log_tasks!(
                self.verbosity,
                "  Finish deadline {} missed, project ends {}",
                deadline,
                finish_early
            );
            self.conflicts.insert(
                FINISH,
                ConstraintConflict {
                    task: FINISH,
                    constraint: ConstraintType::FinishNoLaterThan,
                    required: deadline,
                    computed: finish_early,
                },
            );
        }
        if self.honor_required_dates {
            deadline
        } else {
            finish_early.max(deadline)
        }
    }

    /// Whether late dates can have moved since the last pass.
    ///
    /// Conservative: duration and constraint edits invalidate the task's late
    /// record too, since its late start depends on them, so any real edit
    /// reaches the last check. Only a clean fast pass skips the backward sweep.
    fn affects_critical_path(&self, kind: PassKind, boundary: NaiveDateTime) -> bool {
        let trigger = match kind {
            PassKind::Full => return true,
            PassKind::Fast(trigger) => trigger,
        };
        let Ok(finish) = self.graph.task(FINISH) else {
            return true;
        };
        let finish_late = finish.record(ScheduleMode::Late);
        if !finish_late.is_current() || finish_late.dates != Some(DateRange::at(boundary)) {
            return true;
        }

        // The trigger now overruns its late window.
        let overruns = self.graph.leaves_of(trigger).into_iter().any(|leaf| {
            match (self.dates(leaf, ScheduleMode::Early), self.dates(leaf, ScheduleMode::Late)) {
                (Some(early), Some(late)) => early.finish > late.finish,
                _ => true,
            }
        });
        if overruns {
            return true;
        }

        self.graph.order().iter().any(|id| {
            self.graph
                .task(*id)
                .is_ok_and(|task| task.record(ScheduleMode::Late).needs_recalc())
        })
    }

    fn has_reverse_scheduled(&self) -> bool {
        self.graph
            .tasks()
            .any(|task| !task.is_summary() && task.constraint.is_reverse_scheduled())
    }

    fn copy_early_to_current(&mut self) {
        let order = self.graph.order().to_vec();
        for id in order {
            if let Ok(task) = self.graph.task_mut(id) {
                let early = *task.record(ScheduleMode::Early);
                *task.record_mut(ScheduleMode::Current) = early;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ContinuousCalendar;
    use crate::models::{Constraint, DependencySpec, RelationType, TaskSpec};
    use chrono::{Duration, NaiveDate};

    fn d(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn run(
        graph: &mut DependencyGraph,
        tracker: &mut DirtyTracker,
        settings: ProjectSettings,
        kind: PassKind,
    ) -> PassReport {
        let calendar = ContinuousCalendar::new();
        let mut conflicts = FxHashMap::default();
        PassRunner::new(graph, &calendar, settings, &mut conflicts).run(tracker, kind)
    }

    fn dates(graph: &DependencyGraph, id: TaskId, mode: ScheduleMode) -> DateRange {
        graph.task(id).unwrap().record(mode).dates.unwrap()
    }

    #[test]
    fn test_relation_types_and_lag() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(4))).unwrap();
        let ss = graph.add_task(TaskSpec::new("ss", Duration::days(2))).unwrap();
        let ff = graph.add_task(TaskSpec::new("ff", Duration::days(1))).unwrap();
        let fs = graph.add_task(TaskSpec::new("fs", Duration::days(1))).unwrap();
        graph
            .add_dependency(
                DependencySpec::finish_to_start(a, ss)
                    .with_relation(RelationType::StartToStart)
                    .with_lag(Duration::days(1)),
            )
            .unwrap();
        graph
            .add_dependency(DependencySpec::finish_to_start(a, ff).with_relation(RelationType::FinishToFinish))
            .unwrap();
        graph
            .add_dependency(DependencySpec::finish_to_start(a, fs).with_lag(Duration::days(-1)))
            .unwrap();

        let mut tracker = DirtyTracker::new();
        run(&mut graph, &mut tracker, ProjectSettings::new(d(2025, 1, 1)), PassKind::Full);

        assert_eq!(dates(&graph, ss, ScheduleMode::Early), DateRange::new(d(2025, 1, 2), d(2025, 1, 4)));
        assert_eq!(dates(&graph, ff, ScheduleMode::Early), DateRange::new(d(2025, 1, 4), d(2025, 1, 5)));
        assert_eq!(dates(&graph, fs, ScheduleMode::Early), DateRange::new(d(2025, 1, 4), d(2025, 1, 5)));
        assert_eq!(tracker.span(), Some(DateRange::new(d(2025, 1, 1), d(2025, 1, 5))));
    }

    #[test]
    fn test_start_to_finish_relation() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(4))).unwrap();
        let sf = graph.add_task(TaskSpec::new("sf", Duration::days(2))).unwrap();
        graph
            .add_dependency(
                DependencySpec::finish_to_start(a, sf)
                    .with_relation(RelationType::StartToFinish)
                    .with_lag(Duration::days(3)),
            )
            .unwrap();

        let mut tracker = DirtyTracker::new();
        run(&mut graph, &mut tracker, ProjectSettings::new(d(2025, 1, 1)), PassKind::Full);

        // sf may not finish before a starts plus the lag.
        assert_eq!(dates(&graph, sf, ScheduleMode::Early), DateRange::new(d(2025, 1, 2), d(2025, 1, 4)));
        // a has a real successor, so only sf feeds the finish sentinel.
        assert_eq!(dates(&graph, sf, ScheduleMode::Late), DateRange::new(d(2025, 1, 2), d(2025, 1, 4)));
        // a's late start is bounded by sf's late finish minus the lag.
        assert_eq!(dates(&graph, a, ScheduleMode::Late).start, d(2025, 1, 1));
    }

    #[test]
    fn test_duration_edit_moves_own_late_dates() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(2))).unwrap();
        let b = graph.add_task(TaskSpec::new("b", Duration::days(2))).unwrap();
        graph.add_task(TaskSpec::new("long", Duration::days(6))).unwrap();
        graph.add_dependency(DependencySpec::finish_to_start(a, b)).unwrap();
        let settings = ProjectSettings::new(d(2025, 1, 1));
        let mut tracker = DirtyTracker::new();
        run(&mut graph, &mut tracker, settings, PassKind::Full);
        assert_eq!(dates(&graph, a, ScheduleMode::Late), DateRange::new(d(2025, 1, 3), d(2025, 1, 5)));

        // The boundary stays put and nothing overruns, yet a's late start moves.
        graph.set_duration(a, Duration::days(1)).unwrap();
        let report = run(&mut graph, &mut tracker, settings, PassKind::Fast(a));
        assert!(report.backward_ran);
        assert_eq!(dates(&graph, a, ScheduleMode::Late), DateRange::new(d(2025, 1, 4), d(2025, 1, 5)));
    }

    #[test]
    fn test_fast_pass_recomputes_only_downstream() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(2))).unwrap();
        let b = graph.add_task(TaskSpec::new("b", Duration::days(2))).unwrap();
        let c = graph.add_task(TaskSpec::new("c", Duration::days(2))).unwrap();
        graph.add_dependency(DependencySpec::finish_to_start(a, b)).unwrap();
        let settings = ProjectSettings::new(d(2025, 1, 1));

        let mut tracker = DirtyTracker::new();
        run(&mut graph, &mut tracker, settings, PassKind::Full);

        graph.set_duration(b, Duration::days(5)).unwrap();
        let report = run(&mut graph, &mut tracker, settings, PassKind::Fast(b));
        assert_eq!(report.epoch, Epoch(2));
        assert!(report.backward_ran);
        assert_eq!(dates(&graph, b, ScheduleMode::Early).finish, d(2025, 1, 8));
        // c did not move in the forward sweep and only its late dates changed.
        assert_eq!(dates(&graph, c, ScheduleMode::Early).start, d(2025, 1, 1));
        assert_eq!(dates(&graph, c, ScheduleMode::Late).finish, d(2025, 1, 8));
        assert!(report.recomputed < 3 * (graph.order().len()));
    }

    #[test]
    fn test_clean_fast_pass_skips_backward() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(2))).unwrap();
        let settings = ProjectSettings::new(d(2025, 1, 1));
        let mut tracker = DirtyTracker::new();
        run(&mut graph, &mut tracker, settings, PassKind::Full);

        let report = run(&mut graph, &mut tracker, settings, PassKind::Fast(a));
        assert!(!report.backward_ran);
        assert!(!report.current_ran);
        assert_eq!(report.recomputed, 0);
        assert_eq!(dates(&graph, a, ScheduleMode::Late), DateRange::new(d(2025, 1, 1), d(2025, 1, 3)));
    }

    #[test]
    fn test_missed_deadline_conflict_and_boundary() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(10))).unwrap();
        let settings = ProjectSettings::new(d(2025, 1, 1)).with_deadline(d(2025, 1, 8));
        let calendar = ContinuousCalendar::new();
        let mut tracker = DirtyTracker::new();

        let mut conflicts = FxHashMap::default();
        let report = PassRunner::new(&mut graph, &calendar, settings, &mut conflicts)
            .run(&mut tracker, PassKind::Full);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].task, FINISH);
        // Links win: the boundary is the early finish.
        assert_eq!(dates(&graph, a, ScheduleMode::Late).start, d(2025, 1, 1));

        tracker.reset_all(&mut graph);
        PassRunner::new(&mut graph, &calendar, settings, &mut conflicts)
            .honor_required_dates(true)
            .run(&mut tracker, PassKind::Full);
        assert_eq!(dates(&graph, a, ScheduleMode::Late).start, d(2024, 12, 29));
    }

    #[test]
    fn test_current_pass_only_with_alap() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(TaskSpec::new("a", Duration::days(2))).unwrap();
        let long = graph.add_task(TaskSpec::new("long", Duration::days(6))).unwrap();
        let settings = ProjectSettings::new(d(2025, 1, 1));
        let mut tracker = DirtyTracker::new();

        let report = run(&mut graph, &mut tracker, settings, PassKind::Full);
        assert!(!report.current_ran);
        assert_eq!(dates(&graph, a, ScheduleMode::Current), dates(&graph, a, ScheduleMode::Early));

        graph.set_constraint(a, Constraint::alap()).unwrap();
        let report = run(&mut graph, &mut tracker, settings, PassKind::Fast(a));
        assert!(report.current_ran);
        assert_eq!(dates(&graph, a, ScheduleMode::Current), DateRange::new(d(2025, 1, 5), d(2025, 1, 7)));
        assert_eq!(dates(&graph, long, ScheduleMode::Current).start, d(2025, 1, 1));
    }
}
