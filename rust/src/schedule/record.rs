//! Per-task, per-mode computed dates.

use chrono::{Duration, NaiveDateTime};

use crate::calendar::Calendar;
use crate::models::{Constraint, ConstraintType, DateRange, TaskId};

use super::tracker::Epoch;

/// Which set of dates a record holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScheduleMode {
    /// Forward pass: earliest dates.
    Early,
    /// Backward pass: latest dates.
    Late,
    /// Dates the task is actually planned at (differs from early only for ALAP tasks).
    Current,
}

impl ScheduleMode {
    pub const ALL: [ScheduleMode; 3] = [ScheduleMode::Early, ScheduleMode::Late, ScheduleMode::Current];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            ScheduleMode::Early => 0,
            ScheduleMode::Late => 1,
            ScheduleMode::Current => 2,
        }
    }
}

/// A required date that the task's dependencies do not allow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintConflict {
    pub task: TaskId,
    pub constraint: ConstraintType,
    /// The date the constraint asks for.
    pub required: NaiveDateTime,
    /// The date dependencies produce.
    pub computed: NaiveDateTime,
}

/// Inputs for one [`ScheduleRecord::calc_dates`] call.
///
/// Bounds are already reduced over the task's drivers: for `Early`/`Current`
/// they are the latest start/finish its predecessors allow, for `Late` the
/// earliest start/finish its successors allow.
pub struct CalcContext<'a> {
    pub task: TaskId,
    pub mode: ScheduleMode,
    pub epoch: Epoch,
    pub calendar: &'a dyn Calendar,
    pub duration: Duration,
    pub constraint: Constraint,
    pub start_bound: Option<NaiveDateTime>,
    pub finish_bound: Option<NaiveDateTime>,
    /// Used when the task has no drivers: project start or the backward boundary.
    pub fallback: NaiveDateTime,
    /// Late dates, read by reverse-scheduled tasks in `Current` mode.
    pub late: Option<DateRange>,
    pub honor_required_dates: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalcOutcome {
    /// Already computed in this epoch.
    Skipped,
    Unchanged,
    Changed,
}

/// Computed dates for one (task, mode) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub dates: Option<DateRange>,
    pub invalidated: bool,
    pub epoch: Epoch,
}

impl Default for ScheduleRecord {
    fn default() -> Self {
        Self {
            dates: None,
            invalidated: true,
            epoch: Epoch::STALE,
        }
    }
}

impl ScheduleRecord {
    /// Whether the record holds dates valid for readers.
    pub fn is_current(&self) -> bool {
        !self.invalidated && self.epoch != Epoch::STALE && self.dates.is_some()
    }

    pub fn needs_recalc(&self) -> bool {
        self.invalidated || self.epoch == Epoch::STALE
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Force a full recompute on the next pass.
    pub fn reset(&mut self) {
        self.invalidated = true;
        self.epoch = Epoch::STALE;
    }

    /// Store dates produced outside `calc_dates` (sentinel boundary, rollups).
    pub fn store(&mut self, dates: DateRange, epoch: Epoch) -> CalcOutcome {
        let changed = self.dates != Some(dates);
        *self = ScheduleRecord {
            dates: Some(dates),
            invalidated: false,
            epoch,
        };
        if changed {
            CalcOutcome::Changed
        } else {
            CalcOutcome::Unchanged
        }
    }

    /// Compute this record's dates from the driver bounds, duration and constraint.
    pub fn calc_dates(&mut self, ctx: &CalcContext<'_>) -> (CalcOutcome, Option<ConstraintConflict>) {
        if ctx.constraint.is_reverse_scheduled() {
            self.invalidated = true;
        }
        if !self.invalidated && self.epoch >= ctx.epoch {
            return (CalcOutcome::Skipped, None);
        }

        let (dates, conflict) = match ctx.mode {
            ScheduleMode::Early => forward_dates(ctx),
            ScheduleMode::Late => (backward_dates(ctx), None),
            ScheduleMode::Current => match ctx.late {
                Some(late) if ctx.constraint.is_reverse_scheduled() => {
                    let earliest = driven_start(ctx);
                    let start = late.start.max(earliest);
                    (DateRange::new(start, ctx.calendar.add_duration(start, ctx.duration)), None)
                }
                _ => (forward_dates(ctx).0, None),
            },
        };

        (self.store(dates, ctx.epoch), conflict)
    }
}

/// Earliest start the drivers allow.
fn driven_start(ctx: &CalcContext<'_>) -> NaiveDateTime {
    let from_finish = ctx
        .finish_bound
        .map(|finish| ctx.calendar.subtract_duration(finish, ctx.duration));
    match (ctx.start_bound, from_finish) {
        (Some(a), Some(b)) => a.max(b),
        (a, b) => a.or(b).unwrap_or(ctx.fallback),
    }
}

fn forward_dates(ctx: &CalcContext<'_>) -> (DateRange, Option<ConstraintConflict>) {
    let cal = ctx.calendar;
    let mut start = driven_start(ctx);
    let mut finish = cal.add_duration(start, ctx.duration);
    let Some(date) = ctx.constraint.date else {
        return (DateRange::new(start, finish), None);
    };

    let conflict = |computed| ConstraintConflict {
        task: ctx.task,
        constraint: ctx.constraint.kind,
        required: date,
        computed,
    };
    let mut found = None;

    match ctx.constraint.kind {
        ConstraintType::AsSoonAsPossible | ConstraintType::AsLateAsPossible => {}
        ConstraintType::StartNoEarlierThan => {
            if start < date {
                start = date;
                finish = cal.add_duration(start, ctx.duration);
            }
        }
        ConstraintType::FinishNoEarlierThan => {
            if finish < date {
                finish = date;
                start = cal.subtract_duration(finish, ctx.duration);
            }
        }
        ConstraintType::StartNoLaterThan | ConstraintType::MustStartOn => {
            if start > date {
                found = Some(conflict(start));
            }
            let pin = ctx.constraint.kind == ConstraintType::MustStartOn && start < date;
            if pin || (start > date && ctx.honor_required_dates) {
                start = date;
                finish = cal.add_duration(start, ctx.duration);
            }
        }
        ConstraintType::FinishNoLaterThan | ConstraintType::MustFinishOn => {
            if finish > date {
                found = Some(conflict(finish));
            }
            let pin = ctx.constraint.kind == ConstraintType::MustFinishOn && finish < date;
            if pin || (finish > date && ctx.honor_required_dates) {
                finish = date;
                start = cal.subtract_duration(finish, ctx.duration);
            }
        }
    }

    (DateRange::new(start, finish), found)
}

fn backward_dates(ctx: &CalcContext<'_>) -> DateRange {
    let cal = ctx.calendar;
    let from_start = ctx
        .start_bound
        .map(|start| cal.add_duration(start, ctx.duration));
    let mut finish = match (ctx.finish_bound, from_start) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b).unwrap_or(ctx.fallback),
    };

    if let Some(date) = ctx.constraint.date {
        match ctx.constraint.kind {
            ConstraintType::StartNoLaterThan | ConstraintType::MustStartOn => {
                if cal.subtract_duration(finish, ctx.duration) > date {
                    finish = cal.add_duration(date, ctx.duration);
                }
            }
            ConstraintType::FinishNoLaterThan | ConstraintType::MustFinishOn => {
                finish = finish.min(date);
            }
            _ => {}
        }
    }

    DateRange::new(cal.subtract_duration(finish, ctx.duration), finish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ContinuousCalendar;
    use chrono::NaiveDate;

    fn d(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn ctx<'a>(cal: &'a ContinuousCalendar, mode: ScheduleMode, constraint: Constraint) -> CalcContext<'a> {
        CalcContext {
            task: TaskId(7),
            mode,
            epoch: Epoch(1),
            calendar: cal,
            duration: Duration::days(3),
            constraint,
            start_bound: None,
            finish_bound: None,
            fallback: d(2025, 1, 1),
            late: None,
            honor_required_dates: false,
        }
    }

    #[test]
    fn test_forward_uses_latest_driver() {
        let cal = ContinuousCalendar::new();
        let mut c = ctx(&cal, ScheduleMode::Early, Constraint::asap());
        c.start_bound = Some(d(2025, 1, 5));
        // finish-side driver: must finish no earlier than Jan 10 -> start Jan 7
        c.finish_bound = Some(d(2025, 1, 10));
        let mut record = ScheduleRecord::default();
        let (outcome, conflict) = record.calc_dates(&c);
        assert_eq!(outcome, CalcOutcome::Changed);
        assert!(conflict.is_none());
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 7), d(2025, 1, 10))));
        assert!(record.is_current());
    }

    #[test]
    fn test_skips_when_already_computed_this_epoch() {
        let cal = ContinuousCalendar::new();
        let c = ctx(&cal, ScheduleMode::Early, Constraint::asap());
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.calc_dates(&c).0, CalcOutcome::Skipped);

        record.invalidate();
        assert_eq!(record.calc_dates(&c).0, CalcOutcome::Unchanged);
    }

    #[test]
    fn test_reverse_scheduled_never_skips() {
        let cal = ContinuousCalendar::new();
        let c = ctx(&cal, ScheduleMode::Current, Constraint::alap());
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.calc_dates(&c).0, CalcOutcome::Unchanged);
    }

    #[test]
    fn test_start_no_earlier_than_pushes_start() {
        let cal = ContinuousCalendar::new();
        let c = ctx(
            &cal,
            ScheduleMode::Early,
            Constraint::dated(ConstraintType::StartNoEarlierThan, d(2025, 1, 4)),
        );
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 4), d(2025, 1, 7))));
    }

    #[test]
    fn test_start_no_later_than_conflict() {
        let cal = ContinuousCalendar::new();
        let constraint = Constraint::dated(ConstraintType::StartNoLaterThan, d(2025, 1, 3));
        let mut c = ctx(&cal, ScheduleMode::Early, constraint);
        c.start_bound = Some(d(2025, 1, 5));

        let mut record = ScheduleRecord::default();
        let (_, conflict) = record.calc_dates(&c);
        let conflict = conflict.expect("conflict recorded");
        assert_eq!(conflict.required, d(2025, 1, 3));
        assert_eq!(conflict.computed, d(2025, 1, 5));
        // Links win by default.
        assert_eq!(record.dates.unwrap().start, d(2025, 1, 5));

        c.honor_required_dates = true;
        c.epoch = Epoch(2);
        let (_, conflict) = record.calc_dates(&c);
        assert!(conflict.is_some());
        assert_eq!(record.dates.unwrap().start, d(2025, 1, 3));
    }

    #[test]
    fn test_must_finish_on_pins_later_date() {
        let cal = ContinuousCalendar::new();
        let c = ctx(
            &cal,
            ScheduleMode::Early,
            Constraint::dated(ConstraintType::MustFinishOn, d(2025, 1, 20)),
        );
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 17), d(2025, 1, 20))));
    }

    #[test]
    fn test_must_start_on_pins_and_reports_late_links() {
        let cal = ContinuousCalendar::new();
        let constraint = Constraint::dated(ConstraintType::MustStartOn, d(2025, 1, 8));
        let mut c = ctx(&cal, ScheduleMode::Early, constraint);
        let mut record = ScheduleRecord::default();
        let (_, conflict) = record.calc_dates(&c);
        assert!(conflict.is_none());
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 8), d(2025, 1, 11))));

        // Links past the pinned date: they win and the miss is reported.
        c.start_bound = Some(d(2025, 1, 9));
        c.epoch = Epoch(2);
        let (_, conflict) = record.calc_dates(&c);
        assert_eq!(conflict.map(|found| found.computed), Some(d(2025, 1, 9)));
        assert_eq!(record.dates.unwrap().start, d(2025, 1, 9));
    }

    #[test]
    fn test_finish_no_earlier_than_pushes_finish() {
        let cal = ContinuousCalendar::new();
        let mut c = ctx(
            &cal,
            ScheduleMode::Early,
            Constraint::dated(ConstraintType::FinishNoEarlierThan, d(2025, 1, 10)),
        );
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 7), d(2025, 1, 10))));

        // Already finishing later: untouched.
        c.start_bound = Some(d(2025, 1, 9));
        c.epoch = Epoch(2);
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 9), d(2025, 1, 12))));
    }

    #[test]
    fn test_backward_takes_earliest_successor_bound() {
        let cal = ContinuousCalendar::new();
        let mut c = ctx(&cal, ScheduleMode::Late, Constraint::asap());
        c.fallback = d(2025, 2, 1);
        c.finish_bound = Some(d(2025, 1, 20));
        // successor start-side: start no later than Jan 15 -> finish Jan 18
        c.start_bound = Some(d(2025, 1, 15));
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 15), d(2025, 1, 18))));
    }

    #[test]
    fn test_backward_finish_no_later_than_caps() {
        let cal = ContinuousCalendar::new();
        let mut c = ctx(
            &cal,
            ScheduleMode::Late,
            Constraint::dated(ConstraintType::FinishNoLaterThan, d(2025, 1, 10)),
        );
        c.fallback = d(2025, 2, 1);
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 7), d(2025, 1, 10))));
    }

    #[test]
    fn test_current_alap_uses_late_dates() {
        let cal = ContinuousCalendar::new();
        let mut c = ctx(&cal, ScheduleMode::Current, Constraint::alap());
        c.start_bound = Some(d(2025, 1, 2));
        c.late = Some(DateRange::new(d(2025, 1, 6), d(2025, 1, 9)));
        let mut record = ScheduleRecord::default();
        record.calc_dates(&c);
        assert_eq!(record.dates, Some(DateRange::new(d(2025, 1, 6), d(2025, 1, 9))));
    }
}
