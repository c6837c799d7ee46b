//! Working-time calendars for duration <-> date conversion.
//!
//! The engine never does date arithmetic on its own: every conversion from a
//! duration to a concrete instant goes through a [`Calendar`]. Calendars are
//! pure lookups, so a pass can call them freely without blocking.

use chrono::{Datelike, Duration, NaiveDateTime, Weekday};

/// How project boundary instants (the sentinel dates) are normalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Use the instant as given.
    #[default]
    Exact,
    /// Truncate to midnight of the same day.
    StartOfDay,
}

impl BoundaryPolicy {
    pub fn apply(self, instant: NaiveDateTime) -> NaiveDateTime {
        match self {
            BoundaryPolicy::Exact => instant,
            BoundaryPolicy::StartOfDay => midnight(instant),
        }
    }
}

/// Duration <-> date conversion under working-time rules.
pub trait Calendar: Send + Sync {
    /// The instant reached after `duration` of working time from `instant`.
    fn add_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime;

    /// The instant that lies `duration` of working time before `instant`.
    fn subtract_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime;

    /// Normalize a project boundary date before it seeds a pass.
    fn normalize_boundary(&self, instant: NaiveDateTime) -> NaiveDateTime {
        instant
    }
}

/// Calendar where all time is working time.
#[derive(Clone, Debug, Default)]
pub struct ContinuousCalendar {
    pub boundary: BoundaryPolicy,
}

impl ContinuousCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary_policy(boundary: BoundaryPolicy) -> Self {
        Self { boundary }
    }
}

impl Calendar for ContinuousCalendar {
    fn add_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime {
        shift(instant, duration)
    }

    fn subtract_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime {
        shift_back(instant, duration)
    }

    fn normalize_boundary(&self, instant: NaiveDateTime) -> NaiveDateTime {
        self.boundary.apply(instant)
    }
}

/// Calendar with non-working periods and optional weekends off.
///
/// Non-working periods are half-open `[start, end)` intervals. Invariant:
/// `non_working` is sorted by start and contains no overlapping or touching
/// intervals, which keeps every lookup a binary search.
#[derive(Clone, Debug, Default)]
pub struct WorkingCalendar {
    non_working: Vec<(NaiveDateTime, NaiveDateTime)>,
    weekends_off: bool,
    boundary: BoundaryPolicy,
}

impl WorkingCalendar {
    pub fn new(non_working: Vec<(NaiveDateTime, NaiveDateTime)>) -> Self {
        Self {
            non_working: merge_periods(non_working),
            weekends_off: false,
            boundary: BoundaryPolicy::Exact,
        }
    }

    /// Treat every Saturday and Sunday as non-working time.
    pub fn with_weekends_off(mut self) -> Self {
        self.weekends_off = true;
        self
    }

    pub fn with_boundary_policy(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    /// Add a non-working period, merging it with any period it touches.
    pub fn add_non_working(&mut self, start: NaiveDateTime, end: NaiveDateTime) {
        if end <= start {
            return;
        }
        let mut periods = std::mem::take(&mut self.non_working);
        periods.push((start, end));
        self.non_working = merge_periods(periods);
    }

    pub fn non_working_periods(&self) -> &[(NaiveDateTime, NaiveDateTime)] {
        &self.non_working
    }

    /// End of the non-working block containing `t` (`start <= t < end`).
    fn blocked_end_at(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let idx = self.non_working.partition_point(|(s, _)| *s <= t);
        let explicit = (idx > 0 && self.non_working[idx - 1].1 > t).then(|| self.non_working[idx - 1].1);
        let weekend = self.weekends_off.then(|| weekend_containing(t, false)).flatten();
        match (explicit, weekend) {
            (Some(a), Some((_, b))) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some((_, b))) => Some(b),
            (None, None) => None,
        }
    }

    /// Start of the non-working block containing `t` when walking backward
    /// (`start < t <= end`).
    fn blocked_start_before(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let idx = self.non_working.partition_point(|(s, _)| *s < t);
        let explicit = (idx > 0 && self.non_working[idx - 1].1 >= t).then(|| self.non_working[idx - 1].0);
        let weekend = self.weekends_off.then(|| weekend_containing(t, true)).flatten();
        match (explicit, weekend) {
            (Some(a), Some((b, _))) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some((b, _))) => Some(b),
            (None, None) => None,
        }
    }

    /// First non-working start strictly after `t`.
    fn next_blocked_start(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let idx = self.non_working.partition_point(|(s, _)| *s <= t);
        let explicit = self.non_working.get(idx).map(|(s, _)| *s);
        let weekend = self.weekends_off.then(|| next_saturday(t));
        match (explicit, weekend) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Last non-working end strictly before `t`.
    fn prev_blocked_end(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let idx = self.non_working.partition_point(|(_, e)| *e < t);
        let explicit = (idx > 0).then(|| self.non_working[idx - 1].1);
        let weekend = self.weekends_off.then(|| prev_monday(t));
        match (explicit, weekend) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

impl Calendar for WorkingCalendar {
    fn add_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime {
        if duration < Duration::zero() {
            return self.subtract_duration(instant, -duration);
        }

        let mut remaining = duration;
        let mut current = instant;
        loop {
            if remaining <= Duration::zero() {
                return current;
            }
            while let Some(end) = self.blocked_end_at(current) {
                current = end;
            }
            match self.next_blocked_start(current) {
                Some(start) if shift(current, remaining) > start => {
                    remaining = remaining - (start - current);
                    current = start;
                }
                _ => return shift(current, remaining),
            }
        }
    }

    fn subtract_duration(&self, instant: NaiveDateTime, duration: Duration) -> NaiveDateTime {
        if duration < Duration::zero() {
            return self.add_duration(instant, -duration);
        }

        let mut remaining = duration;
        let mut current = instant;
        loop {
            if remaining <= Duration::zero() {
                return current;
            }
            while let Some(start) = self.blocked_start_before(current) {
                current = start;
            }
            match self.prev_blocked_end(current) {
                Some(end) if shift_back(current, remaining) < end => {
                    remaining = remaining - (current - end);
                    current = end;
                }
                _ => return shift_back(current, remaining),
            }
        }
    }

    fn normalize_boundary(&self, instant: NaiveDateTime) -> NaiveDateTime {
        self.boundary.apply(instant)
    }
}

/// Merge overlapping or touching periods into a sorted, non-overlapping list.
fn merge_periods(
    mut periods: Vec<(NaiveDateTime, NaiveDateTime)>,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    periods.retain(|(start, end)| start < end);
    periods.sort_by_key(|(start, _)| *start);

    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(periods.len());
    for (start, end) in periods {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// `instant + delta`, clamped to the representable range.
fn shift(instant: NaiveDateTime, delta: Duration) -> NaiveDateTime {
    instant.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
        NaiveDateTime::MIN
    } else {
        NaiveDateTime::MAX
    })
}

/// `instant - delta`, clamped to the representable range.
fn shift_back(instant: NaiveDateTime, delta: Duration) -> NaiveDateTime {
    instant.checked_sub_signed(delta).unwrap_or(if delta < Duration::zero() {
        NaiveDateTime::MAX
    } else {
        NaiveDateTime::MIN
    })
}

fn midnight(instant: NaiveDateTime) -> NaiveDateTime {
    instant.date().and_hms_opt(0, 0, 0).unwrap_or(instant)
}

/// The Saturday-to-Monday block containing `t`. With `backward` the block is
/// treated as `(start, end]` instead of `[start, end)`.
fn weekend_containing(t: NaiveDateTime, backward: bool) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let day = midnight(t);
    let saturday = match t.weekday() {
        Weekday::Sat => day,
        Weekday::Sun => shift_back(day, Duration::days(1)),
        Weekday::Mon if backward && t == day => shift_back(day, Duration::days(2)),
        _ => return None,
    };
    let monday = shift(saturday, Duration::days(2));
    // Clamped at the edge of the range the block can collapse around `t`.
    if (backward && t <= saturday) || (!backward && t >= monday) {
        return None;
    }
    Some((saturday, monday))
}

fn next_saturday(t: NaiveDateTime) -> NaiveDateTime {
    let from_monday = t.weekday().num_days_from_monday() as i64;
    let candidate = shift(midnight(t), Duration::days((5 - from_monday).rem_euclid(7)));
    if candidate > t {
        candidate
    } else {
        shift(candidate, Duration::days(7))
    }
}

fn prev_monday(t: NaiveDateTime) -> NaiveDateTime {
    let from_monday = t.weekday().num_days_from_monday() as i64;
    let candidate = shift_back(midnight(t), Duration::days(from_monday));
    if candidate < t {
        candidate
    } else {
        shift_back(candidate, Duration::days(7))
    }
}
