//! Core data types for the scheduling engine.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

/// Arena index of a task. Ids are never reused within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

/// Arena index of a dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(pub u32);

impl TaskId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl DependencyId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep#{}", self.0)
    }
}

/// Scheduling constraint kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConstraintType {
    #[default]
    AsSoonAsPossible,
    AsLateAsPossible,
    StartNoEarlierThan,
    StartNoLaterThan,
    FinishNoEarlierThan,
    FinishNoLaterThan,
    MustStartOn,
    MustFinishOn,
}

impl ConstraintType {
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "asap" | "as_soon_as_possible" => Self::AsSoonAsPossible,
            "alap" | "as_late_as_possible" => Self::AsLateAsPossible,
            "snet" | "start_no_earlier_than" => Self::StartNoEarlierThan,
            "snlt" | "start_no_later_than" => Self::StartNoLaterThan,
            "fnet" | "finish_no_earlier_than" => Self::FinishNoEarlierThan,
            "fnlt" | "finish_no_later_than" => Self::FinishNoLaterThan,
            "mso" | "must_start_on" => Self::MustStartOn,
            "mfo" | "must_finish_on" => Self::MustFinishOn,
            _ => return None,
        };
        Some(kind)
    }
}

/// A constraint type together with its date.
///
/// Dated kinds without a date behave as as-soon-as-possible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintType,
    pub date: Option<NaiveDateTime>,
}

impl Constraint {
    pub fn asap() -> Self {
        Self::default()
    }

    pub fn alap() -> Self {
        Self {
            kind: ConstraintType::AsLateAsPossible,
            date: None,
        }
    }

    pub fn dated(kind: ConstraintType, date: NaiveDateTime) -> Self {
        Self {
            kind,
            date: Some(date),
        }
    }

    /// True for tasks whose current dates come from the backward pass.
    pub fn is_reverse_scheduled(&self) -> bool {
        self.kind == ConstraintType::AsLateAsPossible
    }
}

/// Dependency relation between predecessor and successor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelationType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl RelationType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "FS" | "FINISH_TO_START" => Some(Self::FinishToStart),
            "SS" | "START_TO_START" => Some(Self::StartToStart),
            "FF" | "FINISH_TO_FINISH" => Some(Self::FinishToFinish),
            "SF" | "START_TO_FINISH" => Some(Self::StartToFinish),
            _ => None,
        }
    }

    /// Whether the predecessor side of the relation is its start date.
    pub fn from_start(self) -> bool {
        matches!(self, Self::StartToStart | Self::StartToFinish)
    }

    /// Whether the successor side of the relation is its start date.
    pub fn to_start(self) -> bool {
        matches!(self, Self::FinishToStart | Self::StartToStart)
    }
}

/// A start/finish pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub finish: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, finish: NaiveDateTime) -> Self {
        Self { start, finish }
    }

    pub fn at(instant: NaiveDateTime) -> Self {
        Self::new(instant, instant)
    }

    /// Smallest range covering both.
    pub fn union(self, other: Self) -> Self {
        Self::new(self.start.min(other.start), self.finish.max(other.finish))
    }
}

/// Input for creating a task.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub name: String,
    pub duration: Duration,
    pub constraint: Constraint,
    pub parent: Option<TaskId>,
    /// Task owned by another graph (sub-project or external reference).
    pub external: bool,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            constraint: Constraint::asap(),
            parent: None,
            external: false,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

/// Task field that changed in an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskField {
    Name,
    Duration,
    Constraint,
    Parent,
    External,
}

/// A single-field task edit.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskUpdate {
    Name(String),
    Duration(Duration),
    Constraint(Constraint),
    Parent(Option<TaskId>),
    External(bool),
}

impl TaskUpdate {
    pub fn field(&self) -> TaskField {
        match self {
            TaskUpdate::Name(_) => TaskField::Name,
            TaskUpdate::Duration(_) => TaskField::Duration,
            TaskUpdate::Constraint(_) => TaskField::Constraint,
            TaskUpdate::Parent(_) => TaskField::Parent,
            TaskUpdate::External(_) => TaskField::External,
        }
    }
}

/// Input for creating or updating a dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DependencySpec {
    pub predecessor: TaskId,
    pub successor: TaskId,
    pub relation: RelationType,
    pub lag: Duration,
}

impl DependencySpec {
    /// Finish-to-start with no lag.
    pub fn finish_to_start(predecessor: TaskId, successor: TaskId) -> Self {
        Self {
            predecessor,
            successor,
            relation: RelationType::FinishToStart,
            lag: Duration::zero(),
        }
    }

    pub fn with_relation(mut self, relation: RelationType) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }
}

/// Project-level boundary dates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Seeds the start sentinel.
    pub start: NaiveDateTime,
    /// Optional finish deadline on the finish sentinel.
    pub finish_deadline: Option<NaiveDateTime>,
}

impl ProjectSettings {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            finish_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: NaiveDateTime) -> Self {
        self.finish_deadline = Some(deadline);
        self
    }
}
