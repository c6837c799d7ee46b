//! The change reactor: the engine's public entry point.
//!
//! Every mutation goes through [`Engine`], which updates the graph, turns the
//! edit into a [`ChangeEvent`] and decides how much of the schedule is dirty.
//! Single-task edits take the fast path (an incremental pass starting from the
//! dirty records); structural edits rearrange the traversal order and reset
//! every record first. Inside a batch nothing is recomputed until the
//! outermost `end_batch`, which runs exactly one full pass.
//!
//! The engine has no internal locking. Hosts that share it across threads put
//! the whole `Engine` behind one lock; readers that must not block can hold on
//! to the `Arc<ScheduleSnapshot>` published after each pass.

use chrono::Duration;
use rustc_hash::FxHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

use crate::calendar::{Calendar, ContinuousCalendar};
use crate::config::EngineConfig;
use crate::graph::{Dependency, DependencyGraph, GraphError};
use crate::models::{
    DateRange, DependencyId, DependencySpec, ProjectSettings, RelationType, TaskField, TaskId,
    TaskSpec, TaskUpdate,
};
use crate::schedule::{
    ConstraintConflict, CriticalPathDetector, DirtyState, DirtyTracker, PassKind, PassReport,
    PassRunner, ScheduleMode, ScheduleSnapshot,
};
use crate::{log_debug, log_passes};

/// Errors surfaced to engine callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Graph(GraphError),
    #[error("{mode:?} dates of {task} read before they were computed")]
    StaleEpochRead { task: TaskId, mode: ScheduleMode },
    #[error("Recompute requested while a pass is running")]
    ReentrantRecompute,
    #[error("end_batch called outside a batch")]
    NotInBatch,
    #[error("Slack is not reported for {0}")]
    NotReportable(TaskId),
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        EngineError::Graph(err)
    }
}

/// Graph mutations the reactor responds to.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    TaskCreated(TaskId),
    /// The deleted task; its subtree went with it.
    TaskDeleted(TaskId),
    TaskUpdated(TaskId, TaskField),
    DependencyCreated(DependencyId),
    DependencyRemoved(Dependency),
    DependencyUpdated(DependencyId),
    CalendarChanged,
    /// Resource assignment on a task changed; its effective duration may have too.
    AssignmentChanged(TaskId),
    GraphReplaced,
}

/// Observer notified of every event and every completed pass.
pub trait ScheduleListener: Send {
    fn on_event(&mut self, _event: &ChangeEvent) {}

    fn on_pass_completed(&mut self, _report: &PassReport, _snapshot: &ScheduleSnapshot) {}
}

/// Externally visible recompute state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Clean,
    Dirty(DirtyState),
    /// Inside a batch: edits are absorbed without recomputing.
    Suspended,
}

/// Scheduling engine for one project.
pub struct Engine {
    graph: DependencyGraph,
    calendar: Box<dyn Calendar>,
    settings: ProjectSettings,
    config: EngineConfig,
    tracker: DirtyTracker,
    detector: CriticalPathDetector,
    conflicts: FxHashMap<TaskId, ConstraintConflict>,
    listeners: Vec<Box<dyn ScheduleListener>>,
    batch_depth: u32,
    in_pass: bool,
    snapshot: Arc<ScheduleSnapshot>,
    last_report: Option<PassReport>,
}

impl Engine {
    /// Engine over an empty graph with a continuous calendar. No pass has run yet.
    pub fn new(settings: ProjectSettings, config: EngineConfig) -> Self {
        Self::with_calendar(settings, config, Box::new(ContinuousCalendar::new()))
    }

    pub fn with_calendar(
        settings: ProjectSettings,
        config: EngineConfig,
        calendar: Box<dyn Calendar>,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(),
            calendar,
            settings,
            detector: CriticalPathDetector::new(config.critical_threshold()),
            config,
            tracker: DirtyTracker::new(),
            conflicts: FxHashMap::default(),
            listeners: Vec::new(),
            batch_depth: 0,
            in_pass: false,
            snapshot: Arc::new(ScheduleSnapshot::default()),
            last_report: None,
        }
    }

    pub fn create_task(&mut self, spec: TaskSpec) -> Result<TaskId, EngineError> {
        let id = self.graph.add_task(spec)?;
        self.notify(ChangeEvent::TaskCreated(id))?;
        Ok(id)
    }

    /// Delete a task and its subtree. Returns the removed ids.
    pub fn delete_task(&mut self, id: TaskId) -> Result<Vec<TaskId>, EngineError> {
        let removed = self.graph.remove_task(id)?;
        for task in &removed {
            self.conflicts.remove(task);
        }
        self.notify(ChangeEvent::TaskDeleted(id))?;
        Ok(removed)
    }

    pub fn update_task(&mut self, id: TaskId, update: TaskUpdate) -> Result<(), EngineError> {
        let field = update.field();
        match update {
            TaskUpdate::Name(name) => self.graph.set_name(id, name)?,
            TaskUpdate::Duration(duration) => self.graph.set_duration(id, duration)?,
            TaskUpdate::Constraint(constraint) => self.graph.set_constraint(id, constraint)?,
            TaskUpdate::Parent(parent) => self.graph.set_parent(id, parent)?,
            TaskUpdate::External(external) => self.graph.set_external(id, external)?,
        }
        self.notify(ChangeEvent::TaskUpdated(id, field))
    }

    pub fn create_dependency(&mut self, spec: DependencySpec) -> Result<DependencyId, EngineError> {
        let id = self.graph.add_dependency(spec)?;
        self.notify(ChangeEvent::DependencyCreated(id))?;
        Ok(id)
    }

    pub fn remove_dependency(&mut self, id: DependencyId) -> Result<Dependency, EngineError> {
        let dep = self.graph.remove_dependency(id)?;
        self.notify(ChangeEvent::DependencyRemoved(dep))?;
        Ok(dep)
    }

    pub fn update_dependency(
        &mut self,
        id: DependencyId,
        relation: RelationType,
        lag: Duration,
    ) -> Result<(), EngineError> {
        self.graph.update_dependency(id, relation, lag)?;
        self.notify(ChangeEvent::DependencyUpdated(id))
    }

    pub fn set_calendar(&mut self, calendar: Box<dyn Calendar>) -> Result<(), EngineError> {
        self.calendar = calendar;
        self.notify(ChangeEvent::CalendarChanged)
    }

    /// Swap the whole graph, e.g. after loading a saved project.
    pub fn replace_graph(&mut self, graph: DependencyGraph) -> Result<(), EngineError> {
        self.graph = graph;
        self.conflicts.clear();
        self.notify(ChangeEvent::GraphReplaced)
    }

    /// New project boundaries. Every date may move, so this is a full recompute.
    pub fn set_settings(&mut self, settings: ProjectSettings) -> Result<(), EngineError> {
        self.settings = settings;
        self.tracker.mark_full();
        self.settle()
    }

    pub fn set_config(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        let honor_changed = config.honor_required_dates != self.config.honor_required_dates;
        self.detector = CriticalPathDetector::new(config.critical_threshold());
        self.config = config;
        if honor_changed {
            self.tracker.mark_full();
        }
        self.settle()
    }

    /// Feed an event to the reactor. Mutation methods call this themselves;
    /// hosts call it for changes the engine cannot see (calendar contents,
    /// resource assignments).
    pub fn notify(&mut self, event: ChangeEvent) -> Result<(), EngineError> {
        log_debug!(self.config.verbosity, "Event: {:?}", event);
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }

        match event {
            ChangeEvent::TaskCreated(id) => self.tracker.mark_single(id),
            ChangeEvent::TaskUpdated(id, field) => self.on_task_updated(id, field),
            ChangeEvent::DependencyCreated(id) | ChangeEvent::DependencyUpdated(id) => {
                self.on_dependency_changed(id)?
            }
            ChangeEvent::AssignmentChanged(id) => {
                self.graph.task(id)?;
                self.graph.invalidate(id);
                self.tracker.mark_single(id);
            }
            ChangeEvent::TaskDeleted(_)
            | ChangeEvent::DependencyRemoved(_)
            | ChangeEvent::CalendarChanged
            | ChangeEvent::GraphReplaced => self.tracker.mark_full(),
        }
        self.settle()
    }

    fn on_task_updated(&mut self, id: TaskId, field: TaskField) {
        match field {
            TaskField::Name => {}
            TaskField::Duration | TaskField::Constraint => self.tracker.mark_single(id),
            TaskField::Parent | TaskField::External => self.tracker.mark_full(),
        }
    }

    /// A new or edited link can reach leaves far from its endpoints through
    /// summary expansion, so every record is marked before the fast pass.
    fn on_dependency_changed(&mut self, id: DependencyId) -> Result<(), EngineError> {
        let successor = self.graph.dependency(id)?.successor;
        self.graph.invalidate_all();
        self.tracker.mark_single(successor);
        Ok(())
    }

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
        log_passes!(self.config.verbosity, "Batch opened (depth {})", self.batch_depth);
    }

    /// Close a batch. The outermost close runs one full pass and returns its report.
    pub fn end_batch(&mut self) -> Result<Option<PassReport>, EngineError> {
        if self.batch_depth == 0 {
            return Err(EngineError::NotInBatch);
        }
        self.batch_depth -= 1;
        log_passes!(self.config.verbosity, "Batch closed (depth {})", self.batch_depth);
        if self.batch_depth > 0 {
            return Ok(None);
        }
        self.tracker.mark_full();
        self.run_pass().map(Some)
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    /// Recompute now: from one task on the fast path, or everything.
    pub fn recalculate(&mut self, task: Option<TaskId>) -> Result<PassReport, EngineError> {
        match task {
            Some(id) => {
                self.graph.task(id)?;
                self.tracker.mark_single(id);
            }
            None => self.tracker.mark_full(),
        }
        self.run_pass()
    }

    fn settle(&mut self) -> Result<(), EngineError> {
        if self.batch_depth > 0 {
            log_debug!(self.config.verbosity, "  Deferred: inside batch");
            return Ok(());
        }
        if self.tracker.dirty() != DirtyState::Clean {
            self.run_pass()?;
        }
        Ok(())
    }

    fn run_pass(&mut self) -> Result<PassReport, EngineError> {
        if self.in_pass {
            return Err(EngineError::ReentrantRecompute);
        }
        self.in_pass = true;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute_pass()));
        self.in_pass = false;
        match result {
            Ok(result) => result,
            Err(payload) => {
                // Records may be half-written; the next pass starts from scratch.
                self.tracker.mark_full();
                panic::resume_unwind(payload)
            }
        }
    }

    fn execute_pass(&mut self) -> Result<PassReport, EngineError> {
        let kind = match self.tracker.take_dirty() {
            DirtyState::Single(id) if self.graph.contains(id) => PassKind::Fast(id),
            _ => PassKind::Full,
        };
        if kind == PassKind::Full {
            log_passes!(self.config.verbosity, "Full recompute");
            self.graph.rearrange_all()?;
            self.tracker.reset_all(&mut self.graph);
            self.tracker.take_dirty();
            self.conflicts.clear();
        } else {
            log_passes!(self.config.verbosity, "Fast path from {:?}", kind);
        }

        let report = PassRunner::new(
            &mut self.graph,
            self.calendar.as_ref(),
            self.settings,
            &mut self.conflicts,
        )
        .honor_required_dates(self.config.honor_required_dates)
        .verbosity(self.config.verbosity)
        .run(&mut self.tracker, kind);

        self.snapshot = Arc::new(ScheduleSnapshot::capture(
            &self.graph,
            &self.detector,
            report.epoch,
            self.tracker.span(),
            report.conflicts.clone(),
        ));
        for listener in &mut self.listeners {
            listener.on_pass_completed(&report, &self.snapshot);
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn dates(&self, id: TaskId, mode: ScheduleMode) -> Result<DateRange, EngineError> {
        let record = self.graph.task(id)?.record(mode);
        match record.dates {
            Some(dates) if record.is_current() => Ok(dates),
            _ => Err(EngineError::StaleEpochRead { task: id, mode }),
        }
    }

    pub fn early_dates(&self, id: TaskId) -> Result<DateRange, EngineError> {
        self.dates(id, ScheduleMode::Early)
    }

    pub fn late_dates(&self, id: TaskId) -> Result<DateRange, EngineError> {
        self.dates(id, ScheduleMode::Late)
    }

    pub fn current_dates(&self, id: TaskId) -> Result<DateRange, EngineError> {
        self.dates(id, ScheduleMode::Current)
    }

    pub fn slack(&self, id: TaskId) -> Result<Duration, EngineError> {
        if self.graph.task(id)?.is_sentinel() {
            return Err(EngineError::NotReportable(id));
        }
        let early = self.early_dates(id)?;
        let late = self.late_dates(id)?;
        Ok(CriticalPathDetector::slack(early, late))
    }

    pub fn is_critical(&self, id: TaskId) -> Result<bool, EngineError> {
        Ok(self.detector.is_critical(self.slack(id)?))
    }

    /// Earliest start and latest finish over leaf tasks, as of the last pass.
    pub fn project_span(&self) -> Option<DateRange> {
        self.tracker.span()
    }

    pub fn critical_tasks(&self) -> Vec<TaskId> {
        self.detector.critical_tasks(&self.graph)
    }

    /// Constraint conflicts found by the passes so far, by task id.
    pub fn conflicts(&self) -> Vec<ConstraintConflict> {
        let mut conflicts: Vec<ConstraintConflict> = self.conflicts.values().copied().collect();
        conflicts.sort_by_key(|c| c.task);
        conflicts
    }

    pub fn pass_count(&self) -> u64 {
        self.tracker.pass_count()
    }

    /// Results of the last completed pass. Cheap to clone and safe to send to readers.
    pub fn snapshot(&self) -> Arc<ScheduleSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn last_report(&self) -> Option<&PassReport> {
        self.last_report.as_ref()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_listener(&mut self, listener: Box<dyn ScheduleListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> EngineState {
        if self.batch_depth > 0 {
            return EngineState::Suspended;
        }
        match self.tracker.dirty() {
            DirtyState::Clean => EngineState::Clean,
            dirty => EngineState::Dirty(dirty),
        }
    }
}
