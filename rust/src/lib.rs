//! Critical Path Method scheduling engine with incremental recomputation.
//!
//! The Rust API lives in [`engine::Engine`]; the `rust` Python module wraps it
//! as a `Project` class.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use chrono::{Duration, NaiveDateTime};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

pub mod calendar;
mod config;
pub mod engine;
pub mod graph;
pub mod logging;
pub mod models;
pub mod schedule;

pub use calendar::{BoundaryPolicy, Calendar, ContinuousCalendar, WorkingCalendar};
pub use config::EngineConfig;
pub use engine::{ChangeEvent, Engine, EngineError, EngineState, ScheduleListener};
pub use graph::{DependencyGraph, GraphError, FINISH, START};
pub use models::{
    Constraint, ConstraintType, DateRange, DependencyId, DependencySpec, ProjectSettings,
    RelationType, TaskField, TaskId, TaskSpec, TaskUpdate,
};
pub use schedule::{ConstraintConflict, PassKind, PassReport, ScheduleMode, ScheduleSnapshot};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn days_to_duration(days: f64) -> PyResult<Duration> {
    let millis = (days * MILLIS_PER_DAY).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(PyValueError::new_err(format!("Invalid day count: {}", days)));
    }
    Duration::try_milliseconds(millis as i64)
        .ok_or_else(|| PyValueError::new_err(format!("Invalid day count: {}", days)))
}

fn duration_to_days(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / MILLIS_PER_DAY
}

impl From<EngineError> for PyErr {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Graph(_) | EngineError::NotReportable(_) => {
                PyValueError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

fn parse_constraint(kind: &str, date: Option<NaiveDateTime>) -> PyResult<Constraint> {
    let kind = ConstraintType::parse(kind)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown constraint type: {}", kind)))?;
    Ok(Constraint { kind, date })
}

fn range_tuple(range: DateRange) -> (NaiveDateTime, NaiveDateTime) {
    (range.start, range.finish)
}

/// One project's schedule, driven from Python.
///
/// Task and dependency ids are plain integers. Durations and lags are days.
#[pyclass(name = "Project")]
pub struct PyProject {
    engine: Engine,
}

#[pymethods]
impl PyProject {
    #[new]
    #[pyo3(signature = (start, config=None, finish_deadline=None))]
    fn new(
        start: NaiveDateTime,
        config: Option<EngineConfig>,
        finish_deadline: Option<NaiveDateTime>,
    ) -> Self {
        let settings = ProjectSettings {
            start,
            finish_deadline,
        };
        Self {
            engine: Engine::new(settings, config.unwrap_or_default()),
        }
    }

    /// Add a task and return its id.
    #[pyo3(signature = (name, duration_days, parent=None, constraint=None, constraint_date=None))]
    fn add_task(
        &mut self,
        name: String,
        duration_days: f64,
        parent: Option<u32>,
        constraint: Option<&str>,
        constraint_date: Option<NaiveDateTime>,
    ) -> PyResult<u32> {
        let mut spec = TaskSpec::new(name, days_to_duration(duration_days)?);
        if let Some(parent) = parent {
            spec = spec.with_parent(TaskId(parent));
        }
        if let Some(kind) = constraint {
            spec = spec.with_constraint(parse_constraint(kind, constraint_date)?);
        }
        Ok(self.engine.create_task(spec)?.0)
    }

    /// Remove a task and its subtree; returns the removed ids.
    fn remove_task(&mut self, task: u32) -> PyResult<Vec<u32>> {
        let removed = self.engine.delete_task(TaskId(task))?;
        Ok(removed.into_iter().map(|id| id.0).collect())
    }

    #[pyo3(signature = (predecessor, successor, relation="FS", lag_days=0.0))]
    fn add_dependency(
        &mut self,
        predecessor: u32,
        successor: u32,
        relation: &str,
        lag_days: f64,
    ) -> PyResult<u32> {
        let relation = RelationType::parse(relation)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown relation type: {}", relation)))?;
        let spec = DependencySpec::finish_to_start(TaskId(predecessor), TaskId(successor))
            .with_relation(relation)
            .with_lag(days_to_duration(lag_days)?);
        Ok(self.engine.create_dependency(spec)?.0)
    }

    fn remove_dependency(&mut self, dependency: u32) -> PyResult<()> {
        self.engine.remove_dependency(DependencyId(dependency))?;
        Ok(())
    }

    fn set_duration(&mut self, task: u32, duration_days: f64) -> PyResult<()> {
        let update = TaskUpdate::Duration(days_to_duration(duration_days)?);
        Ok(self.engine.update_task(TaskId(task), update)?)
    }

    #[pyo3(signature = (task, constraint, date=None))]
    fn set_constraint(
        &mut self,
        task: u32,
        constraint: &str,
        date: Option<NaiveDateTime>,
    ) -> PyResult<()> {
        let update = TaskUpdate::Constraint(parse_constraint(constraint, date)?);
        Ok(self.engine.update_task(TaskId(task), update)?)
    }

    fn begin_batch(&mut self) {
        self.engine.begin_batch();
    }

    fn end_batch(&mut self) -> PyResult<()> {
        self.engine.end_batch()?;
        Ok(())
    }

    /// Recompute from one task, or everything when `task` is None.
    #[pyo3(signature = (task=None))]
    fn recalculate(&mut self, task: Option<u32>) -> PyResult<()> {
        self.engine.recalculate(task.map(TaskId))?;
        Ok(())
    }

    fn early_dates(&self, task: u32) -> PyResult<(NaiveDateTime, NaiveDateTime)> {
        Ok(range_tuple(self.engine.early_dates(TaskId(task))?))
    }

    fn late_dates(&self, task: u32) -> PyResult<(NaiveDateTime, NaiveDateTime)> {
        Ok(range_tuple(self.engine.late_dates(TaskId(task))?))
    }

    fn slack_days(&self, task: u32) -> PyResult<f64> {
        Ok(duration_to_days(self.engine.slack(TaskId(task))?))
    }

    fn is_critical(&self, task: u32) -> PyResult<bool> {
        Ok(self.engine.is_critical(TaskId(task))?)
    }

    fn project_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.engine.project_span().map(range_tuple)
    }

    fn critical_tasks(&self) -> Vec<u32> {
        self.engine.critical_tasks().into_iter().map(|id| id.0).collect()
    }

    fn pass_count(&self) -> u64 {
        self.engine.pass_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "Project(tasks={}, passes={})",
            self.engine.graph().task_count(),
            self.engine.pass_count()
        )
    }
}

/// The critpath.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EngineConfig>()?;
    m.add_class::<PyProject>()?;
    Ok(())
}
