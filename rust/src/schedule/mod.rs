//! CPM date computation over a [`DependencyGraph`](crate::graph::DependencyGraph).
//!
//! Records and epochs live here, together with the pass runner that fills them,
//! the summary rollup and the critical path detector.

mod critical;
mod passes;
mod record;
mod rollup;
mod snapshot;
mod tracker;

pub use critical::CriticalPathDetector;
pub use passes::{PassKind, PassReport, PassRunner};
pub use record::{CalcContext, CalcOutcome, ConstraintConflict, ScheduleMode, ScheduleRecord};
pub use rollup::roll_up_summaries;
pub use snapshot::{ScheduleSnapshot, TaskSchedule};
pub use tracker::{DirtyState, DirtyTracker, Epoch};
