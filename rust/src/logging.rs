//! Pass tracing on stderr.
//!
//! `EngineConfig::verbosity` picks how much of each pass is traced. Every line
//! carries a level tag so a long trace can be grepped per level. Arguments
//! are not even evaluated when their level is off.

pub const VERBOSITY_SILENT: u8 = 0;
/// Pass start and finish, fast or full path, batch boundaries.
pub const VERBOSITY_PASSES: u8 = 1;
/// Per-task date changes and constraint conflicts.
pub const VERBOSITY_TASKS: u8 = 2;
/// Events, skipped phases, summary rollups.
pub const VERBOSITY_DEBUG: u8 = 3;

pub fn level_tag(level: u8) -> &'static str {
    match level {
        VERBOSITY_SILENT => "",
        VERBOSITY_PASSES => "[pass]",
        VERBOSITY_TASKS => "[task]",
        _ => "[debug]",
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($level:expr, $verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $level {
            eprintln!("{} {}", $crate::logging::level_tag($level), format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_passes {
    ($verbosity:expr, $($arg:tt)*) => {
        $crate::log_at!($crate::logging::VERBOSITY_PASSES, $verbosity, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_tasks {
    ($verbosity:expr, $($arg:tt)*) => {
        $crate::log_at!($crate::logging::VERBOSITY_TASKS, $verbosity, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        $crate::log_at!($crate::logging::VERBOSITY_DEBUG, $verbosity, $($arg)*)
    };
}
