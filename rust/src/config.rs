//! Configuration for the scheduling engine.

use chrono::Duration;
use pyo3::prelude::*;

/// Engine tunables shared by every pass.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tasks with slack at or below this many minutes are critical.
    #[pyo3(get, set)]
    pub critical_slack_minutes: i64,
    /// Pin violated required dates instead of letting links win.
    #[pyo3(get, set)]
    pub honor_required_dates: bool,
    /// Verbosity level: 0=silent, 1=passes, 2=tasks, 3=debug.
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            critical_slack_minutes: 0,
            honor_required_dates: false,
            verbosity: 0,
        }
    }
}

impl EngineConfig {
    pub fn critical_threshold(&self) -> Duration {
        Duration::minutes(self.critical_slack_minutes)
    }
}

#[pymethods]
impl EngineConfig {
    #[new]
    #[pyo3(signature = (critical_slack_minutes=0, honor_required_dates=false, verbosity=0))]
    fn new(critical_slack_minutes: i64, honor_required_dates: bool, verbosity: u8) -> Self {
        Self {
            critical_slack_minutes,
            honor_required_dates,
            verbosity,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "EngineConfig(critical_slack_minutes={}, honor_required_dates={}, verbosity={})",
            self.critical_slack_minutes, self.honor_required_dates, self.verbosity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.critical_slack_minutes, 0);
        assert!(!config.honor_required_dates);
        assert_eq!(config.critical_threshold(), Duration::zero());
    }

    #[test]
    fn test_threshold_in_minutes() {
        let config = EngineConfig::new(90, false, 0);
        assert_eq!(config.critical_threshold(), Duration::minutes(90));
    }
}
