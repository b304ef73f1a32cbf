//! Simulation configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do when a solver hits its iteration cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Abort the run with a convergence failure.
    Abort,
    /// Keep the best state, annotate the tick and continue.
    #[default]
    Continue,
}

/// How conflict-free systems of one level are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// Clock bounds and run policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time of the first tick.
    pub start: f64,
    /// Last time a tick may run at (inclusive).
    pub end: f64,
    /// Step between ticks.
    pub dt: f64,
    pub convergence_policy: ConvergencePolicy,
    pub execution: ExecutionMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 3600.0,
            dt: 60.0,
            convergence_policy: ConvergencePolicy::default(),
            execution: ExecutionMode::default(),
        }
    }
}

impl SimulationConfig {
    pub fn new(start: f64, end: f64, dt: f64) -> Self {
        Self {
            start,
            end,
            dt,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.convergence_policy = policy;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "start and end must be finite, got {} and {}",
                self.start, self.end
            )));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if self.end < self.start {
            return Err(Error::InvalidConfig(format!(
                "end ({}) is before start ({})",
                self.end, self.start
            )));
        }
        Ok(())
    }

    /// Number of ticks a full run executes.
    pub fn tick_count(&self) -> u64 {
        let span = (self.end - self.start) / self.dt;
        (span + 1e-9).floor() as u64 + 1
    }
}
