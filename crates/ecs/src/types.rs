//! Core engine types
//!
//! Values carried by forcing events and snapshots, stage ordinals, and the
//! per-tick simulation context handed to every system.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime value exchanged between the engine and components.
///
/// Forcing events carry a `Value` into a component, and reporting reads
/// components back out as `Value`s. Units are the caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
}

impl Value {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// True when every component of the value is finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Scalar(v) => v.is_finite(),
            Value::Vec2(v) => v.iter().all(|c| c.is_finite()),
            Value::Vec3(v) => v.iter().all(|c| c.is_finite()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(0.0)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Vec2([x, y]) => write!(f, "[{x}, {y}]"),
            Value::Vec3([x, y, z]) => write!(f, "[{x}, {y}, {z}]"),
        }
    }
}

/// Ordinal grouping of systems. Stages run in ascending order with a barrier
/// between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stage(pub u32);

impl Stage {
    /// Conventional stage for forcing systems.
    pub const FORCING: Stage = Stage(0);
    /// Conventional stage for solver systems.
    pub const SOLVE: Stage = Stage(100);
    /// Conventional stage for routing systems.
    pub const ROUTE: Stage = Stage(200);
    /// Conventional stage for reporting systems. Reporting always runs after
    /// every other stage regardless of its ordinal.
    pub const REPORT: Stage = Stage(300);
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.0)
    }
}

/// Clock state for the tick being executed.
///
/// Created by the simulation loop for every tick and passed by reference into
/// each system invocation. Systems never see global mutable clock state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationContext {
    /// Zero-based index of the tick being executed.
    pub tick: u64,
    /// Simulation time of this tick.
    pub time: f64,
    /// Time step between ticks.
    pub dt: f64,
    /// Configured start time.
    pub start: f64,
    /// Configured end time (inclusive).
    pub end: f64,
}

impl SimulationContext {
    /// True for the last tick the clock will produce.
    pub fn is_final_tick(&self) -> bool {
        self.time + self.dt > self.end + time_epsilon(self.dt)
    }
}

/// Tolerance used when comparing clock times, scaled to the step size.
pub(crate) fn time_epsilon(dt: f64) -> f64 {
    dt.abs() * 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Scalar(2.5).as_scalar(), Some(2.5));
        assert_eq!(Value::Vec3([1.0, 2.0, 3.0]).as_scalar(), None);
        assert_eq!(Value::Vec3([1.0, 2.0, 3.0]).as_vec3(), Some([1.0, 2.0, 3.0]));
        assert!(!Value::Vec2([1.0, f64::NAN]).is_finite());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::FORCING < Stage::SOLVE);
        assert!(Stage::SOLVE < Stage::ROUTE);
        assert!(Stage::ROUTE < Stage::REPORT);
    }

    #[test]
    fn test_final_tick_detection() {
        let ctx = SimulationContext {
            tick: 3,
            time: 3.0,
            dt: 1.0,
            start: 0.0,
            end: 3.0,
        };
        assert!(ctx.is_final_tick());

        let earlier = SimulationContext { tick: 2, time: 2.0, ..ctx };
        assert!(!earlier.is_final_tick());
    }
}
