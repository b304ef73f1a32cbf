//! Engine errors
//!
//! Errors fall into three classes:
//!
//! - **Configuration**: cyclic dependencies, overlapping writes, bad stage
//!   placement, unregistered component kinds, invalid config values. Raised
//!   before the first tick; the simulation never starts.
//! - **Runtime-fatal**: unknown entities, kind mismatches, undeclared access,
//!   numeric blow-ups, convergence failures under the abort policy, writer
//!   failures. The run aborts with a diagnostic naming tick, system and entity.
//! - Runtime-recoverable conditions (late events, non-convergence under the
//!   continue policy) are not errors; they become annotations in the output.

use thiserror::Error;

use crate::component::ComponentKind;
use crate::entity::Entity;
use crate::types::Stage;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of access a system requested on a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

/// Errors raised by the world, scheduler and simulation loop.
#[derive(Debug, Error)]
pub enum Error {
    /// The entity is not alive (never created, destroyed, or a stale handle).
    #[error("unknown entity {0}")]
    UnknownEntity(Entity),

    /// The entity is alive but has no component of this kind.
    #[error("entity {entity} has no {kind} component")]
    MissingComponent { entity: Entity, kind: ComponentKind },

    /// A value could not be applied to a component of this kind.
    #[error("component kind mismatch on {entity} ({kind}): {message}")]
    ComponentKindMismatch {
        entity: Entity,
        kind: ComponentKind,
        message: String,
    },

    /// A system touched a component kind it did not declare.
    #[error("system '{system}' did not declare {mode} access to {kind}")]
    UndeclaredAccess {
        system: String,
        kind: ComponentKind,
        mode: AccessMode,
    },

    /// A component kind was referenced that no entity or registration
    /// introduced.
    #[error("component kind {kind} is not registered in the world")]
    UnregisteredKind { kind: ComponentKind },

    /// A column is already checked out by another system view.
    #[error("column {kind} is checked out by another system")]
    ColumnUnavailable { kind: ComponentKind },

    /// A system declares a component kind the world does not provide.
    #[error("system '{system}' requires component kind {kind}, which the world does not provide")]
    MissingRequiredKind { system: String, kind: ComponentKind },

    /// Systems within one stage depend on each other in a cycle.
    #[error("cycle detected in {stage}: {systems:?}")]
    CycleDetected { stage: Stage, systems: Vec<String> },

    /// Two systems in the same stage both write one component kind.
    #[error("systems '{first}' and '{second}' both write {kind} in {stage}")]
    OverlappingWrites {
        stage: Stage,
        kind: ComponentKind,
        first: String,
        second: String,
    },

    /// A system is placed where its role is not allowed.
    #[error("invalid schedule for system '{system}': {message}")]
    InvalidSchedule { system: String, message: String },

    /// Two systems were registered under the same name.
    #[error("duplicate system name '{0}'")]
    DuplicateSystem(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A forcing event targets a kind no forcing system declares.
    #[error("tick {tick}: no forcing system writes {kind} (event for {entity} at t={time})")]
    UnroutedEvent {
        tick: u64,
        entity: Entity,
        kind: ComponentKind,
        time: f64,
    },

    /// A solver produced a non-finite delta or value.
    #[error("numeric error in '{system}': {message}")]
    NumericError { system: String, message: String },

    /// A solver hit its iteration cap under the abort policy.
    #[error(
        "system '{system}' failed to converge at tick {tick} after {iterations} iterations (max delta {max_delta})"
    )]
    ConvergenceFailure {
        tick: u64,
        system: String,
        iterations: u32,
        max_delta: f64,
    },

    /// A system failed during a tick. Wraps the underlying cause.
    #[error("tick {tick}: system '{system}' failed: {source}")]
    SystemFailed {
        tick: u64,
        system: String,
        #[source]
        source: Box<Error>,
    },

    /// The output writer failed.
    #[error("report writer failed: {0}")]
    Report(#[from] ReportError),

    /// The simulation already reached its terminal state.
    #[error("simulation already terminated")]
    AlreadyTerminated,
}

impl Error {
    /// True for errors detected before the first tick.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingRequiredKind { .. }
                | Error::CycleDetected { .. }
                | Error::OverlappingWrites { .. }
                | Error::InvalidSchedule { .. }
                | Error::DuplicateSystem(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Process exit code a driver should report for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_configuration() { 2 } else { 1 }
    }

    /// Wrap this error with the tick and system it occurred in. Already
    /// wrapped errors are returned unchanged.
    pub(crate) fn in_system(self, tick: u64, system: &str) -> Error {
        match self {
            Error::SystemFailed { .. } | Error::ConvergenceFailure { .. } => self,
            other => Error::SystemFailed {
                tick,
                system: system.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Errors raised by snapshot writers.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("writer already closed")]
    AlreadyClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = Error::CycleDetected {
            stage: Stage::SOLVE,
            systems: vec!["a".into(), "b".into()],
        };
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 2);

        let err = Error::AlreadyTerminated;
        assert!(!err.is_configuration());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_in_system_wraps_once() {
        let wrapped = Error::AlreadyTerminated.in_system(4, "solver");
        let rewrapped = wrapped.in_system(5, "other");
        match rewrapped {
            Error::SystemFailed { tick, system, .. } => {
                assert_eq!(tick, 4);
                assert_eq!(system, "solver");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
