//! Chat ECS
//!
//! Entity-component-system engine for time-stepped hydraulic network
//! simulation.
//!
//! A [`World`] holds generation-tagged [`Entity`] handles and dense component
//! columns. [`System`]s declare which component kinds they read and write;
//! the [`Schedule`] orders them per stage from those declarations and the
//! [`Simulation`] loop drives them tick by tick, injecting forcing
//! [`Event`]s, iterating solvers to convergence and handing settled state to
//! reporting systems.
//!
//! ```text
//! World ──► Simulation::step
//!             ├─ clock.advance()
//!             ├─ queue.drain_due(time)
//!             ├─ stages (forcing → solve → route), level by level
//!             ├─ reporting ──► SnapshotWriter
//!             └─ termination check
//! ```

pub mod component;
pub mod entity;
pub mod error;
pub mod event;
pub mod query;
pub mod schedule;
pub mod simulation;
pub mod system;
pub mod types;
pub mod world;

pub use component::{Bundle, Column, Component, ComponentKind};
pub use entity::{Entity, EntityRegistry};
pub use error::{AccessMode, Error, ReportError, Result};
pub use event::{DrainedEvent, Event, EventQueue};
pub use query::Query;
pub use schedule::{Level, Schedule, StagePlan};
pub use simulation::{
    CancellationToken, ConvergencePolicy, ExecutionMode, LoopState, RunReport, Simulation,
    SimulationBuilder, SimulationConfig, Termination, TickSummary,
};
pub use system::{
    Annotation, Connection, ConvergenceConfig, ConvergenceReport, EntitySnapshot, FnSystem,
    ForcingSystem, MemoryWriter, NullWriter, ReportingSystem, RoutingSystem, SnapshotWriter,
    Solver, SolverSystem, System, SystemDescriptor, SystemOutcome, SystemRole, SystemView,
    TickContext, TickRecord,
};
pub use types::{SimulationContext, Stage, Value};
pub use world::World;
