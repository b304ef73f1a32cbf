//! Systems
//!
//! A system is a unit of per-tick behaviour with declared data access. The
//! descriptor names the component kinds it reads and writes and the stage it
//! runs in; the scheduler derives ordering from those declarations, and the
//! [`SystemView`] handed to each invocation enforces them.
//!
//! Four roles are provided:
//!
//! - [`ForcingSystem`]: applies due forcing events to components
//! - [`SolverSystem`]: iterates an external [`Solver`] to convergence
//! - [`RoutingSystem`]: carries element outputs downstream along [`Connection`]s
//! - [`ReportingSystem`]: snapshots settled state to a [`SnapshotWriter`]
//!
//! [`FnSystem`] wraps a closure for anything else.

mod forcing;
mod reporting;
mod routing;
mod solver;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{Column, Component, ComponentKind, ComponentStore, ErasedColumn, TakenColumns};
use crate::entity::{Entity, EntityRegistry};
use crate::error::{AccessMode, Error, Result};
use crate::event::DrainedEvent;
use crate::query::Query;
use crate::types::{SimulationContext, Stage, Value};

pub use forcing::ForcingSystem;
pub use reporting::{
    Annotation, EntitySnapshot, MemoryWriter, NullWriter, ReportingSystem, SnapshotWriter,
    TickRecord,
};
pub use routing::{Connection, RoutingSystem};
pub use solver::{ConvergenceConfig, ConvergenceReport, Solver, SolverSystem};

/// Role tag of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    Forcing,
    Solver,
    Routing,
    Reporting,
}

impl SystemRole {
    /// Stage a system of this role runs in unless placed explicitly.
    pub fn default_stage(self) -> Stage {
        match self {
            SystemRole::Forcing => Stage::FORCING,
            SystemRole::Solver => Stage::SOLVE,
            SystemRole::Routing => Stage::ROUTE,
            SystemRole::Reporting => Stage::REPORT,
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemRole::Forcing => "forcing",
            SystemRole::Solver => "solver",
            SystemRole::Routing => "routing",
            SystemRole::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Declared identity and data access of a system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub name: String,
    pub role: SystemRole,
    pub reads: BTreeSet<ComponentKind>,
    pub writes: BTreeSet<ComponentKind>,
    pub stage: Stage,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>, role: SystemRole) -> Self {
        Self {
            name: name.into(),
            role,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            stage: role.default_stage(),
        }
    }

    pub fn reads(mut self, kinds: impl IntoIterator<Item = ComponentKind>) -> Self {
        self.reads.extend(kinds);
        self
    }

    pub fn writes(mut self, kinds: impl IntoIterator<Item = ComponentKind>) -> Self {
        self.writes.extend(kinds);
        self
    }

    pub fn read<C: Component>(self) -> Self {
        self.reads([ComponentKind::of::<C>()])
    }

    pub fn write<C: Component>(self) -> Self {
        self.writes([ComponentKind::of::<C>()])
    }

    /// Place the system in `stage`.
    pub fn at(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Every kind the system touches.
    pub fn accessed(&self) -> impl Iterator<Item = &ComponentKind> {
        self.reads.iter().chain(self.writes.difference(&self.reads))
    }

    /// True if `self` must run before `other`: it writes a kind `other` reads.
    pub fn feeds(&self, other: &SystemDescriptor) -> bool {
        self.writes.iter().any(|kind| other.reads.contains(kind))
    }

    /// First kind both systems write, if any.
    pub fn write_overlap(&self, other: &SystemDescriptor) -> Option<ComponentKind> {
        self.writes.intersection(&other.writes).next().copied()
    }

    fn allows(&self, kind: &ComponentKind, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => self.reads.contains(kind) || self.writes.contains(kind),
            AccessMode::Write => self.writes.contains(kind),
        }
    }
}

/// Per-invocation context: clock state plus this tick's events and
/// annotations so far.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'t> {
    sim: SimulationContext,
    due: &'t [DrainedEvent],
    annotations: &'t [Annotation],
}

impl TickContext<'static> {
    pub fn new(sim: SimulationContext) -> Self {
        Self {
            sim,
            due: &[],
            annotations: &[],
        }
    }
}

impl<'t> TickContext<'t> {
    pub fn with_events<'a>(self, due: &'a [DrainedEvent]) -> TickContext<'a>
    where
        't: 'a,
    {
        TickContext {
            sim: self.sim,
            due,
            annotations: self.annotations,
        }
    }

    pub fn with_annotations<'a>(self, annotations: &'a [Annotation]) -> TickContext<'a>
    where
        't: 'a,
    {
        TickContext {
            sim: self.sim,
            due: self.due,
            annotations,
        }
    }

    pub fn sim(&self) -> &SimulationContext {
        &self.sim
    }

    pub fn tick(&self) -> u64 {
        self.sim.tick
    }

    pub fn time(&self) -> f64 {
        self.sim.time
    }

    pub fn dt(&self) -> f64 {
        self.sim.dt
    }

    /// Events drained for this tick, in `(time, insertion)` order.
    pub fn due(&self) -> &'t [DrainedEvent] {
        self.due
    }

    /// Annotations recorded so far in this tick.
    pub fn annotations(&self) -> &'t [Annotation] {
        self.annotations
    }
}

/// What a system reports back to the loop after one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemOutcome {
    pub convergence: Option<ConvergenceReport>,
}

impl SystemOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn solved(report: ConvergenceReport) -> Self {
        Self {
            convergence: Some(report),
        }
    }
}

/// A unit of per-tick behaviour.
///
/// `run` is invoked once per tick with a view scoped to the descriptor's
/// reads and writes. `finish` is invoked exactly once when the simulation
/// terminates, whatever the reason.
pub trait System: Send {
    fn descriptor(&self) -> &SystemDescriptor;

    /// Check system-specific settings before the first tick.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: System + ?Sized> System for Box<S> {
    fn descriptor(&self) -> &SystemDescriptor {
        (**self).descriptor()
    }

    fn validate(&self) -> Result<()> {
        (**self).validate()
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        (**self).run(view, ctx)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Scoped access to the world for one system invocation.
///
/// Columns the system writes have been moved out of the store into the view;
/// everything else is read through a shared reference. Touching a kind the
/// descriptor does not declare fails with [`Error::UndeclaredAccess`].
pub struct SystemView<'w> {
    registry: &'w EntityRegistry,
    store: &'w ComponentStore,
    writes: &'w mut TakenColumns,
    descriptor: &'w SystemDescriptor,
}

impl<'w> SystemView<'w> {
    pub(crate) fn new(
        registry: &'w EntityRegistry,
        store: &'w ComponentStore,
        writes: &'w mut TakenColumns,
        descriptor: &'w SystemDescriptor,
    ) -> Self {
        Self {
            registry,
            store,
            writes,
            descriptor,
        }
    }

    /// Name of the system holding this view.
    pub fn system(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.registry.is_alive(entity)
    }

    /// Live entities in ascending index order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + use<'w> {
        self.registry.iter()
    }

    /// Entities holding every kind in `kinds`. Each kind must be declared.
    pub fn query(&self, kinds: &[ComponentKind]) -> Result<Query<'w>> {
        for kind in kinds {
            self.check(kind, AccessMode::Read)?;
        }
        Query::new(self.registry, self.store, kinds)
    }

    pub fn column<C: Component>(&self) -> Result<&Column<C>> {
        let kind = ComponentKind::of::<C>();
        self.check(&kind, AccessMode::Read)?;
        self.read_column(&kind)?
            .as_any()
            .downcast_ref::<Column<C>>()
            .ok_or(Error::UnregisteredKind { kind })
    }

    pub fn column_mut<C: Component>(&mut self) -> Result<&mut Column<C>> {
        let kind = ComponentKind::of::<C>();
        self.check(&kind, AccessMode::Write)?;
        self.writes
            .get_mut(&kind)
            .and_then(|column| column.as_any_mut().downcast_mut::<Column<C>>())
            .ok_or(Error::ColumnUnavailable { kind })
    }

    pub fn get<C: Component>(&self, entity: Entity) -> Result<&C> {
        self.ensure_alive(entity)?;
        self.column::<C>()?
            .get(entity.index())
            .ok_or(Error::MissingComponent {
                entity,
                kind: ComponentKind::of::<C>(),
            })
    }

    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Result<&mut C> {
        self.ensure_alive(entity)?;
        self.column_mut::<C>()?
            .get_mut(entity.index())
            .ok_or(Error::MissingComponent {
                entity,
                kind: ComponentKind::of::<C>(),
            })
    }

    /// Observe the entity's component of `kind`. `None` if it has none or
    /// the component does not report.
    pub fn observe(&self, entity: Entity, kind: &ComponentKind) -> Result<Option<Value>> {
        self.check(kind, AccessMode::Read)?;
        self.ensure_alive(entity)?;
        Ok(self.read_column(kind)?.observe(entity.index()))
    }

    /// Apply a type-erased value to the entity's component of `kind`.
    pub fn apply_value(&mut self, entity: Entity, kind: &ComponentKind, value: &Value) -> Result<()> {
        self.check(kind, AccessMode::Write)?;
        self.ensure_alive(entity)?;
        let column = self
            .writes
            .get_mut(kind)
            .ok_or(Error::ColumnUnavailable { kind: *kind })?;
        match column.force(entity.index(), value) {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(Error::ComponentKindMismatch {
                entity,
                kind: *kind,
                message,
            }),
            None => Err(Error::MissingComponent { entity, kind: *kind }),
        }
    }

    fn check(&self, kind: &ComponentKind, mode: AccessMode) -> Result<()> {
        if self.descriptor.allows(kind, mode) {
            Ok(())
        } else {
            Err(Error::UndeclaredAccess {
                system: self.descriptor.name.clone(),
                kind: *kind,
                mode,
            })
        }
    }

    fn ensure_alive(&self, entity: Entity) -> Result<()> {
        if self.registry.is_alive(entity) {
            Ok(())
        } else {
            Err(Error::UnknownEntity(entity))
        }
    }

    fn read_column(&self, kind: &ComponentKind) -> Result<&dyn ErasedColumn> {
        if let Some(column) = self.writes.get(kind) {
            return Ok(&**column);
        }
        match self.store.column(kind) {
            Some(column) => Ok(column),
            None if self.store.is_registered(kind) => Err(Error::ColumnUnavailable { kind: *kind }),
            None => Err(Error::UnregisteredKind { kind: *kind }),
        }
    }
}

/// Closure-backed system with an explicit descriptor.
pub struct FnSystem<F> {
    descriptor: SystemDescriptor,
    f: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&mut SystemView<'_>, &TickContext<'_>) -> Result<()> + Send,
{
    pub fn new(descriptor: SystemDescriptor, f: F) -> Self {
        Self { descriptor, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&mut SystemView<'_>, &TickContext<'_>) -> Result<()> + Send,
{
    fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        (self.f)(view, ctx)?;
        Ok(SystemOutcome::done())
    }
}
