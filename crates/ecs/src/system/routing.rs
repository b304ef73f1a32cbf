//! Routing along connections.

use std::marker::PhantomData;

use indexmap::IndexMap;
use tracing::trace;

use super::{System, SystemDescriptor, SystemOutcome, SystemRole, SystemView, TickContext};
use crate::component::{Component, ComponentKind};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::Stage;

/// Directed link between two network elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub upstream: Entity,
    pub downstream: Entity,
}

impl Connection {
    pub fn new(upstream: Entity, downstream: Entity) -> Self {
        Self {
            upstream,
            downstream,
        }
    }
}

impl Component for Connection {}

/// Carries an output of connected elements into an input of their
/// downstream element.
///
/// Every entity holding both a [`Connection`] and an `Out` component
/// contributes `extract(out)` to its downstream entity. Each entity holding
/// `In` then receives the sum of its contributions (zero if nothing flows
/// into it). A downstream entity without `In` is an error.
pub struct RoutingSystem<Out, In> {
    descriptor: SystemDescriptor,
    extract: fn(&Out) -> f64,
    apply: fn(&mut In, f64),
    _marker: PhantomData<fn() -> (Out, In)>,
}

impl<Out: Component, In: Component> RoutingSystem<Out, In> {
    pub fn new(name: impl Into<String>, extract: fn(&Out) -> f64, apply: fn(&mut In, f64)) -> Self {
        let descriptor = SystemDescriptor::new(name, SystemRole::Routing)
            .read::<Connection>()
            .read::<Out>()
            .write::<In>();
        Self {
            descriptor,
            extract,
            apply,
            _marker: PhantomData,
        }
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.descriptor.stage = stage;
        self
    }
}

impl<Out: Component, In: Component> System for RoutingSystem<Out, In> {
    fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    fn run(&mut self, view: &mut SystemView<'_>, _ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        let connection = ComponentKind::of::<Connection>();
        let output = ComponentKind::of::<Out>();
        let input = ComponentKind::of::<In>();

        let mut totals: IndexMap<Entity, f64> = IndexMap::new();
        for link in &view.query(&[connection, output])? {
            let Connection { downstream, .. } = *view.get::<Connection>(link)?;
            if !view.is_alive(downstream) {
                return Err(Error::UnknownEntity(downstream));
            }
            view.get::<In>(downstream)?;
            let value = (self.extract)(view.get::<Out>(link)?);
            *totals.entry(downstream).or_insert(0.0) += value;
        }

        let receivers: Vec<Entity> = view.query(&[input])?.iter().collect();
        for receiver in receivers {
            let total = totals.get(&receiver).copied().unwrap_or(0.0);
            (self.apply)(view.get_mut::<In>(receiver)?, total);
        }
        trace!(routes = totals.len(), "routing applied");
        Ok(SystemOutcome::done())
    }
}
