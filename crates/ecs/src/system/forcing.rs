//! Forcing: applies due events to their target components.

use tracing::trace;

use super::{System, SystemDescriptor, SystemOutcome, SystemRole, SystemView, TickContext};
use crate::component::{Component, ComponentKind};
use crate::error::Result;
use crate::types::Stage;

/// Applies every due event whose kind this system writes.
///
/// Events for other kinds are left to other forcing systems. The loop rejects
/// events that no forcing system writes before any system runs.
pub struct ForcingSystem {
    descriptor: SystemDescriptor,
}

impl ForcingSystem {
    pub fn new(name: impl Into<String>, kinds: impl IntoIterator<Item = ComponentKind>) -> Self {
        Self {
            descriptor: SystemDescriptor::new(name, SystemRole::Forcing).writes(kinds),
        }
    }

    /// Forcing system for a single component kind.
    pub fn of<C: Component>(name: impl Into<String>) -> Self {
        Self::new(name, [ComponentKind::of::<C>()])
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.descriptor.stage = stage;
        self
    }
}

impl System for ForcingSystem {
    fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        for drained in ctx.due() {
            let event = &drained.event;
            if !self.descriptor.writes.contains(&event.kind) {
                continue;
            }
            view.apply_value(event.target, &event.kind, &event.value)?;
            trace!(
                target_entity = %event.target,
                kind = %event.kind,
                value = %event.value,
                late = drained.late,
                "forcing applied"
            );
        }
        Ok(SystemOutcome::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{Event, EventQueue};
    use crate::system::tests::{Head, Inflow, sim};
    use crate::world::World;

    #[test]
    fn test_applies_only_owned_kinds() {
        let mut world = World::new();
        let node = world.spawn_bundle((Head(0.0), Inflow(0.0)));
        let mut queue = EventQueue::new();
        queue.schedule(Event::to::<Inflow>(node, 10.0, 0.0)).unwrap();
        queue.schedule(Event::to::<Head>(node, 99.0, 0.0)).unwrap();
        let due = queue.drain_due(0.0);

        let mut forcing = ForcingSystem::of::<Inflow>("rain");
        let descriptor = forcing.descriptor().clone();
        let ctx = TickContext::new(sim(0)).with_events(&due);
        world
            .with_view(&descriptor, |view| forcing.run(view, &ctx))
            .unwrap();

        assert_eq!(world.get::<Inflow>(node).unwrap(), &Inflow(10.0));
        assert_eq!(world.get::<Head>(node).unwrap(), &Head(0.0));
    }

    #[test]
    fn test_later_event_overrides_earlier() {
        let mut world = World::new();
        let node = world.spawn_bundle((Inflow(0.0),));
        let mut queue = EventQueue::new();
        queue.schedule(Event::to::<Inflow>(node, 4.0, 0.5)).unwrap();
        queue.schedule(Event::to::<Inflow>(node, 1.0, 0.0)).unwrap();
        let due = queue.drain_due(1.0);

        let mut forcing = ForcingSystem::of::<Inflow>("rain");
        let descriptor = forcing.descriptor().clone();
        let ctx = TickContext::new(sim(1)).with_events(&due);
        world
            .with_view(&descriptor, |view| forcing.run(view, &ctx))
            .unwrap();

        assert_eq!(world.get::<Inflow>(node).unwrap(), &Inflow(4.0));
    }

    #[test]
    fn test_event_for_destroyed_entity_fails() {
        let mut world = World::new();
        let node = world.spawn_bundle((Inflow(0.0),));
        world.destroy(node).unwrap();
        let mut queue = EventQueue::new();
        queue.schedule(Event::to::<Inflow>(node, 1.0, 0.0)).unwrap();
        let due = queue.drain_due(0.0);

        let mut forcing = ForcingSystem::of::<Inflow>("rain");
        let descriptor = forcing.descriptor().clone();
        let ctx = TickContext::new(sim(0)).with_events(&due);
        let result = world.with_view(&descriptor, |view| forcing.run(view, &ctx));
        assert!(matches!(result, Err(Error::UnknownEntity(e)) if e == node));
    }
}
