//! World: entity registry plus component store.
//!
//! The world is populated by the domain-definition provider before the
//! simulation is built. During a run it is owned by the simulation loop and
//! systems only reach it through scoped [`SystemView`](crate::system::SystemView)s.

use crate::component::{Bundle, Component, ComponentKind, ComponentStore};
use crate::entity::{Entity, EntityRegistry};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::system::{SystemDescriptor, SystemView};
use crate::types::Value;

#[derive(Default)]
pub struct World {
    entities: EntityRegistry,
    components: ComponentStore,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an entity with no components.
    pub fn create(&mut self) -> Entity {
        self.entities.create()
    }

    /// Allocate an entity and attach every component of `bundle`.
    pub fn spawn_bundle<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.entities.create();
        bundle.insert_into(&mut self.components, entity);
        let bits: Vec<usize> = B::kinds()
            .iter()
            .filter_map(|kind| self.components.bit_of(kind))
            .collect();
        if let Ok(signature) = self.entities.signature_mut(entity) {
            for bit in bits {
                signature.insert(bit);
            }
        }
        entity
    }

    /// Destroy an entity and drop all of its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        self.components.remove_all(entity);
        self.entities.destroy(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn alive_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Live entities in ascending index order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    /// Register a component kind without attaching it to anything, so
    /// systems may declare it before the first entity carries it.
    pub fn register<C: Component>(&mut self) -> ComponentKind {
        self.components.register::<C>();
        ComponentKind::of::<C>()
    }

    pub fn is_registered(&self, kind: &ComponentKind) -> bool {
        self.components.is_registered(kind)
    }

    /// Registered component kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.components.kinds()
    }

    /// Attach `value` to `entity`, replacing any existing component of the
    /// same kind. Returns the replaced value.
    pub fn attach<C: Component>(&mut self, entity: Entity, value: C) -> Result<Option<C>> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        let bit = self.components.register::<C>();
        self.entities.signature_mut(entity)?.insert(bit);
        Ok(self.components.insert(entity, value))
    }

    /// Remove the component of kind `C` from `entity`. Returns whether one
    /// was present.
    pub fn detach<C: Component>(&mut self, entity: Entity) -> Result<bool> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        let kind = ComponentKind::of::<C>();
        let Some(bit) = self.components.bit_of(&kind) else {
            return Ok(false);
        };
        self.entities.signature_mut(entity)?.remove(bit);
        Ok(self.components.remove_kind(entity, &kind))
    }

    pub fn has(&self, entity: Entity, kind: &ComponentKind) -> bool {
        match (self.entities.signature(entity), self.components.bit_of(kind)) {
            (Some(signature), Some(bit)) => signature.contains(bit),
            _ => false,
        }
    }

    pub fn get<C: Component>(&self, entity: Entity) -> Result<&C> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        self.components
            .typed::<C>()
            .and_then(|column| column.get(entity.index()))
            .ok_or(Error::MissingComponent {
                entity,
                kind: ComponentKind::of::<C>(),
            })
    }

    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Result<&mut C> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        self.components
            .typed_mut::<C>()
            .and_then(|column| column.get_mut(entity.index()))
            .ok_or(Error::MissingComponent {
                entity,
                kind: ComponentKind::of::<C>(),
            })
    }

    /// Entities holding every kind in `kinds`, ascending by index.
    ///
    /// A kind no entity ever carried matches nothing.
    pub fn query(&self, kinds: &[ComponentKind]) -> Query<'_> {
        Query::lenient(&self.entities, &self.components, kinds)
    }

    /// Apply a type-erased value to the entity's component of `kind`.
    pub fn apply_value(&mut self, entity: Entity, kind: &ComponentKind, value: &Value) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        let column = self
            .components
            .column_mut(kind)
            .ok_or(Error::UnregisteredKind { kind: *kind })?;
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

    /// Observe the entity's component of `kind` as a [`Value`].
    pub fn observe(&self, entity: Entity, kind: &ComponentKind) -> Option<Value> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.components.column(kind)?.observe(entity.index())
    }

    /// Run `f` with a view scoped to `descriptor`.
    ///
    /// The descriptor's write columns are checked out for the duration of
    /// the call and put back afterwards, also when `f` fails.
    pub fn with_view<R>(
        &mut self,
        descriptor: &SystemDescriptor,
        f: impl FnOnce(&mut SystemView<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut taken = self.components.take_columns(&descriptor.writes)?;
        let result = {
            let mut view = SystemView::new(&self.entities, &self.components, &mut taken, descriptor);
            f(&mut view)
        };
        self.components.restore_columns(taken);
        result
    }

    pub(crate) fn parts_mut(&mut self) -> (&EntityRegistry, &mut ComponentStore) {
        (&self.entities, &mut self.components)
    }
}
