//! Entity queries
//!
//! A [`Query`] selects every live entity whose signature contains all the
//! requested component kinds. It is lazy and restartable: each call to
//! [`Query::iter`] walks the registry again in ascending index order.

use crate::component::{ComponentKind, ComponentStore};
use crate::entity::{Entity, EntityRegistry, Signature};
use crate::error::{Error, Result};

/// Lazy selection of entities holding a set of component kinds.
#[derive(Clone)]
pub struct Query<'w> {
    registry: &'w EntityRegistry,
    /// `None` when a requested kind was never registered; nothing matches.
    mask: Option<Signature>,
}

impl<'w> Query<'w> {
    pub(crate) fn new(
        registry: &'w EntityRegistry,
        store: &ComponentStore,
        kinds: &[ComponentKind],
    ) -> Result<Self> {
        let mut mask = Signature::default();
        for kind in kinds {
            let bit = store
                .bit_of(kind)
                .ok_or(Error::UnregisteredKind { kind: *kind })?;
            mask.insert(bit);
        }
        Ok(Self {
            registry,
            mask: Some(mask),
        })
    }

    /// Like [`Query::new`], but an unregistered kind yields an empty query.
    pub(crate) fn lenient(
        registry: &'w EntityRegistry,
        store: &ComponentStore,
        kinds: &[ComponentKind],
    ) -> Self {
        let mut mask = Signature::default();
        for kind in kinds {
            let Some(bit) = store.bit_of(kind) else {
                return Self { registry, mask: None };
            };
            mask.insert(bit);
        }
        Self {
            registry,
            mask: Some(mask),
        }
    }

    /// Iterate matching entities in ascending index order.
    pub fn iter(&self) -> QueryIter<'w, '_> {
        QueryIter {
            registry: self.registry,
            mask: self.mask.as_ref(),
            next: 0,
        }
    }

    /// Number of matching entities.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'w, 'q> IntoIterator for &'q Query<'w> {
    type Item = Entity;
    type IntoIter = QueryIter<'w, 'q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entities of a [`Query`].
pub struct QueryIter<'w, 'q> {
    registry: &'w EntityRegistry,
    mask: Option<&'q Signature>,
    next: usize,
}

impl Iterator for QueryIter<'_, '_> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let mask = self.mask?;
        while self.next < self.registry.slot_count() {
            let index = self.next as u32;
            self.next += 1;
            let Some(entity) = self.registry.entity_at(index) else {
                continue;
            };
            if self
                .registry
                .signature(entity)
                .is_some_and(|sig| sig.contains_all(mask))
            {
                return Some(entity);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.mask.is_none() {
            return (0, Some(0));
        }
        (0, Some(self.registry.slot_count().saturating_sub(self.next)))
    }
}
