//! Entity registry
//!
//! An [`Entity`] is an `(index, generation)` pair. The index addresses a slot
//! in every dense component column; the generation detects stale handles once
//! a slot has been recycled.
//!
//! ```text
//! slots:     [g0 alive, g1 free, g0 alive, g2 free]
//! free_list: [1, 3]
//! ```
//!
//! Allocation pops the free list first. Destroying an entity bumps the slot's
//! generation before the slot goes back on the free list, so a recycled index
//! never aliases an older handle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Handle to a simulated network object (node, link, gauge, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Slot index. Identifies the entity's position in component columns.
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Bitset of component kinds present on an entity (its implicit archetype).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    words: Vec<u64>,
}

impl Signature {
    pub fn insert(&mut self, bit: usize) {
        let word = bit / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % 64);
    }

    pub fn remove(&mut self, bit: usize) {
        if let Some(w) = self.words.get_mut(bit / 64) {
            *w &= !(1 << (bit % 64));
        }
    }

    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .is_some_and(|w| w & (1 << (bit % 64)) != 0)
    }

    /// True when every bit of `other` is also set in `self`.
    pub fn contains_all(&self, other: &Signature) -> bool {
        other.words.iter().enumerate().all(|(i, &w)| {
            let mine = self.words.get(i).copied().unwrap_or(0);
            mine & w == w
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    alive: bool,
    signature: Signature,
}

/// Allocates, recycles and tracks entity identifiers.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    alive: usize,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new entity, reusing a freed slot when one is available.
    pub fn create(&mut self) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            return Entity {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("entity index space exhausted ({} slots)", self.slots.len())
        });
        self.slots.push(Slot {
            generation: 0,
            alive: true,
            signature: Signature::default(),
        });
        Entity {
            index,
            generation: 0,
        }
    }

    /// Release an entity. Its slot's generation is bumped so the handle
    /// becomes stale. Slots whose generation is exhausted are retired.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        let slot = &mut self.slots[entity.index as usize];
        slot.alive = false;
        slot.signature.clear();
        self.alive -= 1;
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                self.free_list.push(entity.index);
            }
            None => {
                tracing::debug!(index = entity.index, "entity slot retired");
            }
        }
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|s| s.alive && s.generation == entity.generation)
    }

    /// Number of currently alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Number of slots ever allocated. Upper bound on entity indices.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn signature(&self, entity: Entity) -> Option<&Signature> {
        if !self.is_alive(entity) {
            return None;
        }
        Some(&self.slots[entity.index as usize].signature)
    }

    pub(crate) fn signature_mut(&mut self, entity: Entity) -> Result<&mut Signature> {
        if !self.is_alive(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        Ok(&mut self.slots[entity.index as usize].signature)
    }

    /// The live entity occupying `index`, if any.
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        self.slots.get(index as usize).and_then(|slot| {
            slot.alive.then_some(Entity {
                index,
                generation: slot.generation,
            })
        })
    }

    /// Live entities in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.slots.len() as u32).filter_map(|i| self.entity_at(i))
    }
}
