//! Component storage
//!
//! Every component kind gets one dense column indexed by entity slot index.
//! Columns live behind a type-erased trait so the store can move them in and
//! out of system views, apply forcing values, and observe values for
//! reporting without knowing the concrete type.

use std::any::{Any, TypeId, type_name};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::Value;

/// Plain data record attachable to an entity.
///
/// `observe` exposes the component to reporting; `force` lets forcing events
/// overwrite it. Both are opt-in: the defaults report nothing and reject
/// every forcing value.
pub trait Component: Send + Sync + 'static {
    /// Value reported in snapshots, if any.
    fn observe(&self) -> Option<Value> {
        None
    }

    /// Apply a forcing value. Return `Err` with a reason when the value does
    /// not fit this component.
    fn force(&mut self, value: &Value) -> std::result::Result<(), String> {
        let _ = value;
        Err("component does not accept forcing values".to_string())
    }
}

/// Runtime identifier of a component type.
#[derive(Clone, Copy)]
pub struct ComponentKind {
    id: TypeId,
    name: &'static str,
}

impl ComponentKind {
    pub fn of<C: Component>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: short_type_name(type_name::<C>()),
        }
    }

    /// Short type name (module path stripped), used in diagnostics and
    /// snapshot records.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentKind {}

impl Hash for ComponentKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ComponentKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Strip the module path from a type name (`crate::net::Head` → `Head`).
/// Generic types keep their full name.
fn short_type_name(full: &'static str) -> &'static str {
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}

/// Dense storage for one component kind.
pub struct Column<C> {
    slots: Vec<Option<C>>,
}

impl<C: Component> Column<C> {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn get(&self, index: u32) -> Option<&C> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut C> {
        self.slots.get_mut(index as usize).and_then(Option::as_mut)
    }

    fn insert(&mut self, index: u32, value: C) -> Option<C> {
        let idx = index as usize;
        if self.slots.len() <= idx {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx].replace(value)
    }
}

/// Type-erased view of a [`Column`].
pub(crate) trait ErasedColumn: Send + Sync {
    fn kind(&self) -> ComponentKind;
    fn contains(&self, index: u32) -> bool;
    fn remove(&mut self, index: u32) -> bool;
    fn observe(&self, index: u32) -> Option<Value>;
    fn force(&mut self, index: u32, value: &Value) -> Option<std::result::Result<(), String>>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedColumn for Column<C> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::of::<C>()
    }

    fn contains(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    fn remove(&mut self, index: u32) -> bool {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .is_some()
    }

    fn observe(&self, index: u32) -> Option<Value> {
        self.get(index).and_then(Component::observe)
    }

    fn force(&mut self, index: u32, value: &Value) -> Option<std::result::Result<(), String>> {
        self.get_mut(index).map(|c| c.force(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) type ColumnBox = Box<dyn ErasedColumn>;

/// Columns moved out of the store for the duration of one system invocation.
pub(crate) type TakenColumns = IndexMap<ComponentKind, ColumnBox>;

/// All component columns of a world.
///
/// Kinds are assigned a stable bit (their registration order) used in entity
/// signatures. A column can be temporarily taken out of its slot while a
/// system holds write access to it.
#[derive(Default)]
pub struct ComponentStore {
    kinds: IndexMap<ComponentKind, usize>,
    columns: Vec<Option<ColumnBox>>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind and return its signature bit. Idempotent.
    pub fn register<C: Component>(&mut self) -> usize {
        let kind = ComponentKind::of::<C>();
        if let Some(bit) = self.kinds.get(&kind) {
            return *bit;
        }
        let bit = self.kinds.len();
        self.kinds.insert(kind, bit);
        self.columns.push(Some(Box::new(Column::<C>::new())));
        bit
    }

    pub fn bit_of(&self, kind: &ComponentKind) -> Option<usize> {
        self.kinds.get(kind).copied()
    }

    pub fn is_registered(&self, kind: &ComponentKind) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.kinds.keys().copied()
    }

    pub(crate) fn column(&self, kind: &ComponentKind) -> Option<&dyn ErasedColumn> {
        let bit = self.bit_of(kind)?;
        self.columns[bit].as_deref()
    }

    pub(crate) fn column_mut(&mut self, kind: &ComponentKind) -> Option<&mut ColumnBox> {
        let bit = self.bit_of(kind)?;
        self.columns[bit].as_mut()
    }

    pub(crate) fn typed<C: Component>(&self) -> Option<&Column<C>> {
        self.column(&ComponentKind::of::<C>())
            .and_then(|c| c.as_any().downcast_ref::<Column<C>>())
    }

    pub(crate) fn typed_mut<C: Component>(&mut self) -> Option<&mut Column<C>> {
        self.column_mut(&ComponentKind::of::<C>())
            .and_then(|c| c.as_any_mut().downcast_mut::<Column<C>>())
    }

    /// Insert or replace the component of `entity`. Returns the previous value.
    pub(crate) fn insert<C: Component>(&mut self, entity: Entity, value: C) -> Option<C> {
        self.register::<C>();
        match self.typed_mut::<C>() {
            Some(column) => column.insert(entity.index(), value),
            None => panic!(
                "column for {} is checked out while attaching",
                ComponentKind::of::<C>()
            ),
        }
    }

    pub(crate) fn remove_kind(&mut self, entity: Entity, kind: &ComponentKind) -> bool {
        self.column_mut(kind)
            .is_some_and(|column| column.remove(entity.index()))
    }

    /// Drop every component stored at the entity's slot.
    pub(crate) fn remove_all(&mut self, entity: Entity) {
        for column in self.columns.iter_mut().flatten() {
            column.remove(entity.index());
        }
    }

    /// Move the columns for `kinds` out of the store.
    ///
    /// Fails without taking anything if a kind is unregistered or its column
    /// is already checked out.
    pub(crate) fn take_columns<'k>(
        &mut self,
        kinds: impl IntoIterator<Item = &'k ComponentKind>,
    ) -> Result<TakenColumns> {
        let mut bits = Vec::new();
        for kind in kinds {
            let bit = self
                .bit_of(kind)
                .ok_or(Error::UnregisteredKind { kind: *kind })?;
            if self.columns[bit].is_none() {
                return Err(Error::ColumnUnavailable { kind: *kind });
            }
            bits.push((*kind, bit));
        }
        let mut taken = IndexMap::with_capacity(bits.len());
        for (kind, bit) in bits {
            if let Some(column) = self.columns[bit].take() {
                taken.insert(kind, column);
            }
        }
        Ok(taken)
    }

    /// Return columns previously taken with [`take_columns`](Self::take_columns).
    pub(crate) fn restore_columns(&mut self, taken: TakenColumns) {
        for (kind, column) in taken {
            if let Some(bit) = self.bit_of(&kind) {
                self.columns[bit] = Some(column);
            }
        }
    }
}

/// A group of components attached together.
pub trait Bundle: Send + Sync + 'static {
    fn kinds() -> Vec<ComponentKind>;

    #[doc(hidden)]
    fn insert_into(self, store: &mut ComponentStore, entity: Entity);
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            fn kinds() -> Vec<ComponentKind> {
                vec![$(ComponentKind::of::<$name>()),+]
            }

            #[allow(non_snake_case)]
            fn insert_into(self, store: &mut ComponentStore, entity: Entity) {
                let ($($name,)+) = self;
                $(store.insert(entity, $name);)+
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
