//! Fixed-capacity component pools.
//!
//! Every component type in a schema owns exactly one [`ComponentPool`]. A pool
//! hands out stable slot indices: a slot keeps its index until it is
//! deallocated, after which a later `create` of the same type may reuse it.
//! Capacity is fixed when the pool is created; running out is reported to the
//! caller instead of growing.
//!
//! [`ComponentPools`] is the per-registry set of pools, stored type-erased
//! behind [`ErasedPool`] and indexed by [`ComponentId`].

use std::any::Any;
use std::ops::{Index, IndexMut};

use crate::component::{BoxedValue, Component, ComponentId};
use crate::schema::Schema;

/// Slot index inside a single [`ComponentPool`].
pub type PoolSlot = usize;

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Failures reported by a single pool. The registry attaches the component
/// name when turning these into [`EcsError`](crate::EcsError)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every slot is in use.
    #[error("pool is full (capacity {capacity})")]
    Exhausted { capacity: usize },
    /// A type-erased value did not downcast to the pool's component type.
    #[error("value type does not match the pool's component type")]
    TypeMismatch,
    /// The slot is not currently allocated.
    #[error("pool slot {slot} is not allocated")]
    Vacant { slot: PoolSlot },
}

// ---------------------------------------------------------------------------
// ComponentPool
// ---------------------------------------------------------------------------

/// Fixed-capacity, index-addressed storage for one component type.
#[derive(Debug, Clone)]
pub struct ComponentPool<T> {
    slots: Vec<Option<T>>,
    free: Vec<PoolSlot>,
    capacity: usize,
    len: usize,
}

impl<T> ComponentPool<T> {
    /// Create an empty pool that can hold at most `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    /// Store `value` and return its slot.
    ///
    /// Freed slots are reused before fresh ones are handed out.
    pub fn create(&mut self, value: T) -> Result<PoolSlot, PoolError> {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(value);
            self.len += 1;
            return Ok(slot);
        }
        if self.slots.len() >= self.capacity {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            });
        }
        self.slots.push(Some(value));
        self.len += 1;
        Ok(self.slots.len() - 1)
    }

    pub fn get(&self, slot: PoolSlot) -> Option<&T> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: PoolSlot) -> Option<&mut T> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Release `slot`, dropping and returning its value. Returns `None` if the
    /// slot was never allocated or is already free.
    pub fn deallocate(&mut self, slot: PoolSlot) -> Option<T> {
        let value = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.len -= 1;
        Some(value)
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Drop every value and forget all slots.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }

    /// Iterate `(slot, value)` pairs of allocated slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolSlot, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.as_ref().map(|v| (slot, v)))
    }
}

impl<T> Index<PoolSlot> for ComponentPool<T> {
    type Output = T;

    fn index(&self, slot: PoolSlot) -> &T {
        match self.get(slot) {
            Some(value) => value,
            None => panic!("component pool slot {slot} is not allocated"),
        }
    }
}

impl<T> IndexMut<PoolSlot> for ComponentPool<T> {
    fn index_mut(&mut self, slot: PoolSlot) -> &mut T {
        match self.get_mut(slot) {
            Some(value) => value,
            None => panic!("component pool slot {slot} is not allocated"),
        }
    }
}

// ---------------------------------------------------------------------------
// ErasedPool -- what the registry needs without knowing `T`
// ---------------------------------------------------------------------------

/// Type-erased view of a [`ComponentPool`].
///
/// Bulk operations (remove-all, clear, prototype instantiation) go through
/// this trait; typed access downcasts back to the concrete pool.
pub trait ErasedPool: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Release a slot. Returns `false` if it was not allocated.
    fn deallocate_slot(&mut self, slot: PoolSlot) -> bool;
    /// Store a clone of `value`, which must downcast to the pool's type.
    fn create_cloned(&mut self, value: &(dyn Any + Send + Sync)) -> Result<PoolSlot, PoolError>;
    /// Overwrite an allocated slot with a clone of `value`.
    fn replace_cloned(
        &mut self,
        slot: PoolSlot,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), PoolError>;
    /// Clone the value in `slot` into a boxed, type-erased value.
    fn clone_boxed(&self, slot: PoolSlot) -> Option<BoxedValue>;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn clear(&mut self);
}

impl<T: Component> ErasedPool for ComponentPool<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn deallocate_slot(&mut self, slot: PoolSlot) -> bool {
        self.deallocate(slot).is_some()
    }

    fn create_cloned(&mut self, value: &(dyn Any + Send + Sync)) -> Result<PoolSlot, PoolError> {
        let value = value.downcast_ref::<T>().ok_or(PoolError::TypeMismatch)?;
        self.create(value.clone())
    }

    fn replace_cloned(
        &mut self,
        slot: PoolSlot,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), PoolError> {
        let value = value.downcast_ref::<T>().ok_or(PoolError::TypeMismatch)?;
        let target = self.get_mut(slot).ok_or(PoolError::Vacant { slot })?;
        *target = value.clone();
        Ok(())
    }

    fn clone_boxed(&self, slot: PoolSlot) -> Option<BoxedValue> {
        self.get(slot).map(|value| Box::new(value.clone()) as BoxedValue)
    }

    fn len(&self) -> usize {
        ComponentPool::len(self)
    }

    fn capacity(&self) -> usize {
        ComponentPool::capacity(self)
    }

    fn clear(&mut self) {
        ComponentPool::clear(self)
    }
}

/// Build a boxed pool for `T`. Stored as a fn pointer in each component's vtable.
pub(crate) fn new_erased_pool<T: Component>(capacity: usize) -> Box<dyn ErasedPool> {
    Box::new(ComponentPool::<T>::with_capacity(capacity))
}

// ---------------------------------------------------------------------------
// ComponentPools
// ---------------------------------------------------------------------------

/// One pool per component type of a schema, indexed by [`ComponentId`].
pub struct ComponentPools {
    pools: Vec<Box<dyn ErasedPool>>,
}

impl ComponentPools {
    /// Create one empty pool of `capacity` slots per component in `schema`.
    pub fn new(schema: &Schema, capacity: usize) -> Self {
        Self {
            pools: schema
                .components()
                .iter()
                .map(|info| info.new_pool(capacity))
                .collect(),
        }
    }

    /// Typed access to the pool for component `id`. `None` if `id` is out of
    /// range or does not hold `T`.
    pub fn pool<T: Component>(&self, id: ComponentId) -> Option<&ComponentPool<T>> {
        self.pools.get(id.index())?.as_any().downcast_ref()
    }

    pub fn pool_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut ComponentPool<T>> {
        self.pools.get_mut(id.index())?.as_any_mut().downcast_mut()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to the schema the pools were built from.
    pub fn erased(&self, id: ComponentId) -> &dyn ErasedPool {
        self.pools[id.index()].as_ref()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to the schema the pools were built from.
    pub fn erased_mut(&mut self, id: ComponentId) -> &mut dyn ErasedPool {
        self.pools[id.index()].as_mut()
    }

    /// Borrow `N` distinct pools mutably at once.
    ///
    /// # Panics
    ///
    /// Panics if two ids are equal or out of range. Signature tables only
    /// contain distinct, registered ids.
    pub(crate) fn disjoint_mut<const N: usize>(
        &mut self,
        ids: [ComponentId; N],
    ) -> [&mut Box<dyn ErasedPool>; N] {
        match self.pools.get_disjoint_mut(ids.map(ComponentId::index)) {
            Ok(pools) => pools,
            Err(err) => panic!("signature component pools overlap or are out of range: {err}"),
        }
    }

    /// Number of pools (equals the schema's component count).
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn clear(&mut self) {
        for pool in &mut self.pools {
            pool.clear();
        }
    }
}

impl std::fmt::Debug for ComponentPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.pools.iter().map(|p| (p.len(), p.capacity())))
            .finish()
    }
}

/// Downcast a borrowed erased pool to its concrete type.
///
/// # Panics
///
/// Panics if the pool does not hold `T`; pools are created from the same
/// schema that resolves `T` to this id.
pub(crate) fn downcast_pool<T: Component>(pool: &mut Box<dyn ErasedPool>) -> &mut ComponentPool<T> {
    match pool.as_any_mut().downcast_mut::<ComponentPool<T>>() {
        Some(pool) => pool,
        None => panic!(
            "component pool does not hold `{}`",
            std::any::type_name::<T>()
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
