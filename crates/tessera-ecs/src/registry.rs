//! The entity registry.
//!
//! [`EntityRegistry`] owns entity metadata, one index table per component type
//! mapping entity handles to pool slots, and the [`ComponentPools`] holding
//! the component values themselves.
//!
//! Entities live in a dense slot array. `create_entity` appends at the
//! occupied boundary, `kill` only marks a slot dead, and [`refresh`] compacts
//! the array in one pass, releasing every dead entity's components exactly
//! once. Slot indices are therefore stable between refreshes; handles are
//! stable forever.
//!
//! [`refresh`]: EntityRegistry::refresh

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bitset::Bitset;
use crate::component::{BoxedValue, Component, ComponentId};
use crate::entity::{Entity, EntityIndex};
use crate::pool::{ComponentPool, ComponentPools, PoolError, PoolSlot};
use crate::schema::Schema;
use crate::signature::{ComponentSet, Signature, SignatureFn};
use crate::EcsError;

/// Entity handle → pool slot, one table per component type.
pub type IndexTable = HashMap<Entity, PoolSlot>;

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Sizing knobs for an [`EntityRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Fixed number of slots in every component pool.
    pub pool_capacity: usize,
    /// Entity slots allocated up front.
    pub initial_entity_capacity: usize,
    /// Upper bound on occupied entity slots. `None` grows without limit.
    pub max_entities: Option<usize>,
}

impl RegistryConfig {
    pub const DEFAULT_POOL_CAPACITY: usize = 1024;
    pub const DEFAULT_ENTITY_CAPACITY: usize = 100;

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_initial_entity_capacity(mut self, capacity: usize) -> Self {
        self.initial_entity_capacity = capacity;
        self
    }

    pub fn with_max_entities(mut self, limit: usize) -> Self {
        self.max_entities = Some(limit);
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pool_capacity: Self::DEFAULT_POOL_CAPACITY,
            initial_entity_capacity: Self::DEFAULT_ENTITY_CAPACITY,
            max_entities: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EntitySlot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct EntitySlot {
    alive: bool,
    handle: Entity,
    signature: Bitset,
}

impl EntitySlot {
    const FREE: EntitySlot = EntitySlot {
        alive: false,
        handle: Entity::NULL,
        signature: Bitset::EMPTY,
    };
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Entities, their signatures and their components, for one [`Schema`].
///
/// Not synchronized: wrap it in a lock to share it between threads.
pub struct EntityRegistry {
    schema: Arc<Schema>,
    config: RegistryConfig,
    /// `len()` is the current capacity; unused tail slots are `FREE`.
    slots: Vec<EntitySlot>,
    /// Occupied slots, alive or killed: `[0, live_count)`.
    live_count: usize,
    /// Killed slots below `live_count` awaiting refresh.
    pending_dead: usize,
    handle_index: HashMap<Entity, EntityIndex>,
    /// Indexed by component id.
    index_tables: Vec<IndexTable>,
    pools: ComponentPools,
}

impl EntityRegistry {
    /// Create a registry with the default [`RegistryConfig`].
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self::with_config(schema, RegistryConfig::default())
    }

    pub fn with_config(schema: impl Into<Arc<Schema>>, config: RegistryConfig) -> Self {
        let schema = schema.into();
        let initial = match config.max_entities {
            Some(limit) => config.initial_entity_capacity.min(limit),
            None => config.initial_entity_capacity,
        };
        Self {
            pools: ComponentPools::new(&schema, config.pool_capacity),
            index_tables: vec![IndexTable::new(); schema.component_count()],
            slots: vec![EntitySlot::FREE; initial],
            live_count: 0,
            pending_dead: 0,
            handle_index: HashMap::new(),
            config,
            schema,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -- lifecycle ----------------------------------------------------------

    /// Allocate a new entity with an empty signature.
    ///
    /// Grows the slot array to `(capacity + 10) * 2` when it is full, bounded
    /// by [`RegistryConfig::max_entities`].
    pub fn create_entity(&mut self) -> Result<Entity, EcsError> {
        if self.live_count == self.slots.len() {
            self.grow()?;
        }
        let handle = Entity::next();
        let index = self.live_count;
        self.slots[index] = EntitySlot {
            alive: true,
            handle,
            signature: Bitset::EMPTY,
        };
        self.handle_index.insert(handle, index);
        self.live_count += 1;
        Ok(handle)
    }

    fn grow(&mut self) -> Result<(), EcsError> {
        let requested = self.live_count + 1;
        let mut new_capacity = (self.slots.len() + 10) * 2;
        if let Some(limit) = self.config.max_entities {
            if requested > limit {
                warn!(requested, limit, "entity capacity exhausted");
                return Err(EcsError::EntityCapacity { requested, limit });
            }
            new_capacity = new_capacity.min(limit);
        }
        debug!(
            from = self.slots.len(),
            to = new_capacity,
            "growing entity slots"
        );
        self.slots.resize(new_capacity, EntitySlot::FREE);
        Ok(())
    }

    /// Mark `entity` dead. Its slot and components are reclaimed by the next
    /// [`refresh`](Self::refresh).
    pub fn kill(&mut self, entity: Entity) -> Result<(), EcsError> {
        let index = self.slot_index(entity)?;
        let slot = &mut self.slots[index];
        if !slot.alive {
            return Err(EcsError::DeadEntity { entity });
        }
        slot.alive = false;
        self.pending_dead += 1;
        Ok(())
    }

    /// Compact the slot array, reclaiming every killed entity.
    ///
    /// Afterwards slots `[0, live_count)` hold exactly the entities that were
    /// alive, and each killed entity's components have been released once.
    /// Survivors keep their handles and components; some move to a lower slot
    /// index. Returns the number of entities reclaimed.
    pub fn refresh(&mut self) -> usize {
        if self.pending_dead == 0 {
            return 0;
        }

        let before = self.live_count;
        let mut lo = 0;
        let mut hi = self.live_count;
        loop {
            while lo < hi && self.slots[lo].alive {
                lo += 1;
            }
            while hi > lo && !self.slots[hi - 1].alive {
                hi -= 1;
                self.release(hi);
            }
            if lo >= hi {
                break;
            }

            // `lo` is dead and `hi - 1` is alive, with lo < hi - 1.
            hi -= 1;
            self.release(lo);
            self.slots.swap(lo, hi);
            self.handle_index.insert(self.slots[lo].handle, lo);
            lo += 1;
        }

        self.live_count = lo;
        self.pending_dead = 0;
        let reclaimed = before - lo;
        debug!(reclaimed, live = lo, "refreshed entity registry");
        reclaimed
    }

    /// Free the components and handle of the entity in `index`, leaving the
    /// slot `FREE`.
    fn release(&mut self, index: EntityIndex) {
        let handle = self.slots[index].handle;
        self.release_components(handle);
        self.handle_index.remove(&handle);
        self.slots[index] = EntitySlot::FREE;
    }

    fn release_components(&mut self, handle: Entity) -> usize {
        let mut released = 0;
        for info in self.schema.components() {
            if let Some(slot) = self.index_tables[info.id.index()].remove(&handle) {
                self.pools.erased_mut(info.id).deallocate_slot(slot);
                released += 1;
            }
        }
        released
    }

    /// Remove every entity and component. Handles issued so far become
    /// unknown; capacity is kept.
    pub fn clear(&mut self) {
        self.pools.clear();
        for table in &mut self.index_tables {
            table.clear();
        }
        self.handle_index.clear();
        self.slots.fill(EntitySlot::FREE);
        self.live_count = 0;
        self.pending_dead = 0;
    }

    // -- entity queries -----------------------------------------------------

    /// Whether `entity` is known and not killed.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.handle_index
            .get(&entity)
            .is_some_and(|&index| self.slots[index].alive)
    }

    /// Whether `entity` still occupies a slot, alive or killed.
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.handle_index.contains_key(&entity)
    }

    /// Current slot index of `entity`. Changes across refreshes.
    pub fn index_of(&self, entity: Entity) -> Option<EntityIndex> {
        self.handle_index.get(&entity).copied()
    }

    /// Handle stored in an occupied slot.
    pub fn entity_at(&self, index: EntityIndex) -> Option<Entity> {
        if index < self.live_count {
            Some(self.slots[index].handle)
        } else {
            None
        }
    }

    /// Occupied slots, including killed entities awaiting refresh.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn alive_count(&self) -> usize {
        self.live_count - self.pending_dead
    }

    /// Allocated entity slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Component and tag bits of `entity`. A killed entity keeps its last
    /// bits until it is reclaimed.
    pub fn signature_of(&self, entity: Entity) -> Result<Bitset, EcsError> {
        let index = self.slot_index(entity)?;
        Ok(self.slots[index].signature)
    }

    // -- components ---------------------------------------------------------

    /// Attach `value` to `entity`, overwriting any existing `T`.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        let id = self.component_id::<T>()?;
        let index = self.alive_index(entity)?;

        if let Some(&slot) = self.index_tables[id.index()].get(&entity) {
            let Some(pool) = self.pools.pool_mut::<T>(id) else {
                return Err(type_mismatch(&self.schema, id));
            };
            return match pool.get_mut(slot) {
                Some(target) => {
                    *target = value;
                    Ok(())
                }
                None => Err(vacant_slot(&self.schema, id, slot)),
            };
        }

        let Some(pool) = self.pools.pool_mut::<T>(id) else {
            return Err(type_mismatch(&self.schema, id));
        };
        let slot = pool
            .create(value)
            .map_err(|err| pool_error(&self.schema, id, err))?;
        self.index_tables[id.index()].insert(entity, slot);
        self.slots[index].signature.set(id.index());
        Ok(())
    }

    /// Attach a clone of a type-erased value to `entity`.
    pub(crate) fn add_component_erased(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), EcsError> {
        let index = self.alive_index(entity)?;
        if let Some(&slot) = self.index_tables[id.index()].get(&entity) {
            return self
                .pools
                .erased_mut(id)
                .replace_cloned(slot, value)
                .map_err(|err| pool_error(&self.schema, id, err));
        }
        let slot = self
            .pools
            .erased_mut(id)
            .create_cloned(value)
            .map_err(|err| pool_error(&self.schema, id, err))?;
        self.index_tables[id.index()].insert(entity, slot);
        self.slots[index].signature.set(id.index());
        Ok(())
    }

    /// Clone component `id` of `entity` into a type-erased box.
    pub(crate) fn clone_component_erased(&self, entity: Entity, id: ComponentId) -> Option<BoxedValue> {
        if !self.is_alive(entity) {
            return None;
        }
        let slot = *self.index_tables.get(id.index())?.get(&entity)?;
        self.pools.erased(id).clone_boxed(slot)
    }

    /// `T` on `entity`.
    ///
    /// `Ok(None)` if the entity has been killed, lacks `T`, or `T` is not part
    /// of the schema. Fails with [`EcsError::UnknownEntity`] for handles this
    /// registry does not hold.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<Option<&T>, EcsError> {
        let Some((id, slot)) = self.component_slot::<T>(entity)? else {
            return Ok(None);
        };
        Ok(self.pools.pool::<T>(id).and_then(|pool| pool.get(slot)))
    }

    pub fn get_component_mut<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<Option<&mut T>, EcsError> {
        let Some((id, slot)) = self.component_slot::<T>(entity)? else {
            return Ok(None);
        };
        Ok(self.pools.pool_mut::<T>(id).and_then(|pool| pool.get_mut(slot)))
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool, EcsError> {
        Ok(self.component_slot::<T>(entity)?.is_some())
    }

    fn component_slot<T: Component>(
        &self,
        entity: Entity,
    ) -> Result<Option<(ComponentId, PoolSlot)>, EcsError> {
        let index = self.slot_index(entity)?;
        let Some(id) = self.schema.component_id::<T>() else {
            return Ok(None);
        };
        if !self.slots[index].alive {
            return Ok(None);
        }
        Ok(self.index_tables[id.index()]
            .get(&entity)
            .map(|&slot| (id, slot)))
    }

    /// Detach `T` from `entity`, dropping the value.
    ///
    /// Returns `Ok(false)` if there was nothing to remove, including when the
    /// entity has been killed.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        let id = self.component_id::<T>()?;
        let index = self.slot_index(entity)?;
        if !self.slots[index].alive {
            return Ok(false);
        }
        let Some(slot) = self.index_tables[id.index()].remove(&entity) else {
            return Ok(false);
        };
        self.pools.erased_mut(id).deallocate_slot(slot);
        self.slots[index].signature.clear(id.index());
        Ok(true)
    }

    /// Detach every component from `entity`. Tags are kept. Returns how many
    /// components were removed; killed entities report zero.
    pub fn remove_all_components(&mut self, entity: Entity) -> Result<usize, EcsError> {
        let index = self.slot_index(entity)?;
        if !self.slots[index].alive {
            return Ok(0);
        }
        let removed = self.release_components(entity);
        let signature = &mut self.slots[index].signature;
        for bit in 0..self.schema.component_count() {
            signature.clear(bit);
        }
        Ok(removed)
    }

    /// Number of `T` values currently stored, across all entities.
    pub fn component_count_of<T: Component>(&self) -> usize {
        self.schema
            .component_id::<T>()
            .and_then(|id| self.pools.pool::<T>(id))
            .map_or(0, ComponentPool::len)
    }

    /// Typed view of the pool backing `T`.
    pub fn pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        self.pools.pool::<T>(self.schema.component_id::<T>()?)
    }

    // -- tags ---------------------------------------------------------------

    pub fn add_tag<T: 'static>(&mut self, entity: Entity) -> Result<(), EcsError> {
        let bit = self.tag_bit::<T>()?;
        let index = self.alive_index(entity)?;
        self.slots[index].signature.set(bit);
        Ok(())
    }

    /// Clear tag `T`. Returns whether it was set.
    pub fn remove_tag<T: 'static>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        let bit = self.tag_bit::<T>()?;
        let index = self.slot_index(entity)?;
        let slot = &mut self.slots[index];
        if !slot.alive || !slot.signature.test(bit) {
            return Ok(false);
        }
        slot.signature.clear(bit);
        Ok(true)
    }

    /// Whether the alive entity carries tag `T`. Unregistered tags read as
    /// unset.
    pub fn has_tag<T: 'static>(&self, entity: Entity) -> Result<bool, EcsError> {
        let slot = &self.slots[self.slot_index(entity)?];
        Ok(self
            .schema
            .tag_bit::<T>()
            .is_some_and(|bit| slot.alive && slot.signature.test(bit)))
    }

    // -- signatures ---------------------------------------------------------

    /// Whether the alive entity holds every component and tag of `S`.
    /// Undeclared signatures never match.
    pub fn matches_signature<S: Signature>(&self, entity: Entity) -> Result<bool, EcsError> {
        let slot = &self.slots[self.slot_index(entity)?];
        Ok(self
            .schema
            .mask_for::<S>()
            .is_some_and(|mask| slot.alive && slot.signature.contains_all(&mask)))
    }

    /// Call `f(index, &mut A, &mut B, ...)` for every alive entity matching
    /// `S`, in slot order. Returns the number of entities visited.
    ///
    /// ```
    /// use tessera_ecs::prelude::*;
    ///
    /// #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    /// struct Health(i32);
    ///
    /// signature! { struct Living { components: (Health,) } }
    ///
    /// let schema = Schema::builder()
    ///     .component::<Health>("healthComponent")
    ///     .signature::<Living>()
    ///     .build()
    ///     .unwrap();
    /// let mut registry = EntityRegistry::new(schema);
    /// let e = registry.create_entity().unwrap();
    /// registry.add_component(e, Health(10)).unwrap();
    ///
    /// let visited = registry
    ///     .for_each_matching::<Living, _>(|_index: EntityIndex, health: &mut Health| health.0 -= 1)
    ///     .unwrap();
    /// assert_eq!(visited, 1);
    /// assert_eq!(registry.get_component::<Health>(e).unwrap(), Some(&Health(9)));
    /// ```
    pub fn for_each_matching<S, F>(&mut self, mut f: F) -> Result<usize, EcsError>
    where
        S: Signature,
        F: SignatureFn<S::Components>,
    {
        let schema = Arc::clone(&self.schema);
        let entry = schema
            .signatures()
            .entry_for::<S>()
            .ok_or_else(|| EcsError::UnregisteredSignature {
                name: std::any::type_name::<S>().to_owned(),
            })?;
        let mask = entry.mask;

        let mut visited = 0;
        let rows = self.slots[..self.live_count]
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive && slot.signature.contains_all(&mask))
            .map(|(index, slot)| (index, slot.handle))
            .inspect(|_| visited += 1);
        <S::Components as ComponentSet>::run(
            &mut self.pools,
            &self.index_tables,
            &entry.components,
            rows,
            &mut f,
        );
        Ok(visited)
    }

    /// Call `f(index, entity)` for every alive entity, in slot order.
    pub fn for_each_entity<F>(&self, mut f: F)
    where
        F: FnMut(EntityIndex, Entity),
    {
        for (index, slot) in self.slots[..self.live_count].iter().enumerate() {
            if slot.alive {
                f(index, slot.handle);
            }
        }
    }

    // -- helpers ------------------------------------------------------------

    fn slot_index(&self, entity: Entity) -> Result<EntityIndex, EcsError> {
        self.handle_index
            .get(&entity)
            .copied()
            .ok_or(EcsError::UnknownEntity { entity })
    }

    fn alive_index(&self, entity: Entity) -> Result<EntityIndex, EcsError> {
        let index = self.slot_index(entity)?;
        if self.slots[index].alive {
            Ok(index)
        } else {
            Err(EcsError::DeadEntity { entity })
        }
    }

    fn component_id<T: 'static>(&self) -> Result<ComponentId, EcsError> {
        self.schema
            .component_id::<T>()
            .ok_or_else(|| EcsError::UnregisteredComponent {
                name: std::any::type_name::<T>().to_owned(),
            })
    }

    fn tag_bit<T: 'static>(&self) -> Result<usize, EcsError> {
        self.schema
            .tag_bit::<T>()
            .ok_or_else(|| EcsError::UnregisteredTag {
                name: std::any::type_name::<T>().to_owned(),
            })
    }
}

fn component_name(schema: &Schema, id: ComponentId) -> String {
    schema
        .component_info(id)
        .map(|info| info.name.clone())
        .unwrap_or_default()
}

fn type_mismatch(schema: &Schema, id: ComponentId) -> EcsError {
    EcsError::ComponentTypeMismatch {
        component: component_name(schema, id),
    }
}

fn pool_error(schema: &Schema, id: ComponentId, err: PoolError) -> EcsError {
    match err {
        PoolError::Exhausted { capacity } => {
            let component = component_name(schema, id);
            warn!(component = %component, capacity, "component pool exhausted");
            EcsError::PoolExhausted {
                component,
                capacity,
            }
        }
        PoolError::TypeMismatch => type_mismatch(schema, id),
        PoolError::Vacant { slot } => vacant_slot(schema, id, slot),
    }
}

fn vacant_slot(schema: &Schema, id: ComponentId, slot: PoolSlot) -> EcsError {
    let component = component_name(schema, id);
    warn!(component = %component, slot, "component index points at a vacant pool slot");
    EcsError::VacantComponentSlot { component, slot }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("schema", &self.schema)
            .field("live_count", &self.live_count)
            .field("pending_dead", &self.pending_dead)
            .field("capacity", &self.slots.len())
            .field("pools", &self.pools)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
        z: i32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(i32);

    struct Frozen;
    struct NotRegistered;

    crate::signature! {
        struct FrozenLiving {
            components: (Health,),
            tags: (Frozen,),
        }
    }

    fn registry_with(config: RegistryConfig) -> EntityRegistry {
        let schema = Schema::builder()
            .component::<Position>("positionComponent")
            .component::<Health>("healthComponent")
            .tag::<Frozen>("frozen")
            .signature::<FrozenLiving>()
            .build()
            .unwrap();
        EntityRegistry::with_config(schema, config)
    }

    fn registry() -> EntityRegistry {
        registry_with(RegistryConfig::default())
    }

    #[test]
    fn config_defaults_and_partial_deserialize() {
        let config = RegistryConfig::default();
        assert_eq!(config.pool_capacity, 1024);
        assert_eq!(config.initial_entity_capacity, 100);
        assert_eq!(config.max_entities, None);

        let parsed: RegistryConfig = serde_json::from_str(r#"{ "pool_capacity": 8 }"#).unwrap();
        assert_eq!(parsed.pool_capacity, 8);
        assert_eq!(parsed.initial_entity_capacity, 100);
    }

    #[test]
    fn create_assigns_dense_slots_and_grows() {
        let mut reg = registry_with(RegistryConfig::default().with_initial_entity_capacity(2));
        let a = reg.create_entity().unwrap();
        let b = reg.create_entity().unwrap();
        assert_eq!(reg.capacity(), 2);
        let c = reg.create_entity().unwrap();
        assert_eq!(reg.capacity(), (2 + 10) * 2);

        assert_eq!(reg.index_of(a), Some(0));
        assert_eq!(reg.index_of(b), Some(1));
        assert_eq!(reg.entity_at(2), Some(c));
        assert_eq!(reg.entity_at(3), None);
        assert_eq!(reg.live_count(), 3);
        assert_eq!(reg.signature_of(a).unwrap(), Bitset::EMPTY);
    }

    #[test]
    fn max_entities_bounds_growth() {
        let mut reg = registry_with(
            RegistryConfig::default()
                .with_initial_entity_capacity(1)
                .with_max_entities(3),
        );
        for _ in 0..3 {
            reg.create_entity().unwrap();
        }
        assert_eq!(reg.capacity(), 3);
        assert!(matches!(
            reg.create_entity(),
            Err(EcsError::EntityCapacity {
                requested: 4,
                limit: 3
            })
        ));
    }

    #[test]
    fn kill_twice_and_unknown_handles_fail() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.kill(e).unwrap();
        assert!(matches!(reg.kill(e), Err(EcsError::DeadEntity { .. })));
        assert!(reg.is_valid(e));
        assert!(!reg.is_alive(e));

        reg.refresh();
        assert!(matches!(reg.kill(e), Err(EcsError::UnknownEntity { .. })));
        assert!(matches!(
            reg.kill(Entity::from_raw(u64::MAX)),
            Err(EcsError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn killed_entities_read_as_absent_until_reclaimed() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Health(3)).unwrap();
        reg.add_tag::<Frozen>(e).unwrap();
        reg.kill(e).unwrap();

        assert_eq!(reg.get_component::<Health>(e).unwrap(), None);
        assert!(!reg.has_tag::<Frozen>(e).unwrap());
        assert!(!reg.matches_signature::<FrozenLiving>(e).unwrap());
        assert!(!reg.remove_component::<Health>(e).unwrap());
        assert!(matches!(
            reg.add_component(e, Health(1)),
            Err(EcsError::DeadEntity { .. })
        ));
        // Storage is still held until refresh.
        assert_eq!(reg.component_count_of::<Health>(), 1);
        assert_eq!(reg.refresh(), 1);
        assert_eq!(reg.component_count_of::<Health>(), 0);
    }

    #[test]
    fn queries_on_unknown_handles_fail_instead_of_reading_as_absent() {
        let mut reg = registry();
        let bare = reg.create_entity().unwrap();
        let reclaimed = reg.create_entity().unwrap();
        reg.add_component(reclaimed, Health(1)).unwrap();
        reg.add_tag::<Frozen>(reclaimed).unwrap();
        reg.kill(reclaimed).unwrap();
        reg.refresh();

        for e in [reclaimed, Entity::from_raw(u64::MAX)] {
            let unknown = EcsError::UnknownEntity { entity: e };
            assert_eq!(reg.get_component::<Health>(e), Err(unknown.clone()));
            assert_eq!(reg.get_component_mut::<Health>(e), Err(unknown.clone()));
            assert_eq!(reg.has_component::<Health>(e), Err(unknown.clone()));
            assert_eq!(reg.has_tag::<Frozen>(e), Err(unknown.clone()));
            assert_eq!(reg.matches_signature::<FrozenLiving>(e), Err(unknown.clone()));
            assert_eq!(reg.signature_of(e), Err(unknown.clone()));
            assert_eq!(reg.remove_component::<Health>(e), Err(unknown));
        }

        // A live entity without the data reads as absent, not as an error.
        assert_eq!(reg.get_component::<Health>(bare), Ok(None));
        assert_eq!(reg.get_component_mut::<Health>(bare), Ok(None));
        assert_eq!(reg.has_component::<Health>(bare), Ok(false));
        assert_eq!(reg.has_tag::<Frozen>(bare), Ok(false));
        assert_eq!(reg.matches_signature::<FrozenLiving>(bare), Ok(false));
        assert_eq!(reg.signature_of(bare), Ok(Bitset::EMPTY));
    }

    #[test]
    fn for_each_matching_visits_slots_in_ascending_order_after_compaction() {
        let mut reg = registry();
        let es: Vec<_> = (0..5).map(|_| reg.create_entity().unwrap()).collect();
        for (i, &e) in es.iter().enumerate() {
            reg.add_component(e, Health(i as i32)).unwrap();
            reg.add_tag::<Frozen>(e).unwrap();
        }
        reg.kill(es[1]).unwrap();
        reg.refresh();
        // The last entity fills the hole left at slot 1.
        assert_eq!(reg.index_of(es[4]), Some(1));

        let mut seen = Vec::new();
        let visited = reg
            .for_each_matching::<FrozenLiving, _>(|index: EntityIndex, health: &mut Health| {
                seen.push((index, health.0));
            })
            .unwrap();
        assert_eq!(visited, 4);

        let indices: Vec<_> = seen.iter().map(|&(index, _)| index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
        for &(index, health) in &seen {
            assert_eq!(reg.index_of(es[health as usize]), Some(index));
        }
        let order: Vec<_> = seen.iter().map(|&(_, health)| health).collect();
        assert_eq!(order, vec![0, 4, 2, 3]);
    }

    #[test]
    fn vacant_indexed_slot_is_reported_as_its_own_error() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Health(1)).unwrap();
        let id = reg.schema.component_id::<Health>().unwrap();
        let slot = reg.index_tables[id.index()][&e];
        assert!(reg.pools.erased_mut(id).deallocate_slot(slot));

        assert_eq!(
            reg.add_component(e, Health(2)),
            Err(EcsError::VacantComponentSlot {
                component: "healthComponent".to_owned(),
                slot,
            })
        );
        assert_eq!(
            pool_error(&reg.schema, id, PoolError::Vacant { slot }),
            EcsError::VacantComponentSlot {
                component: "healthComponent".to_owned(),
                slot,
            }
        );
        assert_eq!(
            pool_error(&reg.schema, id, PoolError::TypeMismatch),
            EcsError::ComponentTypeMismatch {
                component: "healthComponent".to_owned(),
            }
        );
    }

    #[test]
    fn refresh_with_nothing_killed_is_a_no_op() {
        let mut reg = registry();
        assert_eq!(reg.refresh(), 0);
        let a = reg.create_entity().unwrap();
        assert_eq!(reg.refresh(), 0);
        assert_eq!(reg.index_of(a), Some(0));
    }

    #[test]
    fn refresh_reclaims_everything_when_all_are_dead() {
        let mut reg = registry();
        let all: Vec<_> = (0..5).map(|_| reg.create_entity().unwrap()).collect();
        for &e in &all {
            reg.add_component(e, Health(1)).unwrap();
            reg.kill(e).unwrap();
        }
        assert_eq!(reg.refresh(), 5);
        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.component_count_of::<Health>(), 0);
        assert!(all.iter().all(|&e| !reg.is_valid(e)));
    }

    #[test]
    fn refresh_moves_survivors_into_holes() {
        let mut reg = registry();
        let es: Vec<_> = (0..6).map(|_| reg.create_entity().unwrap()).collect();
        for (i, &e) in es.iter().enumerate() {
            reg.add_component(e, Health(i as i32)).unwrap();
        }
        reg.kill(es[0]).unwrap();
        reg.kill(es[2]).unwrap();
        reg.kill(es[5]).unwrap();

        assert_eq!(reg.refresh(), 3);
        assert_eq!(reg.live_count(), 3);
        assert_eq!(reg.alive_count(), 3);
        for &survivor in &[es[1], es[3], es[4]] {
            let index = reg.index_of(survivor).unwrap();
            assert!(index < 3);
            assert_eq!(reg.entity_at(index), Some(survivor));
        }
        assert_eq!(reg.get_component::<Health>(es[4]).unwrap(), Some(&Health(4)));
        assert_eq!(reg.component_count_of::<Health>(), 3);
    }

    #[test]
    fn add_overwrites_and_remove_is_idempotent() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Health(1)).unwrap();
        reg.add_component(e, Health(2)).unwrap();
        assert_eq!(reg.get_component::<Health>(e).unwrap(), Some(&Health(2)));
        assert_eq!(reg.component_count_of::<Health>(), 1);

        assert!(reg.remove_component::<Health>(e).unwrap());
        assert!(!reg.remove_component::<Health>(e).unwrap());
        assert!(!reg.has_component::<Health>(e).unwrap());
        assert_eq!(reg.signature_of(e).unwrap(), Bitset::EMPTY);
    }

    #[test]
    fn unregistered_types_are_reported() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        assert!(matches!(
            reg.add_component(e, 5u8),
            Err(EcsError::UnregisteredComponent { .. })
        ));
        assert!(matches!(
            reg.add_tag::<NotRegistered>(e),
            Err(EcsError::UnregisteredTag { .. })
        ));
        assert!(reg.get_component::<u8>(e).unwrap().is_none());
        assert!(!reg.has_tag::<NotRegistered>(e).unwrap());

        crate::signature! { struct Undeclared { components: (Health,) } }
        assert!(matches!(
            reg.for_each_matching::<Undeclared, _>(|_: EntityIndex, _: &mut Health| {}),
            Err(EcsError::UnregisteredSignature { .. })
        ));
        assert!(!reg.matches_signature::<Undeclared>(e).unwrap());
    }

    #[test]
    fn tags_only_touch_tag_bits() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_tag::<Frozen>(e).unwrap();
        assert!(reg.has_tag::<Frozen>(e).unwrap());
        assert!(reg.signature_of(e).unwrap().test(2));
        assert_eq!(reg.component_count_of::<Health>(), 0);

        assert!(reg.remove_tag::<Frozen>(e).unwrap());
        assert!(!reg.remove_tag::<Frozen>(e).unwrap());
    }

    #[test]
    fn remove_all_components_keeps_tags() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Health(1)).unwrap();
        reg.add_component(e, Position { x: 1, y: 2, z: 3 }).unwrap();
        reg.add_tag::<Frozen>(e).unwrap();

        assert_eq!(reg.remove_all_components(e).unwrap(), 2);
        assert!(reg.has_tag::<Frozen>(e).unwrap());
        assert!(!reg.has_component::<Position>(e).unwrap());
        assert_eq!(reg.component_count_of::<Position>(), 0);
    }

    #[test]
    fn for_each_matching_skips_killed_and_non_matching() {
        let mut reg = registry();
        let frozen = reg.create_entity().unwrap();
        let warm = reg.create_entity().unwrap();
        let dead = reg.create_entity().unwrap();
        for &e in &[frozen, warm, dead] {
            reg.add_component(e, Health(10)).unwrap();
        }
        reg.add_tag::<Frozen>(frozen).unwrap();
        reg.add_tag::<Frozen>(dead).unwrap();
        reg.kill(dead).unwrap();

        let mut seen = Vec::new();
        let visited = reg
            .for_each_matching::<FrozenLiving, _>(|index: EntityIndex, health: &mut Health| {
                health.0 = 0;
                seen.push(index);
            })
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(seen, vec![reg.index_of(frozen).unwrap()]);
        assert_eq!(reg.get_component::<Health>(frozen).unwrap(), Some(&Health(0)));
        assert_eq!(reg.get_component::<Health>(warm).unwrap(), Some(&Health(10)));
    }

    #[test]
    fn for_each_entity_visits_alive_slots() {
        let mut reg = registry();
        let a = reg.create_entity().unwrap();
        let b = reg.create_entity().unwrap();
        reg.kill(a).unwrap();
        let mut seen = Vec::new();
        reg.for_each_entity(|index, entity| seen.push((index, entity)));
        assert_eq!(seen, vec![(1, b)]);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Health(1)).unwrap();
        reg.clear();
        assert_eq!(reg.live_count(), 0);
        assert!(!reg.is_valid(e));
        assert_eq!(reg.component_count_of::<Health>(), 0);
        let fresh = reg.create_entity().unwrap();
        assert_ne!(fresh, e);
        assert_eq!(reg.index_of(fresh), Some(0));
    }

    #[test]
    fn get_component_mut_writes_through() {
        let mut reg = registry();
        let e = reg.create_entity().unwrap();
        reg.add_component(e, Position { x: 0, y: 0, z: 0 }).unwrap();
        reg.get_component_mut::<Position>(e).unwrap().unwrap().x = 7;
        assert_eq!(reg.get_component::<Position>(e).unwrap().map(|p| p.x), Some(7));
    }
}
