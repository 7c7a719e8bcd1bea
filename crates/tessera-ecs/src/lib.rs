//! Tessera ECS -- a schema-configured Entity Component System with pooled
//! component storage and bitset signatures.
//!
//! A [`Schema`](schema::Schema) fixes the component, tag and signature types
//! up front. An [`EntityRegistry`](registry::EntityRegistry) built from it
//! stores each component type in its own fixed-capacity pool, tracks every
//! entity's components and tags as a bitset, and runs callbacks over all
//! entities matching a signature with direct `&mut` access to their
//! components. Killed entities are reclaimed in batches by
//! [`refresh`](registry::EntityRegistry::refresh).
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! signature! { struct Moving { components: (Position, Velocity) } }
//!
//! let schema = Schema::builder()
//!     .component::<Position>("position")
//!     .component::<Velocity>("velocity")
//!     .signature::<Moving>()
//!     .build()
//!     .unwrap();
//! let mut registry = EntityRegistry::new(schema);
//!
//! let entity = registry.create_entity().unwrap();
//! registry.add_component(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//! registry.add_component(entity, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! registry
//!     .for_each_matching::<Moving, _>(|_: EntityIndex, p: &mut Position, v: &mut Velocity| {
//!         p.x += v.dx;
//!         p.y += v.dy;
//!     })
//!     .unwrap();
//!
//! assert_eq!(registry.get_component::<Position>(entity).unwrap(), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod bitset;
pub mod component;
pub mod entity;
pub mod pool;
pub mod prototype;
pub mod registry;
pub mod schema;
pub mod signature;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The handle was never issued by this registry or has been reclaimed.
    #[error("entity {entity} is unknown (never created or already reclaimed)")]
    UnknownEntity { entity: entity::Entity },

    /// The entity has been killed and is waiting for a refresh.
    #[error("entity {entity} has been killed")]
    DeadEntity { entity: entity::Entity },

    #[error("component type '{name}' is not part of the schema")]
    UnregisteredComponent { name: String },

    #[error("tag type '{name}' is not part of the schema")]
    UnregisteredTag { name: String },

    #[error("signature type '{name}' is not part of the schema")]
    UnregisteredSignature { name: String },

    /// The component's pool has no free slot left.
    #[error("component pool '{component}' is exhausted (capacity {capacity})")]
    PoolExhausted { component: String, capacity: usize },

    /// The entity slot array reached its configured limit.
    #[error("cannot hold {requested} entities (limit {limit})")]
    EntityCapacity { requested: usize, limit: usize },

    #[error("stored value does not match component '{component}'")]
    ComponentTypeMismatch { component: String },

    /// An index table entry refers to a pool slot that holds no value.
    #[error("component '{component}' is indexed at vacant pool slot {slot}")]
    VacantComponentSlot { component: String, slot: usize },
}

/// Configuration errors reported by [`SchemaBuilder::build`](schema::SchemaBuilder::build).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("component type '{type_name}' is declared twice")]
    DuplicateComponent { type_name: &'static str },

    #[error("component name '{name}' is already used by another type")]
    DuplicateComponentName { name: String },

    #[error("tag type '{type_name}' is declared twice")]
    DuplicateTag { type_name: &'static str },

    #[error("tag name '{name}' is already used by another type")]
    DuplicateTagName { name: String },

    #[error("type '{type_name}' is declared as both a component and a tag")]
    AmbiguousKind { type_name: &'static str },

    #[error("signature type '{type_name}' is declared twice")]
    DuplicateSignature { type_name: &'static str },

    #[error("signature '{signature}' lists unregistered component '{component}'")]
    UnregisteredSignatureComponent {
        signature: &'static str,
        component: &'static str,
    },

    #[error("signature '{signature}' lists unregistered tag '{tag}'")]
    UnregisteredSignatureTag {
        signature: &'static str,
        tag: &'static str,
    },

    #[error("signature '{signature}' lists '{element}' more than once")]
    RepeatedSignatureElement {
        signature: &'static str,
        element: &'static str,
    },

    #[error("{bits} component and tag bits exceed the signature capacity of {capacity}")]
    TooManyBits { bits: usize, capacity: usize },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::bitset::Bitset;
    pub use crate::component::{numeric_default, Component, ComponentId, ComponentInfo};
    pub use crate::entity::{Entity, EntityIndex};
    pub use crate::pool::{ComponentPool, PoolError};
    pub use crate::prototype::{
        Diagnostic, EntityPrototype, LoadPolicy, LoadReport, PrototypeError, PrototypeLoader,
        PrototypeSet,
    };
    pub use crate::registry::{EntityRegistry, RegistryConfig};
    pub use crate::schema::{Schema, SchemaBuilder, TagId};
    pub use crate::signature;
    pub use crate::signature::{Signature, SignatureFn, SignatureId};
    pub use crate::{EcsError, SchemaError};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    // -- test component types -----------------------------------------------

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
        z: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health {
        health: f32,
        #[serde(rename = "maxHealth")]
        max_health: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Renderable {
        #[serde(rename = "meshId")]
        mesh_id: i32,
    }

    struct T0;
    struct T1;
    struct T2;

    signature! { struct S0 { components: () } }
    signature! { struct S1 { components: (Position, Health) } }
    signature! {
        struct S2 {
            components: (Position, Renderable),
            tags: (T0,),
        }
    }
    signature! {
        struct S3 {
            components: (Health, Renderable),
            tags: (T0, T2),
        }
    }

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .component::<Position>("positionComponent")
                .component::<Health>("healthComponent")
                .component::<Renderable>("renderableComponent")
                .tag::<T0>("T0")
                .tag::<T1>("T1")
                .tag::<T2>("T2")
                .signature::<S0>()
                .signature::<S1>()
                .signature::<S2>()
                .signature::<S3>()
                .build()
                .unwrap(),
        )
    }

    fn pos(x: f32, y: f32, z: f32) -> Position {
        Position { x, y, z }
    }

    // -- lifecycle ----------------------------------------------------------

    #[test]
    fn kill_then_refresh_keeps_survivor_components() {
        let mut registry = EntityRegistry::new(schema());
        let e1 = registry.create_entity().unwrap();
        let e2 = registry.create_entity().unwrap();
        let e3 = registry.create_entity().unwrap();
        let e4 = registry.create_entity().unwrap();

        registry.add_component(e2, pos(12.0, 32.0, 50.0)).unwrap();
        registry.add_component(e4, pos(12.0, 32.0, 50.0)).unwrap();

        registry.kill(e2).unwrap();
        assert_eq!(registry.refresh(), 1);

        assert!(!registry.is_valid(e2));
        assert!(registry.is_alive(e1));
        assert!(registry.is_alive(e3));
        assert_eq!(
            registry.get_component::<Position>(e4).unwrap(),
            Some(&pos(12.0, 32.0, 50.0))
        );
        assert_eq!(registry.component_count_of::<Position>(), 1);
    }

    #[test]
    fn reused_pool_slot_does_not_leak_stale_values() {
        let mut registry = EntityRegistry::new(schema());
        let old = registry.create_entity().unwrap();
        registry.add_component(old, pos(1.0, 1.0, 1.0)).unwrap();
        registry.kill(old).unwrap();
        registry.refresh();

        let new = registry.create_entity().unwrap();
        assert_eq!(registry.get_component::<Position>(new).unwrap(), None);
        registry.add_component(new, pos(2.0, 2.0, 2.0)).unwrap();
        assert_eq!(registry.get_component::<Position>(new).unwrap(), Some(&pos(2.0, 2.0, 2.0)));
        assert!(matches!(
            registry.get_component::<Position>(old),
            Err(EcsError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn refresh_preserves_survivors_across_interleaved_kills() {
        let mut registry = EntityRegistry::new(schema());
        let entities: Vec<_> = (0..20).map(|_| registry.create_entity().unwrap()).collect();
        for (i, &e) in entities.iter().enumerate() {
            registry
                .add_component(
                    e,
                    Health {
                        health: i as f32,
                        max_health: 100.0,
                    },
                )
                .unwrap();
            if i % 2 == 0 {
                registry.add_tag::<T1>(e).unwrap();
            }
        }
        for (i, &e) in entities.iter().enumerate() {
            if i % 3 == 0 {
                registry.kill(e).unwrap();
            }
        }
        registry.refresh();

        for (i, &e) in entities.iter().enumerate() {
            if i % 3 == 0 {
                assert!(!registry.is_valid(e));
                continue;
            }
            assert_eq!(
                registry.get_component::<Health>(e).unwrap().map(|h| h.health),
                Some(i as f32)
            );
            assert_eq!(registry.has_tag::<T1>(e).unwrap(), i % 2 == 0);
        }
        assert_eq!(registry.live_count(), 13);
        assert_eq!(registry.component_count_of::<Health>(), 13);
    }

    // -- signatures ---------------------------------------------------------

    #[test]
    fn s3_matches_only_with_every_listed_element() {
        let mut registry = EntityRegistry::new(schema());

        let partial = registry.create_entity().unwrap();
        registry.add_component(partial, pos(0.0, 0.0, 0.0)).unwrap();
        registry
            .add_component(
                partial,
                Health {
                    health: 1.0,
                    max_health: 1.0,
                },
            )
            .unwrap();
        assert!(!registry.matches_signature::<S3>(partial).unwrap());
        assert!(registry.matches_signature::<S1>(partial).unwrap());

        let full = registry.create_entity().unwrap();
        registry.add_component(full, pos(0.0, 0.0, 0.0)).unwrap();
        registry
            .add_component(
                full,
                Health {
                    health: 1.0,
                    max_health: 1.0,
                },
            )
            .unwrap();
        registry.add_component(full, Renderable { mesh_id: 4 }).unwrap();
        registry.add_tag::<T0>(full).unwrap();
        registry.add_tag::<T1>(full).unwrap();
        registry.add_tag::<T2>(full).unwrap();
        assert!(registry.matches_signature::<S3>(full).unwrap());
        assert!(registry.matches_signature::<S0>(full).unwrap());

        registry.remove_tag::<T2>(full).unwrap();
        assert!(!registry.matches_signature::<S3>(full).unwrap());
        registry.add_tag::<T2>(full).unwrap();
        registry.remove_component::<Renderable>(full).unwrap();
        assert!(!registry.matches_signature::<S3>(full).unwrap());
    }

    #[test]
    fn for_each_matching_hands_out_components_in_signature_order() {
        let mut registry = EntityRegistry::new(schema());
        let a = registry.create_entity().unwrap();
        let b = registry.create_entity().unwrap();
        for (e, mesh) in [(a, 1), (b, 2)] {
            registry.add_component(e, pos(0.0, 0.0, 0.0)).unwrap();
            registry.add_component(e, Renderable { mesh_id: mesh }).unwrap();
        }
        registry.add_tag::<T0>(b).unwrap();

        let mut meshes = Vec::new();
        let visited = registry
            .for_each_matching::<S2, _>(|_: EntityIndex, p: &mut Position, r: &mut Renderable| {
                p.x = r.mesh_id as f32;
                meshes.push(r.mesh_id);
            })
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(meshes, vec![2]);
        assert_eq!(registry.get_component::<Position>(b).unwrap().map(|p| p.x), Some(2.0));
        assert_eq!(registry.get_component::<Position>(a).unwrap().map(|p| p.x), Some(0.0));

        let all = registry.for_each_matching::<S0, _>(|_: EntityIndex| {}).unwrap();
        assert_eq!(all, 2);
    }

    // -- capacity -----------------------------------------------------------

    #[test]
    fn pool_exhaustion_fails_the_exhausting_call_only() {
        let config = RegistryConfig::default().with_pool_capacity(3);
        let mut registry = EntityRegistry::with_config(schema(), config);
        let entities: Vec<_> = (0..4).map(|_| registry.create_entity().unwrap()).collect();

        for (i, &e) in entities[..3].iter().enumerate() {
            registry.add_component(e, Renderable { mesh_id: i as i32 }).unwrap();
        }
        let err = registry
            .add_component(entities[3], Renderable { mesh_id: 3 })
            .unwrap_err();
        assert_eq!(
            err,
            EcsError::PoolExhausted {
                component: "renderableComponent".to_owned(),
                capacity: 3,
            }
        );
        assert!(!registry.has_component::<Renderable>(entities[3]).unwrap());
        for (i, &e) in entities[..3].iter().enumerate() {
            assert_eq!(
                registry.get_component::<Renderable>(e).unwrap(),
                Some(&Renderable { mesh_id: i as i32 })
            );
        }

        // Freeing a slot makes the call succeed on retry.
        registry.remove_component::<Renderable>(entities[0]).unwrap();
        registry
            .add_component(entities[3], Renderable { mesh_id: 3 })
            .unwrap();
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = EntityRegistry::new(schema());
        let e = registry.create_entity().unwrap();
        registry.add_component(e, Renderable { mesh_id: 1 }).unwrap();
        assert!(registry.remove_component::<Renderable>(e).unwrap());
        let before = registry.signature_of(e).unwrap();
        assert!(!registry.remove_component::<Renderable>(e).unwrap());
        assert_eq!(registry.signature_of(e).unwrap(), before);
    }

    #[test]
    fn one_schema_serves_many_registries() {
        let schema = schema();
        let mut first = EntityRegistry::new(Arc::clone(&schema));
        let mut second = EntityRegistry::new(Arc::clone(&schema));
        let a = first.create_entity().unwrap();
        let b = second.create_entity().unwrap();
        assert_ne!(a, b);
        assert!(matches!(first.kill(b), Err(EcsError::UnknownEntity { .. })));
    }

    #[test]
    fn errors_render_readably() {
        let err = EcsError::PoolExhausted {
            component: "healthComponent".to_owned(),
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "component pool 'healthComponent' is exhausted (capacity 1024)"
        );
        let err = EcsError::UnknownEntity {
            entity: Entity::from_raw(7),
        };
        assert!(err.to_string().contains("#7"));
    }
}
