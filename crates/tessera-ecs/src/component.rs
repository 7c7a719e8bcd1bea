//! Component contract and per-type metadata.
//!
//! A component is any `Clone + Send + Sync + 'static` type with serde support.
//! Registering it in a [`SchemaBuilder`](crate::schema::SchemaBuilder)
//! produces a [`ComponentInfo`] carrying its dense [`ComponentId`], its
//! document name, and a [`ComponentVtable`] of the type-erased operations the
//! registry and prototype loader need (pool creation, JSON decode/encode).

use std::any::{Any, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::pool::{new_erased_pool, ErasedPool};

/// Boxed, type-erased component value.
pub(crate) type BoxedValue = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Marker for types that can be stored as components.
///
/// Implemented automatically for every type meeting the bounds.
pub trait Component: Clone + Send + Sync + 'static + Serialize + DeserializeOwned {}

impl<T> Component for T where T: Clone + Send + Sync + 'static + Serialize + DeserializeOwned {}

/// Default used for numeric component fields missing from a prototype document.
///
/// Use as `#[serde(default = "tessera_ecs::component::numeric_default")]`.
pub fn numeric_default<T: From<i8>>() -> T {
    T::from(-1)
}

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Dense, zero-based id of a component type within one schema.
///
/// Doubles as the component's bit position in entity signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentVtable
// ---------------------------------------------------------------------------

/// Type-erased operations for one component type.
///
/// Created via [`ComponentVtable::new::<T>()`]; every entry is a plain
/// monomorphized `fn`.
#[derive(Clone, Copy)]
pub struct ComponentVtable {
    pub(crate) new_pool: fn(usize) -> Box<dyn ErasedPool>,
    pub(crate) deserialize: fn(&Value) -> Result<BoxedValue, serde_json::Error>,
    pub(crate) serialize: fn(&(dyn Any + Send + Sync)) -> Option<Result<Value, serde_json::Error>>,
}

impl ComponentVtable {
    pub fn new<T: Component>() -> Self {
        fn deserialize_impl<T: Component>(fields: &Value) -> Result<BoxedValue, serde_json::Error> {
            let value = T::deserialize(fields)?;
            Ok(Box::new(value))
        }

        fn serialize_impl<T: Component>(
            value: &(dyn Any + Send + Sync),
        ) -> Option<Result<Value, serde_json::Error>> {
            value.downcast_ref::<T>().map(serde_json::to_value)
        }

        Self {
            new_pool: new_erased_pool::<T>,
            deserialize: deserialize_impl::<T>,
            serialize: serialize_impl::<T>,
        }
    }
}

impl fmt::Debug for ComponentVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVtable").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Dense id assigned in declaration order.
    pub id: ComponentId,
    /// Name used by prototype documents, e.g. `"healthComponent"`.
    pub name: String,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    pub type_id: TypeId,
    /// `std::any::type_name::<T>()`, for diagnostics.
    pub type_name: &'static str,
    pub(crate) vtable: ComponentVtable,
}

impl ComponentInfo {
    pub(crate) fn new<T: Component>(id: ComponentId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            vtable: ComponentVtable::new::<T>(),
        }
    }

    /// Signature bit occupied by this component.
    #[inline]
    pub fn bit(&self) -> usize {
        self.id.index()
    }

    /// Decode a component value from its JSON field object.
    pub fn deserialize(&self, fields: &Value) -> Result<BoxedValue, serde_json::Error> {
        (self.vtable.deserialize)(fields)
    }

    /// Encode a type-erased value of this component. `None` if `value` is
    /// not of this component's type.
    pub fn serialize(
        &self,
        value: &(dyn Any + Send + Sync),
    ) -> Option<Result<Value, serde_json::Error>> {
        (self.vtable.serialize)(value)
    }

    pub(crate) fn new_pool(&self, capacity: usize) -> Box<dyn ErasedPool> {
        (self.vtable.new_pool)(capacity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
