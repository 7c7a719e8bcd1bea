//! Entity handles.
//!
//! An [`Entity`] wraps a 64-bit value drawn from a process-wide counter. The
//! counter only ever increases, so a handle is never reused: once an entity
//! has been reclaimed its handle stays invalid forever, in every registry.
//!
//! Handles are distinct from the dense slot index ([`EntityIndex`]) at which
//! a registry currently stores the entity's metadata. Slot indices move during
//! [`EntityRegistry::refresh`](crate::registry::EntityRegistry::refresh);
//! handles do not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Dense position of an entity's metadata inside a registry.
pub type EntityIndex = usize;

/// Next handle value to mint. Starts at 1 so that 0 can serve as [`Entity::NULL`].
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An opaque, never-reused entity handle.
///
/// Equality and ordering follow the underlying counter, so handles created
/// later always compare greater.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// Placeholder stored in free slots. Never returned by a registry.
    pub const NULL: Entity = Entity(0);

    /// Mint a fresh handle. Only registries call this.
    #[inline]
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
