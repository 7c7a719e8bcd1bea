//! Signatures and the signature bitset table.
//!
//! A signature is a zero-sized type naming a set of component types and a set
//! of tag types. Its [`Signature::Components`] and [`Signature::Tags`] tuples
//! split it into the part that carries storage and the part that is presence
//! only. [`SignatureTable`] turns every declared signature into the [`Bitset`]
//! mask a matching entity must contain; it is computed once when the
//! [`Schema`](crate::schema::Schema) is built and never changes afterwards.
//!
//! ```
//! use tessera_ecs::signature;
//!
//! #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
//! pub struct Health { health: i32 }
//! pub struct Burning;
//!
//! signature! {
//!     /// Everything that takes fire damage.
//!     pub struct OnFire {
//!         components: (Health,),
//!         tags: (Burning,),
//!     }
//! }
//! ```

use std::any::TypeId;
use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::component::{Component, ComponentId};
use crate::entity::{Entity, EntityIndex};
use crate::pool::{downcast_pool, ComponentPools};
use crate::registry::IndexTable;
use crate::schema::{Schema, TagId};
use crate::SchemaError;

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// A type listed in a signature, identified by its `TypeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementType {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl ElementType {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signature, TagSet, ComponentSet
// ---------------------------------------------------------------------------

/// A declared query filter: the components and tags a matching entity holds.
///
/// Usually declared with the [`signature!`](crate::signature!) macro.
pub trait Signature: 'static {
    /// Components, as a tuple. Their references are handed to
    /// [`for_each_matching`](crate::registry::EntityRegistry::for_each_matching)
    /// callbacks in this order.
    type Components: ComponentSet;
    /// Tags, as a tuple. Presence only.
    type Tags: TagSet;
}

/// A tuple of tag types.
pub trait TagSet: 'static {
    fn element_types() -> Vec<ElementType>;
}

/// A tuple of component types that can be expanded into a callback argument
/// list.
pub trait ComponentSet: 'static {
    /// The mutable references passed to a callback, one per component.
    type Refs<'a>;

    fn element_types() -> Vec<ElementType>;

    /// Invoke `f` once per row with references into the pools for `ids`.
    ///
    /// `ids` holds one distinct id per tuple element, in tuple order. Rows
    /// whose entity lacks an index entry for any of them are skipped.
    fn run<I, F>(
        pools: &mut ComponentPools,
        tables: &[IndexTable],
        ids: &[ComponentId],
        rows: I,
        f: &mut F,
    ) where
        I: Iterator<Item = (EntityIndex, Entity)>,
        F: SignatureFn<Self> + ?Sized;
}

/// Callback accepted by
/// [`for_each_matching`](crate::registry::EntityRegistry::for_each_matching).
///
/// Implemented for every `FnMut(EntityIndex, &mut A, &mut B, ...)` whose
/// argument types are the signature's components in declaration order.
/// Closure parameters must be annotated with their component types.
pub trait SignatureFn<C: ComponentSet + ?Sized> {
    fn call(&mut self, index: EntityIndex, refs: C::Refs<'_>);
}

impl TagSet for () {
    fn element_types() -> Vec<ElementType> {
        Vec::new()
    }
}

impl ComponentSet for () {
    type Refs<'a> = ();

    fn element_types() -> Vec<ElementType> {
        Vec::new()
    }

    fn run<I, F>(
        _pools: &mut ComponentPools,
        _tables: &[IndexTable],
        _ids: &[ComponentId],
        rows: I,
        f: &mut F,
    ) where
        I: Iterator<Item = (EntityIndex, Entity)>,
        F: SignatureFn<Self> + ?Sized,
    {
        for (index, _) in rows {
            f.call(index, ());
        }
    }
}

impl<F> SignatureFn<()> for F
where
    F: FnMut(EntityIndex),
{
    fn call(&mut self, index: EntityIndex, _refs: ()) {
        self(index)
    }
}

macro_rules! impl_sets {
    ($($ty:ident $pool:ident $row:ident $pos:tt),+) => {
        impl<$($ty: 'static),+> TagSet for ($($ty,)+) {
            fn element_types() -> Vec<ElementType> {
                vec![$(ElementType::of::<$ty>()),+]
            }
        }

        impl<$($ty: Component),+> ComponentSet for ($($ty,)+) {
            type Refs<'a> = ($(&'a mut $ty,)+);

            fn element_types() -> Vec<ElementType> {
                vec![$(ElementType::of::<$ty>()),+]
            }

            fn run<I, F>(
                pools: &mut ComponentPools,
                tables: &[IndexTable],
                ids: &[ComponentId],
                rows: I,
                f: &mut F,
            ) where
                I: Iterator<Item = (EntityIndex, Entity)>,
                F: SignatureFn<Self> + ?Sized,
            {
                let [$($pool),+] = pools.disjoint_mut([$(ids[$pos]),+]);
                $(let $pool = downcast_pool::<$ty>($pool);)+
                for (index, entity) in rows {
                    $(
                        let Some(&$row) = tables[ids[$pos].index()].get(&entity) else {
                            continue;
                        };
                    )+
                    f.call(index, ($(&mut $pool[$row],)+));
                }
            }
        }

        impl<Func, $($ty: Component),+> SignatureFn<($($ty,)+)> for Func
        where
            Func: FnMut(EntityIndex, $(&mut $ty),+),
        {
            fn call(&mut self, index: EntityIndex, ($($row,)+): ($(&mut $ty,)+)) {
                self(index, $($row),+)
            }
        }
    };
}

impl_sets!(A pa ra 0);
impl_sets!(A pa ra 0, B pb rb 1);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2, D pd rd 3);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2, D pd rd 3, E pe re 4);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2, D pd rd 3, E pe re 4, G pg rg 5);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2, D pd rd 3, E pe re 4, G pg rg 5, H ph rh 6);
impl_sets!(A pa ra 0, B pb rb 1, C pc rc 2, D pd rd 3, E pe re 4, G pg rg 5, H ph rh 6, J pj rj 7);

/// Declare a signature type.
///
/// ```
/// # use tessera_ecs::signature;
/// # #[derive(Clone, serde::Serialize, serde::Deserialize)] pub struct Position { x: f32 }
/// # pub struct Visible;
/// signature! {
///     pub struct Drawable {
///         components: (Position,),
///         tags: (Visible,),
///     }
/// }
///
/// signature! {
///     pub struct Located { components: (Position,) }
/// }
/// ```
#[macro_export]
macro_rules! signature {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            components: ($($component:ty),* $(,)?)
            $(, tags: ($($tag:ty),* $(,)?))?
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::signature::Signature for $name {
            type Components = ($($component,)*);
            type Tags = ($($($tag,)*)?);
        }
    };
}

// ---------------------------------------------------------------------------
// SignatureTable
// ---------------------------------------------------------------------------

/// Dense id of a signature within one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureId(pub(crate) u32);

impl SignatureId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unresolved signature declaration, captured by
/// [`SchemaBuilder::signature`](crate::schema::SchemaBuilder::signature).
#[derive(Debug, Clone)]
pub(crate) struct SignatureDecl {
    pub(crate) element: ElementType,
    pub(crate) components: Vec<ElementType>,
    pub(crate) tags: Vec<ElementType>,
}

impl SignatureDecl {
    pub(crate) fn of<S: Signature>() -> Self {
        Self {
            element: ElementType::of::<S>(),
            components: <S::Components as ComponentSet>::element_types(),
            tags: <S::Tags as TagSet>::element_types(),
        }
    }
}

/// A resolved signature: its mask plus the ids it was built from.
#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub id: SignatureId,
    pub type_name: &'static str,
    /// Bits every matching entity must have set.
    pub mask: Bitset,
    /// Component ids in tuple order.
    pub components: Vec<ComponentId>,
    pub tags: Vec<TagId>,
}

/// The immutable signature → mask table.
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    entries: Vec<SignatureEntry>,
    by_type: HashMap<TypeId, SignatureId>,
}

impl SignatureTable {
    /// Resolve every declaration against the schema's component and tag
    /// lists. `schema` must already hold its final components and tags.
    pub(crate) fn build(decls: &[SignatureDecl], schema: &Schema) -> Result<Self, SchemaError> {
        let mut table = SignatureTable::default();

        for decl in decls {
            if table.by_type.contains_key(&decl.element.type_id) {
                return Err(SchemaError::DuplicateSignature {
                    type_name: decl.element.type_name,
                });
            }

            let mut mask = Bitset::new();
            let mut components = Vec::with_capacity(decl.components.len());
            for element in &decl.components {
                let id = schema
                    .component_id_of(element.type_id)
                    .ok_or(SchemaError::UnregisteredSignatureComponent {
                        signature: decl.element.type_name,
                        component: element.type_name,
                    })?;
                let bit = id.index();
                if mask.test(bit) {
                    return Err(SchemaError::RepeatedSignatureElement {
                        signature: decl.element.type_name,
                        element: element.type_name,
                    });
                }
                mask.set(bit);
                components.push(id);
            }

            let mut tags = Vec::with_capacity(decl.tags.len());
            for element in &decl.tags {
                let id = schema.tag_id_of(element.type_id).ok_or(
                    SchemaError::UnregisteredSignatureTag {
                        signature: decl.element.type_name,
                        tag: element.type_name,
                    },
                )?;
                let bit = schema.component_count() + id.index();
                if mask.test(bit) {
                    return Err(SchemaError::RepeatedSignatureElement {
                        signature: decl.element.type_name,
                        element: element.type_name,
                    });
                }
                mask.set(bit);
                tags.push(id);
            }

            let id = SignatureId(table.entries.len() as u32);
            table.by_type.insert(decl.element.type_id, id);
            table.entries.push(SignatureEntry {
                id,
                type_name: decl.element.type_name,
                mask,
                components,
                tags,
            });
        }

        Ok(table)
    }

    /// O(1) lookup of the mask for `S`.
    #[inline]
    pub fn mask_for<S: Signature>(&self) -> Option<Bitset> {
        self.entry_for::<S>().map(|entry| entry.mask)
    }

    #[inline]
    pub fn mask(&self, id: SignatureId) -> Option<Bitset> {
        self.entries.get(id.index()).map(|entry| entry.mask)
    }

    pub fn entry_for<S: Signature>(&self) -> Option<&SignatureEntry> {
        let id = self.by_type.get(&TypeId::of::<S>())?;
        self.entries.get(id.index())
    }

    pub fn id_of<S: Signature>(&self) -> Option<SignatureId> {
        self.by_type.get(&TypeId::of::<S>()).copied()
    }

    pub(crate) fn contains_type(&self, type_id: TypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
