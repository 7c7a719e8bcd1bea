//! The type registry.
//!
//! A [`Schema`] is the closed world a registry runs in: an ordered list of
//! component types, an ordered list of tag types, and the signature table
//! derived from both. It is assembled once with a [`SchemaBuilder`] and is
//! immutable afterwards, so every registry built from it agrees on ids, bit
//! positions and masks.
//!
//! Bit layout: component `T` occupies bit `component_id::<T>()`, tag `T`
//! occupies bit `component_count() + tag_id::<T>()`.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use crate::bitset::{Bitset, BITSET_CAPACITY};
use crate::component::{Component, ComponentId, ComponentInfo};
use crate::signature::{Signature, SignatureDecl, SignatureId, SignatureTable};
use crate::SchemaError;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Dense, zero-based id of a tag type within one schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub(crate) u32);

impl TagId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TagInfo {
    pub id: TagId,
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Signature bit, already offset past the component bits.
    pub bit: usize,
}

// ---------------------------------------------------------------------------
// SchemaBuilder
// ---------------------------------------------------------------------------

/// Collects component, tag and signature declarations.
///
/// Declaration order fixes the ids. The first configuration error is kept and
/// reported by [`build`](SchemaBuilder::build).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    components: Vec<ComponentInfo>,
    tags: Vec<TagInfo>,
    signatures: Vec<SignatureDecl>,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare component `T`, known to prototype documents as `name`.
    pub fn component<T: Component>(mut self, name: &str) -> Self {
        let type_id = TypeId::of::<T>();
        if self.components.iter().any(|c| c.type_id == type_id) {
            self.fail(SchemaError::DuplicateComponent {
                type_name: std::any::type_name::<T>(),
            });
        } else if self.tags.iter().any(|t| t.type_id == type_id) {
            self.fail(SchemaError::AmbiguousKind {
                type_name: std::any::type_name::<T>(),
            });
        } else if self.components.iter().any(|c| c.name == name) {
            self.fail(SchemaError::DuplicateComponentName {
                name: name.to_owned(),
            });
        } else {
            let id = ComponentId(self.components.len() as u32);
            self.components.push(ComponentInfo::new::<T>(id, name));
        }
        self
    }

    /// Declare tag `T`. Tags carry no data, only a signature bit.
    pub fn tag<T: 'static>(mut self, name: &str) -> Self {
        let type_id = TypeId::of::<T>();
        if self.tags.iter().any(|t| t.type_id == type_id) {
            self.fail(SchemaError::DuplicateTag {
                type_name: std::any::type_name::<T>(),
            });
        } else if self.components.iter().any(|c| c.type_id == type_id) {
            self.fail(SchemaError::AmbiguousKind {
                type_name: std::any::type_name::<T>(),
            });
        } else if self.tags.iter().any(|t| t.name == name) {
            self.fail(SchemaError::DuplicateTagName {
                name: name.to_owned(),
            });
        } else {
            self.tags.push(TagInfo {
                id: TagId(self.tags.len() as u32),
                name: name.to_owned(),
                type_id,
                type_name: std::any::type_name::<T>(),
                // Fixed up in `build` once the component count is final.
                bit: 0,
            });
        }
        self
    }

    /// Declare signature `S`. Its elements are resolved in [`build`](Self::build),
    /// so signatures may be declared before their components and tags.
    pub fn signature<S: Signature>(mut self) -> Self {
        self.signatures.push(SignatureDecl::of::<S>());
        self
    }

    /// Freeze the declarations into a [`Schema`].
    pub fn build(self) -> Result<Schema, SchemaError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let bits = self.components.len() + self.tags.len();
        if bits > BITSET_CAPACITY {
            return Err(SchemaError::TooManyBits {
                bits,
                capacity: BITSET_CAPACITY,
            });
        }

        let component_count = self.components.len();
        let mut tags = self.tags;
        for tag in &mut tags {
            tag.bit = component_count + tag.id.index();
        }

        let mut schema = Schema {
            component_by_type: self
                .components
                .iter()
                .map(|c| (c.type_id, c.id))
                .collect(),
            component_by_name: self
                .components
                .iter()
                .map(|c| (c.name.clone(), c.id))
                .collect(),
            tag_by_type: tags.iter().map(|t| (t.type_id, t.id)).collect(),
            components: self.components,
            tags,
            signatures: SignatureTable::default(),
        };
        schema.signatures = SignatureTable::build(&self.signatures, &schema)?;
        Ok(schema)
    }

    fn fail(&mut self, err: SchemaError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Immutable component / tag / signature lists with their ids and bit layout.
pub struct Schema {
    components: Vec<ComponentInfo>,
    component_by_type: HashMap<TypeId, ComponentId>,
    component_by_name: HashMap<String, ComponentId>,
    tags: Vec<TagInfo>,
    tag_by_type: HashMap<TypeId, TagId>,
    signatures: SignatureTable,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    // -- kind checks --------------------------------------------------------

    pub fn is_component<T: 'static>(&self) -> bool {
        self.component_by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn is_tag<T: 'static>(&self) -> bool {
        self.tag_by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn is_signature<T: 'static>(&self) -> bool {
        self.signatures.contains_type(TypeId::of::<T>())
    }

    // -- ids and bits -------------------------------------------------------

    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.component_id_of(TypeId::of::<T>())
    }

    pub fn tag_id<T: 'static>(&self) -> Option<TagId> {
        self.tag_id_of(TypeId::of::<T>())
    }

    pub fn signature_id<S: Signature>(&self) -> Option<SignatureId> {
        self.signatures.id_of::<S>()
    }

    pub fn component_bit<T: 'static>(&self) -> Option<usize> {
        self.component_id::<T>().map(ComponentId::index)
    }

    pub fn tag_bit<T: 'static>(&self) -> Option<usize> {
        self.tag_id::<T>()
            .map(|id| self.components.len() + id.index())
    }

    pub(crate) fn component_id_of(&self, type_id: TypeId) -> Option<ComponentId> {
        self.component_by_type.get(&type_id).copied()
    }

    pub(crate) fn tag_id_of(&self, type_id: TypeId) -> Option<TagId> {
        self.tag_by_type.get(&type_id).copied()
    }

    /// Mask a matching entity must contain, or `None` if `S` was not declared.
    #[inline]
    pub fn mask_for<S: Signature>(&self) -> Option<Bitset> {
        self.signatures.mask_for::<S>()
    }

    // -- sizes --------------------------------------------------------------

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Number of signature bits in use: components plus tags.
    pub fn bit_width(&self) -> usize {
        self.components.len() + self.tags.len()
    }

    // -- metadata -----------------------------------------------------------

    /// Component metadata in id order.
    pub fn components(&self) -> &[ComponentInfo] {
        &self.components
    }

    pub fn tags(&self) -> &[TagInfo] {
        &self.tags
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    pub fn component_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id.index())
    }

    pub fn component_info_of<T: 'static>(&self) -> Option<&ComponentInfo> {
        self.component_info(self.component_id::<T>()?)
    }

    /// Look up a component by the name prototype documents use.
    pub fn component_by_name(&self, name: &str) -> Option<&ComponentInfo> {
        let id = self.component_by_name.get(name)?;
        self.components.get(id.index())
    }

    /// Names of all components, in id order.
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("components", &self.component_names())
            .field(
                "tags",
                &self.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .field("signatures", &self.signatures.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
