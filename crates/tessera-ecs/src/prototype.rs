//! Entity prototypes and the prototype document loader.
//!
//! An [`EntityPrototype`] is a named bundle of component values. Calling
//! [`EntityPrototype::create_entity`] creates a fresh entity and attaches a
//! clone of every stored value, so one prototype can stamp out any number of
//! entities in any registry whose schema knows its component types.
//!
//! [`PrototypeLoader`] builds prototypes from JSON documents of the form
//!
//! ```json
//! {
//!   "entities": {
//!     "cow": {
//!       "healthComponent": { "health": 40, "maxHealth": 50 },
//!       "positionComponent": { "x": 5, "y": 10, "z": 15 }
//!     }
//!   }
//! }
//! ```
//!
//! Component keys are matched against the names given to
//! [`SchemaBuilder::component`](crate::schema::SchemaBuilder::component) and
//! decoded with the component's serde implementation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::component::{BoxedValue, Component};
use crate::entity::Entity;
use crate::registry::EntityRegistry;
use crate::schema::Schema;
use crate::EcsError;

/// Top-level key holding the entity map.
pub const ENTITIES_KEY: &str = "entities";

// ---------------------------------------------------------------------------
// EntityPrototype
// ---------------------------------------------------------------------------

struct StoredComponent {
    type_name: &'static str,
    value: BoxedValue,
}

/// A named template of component values.
pub struct EntityPrototype {
    name: String,
    components: HashMap<TypeId, StoredComponent>,
}

impl EntityPrototype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `value`, replacing any stored `T`.
    pub fn add<T: Component>(&mut self, value: T) {
        self.insert_boxed(TypeId::of::<T>(), std::any::type_name::<T>(), Box::new(value));
    }

    /// Builder form of [`add`](Self::add).
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.add(value);
        self
    }

    pub(crate) fn insert_boxed(&mut self, type_id: TypeId, type_name: &'static str, value: BoxedValue) {
        self.components
            .insert(type_id, StoredComponent { type_name, value });
    }

    pub fn remove<T: Component>(&mut self) -> Option<T> {
        let stored = self.components.remove(&TypeId::of::<T>())?;
        stored.value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components
            .get(&TypeId::of::<T>())?
            .value
            .downcast_ref::<T>()
    }

    pub fn contains<T: Component>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Create an entity in `registry` carrying a clone of every stored value.
    ///
    /// Components are attached in schema id order. If any attach fails the
    /// new entity is killed and the error returned.
    pub fn create_entity(&self, registry: &mut EntityRegistry) -> Result<Entity, EcsError> {
        let schema = Arc::clone(registry.schema());
        for (type_id, stored) in &self.components {
            if schema.component_id_of(*type_id).is_none() {
                return Err(EcsError::UnregisteredComponent {
                    name: stored.type_name.to_owned(),
                });
            }
        }

        let entity = registry.create_entity()?;
        for info in schema.components() {
            let Some(stored) = self.components.get(&info.type_id) else {
                continue;
            };
            let value: &(dyn Any + Send + Sync) = stored.value.as_ref();
            if let Err(err) = registry.add_component_erased(entity, info.id, value) {
                warn!(
                    prototype = %self.name,
                    component = %info.name,
                    error = %err,
                    "failed to instantiate prototype"
                );
                registry.kill(entity)?;
                return Err(err);
            }
        }
        Ok(entity)
    }

    /// Build a prototype from the current components of a live entity.
    pub fn capture(
        name: impl Into<String>,
        registry: &EntityRegistry,
        entity: Entity,
    ) -> Result<Self, EcsError> {
        if !registry.is_valid(entity) {
            return Err(EcsError::UnknownEntity { entity });
        }
        if !registry.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        let mut prototype = Self::new(name);
        for info in registry.schema().components() {
            if let Some(value) = registry.clone_component_erased(entity, info.id) {
                prototype.insert_boxed(info.type_id, info.type_name, value);
            }
        }
        Ok(prototype)
    }
}

impl std::fmt::Debug for EntityPrototype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut components: Vec<&str> = self.components.values().map(|c| c.type_name).collect();
        components.sort_unstable();
        f.debug_struct("EntityPrototype")
            .field("name", &self.name)
            .field("components", &components)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PrototypeSet
// ---------------------------------------------------------------------------

/// Prototypes in document order.
#[derive(Debug, Default)]
pub struct PrototypeSet {
    prototypes: Vec<EntityPrototype>,
}

impl PrototypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prototype, replacing one with the same name.
    pub fn insert(&mut self, prototype: EntityPrototype) {
        match self.prototypes.iter().position(|p| p.name == prototype.name) {
            Some(index) => self.prototypes[index] = prototype,
            None => self.prototypes.push(prototype),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntityPrototype> {
        self.prototypes.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityPrototype> {
        self.prototypes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.prototypes.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Instantiate every prototype once, in order.
    pub fn create_all(&self, registry: &mut EntityRegistry) -> Result<Vec<Entity>, EcsError> {
        self.prototypes
            .iter()
            .map(|prototype| prototype.create_entity(registry))
            .collect()
    }

    /// Encode the set as a document [`PrototypeLoader`] can read back.
    ///
    /// Components whose type is not part of `schema` are left out.
    pub fn to_document(&self, schema: &Schema) -> Result<Value, serde_json::Error> {
        let mut entities = Map::new();
        for prototype in &self.prototypes {
            let mut components = Map::new();
            for info in schema.components() {
                let Some(stored) = prototype.components.get(&info.type_id) else {
                    continue;
                };
                if let Some(fields) = info.serialize(stored.value.as_ref()) {
                    components.insert(info.name.clone(), fields?);
                }
            }
            entities.insert(prototype.name.clone(), Value::Object(components));
        }
        let mut root = Map::new();
        root.insert(ENTITIES_KEY.to_owned(), Value::Object(entities));
        Ok(Value::Object(root))
    }
}

impl<'a> IntoIterator for &'a PrototypeSet {
    type Item = &'a EntityPrototype;
    type IntoIter = std::slice::Iter<'a, EntityPrototype>;

    fn into_iter(self) -> Self::IntoIter {
        self.prototypes.iter()
    }
}

impl IntoIterator for PrototypeSet {
    type Item = EntityPrototype;
    type IntoIter = std::vec::IntoIter<EntityPrototype>;

    fn into_iter(self) -> Self::IntoIter {
        self.prototypes.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// How the loader treats problems in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Skip unknown components silently, skip undecodable ones with a
    /// diagnostic, and never fail.
    #[default]
    Lenient,
    /// Reject the document on the first unknown or undecodable component.
    Strict,
}

/// A problem found while loading a prototype document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Diagnostic {
    #[error("document is not valid JSON: {message}")]
    Syntax { message: String },

    #[error("document has no top-level \"entities\" object")]
    MissingEntities,

    #[error("entity '{entity}' is not an object")]
    EntityNotObject { entity: String },

    #[error("entity '{entity}' names unknown component '{component}'")]
    UnknownComponent { entity: String, component: String },

    #[error("entity '{entity}': component '{component}' could not be decoded: {message}")]
    InvalidComponent {
        entity: String,
        component: String,
        message: String,
    },

    #[error("failed to read '{}': {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Errors from a [`LoadPolicy::Strict`] loader.
#[derive(Debug, thiserror::Error)]
pub enum PrototypeError {
    #[error("prototype document rejected: {0}")]
    Rejected(Diagnostic),

    #[error("failed to read prototype document '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of loading a document: whatever could be built plus what went wrong.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub prototypes: PrototypeSet,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Reads prototype documents against a schema.
#[derive(Debug, Clone, Copy)]
pub struct PrototypeLoader<'a> {
    schema: &'a Schema,
    policy: LoadPolicy,
}

impl<'a> PrototypeLoader<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            policy: LoadPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn load_str(&self, text: &str) -> Result<LoadReport, PrototypeError> {
        match serde_json::from_str::<Value>(text) {
            Ok(document) => self.load_value(&document),
            Err(err) => self.syntax_error(err),
        }
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> Result<LoadReport, PrototypeError> {
        match serde_json::from_reader::<_, Value>(reader) {
            Ok(document) => self.load_value(&document),
            Err(err) => self.syntax_error(err),
        }
    }

    /// Load a document from disk. In lenient mode an unreadable file yields
    /// an empty report with an [`Diagnostic::Io`].
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadReport, PrototypeError> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => self.load_reader(BufReader::new(file)),
            Err(source) => match self.policy {
                LoadPolicy::Strict => Err(PrototypeError::Io {
                    path: path.to_owned(),
                    source,
                }),
                LoadPolicy::Lenient => {
                    warn!(path = %path.display(), error = %source, "failed to open prototype document");
                    Ok(LoadReport {
                        prototypes: PrototypeSet::new(),
                        diagnostics: vec![Diagnostic::Io {
                            path: path.to_owned(),
                            message: source.to_string(),
                        }],
                    })
                }
            },
        }
    }

    /// Build prototypes from an already parsed document.
    pub fn load_value(&self, document: &Value) -> Result<LoadReport, PrototypeError> {
        let mut report = LoadReport::default();

        let Some(entities) = document.get(ENTITIES_KEY).and_then(Value::as_object) else {
            self.report(&mut report, Diagnostic::MissingEntities)?;
            return Ok(report);
        };

        for (entity_name, entity) in entities {
            let Some(components) = entity.as_object() else {
                self.report(
                    &mut report,
                    Diagnostic::EntityNotObject {
                        entity: entity_name.clone(),
                    },
                )?;
                continue;
            };

            let mut prototype = EntityPrototype::new(entity_name.as_str());
            for (component_name, fields) in components {
                let Some(info) = self.schema.component_by_name(component_name) else {
                    if self.policy == LoadPolicy::Strict {
                        return Err(PrototypeError::Rejected(Diagnostic::UnknownComponent {
                            entity: entity_name.clone(),
                            component: component_name.clone(),
                        }));
                    }
                    debug!(
                        entity = %entity_name,
                        component = %component_name,
                        "skipping unknown prototype component"
                    );
                    continue;
                };
                match info.deserialize(fields) {
                    Ok(value) => prototype.insert_boxed(info.type_id, info.type_name, value),
                    Err(err) => self.report(
                        &mut report,
                        Diagnostic::InvalidComponent {
                            entity: entity_name.clone(),
                            component: component_name.clone(),
                            message: err.to_string(),
                        },
                    )?,
                }
            }
            report.prototypes.insert(prototype);
        }

        debug!(
            prototypes = report.prototypes.len(),
            diagnostics = report.diagnostics.len(),
            "loaded prototype document"
        );
        Ok(report)
    }

    fn syntax_error(&self, err: serde_json::Error) -> Result<LoadReport, PrototypeError> {
        let mut report = LoadReport::default();
        self.report(
            &mut report,
            Diagnostic::Syntax {
                message: err.to_string(),
            },
        )?;
        Ok(report)
    }

    /// Record `diagnostic`, or fail with it under [`LoadPolicy::Strict`].
    fn report(&self, report: &mut LoadReport, diagnostic: Diagnostic) -> Result<(), PrototypeError> {
        match self.policy {
            LoadPolicy::Strict => Err(PrototypeError::Rejected(diagnostic)),
            LoadPolicy::Lenient => {
                warn!(%diagnostic, "problem in prototype document");
                report.diagnostics.push(diagnostic);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
