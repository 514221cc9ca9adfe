use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Body, Critter, Entity, EntityId, EntityKind, Tree, CRITTER_CLASSNAME, TREE_CLASSNAME};
use crate::coords::Vec3;

/// Entity as written into a chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub classname: String,
    pub id: EntityId,
    pub location: Vec3,
    pub prev_location: Vec3,
    pub size: Vec3,
    pub solid: bool,
    #[serde(default)]
    pub fields: serde_json::Value,
}

pub type EntityLoader = fn(&serde_json::Value) -> Result<Box<dyn EntityKind>, serde_json::Error>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no entity kind registered for classname \"{classname}\"")]
    UnknownClassname { classname: String },
    #[error("invalid fields for entity {id:?} of kind \"{classname}\"")]
    InvalidFields {
        classname: String,
        id: EntityId,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps persisted classnames back to entity kinds.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    loaders: HashMap<String, EntityLoader>,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classnames: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        classnames.sort_unstable();
        f.debug_struct("EntityRegistry")
            .field("classnames", &classnames)
            .finish()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.register(TREE_CLASSNAME, load_fields::<Tree>);
        registry.register(CRITTER_CLASSNAME, load_fields::<Critter>);
        registry
    }

    /// Returns the loader previously registered under `classname`, if any.
    pub fn register(&mut self, classname: &str, loader: EntityLoader) -> Option<EntityLoader> {
        self.loaders.insert(classname.to_string(), loader)
    }

    pub fn contains(&self, classname: &str) -> bool {
        self.loaders.contains_key(classname)
    }

    pub fn load(&self, record: &EntityRecord) -> Result<Entity, RegistryError> {
        let loader =
            self.loaders
                .get(&record.classname)
                .ok_or_else(|| RegistryError::UnknownClassname {
                    classname: record.classname.clone(),
                })?;
        let kind = loader(&record.fields).map_err(|source| RegistryError::InvalidFields {
            classname: record.classname.clone(),
            id: record.id,
            source,
        })?;
        let body = Body {
            position: record.location,
            prev_position: record.prev_location,
            size: record.size,
            solid: record.solid,
        };
        Ok(Entity::new(record.id, body, kind))
    }
}

/// Loader for kinds whose persisted fields are their serde representation.
/// A missing field object loads the kind's defaults.
pub fn load_fields<K>(fields: &serde_json::Value) -> Result<Box<dyn EntityKind>, serde_json::Error>
where
    K: EntityKind + Default + for<'de> Deserialize<'de> + 'static,
{
    if fields.is_null() {
        return Ok(Box::new(K::default()));
    }
    let kind: K = serde_json::from_value(fields.clone())?;
    Ok(Box::new(kind))
}
