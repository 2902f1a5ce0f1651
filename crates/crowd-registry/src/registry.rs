//! Static temple registry.
//!
//! Maps each temple key to its display metadata. The set of keys is fixed
//! at construction and defines which readings the view will accept.

use crate::error::{RegistryError, RegistryResult};
use crowd_core::EntityKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Wire key (case-sensitive).
    pub key: String,
    /// Display name. Defaults to the key.
    #[serde(default)]
    pub name: Option<String>,
    /// Static image reference.
    pub image: String,
}

impl EntityDefinition {
    pub fn new(key: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            image: image.into(),
        }
    }
}

/// Display metadata for one temple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub key: EntityKey,
    pub name: String,
    pub image: String,
}

/// Fixed mapping of temple key to display metadata.
///
/// Declaration order is preserved; the first entry is the fallback
/// whenever a view needs "some" temple.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entries: Vec<EntityMetadata>,
    index: HashMap<EntityKey, usize>,
}

impl EntityRegistry {
    /// Build a registry from definitions.
    ///
    /// Rejects an empty list, invalid keys and duplicate keys.
    pub fn new(definitions: &[EntityDefinition]) -> RegistryResult<Self> {
        if definitions.is_empty() {
            return Err(RegistryError::EmptyRegistry);
        }

        let mut entries = Vec::with_capacity(definitions.len());
        let mut index = HashMap::with_capacity(definitions.len());

        for def in definitions {
            let key = EntityKey::parse(&def.key)?;
            if index.contains_key(&key) {
                return Err(RegistryError::DuplicateEntity(def.key.clone()));
            }
            index.insert(key.clone(), entries.len());
            entries.push(EntityMetadata {
                name: def.name.clone().unwrap_or_else(|| def.key.clone()),
                image: def.image.clone(),
                key,
            });
        }

        Ok(Self { entries, index })
    }

    /// The three temples the dashboard ships with.
    pub fn default_definitions() -> Vec<EntityDefinition> {
        vec![
            EntityDefinition::new("KashiVishwanath", "assets/templeA.jpg"),
            EntityDefinition::new("TempleB", "assets/templeB.jpg"),
            EntityDefinition::new("TempleC", "assets/templeC.jpg"),
        ]
    }

    /// Resolve a key to its metadata.
    pub fn resolve(&self, key: &EntityKey) -> RegistryResult<&EntityMetadata> {
        self.index
            .get(key)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| RegistryError::EntityNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.index.contains_key(key)
    }

    /// First registered entry.
    pub fn first(&self) -> &EntityMetadata {
        // Construction guarantees at least one entry.
        &self.entries[0]
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entries.iter()
    }

    /// Iterate keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entries.iter().map(|e| &e.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        let entries: Vec<EntityMetadata> = Self::default_definitions()
            .into_iter()
            .map(|def| EntityMetadata {
                key: EntityKey::new(def.key.clone()),
                name: def.key,
                image: def.image,
            })
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.key.clone(), idx))
            .collect();
        Self { entries, index }
    }
}
