//! Alias-to-constructor registry.
//!
//! Object capabilities are resolved once here, at type-registration time:
//! whatever an alias maps to is what every remotely created instance of
//! that alias will be. There are no per-access capability checks.

use crate::core_store::errors::{StoreError, StoreResult};
use crate::core_store::game_object::{GameObject, ObjectId};
use crate::core_store::sync_entity::SyncEntity;
use std::collections::HashMap;
use std::sync::RwLock;

type Constructor = Box<dyn Fn(ObjectId) -> Box<dyn GameObject> + Send + Sync>;

/// Resolves an alias name to a fresh object instance, used when a remote
/// update arrives for an identifier nobody holds locally.
#[derive(Default)]
pub struct ObjectFactory {
    creators: RwLock<HashMap<String, Constructor>>,
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for an alias. Re-registering replaces the
    /// previous constructor.
    pub fn register<F>(&self, alias: &str, constructor: F)
    where
        F: Fn(ObjectId) -> Box<dyn GameObject> + Send + Sync + 'static,
    {
        self.creators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(alias.to_string(), Box::new(constructor));
    }

    /// Register an alias backed by the generic schema entity.
    pub fn register_entity(&self, alias: &str) {
        let alias_owned = alias.to_string();
        self.register(alias, move |identifier| {
            Box::new(SyncEntity::new(&alias_owned, identifier))
        });
    }

    pub fn create(&self, alias: &str, identifier: ObjectId) -> StoreResult<Box<dyn GameObject>> {
        let creators = self.creators.read().unwrap_or_else(|e| e.into_inner());
        match creators.get(alias) {
            Some(constructor) => Ok(constructor(identifier)),
            None => Err(StoreError::UnknownAlias(alias.to_string())),
        }
    }

    pub fn is_registered(&self, alias: &str) -> bool {
        self.creators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(alias)
    }
}
