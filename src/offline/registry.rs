//! Registration table resolving a type name to its offline action engine.
//!
//! Populated at startup with one factory per specialized type; anything else
//! falls back to the default engine. Resolutions — including misses — are
//! cached. Indirect resolution maps an object id to its cached type name
//! through the `ActionClassesById` table.

use super::actions::{DefaultOfflineActions, OfflineActions};
use super::store::{ObjectStore, StoreTable};
use super::OfflineResult;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub type OfflineActionsFactory =
    Arc<dyn Fn(Arc<dyn ObjectStore>) -> Arc<dyn OfflineActions> + Send + Sync>;

#[derive(Default)]
pub struct OfflineActionsRegistry {
    factories: RwLock<HashMap<String, OfflineActionsFactory>>,
    resolutions: RwLock<HashMap<String, Option<OfflineActionsFactory>>>,
}

impl OfflineActionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for a type name.
    pub fn register<F>(&self, type_name: &str, factory: F)
    where
        F: Fn(Arc<dyn ObjectStore>) -> Arc<dyn OfflineActions> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.write() {
            factories.insert(type_name.to_string(), Arc::new(factory));
        }
    }

    /// Resolves the action engine for a type name or object id.
    ///
    /// Ids (anything that is not a bare identifier) are first mapped to their
    /// type name through `ActionClassesById`; an unknown id resolves to
    /// `None`. Unregistered type names fall back to the default engine.
    pub async fn get(
        &self,
        name: &str,
        store: Arc<dyn ObjectStore>,
    ) -> OfflineResult<Option<Arc<dyn OfflineActions>>> {
        let mut name = name.to_string();

        if !is_bare_identifier(&name) {
            let Some(record) = store.load(&name, StoreTable::ActionClassesById).await? else {
                return Ok(None);
            };
            match record.name {
                Some(class_name) => name = class_name,
                None => return Ok(None),
            }
        }

        if let Some(cached) = self.resolutions.read().ok().and_then(|r| r.get(&name).cloned()) {
            return Ok(Some(Self::construct(cached, store)));
        }

        let mut factory = self.factories.read().ok().and_then(|f| f.get(&name).cloned());

        if factory.is_none() {
            // The name may itself be an id with a cached class-name mapping.
            if let Some(record) = store.load(&name, StoreTable::ActionClassesById).await? {
                if let Some(class_name) = record.name {
                    factory = self.factories.read().ok().and_then(|f| f.get(&class_name).cloned());
                }
            }
        }

        if factory.is_none() {
            debug!(type_name = %name, "no offline actions registered, using default");
        }

        if let Ok(mut resolutions) = self.resolutions.write() {
            resolutions.insert(name, factory.clone());
        }

        Ok(Some(Self::construct(factory, store)))
    }

    fn construct(
        factory: Option<OfflineActionsFactory>,
        store: Arc<dyn ObjectStore>,
    ) -> Arc<dyn OfflineActions> {
        match factory {
            Some(factory) => factory(store),
            None => Arc::new(DefaultOfflineActions::new(store)),
        }
    }
}

fn is_bare_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_identifiers() {
        assert!(is_bare_identifier("Customer"));
        assert!(is_bare_identifier("Customer_2"));
        assert!(!is_bare_identifier("8277ee31-9b0b-4b44-9a53-6b2e56d380ae"));
        assert!(!is_bare_identifier(""));
    }
}
