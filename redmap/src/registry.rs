use crate::storage::Store;
use crate::{keys, AppError};
use std::collections::BTreeSet;

/// Identifier allocation and the per-class set of every known identifier.
pub struct IdRegistry<'a> {
    store: &'a dyn Store,
    class: &'a str,
}

impl<'a> IdRegistry<'a> {
    pub fn new(store: &'a dyn Store, class: &'a str) -> Self {
        IdRegistry { store, class }
    }

    pub fn allocate(&self) -> Result<String, AppError> {
        Ok(self.store.incr_by(&keys::counter_key(self.class), 1)?.to_string())
    }

    /// Returns false when the identifier was already registered.
    pub fn register(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.store.sadd(&keys::collection_key(self.class), &[id])? == 1)
    }

    pub fn unregister(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.store.srem(&keys::collection_key(self.class), &[id])? == 1)
    }

    pub fn members(&self) -> Result<BTreeSet<String>, AppError> {
        self.store.smembers(&keys::collection_key(self.class))
    }

    pub fn exists(&self, id: &str) -> Result<bool, AppError> {
        self.store.sismember(&keys::collection_key(self.class), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn it_should_allocate_increasing_ids() {
        let store = MemoryStore::new();
        let registry = IdRegistry::new(&store, "boat");
        assert_eq!(registry.allocate().expect("allocate"), "1");
        assert_eq!(registry.allocate().expect("allocate"), "2");
        assert_eq!(store.get("boat:max_pk").expect("get"), Some("2".to_string()));
    }

    #[test]
    fn it_should_register_once() {
        let store = MemoryStore::new();
        let registry = IdRegistry::new(&store, "boat");
        assert!(registry.register("1").expect("register"));
        assert!(!registry.register("1").expect("register"));
        assert!(registry.exists("1").expect("exists"));
        assert_eq!(registry.members().expect("members").len(), 1);
        assert!(registry.unregister("1").expect("unregister"));
        assert!(!registry.exists("1").expect("exists"));
    }
}
