use crate::model::FieldDef;
use crate::storage::Store;
use crate::{keys, AppError};
use log::{debug, warn};
use std::collections::BTreeSet;

/// Maintains the `{class}:{field}:{value}` index entries of one model.
///
/// Unique fields store the owning identifier as a string claimed with `set_nx`; other indexable
/// fields keep a set of identifiers per value.
pub struct IndexManager<'a> {
    store: &'a dyn Store,
    class: &'a str,
}

enum Claim {
    Acquired,
    AlreadyOwned,
}

impl<'a> IndexManager<'a> {
    pub fn new(store: &'a dyn Store, class: &'a str) -> Self {
        IndexManager { store, class }
    }

    fn key(&self, field: &FieldDef, value: &str) -> String {
        keys::index_key(self.class, &field.name, value)
    }

    /// Runs `write` between the index updates for a change of `field` from `old` to `new`.
    ///
    /// A unique value is claimed before `write` runs and the claim is released again when `write`
    /// fails, so a conflicting write never reaches the field.
    pub fn reindex<F>(&self, field: &FieldDef, pk: &str, old: Option<&str>, new: Option<&str>, write: F) -> Result<(), AppError>
    where
        F: FnOnce() -> Result<(), AppError>,
    {
        if !field.indexable {
            return write();
        }
        let changed = old != new;
        if field.unique {
            let claim = match new {
                Some(value) if changed => Some((value, self.claim(field, pk, value)?)),
                _ => None,
            };
            if let Err(e) = write() {
                if let Some((value, Claim::Acquired)) = claim {
                    if let Err(release_err) = self.release_unique(field, pk, value) {
                        warn!("Failed to release claim on {} after failed write: {}", self.key(field, value), release_err);
                    }
                }
                return Err(e);
            }
            if let Some(value) = old.filter(|_| changed) {
                self.release_unique(field, pk, value)?;
            }
        } else {
            write()?;
            if let Some(value) = new.filter(|_| changed) {
                self.store.sadd(&self.key(field, value), &[pk])?;
            }
            if let Some(value) = old.filter(|_| changed) {
                self.store.srem(&self.key(field, value), &[pk])?;
            }
        }
        Ok(())
    }

    /// Claims `value` for `pk` with one conditional create. A concurrent release can make the
    /// owner vanish between the create and the owner read, in which case the create is retried once.
    fn claim(&self, field: &FieldDef, pk: &str, value: &str) -> Result<Claim, AppError> {
        let key = self.key(field, value);
        for _ in 0..2 {
            if self.store.set_nx(&key, pk)? {
                debug!("Claimed {} for {}", key, pk);
                return Ok(Claim::Acquired);
            }
            match self.store.get(&key)? {
                Some(owner) if owner == pk => return Ok(Claim::AlreadyOwned),
                Some(owner) => {
                    return Err(AppError::Uniqueness(format!(
                        "Key {} already exists (for instance {}) when setting {}={:?} on {}",
                        key, owner, field.name, value, pk
                    )))
                }
                None => continue,
            }
        }
        Err(AppError::Uniqueness(format!("Could not claim {} for {}: ownership kept changing", key, pk)))
    }

    fn release_unique(&self, field: &FieldDef, pk: &str, value: &str) -> Result<(), AppError> {
        let key = self.key(field, value);
        if self.store.get(&key)?.as_deref() == Some(pk) {
            self.store.delete(&[key.as_str()])?;
        }
        Ok(())
    }

    /// Re-reads the field after a write that indexed `written` and drops that entry again when a
    /// concurrent writer has already moved the field on. That writer indexes its own value.
    pub fn settle<R>(&self, field: &FieldDef, pk: &str, written: Option<&str>, read: R) -> Result<(), AppError>
    where
        R: FnOnce() -> Result<Option<String>, AppError>,
    {
        let Some(written) = written.filter(|_| field.indexable) else { return Ok(()) };
        let current = read()?;
        if current.as_deref() != Some(written) {
            debug!("{} of {} moved from {:?} to {:?} during the index update", field.name, pk, written, current);
            self.deindex(field, pk, written)?;
        }
        Ok(())
    }

    /// Drops the entry of `value` for `pk`.
    pub fn deindex(&self, field: &FieldDef, pk: &str, value: &str) -> Result<(), AppError> {
        if !field.indexable {
            return Ok(());
        }
        if field.unique {
            self.release_unique(field, pk, value)
        } else {
            self.store.srem(&self.key(field, value), &[pk]).map(|_| ())
        }
    }

    /// Identifiers indexed under `value`, with one store command.
    pub fn lookup(&self, field: &FieldDef, value: &str) -> Result<BTreeSet<String>, AppError> {
        if !field.indexable {
            return Err(AppError::NotIndexable(format!("{}.{}", self.class, field.name)));
        }
        if field.unique {
            Ok(self.store.get(&self.key(field, value))?.into_iter().collect())
        } else {
            self.store.smembers(&self.key(field, value))
        }
    }

    /// Whether `value` is indexed to an identifier that is still registered.
    pub fn resolves_to_living(&self, field: &FieldDef, value: &str) -> Result<bool, AppError> {
        if !field.indexable {
            return Err(AppError::NotIndexable(format!("{}.{}", self.class, field.name)));
        }
        let collection = keys::collection_key(self.class);
        if field.unique {
            match self.store.get(&self.key(field, value))? {
                Some(owner) => self.store.sismember(&collection, &owner),
                None => Ok(false),
            }
        } else {
            let index = self.key(field, value);
            Ok(!self.store.sinter(&[index.as_str(), collection.as_str()])?.is_empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn it_should_move_non_unique_entries() {
        let store = MemoryStore::new();
        let field = FieldDef::string("color").indexable();
        let index = IndexManager::new(&store, "boat");
        index.reindex(&field, "1", None, Some("red"), || Ok(())).expect("reindex");
        index.reindex(&field, "2", None, Some("red"), || Ok(())).expect("reindex");
        index.reindex(&field, "1", Some("red"), Some("blue"), || Ok(())).expect("reindex");
        assert_eq!(index.lookup(&field, "red").expect("lookup").into_iter().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(index.lookup(&field, "blue").expect("lookup").into_iter().collect::<Vec<_>>(), vec!["1"]);
    }

    #[test]
    fn it_should_reject_a_claimed_value_without_writing() {
        let store = MemoryStore::new();
        let field = FieldDef::string("name").unique();
        let index = IndexManager::new(&store, "boat");
        index.reindex(&field, "1", None, Some("Pen Duick"), || Ok(())).expect("reindex");
        let mut written = false;
        let result = index.reindex(&field, "2", None, Some("Pen Duick"), || {
            written = true;
            Ok(())
        });
        assert!(matches!(result, Err(AppError::Uniqueness(_))));
        assert!(!written);
        assert_eq!(store.get("boat:name:Pen Duick").expect("get"), Some("1".to_string()));
    }

    #[test]
    fn it_should_release_the_claim_when_the_write_fails() {
        let store = MemoryStore::new();
        let field = FieldDef::string("name").unique();
        let index = IndexManager::new(&store, "boat");
        let result = index.reindex(&field, "1", None, Some("Pen Duick"), || Err(AppError::Store("down".into())));
        assert!(matches!(result, Err(AppError::Store(_))));
        assert!(!store.exists("boat:name:Pen Duick").expect("exists"));
    }

    #[test]
    fn it_should_swap_unique_values() {
        let store = MemoryStore::new();
        let field = FieldDef::string("name").unique();
        let index = IndexManager::new(&store, "boat");
        index.reindex(&field, "1", None, Some("a"), || Ok(())).expect("reindex");
        index.reindex(&field, "1", Some("a"), Some("b"), || Ok(())).expect("reindex");
        index.reindex(&field, "1", Some("b"), Some("b"), || Ok(())).expect("same value");
        assert!(!store.exists("boat:name:a").expect("exists"));
        assert_eq!(store.get("boat:name:b").expect("get"), Some("1".to_string()));
    }

    #[test]
    fn it_should_drop_an_entry_the_field_moved_past() {
        let store = MemoryStore::new();
        let field = FieldDef::string("color").indexable();
        let index = IndexManager::new(&store, "boat");
        index.reindex(&field, "1", None, Some("red"), || Ok(())).expect("reindex");
        index.settle(&field, "1", Some("red"), || Ok(Some("blue".to_string()))).expect("settle");
        assert!(!store.exists("boat:color:red").expect("exists"));
        index.reindex(&field, "1", None, Some("blue"), || Ok(())).expect("reindex");
        index.settle(&field, "1", Some("blue"), || Ok(Some("blue".to_string()))).expect("settle");
        assert!(store.sismember("boat:color:blue", "1").expect("sismember"));

        let name = FieldDef::string("name").unique();
        index.reindex(&name, "1", None, Some("a"), || Ok(())).expect("reindex");
        index.settle(&name, "1", Some("a"), || Ok(None)).expect("settle");
        assert!(!store.exists("boat:name:a").expect("exists"));
    }

    #[test]
    fn it_should_only_resolve_registered_owners() {
        let store = MemoryStore::new();
        let field = FieldDef::string("name").unique();
        let index = IndexManager::new(&store, "boat");
        index.reindex(&field, "1", None, Some("a"), || Ok(())).expect("reindex");
        assert!(!index.resolves_to_living(&field, "a").expect("exists"));
        store.sadd("boat:collection", &["1"]).expect("sadd");
        assert!(index.resolves_to_living(&field, "a").expect("exists"));
        assert!(matches!(index.lookup(&FieldDef::string("plain"), "x"), Err(AppError::NotIndexable(_))));
    }
}
