use crate::storage::Store;
use crate::{keys, AppError};
use log::{debug, warn};

/// A short-lived store key deleted when released or dropped, whichever comes first.
pub struct TempKey<'s> {
    store: &'s dyn Store,
    key: String,
    released: bool,
}

impl<'s> TempKey<'s> {
    pub fn new(store: &'s dyn Store, prefix: &str) -> Self {
        let key = keys::temp_key(prefix);
        debug!("Allocated temporary key {}", key);
        TempKey { store, key, released: false }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deletes the key, surfacing a failure to the caller.
    pub fn release(mut self) -> Result<(), AppError> {
        self.released = true;
        self.store.delete(&[self.key.as_str()])?;
        debug!("Released temporary key {}", self.key);
        Ok(())
    }
}

impl Drop for TempKey<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.store.delete(&[self.key.as_str()]) {
                warn!("Failed to delete temporary key {}: {}", self.key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn it_should_delete_on_release() {
        let store = MemoryStore::new();
        let tmp = TempKey::new(&store, "t");
        store.sadd(tmp.key(), &["1"]).expect("sadd");
        assert_eq!(store.key_count().expect("count"), 1);
        tmp.release().expect("release");
        assert_eq!(store.key_count().expect("count"), 0);
    }

    #[test]
    fn it_should_delete_on_drop() {
        let store = MemoryStore::new();
        {
            let tmp = TempKey::new(&store, "t");
            store.sadd(tmp.key(), &["1", "2"]).expect("sadd");
        }
        assert_eq!(store.key_count().expect("count"), 0);
    }
}
