use crate::settings::{StoreBackend, StoreSettings};
use crate::storage::{MemoryStore, RedbStore, Store};
use crate::AppError;
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Builds the store described by `settings`.
pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn Store>, AppError> {
    match settings.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redb => Ok(Arc::new(RedbStore::open(Path::new(&settings.db_path), settings.db_cache_size_mb)?)),
    }
}
