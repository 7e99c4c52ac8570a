//! redmap maps typed model fields onto keys of a key-value store, keeps secondary indexes of them
//! with race-free uniqueness claims, and answers lazy filtered, sorted and sliced queries.
//!
//! Stores implement the primitive command surface of [`storage::Store`]: an in-memory store for
//! tests and embedding, and a persistent one on top of [Redb](https://github.com/cberner/redb)
//! with container values encoded by `bincode`.
//!
//! ```
//! use redmap::{Database, FieldDef, MemoryStore, ModelDef, Sort};
//! use std::sync::Arc;
//!
//! let db = Database::new(Arc::new(MemoryStore::new()));
//! let boats = db
//!     .register(ModelDef::builder("Boat").field(FieldDef::string("name").unique()).field(FieldDef::string("length")).build()?)?;
//! boats.create([("name", "Pen Duick".into()), ("length", 15.1.into())])?;
//! boats.create([("name", "Smolt".into()), ("length", 13.6.into())])?;
//! let ids = boats.collection().sort(Sort::by("length"))?.into_vec()?;
//! assert_eq!(ids, vec!["2", "1"]);
//! # Ok::<(), redmap::AppError>(())
//! ```

pub mod collection;
pub mod database;
pub mod error;
pub mod field;
pub mod index;
pub mod instance;
pub mod keys;
pub mod model;
pub mod query;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod utils;
pub mod value;

pub use collection::{Collection, Dicts, Flat, Ids, Instances, Projection, Tuples, ValueRow};
pub use database::{Database, Model};
pub use error::AppError;
pub use field::{ListField, ScalarField, SetField, SortedSetField};
pub use instance::Instance;
pub use model::{FieldDef, FieldKind, ModelDef, ModelDefBuilder, PkKind};
pub use query::Sort;
pub use settings::{RedmapSettings, StoreBackend};
pub use storage::{open_store, MemoryStore, RedbStore, SortBy, SortOptions, Store, TempKey};
pub use value::FieldValue;

pub use log;
pub use once_cell;
pub use redb;
