pub mod init;
pub mod memory;
pub mod redb_store;
pub mod sort;
pub mod temp;

use crate::AppError;
use std::collections::BTreeSet;

pub use init::open_store;
pub use memory::MemoryStore;
pub use redb_store::RedbStore;
pub use temp::TempKey;

/// What a `sort` orders the members of a set by.
#[derive(Debug, Clone, PartialEq)]
pub enum SortBy {
    /// The member itself.
    Member,
    /// The value found under a `*`-pattern, e.g. `boat:*:length` or `boat:*->year`.
    Pattern(String),
    /// Keep the natural order of the set.
    NoSort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortOptions {
    pub by: SortBy,
    /// `(offset, count)` applied after ordering.
    pub limit: Option<(usize, usize)>,
    /// One output column per pattern; `#` returns the member. Empty means a single member column.
    pub get: Vec<String>,
    pub desc: bool,
    pub alpha: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        SortOptions { by: SortBy::Member, limit: None, get: Vec::new(), desc: false, alpha: false }
    }
}

/// The primitive command surface of a key-value store. Each method is one atomic command.
///
/// Collections that become empty are removed, so `exists` and `key_count` never see them.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    /// Creates `key` only if it is absent; returns whether it was created.
    fn set_nx(&self, key: &str, value: &str) -> Result<bool, AppError>;
    fn append(&self, key: &str, value: &str) -> Result<usize, AppError>;
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, AppError>;

    fn delete(&self, keys: &[&str]) -> Result<usize, AppError>;
    fn exists(&self, key: &str) -> Result<bool, AppError>;
    fn key_count(&self) -> Result<usize, AppError>;

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError>;
    /// Returns true when the field did not exist before.
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, AppError>;
    fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, AppError>;
    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError>;

    fn sadd(&self, key: &str, members: &[&str]) -> Result<usize, AppError>;
    fn srem(&self, key: &str, members: &[&str]) -> Result<usize, AppError>;
    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, AppError>;
    fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError>;
    fn scard(&self, key: &str) -> Result<usize, AppError>;
    fn sinter(&self, keys: &[&str]) -> Result<BTreeSet<String>, AppError>;
    /// Stores the intersection of `keys` under `dest`, replacing it; returns its cardinality.
    fn sinterstore(&self, dest: &str, keys: &[&str]) -> Result<usize, AppError>;

    fn rpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError>;
    fn lpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError>;
    fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError>;
    fn llen(&self, key: &str) -> Result<usize, AppError>;
    /// Removes occurrences of `value`: the first `count` from the head when positive, from the tail
    /// when negative, all of them when zero.
    fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize, AppError>;
    fn lpop(&self, key: &str) -> Result<Option<String>, AppError>;
    fn rpop(&self, key: &str) -> Result<Option<String>, AppError>;

    fn zadd(&self, key: &str, members: &[(f64, &str)]) -> Result<usize, AppError>;
    fn zrem(&self, key: &str, members: &[&str]) -> Result<usize, AppError>;
    /// Members ordered by score, then by member.
    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, f64)>, AppError>;
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, AppError>;
    fn zcard(&self, key: &str) -> Result<usize, AppError>;
    fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError>;

    /// Orders the members of the set at `key`; each row holds one value per `get` pattern.
    fn sort(&self, key: &str, opts: &SortOptions) -> Result<Vec<Vec<Option<String>>>, AppError>;
}
