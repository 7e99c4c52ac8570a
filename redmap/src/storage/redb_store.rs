use crate::storage::memory::{remove_occurrences, zset_range};
use crate::storage::sort::sort_members;
use crate::storage::{SortOptions, Store};
use crate::utils::{list_window, parse_integer};
use crate::AppError;
use log::info;
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableMultimapTable, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::{env, fs};

const TYPES: TableDefinition<&str, u8> = TableDefinition::new("types");
const STRINGS: TableDefinition<&str, &str> = TableDefinition::new("strings");
const HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");
const LISTS: TableDefinition<&str, &[u8]> = TableDefinition::new("lists");
const ZSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("zsets");
const SETS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("sets");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Str = 1,
    Hash = 2,
    Set = 3,
    List = 4,
    ZSet = 5,
}

impl Kind {
    fn from_u8(v: u8) -> Result<Kind, AppError> {
        match v {
            1 => Ok(Kind::Str),
            2 => Ok(Kind::Hash),
            3 => Ok(Kind::Set),
            4 => Ok(Kind::List),
            5 => Ok(Kind::ZSet),
            other => Err(AppError::Store(format!("Unknown key type tag {other}"))),
        }
    }
}

/// Containers kept as one bincode blob per key.
trait Blob: Serialize + DeserializeOwned + Default {
    fn is_empty(&self) -> bool;
}

impl Blob for BTreeMap<String, String> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl Blob for VecDeque<String> {
    fn is_empty(&self) -> bool {
        VecDeque::is_empty(self)
    }
}

impl Blob for BTreeMap<String, f64> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

type HashBlob = BTreeMap<String, String>;
type ListBlob = VecDeque<String>;
type ZSetBlob = BTreeMap<String, f64>;

fn kind_in(types: &impl ReadableTable<&'static str, u8>, key: &str) -> Result<Option<Kind>, AppError> {
    match types.get(key)? {
        Some(guard) => Ok(Some(Kind::from_u8(guard.value())?)),
        None => Ok(None),
    }
}

fn blob_in<T: Blob>(table: &impl ReadableTable<&'static str, &'static [u8]>, key: &str) -> Result<Option<T>, AppError> {
    match table.get(key)? {
        Some(guard) => Ok(Some(bincode::deserialize(guard.value())?)),
        None => Ok(None),
    }
}

/// Returns whether the key exists, failing when it holds something other than `expected`.
fn expect_kind(found: Option<Kind>, expected: Kind, key: &str) -> Result<bool, AppError> {
    match found {
        None => Ok(false),
        Some(k) if k == expected => Ok(true),
        Some(_) => Err(AppError::WrongType(key.to_string())),
    }
}

fn write_kind(txn: &WriteTransaction, key: &str) -> Result<Option<Kind>, AppError> {
    let types = txn.open_table(TYPES)?;
    kind_in(&types, key)
}

fn read_kind(txn: &ReadTransaction, key: &str) -> Result<Option<Kind>, AppError> {
    let types = txn.open_table(TYPES)?;
    kind_in(&types, key)
}

fn mark(txn: &WriteTransaction, key: &str, kind: Option<Kind>) -> Result<(), AppError> {
    let mut types = txn.open_table(TYPES)?;
    match kind {
        Some(k) => types.insert(key, k as u8)?,
        None => types.remove(key)?,
    };
    Ok(())
}

/// Drops the data of `key` from whichever table holds it.
fn remove_key(txn: &WriteTransaction, key: &str, kind: Kind) -> Result<(), AppError> {
    match kind {
        Kind::Str => {
            let mut table = txn.open_table(STRINGS)?;
            table.remove(key)?;
        }
        Kind::Hash => {
            let mut table = txn.open_table(HASHES)?;
            table.remove(key)?;
        }
        Kind::List => {
            let mut table = txn.open_table(LISTS)?;
            table.remove(key)?;
        }
        Kind::ZSet => {
            let mut table = txn.open_table(ZSETS)?;
            table.remove(key)?;
        }
        Kind::Set => {
            let mut table = txn.open_multimap_table(SETS)?;
            table.remove_all(key)?;
        }
    }
    mark(txn, key, None)
}

fn set_members(table: &impl ReadableMultimapTable<&'static str, &'static str>, key: &str) -> Result<BTreeSet<String>, AppError> {
    let mut members = BTreeSet::new();
    for guard in table.get(key)? {
        members.insert(guard?.value().to_string());
    }
    Ok(members)
}

/// Store persisted in a redb database. Every command is one redb transaction, so conditional
/// writes like `set_nx` are atomic across threads sharing the database.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(db_path: &Path, db_cache_size_mb: usize) -> Result<Self, AppError> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        if db_path.exists() {
            info!("Opening existing db at {:?}", db_path);
        } else {
            info!("Creating db at {:?} with cache size {} MB", db_path, db_cache_size_mb);
        }
        let db = Database::builder().set_cache_size(db_cache_size_mb * 1024 * 1024).create(db_path)?;
        let txn = db.begin_write()?;
        txn.open_table(TYPES)?;
        txn.open_table(STRINGS)?;
        txn.open_table(HASHES)?;
        txn.open_table(LISTS)?;
        txn.open_table(ZSETS)?;
        txn.open_multimap_table(SETS)?;
        txn.commit()?;
        Ok(RedbStore { db })
    }

    /// Fresh database file under the system temp dir.
    pub fn temp(name: &str, db_cache_size_mb: usize) -> Result<Self, AppError> {
        let db_path: PathBuf = env::temp_dir().join("redmap").join(format!("{}_{}.db", name, rand::random::<u64>()));
        Self::open(&db_path, db_cache_size_mb)
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T, AppError>) -> Result<T, AppError> {
        let txn = self.db.begin_write()?;
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T, AppError>) -> Result<T, AppError> {
        let txn = self.db.begin_read()?;
        f(&txn)
    }

    fn read_blob<T: Blob>(&self, def: TableDefinition<&'static str, &'static [u8]>, kind: Kind, key: &str) -> Result<Option<T>, AppError> {
        self.read(|txn| {
            if !expect_kind(read_kind(txn, key)?, kind, key)? {
                return Ok(None);
            }
            let table = txn.open_table(def)?;
            blob_in(&table, key)
        })
    }

    /// Loads, mutates and writes back a blob, removing the key once the container is empty.
    fn update_blob<T: Blob, R>(
        &self,
        def: TableDefinition<&'static str, &'static [u8]>,
        kind: Kind,
        key: &str,
        f: impl FnOnce(&mut T) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        self.write(|txn| {
            let existed = expect_kind(write_kind(txn, key)?, kind, key)?;
            let mut table = txn.open_table(def)?;
            let mut value: T = blob_in(&table, key)?.unwrap_or_default();
            let out = f(&mut value)?;
            if value.is_empty() {
                table.remove(key)?;
                drop(table);
                if existed {
                    mark(txn, key, None)?;
                }
            } else {
                let bytes = bincode::serialize(&value)?;
                table.insert(key, bytes.as_slice())?;
                drop(table);
                if !existed {
                    mark(txn, key, Some(kind))?;
                }
            }
            Ok(out)
        })
    }

    fn update_string<R>(&self, key: &str, f: impl FnOnce(Option<String>) -> Result<(String, R), AppError>) -> Result<R, AppError> {
        self.write(|txn| {
            let existed = expect_kind(write_kind(txn, key)?, Kind::Str, key)?;
            let mut table = txn.open_table(STRINGS)?;
            let current = table.get(key)?.map(|g| g.value().to_string());
            let (next, out) = f(current)?;
            table.insert(key, next.as_str())?;
            drop(table);
            if !existed {
                mark(txn, key, Some(Kind::Str))?;
            }
            Ok(out)
        })
    }
}

impl Store for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.read(|txn| {
            if !expect_kind(read_kind(txn, key)?, Kind::Str, key)? {
                return Ok(None);
            }
            let table = txn.open_table(STRINGS)?;
            let value = table.get(key)?.map(|g| g.value().to_string());
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.write(|txn| {
            match write_kind(txn, key)? {
                Some(Kind::Str) => {}
                Some(other) => remove_key(txn, key, other)?,
                None => {}
            }
            let mut table = txn.open_table(STRINGS)?;
            table.insert(key, value)?;
            drop(table);
            mark(txn, key, Some(Kind::Str))
        })
    }

    fn set_nx(&self, key: &str, value: &str) -> Result<bool, AppError> {
        self.write(|txn| {
            if write_kind(txn, key)?.is_some() {
                return Ok(false);
            }
            let mut table = txn.open_table(STRINGS)?;
            table.insert(key, value)?;
            drop(table);
            mark(txn, key, Some(Kind::Str))?;
            Ok(true)
        })
    }

    fn append(&self, key: &str, value: &str) -> Result<usize, AppError> {
        self.update_string(key, |current| {
            let next = format!("{}{}", current.unwrap_or_default(), value);
            let len = next.len();
            Ok((next, len))
        })
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, AppError> {
        self.update_string(key, |current| {
            let base = match current {
                Some(v) => parse_integer(&v)?,
                None => 0,
            };
            let next = base
                .checked_add(delta)
                .ok_or_else(|| AppError::Store(format!("increment or decrement would overflow at {key}")))?;
            Ok((next.to_string(), next))
        })
    }

    fn delete(&self, keys: &[&str]) -> Result<usize, AppError> {
        self.write(|txn| {
            let mut removed = 0;
            for key in keys {
                if let Some(kind) = write_kind(txn, key)? {
                    remove_key(txn, key, kind)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.read(|txn| Ok(read_kind(txn, key)?.is_some()))
    }

    fn key_count(&self) -> Result<usize, AppError> {
        self.read(|txn| Ok(txn.open_table(TYPES)?.len()? as usize))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let hash: Option<HashBlob> = self.read_blob(HASHES, Kind::Hash, key)?;
        Ok(hash.and_then(|mut h| h.remove(field)))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, AppError> {
        self.update_blob(HASHES, Kind::Hash, key, |h: &mut HashBlob| Ok(h.insert(field.to_string(), value.to_string()).is_none()))
    }

    fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, AppError> {
        self.update_blob(HASHES, Kind::Hash, key, |h: &mut HashBlob| Ok(fields.iter().filter(|f| h.remove(**f).is_some()).count()))
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError> {
        self.update_blob(HASHES, Kind::Hash, key, |h: &mut HashBlob| {
            let base = match h.get(field) {
                Some(v) => parse_integer(v)?,
                None => 0,
            };
            let next = base
                .checked_add(delta)
                .ok_or_else(|| AppError::Store(format!("increment or decrement would overflow at {key}")))?;
            h.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    fn sadd(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.write(|txn| {
            let existed = expect_kind(write_kind(txn, key)?, Kind::Set, key)?;
            let mut table = txn.open_multimap_table(SETS)?;
            let mut added = 0;
            for member in members {
                if !table.insert(key, *member)? {
                    added += 1;
                }
            }
            drop(table);
            if !existed && added > 0 {
                mark(txn, key, Some(Kind::Set))?;
            }
            Ok(added)
        })
    }

    fn srem(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.write(|txn| {
            if !expect_kind(write_kind(txn, key)?, Kind::Set, key)? {
                return Ok(0);
            }
            let mut table = txn.open_multimap_table(SETS)?;
            let mut removed = 0;
            for member in members {
                if table.remove(key, *member)? {
                    removed += 1;
                }
            }
            let emptied = table.get(key)?.next().is_none();
            drop(table);
            if emptied {
                mark(txn, key, None)?;
            }
            Ok(removed)
        })
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, AppError> {
        self.read(|txn| {
            if !expect_kind(read_kind(txn, key)?, Kind::Set, key)? {
                return Ok(BTreeSet::new());
            }
            set_members(&txn.open_multimap_table(SETS)?, key)
        })
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        self.read(|txn| {
            if !expect_kind(read_kind(txn, key)?, Kind::Set, key)? {
                return Ok(false);
            }
            let table = txn.open_multimap_table(SETS)?;
            for guard in table.get(key)? {
                if guard?.value() == member {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    fn scard(&self, key: &str) -> Result<usize, AppError> {
        Ok(self.smembers(key)?.len())
    }

    fn sinter(&self, keys: &[&str]) -> Result<BTreeSet<String>, AppError> {
        self.read(|txn| {
            let types = txn.open_table(TYPES)?;
            let table = txn.open_multimap_table(SETS)?;
            let mut result: Option<BTreeSet<String>> = None;
            for key in keys {
                expect_kind(kind_in(&types, key)?, Kind::Set, key)?;
                let members = set_members(&table, key)?;
                result = Some(match result {
                    None => members,
                    Some(acc) => acc.intersection(&members).cloned().collect(),
                });
            }
            Ok(result.unwrap_or_default())
        })
    }

    fn sinterstore(&self, dest: &str, keys: &[&str]) -> Result<usize, AppError> {
        self.write(|txn| {
            let mut result: Option<BTreeSet<String>> = None;
            for key in keys {
                expect_kind(write_kind(txn, key)?, Kind::Set, key)?;
                let members = set_members(&txn.open_multimap_table(SETS)?, key)?;
                result = Some(match result {
                    None => members,
                    Some(acc) => acc.intersection(&members).cloned().collect(),
                });
            }
            let result = result.unwrap_or_default();
            if let Some(kind) = write_kind(txn, dest)? {
                remove_key(txn, dest, kind)?;
            }
            if !result.is_empty() {
                let mut table = txn.open_multimap_table(SETS)?;
                for member in &result {
                    table.insert(dest, member.as_str())?;
                }
                drop(table);
                mark(txn, dest, Some(Kind::Set))?;
            }
            Ok(result.len())
        })
    }

    fn rpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError> {
        self.update_blob(LISTS, Kind::List, key, |l: &mut ListBlob| {
            l.extend(values.iter().map(|v| v.to_string()));
            Ok(l.len())
        })
    }

    fn lpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError> {
        self.update_blob(LISTS, Kind::List, key, |l: &mut ListBlob| {
            for v in values {
                l.push_front(v.to_string());
            }
            Ok(l.len())
        })
    }

    fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
        let list: ListBlob = self.read_blob(LISTS, Kind::List, key)?.unwrap_or_default();
        Ok(match list_window(list.len(), start, stop) {
            Some((from, to)) => list.range(from..to).cloned().collect(),
            None => Vec::new(),
        })
    }

    fn llen(&self, key: &str) -> Result<usize, AppError> {
        let list: Option<ListBlob> = self.read_blob(LISTS, Kind::List, key)?;
        Ok(list.map_or(0, |l| l.len()))
    }

    fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize, AppError> {
        self.update_blob(LISTS, Kind::List, key, |l: &mut ListBlob| {
            let (kept, removed) = remove_occurrences(std::mem::take(l), count, value);
            *l = kept;
            Ok(removed)
        })
    }

    fn lpop(&self, key: &str) -> Result<Option<String>, AppError> {
        self.update_blob(LISTS, Kind::List, key, |l: &mut ListBlob| Ok(l.pop_front()))
    }

    fn rpop(&self, key: &str) -> Result<Option<String>, AppError> {
        self.update_blob(LISTS, Kind::List, key, |l: &mut ListBlob| Ok(l.pop_back()))
    }

    fn zadd(&self, key: &str, members: &[(f64, &str)]) -> Result<usize, AppError> {
        self.update_blob(ZSETS, Kind::ZSet, key, |z: &mut ZSetBlob| {
            Ok(members.iter().filter(|(score, m)| z.insert(m.to_string(), *score).is_none()).count())
        })
    }

    fn zrem(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.update_blob(ZSETS, Kind::ZSet, key, |z: &mut ZSetBlob| Ok(members.iter().filter(|m| z.remove(**m).is_some()).count()))
    }

    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, f64)>, AppError> {
        let z: ZSetBlob = self.read_blob(ZSETS, Kind::ZSet, key)?.unwrap_or_default();
        Ok(zset_range(&z, start, stop))
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, AppError> {
        let z: Option<ZSetBlob> = self.read_blob(ZSETS, Kind::ZSet, key)?;
        Ok(z.and_then(|z| z.get(member).copied()))
    }

    fn zcard(&self, key: &str) -> Result<usize, AppError> {
        let z: Option<ZSetBlob> = self.read_blob(ZSETS, Kind::ZSet, key)?;
        Ok(z.map_or(0, |z| z.len()))
    }

    fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError> {
        self.update_blob(ZSETS, Kind::ZSet, key, |z: &mut ZSetBlob| {
            let score = z.entry(member.to_string()).or_insert(0.0);
            *score += delta;
            Ok(*score)
        })
    }

    fn sort(&self, key: &str, opts: &SortOptions) -> Result<Vec<Vec<Option<String>>>, AppError> {
        self.read(|txn| {
            let types = txn.open_table(TYPES)?;
            let strings = txn.open_table(STRINGS)?;
            let hashes = txn.open_table(HASHES)?;
            let members = if expect_kind(kind_in(&types, key)?, Kind::Set, key)? {
                set_members(&txn.open_multimap_table(SETS)?, key)?
            } else {
                BTreeSet::new()
            };
            sort_members(members, opts, |k, field| match field {
                None => {
                    if !expect_kind(kind_in(&types, k)?, Kind::Str, k)? {
                        return Ok(None);
                    }
                    Ok(strings.get(k)?.map(|g| g.value().to_string()))
                }
                Some(f) => {
                    if !expect_kind(kind_in(&types, k)?, Kind::Hash, k)? {
                        return Ok(None);
                    }
                    let hash: Option<HashBlob> = blob_in(&hashes, k)?;
                    Ok(hash.and_then(|mut h| h.remove(f)))
                }
            })
        })
    }
}
