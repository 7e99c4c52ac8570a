use crate::storage::sort::sort_members;
use crate::storage::{SortOptions, Store};
use crate::utils::{list_window, parse_integer};
use crate::AppError;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
    ZSet(BTreeMap<String, f64>),
}

impl Entry {
    fn is_empty(&self) -> bool {
        match self {
            Entry::Str(_) => false,
            Entry::Hash(h) => h.is_empty(),
            Entry::Set(s) => s.is_empty(),
            Entry::List(l) => l.is_empty(),
            Entry::ZSet(z) => z.is_empty(),
        }
    }
}

type Data = HashMap<String, Entry>;

/// In-process store. Every command runs under one lock acquisition and is counted.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    commands: AtomicU64,
}

macro_rules! typed {
    ($data:expr, $key:expr, $variant:ident) => {
        match $data.get($key) {
            None => None,
            Some(Entry::$variant(v)) => Some(v),
            Some(_) => return Err(AppError::WrongType($key.to_string())),
        }
    };
}

macro_rules! typed_mut {
    ($data:expr, $key:expr, $variant:ident, $init:expr) => {
        match $data.entry($key.to_string()).or_insert_with(|| Entry::$variant($init)) {
            Entry::$variant(v) => v,
            _ => return Err(AppError::WrongType($key.to_string())),
        }
    };
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands executed so far.
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    fn with<T>(&self, f: impl FnOnce(&mut Data) -> Result<T, AppError>) -> Result<T, AppError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock()?;
        f(&mut data)
    }

    fn prune(data: &mut Data, key: &str) {
        if data.get(key).is_some_and(Entry::is_empty) {
            data.remove(key);
        }
    }

    fn read_set(data: &Data, key: &str) -> Result<BTreeSet<String>, AppError> {
        Ok(typed!(data, key, Set).cloned().unwrap_or_default())
    }

    fn intersect(data: &Data, keys: &[&str]) -> Result<BTreeSet<String>, AppError> {
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            sets.push(Self::read_set(data, key)?);
        }
        let mut iter = sets.into_iter();
        let first = iter.next().unwrap_or_default();
        Ok(iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect()))
    }

    fn lookup(data: &Data, key: &str, field: Option<&str>) -> Result<Option<String>, AppError> {
        match field {
            None => Ok(typed!(data, key, Str).cloned()),
            Some(f) => Ok(typed!(data, key, Hash).and_then(|h| h.get(f).cloned())),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with(|d| Ok(typed!(d, key, Str).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.with(|d| {
            d.insert(key.to_string(), Entry::Str(value.to_string()));
            Ok(())
        })
    }

    fn set_nx(&self, key: &str, value: &str) -> Result<bool, AppError> {
        self.with(|d| {
            if d.contains_key(key) {
                return Ok(false);
            }
            d.insert(key.to_string(), Entry::Str(value.to_string()));
            Ok(true)
        })
    }

    fn append(&self, key: &str, value: &str) -> Result<usize, AppError> {
        self.with(|d| {
            let s = typed_mut!(d, key, Str, String::new());
            s.push_str(value);
            Ok(s.len())
        })
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, AppError> {
        self.with(|d| {
            let current = match typed!(d, key, Str) {
                Some(v) => parse_integer(v)?,
                None => 0,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| AppError::Store(format!("increment or decrement would overflow at {key}")))?;
            d.insert(key.to_string(), Entry::Str(next.to_string()));
            Ok(next)
        })
    }

    fn delete(&self, keys: &[&str]) -> Result<usize, AppError> {
        self.with(|d| Ok(keys.iter().filter(|k| d.remove(**k).is_some()).count()))
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.with(|d| Ok(d.contains_key(key)))
    }

    fn key_count(&self) -> Result<usize, AppError> {
        self.with(|d| Ok(d.len()))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        self.with(|d| Self::lookup(d, key, Some(field)))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, AppError> {
        self.with(|d| {
            let h = typed_mut!(d, key, Hash, BTreeMap::new());
            Ok(h.insert(field.to_string(), value.to_string()).is_none())
        })
    }

    fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let removed = match d.get_mut(key) {
                None => 0,
                Some(Entry::Hash(h)) => fields.iter().filter(|f| h.remove(**f).is_some()).count(),
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(removed)
        })
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError> {
        self.with(|d| {
            let h = typed_mut!(d, key, Hash, BTreeMap::new());
            let current = match h.get(field) {
                Some(v) => parse_integer(v)?,
                None => 0,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| AppError::Store(format!("increment or decrement would overflow at {key}")))?;
            h.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    fn sadd(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let s = typed_mut!(d, key, Set, BTreeSet::new());
            let added = members.iter().filter(|m| s.insert(m.to_string())).count();
            Self::prune(d, key);
            Ok(added)
        })
    }

    fn srem(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let removed = match d.get_mut(key) {
                None => 0,
                Some(Entry::Set(s)) => members.iter().filter(|m| s.remove(**m)).count(),
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(removed)
        })
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, AppError> {
        self.with(|d| Self::read_set(d, key))
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        self.with(|d| Ok(typed!(d, key, Set).is_some_and(|s| s.contains(member))))
    }

    fn scard(&self, key: &str) -> Result<usize, AppError> {
        self.with(|d| Ok(typed!(d, key, Set).map_or(0, |s| s.len())))
    }

    fn sinter(&self, keys: &[&str]) -> Result<BTreeSet<String>, AppError> {
        self.with(|d| Self::intersect(d, keys))
    }

    fn sinterstore(&self, dest: &str, keys: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let result = Self::intersect(d, keys)?;
            let len = result.len();
            if result.is_empty() {
                d.remove(dest);
            } else {
                d.insert(dest.to_string(), Entry::Set(result));
            }
            Ok(len)
        })
    }

    fn rpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let l = typed_mut!(d, key, List, VecDeque::new());
            l.extend(values.iter().map(|v| v.to_string()));
            let len = l.len();
            Self::prune(d, key);
            Ok(len)
        })
    }

    fn lpush(&self, key: &str, values: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let l = typed_mut!(d, key, List, VecDeque::new());
            for v in values {
                l.push_front(v.to_string());
            }
            let len = l.len();
            Self::prune(d, key);
            Ok(len)
        })
    }

    fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
        self.with(|d| {
            let Some(l) = typed!(d, key, List) else { return Ok(Vec::new()) };
            Ok(match list_window(l.len(), start, stop) {
                Some((from, to)) => l.range(from..to).cloned().collect(),
                None => Vec::new(),
            })
        })
    }

    fn llen(&self, key: &str) -> Result<usize, AppError> {
        self.with(|d| Ok(typed!(d, key, List).map_or(0, |l| l.len())))
    }

    fn lrem(&self, key: &str, count: isize, value: &str) -> Result<usize, AppError> {
        self.with(|d| {
            let removed = match d.get_mut(key) {
                None => 0,
                Some(Entry::List(l)) => {
                    let (kept, removed) = remove_occurrences(std::mem::take(l), count, value);
                    *l = kept;
                    removed
                }
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(removed)
        })
    }

    fn lpop(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with(|d| {
            let popped = match d.get_mut(key) {
                None => None,
                Some(Entry::List(l)) => l.pop_front(),
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(popped)
        })
    }

    fn rpop(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with(|d| {
            let popped = match d.get_mut(key) {
                None => None,
                Some(Entry::List(l)) => l.pop_back(),
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(popped)
        })
    }

    fn zadd(&self, key: &str, members: &[(f64, &str)]) -> Result<usize, AppError> {
        self.with(|d| {
            let z = typed_mut!(d, key, ZSet, BTreeMap::new());
            let added = members.iter().filter(|(score, m)| z.insert(m.to_string(), *score).is_none()).count();
            Self::prune(d, key);
            Ok(added)
        })
    }

    fn zrem(&self, key: &str, members: &[&str]) -> Result<usize, AppError> {
        self.with(|d| {
            let removed = match d.get_mut(key) {
                None => 0,
                Some(Entry::ZSet(z)) => members.iter().filter(|m| z.remove(**m).is_some()).count(),
                Some(_) => return Err(AppError::WrongType(key.to_string())),
            };
            Self::prune(d, key);
            Ok(removed)
        })
    }

    fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, f64)>, AppError> {
        self.with(|d| {
            let Some(z) = typed!(d, key, ZSet) else { return Ok(Vec::new()) };
            Ok(zset_range(z, start, stop))
        })
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, AppError> {
        self.with(|d| Ok(typed!(d, key, ZSet).and_then(|z| z.get(member).copied())))
    }

    fn zcard(&self, key: &str) -> Result<usize, AppError> {
        self.with(|d| Ok(typed!(d, key, ZSet).map_or(0, |z| z.len())))
    }

    fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError> {
        self.with(|d| {
            let z = typed_mut!(d, key, ZSet, BTreeMap::new());
            let score = z.entry(member.to_string()).or_insert(0.0);
            *score += delta;
            Ok(*score)
        })
    }

    fn sort(&self, key: &str, opts: &SortOptions) -> Result<Vec<Vec<Option<String>>>, AppError> {
        self.with(|d| {
            let members = Self::read_set(d, key)?;
            sort_members(members, opts, |k, f| Self::lookup(d, k, f))
        })
    }
}

/// Shared by both backends: applies `LREM` semantics to a list.
pub(crate) fn remove_occurrences(list: VecDeque<String>, count: isize, value: &str) -> (VecDeque<String>, usize) {
    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
    let mut removed = 0;
    let mut kept = VecDeque::with_capacity(list.len());
    if count >= 0 {
        for item in list {
            if removed < limit && item == value {
                removed += 1;
            } else {
                kept.push_back(item);
            }
        }
    } else {
        for item in list.into_iter().rev() {
            if removed < limit && item == value {
                removed += 1;
            } else {
                kept.push_front(item);
            }
        }
    }
    (kept, removed)
}

/// Shared by both backends: members of a sorted set ordered by score then member, windowed.
pub(crate) fn zset_range(z: &BTreeMap<String, f64>, start: isize, stop: isize) -> Vec<(String, f64)> {
    let mut ordered: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
    ordered.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));
    match list_window(ordered.len(), start, stop) {
        Some((from, to)) => ordered[from..to].to_vec(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortBy;

    #[test]
    fn it_should_claim_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx("boat:name:Pen Duick", "1").expect("set_nx"));
        assert!(!store.set_nx("boat:name:Pen Duick", "2").expect("set_nx"));
        assert_eq!(store.get("boat:name:Pen Duick").expect("get"), Some("1".to_string()));
    }

    #[test]
    fn it_should_reject_wrong_type() {
        let store = MemoryStore::new();
        store.sadd("boat:collection", &["1"]).expect("sadd");
        assert!(matches!(store.get("boat:collection"), Err(AppError::WrongType(_))));
        assert!(matches!(store.incr_by("boat:collection", 1), Err(AppError::WrongType(_))));
    }

    #[test]
    fn it_should_remove_emptied_collections() {
        let store = MemoryStore::new();
        store.sadd("s", &["a"]).expect("sadd");
        store.srem("s", &["a"]).expect("srem");
        assert!(!store.exists("s").expect("exists"));
        store.rpush("l", &["x"]).expect("rpush");
        assert_eq!(store.lpop("l").expect("lpop"), Some("x".to_string()));
        assert_eq!(store.key_count().expect("count"), 0);
    }

    #[test]
    fn it_should_count_commands() {
        let store = MemoryStore::new();
        store.set("a", "1").expect("set");
        store.get("a").expect("get");
        assert_eq!(store.command_count(), 2);
    }

    #[test]
    fn it_should_increment_counters() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("boat:max_pk", 1).expect("incr"), 1);
        assert_eq!(store.incr_by("boat:max_pk", 1).expect("incr"), 2);
        store.set("text", "sail").expect("set");
        assert!(matches!(store.incr_by("text", 1), Err(AppError::Store(_))));
    }

    #[test]
    fn it_should_intersect_and_store() {
        let store = MemoryStore::new();
        store.sadd("a", &["1", "2", "3"]).expect("sadd");
        store.sadd("b", &["2", "3", "4"]).expect("sadd");
        assert_eq!(store.sinterstore("dest", &["a", "b"]).expect("sinterstore"), 2);
        assert_eq!(store.smembers("dest").expect("smembers").into_iter().collect::<Vec<_>>(), vec!["2", "3"]);
        assert_eq!(store.sinterstore("dest", &["a", "missing"]).expect("sinterstore"), 0);
        assert!(!store.exists("dest").expect("exists"));
    }

    #[test]
    fn it_should_handle_lists() {
        let store = MemoryStore::new();
        store.rpush("l", &["a", "b", "a", "c", "a"]).expect("rpush");
        store.lpush("l", &["z"]).expect("lpush");
        assert_eq!(store.lrange("l", 0, -1).expect("lrange"), vec!["z", "a", "b", "a", "c", "a"]);
        assert_eq!(store.lrem("l", -1, "a").expect("lrem"), 1);
        assert_eq!(store.lrange("l", 0, -1).expect("lrange"), vec!["z", "a", "b", "a", "c"]);
        assert_eq!(store.lrem("l", 0, "a").expect("lrem"), 2);
        assert_eq!(store.lrange("l", 0, -1).expect("lrange"), vec!["z", "b", "c"]);
        assert_eq!(store.llen("l").expect("llen"), 3);
    }

    #[test]
    fn it_should_order_sorted_sets_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", &[(3.0, "c"), (1.0, "a"), (2.0, "b")]).expect("zadd");
        assert_eq!(store.zincr_by("z", "a", 5.0).expect("zincr"), 6.0);
        let members: Vec<String> = store.zrange("z", 0, -1).expect("zrange").into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec!["b", "c", "a"]);
        assert_eq!(store.zscore("z", "b").expect("zscore"), Some(2.0));
        assert_eq!(store.zcard("z").expect("zcard"), 3);
    }

    #[test]
    fn it_should_sort_by_hash_field() {
        let store = MemoryStore::new();
        store.sadd("boat:collection", &["1", "2", "3"]).expect("sadd");
        store.hset("boat:1", "year", "1990").expect("hset");
        store.hset("boat:2", "year", "1950").expect("hset");
        store.hset("boat:3", "year", "2001").expect("hset");
        let opts = SortOptions {
            by: SortBy::Pattern("boat:*->year".into()),
            get: vec!["#".into(), "boat:*->year".into()],
            ..Default::default()
        };
        let rows = store.sort("boat:collection", &opts).expect("sort");
        let ids: Vec<String> = rows.into_iter().filter_map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
    }
}
