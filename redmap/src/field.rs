//! Typed proxies over one field of one instance.
//!
//! Every operation is either a read, answered from the proxy's single cache slot when the same
//! read was the last one issued, or a mutation, which always clears that slot. Mutations of
//! indexable fields keep the index in step through [`IndexManager::reindex`](crate::index::IndexManager::reindex)
//! and [`IndexManager::settle`](crate::index::IndexManager::settle).

use crate::instance::Instance;
use crate::model::{FieldDef, FieldKind};
use crate::storage::Store;
use crate::utils::parse_integer;
use crate::value::FieldValue;
use crate::{keys, AppError};
use log::debug;
use std::collections::BTreeSet;

/// Read operations, the key of the cache slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOp {
    Get,
    Members,
    Contains(String),
    Len,
    Range(isize, isize),
    Score(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Option<String>),
    Members(BTreeSet<String>),
    Flag(bool),
    Count(usize),
    Items(Vec<String>),
    Scored(Vec<(String, f64)>),
    Score(Option<f64>),
}

/// Values a read can leave in the cache slot.
trait Cached: Clone + Default {
    fn into_reply(self) -> Reply;
    fn from_reply(reply: &Reply) -> Option<Self>;
}

macro_rules! cached {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl Cached for $ty {
            fn into_reply(self) -> Reply {
                Reply::$variant(self)
            }

            fn from_reply(reply: &Reply) -> Option<Self> {
                match reply {
                    Reply::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }
        })*
    };
}

cached! {
    Option<String> => Value,
    BTreeSet<String> => Members,
    bool => Flag,
    usize => Count,
    Vec<String> => Items,
    Vec<(String, f64)> => Scored,
    Option<f64> => Score,
}

/// Attempts of a unique increment before a concurrent change is reported.
const INCR_ATTEMPTS: usize = 3;

/// State shared by every proxy kind.
struct Slot<'i> {
    instance: &'i Instance,
    index: usize,
    def: &'i FieldDef,
}

impl<'i> Slot<'i> {
    fn store(&self) -> &'i dyn Store {
        self.instance.store()
    }

    fn class(&self) -> &'i str {
        self.instance.model().class()
    }

    fn key(&self, pk: &str) -> String {
        keys::instance_key(self.class(), pk, &self.def.name)
    }

    /// Answers `op` from the cache or through `fetch`. Before the instance has an identifier the
    /// field is empty and the store is not contacted.
    fn read<T: Cached>(&self, op: ReadOp, fetch: impl FnOnce(&str) -> Result<T, AppError>) -> Result<T, AppError> {
        let Some(pk) = self.instance.pk()? else { return Ok(T::default()) };
        let mut cache = self.instance.cache(self.index).lock()?;
        if let Some(hit) = cache.as_ref().filter(|(cached_op, _)| *cached_op == op).and_then(|(_, reply)| T::from_reply(reply)) {
            return Ok(hit);
        }
        let value = fetch(&pk)?;
        *cache = Some((op, value.clone().into_reply()));
        Ok(value)
    }

    fn invalidate(&self) -> Result<(), AppError> {
        *self.instance.cache(self.index).lock()? = None;
        Ok(())
    }

    /// Registers the instance, runs `op` on the field key and clears the cache whatever the outcome.
    fn mutate<T>(&self, op: impl FnOnce(&dyn Store, &str) -> Result<T, AppError>) -> Result<T, AppError> {
        let result = self.instance.ensure_registered().and_then(|_| {
            let pk = self.instance.pk_for_write()?;
            op(self.store(), &self.key(&pk))
        });
        self.invalidate()?;
        result
    }
}

/// A string field or a hash-entry field.
pub struct ScalarField<'i> {
    slot: Slot<'i>,
}

impl<'i> ScalarField<'i> {
    pub(crate) fn new(instance: &'i Instance, index: usize, def: &'i FieldDef) -> Self {
        ScalarField { slot: Slot { instance, index, def } }
    }

    pub fn def(&self) -> &FieldDef {
        self.slot.def
    }

    fn fetch(&self, pk: &str) -> Result<Option<String>, AppError> {
        match self.slot.def.kind {
            FieldKind::Hash => self.slot.store().hget(&keys::hash_key(self.slot.class(), pk), &self.slot.def.name),
            _ => self.slot.store().get(&self.slot.key(pk)),
        }
    }

    fn store_value(&self, store: &dyn Store, pk: &str, value: &str) -> Result<(), AppError> {
        match self.slot.def.kind {
            FieldKind::Hash => store.hset(&keys::hash_key(self.slot.class(), pk), &self.slot.def.name, value).map(|_| ()),
            _ => store.set(&self.slot.key(pk), value),
        }
    }

    fn store_incr(&self, store: &dyn Store, pk: &str, delta: i64) -> Result<i64, AppError> {
        match self.slot.def.kind {
            FieldKind::Hash => store.hincr_by(&keys::hash_key(self.slot.class(), pk), &self.slot.def.name, delta),
            _ => store.incr_by(&self.slot.key(pk), delta),
        }
    }

    fn overflow(&self) -> AppError {
        AppError::Store(format!("increment of {} would overflow", self.slot.def.name))
    }

    /// Allocates the identifier when needed, runs `body` and drops the cached read whatever the outcome.
    fn run<T>(&self, body: impl FnOnce(&str) -> Result<T, AppError>) -> Result<T, AppError> {
        let result = self.slot.instance.pk_for_write().and_then(|pk| body(&pk));
        self.slot.invalidate()?;
        result
    }

    /// Mutation whose result is known before it runs. For indexable fields the current value is
    /// read fresh, `next` derives the value being written and the index moves with it, then
    /// settles on what the field holds once `op` is done.
    fn write<T>(
        &self,
        next: impl FnOnce(Option<&str>) -> Result<Option<String>, AppError>,
        op: impl FnOnce(&dyn Store, &str) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let instance = self.slot.instance;
        let def = self.slot.def;
        self.run(|pk| {
            if !def.indexable {
                instance.ensure_registered()?;
                return op(self.slot.store(), pk);
            }
            let indexes = instance.model().indexes();
            let old = self.fetch(pk)?;
            let new = next(old.as_deref())?;
            let mut out = None;
            indexes.reindex(def, pk, old.as_deref(), new.as_deref(), || {
                instance.ensure_registered()?;
                out = Some(op(self.slot.store(), pk)?);
                Ok(())
            })?;
            indexes.settle(def, pk, new.as_deref(), || self.fetch(pk))?;
            out.ok_or_else(|| AppError::Custom(format!("Write of {} did not run", def.name)))
        })
    }

    /// Mutation through one atomic store command. `op` reports the values right before and after
    /// its own change, so a non-unique index follows exactly the transition the command made.
    fn write_atomic<T>(
        &self,
        op: impl FnOnce(&dyn Store, &str) -> Result<(T, Option<String>, Option<String>), AppError>,
    ) -> Result<T, AppError> {
        let instance = self.slot.instance;
        let def = self.slot.def;
        self.run(|pk| {
            instance.ensure_registered()?;
            let (out, old, new) = op(self.slot.store(), pk)?;
            if def.indexable {
                let indexes = instance.model().indexes();
                indexes.reindex(def, pk, old.as_deref(), new.as_deref(), || Ok(()))?;
                indexes.settle(def, pk, new.as_deref(), || self.fetch(pk))?;
            }
            Ok(out)
        })
    }

    pub fn get(&self) -> Result<Option<String>, AppError> {
        self.slot.read(ReadOp::Get, |pk| self.fetch(pk))
    }

    pub fn set(&self, value: impl Into<FieldValue>) -> Result<(), AppError> {
        let value = value.into().into_string();
        self.write(|_| Ok(Some(value.clone())), |store, pk| self.store_value(store, pk, &value))
    }

    /// Appends to a string field; returns the new length.
    pub fn append(&self, suffix: &str) -> Result<usize, AppError> {
        let def = self.slot.def;
        if def.kind != FieldKind::String {
            return Err(AppError::Implementation(format!("append is not available on hash field {}", def.name)));
        }
        if def.unique {
            return self.write(
                |old| Ok(Some(format!("{}{}", old.unwrap_or_default(), suffix))),
                |store, pk| store.append(&self.slot.key(pk), suffix),
            );
        }
        self.write_atomic(|store, pk| {
            let len = store.append(&self.slot.key(pk), suffix)?;
            if !def.indexable {
                return Ok((len, None, None));
            }
            let now = self.fetch(pk)?;
            let old = now.as_deref().filter(|v| v.len() == len).and_then(|v| v.strip_suffix(suffix)).map(str::to_string);
            Ok((len, old, now))
        })
    }

    /// Increments an integer value; returns the new value.
    pub fn incr_by(&self, delta: i64) -> Result<i64, AppError> {
        if self.slot.def.unique {
            return self.incr_unique(delta);
        }
        self.write_atomic(|store, pk| {
            let new = self.store_incr(store, pk, delta)?;
            Ok((new, Some((new - delta).to_string()), Some(new.to_string())))
        })
    }

    /// Claims the expected result, then checks that the atomic increment landed on it. An
    /// increment that raced another change is undone and tried again.
    fn incr_unique(&self, delta: i64) -> Result<i64, AppError> {
        let instance = self.slot.instance;
        let def = self.slot.def;
        let undo = delta.checked_neg().ok_or_else(|| self.overflow())?;
        self.run(|pk| {
            let indexes = instance.model().indexes();
            let mut attempt = 1;
            loop {
                let old = self.fetch(pk)?;
                let base = old.as_deref().map(parse_integer).transpose()?.unwrap_or(0);
                let expected = base.checked_add(delta).ok_or_else(|| self.overflow())?;
                let target = expected.to_string();
                let outcome = indexes.reindex(def, pk, old.as_deref(), Some(target.as_str()), || {
                    instance.ensure_registered()?;
                    let reached = self.store_incr(self.slot.store(), pk, delta)?;
                    if reached == expected {
                        return Ok(());
                    }
                    self.store_incr(self.slot.store(), pk, undo)?;
                    Err(AppError::Conflict(format!("{} of {} reached {} instead of {}", def.name, pk, reached, expected)))
                });
                match outcome {
                    Ok(()) => {
                        indexes.settle(def, pk, Some(target.as_str()), || self.fetch(pk))?;
                        return Ok(expected);
                    }
                    Err(AppError::Conflict(reason)) if attempt < INCR_ATTEMPTS => {
                        debug!("Retrying increment: {}", reason);
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    /// Removes the value and its index entry.
    pub fn delete(&self) -> Result<(), AppError> {
        if self.slot.instance.pk()?.is_none() {
            return Ok(());
        }
        self.write(
            |_| Ok(None),
            |store, pk| match self.slot.def.kind {
                FieldKind::Hash => store.hdel(&keys::hash_key(self.slot.class(), pk), &[self.slot.def.name.as_str()]).map(|_| ()),
                _ => store.delete(&[self.slot.key(pk).as_str()]).map(|_| ()),
            },
        )
    }

    /// Whether `value` is held by a living instance. Only valid on indexable fields.
    pub fn exists(&self, value: impl Into<FieldValue>) -> Result<bool, AppError> {
        if !self.slot.def.indexable {
            return Err(AppError::NotIndexable(format!("{}.{}", self.slot.class(), self.slot.def.name)));
        }
        self.slot.instance.model().indexes().resolves_to_living(self.slot.def, value.into().as_str())
    }
}

pub struct SetField<'i> {
    slot: Slot<'i>,
}

impl<'i> SetField<'i> {
    pub(crate) fn new(instance: &'i Instance, index: usize, def: &'i FieldDef) -> Self {
        SetField { slot: Slot { instance, index, def } }
    }

    pub fn members(&self) -> Result<BTreeSet<String>, AppError> {
        self.slot.read(ReadOp::Members, |pk| self.slot.store().smembers(&self.slot.key(pk)))
    }

    pub fn contains(&self, member: &str) -> Result<bool, AppError> {
        self.slot.read(ReadOp::Contains(member.to_string()), |pk| self.slot.store().sismember(&self.slot.key(pk), member))
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.slot.read(ReadOp::Len, |pk| self.slot.store().scard(&self.slot.key(pk)))
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    pub fn add(&self, members: &[&str]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.sadd(key, members))
    }

    pub fn remove(&self, members: &[&str]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.srem(key, members))
    }
}

pub struct ListField<'i> {
    slot: Slot<'i>,
}

impl<'i> ListField<'i> {
    pub(crate) fn new(instance: &'i Instance, index: usize, def: &'i FieldDef) -> Self {
        ListField { slot: Slot { instance, index, def } }
    }

    /// Items between `start` and `stop`, both inclusive; negative offsets count from the end.
    pub fn range(&self, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
        self.slot.read(ReadOp::Range(start, stop), |pk| self.slot.store().lrange(&self.slot.key(pk), start, stop))
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.slot.read(ReadOp::Len, |pk| self.slot.store().llen(&self.slot.key(pk)))
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    pub fn push_back(&self, values: &[&str]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.rpush(key, values))
    }

    pub fn push_front(&self, values: &[&str]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.lpush(key, values))
    }

    pub fn remove(&self, count: isize, value: &str) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.lrem(key, count, value))
    }

    pub fn pop_front(&self) -> Result<Option<String>, AppError> {
        self.slot.mutate(|store, key| store.lpop(key))
    }

    pub fn pop_back(&self) -> Result<Option<String>, AppError> {
        self.slot.mutate(|store, key| store.rpop(key))
    }
}

pub struct SortedSetField<'i> {
    slot: Slot<'i>,
}

impl<'i> SortedSetField<'i> {
    pub(crate) fn new(instance: &'i Instance, index: usize, def: &'i FieldDef) -> Self {
        SortedSetField { slot: Slot { instance, index, def } }
    }

    pub fn range(&self, start: isize, stop: isize) -> Result<Vec<(String, f64)>, AppError> {
        self.slot.read(ReadOp::Range(start, stop), |pk| self.slot.store().zrange(&self.slot.key(pk), start, stop))
    }

    pub fn score(&self, member: &str) -> Result<Option<f64>, AppError> {
        self.slot.read(ReadOp::Score(member.to_string()), |pk| self.slot.store().zscore(&self.slot.key(pk), member))
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.slot.read(ReadOp::Len, |pk| self.slot.store().zcard(&self.slot.key(pk)))
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    pub fn add(&self, members: &[(f64, &str)]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.zadd(key, members))
    }

    pub fn remove(&self, members: &[&str]) -> Result<usize, AppError> {
        self.slot.mutate(|store, key| store.zrem(key, members))
    }

    pub fn incr_by(&self, member: &str, delta: f64) -> Result<f64, AppError> {
        self.slot.mutate(|store, key| store.zincr_by(key, member, delta))
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{Database, Model};
    use crate::model::{FieldDef, ModelDef};
    use crate::storage::{MemoryStore, Store};
    use crate::AppError;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, Model) {
        let store = Arc::new(MemoryStore::new());
        let db = Database::new(store.clone());
        let model = db
            .register(
                ModelDef::builder("Singer")
                    .field(FieldDef::string("name").unique())
                    .field(FieldDef::string("nickname"))
                    .field(FieldDef::hash("albums").indexable())
                    .field(FieldDef::set("labels"))
                    .field(FieldDef::list("songs"))
                    .field(FieldDef::sorted_set("charts"))
                    .build()
                    .expect("valid model"),
            )
            .expect("register");
        (store, model)
    }

    #[test]
    fn it_should_cache_reads_until_a_write() {
        let (store, singers) = setup();
        let singer = singers.create([("nickname", "Gégé".into())]).expect("create");
        let nickname = singer.string("nickname").expect("field");
        let before = store.command_count();
        assert_eq!(nickname.get().expect("get"), Some("Gégé".to_string()));
        assert_eq!(nickname.get().expect("get"), Some("Gégé".to_string()));
        assert_eq!(store.command_count(), before + 1);
        nickname.append(" B.").expect("append");
        assert_eq!(nickname.get().expect("get"), Some("Gégé B.".to_string()));
        assert_eq!(store.command_count(), before + 3);
    }

    #[test]
    fn it_should_not_carry_cache_across_instances() {
        let (_, singers) = setup();
        let a = singers.create([("nickname", "a".into())]).expect("create");
        let b = singers.create([("nickname", "b".into())]).expect("create");
        assert_eq!(a.string("nickname").expect("field").get().expect("get"), Some("a".to_string()));
        assert_eq!(b.string("nickname").expect("field").get().expect("get"), Some("b".to_string()));
    }

    #[test]
    fn it_should_reindex_on_increment() {
        let (store, singers) = setup();
        let singer = singers.create([("albums", 3.into())]).expect("create");
        assert_eq!(singer.hash("albums").expect("field").incr_by(2).expect("incr"), 5);
        assert!(!store.exists("singer:albums:3").expect("exists"));
        assert!(store.sismember("singer:albums:5", "1").expect("sismember"));
        assert_eq!(store.hget("singer:1", "albums").expect("hget"), Some("5".to_string()));
    }

    #[test]
    fn it_should_move_the_claim_on_unique_increments() {
        let (store, singers) = setup();
        let first = singers.create([("name", "1".into())]).expect("create");
        let second = singers.create([("name", "2".into())]).expect("create");
        let name = first.string("name").expect("field");
        assert!(matches!(name.incr_by(1), Err(AppError::Uniqueness(_))));
        assert_eq!(store.get("singer:1:name").expect("get"), Some("1".to_string()));
        assert_eq!(name.incr_by(5).expect("incr"), 6);
        assert!(!store.exists("singer:name:1").expect("exists"));
        assert_eq!(store.get("singer:name:6").expect("get"), Some("1".to_string()));
        assert_eq!(store.get("singer:name:2").expect("get"), second.pk().expect("pk"));
    }

    #[test]
    fn it_should_keep_the_value_on_uniqueness_conflicts() {
        let (_, singers) = setup();
        let first = singers.create([("name", "Gérard Blanchard".into())]).expect("create");
        let second = singers.create([("name", "Renaud".into())]).expect("create");
        let result = second.string("name").expect("field").set("Gérard Blanchard");
        assert!(matches!(result, Err(AppError::Uniqueness(_))));
        assert_eq!(second.string("name").expect("field").get().expect("get"), Some("Renaud".to_string()));
        assert_eq!(first.string("name").expect("field").get().expect("get"), Some("Gérard Blanchard".to_string()));
    }

    #[test]
    fn it_should_answer_exists_on_indexable_fields_only() {
        let (_, singers) = setup();
        let singer = singers.create([("name", "Renaud".into())]).expect("create");
        let name = singer.string("name").expect("field");
        assert!(name.exists("Renaud").expect("exists"));
        assert!(!name.exists("Bashung").expect("exists"));
        assert!(matches!(singer.string("nickname").expect("field").exists("x"), Err(AppError::NotIndexable(_))));
        singer.delete().expect("delete");
        assert!(!singers.exists_by("name", "Renaud").expect("exists"));
    }

    #[test]
    fn it_should_drive_collection_fields() {
        let (_, singers) = setup();
        let singer = singers.create([("name", "Renaud".into())]).expect("create");
        let labels = singer.set("labels").expect("field");
        assert_eq!(labels.add(&["polydor", "virgin"]).expect("add"), 2);
        assert!(labels.contains("virgin").expect("contains"));
        assert_eq!(labels.remove(&["virgin"]).expect("remove"), 1);
        assert!(!labels.contains("virgin").expect("contains"));

        let songs = singer.list("songs").expect("field");
        songs.push_back(&["Mistral gagnant", "Morgane de toi"]).expect("push");
        songs.push_front(&["Hexagone"]).expect("push");
        assert_eq!(songs.range(0, -1).expect("range"), vec!["Hexagone", "Mistral gagnant", "Morgane de toi"]);
        assert_eq!(songs.pop_back().expect("pop"), Some("Morgane de toi".to_string()));
        assert_eq!(songs.len().expect("len"), 2);

        let charts = singer.sorted_set("charts").expect("field");
        charts.add(&[(2.0, "1985"), (1.0, "1980")]).expect("add");
        charts.incr_by("1980", 5.0).expect("incr");
        assert_eq!(charts.range(0, -1).expect("range").into_iter().map(|(m, _)| m).collect::<Vec<_>>(), vec!["1985", "1980"]);
        assert_eq!(charts.score("1980").expect("score"), Some(6.0));
    }

    #[test]
    fn it_should_not_touch_the_store_before_a_pk_exists() {
        let (store, singers) = setup();
        let singer = singers.new_instance().expect("instance");
        assert_eq!(singer.string("name").expect("field").get().expect("get"), None);
        assert!(singer.set("labels").expect("field").members().expect("members").is_empty());
        assert_eq!(store.command_count(), 0);
    }
}
