use crate::collection::projection::{Column, Row, Source};
use crate::database::Model;
use crate::model::FieldKind;
use crate::query::{Filter, Sort, Window};
use crate::storage::sort::sort_members;
use crate::storage::{SortBy, SortOptions, TempKey};
use crate::{keys, AppError};
use log::debug;
use std::collections::BTreeSet;

/// Where the filtered identifiers live once the filters are resolved.
#[derive(Debug, PartialEq)]
pub(crate) enum Candidates {
    Empty,
    /// A set already in the store: the class collection or a single index.
    Stored(String),
    /// Index sets to intersect.
    Intersection(Vec<String>),
    /// Identifiers known in-process and already validated.
    Local(BTreeSet<String>),
}

fn narrow(ids: BTreeSet<String>, local: &mut Option<BTreeSet<String>>) {
    *local = Some(match local.take() {
        None => ids,
        Some(current) => current.intersection(&ids).cloned().collect(),
    });
}

/// Resolves equality filters with one command per unique filter and at most one command to
/// validate in-process identifiers. Non-unique filters stay symbolic.
pub(crate) fn resolve(model: &Model, filters: &[Filter]) -> Result<Candidates, AppError> {
    let def = model.def();
    let class = model.class();
    let store = model.store();

    let mut local: Option<BTreeSet<String>> = None;
    let mut index_keys = Vec::new();

    for filter in filters {
        match filter {
            Filter::Pk(id) => narrow(BTreeSet::from([id.clone()]), &mut local),
            Filter::Ids(ids) => narrow(ids.clone(), &mut local),
            Filter::Field { index, value } => {
                let field = &def.fields()[*index];
                if field.unique {
                    continue;
                }
                index_keys.push(keys::index_key(class, &field.name, value));
            }
        }
    }
    if local.as_ref().is_some_and(|l| l.is_empty()) {
        return Ok(Candidates::Empty);
    }
    for filter in filters {
        if let Filter::Field { index, value } = filter {
            let field = &def.fields()[*index];
            if field.unique {
                let owner = store.get(&keys::index_key(class, &field.name, value))?;
                narrow(owner.into_iter().collect(), &mut local);
                if local.as_ref().is_some_and(|l| l.is_empty()) {
                    return Ok(Candidates::Empty);
                }
            }
        }
    }

    match local {
        Some(ids) => {
            let collection = keys::collection_key(class);
            if index_keys.is_empty() && ids.len() == 1 {
                let known = match ids.iter().next() {
                    Some(id) => store.sismember(&collection, id)?,
                    None => false,
                };
                return Ok(if known { Candidates::Local(ids) } else { Candidates::Empty });
            }
            let mut set_keys: Vec<&str> = index_keys.iter().map(String::as_str).collect();
            set_keys.push(&collection);
            let known = store.sinter(&set_keys)?;
            let valid: BTreeSet<String> = ids.intersection(&known).cloned().collect();
            Ok(if valid.is_empty() { Candidates::Empty } else { Candidates::Local(valid) })
        }
        None => Ok(match index_keys.len() {
            0 => Candidates::Stored(keys::collection_key(class)),
            1 => Candidates::Stored(index_keys.remove(0)),
            _ => Candidates::Intersection(index_keys),
        }),
    }
}

fn field_pattern(model: &Model, index: usize) -> String {
    let field = &model.def().fields()[index];
    match field.kind {
        FieldKind::Hash => keys::hash_pattern(model.class(), &field.name),
        _ => keys::field_pattern(model.class(), &field.name),
    }
}

/// Sort options for `sort`, `window` and the field columns to fetch alongside each identifier.
pub(crate) fn sort_options(model: &Model, sort: Option<&Sort>, window: Window, columns: &[Column]) -> Result<SortOptions, AppError> {
    let by = match sort {
        None => SortBy::NoSort,
        Some(Sort { field: None, .. }) => SortBy::Member,
        Some(Sort { field: Some(name), .. }) => {
            let index = model
                .def()
                .field_index(name)
                .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", model.def().name(), name)))?;
            SortBy::Pattern(field_pattern(model, index))
        }
    };
    let mut get: Vec<String> = columns
        .iter()
        .filter_map(|c| match c.source {
            Source::Field(index) => Some(field_pattern(model, index)),
            Source::Pk => None,
        })
        .collect();
    if !get.is_empty() {
        get.insert(0, keys::MEMBER_PATTERN.to_string());
    }
    Ok(SortOptions {
        by,
        limit: window.as_limit(),
        get,
        desc: sort.is_some_and(|s| s.desc),
        alpha: sort.is_some_and(|s| s.alpha),
    })
}

fn into_rows(raw: Vec<Vec<Option<String>>>) -> Vec<Row> {
    raw.into_iter()
        .filter_map(|cols| {
            let mut cols = cols.into_iter();
            let id = cols.next().flatten()?;
            Some(Row { id, values: cols.collect() })
        })
        .collect()
}

/// Orders and windows the candidates, issuing at most one command for the ordering. Candidates
/// that are not a single stored set go through a temporary key when the store has to look values
/// up; the key is gone again before this returns, on every path.
pub(crate) fn fetch_rows(model: &Model, candidates: Candidates, opts: &SortOptions) -> Result<Vec<Row>, AppError> {
    let store = model.store();
    let in_process = opts.get.is_empty() && !matches!(opts.by, SortBy::Pattern(_));
    let raw = match candidates {
        Candidates::Empty => return Ok(Vec::new()),
        Candidates::Stored(key) if in_process => sort_members(store.smembers(&key)?, opts, |_, _| Ok(None))?,
        Candidates::Stored(key) => {
            debug!("Sorting {} with {:?}", key, opts);
            store.sort(&key, opts)?
        }
        Candidates::Intersection(keys) if in_process => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            sort_members(store.sinter(&refs)?, opts, |_, _| Ok(None))?
        }
        Candidates::Intersection(keys) => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let tmp = TempKey::new(store, model.temp_key_prefix());
            let sorted = store.sinterstore(tmp.key(), &refs).and_then(|n| {
                debug!("Intersected {} ids of {:?} into {}", n, refs, tmp.key());
                if n == 0 { Ok(Vec::new()) } else { store.sort(tmp.key(), opts) }
            });
            let released = tmp.release();
            let sorted = sorted?;
            released?;
            sorted
        }
        Candidates::Local(ids) if in_process => sort_members(ids, opts, |_, _| Ok(None))?,
        Candidates::Local(ids) => {
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let tmp = TempKey::new(store, model.temp_key_prefix());
            let sorted = store.sadd(tmp.key(), &refs).and_then(|_| store.sort(tmp.key(), opts));
            let released = tmp.release();
            let sorted = sorted?;
            released?;
            sorted
        }
    };
    Ok(into_rows(raw))
}
