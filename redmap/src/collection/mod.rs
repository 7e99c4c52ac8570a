//! Lazy queries over the identifiers of one model.
//!
//! Configuration consumes the collection and hands back a new, unevaluated one, so an evaluated
//! result is never reused for a different query. Nothing touches the store until a terminal
//! operation such as [`Collection::len`], [`Collection::iter`] or [`Collection::get`] runs.

mod plan;
pub mod projection;

pub use projection::{Dicts, Flat, Ids, Instances, Projection, Tuples, ValueRow};

use crate::database::Model;
use crate::query::{Filter, Sort, Window};
use crate::value::FieldValue;
use crate::AppError;
use log::debug;
use once_cell::unsync::OnceCell;
use std::collections::BTreeSet;
use std::ops::RangeBounds;

pub struct Collection<P: Projection = Ids> {
    model: Model,
    filters: Vec<Filter>,
    sort: Option<Sort>,
    window: Window,
    projection: P,
    result: OnceCell<Vec<P::Item>>,
}

impl Collection<Ids> {
    pub(crate) fn new(model: Model) -> Self {
        Collection { model, filters: Vec::new(), sort: None, window: Window::default(), projection: Ids, result: OnceCell::new() }
    }
}

impl<P: Projection> Collection<P> {
    fn project<Q: Projection>(self, projection: Q) -> Collection<Q> {
        Collection { model: self.model, filters: self.filters, sort: self.sort, window: self.window, projection, result: OnceCell::new() }
    }

    fn reconfigured(mut self) -> Self {
        self.result = OnceCell::new();
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn is_evaluated(&self) -> bool {
        self.result.get().is_some()
    }

    /// Adds an equality filter. `pk` (or the custom pk name) filters on the identifier; any other
    /// field must be indexable.
    pub fn filter(mut self, field: &str, value: impl Into<FieldValue>) -> Result<Self, AppError> {
        let def = self.model.def();
        let value = value.into().into_string();
        let filter = if def.is_pk(field) {
            Filter::Pk(value)
        } else {
            let index = def
                .field_index(field)
                .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", def.name(), field)))?;
            if !def.fields()[index].indexable {
                return Err(AppError::InvalidQuery(format!("Field {} of {} is not indexable", field, def.name())));
            }
            Filter::Field { index, value }
        };
        self.filters.push(filter);
        Ok(self.reconfigured())
    }

    /// Keeps only the given identifiers, on top of every other filter.
    pub fn intersect<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(|id| id.into().into_string()).collect();
        self.filters.push(Filter::Ids(ids));
        self.reconfigured()
    }

    pub fn sort(mut self, mut sort: Sort) -> Result<Self, AppError> {
        let def = self.model.def();
        if sort.field.as_deref().is_some_and(|name| def.is_pk(name)) {
            sort.field = None;
        } else if let Some(name) = sort.field.as_deref() {
            let field = def
                .field(name)
                .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", def.name(), name)))?;
            if !field.kind.is_simple() {
                return Err(AppError::InvalidQuery(format!("Cannot sort {} by {}, a {:?} field", def.name(), name, field.kind)));
            }
        }
        self.sort = Some(sort);
        Ok(self.reconfigured())
    }

    /// Restricts the result to `range`, relative to any slice already applied.
    pub fn slice(mut self, range: impl RangeBounds<usize>) -> Self {
        self.window = self.window.narrow(range);
        self.reconfigured()
    }

    pub fn ids(self) -> Collection<Ids> {
        self.project(Ids)
    }

    /// Instance handles, each identifier checked against the class collection first.
    pub fn instances(self) -> Collection<Instances> {
        self.project(Instances::default())
    }

    /// Dictionaries of the named fields; no names means `pk` and every simple field.
    pub fn values(self, fields: &[&str]) -> Result<Collection<Dicts>, AppError> {
        let columns = projection::resolve_columns(self.model.def(), fields)?;
        Ok(self.project(Dicts { columns }))
    }

    pub fn values_list(self, fields: &[&str]) -> Result<Collection<Tuples>, AppError> {
        let columns = projection::resolve_columns(self.model.def(), fields)?;
        Ok(self.project(Tuples { columns }))
    }

    pub fn values_list_flat(self, fields: &[&str]) -> Result<Collection<Flat>, AppError> {
        if fields.len() != 1 {
            return Err(AppError::InvalidQuery(format!("Flat values need exactly one field, got {}", fields.len())));
        }
        let columns = projection::resolve_columns(self.model.def(), fields)?;
        Ok(self.project(Flat { columns }))
    }

    fn evaluate(&self, window: Window) -> Result<Vec<P::Item>, AppError> {
        debug!(
            "Evaluating {} collection with {} filters, sort {:?}, window {:?}",
            self.model.class(),
            self.filters.len(),
            self.sort,
            window
        );
        let candidates = plan::resolve(&self.model, &self.filters)?;
        let opts = plan::sort_options(&self.model, self.sort.as_ref(), window, self.projection.columns())?;
        let rows = plan::fetch_rows(&self.model, candidates, &opts)?;
        if self.projection.verify_existence() {
            let registry = self.model.registry();
            for row in &rows {
                if !registry.exists(&row.id)? {
                    return Err(AppError::DoesNotExist { model: self.model.def().name().to_string(), pk: row.id.clone() });
                }
            }
        }
        Ok(rows.into_iter().map(|row| self.projection.build(&self.model, row)).collect())
    }

    fn items(&self) -> Result<&Vec<P::Item>, AppError> {
        self.result.get_or_try_init(|| self.evaluate(self.window))
    }

    pub fn len(&self) -> Result<usize, AppError> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.items()?.is_empty())
    }

    pub fn iter(&self) -> Result<std::slice::Iter<'_, P::Item>, AppError> {
        Ok(self.items()?.iter())
    }

    pub fn into_vec(self) -> Result<Vec<P::Item>, AppError> {
        self.items()?;
        Ok(self.result.into_inner().unwrap_or_default())
    }

    /// The item at `index`. Before evaluation only that one item is fetched and nothing is cached.
    pub fn get(&self, index: usize) -> Result<Option<P::Item>, AppError> {
        match self.result.get() {
            Some(items) => Ok(items.get(index).cloned()),
            None => {
                let window = self.window.narrow(index..index.saturating_add(1));
                Ok(self.evaluate(window)?.into_iter().next())
            }
        }
    }

    pub fn first(&self) -> Result<Option<P::Item>, AppError> {
        self.get(0)
    }
}

impl Collection<Instances> {
    /// Builds instance handles without checking each identifier, trusting the filters.
    pub fn skip_exist_test(self) -> Self {
        self.project(Instances { skip_exist_test: true })
    }
}

impl<P: Projection> Clone for Collection<P> {
    /// Same query, not evaluated.
    fn clone(&self) -> Self {
        Collection {
            model: self.model.clone(),
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            window: self.window,
            projection: self.projection.clone(),
            result: OnceCell::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::model::{FieldDef, ModelDef};
    use crate::storage::{MemoryStore, Store};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, Model) {
        let store = Arc::new(MemoryStore::new());
        let db = Database::new(store.clone());
        let boats = db
            .register(
                ModelDef::builder("Boat")
                    .field(FieldDef::string("name").unique())
                    .field(FieldDef::string("power").indexable())
                    .field(FieldDef::string("length"))
                    .field(FieldDef::list("crew"))
                    .build()
                    .expect("valid model"),
            )
            .expect("register");
        for (name, power, length) in [("Pen Duick", "sail", 15.1), ("Smolt", "sail", 13.6), ("Rainbow", "motor", 17.45), ("Queen", "sail", 40.0)] {
            boats.create([("name", name.into()), ("power", power.into()), ("length", length.into())]).expect("create");
        }
        (store, boats)
    }

    #[test]
    fn it_should_not_touch_the_store_while_configuring() {
        let (store, boats) = setup();
        let before = store.command_count();
        let query = boats.collection().filter("power", "sail").expect("filter").sort(Sort::by("-length")).expect("sort").slice(1..);
        let query = query.values(&["name"]).expect("values");
        assert_eq!(store.command_count(), before);
        assert!(!query.is_evaluated());
        assert_eq!(query.len().expect("len"), 2);
        assert!(query.is_evaluated());
        let after = store.command_count();
        query.len().expect("cached");
        assert_eq!(store.command_count(), after);
    }

    #[test]
    fn it_should_reject_invalid_configuration() {
        let (_, boats) = setup();
        assert!(matches!(boats.collection().filter("length", 15.1), Err(AppError::InvalidQuery(_))));
        assert!(matches!(boats.collection().filter("colour", "red"), Err(AppError::InvalidQuery(_))));
        assert!(matches!(boats.collection().sort(Sort::by("crew")), Err(AppError::InvalidQuery(_))));
        assert!(matches!(boats.collection().values_list_flat(&["name", "power"]), Err(AppError::InvalidQuery(_))));
        assert!(matches!(boats.collection().values_list_flat(&[]), Err(AppError::InvalidQuery(_))));
    }

    #[test]
    fn it_should_fetch_a_single_item_without_caching() {
        let (_, boats) = setup();
        let query = boats.collection().sort(Sort::by("length")).expect("sort");
        assert_eq!(query.get(2).expect("get"), Some("3".to_string()));
        assert!(!query.is_evaluated());
        assert_eq!(query.get(9).expect("get"), None);
        assert_eq!(query.first().expect("first"), Some("2".to_string()));
        assert_eq!(query.into_vec().expect("vec"), vec!["2", "1", "3", "4"]);
    }

    #[test]
    fn it_should_sort_by_pk_name() {
        let (_, boats) = setup();
        let ids = boats.collection().sort(Sort::by("-pk")).expect("sort").into_vec().expect("vec");
        assert_eq!(ids, vec!["4", "3", "2", "1"]);
    }
}
