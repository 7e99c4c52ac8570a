use crate::database::Model;
use crate::field::{ListField, ReadOp, Reply, ScalarField, SetField, SortedSetField};
use crate::model::{FieldDef, FieldKind, PkKind};
use crate::storage::Store;
use crate::{keys, AppError};
use log::debug;
use std::sync::Mutex;

struct PkState {
    pk: Option<String>,
    /// Set once this handle has seen its identifier in the class collection.
    registered: bool,
    /// Set when this handle added the identifier to the collection itself.
    registered_here: bool,
    deleted: bool,
}

/// One model instance: an identifier, assigned lazily, plus one read cache per field.
pub struct Instance {
    model: Model,
    state: Mutex<PkState>,
    caches: Vec<Mutex<Option<(ReadOp, Reply)>>>,
}

impl Clone for Instance {
    /// Same identifier, empty caches.
    fn clone(&self) -> Self {
        let (pk, registered, deleted) = match self.state.lock() {
            Ok(s) => (s.pk.clone(), s.registered, s.deleted),
            Err(poisoned) => {
                let s = poisoned.into_inner();
                (s.pk.clone(), s.registered, s.deleted)
            }
        };
        let mut copy = Self::build(self.model.clone(), pk, registered);
        if let Ok(state) = copy.state.get_mut() {
            state.deleted = deleted;
        }
        copy
    }
}

impl Instance {
    fn build(model: Model, pk: Option<String>, registered: bool) -> Self {
        let caches = model.def().fields().iter().map(|_| Mutex::new(None)).collect();
        Instance { model, state: Mutex::new(PkState { pk, registered, registered_here: false, deleted: false }), caches }
    }

    pub(crate) fn fresh(model: Model, pk: Option<String>) -> Self {
        Self::build(model, pk, false)
    }

    pub(crate) fn existing(model: Model, pk: String) -> Self {
        Self::build(model, Some(pk), true)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.model.store()
    }

    /// The identifier, `None` until the first write of an auto-incremented instance.
    pub fn pk(&self) -> Result<Option<String>, AppError> {
        Ok(self.state.lock()?.pk.clone())
    }

    pub(crate) fn registered_here(&self) -> Result<bool, AppError> {
        Ok(self.state.lock()?.registered_here)
    }

    /// The identifier to write under, allocating it when needed. Does not register it.
    pub(crate) fn pk_for_write(&self) -> Result<String, AppError> {
        let mut state = self.state.lock()?;
        if state.deleted {
            return Err(AppError::DoesNotExist {
                model: self.model.def().name().to_string(),
                pk: state.pk.clone().unwrap_or_default(),
            });
        }
        match &state.pk {
            Some(pk) => Ok(pk.clone()),
            None => match self.model.def().pk_kind() {
                PkKind::Auto => {
                    let pk = self.model.registry().allocate()?;
                    debug!("Allocated {} pk {}", self.model.class(), pk);
                    state.pk = Some(pk.clone());
                    Ok(pk)
                }
                PkKind::Custom => Err(AppError::Implementation(format!("{} has no primary key set", self.model.def().name()))),
            },
        }
    }

    /// Adds the identifier to the class collection once. A caller-supplied identifier that is
    /// already registered by someone else is a uniqueness conflict.
    pub(crate) fn ensure_registered(&self) -> Result<(), AppError> {
        let pk = self.pk_for_write()?;
        let mut state = self.state.lock()?;
        if state.registered {
            return Ok(());
        }
        if !self.model.registry().register(&pk)? && *self.model.def().pk_kind() == PkKind::Custom {
            return Err(AppError::Uniqueness(format!("A {} with pk {} already exists", self.model.def().name(), pk)));
        }
        state.registered = true;
        state.registered_here = true;
        Ok(())
    }

    pub(crate) fn cache(&self, index: usize) -> &Mutex<Option<(ReadOp, Reply)>> {
        &self.caches[index]
    }

    fn field(&self, name: &str, accepts: impl Fn(FieldKind) -> bool) -> Result<(usize, &FieldDef), AppError> {
        let def = self.model.def();
        let index = def
            .field_index(name)
            .ok_or_else(|| AppError::Implementation(format!("{} has no field {}", def.name(), name)))?;
        let field = &def.fields()[index];
        if !accepts(field.kind) {
            return Err(AppError::Implementation(format!("Field {} of {} is a {:?} field", name, def.name(), field.kind)));
        }
        Ok((index, field))
    }

    /// Either a string or a hash field.
    pub fn scalar(&self, name: &str) -> Result<ScalarField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k.is_simple())?;
        Ok(ScalarField::new(self, index, def))
    }

    pub fn string(&self, name: &str) -> Result<ScalarField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k == FieldKind::String)?;
        Ok(ScalarField::new(self, index, def))
    }

    pub fn hash(&self, name: &str) -> Result<ScalarField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k == FieldKind::Hash)?;
        Ok(ScalarField::new(self, index, def))
    }

    pub fn set(&self, name: &str) -> Result<SetField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k == FieldKind::Set)?;
        Ok(SetField::new(self, index, def))
    }

    pub fn list(&self, name: &str) -> Result<ListField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k == FieldKind::List)?;
        Ok(ListField::new(self, index, def))
    }

    pub fn sorted_set(&self, name: &str) -> Result<SortedSetField<'_>, AppError> {
        let (index, def) = self.field(name, |k| k == FieldKind::SortedSet)?;
        Ok(SortedSetField::new(self, index, def))
    }

    /// Removes every index entry, field key and the collection membership of the instance.
    ///
    /// Only a handle that registered its identifier or was loaded as an existing instance owns
    /// the stored data. On any other handle, such as a fresh one whose custom pk belongs to
    /// someone else, this does nothing.
    pub fn delete(&self) -> Result<(), AppError> {
        let owned = {
            let state = self.state.lock()?;
            state.pk.clone().filter(|_| state.registered)
        };
        let Some(pk) = owned else { return Ok(()) };
        let def = self.model.def();
        let class = def.class();
        let store = self.store();
        for field in def.indexable_fields() {
            let current = match field.kind {
                FieldKind::Hash => store.hget(&keys::hash_key(class, &pk), &field.name)?,
                _ => store.get(&keys::instance_key(class, &pk, &field.name))?,
            };
            if let Some(value) = current {
                self.model.indexes().deindex(field, &pk, &value)?;
            }
        }
        let mut doomed: Vec<String> = def
            .fields()
            .iter()
            .filter(|f| f.kind != FieldKind::Hash)
            .map(|f| keys::instance_key(class, &pk, &f.name))
            .collect();
        doomed.push(keys::hash_key(class, &pk));
        let doomed_refs: Vec<&str> = doomed.iter().map(String::as_str).collect();
        store.delete(&doomed_refs)?;
        self.model.registry().unregister(&pk)?;
        for cache in &self.caches {
            *cache.lock()? = None;
        }
        let mut state = self.state.lock()?;
        state.registered = false;
        state.deleted = true;
        debug!("Deleted {} {}", class, pk);
        Ok(())
    }
}
