use crate::collection::{Collection, Ids, Instances};
use crate::index::IndexManager;
use crate::instance::Instance;
use crate::model::{ModelDef, PkKind};
use crate::registry::IdRegistry;
use crate::settings::{RedmapSettings, DEFAULT_TEMP_KEY_PREFIX};
use crate::storage::{open_store, Store};
use crate::value::FieldValue;
use crate::AppError;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) struct Context {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) temp_key_prefix: String,
}

/// Entry point: a store plus the models registered against it.
pub struct Database {
    ctx: Arc<Context>,
    models: Mutex<HashMap<String, Model>>,
}

impl Database {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_temp_key_prefix(store, DEFAULT_TEMP_KEY_PREFIX)
    }

    pub fn with_temp_key_prefix(store: Arc<dyn Store>, temp_key_prefix: &str) -> Self {
        Database {
            ctx: Arc::new(Context { store, temp_key_prefix: temp_key_prefix.to_string() }),
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &RedmapSettings) -> Result<Self, AppError> {
        let store = open_store(&settings.store)?;
        Ok(Self::with_temp_key_prefix(store, &settings.collection.temp_key_prefix))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    /// Registers a model; a second model with the same namespace and name is rejected.
    pub fn register(&self, def: ModelDef) -> Result<Model, AppError> {
        let mut models = self.models.lock()?;
        if models.contains_key(def.class()) {
            return Err(AppError::Implementation(format!(
                "A model named {} already exists in namespace {:?}",
                def.name(),
                def.namespace()
            )));
        }
        let model = Model { def: Arc::new(def), ctx: self.ctx.clone() };
        models.insert(model.class().to_string(), model.clone());
        debug!("Registered model {}", model.class());
        Ok(model)
    }

    /// Looks a model up by its class prefix, e.g. `boat` or `sea:boat`.
    pub fn model(&self, class: &str) -> Result<Option<Model>, AppError> {
        Ok(self.models.lock()?.get(class).cloned())
    }
}

/// Cheap handle to a registered model.
#[derive(Clone)]
pub struct Model {
    def: Arc<ModelDef>,
    ctx: Arc<Context>,
}

impl Model {
    pub fn def(&self) -> &ModelDef {
        &self.def
    }

    pub fn class(&self) -> &str {
        self.def.class()
    }

    pub fn store(&self) -> &dyn Store {
        self.ctx.store.as_ref()
    }

    pub(crate) fn temp_key_prefix(&self) -> &str {
        &self.ctx.temp_key_prefix
    }

    pub(crate) fn registry(&self) -> IdRegistry<'_> {
        IdRegistry::new(self.store(), self.class())
    }

    pub(crate) fn indexes(&self) -> IndexManager<'_> {
        IndexManager::new(self.store(), self.class())
    }

    /// Instance whose identifier is allocated on its first write.
    pub fn new_instance(&self) -> Result<Instance, AppError> {
        match self.def.pk_kind() {
            PkKind::Auto => Ok(Instance::fresh(self.clone(), None)),
            PkKind::Custom => Err(AppError::Implementation(format!("{} needs a primary key, use new_instance_with_pk", self.def.name()))),
        }
    }

    /// Instance with a caller-supplied identifier, registered on its first write.
    pub fn new_instance_with_pk(&self, pk: impl Into<FieldValue>) -> Result<Instance, AppError> {
        match self.def.pk_kind() {
            PkKind::Custom => Ok(Instance::fresh(self.clone(), Some(pk.into().into_string()))),
            PkKind::Auto => Err(AppError::Implementation(format!("{} has an auto-incremented primary key", self.def.name()))),
        }
    }

    /// Creates and registers an instance, writing the given simple fields and the defaults of the
    /// others. A failed write deletes what was written and returns the error.
    pub fn create<'a, I>(&self, values: I) -> Result<Instance, AppError>
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        let mut given: HashMap<&str, FieldValue> = HashMap::new();
        let mut pk = None;
        for (name, value) in values {
            if self.def.is_pk(name) {
                pk = Some(value);
                continue;
            }
            match self.def.field(name) {
                None => return Err(AppError::Implementation(format!("{} has no field {}", self.def.name(), name))),
                Some(f) if !f.kind.is_simple() => {
                    return Err(AppError::Implementation(format!("Field {} of {} cannot be set on create", name, self.def.name())))
                }
                Some(_) => {
                    given.insert(name, value);
                }
            }
        }
        let instance = match (self.def.pk_kind(), pk) {
            (PkKind::Custom, Some(pk)) => self.new_instance_with_pk(pk)?,
            (PkKind::Custom, None) => return Err(AppError::Implementation(format!("{} needs a value for {}", self.def.name(), self.def.pk_name()))),
            (PkKind::Auto, Some(_)) => return Err(AppError::Implementation(format!("{} has an auto-incremented primary key", self.def.name()))),
            (PkKind::Auto, None) => self.new_instance()?,
        };
        if let Err(e) = self.populate(&instance, given) {
            if instance.registered_here()? {
                if let Err(cleanup) = instance.delete() {
                    warn!("Failed to delete partially created {} {:?}: {}", self.class(), instance.pk(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(instance)
    }

    fn populate(&self, instance: &Instance, mut given: HashMap<&str, FieldValue>) -> Result<(), AppError> {
        for field in self.def.simple_fields() {
            let value = given.remove(field.name.as_str()).or_else(|| field.default.clone());
            if let Some(value) = value {
                instance.scalar(&field.name)?.set(value)?;
            }
        }
        instance.ensure_registered()
    }

    /// Instance for a registered identifier.
    pub fn get(&self, pk: impl Into<FieldValue>) -> Result<Instance, AppError> {
        let pk = pk.into().into_string();
        if self.registry().exists(&pk)? {
            Ok(Instance::existing(self.clone(), pk))
        } else {
            Err(AppError::DoesNotExist { model: self.def.name().to_string(), pk })
        }
    }

    /// Instance owning `value` of an indexable field, when exactly one living instance does.
    pub fn get_by(&self, field: &str, value: impl Into<FieldValue>) -> Result<Instance, AppError> {
        let value = value.into();
        let def = self
            .def
            .field(field)
            .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", self.def.name(), field)))?;
        let ids = self.indexes().lookup(def, value.as_str())?;
        let mut found = None;
        for id in ids {
            if self.registry().exists(&id)? {
                if found.is_some() {
                    return Err(AppError::InvalidQuery(format!("More than one {} with {}={}", self.def.name(), field, value)));
                }
                found = Some(id);
            }
        }
        match found {
            Some(pk) => Ok(Instance::existing(self.clone(), pk)),
            None => Err(AppError::DoesNotExist { model: self.def.name().to_string(), pk: format!("{}={}", field, value) }),
        }
    }

    pub fn exists(&self, pk: impl Into<FieldValue>) -> Result<bool, AppError> {
        self.registry().exists(pk.into().as_str())
    }

    /// Whether a living instance holds `value` in the indexable field.
    pub fn exists_by(&self, field: &str, value: impl Into<FieldValue>) -> Result<bool, AppError> {
        let def = self
            .def
            .field(field)
            .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", self.def.name(), field)))?;
        self.indexes().resolves_to_living(def, value.into().as_str())
    }

    /// Lazy query over every instance of the model. Building it touches no store.
    pub fn collection(&self) -> Collection<Ids> {
        Collection::new(self.clone())
    }

    pub fn instances(&self) -> Collection<Instances> {
        self.collection().instances()
    }
}
