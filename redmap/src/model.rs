use crate::value::FieldValue;
use crate::{keys, AppError};
use std::collections::HashSet;

/// Data structure backing a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Own string key `{class}:{id}:{field}`.
    String,
    /// Entry `field` of the instance hash `{class}:{id}`.
    Hash,
    Set,
    List,
    SortedSet,
}

impl FieldKind {
    /// Single scalar values, projectable in value queries and eligible for indexing.
    pub fn is_simple(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Hash)
    }
}

/// Immutable description of one field of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub indexable: bool,
    pub unique: bool,
    pub default: Option<FieldValue>,
}

impl FieldDef {
    fn of(name: &str, kind: FieldKind) -> Self {
        FieldDef { name: name.to_string(), kind, indexable: false, unique: false, default: None }
    }

    pub fn string(name: &str) -> Self {
        Self::of(name, FieldKind::String)
    }

    pub fn hash(name: &str) -> Self {
        Self::of(name, FieldKind::Hash)
    }

    pub fn set(name: &str) -> Self {
        Self::of(name, FieldKind::Set)
    }

    pub fn list(name: &str) -> Self {
        Self::of(name, FieldKind::List)
    }

    pub fn sorted_set(name: &str) -> Self {
        Self::of(name, FieldKind::SortedSet)
    }

    pub fn indexable(mut self) -> Self {
        self.indexable = true;
        self
    }

    /// Unique fields are indexable too.
    pub fn unique(mut self) -> Self {
        self.indexable = true;
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkKind {
    /// Allocated from the `{class}:max_pk` counter on first write.
    Auto,
    /// Supplied by the caller.
    Custom,
}

/// A model class: its key prefix, primary key and ordered fields.
#[derive(Debug, Clone)]
pub struct ModelDef {
    name: String,
    namespace: String,
    class: String,
    pk_name: String,
    pk_kind: PkKind,
    fields: Vec<FieldDef>,
}

impl ModelDef {
    pub fn builder(name: &str) -> ModelDefBuilder {
        ModelDefBuilder { name: name.to_string(), namespace: String::new(), pk_name: "pk".to_string(), pk_kind: PkKind::Auto, fields: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix of every key of the model.
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn pk_name(&self) -> &str {
        &self.pk_name
    }

    pub fn pk_kind(&self) -> &PkKind {
        &self.pk_kind
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_pk(&self, name: &str) -> bool {
        name == "pk" || name == self.pk_name
    }

    pub fn simple_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.kind.is_simple())
    }

    pub fn indexable_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.indexable)
    }
}

pub struct ModelDefBuilder {
    name: String,
    namespace: String,
    pk_name: String,
    pk_kind: PkKind,
    fields: Vec<FieldDef>,
}

impl ModelDefBuilder {
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Identifiers are supplied by the caller and exposed under `name` as well as `pk`.
    pub fn custom_pk(mut self, name: &str) -> Self {
        self.pk_name = name.to_string();
        self.pk_kind = PkKind::Custom;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<ModelDef, AppError> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(AppError::Implementation(format!("Invalid model name {:?}", self.name)));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.name.contains(':') {
                return Err(AppError::Implementation(format!("Invalid field name {:?} on {}", field.name, self.name)));
            }
            if field.name == "pk" || field.name == self.pk_name {
                return Err(AppError::Implementation(format!("Field {} of {} clashes with the primary key", field.name, self.name)));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(AppError::Implementation(format!("Field {} declared twice on {}", field.name, self.name)));
            }
            if field.indexable && !field.kind.is_simple() {
                return Err(AppError::Implementation(format!("Field {} of {} is {:?} and cannot be indexed", field.name, self.name, field.kind)));
            }
            if field.default.is_some() && !field.kind.is_simple() {
                return Err(AppError::Implementation(format!("Field {} of {} is {:?} and cannot have a default", field.name, self.name, field.kind)));
            }
        }
        let class = keys::class_name(&self.namespace, &self.name);
        Ok(ModelDef { name: self.name, namespace: self.namespace, class, pk_name: self.pk_name, pk_kind: self.pk_kind, fields: self.fields })
    }
}
