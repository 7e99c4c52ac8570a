use crate::database::Model;
use crate::instance::Instance;
use crate::model::ModelDef;
use crate::AppError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Source {
    Pk,
    Field(usize),
}

/// One requested value: its display name and where it is read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) source: Source,
}

/// Validates requested names; an empty request means `pk` followed by every simple field.
pub(crate) fn resolve_columns(def: &ModelDef, fields: &[&str]) -> Result<Vec<Column>, AppError> {
    if fields.is_empty() {
        let mut columns = vec![Column { name: "pk".to_string(), source: Source::Pk }];
        for (index, field) in def.fields().iter().enumerate() {
            if field.kind.is_simple() {
                columns.push(Column { name: field.name.clone(), source: Source::Field(index) });
            }
        }
        return Ok(columns);
    }
    fields
        .iter()
        .map(|name| {
            if def.is_pk(name) {
                return Ok(Column { name: name.to_string(), source: Source::Pk });
            }
            let index = def
                .field_index(name)
                .ok_or_else(|| AppError::InvalidQuery(format!("{} has no field {}", def.name(), name)))?;
            if !def.fields()[index].kind.is_simple() {
                return Err(AppError::InvalidQuery(format!("Field {} of {} is not a simple field", name, def.name())));
            }
            Ok(Column { name: name.to_string(), source: Source::Field(index) })
        })
        .collect()
}

/// Identifier plus the values of the field columns, in column order.
#[doc(hidden)]
pub struct Row {
    pub(crate) id: String,
    pub(crate) values: Vec<Option<String>>,
}

fn assemble(columns: &[Column], row: Row) -> Vec<Option<String>> {
    let mut fetched = row.values.into_iter();
    columns
        .iter()
        .map(|c| match c.source {
            Source::Pk => Some(row.id.clone()),
            Source::Field(_) => fetched.next().flatten(),
        })
        .collect()
}

/// The shape of the items a collection yields.
pub trait Projection: Clone {
    type Item: Clone;

    /// Columns to read for each identifier.
    fn columns(&self) -> &[Column] {
        &[]
    }

    /// Whether every identifier is checked against the class collection before use.
    fn verify_existence(&self) -> bool {
        false
    }

    #[doc(hidden)]
    fn build(&self, model: &Model, row: Row) -> Self::Item;
}

/// Raw identifiers.
#[derive(Debug, Clone, Default)]
pub struct Ids;

impl Projection for Ids {
    type Item = String;

    fn build(&self, _model: &Model, row: Row) -> String {
        row.id
    }
}

/// Instance handles.
#[derive(Debug, Clone, Default)]
pub struct Instances {
    pub(crate) skip_exist_test: bool,
}

impl Projection for Instances {
    type Item = Instance;

    fn verify_existence(&self) -> bool {
        !self.skip_exist_test
    }

    fn build(&self, model: &Model, row: Row) -> Instance {
        Instance::existing(model.clone(), row.id)
    }
}

/// Named values of one instance, in the requested order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueRow(Vec<(String, Option<String>)>);

impl ValueRow {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).and_then(|(_, v)| v.as_deref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, Option<String>)> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Dicts {
    pub(crate) columns: Vec<Column>,
}

impl Projection for Dicts {
    type Item = ValueRow;

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn build(&self, _model: &Model, row: Row) -> ValueRow {
        let values = assemble(&self.columns, row);
        ValueRow(self.columns.iter().map(|c| c.name.clone()).zip(values).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Tuples {
    pub(crate) columns: Vec<Column>,
}

impl Projection for Tuples {
    type Item = Vec<Option<String>>;

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn build(&self, _model: &Model, row: Row) -> Vec<Option<String>> {
        assemble(&self.columns, row)
    }
}

/// Exactly one column, yielded as bare values.
#[derive(Debug, Clone)]
pub struct Flat {
    pub(crate) columns: Vec<Column>,
}

impl Projection for Flat {
    type Item = Option<String>;

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn build(&self, _model: &Model, row: Row) -> Option<String> {
        assemble(&self.columns, row).into_iter().next().flatten()
    }
}
