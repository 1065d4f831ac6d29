use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::predicate::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
    /// Maximum length for text columns.
    Size(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Null,
    CurrentTimestamp,
}

/// One field of a record: its Rust-side name, the name it is stored under,
/// its type and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub storage_name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl FieldDefinition {
    /// Create a field stored under its own name
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            storage_name: name.clone(),
            name,
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }

    pub fn stored_as(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    pub fn primary_key(self) -> Self {
        self.constraint(ColumnConstraint::PrimaryKey)
    }

    pub fn unique(self) -> Self {
        self.constraint(ColumnConstraint::Unique)
    }

    pub fn not_null(self) -> Self {
        self.constraint(ColumnConstraint::NotNull)
    }

    pub fn size(self, size: u32) -> Self {
        self.constraint(ColumnConstraint::Size(size))
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::PrimaryKey)
    }

    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::Unique)
    }

    pub fn is_not_null(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::NotNull)
    }

    pub fn max_size(&self) -> Option<u32> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::Size(n) => Some(*n),
            _ => None,
        })
    }
}

/// Ordered set of fields stored in one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDefinition {
    pub table: String,
    pub fields: Vec<FieldDefinition>,
}

impl RecordDefinition {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }
}

/// Validate a record definition and produce its column metadata.
///
/// Storage names and field names must each be unique, a field name may not
/// be another field's storage name, and at most one field may be the primary
/// key.
pub fn describe(definition: &RecordDefinition) -> Result<ColumnSet> {
    if definition.table.trim().is_empty() {
        return Err(Error::Schema("record definition has no table name".into()));
    }
    if definition.fields.is_empty() {
        return Err(Error::Schema(format!(
            "record definition `{}` has no fields",
            definition.table
        )));
    }

    let mut storage_names = HashSet::new();
    let mut field_names = HashSet::new();
    for field in &definition.fields {
        if field.storage_name.trim().is_empty() {
            return Err(Error::Schema(format!(
                "field `{}` of `{}` has an empty storage name",
                field.name, definition.table
            )));
        }
        if !storage_names.insert(field.storage_name.as_str()) {
            return Err(Error::Schema(format!(
                "duplicate storage name `{}` in `{}`",
                field.storage_name, definition.table
            )));
        }
        if !field_names.insert(field.name.as_str()) {
            return Err(Error::Schema(format!(
                "duplicate field name `{}` in `{}`",
                field.name, definition.table
            )));
        }
    }

    for field in &definition.fields {
        let shadows = definition
            .fields
            .iter()
            .any(|other| other.storage_name == field.name && other.name != field.name);
        if shadows {
            return Err(Error::Schema(format!(
                "field name `{}` of `{}` is another field's storage name",
                field.name, definition.table
            )));
        }
    }

    let primary_keys = definition
        .fields
        .iter()
        .filter(|f| f.is_primary_key())
        .count();
    if primary_keys > 1 {
        return Err(Error::Schema(format!(
            "`{}` declares {primary_keys} primary keys",
            definition.table
        )));
    }

    Ok(ColumnSet {
        table: Arc::from(definition.table.as_str()),
        columns: definition.fields.clone().into(),
    })
}

/// Validated, immutable column metadata for one record definition.
///
/// Cloning is cheap; queries hold their own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSet {
    table: Arc<str>,
    columns: Arc<[FieldDefinition]>,
}

impl ColumnSet {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[FieldDefinition] {
        &self.columns
    }

    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.columns.iter().find(|c| c.is_primary_key())
    }

    /// Look a column up by storage name, falling back to field name
    pub fn find(&self, name: &str) -> Option<&FieldDefinition> {
        self.columns
            .iter()
            .find(|c| c.storage_name == name)
            .or_else(|| self.columns.iter().find(|c| c.name == name))
    }

    /// Resolve `name` to a column reference, or fail with `InvalidColumn`.
    pub fn column(&self, name: &str) -> Result<ColumnRef> {
        self.find(name)
            .map(|c| ColumnRef::new(&self.table, &c.storage_name))
            .ok_or_else(|| Error::invalid_column(&self.table, name))
    }

    /// References to every column, in definition order.
    pub fn all_columns(&self) -> Vec<ColumnRef> {
        self.columns
            .iter()
            .map(|c| ColumnRef::new(&self.table, &c.storage_name))
            .collect()
    }

    /// Start building predicates validated against this definition.
    pub fn filter(&self) -> Filter<'_> {
        Filter::new(self)
    }
}

/// A validated, table-qualified column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    table: Arc<str>,
    column: Arc<str>,
}

impl ColumnRef {
    fn new(table: &Arc<str>, column: &str) -> Self {
        Self {
            table: Arc::clone(table),
            column: Arc::from(column),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> RecordDefinition {
        RecordDefinition::new("users")
            .field(FieldDefinition::new("id", DataType::Integer).primary_key())
            .field(FieldDefinition::new("name", DataType::Text).size(100))
            .field(FieldDefinition::new("email", DataType::Text).unique())
            .field(FieldDefinition::new("isAdmin", DataType::Boolean).stored_as("is_admin"))
    }

    #[test]
    fn describe_keeps_field_order() {
        let set = describe(&users()).unwrap();
        let names: Vec<_> = set.columns().iter().map(|c| c.storage_name.as_str()).collect();
        assert_eq!(names, ["id", "name", "email", "is_admin"]);
        assert_eq!(set.primary_key().unwrap().storage_name, "id");
        assert_eq!(set.find("name").unwrap().max_size(), Some(100));
    }

    #[test]
    fn duplicate_storage_names_are_rejected() {
        let def = users().field(FieldDefinition::new("mail", DataType::Text).stored_as("email"));
        assert!(matches!(describe(&def), Err(Error::Schema(_))));
    }

    #[test]
    fn field_name_shadowing_a_storage_name_is_rejected() {
        let def = RecordDefinition::new("people")
            .field(FieldDefinition::new("id", DataType::Integer).primary_key())
            .field(FieldDefinition::new("email", DataType::Text).stored_as("mail"))
            .field(FieldDefinition::new("contact", DataType::Text).stored_as("email"));
        assert!(matches!(describe(&def), Err(Error::Schema(_))));

        let swapped = RecordDefinition::new("people")
            .field(FieldDefinition::new("a", DataType::Text).stored_as("b"))
            .field(FieldDefinition::new("b", DataType::Text).stored_as("a"));
        assert!(matches!(describe(&swapped), Err(Error::Schema(_))));
    }

    #[test]
    fn second_primary_key_is_rejected() {
        let def = users().field(FieldDefinition::new("other", DataType::Integer).primary_key());
        assert!(matches!(describe(&def), Err(Error::Schema(_))));
    }

    #[test]
    fn empty_definition_is_rejected() {
        assert!(matches!(
            describe(&RecordDefinition::new("empty")),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn columns_resolve_by_field_or_storage_name() {
        let set = describe(&users()).unwrap();
        assert_eq!(set.column("isAdmin").unwrap().column(), "is_admin");
        assert_eq!(set.column("is_admin").unwrap().column(), "is_admin");
        match set.column("role") {
            Err(Error::InvalidColumn { table, column }) => {
                assert_eq!(table, "users");
                assert_eq!(column, "role");
            }
            other => panic!("expected InvalidColumn, got {other:?}"),
        }
    }
}
