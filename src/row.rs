use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::RecordDefinition;
use crate::value::{FromValue, Value};

/// One result row. Cells are addressable by position or column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).cloned().ok_or_else(|| {
            Error::Marshal(format!(
                "column index {index} out of range for row of {}",
                self.values.len()
            ))
        })?;
        T::from_value(value).map_err(|err| self.annotate(index, err))
    }

    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::Marshal(format!("no column `{name}` in result row")))?;
        self.get(index)
    }

    fn annotate(&self, index: usize, err: Error) -> Error {
        match err {
            Error::Marshal(msg) => {
                let column = self.columns.get(index).map_or("?", String::as_str);
                Error::Marshal(format!("column `{column}`: {msg}"))
            }
            other => other,
        }
    }
}

/// A statically declared row shape.
///
/// `COLUMNS` lists the storage names the shape expects, in order. Rows with
/// a different number of columns are rejected before `from_row` is called.
pub trait FromRow: Sized {
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row) -> Result<Self>;
}

/// A full record: a row shape that also knows its definition and how to
/// turn itself back into column values.
pub trait Record: FromRow {
    fn definition() -> RecordDefinition;

    /// `(storage name, value)` for every field.
    fn values(&self) -> Vec<(&'static str, Value)>;
}

pub(crate) fn marshal<T: FromRow>(row: &Row) -> Result<T> {
    if row.len() != T::COLUMNS.len() {
        return Err(Error::Marshal(format!(
            "row has {} columns, shape expects {} ({})",
            row.len(),
            T::COLUMNS.len(),
            T::COLUMNS.join(", ")
        )));
    }
    T::from_row(row)
}

/// Rows returned by a select, sharing one column header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns: Arc<[String]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Marshal every row into `T`, failing on the first mismatch.
    pub fn marshal<T: FromRow>(&self) -> Result<Vec<T>> {
        self.rows.iter().map(marshal::<T>).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NameEmail {
        name: String,
        email: String,
    }

    impl FromRow for NameEmail {
        const COLUMNS: &'static [&'static str] = &["name", "email"];

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                name: row.get_named("name")?,
                email: row.get(1)?,
            })
        }
    }

    fn result_set() -> ResultSet {
        ResultSet::new(
            vec!["name".into(), "email".into()],
            vec![vec!["John".into(), "john@x.com".into()]],
        )
    }

    #[test]
    fn marshals_by_name_and_position() {
        let rows = result_set().marshal::<NameEmail>().unwrap();
        assert_eq!(rows[0].name, "John");
        assert_eq!(rows[0].email, "john@x.com");
    }

    #[test]
    fn column_count_mismatch_is_rejected() {
        let set = ResultSet::new(
            vec!["name".into()],
            vec![vec!["John".into()]],
        );
        assert!(matches!(set.marshal::<NameEmail>(), Err(Error::Marshal(_))));
    }

    #[test]
    fn type_mismatch_names_the_column() {
        let set = ResultSet::new(
            vec!["name".into(), "email".into()],
            vec![vec![Value::Integer(1), "john@x.com".into()]],
        );
        match set.marshal::<NameEmail>() {
            Err(Error::Marshal(msg)) => assert!(msg.contains("`name`"), "{msg}"),
            other => panic!("expected marshal error, got {:?}", other.map(|r| r.len())),
        }
    }
}
