use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::lock::Mutex;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compile::{quote_ident, CompiledStatement, StatementKind};
use crate::engine::{run_in_transaction, Backend, Executor, Outcome, Transaction};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::row::{FromRow, ResultSet};
use crate::schema::{describe, ColumnSet, DataType, DefaultValue, FieldDefinition, RecordDefinition};
use crate::value::{FromValue, Value};

const IN_MEMORY: &str = ":memory:";

/// SQLite Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Record definitions migrated on start
    pub schema: Vec<RecordDefinition>,
    /// Enforce foreign key constraints
    pub foreign_keys: bool,
    /// How long to wait on a locked database before failing
    pub busy_timeout_ms: Option<u64>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: IN_MEMORY.to_string(),
            schema: Vec::new(),
            foreign_keys: true,
            busy_timeout_ms: None,
        }
    }
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<String>, schema: Vec<RecordDefinition>) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            ..Self::default()
        }
    }

    pub fn in_memory(schema: Vec<RecordDefinition>) -> Self {
        Self::new(IN_MEMORY, schema)
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Boolean(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(
            String::from_utf8(bytes.to_vec())
                .map_err(|err| Error::Marshal(format!("text column is not utf-8: {err}")))?,
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

fn is_insert(text: &str) -> bool {
    text.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

/// A single SQLite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    fn existing_columns(&self, table: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    fn query_rows(&self, statement: &CompiledStatement) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(statement.text())?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(statement.args().iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| value_from_ref(row.get_ref(i)?))
                .collect::<Result<Vec<_>>>()?;
            out.push(values);
        }
        Ok(ResultSet::new(columns, out))
    }

    fn query_scalar(&self, statement: &CompiledStatement) -> Result<Value> {
        let mut stmt = self.conn.prepare(statement.text())?;
        if stmt.column_count() != 1 {
            return Err(Error::Marshal(format!(
                "scalar statement returns {} columns",
                stmt.column_count()
            )));
        }
        let mut rows = stmt.query(params_from_iter(statement.args().iter()))?;
        match rows.next()? {
            Some(row) => value_from_ref(row.get_ref(0)?),
            None => Ok(Value::Null),
        }
    }
}

impl Backend for SqliteBackend {
    type Config = SqliteConfig;

    fn open(config: &SqliteConfig) -> Result<Self> {
        let connection_error =
            |err: rusqlite::Error| Error::Connection(format!("{}: {err}", config.db_path));

        let conn = if config.db_path == IN_MEMORY {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.db_path)
        }
        .map_err(connection_error)?;

        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(connection_error)?;
        }
        let pragma = if config.foreign_keys {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        conn.execute_batch(pragma).map_err(connection_error)?;

        info!(path = %config.db_path, "opened sqlite database");
        Ok(Self { conn })
    }

    fn apply_schema(&mut self, columns: &ColumnSet) -> Result<()> {
        let schema_error = |err: Error| Error::Schema(format!("{}: {err}", columns.table()));
        let table = quote_ident(columns.table());
        let existing = self.existing_columns(columns.table()).map_err(schema_error)?;

        if existing.is_empty() {
            let definitions = columns
                .columns()
                .iter()
                .map(|field| column_sql(field, true))
                .collect::<Vec<_>>()
                .join(", ");
            info!(table = columns.table(), "creating table");
            self.conn
                .execute_batch(&format!("CREATE TABLE {table} ({definitions})"))
                .map_err(|err| schema_error(err.into()))?;
            return Ok(());
        }

        for field in columns
            .columns()
            .iter()
            .filter(|field| !existing.contains(&field.storage_name))
        {
            info!(table = columns.table(), column = %field.storage_name, "adding column");
            self.conn
                .execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {}",
                    column_sql(field, false)
                ))
                .map_err(|err| schema_error(err.into()))?;
            if field.is_unique() {
                let index = quote_ident(&format!("idx_{}_{}", columns.table(), field.storage_name));
                self.conn
                    .execute_batch(&format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} ({})",
                        quote_ident(&field.storage_name)
                    ))
                    .map_err(|err| schema_error(err.into()))?;
            }
        }
        Ok(())
    }

    fn run(&mut self, statement: &CompiledStatement) -> Result<Outcome> {
        match statement.kind() {
            StatementKind::Rows => self.query_rows(statement).map(Outcome::Rows),
            StatementKind::Scalar => self.query_scalar(statement).map(Outcome::Scalar),
            StatementKind::Affected => {
                let rows = self
                    .conn
                    .execute(statement.text(), params_from_iter(statement.args().iter()))?;
                let last_insert_id = (rows > 0 && is_insert(statement.text()))
                    .then(|| self.conn.last_insert_rowid());
                Ok(Outcome::Affected {
                    rows: rows as u64,
                    last_insert_id,
                })
            }
        }
    }

    fn begin(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Err(Error::TransactionState(
                "a transaction is already open on this connection".into(),
            ));
        }
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Column DDL. `inline_keys` is false for `ALTER TABLE ADD COLUMN`, which
/// cannot declare primary keys or unique constraints.
fn column_sql(field: &FieldDefinition, inline_keys: bool) -> String {
    let name = quote_ident(&field.storage_name);
    let data_type = match (field.data_type, field.max_size()) {
        (DataType::Integer, _) => "INTEGER".to_string(),
        (DataType::Real, _) => "REAL".to_string(),
        (DataType::Text, Some(size)) => format!("VARCHAR({size})"),
        (DataType::Text, None) => "TEXT".to_string(),
        (DataType::Blob, _) => "BLOB".to_string(),
        (DataType::Boolean, _) => "BOOLEAN".to_string(),
    };

    let mut sql = format!("{name} {data_type}");
    if inline_keys && field.is_primary_key() {
        sql.push_str(" PRIMARY KEY");
    }
    if field.is_not_null() {
        sql.push_str(" NOT NULL");
    }
    if inline_keys && field.is_unique() {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &field.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(default));
    }
    if let (DataType::Text, Some(size)) = (field.data_type, field.max_size()) {
        sql.push_str(&format!(" CHECK (length({name}) <= {size})"));
    }
    sql
}

fn default_sql(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Integer(v) => v.to_string(),
        DefaultValue::Real(v) => v.to_string(),
        DefaultValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        DefaultValue::Boolean(v) => i64::from(*v).to_string(),
        DefaultValue::Null => "NULL".to_string(),
        DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
    }
}

/// Lifecycle of a long-running service.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Owns one SQLite connection and serializes every caller over it.
pub struct SqliteService {
    config: SqliteConfig,
    tables: Vec<ColumnSet>,
    connection: Mutex<Option<SqliteBackend>>,
}

impl SqliteService {
    /// Create a new SQLite service with the given config. Record definitions
    /// are validated here, before anything is opened.
    pub fn new(config: SqliteConfig) -> Result<Self> {
        let tables = config
            .schema
            .iter()
            .map(describe)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            tables,
            connection: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &str {
        &self.config.db_path
    }

    /// Column metadata for a table declared in the config.
    pub fn table(&self, name: &str) -> Option<&ColumnSet> {
        self.tables.iter().find(|set| set.table() == name)
    }

    /// Run `f` with exclusive access to the connection.
    pub async fn with_connection<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut SqliteBackend) -> Result<T>,
    {
        let mut guard = self.connection.lock().await;
        let backend = guard
            .as_mut()
            .ok_or_else(|| anyhow!("sqlite service at {} is not started", self.path()))?;
        Ok(f(backend)?)
    }

    pub async fn fetch_all<T: FromRow>(&self, query: &Query) -> anyhow::Result<Vec<T>> {
        self.with_connection(|db| db.fetch_all(query)).await
    }

    pub async fn fetch_optional<T: FromRow>(&self, query: &Query) -> anyhow::Result<Option<T>> {
        self.with_connection(|db| db.fetch_optional(query)).await
    }

    pub async fn fetch_scalar<T: FromValue>(&self, query: &Query) -> anyhow::Result<T> {
        self.with_connection(|db| db.fetch_scalar(query)).await
    }

    pub async fn execute_write(&self, query: &Query) -> anyhow::Result<u64> {
        self.with_connection(|db| db.execute_write(query)).await
    }

    pub async fn insert(&self, query: &Query) -> anyhow::Result<Option<i64>> {
        self.with_connection(|db| db.insert(query)).await
    }

    pub async fn transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Transaction<'_, SqliteBackend>) -> Result<T>,
    {
        self.with_connection(|db| run_in_transaction(db, f)).await
    }
}

#[async_trait]
impl Service for SqliteService {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!(path = self.path(), "starting sqlite service");
        let mut backend = SqliteBackend::open(&self.config)
            .with_context(|| format!("failed to open sqlite database at {}", self.path()))?;
        for table in &self.tables {
            backend
                .apply_schema(table)
                .with_context(|| format!("failed to migrate table {}", table.table()))?;
        }
        *self.connection.lock().await = Some(backend);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if self.connection.lock().await.take().is_some() {
            debug!(path = self.path(), "closed sqlite connection");
        }
        info!(path = self.path(), "sqlite service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_sql_renders_constraints() {
        let field = FieldDefinition::new("name", DataType::Text)
            .size(100)
            .not_null()
            .default_value(DefaultValue::Text("it's".into()));
        assert_eq!(
            column_sql(&field, true),
            "\"name\" VARCHAR(100) NOT NULL DEFAULT 'it''s' CHECK (length(\"name\") <= 100)"
        );

        let email = FieldDefinition::new("email", DataType::Text).unique();
        assert_eq!(column_sql(&email, true), "\"email\" TEXT UNIQUE");
        assert_eq!(column_sql(&email, false), "\"email\" TEXT");

        let id = FieldDefinition::new("id", DataType::Integer).primary_key();
        assert_eq!(column_sql(&id, true), "\"id\" INTEGER PRIMARY KEY");
    }

    #[test]
    fn inserts_are_detected_case_insensitively() {
        assert!(is_insert("  insert into t default values"));
        assert!(is_insert("INSERT INTO t DEFAULT VALUES"));
        assert!(!is_insert("UPDATE t SET a = 1"));
        assert!(!is_insert("ins"));
    }

    #[test]
    fn config_defaults_to_memory() {
        let config = SqliteConfig::default();
        assert_eq!(config.db_path, ":memory:");
        assert!(config.foreign_keys);
        let config = SqliteConfig::in_memory(Vec::new()).with_busy_timeout(Duration::from_secs(2));
        assert_eq!(config.busy_timeout_ms, Some(2000));
    }
}
