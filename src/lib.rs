//! Typed query building, compilation and execution over SQLite for the
//! Runar ecosystem.
//!
//! # Intention
//!
//! - Describe records once, validate them, and build filters and queries
//!   against the validated columns.
//! - Compile query intents into parameterized statements whose placeholders
//!   and arguments always line up.
//! - Execute statements through an explicitly passed backend handle, with
//!   scoped transactions and checked row marshaling.
//!
//! # Architectural Boundaries
//!
//! - `schema`, `predicate`, `query` and `compile` are pure and backend
//!   agnostic.
//! - `engine` talks to storage only through the [`Backend`] trait.
//! - Only `sqlite` (and the error conversion in `error`) knows about
//!   `rusqlite`.

pub mod compile;
pub mod engine;
pub mod error;
pub mod predicate;
pub mod query;
pub mod row;
pub mod schema;
pub mod sqlite;
pub mod value;

pub use compile::{compile, CompiledStatement, StatementKind};
pub use engine::{run_in_transaction, Backend, Executor, Outcome, Transaction};
pub use error::{Error, Result};
pub use predicate::{AggregateFn, CompareOp, Expr, Filter, Predicate};
pub use query::{Direction, Join, JoinKind, Projection, Query, QueryKind};
pub use row::{FromRow, Record, ResultSet, Row};
pub use schema::{
    describe, ColumnConstraint, ColumnRef, ColumnSet, DataType, DefaultValue, FieldDefinition,
    RecordDefinition,
};
pub use sqlite::{Service, SqliteBackend, SqliteConfig, SqliteService};
pub use value::{FromValue, Value};
