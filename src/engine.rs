use tracing::{debug, warn};

use crate::compile::{compile, CompiledStatement, StatementKind};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::row::{marshal, FromRow, ResultSet};
use crate::schema::ColumnSet;
use crate::value::{FromValue, Value};

/// What a backend returns for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(ResultSet),
    Affected {
        rows: u64,
        last_insert_id: Option<i64>,
    },
    Scalar(Value),
}

impl Outcome {
    fn kind(&self) -> StatementKind {
        match self {
            Outcome::Rows(_) => StatementKind::Rows,
            Outcome::Affected { .. } => StatementKind::Affected,
            Outcome::Scalar(_) => StatementKind::Scalar,
        }
    }

    pub fn into_rows(self) -> Result<ResultSet> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(shape_mismatch(StatementKind::Rows, &other)),
        }
    }

    pub fn into_scalar(self) -> Result<Value> {
        match self {
            Outcome::Scalar(value) => Ok(value),
            other => Err(shape_mismatch(StatementKind::Scalar, &other)),
        }
    }

    pub fn rows_affected(&self) -> Result<u64> {
        match self {
            Outcome::Affected { rows, .. } => Ok(*rows),
            other => Err(shape_mismatch(StatementKind::Affected, other)),
        }
    }
}

fn shape_mismatch(expected: StatementKind, got: &Outcome) -> Error {
    Error::Marshal(format!(
        "expected {expected:?} result, statement produced {:?}",
        got.kind()
    ))
}

/// A storage backend: one logical connection plus its transaction
/// primitives.
pub trait Backend: Sized {
    type Config;

    fn open(config: &Self::Config) -> Result<Self>;

    /// Create or migrate storage for a record definition.
    fn apply_schema(&mut self, columns: &ColumnSet) -> Result<()>;

    fn run(&mut self, statement: &CompiledStatement) -> Result<Outcome>;

    /// Fails with `TransactionState` if a transaction is already open.
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// Progress of one executor call, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Compiling,
    Executing,
    Marshaling,
    Done,
    Failed,
}

struct Call {
    phase: Phase,
}

impl Call {
    fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    fn enter(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "query phase");
        self.phase = next;
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!(phase = ?self.phase, error = %err, "query failed");
        self.phase = Phase::Failed;
        err
    }
}

/// Anything statements can be run on.
pub trait Executor {
    /// Run an already compiled statement.
    fn execute_statement(&mut self, statement: &CompiledStatement) -> Result<Outcome>;

    /// Compile and run `query`, returning the raw outcome.
    fn execute(&mut self, query: &Query) -> Result<Outcome>
    where
        Self: Sized,
    {
        call(self, query, Ok)
    }

    fn fetch_all<T: FromRow>(&mut self, query: &Query) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        call(self, query, |outcome| outcome.into_rows()?.marshal())
    }

    /// The first row, or `None` when nothing matches.
    fn fetch_optional<T: FromRow>(&mut self, query: &Query) -> Result<Option<T>>
    where
        Self: Sized,
    {
        call(self, query, |outcome| {
            outcome
                .into_rows()?
                .rows()
                .first()
                .map(marshal::<T>)
                .transpose()
        })
    }

    /// The first row; no rows is an execution error.
    fn fetch_one<T: FromRow>(&mut self, query: &Query) -> Result<T>
    where
        Self: Sized,
    {
        self.fetch_optional(query)?
            .ok_or_else(|| Error::Execution("query returned no rows".into()))
    }

    fn fetch_scalar<T: FromValue>(&mut self, query: &Query) -> Result<T>
    where
        Self: Sized,
    {
        call(self, query, |outcome| T::from_value(outcome.into_scalar()?))
    }

    /// Rows touched by an insert, update or delete.
    fn execute_write(&mut self, query: &Query) -> Result<u64>
    where
        Self: Sized,
    {
        call(self, query, |outcome| outcome.rows_affected())
    }

    /// Run an insert and return the id the backend assigned, if any.
    fn insert(&mut self, query: &Query) -> Result<Option<i64>>
    where
        Self: Sized,
    {
        call(self, query, |outcome| match outcome {
            Outcome::Affected { last_insert_id, .. } => Ok(last_insert_id),
            other => Err(shape_mismatch(StatementKind::Affected, &other)),
        })
    }
}

fn call<E, T, F>(executor: &mut E, query: &Query, finish: F) -> Result<T>
where
    E: Executor,
    F: FnOnce(Outcome) -> Result<T>,
{
    let mut state = Call::new();

    state.enter(Phase::Compiling);
    let statement = compile(query).map_err(|err| state.fail(err))?;

    state.enter(Phase::Executing);
    debug!(sql = statement.text(), args = statement.args().len(), "executing statement");
    let outcome = executor
        .execute_statement(&statement)
        .map_err(|err| state.fail(err))?;

    state.enter(Phase::Marshaling);
    let value = finish(outcome).map_err(|err| state.fail(err))?;

    state.enter(Phase::Done);
    Ok(value)
}

impl<B: Backend> Executor for B {
    fn execute_statement(&mut self, statement: &CompiledStatement) -> Result<Outcome> {
        self.run(statement)
    }
}

/// A transactional handle borrowed from a backend for the duration of
/// [`run_in_transaction`].
///
/// If it is dropped without finishing (a panic inside the closure), the
/// transaction is rolled back.
pub struct Transaction<'b, B: Backend> {
    backend: &'b mut B,
    finished: bool,
}

impl<B: Backend> Transaction<'_, B> {
    /// Always fails: transactions do not nest.
    pub fn run_in_transaction<T, F>(&mut self, _f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, B>) -> Result<T>,
    {
        Err(Error::TransactionState(
            "a transaction is already open on this handle".into(),
        ))
    }

    fn commit(mut self) -> Result<()> {
        self.backend.commit()?;
        self.finished = true;
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(mut self) {
        self.finished = true;
        match self.backend.rollback() {
            Ok(()) => debug!("transaction rolled back"),
            Err(err) => warn!(error = %err, "rollback failed"),
        }
    }
}

impl<B: Backend> Executor for Transaction<'_, B> {
    fn execute_statement(&mut self, statement: &CompiledStatement) -> Result<Outcome> {
        self.backend.run(statement)
    }
}

impl<B: Backend> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("transaction dropped without finishing; rolling back");
            if let Err(err) = self.backend.rollback() {
                warn!(error = %err, "rollback failed");
            }
        }
    }
}

/// Run `f` inside a transaction on `backend`.
///
/// `Ok` commits; `Err` rolls back before the error is returned, so no write
/// made inside `f` is visible afterwards. A failed commit is rolled back too.
pub fn run_in_transaction<B, T, F>(backend: &mut B, f: F) -> Result<T>
where
    B: Backend,
    F: FnOnce(&mut Transaction<'_, B>) -> Result<T>,
{
    backend.begin()?;
    debug!("transaction started");
    let mut tx = Transaction {
        backend,
        finished: false,
    };
    match f(&mut tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "transaction failed; rolling back");
            tx.rollback();
            Err(err)
        }
    }
}
