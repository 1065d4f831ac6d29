use crate::error::{Error, Result};
use crate::predicate::{Expr, Predicate};
use crate::row::{FromRow, Record};
use crate::schema::{ColumnRef, ColumnSet};
use crate::value::Value;

/// Operation kind; decides the shape of the execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Rows.
    Select,
    /// Scalar `COUNT(*)`.
    Count,
    /// Scalar from a single aggregate projection.
    Aggregate,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Projection {
    pub fn new(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<Expr> for Projection {
    fn from(expr: Expr) -> Self {
        Projection::new(expr)
    }
}

impl From<ColumnRef> for Projection {
    fn from(column: ColumnRef) -> Self {
        Projection::new(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Equality join of `table` on `left = right`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: ColumnSet,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

impl Join {
    pub fn inner(table: &ColumnSet, left: ColumnRef, right: ColumnRef) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.clone(),
            left,
            right,
        }
    }

    pub fn left(table: &ColumnSet, left: ColumnRef, right: ColumnRef) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.clone(),
            left,
            right,
        }
    }
}

/// Query builder for composable, immutable intents
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) kind: QueryKind,
    pub(crate) target: Option<ColumnSet>,
    pub(crate) filter: Option<Predicate>,
    pub(crate) projection: Vec<Projection>,
    pub(crate) assignments: Vec<(ColumnRef, Value)>,
    pub(crate) joins: Vec<Join>,
    pub(crate) group_by: Vec<ColumnRef>,
    pub(crate) having: Option<Predicate>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl Query {
    /// An intent with no target; [`Query::from`] must be called before
    /// compiling.
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            target: None,
            filter: None,
            projection: Vec::new(),
            assignments: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn from(mut self, target: &ColumnSet) -> Self {
        self.target = Some(target.clone());
        self
    }

    /// Every column of `target`, in definition order.
    pub fn select(target: &ColumnSet) -> Self {
        let mut query = Query::new(QueryKind::Select).from(target);
        query.projection = target.all_columns().into_iter().map(Projection::from).collect();
        query
    }

    /// The record with the lowest primary key.
    pub fn first(target: &ColumnSet) -> Self {
        let query = Query::select(target).limit(1);
        match target
            .primary_key()
            .and_then(|pk| target.column(&pk.storage_name).ok())
        {
            Some(key) => query.order_by(key, Direction::Asc),
            None => query,
        }
    }

    pub fn by_primary_key(target: &ColumnSet, key: impl Into<Value>) -> Result<Self> {
        let pk = target.primary_key().ok_or_else(|| {
            Error::Compile(format!("`{}` has no primary key", target.table()))
        })?;
        let filter = target.filter().eq(&pk.storage_name, key)?;
        Ok(Query::select(target).filter(filter).limit(1))
    }

    pub fn count(target: &ColumnSet) -> Self {
        Query::new(QueryKind::Count).from(target)
    }

    /// A single scalar aggregate such as `AVG(age)`.
    pub fn aggregate(target: &ColumnSet, expr: Expr) -> Self {
        let mut query = Query::new(QueryKind::Aggregate).from(target);
        query.projection = vec![Projection::new(expr)];
        query
    }

    pub fn insert(target: &ColumnSet) -> Self {
        Query::new(QueryKind::Insert).from(target)
    }

    /// Insert every field of `record`. A null primary key is left to the
    /// backend to assign.
    pub fn insert_record<R: Record>(target: &ColumnSet, record: &R) -> Result<Self> {
        let pk = target.primary_key().map(|pk| pk.storage_name.as_str());
        record
            .values()
            .into_iter()
            .filter(|(name, value)| {
                let is_pk = match (pk, target.find(name)) {
                    (Some(pk), Some(column)) => column.storage_name == pk,
                    _ => false,
                };
                !(is_pk && value.is_null())
            })
            .try_fold(Query::insert(target), |query, (name, value)| query.set(name, value))
    }

    pub fn update(target: &ColumnSet) -> Self {
        Query::new(QueryKind::Update).from(target)
    }

    pub fn delete(target: &ColumnSet) -> Self {
        Query::new(QueryKind::Delete).from(target)
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn target(&self) -> Option<&ColumnSet> {
        self.target.as_ref()
    }

    /// Add a condition; repeated calls are combined with `AND`.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Replace the projection list.
    pub fn project<I, P>(mut self, projection: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Projection>,
    {
        self.projection = projection.into_iter().map(Into::into).collect();
        self
    }

    /// Project exactly the columns a declared shape expects, in its order.
    pub fn project_shape<T: FromRow>(self) -> Result<Self> {
        let target = self.require_target()?.clone();
        let columns = T::COLUMNS
            .iter()
            .map(|name| target.column(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.project(columns))
    }

    /// Assign `value` to `column` for inserts and updates.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Result<Self> {
        let column = self.require_target()?.column(column)?;
        self.assignments.push((column, value.into()));
        Ok(self)
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn group_by(mut self, column: ColumnRef) -> Self {
        self.group_by.push(column);
        self
    }

    /// Add a group condition; repeated calls are combined with `AND`.
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, expr: impl Into<Expr>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            expr: expr.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn require_target(&self) -> Result<&ColumnSet> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::Compile("query has no target definition".into()))
    }
}
