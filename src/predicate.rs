use crate::error::{Error, Result};
use crate::query::Query;
use crate::schema::{ColumnRef, ColumnSet};
use crate::value::Value;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// Raw statement text with its own `?` placeholders and arguments.
///
/// Verbatim text is never checked against a record definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Verbatim {
    pub sql: String,
    pub args: Vec<Value>,
}

/// A value-producing expression usable in projections, ordering and
/// comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// `column: None` means `*` and is only valid for `COUNT`.
    Aggregate {
        func: AggregateFn,
        column: Option<ColumnRef>,
    },
    Verbatim(Verbatim),
}

impl Expr {
    pub fn count_all() -> Self {
        Expr::Aggregate {
            func: AggregateFn::Count,
            column: None,
        }
    }

    pub fn aggregate(func: AggregateFn, column: ColumnRef) -> Self {
        Expr::Aggregate {
            func,
            column: Some(column),
        }
    }

    /// Opt out of column validation and splice `sql` into the statement as-is.
    pub fn verbatim_unchecked(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Expr::Verbatim(Verbatim {
            sql: sql.into(),
            args,
        })
    }
}

impl From<ColumnRef> for Expr {
    fn from(column: ColumnRef) -> Self {
        Expr::Column(column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `left op value`. Comparing with `Value::Null` under `Eq`/`Ne` becomes
    /// `IS NULL`/`IS NOT NULL`.
    Compare {
        left: Expr,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: ColumnRef,
        pattern: String,
    },
    /// An empty value list matches no rows.
    In {
        column: ColumnRef,
        values: Vec<Value>,
    },
    /// `column IN (subquery)`; the subquery must project one column.
    InSubquery {
        column: ColumnRef,
        query: Box<Query>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Verbatim(Verbatim),
}

impl Predicate {
    pub fn compare(left: impl Into<Expr>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            left: left.into(),
            op,
            value: value.into(),
        }
    }

    /// `self AND other`, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = match self {
            Predicate::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Predicate::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Predicate::And(parts)
    }

    /// `self OR other`, flattening nested disjunctions.
    pub fn or(self, other: Predicate) -> Self {
        let mut parts = match self {
            Predicate::Or(parts) => parts,
            single => vec![single],
        };
        match other {
            Predicate::Or(more) => parts.extend(more),
            single => parts.push(single),
        }
        Predicate::Or(parts)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Conjunction of every predicate; matches everything when empty.
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        parts
            .into_iter()
            .fold(Predicate::And(Vec::new()), Predicate::and)
    }

    /// Disjunction of every predicate; matches nothing when empty.
    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        parts
            .into_iter()
            .fold(Predicate::Or(Vec::new()), Predicate::or)
    }

    /// Opt out of column validation and splice `sql` into the statement as-is.
    pub fn verbatim_unchecked(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Predicate::Verbatim(Verbatim {
            sql: sql.into(),
            args,
        })
    }
}

/// Builds predicates whose columns are checked against a target definition
/// and, optionally, joined definitions.
///
/// Bare names resolve against the target; `table.column` resolves against
/// whichever definition in scope owns `table`.
#[derive(Debug, Clone)]
pub struct Filter<'a> {
    target: &'a ColumnSet,
    joined: Vec<&'a ColumnSet>,
}

impl<'a> Filter<'a> {
    pub fn new(target: &'a ColumnSet) -> Self {
        Self {
            target,
            joined: Vec::new(),
        }
    }

    /// Bring a joined definition into scope for qualified names.
    pub fn with(mut self, joined: &'a ColumnSet) -> Self {
        self.joined.push(joined);
        self
    }

    pub fn column(&self, name: &str) -> Result<ColumnRef> {
        match name.split_once('.') {
            Some((table, column)) => std::iter::once(self.target)
                .chain(self.joined.iter().copied())
                .find(|set| set.table() == table)
                .ok_or_else(|| Error::invalid_column(table, column))?
                .column(column),
            None => self.target.column(name),
        }
    }

    pub fn eq(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Eq, value)
    }

    pub fn ne(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Ne, value)
    }

    pub fn gt(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Gt, value)
    }

    pub fn gte(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Gte, value)
    }

    pub fn lt(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Lt, value)
    }

    pub fn lte(&self, column: &str, value: impl Into<Value>) -> Result<Predicate> {
        self.compare(column, CompareOp::Lte, value)
    }

    pub fn compare(
        &self,
        column: &str,
        op: CompareOp,
        value: impl Into<Value>,
    ) -> Result<Predicate> {
        Ok(Predicate::compare(self.column(column)?, op, value))
    }

    pub fn like(&self, column: &str, pattern: impl Into<String>) -> Result<Predicate> {
        Ok(Predicate::Like {
            column: self.column(column)?,
            pattern: pattern.into(),
        })
    }

    pub fn is_in<I, V>(&self, column: &str, values: I) -> Result<Predicate>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Ok(Predicate::In {
            column: self.column(column)?,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn subquery_in(&self, column: &str, query: Query) -> Result<Predicate> {
        Ok(Predicate::InSubquery {
            column: self.column(column)?,
            query: Box::new(query),
        })
    }

    /// An aggregate over a validated column, for projections and `HAVING`.
    pub fn aggregate(&self, func: AggregateFn, column: &str) -> Result<Expr> {
        Ok(Expr::aggregate(func, self.column(column)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{describe, DataType, FieldDefinition, RecordDefinition};

    fn sets() -> (ColumnSet, ColumnSet) {
        let users = describe(
            &RecordDefinition::new("users")
                .field(FieldDefinition::new("id", DataType::Integer).primary_key())
                .field(FieldDefinition::new("name", DataType::Text)),
        )
        .unwrap();
        let profiles = describe(
            &RecordDefinition::new("profiles")
                .field(FieldDefinition::new("user_id", DataType::Integer))
                .field(FieldDefinition::new("age", DataType::Integer)),
        )
        .unwrap();
        (users, profiles)
    }

    #[test]
    fn unknown_columns_fail_at_build_time() {
        let (users, _) = sets();
        let err = users.filter().eq("role", "admin").unwrap_err();
        assert!(matches!(err, Error::InvalidColumn { .. }));
    }

    #[test]
    fn qualified_names_need_the_table_in_scope() {
        let (users, profiles) = sets();
        assert!(users.filter().gte("profiles.age", 18).is_err());
        let pred = users.filter().with(&profiles).gte("profiles.age", 18).unwrap();
        match pred {
            Predicate::Compare {
                left: Expr::Column(column),
                ..
            } => assert_eq!(column.table(), "profiles"),
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn and_or_flatten() {
        let (users, _) = sets();
        let f = users.filter();
        let a = f.eq("id", 1).unwrap();
        let b = f.eq("id", 2).unwrap();
        let c = f.eq("id", 3).unwrap();

        let left = a.clone().and(b.clone()).and(c.clone());
        let right = a.clone().and(b.clone().and(c.clone()));
        assert_eq!(left, right);
        assert!(matches!(&left, Predicate::And(parts) if parts.len() == 3));

        let any = Predicate::any([a, b, c]);
        assert!(matches!(&any, Predicate::Or(parts) if parts.len() == 3));
    }

    #[test]
    fn not_wraps_a_single_child() {
        let (users, _) = sets();
        let pred = users.filter().eq("name", "John").unwrap().not();
        assert!(matches!(pred, Predicate::Not(inner) if matches!(*inner, Predicate::Compare { .. })));
    }
}
