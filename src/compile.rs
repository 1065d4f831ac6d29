use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::predicate::{AggregateFn, CompareOp, Expr, Predicate, Verbatim};
use crate::query::{Direction, JoinKind, Query, QueryKind};
use crate::schema::ColumnRef;
use crate::value::Value;

/// What executing a statement yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Rows,
    Affected,
    Scalar,
}

impl From<QueryKind> for StatementKind {
    fn from(kind: QueryKind) -> Self {
        match kind {
            QueryKind::Select => StatementKind::Rows,
            QueryKind::Count | QueryKind::Aggregate => StatementKind::Scalar,
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => StatementKind::Affected,
        }
    }
}

/// Backend-ready statement text plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    text: String,
    args: Vec<Value>,
    kind: StatementKind,
}

impl CompiledStatement {
    /// Wrap hand-written statement text. Bare `?` placeholders are numbered
    /// in order and must match `args` one to one. Nothing is validated
    /// against a record definition.
    pub fn raw_unchecked(
        text: impl Into<String>,
        args: Vec<Value>,
        kind: StatementKind,
    ) -> Result<Self> {
        let mut writer = Writer::default();
        writer.verbatim(&Verbatim {
            sql: text.into(),
            args,
        })?;
        Ok(writer.finish(kind))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }
}

/// Compile a query intent. Pure; safe to call from any thread.
pub fn compile(query: &Query) -> Result<CompiledStatement> {
    let mut writer = Writer::default();
    writer.query(query)?;
    Ok(writer.finish(query.kind.into()))
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single left-to-right pass: each literal is bound the moment its `?N`
/// placeholder is written, so numbers ascend in text order.
#[derive(Default)]
struct Writer {
    sql: String,
    args: Vec<Value>,
}

/// Tables a statement may reference: its target plus its joins.
struct Scope<'q> {
    tables: Vec<&'q str>,
}

impl Scope<'_> {
    fn check(&self, column: &ColumnRef) -> Result<()> {
        if self.tables.contains(&column.table()) {
            Ok(())
        } else {
            Err(Error::Compile(format!(
                "column `{column}` references a table that is not part of the query"
            )))
        }
    }
}

impl Writer {
    fn finish(self, kind: StatementKind) -> CompiledStatement {
        CompiledStatement {
            text: self.sql,
            args: self.args,
            kind,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: Value) {
        self.args.push(value);
        // writing to a String cannot fail
        let _ = write!(self.sql, "?{}", self.args.len());
    }

    fn query(&mut self, query: &Query) -> Result<()> {
        let target = query.require_target()?;
        let mut scope = Scope {
            tables: vec![target.table()],
        };
        match query.kind {
            QueryKind::Select => self.select(query, &mut scope),
            QueryKind::Count => {
                if !query.projection.is_empty() {
                    return Err(Error::Compile("count takes no projection".into()));
                }
                if !query.group_by.is_empty() {
                    return Err(Error::Compile(
                        "count cannot be grouped; use a grouped select".into(),
                    ));
                }
                self.push("SELECT COUNT(*)");
                self.from_and_where(query, &mut scope)?;
                self.tail(query, &scope)
            }
            QueryKind::Aggregate => {
                if query.projection.len() != 1 {
                    return Err(Error::Compile(format!(
                        "aggregate needs exactly one projection, got {}",
                        query.projection.len()
                    )));
                }
                if !query.group_by.is_empty() {
                    return Err(Error::Compile(
                        "aggregate cannot be grouped; use a grouped select".into(),
                    ));
                }
                self.select(query, &mut scope)
            }
            QueryKind::Insert => self.insert(query, &scope),
            QueryKind::Update => self.update(query, &scope),
            QueryKind::Delete => {
                no_select_clauses(query, "delete")?;
                self.push("DELETE FROM ");
                self.push(&quote_ident(target.table()));
                self.where_clause(query, &scope)
            }
        }
    }

    fn select<'q>(&mut self, query: &'q Query, scope: &mut Scope<'q>) -> Result<()> {
        if query.projection.is_empty() {
            return Err(Error::Compile("select has an empty projection list".into()));
        }
        // joins widen the scope before any column is rendered
        scope
            .tables
            .extend(query.joins.iter().map(|join| join.table.table()));

        self.push("SELECT ");
        for (i, projection) in query.projection.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&projection.expr, scope)?;
            if let Some(alias) = &projection.alias {
                self.push(" AS ");
                self.push(&quote_ident(alias));
            }
        }
        self.from_and_where(query, scope)?;

        if !query.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, column) in query.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.column(column, scope)?;
            }
        }
        if let Some(having) = &query.having {
            if query.group_by.is_empty() {
                return Err(Error::Compile("HAVING requires GROUP BY".into()));
            }
            self.push(" HAVING ");
            self.predicate(having, scope)?;
        }
        self.tail(query, scope)
    }

    fn from_and_where<'q>(&mut self, query: &'q Query, scope: &mut Scope<'q>) -> Result<()> {
        let target = query.require_target()?;
        self.push(" FROM ");
        self.push(&quote_ident(target.table()));
        for join in &query.joins {
            let table = join.table.table();
            if !scope.tables.contains(&table) {
                scope.tables.push(table);
            }
            self.push(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            self.push(&quote_ident(table));
            self.push(" ON ");
            self.column(&join.left, scope)?;
            self.push(" = ");
            self.column(&join.right, scope)?;
        }
        self.where_clause(query, scope)
    }

    fn where_clause(&mut self, query: &Query, scope: &Scope<'_>) -> Result<()> {
        if let Some(filter) = &query.filter {
            if has_aggregate(filter) {
                return Err(Error::Compile(
                    "aggregates are not allowed in WHERE; use HAVING".into(),
                ));
            }
            self.push(" WHERE ");
            self.predicate(filter, scope)?;
        }
        Ok(())
    }

    /// `ORDER BY`, `LIMIT` and `OFFSET`.
    fn tail(&mut self, query: &Query, scope: &Scope<'_>) -> Result<()> {
        if query.having.is_some() && query.kind != QueryKind::Select {
            return Err(Error::Compile("HAVING requires a grouped select".into()));
        }
        if !query.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, order) in query.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&order.expr, scope)?;
                self.push(match order.direction {
                    Direction::Asc => " ASC",
                    Direction::Desc => " DESC",
                });
            }
        }
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(self.sql, " LIMIT {limit} OFFSET {offset}");
            }
            (Some(limit), None) => {
                let _ = write!(self.sql, " LIMIT {limit}");
            }
            (None, Some(offset)) => {
                let _ = write!(self.sql, " LIMIT -1 OFFSET {offset}");
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn insert(&mut self, query: &Query, scope: &Scope<'_>) -> Result<()> {
        no_select_clauses(query, "insert")?;
        if query.filter.is_some() {
            return Err(Error::Compile("insert takes no filter".into()));
        }
        check_assignments(query, scope)?;
        let target = query.require_target()?;

        self.push("INSERT INTO ");
        self.push(&quote_ident(target.table()));
        if query.assignments.is_empty() {
            self.push(" DEFAULT VALUES");
            return Ok(());
        }
        let columns = query
            .assignments
            .iter()
            .map(|(column, _)| quote_ident(column.column()))
            .collect::<Vec<_>>()
            .join(", ");
        self.push(" (");
        self.push(&columns);
        self.push(") VALUES (");
        for (i, (_, value)) in query.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value.clone());
        }
        self.push(")");
        Ok(())
    }

    fn update(&mut self, query: &Query, scope: &Scope<'_>) -> Result<()> {
        no_select_clauses(query, "update")?;
        if query.assignments.is_empty() {
            return Err(Error::Compile("update has no assignments".into()));
        }
        check_assignments(query, scope)?;
        let target = query.require_target()?;

        self.push("UPDATE ");
        self.push(&quote_ident(target.table()));
        self.push(" SET ");
        for (i, (column, value)) in query.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push(&quote_ident(column.column()));
            self.push(" = ");
            self.bind(value.clone());
        }
        self.where_clause(query, scope)
    }

    fn column(&mut self, column: &ColumnRef, scope: &Scope<'_>) -> Result<()> {
        scope.check(column)?;
        self.push(&quote_ident(column.table()));
        self.push(".");
        self.push(&quote_ident(column.column()));
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<()> {
        match expr {
            Expr::Column(column) => self.column(column, scope),
            Expr::Aggregate { func, column } => {
                self.push(func.as_sql());
                self.push("(");
                match (func, column) {
                    (_, Some(column)) => self.column(column, scope)?,
                    (AggregateFn::Count, None) => self.push("*"),
                    (func, None) => {
                        return Err(Error::Compile(format!(
                            "{} needs a column",
                            func.as_sql()
                        )))
                    }
                }
                self.push(")");
                Ok(())
            }
            Expr::Verbatim(verbatim) => self.verbatim(verbatim),
        }
    }

    fn predicate(&mut self, predicate: &Predicate, scope: &Scope<'_>) -> Result<()> {
        match predicate {
            Predicate::Compare { left, op, value } => {
                self.expr(left, scope)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => self.push(" IS NULL"),
                    (CompareOp::Ne, Value::Null) => self.push(" IS NOT NULL"),
                    (op, value) => {
                        self.push(" ");
                        self.push(op.as_sql());
                        self.push(" ");
                        self.bind(value.clone());
                    }
                }
                Ok(())
            }
            Predicate::Like { column, pattern } => {
                self.column(column, scope)?;
                self.push(" LIKE ");
                self.bind(Value::Text(pattern.clone()));
                Ok(())
            }
            Predicate::In { column, values } => {
                scope.check(column)?;
                if values.is_empty() {
                    self.push("1 = 0");
                    return Ok(());
                }
                self.column(column, scope)?;
                self.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value.clone());
                }
                self.push(")");
                Ok(())
            }
            Predicate::InSubquery { column, query } => {
                if query.kind != QueryKind::Select || query.projection.len() != 1 {
                    return Err(Error::Compile(
                        "subquery must be a select of exactly one column".into(),
                    ));
                }
                self.column(column, scope)?;
                self.push(" IN (");
                self.query(query)?;
                self.push(")");
                Ok(())
            }
            Predicate::And(parts) => self.junction(parts, " AND ", "1 = 1", scope),
            Predicate::Or(parts) => self.junction(parts, " OR ", "1 = 0", scope),
            Predicate::Not(inner) => {
                self.push("NOT (");
                self.predicate(inner, scope)?;
                self.push(")");
                Ok(())
            }
            Predicate::Verbatim(verbatim) => {
                self.push("(");
                self.verbatim(verbatim)?;
                self.push(")");
                Ok(())
            }
        }
    }

    fn junction(
        &mut self,
        parts: &[Predicate],
        separator: &str,
        empty: &str,
        scope: &Scope<'_>,
    ) -> Result<()> {
        match parts {
            [] => self.push(empty),
            [single] => self.predicate(single, scope)?,
            parts => {
                self.push("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.push(separator);
                    }
                    self.predicate(part, scope)?;
                }
                self.push(")");
            }
        }
        Ok(())
    }

    /// Splice verbatim text, numbering each bare `?` outside string
    /// literals, quoted identifiers and `--` comments.
    fn verbatim(&mut self, verbatim: &Verbatim) -> Result<()> {
        let mut args = verbatim.args.iter();
        let mut quote: Option<char> = None;
        let mut in_comment = false;
        let mut chars = verbatim.sql.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, quote) {
                (c, _) if in_comment => {
                    in_comment = c != '\n';
                    self.sql.push(c);
                }
                ('\'' | '"', None) => {
                    quote = Some(c);
                    self.sql.push(c);
                }
                (c, Some(open)) => {
                    if c == open {
                        quote = None;
                    }
                    self.sql.push(c);
                }
                ('-', None) if chars.peek() == Some(&'-') => {
                    in_comment = true;
                    self.sql.push(c);
                }
                ('?', None) => {
                    if chars.peek().is_some_and(|next| next.is_ascii_digit()) {
                        return Err(Error::Compile(format!(
                            "verbatim text must use bare `?` placeholders: {}",
                            verbatim.sql
                        )));
                    }
                    let value = args.next().ok_or_else(|| {
                        Error::Compile(format!(
                            "verbatim text has more placeholders than arguments: {}",
                            verbatim.sql
                        ))
                    })?;
                    self.bind(value.clone());
                }
                (c, None) => self.sql.push(c),
            }
        }
        if args.next().is_some() {
            return Err(Error::Compile(format!(
                "verbatim text has fewer placeholders than arguments: {}",
                verbatim.sql
            )));
        }
        Ok(())
    }
}

fn has_aggregate(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { left, .. } => matches!(left, Expr::Aggregate { .. }),
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(has_aggregate),
        Predicate::Not(inner) => has_aggregate(inner),
        _ => false,
    }
}

fn no_select_clauses(query: &Query, what: &str) -> Result<()> {
    let unsupported = [
        (!query.joins.is_empty(), "joins"),
        (!query.group_by.is_empty(), "GROUP BY"),
        (query.having.is_some(), "HAVING"),
        (!query.order_by.is_empty(), "ORDER BY"),
        (query.limit.is_some() || query.offset.is_some(), "LIMIT/OFFSET"),
        (!query.projection.is_empty(), "a projection"),
    ];
    match unsupported.iter().find(|(present, _)| *present) {
        Some((_, clause)) => Err(Error::Compile(format!("{what} does not support {clause}"))),
        None => Ok(()),
    }
}

fn check_assignments(query: &Query, scope: &Scope<'_>) -> Result<()> {
    let mut seen = HashSet::new();
    for (column, _) in &query.assignments {
        scope.check(column)?;
        if !seen.insert(column.column()) {
            return Err(Error::Compile(format!("column `{column}` assigned twice")));
        }
    }
    Ok(())
}
