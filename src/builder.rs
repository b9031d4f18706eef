use crate::dialect::{translate_terms, DialectProfile, PlaceholderStyle};
use crate::error::{DbError, Result};
use crate::marshal::ColumnMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Column name -> SQL type its text parameters are cast to.
///
/// Parameters are bound by value type, so a string aimed at a temporal column
/// needs an explicit cast on dialects with typed parameters.
pub type ColumnCasts = BTreeMap<String, String>;

/// Comparison operators for WHERE clauses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Ne => write!(f, "<>"),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Le => write!(f, "<="),
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Ge => write!(f, ">="),
            ComparisonOp::Like => write!(f, "LIKE"),
            ComparisonOp::NotLike => write!(f, "NOT LIKE"),
            ComparisonOp::In => write!(f, "IN"),
            ComparisonOp::NotIn => write!(f, "NOT IN"),
            ComparisonOp::IsNull => write!(f, "IS NULL"),
            ComparisonOp::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// WHERE condition. Values are always bound as parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Simple {
        column: String,
        op: ComparisonOp,
        value: Option<Value>,
    },
    Compound {
        conditions: Vec<Condition>,
        op: LogicalOp,
    },
    /// SQL fragment with portable `?` placeholders.
    Raw { sql: String, params: Vec<Value> },
}

impl Condition {
    fn simple(column: impl Into<String>, op: ComparisonOp, value: Option<Value>) -> Self {
        Condition::Simple {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Eq, Some(value.into()))
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Ne, Some(value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Lt, Some(value.into()))
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Le, Some(value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Gt, Some(value.into()))
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(column, ComparisonOp::Ge, Some(value.into()))
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::simple(column, ComparisonOp::Like, Some(Value::String(pattern.into())))
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::simple(column, ComparisonOp::In, Some(Value::Array(values)))
    }

    pub fn not_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::simple(column, ComparisonOp::NotIn, Some(Value::Array(values)))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::simple(column, ComparisonOp::IsNull, None)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::simple(column, ComparisonOp::IsNotNull, None)
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            params,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::And,
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::Or,
        }
    }

    /// Equality on every entry of a column map.
    pub fn matching(columns: &ColumnMap) -> Self {
        Condition::all(
            columns
                .iter()
                .map(|(k, v)| Condition::eq(k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Whether the condition leaves every row selected: an empty compound,
    /// a blank or `TRUE` raw fragment, or `NOT IN ()`.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Simple { op, value, .. } => {
                *op == ComparisonOp::NotIn
                    && matches!(value, Some(Value::Array(items)) if items.is_empty())
            }
            Condition::Compound {
                conditions,
                op: LogicalOp::And,
            } => conditions.iter().all(Condition::is_empty),
            Condition::Compound {
                conditions,
                op: LogicalOp::Or,
            } => conditions.is_empty() || conditions.iter().any(Condition::is_empty),
            Condition::Raw { sql, .. } => {
                let sql = sql.trim();
                sql.is_empty() || sql.eq_ignore_ascii_case("TRUE")
            }
        }
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::Compound {
                mut conditions,
                op: LogicalOp::And,
            } => {
                conditions.push(other);
                Condition::all(conditions)
            }
            existing => Condition::all(vec![existing, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::any(vec![self, other])
    }

    fn render(&self, binder: &mut Binder<'_>) -> std::result::Result<String, String> {
        match self {
            Condition::Simple { column, op, value } => {
                validate_column_ref(column)?;
                match (op, value) {
                    (ComparisonOp::IsNull | ComparisonOp::IsNotNull, _) => {
                        Ok(format!("{} {}", column, op))
                    }
                    (ComparisonOp::Eq, None | Some(Value::Null)) => {
                        Ok(format!("{} IS NULL", column))
                    }
                    (ComparisonOp::Ne, None | Some(Value::Null)) => {
                        Ok(format!("{} IS NOT NULL", column))
                    }
                    (ComparisonOp::In | ComparisonOp::NotIn, Some(Value::Array(items))) => {
                        if items.is_empty() {
                            // IN () is not valid SQL; keep the logical meaning.
                            return Ok(if *op == ComparisonOp::In {
                                "1 = 0".to_string()
                            } else {
                                "1 = 1".to_string()
                            });
                        }
                        let placeholders = items
                            .iter()
                            .map(|v| binder.bind_column(column, v.clone()))
                            .collect::<Vec<_>>()
                            .join(", ");
                        Ok(format!("{} {} ({})", column, op, placeholders))
                    }
                    (ComparisonOp::In | ComparisonOp::NotIn, _) => {
                        Err(format!("{} requires a list of values for {}", op, column))
                    }
                    (_, None) => Err(format!("{} {} requires a value", column, op)),
                    (_, Some(v)) => Ok(format!(
                        "{} {} {}",
                        column,
                        op,
                        binder.bind_column(column, v.clone())
                    )),
                }
            }
            Condition::Compound { conditions, op } => {
                if conditions.is_empty() {
                    return Ok("TRUE".to_string());
                }
                let parts = conditions
                    .iter()
                    .map(|c| c.render(binder))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if parts.len() == 1 {
                    Ok(parts.into_iter().next().unwrap_or_default())
                } else {
                    Ok(format!("({})", parts.join(&format!(" {} ", op))))
                }
            }
            Condition::Raw { sql, params } => binder.bind_raw(sql, params),
        }
    }
}

/// Collects bound values and hands out placeholders in dialect syntax.
struct Binder<'a> {
    profile: &'a DialectProfile,
    casts: Option<&'a ColumnCasts>,
    params: Vec<Value>,
}

impl<'a> Binder<'a> {
    fn new(profile: &'a DialectProfile) -> Self {
        Self {
            profile,
            casts: None,
            params: Vec::new(),
        }
    }

    fn with_casts(profile: &'a DialectProfile, casts: &'a ColumnCasts) -> Self {
        Self {
            casts: Some(casts),
            ..Self::new(profile)
        }
    }

    /// Bind a value compared with or assigned to `column`, casting text
    /// parameters where the column asks for it.
    fn bind_column(&mut self, column: &str, value: Value) -> String {
        let is_text = value.is_string();
        let placeholder = self.bind(value);
        let name = column.rsplit('.').next().unwrap_or(column);
        match self.casts.and_then(|casts| casts.get(name)) {
            Some(sql_type) if is_text => format!("{}::{}", placeholder, sql_type),
            _ => placeholder,
        }
    }

    /// NULL is written literally so backends never have to guess its type.
    fn bind(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        self.profile.placeholder(self.params.len())
    }

    fn bind_raw(&mut self, sql: &str, params: &[Value]) -> std::result::Result<String, String> {
        let mut values = params.iter();
        let mut out = String::with_capacity(sql.len());
        let mut missing = false;

        for_each_placeholder(sql, |piece| match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Placeholder => match values.next() {
                Some(v) => out.push_str(&self.bind(v.clone())),
                None => missing = true,
            },
        });

        if missing {
            return Err(format!(
                "statement has more placeholders than the {} supplied values",
                params.len()
            ));
        }
        if values.next().is_some() {
            return Err(format!(
                "statement has fewer placeholders than the {} supplied values",
                params.len()
            ));
        }
        Ok(out)
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

enum Piece<'s> {
    Text(&'s str),
    Placeholder,
}

/// Walk `sql`, reporting `?` placeholders outside quoted literals.
fn for_each_placeholder<'s>(sql: &'s str, mut f: impl FnMut(Piece<'s>)) {
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in sql.char_indices() {
        match (quote, c) {
            (None, '\'' | '"' | '`') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => {
                if start < i {
                    f(Piece::Text(&sql[start..i]));
                }
                f(Piece::Placeholder);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < sql.len() {
        f(Piece::Text(&sql[start..]));
    }
}

/// Rewrite portable `?` placeholders into the dialect's syntax.
pub fn rebind(sql: &str, profile: &DialectProfile) -> String {
    if profile.placeholder == PlaceholderStyle::Question {
        return sql.to_string();
    }
    let mut n = 0;
    let mut out = String::with_capacity(sql.len() + 8);
    for_each_placeholder(sql, |piece| match piece {
        Piece::Text(text) => out.push_str(text),
        Piece::Placeholder => {
            n += 1;
            out.push_str(&profile.placeholder(n));
        }
    });
    out
}

/// Parameterized SQL ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// A caller-written statement with portable `?` placeholders.
    pub fn raw(sql: &str, params: &[Value], profile: &DialectProfile) -> Result<Self> {
        let mut binder = Binder::new(profile);
        let sql = binder
            .bind_raw(sql, params)
            .map_err(|reason| DbError::build("exec", reason))?;
        Ok(binder.finish(sql))
    }
}

/// Check a table, column or index name.
pub fn validate_identifier(name: &str) -> std::result::Result<(), String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(format!("invalid identifier '{}'", name))
    }
}

/// A column reference: `name`, `table.name`, or `*`.
fn validate_column_ref(column: &str) -> std::result::Result<(), String> {
    if column == "*" {
        return Ok(());
    }
    match column.split_once('.') {
        Some((table, name)) => {
            validate_identifier(table)?;
            if name == "*" {
                Ok(())
            } else {
                validate_identifier(name)
            }
        }
        None => validate_identifier(column),
    }
}

/// An ORDER BY term is a column reference or a native term from the
/// profile, optionally followed by ASC or DESC.
fn validate_order_term(term: &str, profile: &DialectProfile) -> std::result::Result<(), String> {
    let mut parts = term.split_whitespace();
    let expr = parts
        .next()
        .ok_or_else(|| "empty ORDER BY term".to_string())?;

    let native = profile.terms.iter().any(|(_, native)| *native == expr);
    if !native && (expr.contains('*') || validate_column_ref(expr).is_err()) {
        return Err(format!(
            "ORDER BY term '{}' is not a column or a portable term",
            term
        ));
    }

    let direction: Vec<String> = parts.map(|p| p.to_ascii_uppercase()).collect();
    match direction.as_slice() {
        [] => Ok(()),
        [d] if d == "ASC" || d == "DESC" => Ok(()),
        _ => Err(format!("unsupported ORDER BY term '{}'", term)),
    }
}

/// SELECT parameters: column list, filter, ordering and pagination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    columns: Vec<String>,
    where_clause: Option<Condition>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    casts: ColumnCasts,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select specific columns (default is `*`)
    pub fn columns(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.columns = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// AND a condition onto the existing filter
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_where(Condition::eq(column, value))
    }

    /// Add an ORDER BY term such as `word ASC` or [`RANDOM_ORDER`](crate::dialect::RANDOM_ORDER).
    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order_by.push(term.into());
        self
    }

    pub fn order_asc(self, column: &str) -> Self {
        self.order_by(format!("{} ASC", column))
    }

    pub fn order_desc(self, column: &str) -> Self {
        self.order_by(format!("{} DESC", column))
    }

    pub fn order_random(self) -> Self {
        self.order_by(crate::dialect::RANDOM_ORDER)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Casts applied to text parameters in the WHERE clause.
    pub fn casts(mut self, casts: ColumnCasts) -> Self {
        self.casts = casts;
        self
    }

    pub fn filter(&self) -> Option<&Condition> {
        self.where_clause.as_ref()
    }

    /// Build the statement against an already-prefixed table name.
    pub fn build(&self, table: &str, profile: &DialectProfile) -> Result<Statement> {
        const OP: &str = "select";
        validate_identifier(table).map_err(|r| DbError::build(OP, r))?;

        let mut binder = Binder::with_casts(profile, &self.casts);
        let mut sql = String::from("SELECT ");

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            for column in &self.columns {
                validate_column_ref(column).map_err(|r| DbError::build(OP, r))?;
            }
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(&format!(" FROM {}", table));

        if let Some(condition) = &self.where_clause {
            let rendered = condition
                .render(&mut binder)
                .map_err(|r| DbError::build(OP, r))?;
            sql.push_str(" WHERE ");
            sql.push_str(&rendered);
        }

        if !self.order_by.is_empty() {
            let terms = self
                .order_by
                .iter()
                .map(|term| {
                    let translated = translate_terms(term, profile);
                    validate_order_term(&translated, profile).map(|_| translated)
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|r| DbError::build(OP, r))?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (self.limit, self.offset, profile.unbounded_limit) {
            (Some(limit), _, _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(_), Some(unbounded)) => sql.push_str(&format!(" LIMIT {}", unbounded)),
            _ => {}
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(binder.finish(sql))
    }
}

fn render_where(
    op: &'static str,
    condition: &Condition,
    binder: &mut Binder<'_>,
) -> Result<String> {
    condition.render(binder).map_err(|r| DbError::build(op, r))
}

/// Mutations must be scoped; a filter that keeps every row counts as none.
fn require_filter(op: &'static str, table: &str, condition: &Condition) -> Result<()> {
    if condition.is_empty() {
        return Err(DbError::MissingWhereClause {
            op,
            table: table.to_string(),
        });
    }
    Ok(())
}

fn validate_columns(op: &'static str, table: &str, columns: &ColumnMap) -> Result<()> {
    validate_identifier(table).map_err(|r| DbError::build(op, r))?;
    for column in columns.keys() {
        validate_identifier(column).map_err(|r| DbError::build(op, r))?;
    }
    Ok(())
}

/// `INSERT INTO table (a, b) VALUES (?, ?)`, columns in sorted order, with an
/// optional `RETURNING` column.
pub fn insert_statement(
    table: &str,
    values: &ColumnMap,
    returning: Option<&str>,
    casts: &ColumnCasts,
    profile: &DialectProfile,
) -> Result<Statement> {
    const OP: &str = "insert";
    if values.is_empty() {
        return Err(DbError::NoData {
            op: OP,
            table: table.to_string(),
        });
    }
    validate_columns(OP, table, values)?;

    let mut binder = Binder::with_casts(profile, casts);
    // ColumnMap iterates in key order, which keeps the SQL deterministic.
    let columns: Vec<&str> = values.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = values
        .iter()
        .map(|(column, v)| binder.bind_column(column, v.clone()))
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    if let Some(column) = returning {
        validate_identifier(column).map_err(|r| DbError::build(OP, r))?;
        sql.push_str(&format!(" RETURNING {}", column));
    }
    Ok(binder.finish(sql))
}

/// `UPDATE table SET a = ?, b = ? WHERE ...`
pub fn update_statement(
    table: &str,
    values: &ColumnMap,
    condition: &Condition,
    casts: &ColumnCasts,
    profile: &DialectProfile,
) -> Result<Statement> {
    const OP: &str = "update";
    if values.is_empty() {
        return Err(DbError::NoData {
            op: OP,
            table: table.to_string(),
        });
    }
    require_filter(OP, table, condition)?;
    validate_columns(OP, table, values)?;

    let mut binder = Binder::with_casts(profile, casts);
    let assignments: Vec<String> = values
        .iter()
        .map(|(column, value)| {
            format!("{} = {}", column, binder.bind_column(column, value.clone()))
        })
        .collect();
    let filter = render_where(OP, condition, &mut binder)?;

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        assignments.join(", "),
        filter
    );
    Ok(binder.finish(sql))
}

/// `DELETE FROM table WHERE ...`
pub fn delete_statement(
    table: &str,
    condition: &Condition,
    casts: &ColumnCasts,
    profile: &DialectProfile,
) -> Result<Statement> {
    const OP: &str = "delete";
    require_filter(OP, table, condition)?;
    validate_identifier(table).map_err(|r| DbError::build(OP, r))?;
    let mut binder = Binder::with_casts(profile, casts);
    let filter = render_where(OP, condition, &mut binder)?;
    Ok(binder.finish(format!("DELETE FROM {} WHERE {}", table, filter)))
}

/// `SELECT COUNT(*) AS count FROM table [WHERE ...]`
pub fn count_statement(
    table: &str,
    condition: Option<&Condition>,
    casts: &ColumnCasts,
    profile: &DialectProfile,
) -> Result<Statement> {
    const OP: &str = "count";
    validate_identifier(table).map_err(|r| DbError::build(OP, r))?;
    let mut binder = Binder::with_casts(profile, casts);
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", table);
    if let Some(condition) = condition {
        sql.push_str(" WHERE ");
        sql.push_str(&render_where(OP, condition, &mut binder)?);
    }
    Ok(binder.finish(sql))
}

/// Look up the identifier of a just-inserted row by matching every inserted
/// value. LIMIT 2 is enough to tell "exactly one" from "ambiguous".
pub fn identity_probe_statement(
    table: &str,
    id_column: &str,
    values: &ColumnMap,
    casts: &ColumnCasts,
    profile: &DialectProfile,
) -> Result<Statement> {
    SelectQuery::new()
        .columns(vec![id_column])
        .where_clause(Condition::matching(values))
        .casts(casts.clone())
        .limit(2)
        .build(table, profile)
        .map_err(|e| e.in_op("insert"))
}

/// Zero-row read used to find out whether a table exists.
pub fn existence_probe_statement(table: &str, profile: &DialectProfile) -> Result<Statement> {
    SelectQuery::new()
        .columns(vec!["*"])
        .limit(0)
        .build(table, profile)
        .map_err(|e| e.in_op("table_exists"))
}
