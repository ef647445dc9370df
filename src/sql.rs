//! Relational helpers over a registered [`Database`].
//!
//! # Intention
//!
//! - Typed values, named parameters and a small condition builder shared
//!   with the document layer.
//! - CRUD operations on plain tables, raw statements, and SQL read from
//!   files with `@name` placeholder substitution.
//!
//! Table definitions, bulk loading and catalog queries are re-exported
//! from submodules.

mod catalog;
mod load;
mod schema;

pub use catalog::{attach, detach, drop_table, enable_wal, list_databases, list_tables};
pub use load::{append_csv, import_csv, insert_rows};
pub use schema::{
    apply_schema, create_table, ColumnConstraint, ColumnDefinition, DataType, DefaultValue,
    ForeignKey, ForeignKeyAction, IndexDefinition, Schema, TableDefinition,
};

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Statement, ToSql};

use crate::database::Database;
use crate::error::{Error, Result};

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub(crate) fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Best-effort typing of a textual cell: integer, then real, then boolean,
/// falling back to text. Blank input is `Null`.
pub fn infer_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    // "inf" and "NaN" parse as floats but are almost always text.
    if trimmed.bytes().any(|b| b.is_ascii_digit()) {
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Real(f);
        }
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    Value::Text(trimmed.to_string())
}

/// One result row keyed by column name.
pub type Row = HashMap<String, Value>;

/// Parameter bindings for SQL queries
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: HashMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a named value; `name` may omit the leading `:`.
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }
}

/// SQL Query with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Query operators for building advanced queries
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
}

/// Query builder for composable, immutable queries.
///
/// Conditions are joined with `AND`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Query {
    pub conditions: HashMap<String, QueryOperator>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions.insert(field.to_string(), op);
        self
    }
    /// Shorthand for an equality condition.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new().with_condition(field, QueryOperator::Equal(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render as a `WHERE` clause body plus positional parameters.
    ///
    /// `column` maps a field name to the SQL expression it is compared
    /// against. Fields are rendered in name order; an empty query renders
    /// as `1`.
    pub fn to_sql(&self, column: impl Fn(&str) -> Result<String>) -> Result<(String, Vec<Value>)> {
        if self.conditions.is_empty() {
            return Ok(("1".to_string(), Vec::new()));
        }
        let mut fields: Vec<&String> = self.conditions.keys().collect();
        fields.sort();

        let mut clauses = Vec::with_capacity(fields.len());
        let mut params = Vec::new();
        for field in fields {
            let expr = column(field.as_str())?;
            let clause = match &self.conditions[field] {
                QueryOperator::Equal(v) => binary(&expr, "=", v, &mut params),
                QueryOperator::NotEqual(v) => binary(&expr, "<>", v, &mut params),
                QueryOperator::GreaterThan(v) => binary(&expr, ">", v, &mut params),
                QueryOperator::GreaterThanOrEqual(v) => binary(&expr, ">=", v, &mut params),
                QueryOperator::LessThan(v) => binary(&expr, "<", v, &mut params),
                QueryOperator::LessThanOrEqual(v) => binary(&expr, "<=", v, &mut params),
                QueryOperator::Like(pattern) => {
                    params.push(Value::Text(pattern.clone()));
                    format!("{} LIKE ?", expr)
                }
                QueryOperator::In(values) if values.is_empty() => "0".to_string(),
                QueryOperator::In(values) => {
                    params.extend(values.iter().cloned());
                    let marks = vec!["?"; values.len()].join(", ");
                    format!("{} IN ({})", expr, marks)
                }
            };
            clauses.push(clause);
        }
        Ok((clauses.join(" AND "), params))
    }
}

fn binary(expr: &str, op: &str, value: &Value, params: &mut Vec<Value>) -> String {
    match (value, op) {
        (Value::Null, "=") => format!("{} IS NULL", expr),
        (Value::Null, "<>") => format!("{} IS NOT NULL", expr),
        _ => {
            params.push(value.clone());
            format!("{} {} ?", expr, op)
        }
    }
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// `"schema"."table"`, defaulting the schema to `main`.
pub(crate) fn qualified(schema: Option<&str>, table: &str) -> Result<String> {
    let schema = schema.filter(|s| !s.trim().is_empty()).unwrap_or("main");
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// CRUD operation types
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub table: String,
    pub data: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOperation {
    pub table: String,
    pub query: Query,
    pub fields: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order_by: Option<Vec<(String, bool)>>, // (field, is_ascending)
}

impl ReadOperation {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            query: Query::new(),
            fields: None,
            limit: None,
            offset: None,
            order_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub table: String,
    pub query: Query,
    pub updates: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub table: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudOperation {
    Create(CreateOperation),
    Read(ReadOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

/// What a [`CrudOperation`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CrudOutcome {
    Inserted { rowid: i64 },
    Rows(Vec<Row>),
    Affected(usize),
}

/// Perform a CRUD operation (type-safe API)
pub fn execute_crud(db: &Database, op: &CrudOperation) -> Result<CrudOutcome> {
    match op {
        CrudOperation::Create(create) => {
            if create.data.is_empty() {
                let sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&create.table)?);
                return db.with_connection(|conn| {
                    conn.execute(&sql, [])?;
                    Ok(CrudOutcome::Inserted {
                        rowid: conn.last_insert_rowid(),
                    })
                });
            }
            let mut columns: Vec<&String> = create.data.keys().collect();
            columns.sort();
            let names = columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?;
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&create.table)?,
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            );
            let values: Vec<&Value> = columns.iter().map(|c| &create.data[*c]).collect();
            db.with_connection(|conn| {
                conn.execute(&sql, rusqlite::params_from_iter(values))?;
                Ok(CrudOutcome::Inserted {
                    rowid: conn.last_insert_rowid(),
                })
            })
        }
        CrudOperation::Read(read) => {
            let projection = match &read.fields {
                Some(fields) if !fields.is_empty() => fields
                    .iter()
                    .map(|f| quote_ident(f))
                    .collect::<Result<Vec<_>>>()?
                    .join(", "),
                _ => "*".to_string(),
            };
            let (filter, mut params) = read.query.to_sql(quote_ident)?;
            let mut sql = format!(
                "SELECT {} FROM {} WHERE {}",
                projection,
                quote_ident(&read.table)?,
                filter
            );
            if let Some(order) = read.order_by.as_ref().filter(|o| !o.is_empty()) {
                let terms = order
                    .iter()
                    .map(|(field, asc)| {
                        Ok(format!(
                            "{} {}",
                            quote_ident(field)?,
                            if *asc { "ASC" } else { "DESC" }
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
            }
            if read.limit.is_some() || read.offset.is_some() {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::Integer(read.limit.map_or(-1, i64::from)));
                params.push(Value::Integer(read.offset.map_or(0, i64::from)));
            }
            let rows = db.with_connection(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                collect_rows(&mut stmt, rusqlite::params_from_iter(params.iter()))
            })?;
            Ok(CrudOutcome::Rows(rows))
        }
        CrudOperation::Update(update) => {
            if update.updates.is_empty() {
                return Ok(CrudOutcome::Affected(0));
            }
            let mut columns: Vec<&String> = update.updates.keys().collect();
            columns.sort();
            let assignments = columns
                .iter()
                .map(|c| Ok(format!("{} = ?", quote_ident(c)?)))
                .collect::<Result<Vec<_>>>()?;
            let (filter, filter_params) = update.query.to_sql(quote_ident)?;
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                quote_ident(&update.table)?,
                assignments.join(", "),
                filter
            );
            let mut params: Vec<Value> =
                columns.iter().map(|c| update.updates[*c].clone()).collect();
            params.extend(filter_params);
            let changed = db.with_connection(|conn| {
                Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
            })?;
            Ok(CrudOutcome::Affected(changed))
        }
        CrudOperation::Delete(delete) => {
            let (filter, params) = delete.query.to_sql(quote_ident)?;
            let sql = format!("DELETE FROM {} WHERE {}", quote_ident(&delete.table)?, filter);
            let changed = db.with_connection(|conn| {
                Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
            })?;
            Ok(CrudOutcome::Affected(changed))
        }
    }
}

/// Execute one statement with named parameters; returns the changed row count.
pub fn execute(db: &Database, query: &SqlQuery) -> Result<usize> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(&query.statement)?;
        bind_named(&mut stmt, &query.params)?;
        Ok(stmt.raw_execute()?)
    })
}

/// Run a query with named parameters and collect every row.
pub fn query(db: &Database, query: &SqlQuery) -> Result<Vec<Row>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(&query.statement)?;
        bind_named(&mut stmt, &query.params)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row, &columns)?);
        }
        Ok(out)
    })
}

/// Execute a script of one or more statements.
pub fn execute_batch(db: &Database, sql: &str) -> Result<()> {
    db.with_connection(|conn| Ok(conn.execute_batch(sql)?))
}

fn bind_named(stmt: &mut Statement<'_>, params: &Params) -> Result<()> {
    for (name, value) in &params.values {
        let key = if name.starts_with([':', '@', '$']) {
            name.clone()
        } else {
            format!(":{}", name)
        };
        let index = stmt
            .parameter_index(&key)?
            .ok_or_else(|| Error::InvalidIdentifier(key.clone()))?;
        stmt.raw_bind_parameter(index, value)?;
    }
    Ok(())
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<Row> {
    let mut map = HashMap::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        map.insert(name.clone(), Value::from_value_ref(row.get_ref(idx)?));
    }
    Ok(map)
}

pub(crate) fn collect_rows<P: rusqlite::Params>(stmt: &mut Statement<'_>, params: P) -> Result<Vec<Row>> {
    let columns = column_names(stmt);
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read_row(row, &columns)?);
    }
    Ok(out)
}

/// Distinct `@name` placeholders in order of first appearance.
pub fn query_parameters(sql: &str) -> Vec<String> {
    let is_name = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut seen: Vec<String> = Vec::new();
    let mut rest = sql;
    while let Some(at) = rest.find('@') {
        let tail = &rest[at + 1..];
        let len = tail.find(|c: char| !is_name(c)).unwrap_or(tail.len());
        if len > 0 {
            let name = format!("@{}", &tail[..len]);
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        rest = &tail[len..];
    }
    seen
}

/// Replace each key of `parameters` with its value, ignoring case.
///
/// Replacement is literal text. Longer keys are applied first so `@idx`
/// is not clobbered by `@id`.
pub fn substitute_parameters(sql: &str, parameters: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = parameters.keys().filter(|k| !k.is_empty()).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = sql.to_string();
    for key in keys {
        let pattern = format!("(?i){}", regex::escape(key));
        if let Ok(re) = Regex::new(&pattern) {
            out = re
                .replace_all(&out, regex::NoExpand(&parameters[key]))
                .into_owned();
        }
    }
    out
}

fn read_sql_file(path: &Path, parameters: Option<&HashMap<String, String>>) -> Result<String> {
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(match parameters {
        Some(parameters) => substitute_parameters(&text, parameters),
        None => text,
    })
}

/// Execute the SQL script in `path` after placeholder substitution.
pub fn execute_file(
    db: &Database,
    path: &Path,
    parameters: Option<&HashMap<String, String>>,
) -> Result<()> {
    let sql = read_sql_file(path, parameters)?;
    execute_batch(db, &sql)
}

/// Run the single query in `path` after placeholder substitution.
pub fn query_file(
    db: &Database,
    path: &Path,
    parameters: Option<&HashMap<String, String>>,
) -> Result<Vec<Row>> {
    let sql = read_sql_file(path, parameters)?;
    query(db, &SqlQuery::new(&sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_value() {
        assert_eq!(infer_value(""), Value::Null);
        assert_eq!(infer_value(" 42 "), Value::Integer(42));
        assert_eq!(infer_value("3.5"), Value::Real(3.5));
        assert_eq!(infer_value("TRUE"), Value::Boolean(true));
        assert_eq!(infer_value("NaN"), Value::Text("NaN".into()));
        assert_eq!(infer_value("Madrid"), Value::Text("Madrid".into()));
    }

    #[test]
    fn test_query_rendering() {
        let query = Query::new()
            .with_condition("name", QueryOperator::Like("Da%".into()))
            .with_condition("age", QueryOperator::GreaterThanOrEqual(Value::Integer(18)))
            .with_condition("deleted_at", QueryOperator::Equal(Value::Null))
            .with_condition("city", QueryOperator::In(vec!["A".into(), "B".into()]));
        let (sql, params) = query.to_sql(quote_ident).unwrap();
        assert_eq!(
            sql,
            r#""age" >= ? AND "city" IN (?, ?) AND "deleted_at" IS NULL AND "name" LIKE ?"#
        );
        assert_eq!(
            params,
            vec![
                Value::Integer(18),
                Value::Text("A".into()),
                Value::Text("B".into()),
                Value::Text("Da%".into()),
            ]
        );

        let (sql, params) = Query::new().to_sql(quote_ident).unwrap();
        assert_eq!(sql, "1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(quote_ident("  ").is_err());
    }

    #[test]
    fn test_parameters() {
        let sql = "SELECT * FROM t WHERE id = @id AND idx = @IDX OR id = @id";
        assert_eq!(query_parameters(sql), vec!["@id", "@IDX"]);
        assert!(query_parameters("SELECT 1").is_empty());

        let params = HashMap::from([
            ("@id".to_string(), "7".to_string()),
            ("@idx".to_string(), "'$1'".to_string()),
        ]);
        assert_eq!(
            substitute_parameters(sql, &params),
            "SELECT * FROM t WHERE id = 7 AND idx = '$1' OR id = 7"
        );
    }
}
