//! Bulk row loading and delimited-text import.

use std::path::Path;

use tracing::debug;

use super::schema::{create_table, ColumnDefinition, DataType, TableDefinition};
use super::{infer_value, quote_ident, Value};
use crate::database::Database;
use crate::error::{Error, Result};

/// Insert `rows` into `table` in a single transaction.
///
/// Rows whose every value is null or blank text are skipped. Returns the
/// number of rows written.
pub fn insert_rows(
    db: &Database,
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<usize> {
    if columns.is_empty() {
        return Err(Error::InvalidIdentifier(format!("{}: no columns", table)));
    }
    if let Some(bad) = rows.iter().find(|row| row.len() != columns.len()) {
        return Err(Error::RowShape {
            expected: columns.len(),
            found: bad.len(),
        });
    }
    let names = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?;
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table)?,
        names.join(", "),
        vec!["?"; names.len()].join(", ")
    );

    let written = db.with_connection_mut(|conn| {
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows.iter().filter(|row| !row.iter().all(Value::is_blank)) {
                stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    })?;
    debug!(table, rows = written, "rows inserted");
    Ok(written)
}

/// Parsed delimited text: a header row and typed data rows.
#[derive(Debug, Clone, PartialEq)]
struct Delimited {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
}

fn read_delimited(path: &Path, delimiter: char) -> Result<Delimited> {
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_delimited(&text, delimiter)?
        .ok_or_else(|| Error::PathEmptyOrInvalid(format!("{} has no header row", path.display())))
}

/// Parse a header line and data rows. Short rows are padded with nulls;
/// a row with more fields than the header is a [`Error::RowShape`].
fn parse_delimited(text: &str, delimiter: char) -> Result<Option<Delimited>> {
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Ok(None);
    };
    let headers = split_fields(header, delimiter);
    let width = headers.len();
    let rows = lines
        .map(|line| {
            let mut row: Vec<Value> = split_fields(line, delimiter)
                .into_iter()
                .map(|field| infer_value(&field))
                .collect();
            if row.len() > width {
                return Err(Error::RowShape {
                    expected: width,
                    found: row.len(),
                });
            }
            row.resize(width, Value::Null);
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(Delimited { headers, rows }))
}

/// Split one line on `delimiter`, honouring double-quoted fields.
fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn column_type(rows: &[Vec<Value>], idx: usize) -> DataType {
    let first = rows.iter().map(|row| &row[idx]).find(|v| !v.is_null());
    match first {
        Some(Value::Integer(_)) | Some(Value::Boolean(_)) => DataType::Integer,
        Some(Value::Real(_)) => DataType::Real,
        Some(Value::Blob(_)) => DataType::Blob,
        _ => DataType::Text,
    }
}

/// Replace `table` with the contents of a delimited text file.
///
/// The first line names the columns; column types are inferred from the
/// first non-empty value in each column. Returns the number of rows loaded.
pub fn import_csv(db: &Database, table: &str, path: &Path, delimiter: char) -> Result<usize> {
    let data = read_delimited(path, delimiter)?;
    let mut definition = TableDefinition::new(table);
    for (idx, header) in data.headers.iter().enumerate() {
        definition = definition.with_column(ColumnDefinition::new(header, column_type(&data.rows, idx)));
    }
    create_table(db, None, &definition)?;
    insert_rows(db, table, &data.headers, &data.rows)
}

/// Append the rows of a delimited text file to an existing table.
pub fn append_csv(db: &Database, table: &str, path: &Path, delimiter: char) -> Result<usize> {
    let data = read_delimited(path, delimiter)?;
    insert_rows(db, table, &data.headers, &data.rows)
}
