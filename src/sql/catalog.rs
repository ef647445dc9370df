// Tables and attached databases of a connection.

use std::path::Path;

use tracing::info;

use super::{qualified, quote_ident};
use crate::database::{ensure_parent_dir, Database};
use crate::error::{Error, Result};

/// Names of the databases visible to the connection (`main`, `temp` if
/// used, then attached ones).
pub fn list_databases(db: &Database) -> Result<Vec<String>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("PRAGMA database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>("name"))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    })
}

/// User tables of `schema` (default `main`), sorted by name.
pub fn list_tables(db: &Database, schema: Option<&str>) -> Result<Vec<String>> {
    let schema = schema.filter(|s| !s.trim().is_empty()).unwrap_or("main");
    let known = list_databases(db)?;
    if !known.iter().any(|name| name.eq_ignore_ascii_case(schema)) {
        return Err(Error::InvalidIdentifier(format!("{} is not attached", schema)));
    }
    let sql = format!(
        "SELECT name FROM {}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        quote_ident(schema)?
    );
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    })
}

/// Drop `table`; returns `false` if it did not exist.
pub fn drop_table(db: &Database, schema: Option<&str>, table: &str) -> Result<bool> {
    let exists = list_tables(db, schema)?.iter().any(|t| t == table);
    if !exists {
        return Ok(false);
    }
    let sql = format!("DROP TABLE {}", qualified(schema, table)?);
    db.with_connection(|conn| Ok(conn.execute(&sql, [])?))?;
    Ok(true)
}

/// Attach the database file at `path` as `schema`, creating the file and
/// its parent directories when missing.
pub fn attach(db: &Database, path: &Path, schema: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::PathEmptyOrInvalid("attach path is empty".to_string()));
    }
    let filename = path
        .to_str()
        .ok_or_else(|| Error::PathEmptyOrInvalid(path.display().to_string()))?;
    ensure_parent_dir(path)?;
    if !path.exists() {
        // Handles opened without SQLITE_OPEN_CREATE cannot attach a missing
        // file; an empty file is a valid empty database.
        std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    }
    let sql = format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)?);
    let uri = os_file_uri(filename);
    db.with_connection(|conn| Ok(conn.execute(&sql, [uri])?))?;
    info!(alias = %db.alias(), schema, path = %path.display(), "database attached");
    Ok(())
}

#[cfg(windows)]
const OS_VFS: &str = "win32";
#[cfg(not(windows))]
const OS_VFS: &str = "unix";

/// URI naming `filename` on the operating-system VFS. Without the explicit
/// `vfs` an attach from an in-memory handle would inherit `memdb`.
fn os_file_uri(filename: &str) -> String {
    let mut encoded = String::with_capacity(filename.len());
    for c in filename.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '?' => encoded.push_str("%3F"),
            '#' => encoded.push_str("%23"),
            '\\' => encoded.push('/'),
            c => encoded.push(c),
        }
    }
    format!("file:{}?vfs={}", encoded, OS_VFS)
}

pub fn detach(db: &Database, schema: &str) -> Result<()> {
    let sql = format!("DETACH DATABASE {}", quote_ident(schema)?);
    db.with_connection(|conn| Ok(conn.execute(&sql, [])?))?;
    Ok(())
}

/// Switch the main database to write-ahead logging.
///
/// Returns the journal mode now in effect. In-memory databases cannot use
/// WAL and report the mode they keep.
pub fn enable_wal(db: &Database) -> Result<String> {
    db.with_connection(|conn| {
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Ok(mode)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_file_uri_escapes_reserved_characters() {
        assert_eq!(
            os_file_uri("/data/a?b#c%d.db"),
            format!("file:/data/a%3Fb%23c%25d.db?vfs={}", OS_VFS)
        );
    }
}
