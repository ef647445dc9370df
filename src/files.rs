//! Binary file storage inside a database.
//!
//! Files are kept whole in an internal `__files` table keyed by a caller
//! chosen id. Uploading an id that already exists replaces the stored file.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::database::{ensure_parent_dir, Database};
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;

const FILES_TABLE: &str = "__files";

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: String,
    /// Name of the uploaded file, without its directory.
    pub filename: String,
    pub length: u64,
    /// UTC upload time as `YYYY-MM-DD HH:MM:SS`.
    pub uploaded_at: String,
}

fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            length INTEGER NOT NULL,
            uploaded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            data BLOB NOT NULL
        )",
        FILES_TABLE
    ))?;
    Ok(())
}

fn read_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileInfo> {
    Ok(FileInfo {
        id: row.get(0)?,
        filename: row.get(1)?,
        length: u64::try_from(row.get::<_, i64>(2)?).unwrap_or_default(),
        uploaded_at: row.get(3)?,
    })
}

fn validate_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    Ok(id)
}

/// Store the file at `path` under `id`.
pub fn upload(db: &Database, id: &str, path: &Path) -> Result<FileInfo> {
    let id = validate_id(id)?;
    if !path.is_file() {
        return Err(Error::PathNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let length = i64::try_from(data.len())
        .map_err(|_| Error::PathEmptyOrInvalid(format!("{} is too large", path.display())))?;

    let info = db.with_connection(|conn| {
        ensure_table(conn)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, filename, length, data) VALUES (?1, ?2, ?3, ?4)",
                FILES_TABLE
            ),
            rusqlite::params![id, filename, length, data],
        )?;
        Ok(conn.query_row(
            &format!(
                "SELECT id, filename, length, uploaded_at FROM {} WHERE id = ?1",
                FILES_TABLE
            ),
            [id],
            read_info,
        )?)
    })?;
    info!(alias = %db.alias(), id, bytes = info.length, "file uploaded");
    Ok(info)
}

pub fn find(db: &Database, id: &str) -> Result<Option<FileInfo>> {
    db.with_connection(|conn| {
        ensure_table(conn)?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT id, filename, length, uploaded_at FROM {} WHERE id = ?1",
                    FILES_TABLE
                ),
                [id],
                read_info,
            )
            .optional()?)
    })
}

/// Write the file stored under `id` to `dest`, creating parent directories.
/// Returns `None` (and writes nothing) when no such file is stored.
pub fn download(db: &Database, id: &str, dest: &Path) -> Result<Option<FileInfo>> {
    let stored = db.with_connection(|conn| {
        ensure_table(conn)?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT id, filename, length, uploaded_at, data FROM {} WHERE id = ?1",
                    FILES_TABLE
                ),
                [id],
                |row| Ok((read_info(row)?, row.get::<_, Vec<u8>>(4)?)),
            )
            .optional()?)
    })?;
    let Some((info, data)) = stored else {
        return Ok(None);
    };
    ensure_parent_dir(dest)?;
    std::fs::write(dest, data).map_err(|e| Error::io(dest, e))?;
    Ok(Some(info))
}

/// Remove the file stored under `id`; returns `false` if there was none.
pub fn delete(db: &Database, id: &str) -> Result<bool> {
    db.with_connection(|conn| {
        ensure_table(conn)?;
        let removed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", FILES_TABLE), [id])?;
        Ok(removed > 0)
    })
}

/// Every stored file, ordered by id.
pub fn list(db: &Database) -> Result<Vec<FileInfo>> {
    db.with_connection(|conn| {
        ensure_table(conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, filename, length, uploaded_at FROM {} ORDER BY id",
            FILES_TABLE
        ))?;
        let files = stmt
            .query_map([], read_info)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    })
}

impl ConnectionManager {
    /// Upload a file into the database registered under `alias`.
    ///
    /// The source is checked first ([`Error::PathNotFound`]); an unknown
    /// alias is [`Error::AliasNotFound`] and is never created.
    pub fn upload_file(&self, alias: &str, id: &str, path: &Path) -> Result<FileInfo> {
        if !path.is_file() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }
        let db = self.get_or_create(alias, false)?;
        upload(&db, id, path)
    }
}
