//! Error types shared by the registry, the handle factory and the helpers.
//!
//! Expected outcomes (duplicate alias, unknown alias, missing path) are plain
//! variants so callers can match on them; see [`Error::is_recoverable`].
//! Engine and filesystem failures are wrapped as [`Error::Engine`] and
//! [`Error::Io`].

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by registry operations and the helpers built on top of it.
#[derive(Debug, Error)]
pub enum Error {
    /// A database is already registered under this alias.
    #[error("a database is already registered under alias '{0}'")]
    AliasAlreadyExists(String),

    /// No database is registered under this alias.
    #[error("no database is registered under alias '{0}'")]
    AliasNotFound(String),

    /// The database file to open does not exist.
    #[error("path '{}' does not exist", .0.display())]
    PathNotFound(PathBuf),

    /// A path argument was empty or could not be used.
    #[error("path is empty or invalid: {0}")]
    PathEmptyOrInvalid(String),

    /// The SQLite engine rejected an open, query or statement.
    #[error("engine failure: {0}")]
    Engine(#[from] rusqlite::Error),

    /// Filesystem failure while reading or writing a database image.
    #[error("i/o failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database was closed and released, but flushing its buffer failed.
    #[error("database '{alias}' was closed but could not be persisted to '{}'", path.display())]
    Persist {
        alias: String,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// The handle was disposed by `close` or a substituting `create`.
    #[error("database handle '{0}' has been closed")]
    HandleClosed(String),

    /// Document (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A table, collection or column name that cannot be used as an identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A document that is not a JSON object or carries an unusable `_id`.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The named collection does not exist in the database.
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// A row to insert does not have one value per column.
    #[error("row has {found} values but {expected} columns were given")]
    RowShape { expected: usize, found: usize },

    /// A SQL or CSV source file does not exist.
    #[error("file '{}' not found", .0.display())]
    FileNotFound(PathBuf),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the expected outcomes that leave the registry unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AliasAlreadyExists(_)
                | Error::AliasNotFound(_)
                | Error::PathNotFound(_)
                | Error::PathEmptyOrInvalid(_)
        )
    }

    /// True when the failure came from the engine or the filesystem.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Error::Engine(_) | Error::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_outcomes_are_recoverable() {
        assert!(Error::AliasAlreadyExists("a".into()).is_recoverable());
        assert!(Error::AliasNotFound("a".into()).is_recoverable());
        assert!(Error::PathNotFound("x.db".into()).is_recoverable());
        assert!(!Error::HandleClosed("a".into()).is_recoverable());

        let io = Error::io("x.db", std::io::Error::other("disk full"));
        assert!(io.is_engine_failure());
        assert!(!io.is_recoverable());
    }
}
