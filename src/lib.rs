//! Alias-keyed registry of in-memory and file-backed SQLite databases.
//!
//! # Intention
//!
//! - Hand out one shared [`Database`] handle per case-insensitive alias,
//!   created on demand in memory or opened from an existing file.
//! - Keep in-memory databases in a [`BackingBuffer`] that can be flushed to
//!   disk when the alias is closed, and reopened later from that file.
//! - Offer relational ([`sql`]), document ([`document`]) and file
//!   ([`files`]) helpers on top of any registered handle.
//!
//! # Architectural Boundaries
//!
//! - Only database lifecycle and storage helpers belong here.
//! - The registry never performs filesystem work while its lock is held.
//!
//! # Example
//!
//! ```no_run
//! use memdb_registry::{ConnectionManager, CreateOptions};
//!
//! # fn main() -> memdb_registry::Result<()> {
//! let manager = ConnectionManager::default();
//! let db = manager.create("reports", CreateOptions::in_memory())?;
//! db.with_connection(|conn| Ok(conn.execute_batch("CREATE TABLE t (v INTEGER)")?))?;
//! manager.close("reports", Some("out/reports.db".as_ref()))?;
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod factory;
pub mod files;
pub mod manager;
mod registry;
pub mod sql;

pub use alias::Alias;
pub use config::{ConfigError, JournalMode, ManagerConfig};
pub use database::{AccessMode, BackingBuffer, ConnectionDescriptor, Database, Storage};
pub use document::Collection;
pub use error::{Error, Result};
pub use factory::HandleFactory;
pub use files::FileInfo;
pub use manager::{ConnectionManager, CreateOptions};
