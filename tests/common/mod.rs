#![allow(dead_code)]

use std::path::{Path, PathBuf};

use memdb_registry::{ConnectionManager, Database, ManagerConfig};
use tracing_subscriber::EnvFilter;

// Route library logs through the test writer; RUST_LOG selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manager() -> ConnectionManager {
    init_tracing();
    ConnectionManager::new(ManagerConfig::default()).expect("default config is valid")
}

// Create a users table with a couple of rows
pub fn seed_users(db: &Database) -> anyhow::Result<()> {
    db.with_connection(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                age INTEGER
            );
            INSERT INTO users (name, email, age) VALUES ('John Doe', 'john@example.com', 30);
            INSERT INTO users (name, email, age) VALUES ('Jane Roe', 'jane@example.com', NULL);
            "#,
        )?;
        Ok(())
    })?;
    Ok(())
}

pub fn user_count(db: &Database) -> anyhow::Result<i64> {
    Ok(db.with_connection(|conn| {
        Ok(conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?)
    })?)
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
