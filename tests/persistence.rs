mod common;

use memdb_registry::{ConnectionManager, CreateOptions, Error, JournalMode, ManagerConfig};
use serde::{Deserialize, Serialize};
use tempfile::tempdir;

use common::{manager, seed_users, user_count};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Customer {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    phones: Vec<String>,
    is_active: bool,
}

#[tokio::test]
async fn test_close_with_path_round_trips() {
    test_close_with_path_round_trips_impl().unwrap();
}

fn test_close_with_path_round_trips_impl() -> anyhow::Result<()> {
    let manager = manager();
    let dir = tempdir()?;
    let target = dir.path().join("nested").join("deeper").join("db1.db");

    let db1 = manager.get_or_create("db1", true)?;
    seed_users(&db1)?;
    let customers = db1.collection::<Customer>("customers")?;
    customers.insert_many(&[
        Customer {
            id: Some("c1".into()),
            name: "Ann".into(),
            phones: vec!["555-0100".into()],
            is_active: true,
        },
        Customer {
            id: Some("c2".into()),
            name: "Bob".into(),
            phones: vec![],
            is_active: false,
        },
    ])?;

    manager.close("db1", Some(target.as_path()))?;
    assert!(db1.is_disposed());
    assert!(target.is_file());
    assert!(std::fs::read(&target)?.starts_with(b"SQLite format 3\0"));

    let db2 = manager.create("db2", CreateOptions::file(&target))?;
    assert!(!db2.is_in_memory());
    assert_eq!(user_count(&db2)?, 2);

    let reopened = db2.collection::<Customer>("customers")?;
    assert_eq!(reopened.count()?, 2);
    let ann = reopened.find_by_id("c1")?.expect("c1 persisted");
    assert_eq!(ann.phones, vec!["555-0100".to_string()]);
    assert!(ann.is_active);
    assert_eq!(db2.collection_names()?, vec!["customers".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_close_without_path_discards_data() {
    test_close_without_path_discards_data_impl().unwrap();
}

fn test_close_without_path_discards_data_impl() -> anyhow::Result<()> {
    let manager = manager();
    let db = manager.get_or_create("volatile", true)?;
    seed_users(&db)?;
    manager.close("volatile", None)?;

    let fresh = manager.get_or_create("volatile", true)?;
    let tables: i64 = fresh.with_connection(|conn| {
        Ok(conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))?)
    })?;
    assert_eq!(tables, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_flush_still_closes() {
    test_failed_flush_still_closes_impl().unwrap();
}

fn test_failed_flush_still_closes_impl() -> anyhow::Result<()> {
    let manager = manager();
    let dir = tempdir()?;
    // A regular file where a directory is needed makes the flush fail.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x")?;
    let target = blocker.join("db.db");

    let db = manager.get_or_create("unlucky", true)?;
    seed_users(&db)?;
    let err = manager.close("unlucky", Some(target.as_path())).unwrap_err();
    match &err {
        Error::Persist { alias, path, .. } => {
            assert_eq!(alias, "unlucky");
            assert_eq!(path, &target);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(db.is_disposed());
    assert!(!manager.contains("unlucky"));
    Ok(())
}

#[tokio::test]
async fn test_save_keeps_database_open() {
    test_save_keeps_database_open_impl().unwrap();
}

fn test_save_keeps_database_open_impl() -> anyhow::Result<()> {
    let manager = manager();
    let dir = tempdir()?;

    let db = manager.get_or_create("live", true)?;
    seed_users(&db)?;
    let snapshot = dir.path().join("snapshots").join("live.db");
    manager.save("live", &snapshot)?;
    assert!(!db.is_disposed());

    // Later writes do not reach the snapshot.
    db.with_connection(|conn| {
        Ok(conn.execute(
            "INSERT INTO users (name, email) VALUES ('Late', 'late@example.com')",
            [],
        )?)
    })?;
    let copy = manager.create("copy", CreateOptions::file(&snapshot).shared(true))?;
    assert_eq!(user_count(&copy)?, 2);
    assert_eq!(user_count(&db)?, 3);

    // File-backed databases are saved through the backup API.
    let second = dir.path().join("copy-of-copy.db");
    manager.save("copy", &second)?;
    let third = manager.create("third", CreateOptions::file(&second))?;
    assert_eq!(user_count(&third)?, 2);

    assert!(matches!(
        manager.save("absent", &second),
        Err(Error::AliasNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_configured_manager_applies_settings() {
    test_configured_manager_applies_settings_impl().unwrap();
}

fn test_configured_manager_applies_settings_impl() -> anyhow::Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let config_path = dir.path().join("registry.yaml");
    std::fs::write(
        &config_path,
        "busy_timeout_ms: 250\njournal_mode: wal\nforeign_keys: true\nmemory_store_prefix: test-store\n",
    )?;
    let config = ManagerConfig::load(&config_path)?;
    assert_eq!(config.journal_mode, Some(JournalMode::Wal));
    let manager = ConnectionManager::new(config)?;

    let path = dir.path().join("wal.db");
    rusqlite::Connection::open(&path)?.execute_batch("CREATE TABLE t (v INTEGER)")?;
    let db = manager.create("wal", CreateOptions::file(&path).shared(true))?;
    let (mode, fk): (String, i64) = db.with_connection(|conn| {
        let mode = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        let fk = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok((mode, fk))
    })?;
    assert_eq!(mode, "wal");
    assert_eq!(fk, 1);
    db.checkpoint()?;

    let memory = manager.get_or_create("mem", true)?;
    match memory.storage() {
        memdb_registry::Storage::Memory { store } => assert!(store.starts_with("test-store-")),
        other => panic!("unexpected storage {:?}", other),
    }
    Ok(())
}
