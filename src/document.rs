//! Typed document collections stored as JSON in SQLite tables.
//!
//! # Intention
//!
//! Any registered [`Database`] can hold collections of serde types. Each
//! collection is a table `(_id TEXT PRIMARY KEY, doc TEXT NOT NULL)`; the
//! names of all collections are tracked in an internal `__collections`
//! table. Conditions built with [`Query`] are evaluated against JSON
//! fields through `json_extract`.
//!
//! Documents must serialize to a JSON object. A missing or null `_id`
//! field is filled with a fresh UUID; string and integer ids are kept.

use std::marker::PhantomData;
use std::path::Path;

use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::sql::{self, quote_ident, Query, Value};

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

const CATALOG_TABLE: &str = "__collections";

/// A named collection of `T` inside one database.
pub struct Collection<'db, T> {
    db: &'db Database,
    name: String,
    table: String,
    _marker: PhantomData<fn() -> T>,
}

impl Database {
    /// Open the collection `name`, creating it on first use.
    pub fn collection<T>(&self, name: &str) -> Result<Collection<'_, T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let name = validate_collection_name(name)?;
        let table = quote_ident(&name)?;
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (_id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
            table
        );
        self.with_connection(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY)",
                CATALOG_TABLE
            ))?;
            conn.execute_batch(&create)?;
            conn.execute(
                &format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", CATALOG_TABLE),
                [&name],
            )?;
            Ok(())
        })?;
        Ok(Collection {
            db: self,
            name,
            table,
            _marker: PhantomData,
        })
    }

    /// Open an existing collection without creating it.
    pub fn existing_collection<T>(&self, name: &str) -> Result<Collection<'_, T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let name = validate_collection_name(name)?;
        if !self.collection_names()?.contains(&name) {
            return Err(Error::CollectionNotFound(name));
        }
        self.collection(&name)
    }

    /// Names of the collections in this database, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            if !catalog_exists(conn)? {
                return Ok(Vec::new());
            }
            let mut stmt =
                conn.prepare(&format!("SELECT name FROM {} ORDER BY name", CATALOG_TABLE))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    /// Drop a collection; returns `false` if it did not exist.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let name = validate_collection_name(name)?;
        if !self.collection_names()?.contains(&name) {
            return Ok(false);
        }
        let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(&name)?);
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(&drop, [])?;
            tx.execute(
                &format!("DELETE FROM {} WHERE name = ?1", CATALOG_TABLE),
                [&name],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Run a query and return each row as JSON.
    ///
    /// A row whose only column is a document body is returned as that
    /// document; any other row becomes an object keyed by column name.
    pub fn execute_documents(&self, sql: &str) -> Result<Vec<Json>> {
        let rows = sql::query(self, &sql::SqlQuery::new(sql))?;
        rows.into_iter().map(row_to_json).collect()
    }
}

impl<'db, T> Collection<'db, T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert one document and return its id.
    pub fn insert(&self, doc: &T) -> Result<String> {
        let (id, body) = encode(doc)?;
        let sql = format!("INSERT INTO {} (_id, doc) VALUES (?1, ?2)", self.table);
        self.db
            .with_connection(|conn| Ok(conn.execute(&sql, [&id, &body])?))?;
        debug!(collection = %self.name, id = %id, "document inserted");
        Ok(id)
    }

    /// Insert every document in one transaction; nothing is written if any
    /// insert fails.
    pub fn insert_many(&self, docs: &[T]) -> Result<Vec<String>> {
        let encoded = docs.iter().map(encode).collect::<Result<Vec<_>>>()?;
        let sql = format!("INSERT INTO {} (_id, doc) VALUES (?1, ?2)", self.table);
        self.db.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (id, body) in &encoded {
                    stmt.execute([id, body])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        debug!(collection = %self.name, count = encoded.len(), "documents inserted");
        Ok(encoded.into_iter().map(|(id, _)| id).collect())
    }

    /// Every document in insertion order.
    pub fn find_all(&self) -> Result<Vec<T>> {
        self.select("1", Vec::new(), None)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let sql = format!("SELECT doc FROM {} WHERE _id = ?1", self.table);
        let body: Option<String> = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(&sql, [id], |row| row.get(0))
                .optional()?)
        })?;
        body.map(|b| decode(&b)).transpose()
    }

    /// Documents whose JSON fields satisfy `query`.
    pub fn find(&self, query: &Query) -> Result<Vec<T>> {
        let (filter, params) = query.to_sql(json_field)?;
        self.select(&filter, params, None)
    }

    pub fn find_one(&self, query: &Query) -> Result<Option<T>> {
        let (filter, params) = query.to_sql(json_field)?;
        Ok(self.select(&filter, params, Some(1))?.into_iter().next())
    }

    /// Documents for which `predicate` holds, evaluated after decoding.
    pub fn find_matching(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        Ok(self.find_all()?.into_iter().filter(|doc| predicate(doc)).collect())
    }

    /// Replace the stored document with the same `_id`.
    ///
    /// Returns `false` when no document has that id. A document without an
    /// `_id` is rejected with [`Error::InvalidDocument`].
    pub fn update(&self, doc: &T) -> Result<bool> {
        let (id, body) = encode_existing(doc)?;
        let sql = format!("UPDATE {} SET doc = ?1 WHERE _id = ?2", self.table);
        let changed = self
            .db
            .with_connection(|conn| Ok(conn.execute(&sql, [&body, &id])?))?;
        Ok(changed > 0)
    }

    /// Update several documents in one transaction; returns how many matched.
    pub fn update_many(&self, docs: &[T]) -> Result<usize> {
        let encoded = docs.iter().map(encode_existing).collect::<Result<Vec<_>>>()?;
        let sql = format!("UPDATE {} SET doc = ?1 WHERE _id = ?2", self.table);
        self.db.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (id, body) in &encoded {
                    changed += stmt.execute([body, id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Delete by id; returns `false` when nothing was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE _id = ?1", self.table);
        let removed = self
            .db
            .with_connection(|conn| Ok(conn.execute(&sql, [id])?))?;
        Ok(removed > 0)
    }

    pub fn delete_many(&self, query: &Query) -> Result<usize> {
        let (filter, params) = query.to_sql(json_field)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table, filter);
        self.db.with_connection(|conn| {
            Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
        })
    }

    pub fn count(&self) -> Result<usize> {
        let sql = format!("SELECT count(*) FROM {}", self.table);
        let count: i64 = self
            .db
            .with_connection(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Index a JSON field. With `unique`, documents sharing a value for the
    /// field are rejected from then on.
    pub fn ensure_index(&self, field: &str, unique: bool) -> Result<()> {
        let expr = json_field(field)?;
        let index = quote_ident(&format!("{}__{}", self.name, field.replace('.', "_")))?;
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            index,
            self.table,
            expr
        );
        self.db.with_connection(|conn| Ok(conn.execute_batch(&sql)?))?;
        info!(collection = %self.name, field, unique, "index ensured");
        Ok(())
    }

    fn select(&self, filter: &str, mut params: Vec<Value>, limit: Option<i64>) -> Result<Vec<T>> {
        let mut sql = format!(
            "SELECT doc FROM {} WHERE {} ORDER BY rowid",
            self.table, filter
        );
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit));
        }
        let bodies: Vec<String> = self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let bodies = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(bodies)
        })?;
        bodies.iter().map(|b| decode(b)).collect()
    }
}

impl<T> std::fmt::Debug for Collection<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.db.alias())
            .field("name", &self.name)
            .finish()
    }
}

impl ConnectionManager {
    /// Create (or extend) collection `name` in the database under `alias`.
    ///
    /// With no documents a single `T::default()` is inserted so the
    /// collection is materialised with a representative document. The alias
    /// must already be registered. Returns the number of documents written.
    pub fn create_collection<T>(&self, alias: &str, name: &str, docs: &[T]) -> Result<usize>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let db = self.get_or_create(alias, false)?;
        let collection = db.collection::<T>(name)?;
        let written = if docs.is_empty() {
            collection.insert(&T::default())?;
            1
        } else {
            collection.insert_many(docs)?.len()
        };
        info!(alias = %db.alias(), collection = name, documents = written, "collection created");
        Ok(written)
    }

    /// Collection names of the database under `alias`.
    pub fn collection_names(&self, alias: &str) -> Result<Vec<String>> {
        self.get_or_create(alias, false)?.collection_names()
    }
}

/// Read a JSON file into `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn validate_collection_name(name: &str) -> Result<String> {
    let name = name.trim();
    let reserved = name.starts_with("__") || name.to_ascii_lowercase().starts_with("sqlite_");
    if name.is_empty() || reserved {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(name.to_string())
}

fn catalog_exists(conn: &rusqlite::Connection) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [CATALOG_TABLE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `json_extract` expression for a dotted field path.
fn json_field(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        return Err(Error::InvalidIdentifier(field.to_string()));
    }
    Ok(format!("json_extract(doc, '$.{}')", field))
}

/// Serialize `doc`, assigning an id when it has none.
fn encode<T: Serialize>(doc: &T) -> Result<(String, String)> {
    let mut object = to_object(doc)?;
    let id = match object.get(ID_FIELD) {
        None | Some(Json::Null) => {
            let id = Uuid::new_v4().simple().to_string();
            object.insert(ID_FIELD.to_string(), Json::String(id.clone()));
            id
        }
        Some(existing) => id_text(existing)?,
    };
    Ok((id, Json::Object(object).to_string()))
}

/// Serialize a document that must already carry an id.
fn encode_existing<T: Serialize>(doc: &T) -> Result<(String, String)> {
    let object = to_object(doc)?;
    let id = match object.get(ID_FIELD) {
        None | Some(Json::Null) => {
            return Err(Error::InvalidDocument(format!("document has no {}", ID_FIELD)))
        }
        Some(existing) => id_text(existing)?,
    };
    Ok((id, Json::Object(object).to_string()))
}

fn to_object<T: Serialize>(doc: &T) -> Result<Map<String, Json>> {
    match serde_json::to_value(doc)? {
        Json::Object(object) => Ok(object),
        other => Err(Error::InvalidDocument(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn id_text(id: &Json) -> Result<String> {
    match id {
        Json::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Json::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(Error::InvalidDocument(format!("unusable {}: {}", ID_FIELD, other))),
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    Ok(serde_json::from_str(body)?)
}

fn row_to_json(row: sql::Row) -> Result<Json> {
    if row.len() == 1 {
        if let Some(Value::Text(body)) = row.get("doc") {
            if let Ok(doc @ Json::Object(_)) = serde_json::from_str::<Json>(body) {
                return Ok(doc);
            }
        }
    }
    let mut object = Map::with_capacity(row.len());
    for (column, value) in row {
        let json = match value {
            Value::Null => Json::Null,
            Value::Integer(i) => Json::from(i),
            Value::Real(f) => Json::from(f),
            Value::Boolean(b) => Json::Bool(b),
            Value::Text(t) => serde_json::from_str::<Json>(&t)
                .ok()
                .filter(|j| j.is_object() || j.is_array())
                .unwrap_or(Json::String(t)),
            Value::Blob(bytes) => Json::from(bytes),
        };
        object.insert(column, json);
    }
    Ok(Json::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    }

    #[test]
    fn test_encode_assigns_missing_id() {
        let (id, body) = encode(&Note {
            id: None,
            text: "hi".into(),
        })
        .unwrap();
        assert_eq!(id.len(), 32);
        let decoded: Note = decode(&body).unwrap();
        assert_eq!(decoded.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_encode_keeps_integer_id() {
        let (id, _) = encode(&serde_json::json!({"_id": 7, "n": 1})).unwrap();
        assert_eq!(id, "7");
    }

    #[test]
    fn test_rejects_non_objects_and_missing_ids() {
        assert!(matches!(encode(&vec![1, 2]), Err(Error::InvalidDocument(_))));
        assert!(matches!(
            encode_existing(&serde_json::json!({"text": "x"})),
            Err(Error::InvalidDocument(_))
        ));
        assert!(matches!(
            encode(&serde_json::json!({"_id": true})),
            Err(Error::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_json_field_paths() {
        assert_eq!(
            json_field("address.city").unwrap(),
            "json_extract(doc, '$.address.city')"
        );
        assert!(json_field("a'b").is_err());
        assert!(json_field("a..b").is_err());
        assert!(validate_collection_name("__files").is_err());
        assert!(validate_collection_name(" people ").is_ok());
    }
}
