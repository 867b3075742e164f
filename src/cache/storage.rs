//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CachedSnapshot, RequestKey, ResponseSnapshot};
use crate::http::ResponseKind;

/// Trait for persistent cache store backends.
///
/// A store holds any number of named partitions, each a key-value map from
/// request identity to response snapshot. Writes are atomic per entry.
pub trait CacheStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Store a single entry, replacing any previous one under the same key.
  fn put(&self, partition: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store a batch of entries. Either every entry is written or none is.
  fn put_all(&self, partition: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Look up a single entry.
  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>>;

  /// Names of every partition in the store, in name order.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Remove a partition and all of its entries. Returns whether it existed.
  fn delete(&self, partition: &str) -> Result<bool>;
}

/// SQLite-based cache store implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachewarden").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named partitions
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, one per (partition, request)
CREATE TABLE IF NOT EXISTS entries (
    partition_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, key_hash)
);
"#;

fn insert_entry(
  conn: &Connection,
  partition: &str,
  key: &RequestKey,
  snapshot: &ResponseSnapshot,
) -> Result<()> {
  // Header values are stored as JSON byte arrays
  let headers = serde_json::to_string(&snapshot.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (partition_name, key_hash, request_key, status, status_text, headers, body, kind, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key.cache_hash(),
        key.as_str(),
        snapshot.status,
        snapshot.status_text,
        headers,
        snapshot.body,
        snapshot.kind.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {} in {}: {}", key, partition, e))?;

  Ok(())
}

impl CacheStore for SqliteStorage {
  fn open(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    Ok(())
  }

  fn put(&self, partition: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_entry(&conn, partition, key, snapshot)
  }

  fn put_all(&self, partition: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, snapshot) in entries {
      insert_entry(&tx, partition, key, snapshot)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, kind, cached_at FROM entries
         WHERE partition_name = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String, String)> = stmt
      .query_row(params![partition, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))?;

    let Some((status, status_text, headers, body, kind, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, Vec<u8>)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CachedSnapshot {
      snapshot: ResponseSnapshot {
        status,
        status_text,
        headers,
        body,
        kind: ResponseKind::parse(&kind)?,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, partition: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM entries WHERE partition_name = ?",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;

    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::for_url(&Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  fn snapshot(body: &str) -> ResponseSnapshot {
    ResponseSnapshot {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![
        ("content-type".to_string(), b"text/css".to_vec()),
        ("x-trace".to_string(), b"a".to_vec()),
      ],
      body: body.as_bytes().to_vec(),
      kind: ResponseKind::Basic,
    }
  }

  #[test]
  fn test_put_then_get_is_identical() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entry = snapshot("body { color: red }");

    storage.put("app-static-v1", &key("/style.css"), &entry).unwrap();

    let cached = storage
      .get("app-static-v1", &key("/style.css"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.snapshot, entry);
    assert!(storage.get("app-dynamic-v1", &key("/style.css")).unwrap().is_none());
  }

  #[test]
  fn test_non_utf8_header_survives_storage() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut entry = snapshot("x");
    entry.headers.push(("x-name".to_string(), b"caf\xE9".to_vec()));

    storage.put("p", &key("/x.css"), &entry).unwrap();

    let cached = storage.get("p", &key("/x.css")).unwrap().unwrap();
    assert_eq!(cached.snapshot.headers, entry.headers);
  }

  #[test]
  fn test_put_overwrites() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("p", &key("/a.js"), &snapshot("one")).unwrap();
    storage.put("p", &key("/a.js"), &snapshot("two")).unwrap();

    let cached = storage.get("p", &key("/a.js")).unwrap().unwrap();
    assert_eq!(cached.snapshot.body, b"two");
  }

  #[test]
  fn test_list_and_delete() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("app-static-v2").unwrap();
    storage.put("app-static-v1", &key("/"), &snapshot("old")).unwrap();
    storage.open("other").unwrap();

    assert_eq!(
      storage.list_names().unwrap(),
      vec!["app-static-v1", "app-static-v2", "other"]
    );

    assert!(storage.delete("app-static-v1").unwrap());
    assert!(!storage.delete("app-static-v1").unwrap());
    assert!(storage.get("app-static-v1", &key("/")).unwrap().is_none());
    assert_eq!(storage.list_names().unwrap(), vec!["app-static-v2", "other"]);
  }

  #[test]
  fn test_put_all_writes_batch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (key("/"), snapshot("root")),
      (key("/logo.png"), snapshot("png")),
    ];

    storage.put_all("app-static-v1", &entries).unwrap();

    for (k, s) in &entries {
      assert_eq!(&storage.get("app-static-v1", k).unwrap().unwrap().snapshot, s);
    }
  }
}
