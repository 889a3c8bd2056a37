//! Persistent metadata store boundary and the shipped backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use crate::entry::CacheEntry;

/// Key-value store the cache persists entries into.
///
/// The store holds entries as opaque JSON under namespaced keys. Writing
/// `None` stores an explicit null: in storage it is distinguishable from a
/// key that was never populated, but both read back as `Ok(None)`.
pub trait MetadataStore: Send + Sync {
  /// Idempotent setup. Safe (and expected) to be called before every
  /// operation; only the first call does real work.
  fn initialize(&self) -> Result<()>;

  /// Read the entry persisted at `store_key`, if any.
  fn get_metadata<T: DeserializeOwned>(&self, store_key: &str) -> Result<Option<CacheEntry<T>>>;

  /// Persist `entry` at `store_key`. `None` writes an explicit null,
  /// marking the key as invalidated.
  fn set_metadata<T: Serialize>(
    &self,
    store_key: &str,
    entry: Option<&CacheEntry<T>>,
  ) -> Result<()>;

  /// Every key currently persisted, cache-namespaced or not.
  fn metadata_keys(&self) -> Result<Vec<String>>;
}

/// In-memory store backed by a `HashMap`. Ephemeral; useful for tests and
/// for hosts that want caching semantics without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl MetadataStore for MemoryStore {
  fn initialize(&self) -> Result<()> {
    Ok(())
  }

  fn get_metadata<T: DeserializeOwned>(&self, store_key: &str) -> Result<Option<CacheEntry<T>>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    match entries.get(store_key) {
      // An explicit null (invalidated) reads the same as an absent key
      None | Some(serde_json::Value::Null) => Ok(None),
      Some(value) => {
        let entry: CacheEntry<T> = serde_json::from_value(value.clone())
          .map_err(|e| eyre!("Failed to deserialize entry at {}: {}", store_key, e))?;
        Ok(Some(entry))
      }
    }
  }

  fn set_metadata<T: Serialize>(
    &self,
    store_key: &str,
    entry: Option<&CacheEntry<T>>,
  ) -> Result<()> {
    let value = match entry {
      Some(entry) => serde_json::to_value(entry)
        .map_err(|e| eyre!("Failed to serialize entry at {}: {}", store_key, e))?,
      None => serde_json::Value::Null,
    };

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(store_key.to_string(), value);

    Ok(())
  }

  fn metadata_keys(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.keys().cloned().collect())
  }
}

/// SQLite-backed store holding entries as JSON text in a single
/// key-value table.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  initialized: AtomicBool,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      initialized: AtomicBool::new(false),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("metadata.db"))
  }
}

/// Schema for the metadata table.
const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl MetadataStore for SqliteStore {
  fn initialize(&self) -> Result<()> {
    if self.initialized.load(Ordering::Acquire) {
      return Ok(());
    }

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute_batch(METADATA_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    self.initialized.store(true, Ordering::Release);
    Ok(())
  }

  fn get_metadata<T: DeserializeOwned>(&self, store_key: &str) -> Result<Option<CacheEntry<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let text: Option<String> = conn
      .query_row(
        "SELECT value FROM metadata WHERE key = ?",
        params![store_key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", store_key, e))?;

    match text {
      None => Ok(None),
      Some(text) => {
        // "null" is an explicit invalidation marker and reads as a miss
        let entry: Option<CacheEntry<T>> = serde_json::from_str(&text)
          .map_err(|e| eyre!("Failed to deserialize entry at {}: {}", store_key, e))?;
        Ok(entry)
      }
    }
  }

  fn set_metadata<T: Serialize>(
    &self,
    store_key: &str,
    entry: Option<&CacheEntry<T>>,
  ) -> Result<()> {
    let text = match entry {
      Some(entry) => serde_json::to_string(entry)
        .map_err(|e| eyre!("Failed to serialize entry at {}: {}", store_key, e))?,
      None => "null".to_string(),
    };

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
        params![store_key, text],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", store_key, e))?;

    Ok(())
  }

  fn metadata_keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM metadata")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entry::store_key;
  use chrono::Duration;
  use serde::Deserialize;
  use tempfile::TempDir;

  #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
  struct Payload {
    name: String,
    value: i32,
  }

  fn sample() -> Payload {
    Payload {
      name: "test".to_string(),
      value: 42,
    }
  }

  #[test]
  fn test_memory_round_trip() {
    let store = MemoryStore::new();
    store.initialize().unwrap();

    let entry = CacheEntry::new("k", sample(), Duration::minutes(5));
    store.set_metadata(&store_key("k"), Some(&entry)).unwrap();

    let read: CacheEntry<Payload> = store.get_metadata(&store_key("k")).unwrap().unwrap();
    assert_eq!(read.data, sample());
    assert_eq!(read.expires_at, entry.expires_at);
  }

  #[test]
  fn test_memory_explicit_null_reads_as_miss() {
    let store = MemoryStore::new();
    let entry = CacheEntry::new("k", sample(), Duration::minutes(5));
    store.set_metadata(&store_key("k"), Some(&entry)).unwrap();

    store
      .set_metadata::<Payload>(&store_key("k"), None)
      .unwrap();

    let read: Option<CacheEntry<Payload>> = store.get_metadata(&store_key("k")).unwrap();
    assert!(read.is_none());
    // The tombstone is still physically present
    assert_eq!(store.metadata_keys().unwrap(), vec![store_key("k")]);
  }

  #[test]
  fn test_sqlite_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();
    store.initialize().unwrap();

    let entry = CacheEntry::new("k", sample(), Duration::minutes(5));
    store.set_metadata(&store_key("k"), Some(&entry)).unwrap();

    let read: CacheEntry<Payload> = store.get_metadata(&store_key("k")).unwrap().unwrap();
    assert_eq!(read.data, sample());
    assert_eq!(read.timestamp, entry.timestamp);
  }

  #[test]
  fn test_sqlite_null_and_missing_both_miss() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();
    store.initialize().unwrap();

    let never: Option<CacheEntry<Payload>> = store.get_metadata(&store_key("never")).unwrap();
    assert!(never.is_none());

    let entry = CacheEntry::new("k", sample(), Duration::minutes(5));
    store.set_metadata(&store_key("k"), Some(&entry)).unwrap();
    store
      .set_metadata::<Payload>(&store_key("k"), None)
      .unwrap();

    let nulled: Option<CacheEntry<Payload>> = store.get_metadata(&store_key("k")).unwrap();
    assert!(nulled.is_none());
    assert!(store.metadata_keys().unwrap().contains(&store_key("k")));
  }

  #[test]
  fn test_sqlite_initialize_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();

    store.initialize().unwrap();
    store.initialize().unwrap();
    store.initialize().unwrap();

    assert!(store.metadata_keys().unwrap().is_empty());
  }
}
