//! Cache store implementations: SQLite on disk and an in-memory map.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CacheError, CacheResult};
use crate::net::{Response, ResponseKind};

use super::traits::{CacheStore, GenerationHandle, StoredResponse};

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> CacheResult<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path, creating parent directories.
  pub fn open_at(path: &Path) -> CacheResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::store("Failed to create cache directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::store(&format!("Failed to open cache database at {}", path.display()), e)
    })?;

    Self::from_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  pub fn in_memory() -> CacheResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::store("Failed to open in-memory database", e))?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> CacheResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::StoreUnavailable {
        message: "Could not determine data directory".to_string(),
      })?;

    Ok(data_dir.join("offline-cache").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> CacheResult<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::store("Failed to run cache migrations", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::store("Lock poisoned", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, url)
);
"#;

const INSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries (generation, url, status, kind, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, datetime('now'))";

fn insert_entry(
  conn: &Connection,
  generation: &str,
  url: &str,
  response: &Response,
) -> CacheResult<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| CacheError::store("Failed to serialize headers", e))?;

  conn
    .execute(
      INSERT_ENTRY,
      params![
        generation,
        url,
        response.status,
        response.kind.as_str(),
        headers,
        &response.body[..]
      ],
    )
    .map_err(|e| CacheError::store(&format!("Failed to store {}", url), e))?;

  Ok(())
}

impl CacheStore for SqliteStore {
  fn open_generation(&self, id: &str) -> CacheResult<GenerationHandle> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![id],
      )
      .map_err(|e| CacheError::store(&format!("Failed to open generation {}", id), e))?;

    Ok(GenerationHandle::new(id))
  }

  fn list_keys(&self, generation: &GenerationHandle) -> CacheResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM entries WHERE generation = ? ORDER BY rowid")
      .map_err(|e| CacheError::store("Failed to prepare query", e))?;

    let keys = stmt
      .query_map(params![generation.id()], |row| row.get(0))
      .map_err(|e| CacheError::store("Failed to list keys", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| CacheError::store("Failed to read key", e))?;

    Ok(keys)
  }

  fn get(&self, generation: &GenerationHandle, url: &str) -> CacheResult<Option<StoredResponse>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, kind, headers, body, cached_at FROM entries
         WHERE generation = ? AND url = ?",
      )
      .map_err(|e| CacheError::store("Failed to prepare query", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![generation.id(), url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| CacheError::store(&format!("Failed to read {}", url), e))?;

    let Some((status, kind, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let kind: ResponseKind = kind
      .parse()
      .map_err(|e: String| CacheError::store(&format!("Corrupt entry for {}", url), e))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| CacheError::store(&format!("Corrupt headers for {}", url), e))?;

    Ok(Some(StoredResponse {
      response: Response {
        status,
        headers,
        body: body.into(),
        kind,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, generation: &GenerationHandle, url: &str, response: &Response) -> CacheResult<()> {
    let conn = self.lock()?;
    insert_entry(&conn, generation.id(), url, response)
  }

  fn put_all(
    &self,
    generation: &GenerationHandle,
    entries: &[(String, Response)],
  ) -> CacheResult<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::store("Failed to begin transaction", e))?;

    for (url, response) in entries {
      insert_entry(&tx, generation.id(), url, response)?;
    }

    tx.commit()
      .map_err(|e| CacheError::store("Failed to commit transaction", e))
  }

  fn delete_generation(&self, id: &str) -> CacheResult<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::store("Failed to begin transaction", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![id])
      .map_err(|e| CacheError::store(&format!("Failed to delete entries of {}", id), e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![id])
      .map_err(|e| CacheError::store(&format!("Failed to delete generation {}", id), e))?;

    tx.commit()
      .map_err(|e| CacheError::store("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  fn list_generations(&self) -> CacheResult<BTreeSet<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations")
      .map_err(|e| CacheError::store("Failed to prepare query", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| CacheError::store("Failed to list generations", e))?
      .collect::<Result<BTreeSet<String>, _>>()
      .map_err(|e| CacheError::store("Failed to read generation", e))?;

    Ok(names)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> CacheResult<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::store(&format!("Failed to parse datetime '{}'", s), e))
}

type Generation = Vec<(String, StoredResponse)>;

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<BTreeMap<String, Generation>>,
  #[cfg(test)]
  unavailable: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every following call fail with `StoreUnavailable`.
  #[cfg(test)]
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, BTreeMap<String, Generation>>> {
    #[cfg(test)]
    {
      if self.unavailable.load(Ordering::SeqCst) {
        return Err(CacheError::StoreUnavailable {
          message: "memory store switched off".to_string(),
        });
      }
    }

    self
      .generations
      .lock()
      .map_err(|e| CacheError::store("Lock poisoned", e))
  }
}

fn upsert(entries: &mut Generation, url: &str, response: &Response) {
  let stored = StoredResponse {
    response: response.clone(),
    cached_at: Utc::now(),
  };
  // Replacing moves the entry to the end, matching the SQLite insertion order
  entries.retain(|(key, _)| key != url);
  entries.push((url.to_string(), stored));
}

impl CacheStore for MemoryStore {
  fn open_generation(&self, id: &str) -> CacheResult<GenerationHandle> {
    self.lock()?.entry(id.to_string()).or_default();
    Ok(GenerationHandle::new(id))
  }

  fn list_keys(&self, generation: &GenerationHandle) -> CacheResult<Vec<String>> {
    Ok(
      self
        .lock()?
        .get(generation.id())
        .map(|entries| entries.iter().map(|(url, _)| url.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn get(&self, generation: &GenerationHandle, url: &str) -> CacheResult<Option<StoredResponse>> {
    Ok(self.lock()?.get(generation.id()).and_then(|entries| {
      entries
        .iter()
        .find(|(key, _)| key == url)
        .map(|(_, stored)| stored.clone())
    }))
  }

  fn put(&self, generation: &GenerationHandle, url: &str, response: &Response) -> CacheResult<()> {
    let mut generations = self.lock()?;
    let entries = generations.entry(generation.id().to_string()).or_default();
    upsert(entries, url, response);
    Ok(())
  }

  fn put_all(
    &self,
    generation: &GenerationHandle,
    batch: &[(String, Response)],
  ) -> CacheResult<()> {
    let mut generations = self.lock()?;
    let entries = generations.entry(generation.id().to_string()).or_default();
    for (url, response) in batch {
      upsert(entries, url, response);
    }
    Ok(())
  }

  fn delete_generation(&self, id: &str) -> CacheResult<bool> {
    Ok(self.lock()?.remove(id).is_some())
  }

  fn list_generations(&self) -> CacheResult<BTreeSet<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }
}
