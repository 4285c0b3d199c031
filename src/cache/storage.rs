//! Cache storage backends: SQLite for persistence, memory for ephemeral runs.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{normalize_url, variance, CacheKey, CacheStorage, CachedEntry};
use crate::http::{Headers, Request, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// A private database that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
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

    Ok(data_dir.join("encore-offline").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named generations, in creation order
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by (generation, hash of method + url + variance)
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    variance TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_lookup ON entries(generation, method, url);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, generation: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;

    Ok(())
  }

  fn has(&self, generation: &str) -> Result<bool> {
    let found: Option<i64> = self
      .conn()?
      .query_row(
        "SELECT id FROM generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query generation {}: {}", generation, e))?;

    Ok(found.is_some())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    let key = CacheKey::for_entry(request, response);
    let vary = serde_json::to_string(&response.vary())
      .map_err(|e| eyre!("Failed to serialize vary: {}", e))?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries
         (generation, key_hash, method, url, vary, variance,
          status, headers, body, response_type, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key.hash(),
        key.method.as_str(),
        key.url,
        vary,
        key.variance,
        response.status,
        headers,
        response.body,
        response.response_type.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT vary, variance, status, headers, body, response_type, cached_at FROM entries
         WHERE generation = ? AND method = ? AND url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(
        params![generation, request.method.as_str(), normalize_url(request)],
        |row| {
          Ok(StoredRow {
            vary: row.get(0)?,
            variance: row.get(1)?,
            status: row.get(2)?,
            headers: row.get(3)?,
            body: row.get(4)?,
            response_type: row.get(5)?,
            cached_at: row.get(6)?,
          })
        },
      )
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    for row in rows {
      let vary: Vec<String> =
        serde_json::from_str(&row.vary).map_err(|e| eyre!("Failed to parse vary: {}", e))?;
      if variance(&vary, request) != row.variance {
        continue;
      }

      let headers: Headers = serde_json::from_str(&row.headers)
        .map_err(|e| eyre!("Failed to parse headers: {}", e))?;

      return Ok(Some(CachedEntry {
        response: Response {
          status: row.status,
          headers,
          body: row.body,
          response_type: row.response_type.parse()?,
        },
        cached_at: parse_datetime(&row.cached_at)?,
      }));
    }

    Ok(None)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }
}

struct StoredRow {
  vary: String,
  variance: String,
  status: u16,
  headers: String,
  body: Vec<u8>,
  response_type: String,
  cached_at: String,
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  generations: Mutex<Vec<MemoryGeneration>>,
}

struct MemoryGeneration {
  name: String,
  entries: HashMap<String, MemoryEntry>,
}

struct MemoryEntry {
  key: CacheKey,
  vary: Vec<String>,
  entry: CachedEntry,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn generations(&self) -> Result<MutexGuard<'_, Vec<MemoryGeneration>>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn open_in(generations: &mut Vec<MemoryGeneration>, name: &str) -> usize {
  match generations.iter().position(|g| g.name == name) {
    Some(index) => index,
    None => {
      generations.push(MemoryGeneration {
        name: name.to_string(),
        entries: HashMap::new(),
      });
      generations.len() - 1
    }
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, generation: &str) -> Result<()> {
    let mut generations = self.generations()?;
    open_in(&mut generations, generation);
    Ok(())
  }

  fn has(&self, generation: &str) -> Result<bool> {
    Ok(self.generations()?.iter().any(|g| g.name == generation))
  }

  fn names(&self) -> Result<Vec<String>> {
    Ok(self.generations()?.iter().map(|g| g.name.clone()).collect())
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut generations = self.generations()?;
    let before = generations.len();
    generations.retain(|g| g.name != generation);
    Ok(generations.len() != before)
  }

  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    let key = CacheKey::for_entry(request, response);
    let mut generations = self.generations()?;
    let index = open_in(&mut generations, generation);

    generations[index].entries.insert(
      key.hash(),
      MemoryEntry {
        key,
        vary: response.vary(),
        entry: CachedEntry {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      },
    );

    Ok(())
  }

  fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let generations = self.generations()?;
    let Some(found) = generations.iter().find(|g| g.name == generation) else {
      return Ok(None);
    };

    let url = normalize_url(request);
    let entry = found.entries.values().find(|e| {
      e.key.method == request.method
        && e.key.url == url
        && e.key.variance == variance(&e.vary, request)
    });

    Ok(entry.map(|e| e.entry.clone()))
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    Ok(
      self
        .generations()?
        .iter()
        .find(|g| g.name == generation)
        .map(|g| g.entries.len())
        .unwrap_or(0),
    )
  }
}
