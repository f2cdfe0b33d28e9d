/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::record::Kind;

/// String-keyed blob store backing the offline cache and the vote ledgers.
///
/// Reads never fail: a missing or unreadable key is simply absent.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn records_key(kind: Kind) -> String {
    format!("records:{}", kind.tag())
}

pub fn votes_key(kind: Kind, user_id: &str) -> String {
    format!("votes:{}:{}", kind.tag(), user_id)
}

/// Reads a JSON value, treating missing keys and malformed JSON as the default.
pub fn load_json<T: DeserializeOwned + Default>(store: &dyn LocalStore, key: &str) -> T {
    let Some(raw) = store.get(key) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(key, "discarding malformed local state: {e}");
            T::default()
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("encode {key}"))?;
    store.set(key, &raw)
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        g.remove(key);
        Ok(())
    }
}

/// SQLite-backed store; one short-lived connection per call.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir: {}", parent.display()))?;
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS local_kv (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = Connection::open(&self.path)?;
        conn.query_row(
            "SELECT value FROM local_kv WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, "local store read failed: {e:#}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            r#"
            INSERT INTO local_kv(key, value, updated_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE
              SET value=excluded.value, updated_at_ms=excluded.updated_at_ms
            "#,
            params![key, value, crate::record::now_ms()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute("DELETE FROM local_kv WHERE key=?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::OsRng, RngCore};

    fn temp_db() -> PathBuf {
        let mut b = [0u8; 8];
        OsRng.fill_bytes(&mut b);
        let name: String = b.iter().map(|v| format!("{v:02x}")).collect();
        std::env::temp_dir().join(format!("campus-store-{name}.db"))
    }

    #[test]
    fn missing_and_malformed_keys_read_as_default() {
        let store = MemoryStore::new();
        let empty: Vec<String> = load_json(&store, "records:conf");
        assert!(empty.is_empty());

        store.set("records:conf", "{not json").unwrap();
        let broken: Vec<String> = load_json(&store, "records:conf");
        assert!(broken.is_empty());
    }

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        save_json(&store, "k", &vec![1, 2, 3]).unwrap();
        let v: Vec<i32> = load_json(&store, "k");
        assert_eq!(v, vec![1, 2, 3]);
        store.remove("k").unwrap();
        assert!(store.get("k").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn sqlite_store_persists_across_handles() {
        let path = temp_db();
        {
            let store = SqliteStore::open(&path).unwrap();
            store.health_check().unwrap();
            store.set("votes:conf:alice", r#"{"a":"up"}"#).unwrap();
            store.set("votes:conf:alice", r#"{"a":"down"}"#).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("votes:conf:alice").as_deref(),
            Some(r#"{"a":"down"}"#)
        );
        store.remove("votes:conf:alice").unwrap();
        assert!(store.get("votes:conf:alice").is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn keys_are_namespaced_per_kind_and_user() {
        assert_eq!(records_key(Kind::LostFound), "records:lf");
        assert_ne!(
            votes_key(Kind::Confession, "alice"),
            votes_key(Kind::Confession, "bob")
        );
    }
}
