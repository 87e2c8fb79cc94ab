// ============================
// crates/backend-lib/src/store.rs
// ============================
//! Key-value store abstraction with in-memory and flat-file implementations.
//!
//! Keys hold a hash of string fields plus an optional list, with a per-key
//! TTL that is only refreshed explicitly. Expiry is enforced lazily on read;
//! `scan` returns raw key names and may include entries that a subsequent
//! `get` reports as gone. Consumers must tolerate both missing and extra
//! entries from a scan.
use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::fs as tokio_fs;

/// Trait for store backends.
///
/// Field updates are partial: fields not mentioned are preserved. Writing an
/// empty string clears a field (callers treat empty as absent). There is no
/// cross-key transactional guarantee.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read all fields of a key, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<HashMap<String, String>>, AppError>;

    /// Merge the given fields into a key, creating it if absent.
    async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), AppError>;

    /// Set or refresh the key's TTL. No-op for absent keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Remove a key and everything stored under it.
    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// List keys starting with `prefix`. Snapshot-ish: may race with
    /// concurrent mutation.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    /// Append a value to the key's list.
    async fn append_to_list(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Read the key's list in append order. Empty if absent or expired.
    async fn read_list(&self, key: &str) -> Result<Vec<String>, AppError>;
}

#[derive(Default)]
struct MemoryRecord {
    fields: HashMap<String, String>,
    list: Vec<String>,
    expires_at: Option<Instant>,
}

impl MemoryRecord {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process implementation of the [`Store`] trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, MemoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the key if its TTL elapsed, so reads never observe stale state.
    fn evict_if_expired(&self, key: &str) {
        let gone = self
            .records
            .get(key)
            .is_some_and(|record| record.expired());
        if gone {
            self.records.remove(key);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<HashMap<String, String>>, AppError> {
        self.evict_if_expired(key);
        Ok(self.records.get(key).map(|record| record.fields.clone()))
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), AppError> {
        self.evict_if_expired(key);
        let mut record = self.records.entry(key.to_string()).or_default();
        for (name, value) in fields {
            record
                .fields
                .insert((*name).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        if let Some(mut record) = self.records.get_mut(key) {
            record.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.records.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().expired())
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn append_to_list(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.evict_if_expired(key);
        let mut record = self.records.entry(key.to_string()).or_default();
        record.list.push(value.to_string());
        Ok(())
    }

    async fn read_list(&self, key: &str) -> Result<Vec<String>, AppError> {
        self.evict_if_expired(key);
        Ok(self
            .records
            .get(key)
            .map(|record| record.list.clone())
            .unwrap_or_default())
    }
}

/// On-disk representation of one key in the flat-file store.
#[derive(Serialize, Deserialize, Default)]
struct FileRecord {
    fields: HashMap<String, String>,
    list: Vec<String>,
    /// Unix seconds; absent means no TTL was set yet.
    expires_at: Option<u64>,
}

impl FileRecord {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| unix_now() >= at)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Flat-file implementation of the [`Store`] trait.
///
/// One JSON document per key under the data directory, TTL embedded in the
/// record and enforced on read. Mutations are serialized behind a single
/// lock, which is the per-key atomicity the registries rely on.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    async fn load(&self, key: &str) -> Result<Option<FileRecord>, AppError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        let record: FileRecord = serde_json::from_str(&content)
            .map_err(|e| AppError::StoreUnavailable(format!("corrupt record {key}: {e}")))?;
        if record.expired() {
            let _ = tokio_fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn save(&self, key: &str, record: &FileRecord) -> Result<(), AppError> {
        let json = serde_json::to_string(record)
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;
        tokio_fs::write(self.path_for(key), json).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<HashMap<String, String>>, AppError> {
        Ok(self.load(key).await?.map(|record| record.fields))
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(key).await?.unwrap_or_default();
        for (name, value) in fields {
            record
                .fields
                .insert((*name).to_string(), (*value).to_string());
        }
        self.save(key, &record).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut record) = self.load(key).await? {
            record.expires_at = Some(unix_now() + ttl.as_secs());
            self.save(key, &record).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key);
        if path.exists() {
            tokio_fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let mut keys = Vec::new();
        let mut entries = tokio_fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".json") {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn append_to_list(&self, key: &str, value: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(key).await?.unwrap_or_default();
        record.list.push(value.to_string());
        self.save(key, &record).await
    }

    async fn read_list(&self, key: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .load(key)
            .await?
            .map(|record| record.list)
            .unwrap_or_default())
    }
}
