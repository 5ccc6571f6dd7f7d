// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent key-value storage.
//!
//! Everything the client keeps across restarts (token, username, privilege
//! flag, biometric enrollment marker, the query cache blob) lives behind the
//! [`KeyValueStore`] trait: synchronous, string keys, string values.
//!
//! [`FileStore`] keeps one JSON document on disk (`~/.catalock/store.json`
//! by default). Writes take an exclusive advisory lock, re-read the document,
//! apply their one change, write a temp file and rename it over the original,
//! so a crash never leaves a half-written store.
//! [`MemoryStore`] is the in-process variant used by tests and by hosts that
//! bring their own persistence.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::security::locks::{resilient_read, resilient_write};

/// Keys used in the persistent store.
pub mod keys {
    /// Bearer token of the current session.
    pub const TOKEN: &str = "token";
    /// Username of the current session.
    pub const USERNAME: &str = "username";
    /// Cached privilege flag ("1" or "0").
    pub const PRIVILEGED: &str = "is_privileged";
    /// Biometric enrollment marker. Logout never deletes it.
    pub const BIOMETRIC_ENROLLED: &str = "biometric_enrolled";
    /// Serialized remote-data cache.
    pub const QUERY_CACHE: &str = "query_cache";
}

/// Durable string-keyed storage.
///
/// Reads never fail: an unreadable value is reported as absent. Writes
/// return an error so callers can log it, but no caller treats a failed
/// write as fatal.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        resilient_read(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        resilient_write(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        resilient_write(&self.entries).remove(key);
        Ok(())
    }
}

/// JSON-file-backed store.
///
/// Several processes may share one file (a `watch` session and a one-shot
/// command, for example). Every mutation re-reads the document under the
/// exclusive lock and applies only its own key, so a writer never drops keys
/// another process wrote since this handle last looked. Reads are served
/// from memory and reloaded when the file's modification time or length changes.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<Snapshot>,
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: BTreeMap<String, String>,
    /// Modification time and length of the file when last read
    stamp: Option<(SystemTime, u64)>,
}

impl FileStore {
    /// Open the store at the default location (`~/.catalock/store.json`).
    pub fn open_default() -> Result<Self> {
        Self::open(default_store_path()?)
    }

    /// Open (or create) a store at `path`.
    ///
    /// A missing file is an empty store. A corrupt file is logged and also
    /// treated as empty; it is overwritten on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
            }
        }

        let snapshot = Snapshot {
            entries: read_entries(&path),
            stamp: file_stamp(&path),
        };
        tracing::debug!(target: "storage", path = %path.display(), keys = snapshot.entries.len(), "Opened store");

        Ok(Self {
            path,
            cache: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload from disk if another writer touched the file.
    fn refresh(&self) {
        let stamp = file_stamp(&self.path);
        if resilient_read(&self.cache).stamp == stamp {
            return;
        }
        let mut cache = resilient_write(&self.cache);
        cache.entries = read_entries(&self.path);
        cache.stamp = stamp;
    }

    /// Apply `change` to the on-disk document under the exclusive lock.
    ///
    /// The document is re-read after the lock is taken; only the keys
    /// `change` touches differ from what is on disk.
    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .context("Failed to lock store file")?;

        let result = (|| -> Result<()> {
            let mut entries = read_entries(&self.path);
            let changed = change(&mut entries);
            if changed {
                let content = serde_json::to_string_pretty(&entries).context("Failed to serialize store")?;
                let tmp_path = self.path.with_extension("tmp");
                let mut tmp = File::create(&tmp_path)
                    .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
                tmp.write_all(content.as_bytes())?;
                tmp.sync_all()?;
                fs::rename(&tmp_path, &self.path)
                    .with_context(|| format!("Failed to replace {}", self.path.display()))?;
            }

            let mut cache = resilient_write(&self.cache);
            cache.entries = entries;
            cache.stamp = file_stamp(&self.path);
            Ok(())
        })();

        if let Err(e) = FileExt::unlock(&lock_file) {
            tracing::warn!(target: "storage", "Failed to release store lock: {}", e);
        }
        result
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.refresh();
        resilient_read(&self.cache).entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

/// Read the document at `path`. Missing, unreadable and corrupt files all
/// read as empty.
fn read_entries(path: &Path) -> BTreeMap<String, String> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    target: "storage",
                    path = %path.display(),
                    "Store file is corrupt, starting empty: {}",
                    e
                );
                BTreeMap::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => {
            tracing::warn!(
                target: "storage",
                path = %path.display(),
                "Store file unreadable, starting empty: {}",
                e
            );
            BTreeMap::new()
        }
    }
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let metadata = fs::metadata(path).ok()?;
    Some((metadata.modified().ok()?, metadata.len()))
}

/// Directory holding catalock's config and store.
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".catalock"))
}

/// Default store path (`~/.catalock/store.json`).
pub fn default_store_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("store.json"))
}

/// Write a value, logging instead of failing. Session transitions use this:
/// a failed write must not abort a logout.
pub(crate) fn set_logged(store: &dyn KeyValueStore, key: &str, value: &str) {
    if let Err(e) = store.set(key, value) {
        tracing::warn!(target: "storage", key, "Failed to write key: {:#}", e);
    }
}

/// Delete a key, logging instead of failing.
pub(crate) fn delete_logged(store: &dyn KeyValueStore, key: &str) {
    if let Err(e) = store.delete(key) {
        tracing::warn!(target: "storage", key, "Failed to delete key: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(keys::TOKEN).is_none());

        store.set(keys::TOKEN, "abc").unwrap();
        assert_eq!(store.get(keys::TOKEN).as_deref(), Some("abc"));
        assert!(store.contains(keys::TOKEN));

        store.delete(keys::TOKEN).unwrap();
        assert!(store.get(keys::TOKEN).is_none());
        // Deleting an absent key is fine
        store.delete(keys::TOKEN).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set(keys::TOKEN, "tok").unwrap();
            store.set(keys::BIOMETRIC_ENROLLED, "1").unwrap();
            store.delete(keys::TOKEN).unwrap();
            store.set(keys::USERNAME, "emilys").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.get(keys::TOKEN).is_none());
        assert_eq!(reopened.get(keys::USERNAME).as_deref(), Some("emilys"));
        assert_eq!(reopened.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));
    }

    #[test]
    fn test_file_store_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get(keys::TOKEN).is_none());

        // First write replaces the corrupt document
        store.set(keys::USERNAME, "emilys").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("emilys"));
    }

    #[test]
    fn test_file_store_handles_do_not_clobber_each_other() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        // A long-running session and a separate enroll command
        let session = FileStore::open(&path).unwrap();
        session.set(keys::TOKEN, "tok").unwrap();
        let enroll = FileStore::open(&path).unwrap();
        enroll.set(keys::BIOMETRIC_ENROLLED, "1").unwrap();

        // The session handle sees the other writer's key
        assert_eq!(session.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));

        // Logout from the session handle keeps the marker on disk
        session.delete(keys::TOKEN).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.get(keys::TOKEN).is_none());
        assert_eq!(reopened.get(keys::BIOMETRIC_ENROLLED).as_deref(), Some("1"));
        assert!(enroll.get(keys::TOKEN).is_none());
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }
}
