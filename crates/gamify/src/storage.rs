//! Namespaced key/value persistence.
//!
//! Adapters never fail from the caller's point of view. A write that cannot
//! be completed is logged and dropped, a read that cannot be completed returns
//! nothing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const PROBE_KEY: &str = "__probe__";

/// Key/value store scoped to a prefix.
///
/// Values are JSON strings. Typed `get`/`set` helpers live on `dyn StorageAdapter`.
pub trait StorageAdapter: Send + Sync + fmt::Debug {
    /// Read the raw value stored under `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store a raw value under `key`.
    fn set_item(&self, key: &str, value: &str);

    /// Delete `key`.
    fn remove_item(&self, key: &str);

    /// Delete every key under this adapter's prefix, and nothing else.
    fn clear(&self);

    /// Whether values survive a process restart.
    fn is_durable(&self) -> bool;
}

impl dyn StorageAdapter {
    /// Read and deserialize a value. Undecodable values read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_item(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "discarding undecodable stored value");
                None
            }
        }
    }

    /// Serialize and store a value.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_item(key, &raw),
            Err(e) => debug!(key, error = %e, "value not serializable, write skipped"),
        }
    }

    /// Delete a value.
    pub fn remove(&self, key: &str) {
        self.remove_item(key)
    }
}

/// Open durable storage under `dir`, or fall back to memory.
///
/// The directory is probed once with a write and a delete. Any failure, or no
/// directory at all, yields a [`MemoryStorage`].
pub fn open_storage(dir: Option<&Path>, prefix: &str) -> Arc<dyn StorageAdapter> {
    let Some(dir) = dir else {
        debug!("no storage directory configured, using in-memory storage");
        return Arc::new(MemoryStorage::new(prefix));
    };

    match FileStorage::open(dir, prefix) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            warn!(
                dir = %dir.display(),
                error = %e,
                "durable storage unavailable, falling back to in-memory storage"
            );
            Arc::new(MemoryStorage::new(prefix))
        }
    }
}

/// Replace anything outside `[A-Za-z0-9_.-]` so keys are safe file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================
// FILE STORAGE
// ============================================

/// Durable storage: one JSON file per key, at `{dir}/{prefix}/{key}.json`.
///
/// Each prefix owns its own subdirectory, so `clear` on `gamify_` never
/// reaches the files of `gamify_admin_`. Writes are synchronous and replace
/// the whole file through a temp file and a rename; callers writing large
/// values on every change pay that cost on their own thread.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create the prefix directory if needed and verify it accepts writes.
    pub fn open(dir: impl Into<PathBuf>, prefix: &str) -> io::Result<Self> {
        let prefix = sanitize(prefix);
        if prefix.chars().all(|c| c == '.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "storage prefix must name a directory",
            ));
        }

        let dir: PathBuf = dir.into();
        let dir = dir.join(prefix);
        fs::create_dir_all(&dir)?;

        let storage = Self { dir };

        storage.try_write(PROBE_KEY, "1")?;
        storage.try_remove(PROBE_KEY)?;

        Ok(storage)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(key)))
    }

    fn try_write(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn try_remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn try_clear(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let ours = name.ends_with(".json") || name.ends_with(".json.tmp");
            if ours && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

impl StorageAdapter for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(key, error = %e, "storage read failed");
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) {
        if let Err(e) = self.try_write(key, value) {
            debug!(key, error = %e, "storage write failed");
        }
    }

    fn remove_item(&self, key: &str) {
        if let Err(e) = self.try_remove(key) {
            debug!(key, error = %e, "storage remove failed");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.try_clear() {
            debug!(error = %e, "storage clear failed");
        }
    }

    fn is_durable(&self) -> bool {
        true
    }
}

// ============================================
// MEMORY STORAGE
// ============================================

/// Volatile storage used when nothing durable is available.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<(String, String), String>>>,
    prefix: String,
}

impl MemoryStorage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            prefix: prefix.into(),
        }
    }

    /// Another view over the same backing map, under a different prefix.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            items: self.items.clone(),
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> (String, String) {
        (self.prefix.clone(), key.to_owned())
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items().get(&self.full_key(key)).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        let key = self.full_key(key);
        self.items().insert(key, value.to_owned());
    }

    fn remove_item(&self, key: &str) {
        let key = self.full_key(key);
        self.items().remove(&key);
    }

    fn clear(&self) {
        let prefix = &self.prefix;
        self.items().retain(|(owner, _), _| owner != prefix);
    }

    fn is_durable(&self) -> bool {
        false
    }
}
