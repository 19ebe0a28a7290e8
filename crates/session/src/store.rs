//! Key-value backends for session persistence
//!
//! `KeyValueStore` is the only capability the session layer needs from its
//! storage medium: load, save and clear a string under a key. Operations are
//! synchronous and total. A backend that cannot persist logs the failure and
//! keeps serving its in-memory state.
//!
//! `FileStore` keeps a JSON object on disk so a fresh process observes the
//! last written session. All writes use atomic temp-file + rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

/// Synchronous string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
    fn clear(&self, key: &str);

    /// Apply several changes as one update; `None` clears the key.
    ///
    /// Backends that persist should write once for the whole batch.
    fn apply(&self, changes: &[(&str, Option<&str>)]) {
        for (key, value) in changes {
            match value {
                Some(value) => self.save(key, value),
                None => self.clear(key),
            }
        }
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
    }

    fn clear(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

/// JSON-file store.
///
/// The file is read once at open; afterwards the in-memory map is the source
/// of truth and every mutation rewrites the file. Permissions are 0600 since
/// the file holds bearer tokens.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store; the file is created on first write.
    /// An unreadable or malformed file is an error so a corrupt session is
    /// never silently discarded.
    pub fn open(path: impl Into<PathBuf>) -> common::Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let entries: HashMap<String, String> =
                serde_json::from_str(&contents).map_err(|e| {
                    common::Error::Config(format!(
                        "parsing session file {}: {e}",
                        path.display()
                    ))
                })?;
            info!(path = %path.display(), keys = entries.len(), "loaded session file");
            entries
        } else {
            info!(path = %path.display(), "session file not found, starting without a session");
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Err(e) = write_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), error = %e, "failed to persist session file");
        }
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries);
    }

    fn clear(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        for (key, value) in changes {
            changed |= match value {
                Some(value) => {
                    let previous = entries.insert((*key).to_owned(), (*value).to_owned());
                    previous.as_deref() != Some(*value)
                }
                None => entries.remove(*key).is_some(),
            };
        }
        if changed {
            self.persist(&entries);
        }
    }
}

/// Write the map to `path` via a temp file in the same directory and a rename.
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(std::io::Error::other)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));
    std::fs::write(&tmp_path, json.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "persisted session file");
    Ok(())
}
