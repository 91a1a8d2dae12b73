//! Key-value backends that hold credential strings.
//!
//! `CredentialStore` pairs one persistent backend with one ephemeral backend.
//! Backends report failures; the store decides to absorb them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;
use tracing::debug;

use super::sealed::Sealer;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

/// A string key-value store. Writing `None` removes the key.
pub trait KeyValueBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StoreError>;

    /// Short name used in log fields.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Memory
// ============================================================================

/// Process-lifetime storage; the ephemeral store.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        match value {
            Some(v) => entries.insert(key.to_string(), v.to_string()),
            None => entries.remove(key),
        };
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// File
// ============================================================================

/// Credential file name in the cache directory
pub const CREDENTIAL_FILE: &str = "credentials.json";

/// JSON map on disk, rewritten atomically on every change.
pub struct FileBackend {
    path: PathBuf,
    sealer: Option<Sealer>,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            sealer: None,
            lock: Mutex::new(()),
        }
    }

    /// Encrypt the file at rest with a key derived from `passphrase`.
    pub fn sealed(path: PathBuf, passphrase: &str) -> Self {
        Self {
            sealer: Some(Sealer::new(passphrase)),
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read(&self.path)?;
        let plain = match self.sealer {
            Some(ref sealer) => sealer.open(&raw)?,
            None => raw,
        };
        serde_json::from_slice(&plain).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let contents = match self.sealer {
            Some(ref sealer) => sealer.seal(&json)?,
            None => json,
        };
        // Write tmp + rename so a crash never leaves a half-written file.
        let tmp_name = format!(
            "{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))?;
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))?;
        let mut entries = self.load()?;
        let changed = match value {
            Some(v) => entries.insert(key.to_string(), v.to_string()).as_deref() != Some(v),
            None => entries.remove(key).is_some(),
        };
        if changed {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain storage, one entry per key under a single service name.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl KeyValueBackend for KeyringBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let entry = self.entry(key)?;
        let result = match value {
            Some(v) => entry.set_password(v),
            None => match entry.delete_credential() {
                Err(keyring::Error::NoEntry) => {
                    debug!(key, "Keychain entry already absent");
                    Ok(())
                }
                other => other,
            },
        };
        result.map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

// ============================================================================
// Tests
// ============================================================================
