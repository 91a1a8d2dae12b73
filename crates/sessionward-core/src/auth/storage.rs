//! Token pair persistence across a persistent and an ephemeral store.
//!
//! Exactly one store holds live credentials at a time. Every operation
//! degrades instead of failing: an unavailable backend reads as empty and
//! drops writes, with a warning in the log.
//!
//! Pair writes and reads are serialized by a store-wide lock, so a reader
//! never sees a pair that is half cleared or half written.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{
    FileBackend, KeyValueBackend, KeyringBackend, MemoryBackend, StoreError, CREDENTIAL_FILE,
};
use crate::config::{Config, DurableBackend, APP_NAME};

const ACCESS_KEY: &str = "access_token";
const REFRESH_KEY: &str = "refresh_token";
/// "1" when the user asked to be remembered; lives in the persistent store.
const REMEMBER_KEY: &str = "remember_me";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Whether credentials outlive the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Durability {
    Ephemeral,
    Persistent,
}

impl Durability {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Durability::Persistent
        } else {
            Durability::Ephemeral
        }
    }

    pub fn is_persistent(self) -> bool {
        self == Durability::Persistent
    }
}

/// What `read_initial` found on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialTokens {
    pub pair: TokenPair,
    pub durability: Durability,
}

pub struct CredentialStore {
    persistent: Box<dyn KeyValueBackend>,
    ephemeral: Box<dyn KeyValueBackend>,
    // Guards the token pair keys in both backends.
    pair_lock: RwLock<()>,
}

impl CredentialStore {
    pub fn new(persistent: Box<dyn KeyValueBackend>, ephemeral: Box<dyn KeyValueBackend>) -> Self {
        Self {
            persistent,
            ephemeral,
            pair_lock: RwLock::new(()),
        }
    }

    /// Both stores in memory; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    /// Persistent backend per config, memory for the ephemeral side.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let persistent: Box<dyn KeyValueBackend> = match config.durable_backend {
            DurableBackend::Keyring => Box::new(KeyringBackend::new(APP_NAME)),
            DurableBackend::File => {
                let path: PathBuf = config.cache_dir()?.join(CREDENTIAL_FILE);
                match Config::store_passphrase() {
                    Some(passphrase) => Box::new(FileBackend::sealed(path, &passphrase)),
                    None => Box::new(FileBackend::new(path)),
                }
            }
        };
        Ok(Self::new(persistent, Box::new(MemoryBackend::new())))
    }

    /// Replace the pair: wipe both stores, then write into the selected one.
    pub fn write(&self, pair: &TokenPair, durability: Durability) {
        let _guard = self.lock_write();
        self.wipe();
        let store = self.backend(durability);
        Self::safe_set(store, ACCESS_KEY, pair.access.as_deref());
        Self::safe_set(store, REFRESH_KEY, pair.refresh.as_deref());
        debug!(durability = ?durability, backend = store.name(), "Stored token pair");
    }

    /// Current pair, persistent store first, field by field.
    pub fn read_current(&self) -> TokenPair {
        let _guard = self.lock_read();
        TokenPair {
            access: self.read_either(ACCESS_KEY),
            refresh: self.read_either(REFRESH_KEY),
        }
    }

    /// Startup read honouring the durability preference. Falls back to the
    /// other store when the preferred one is empty and reports where the
    /// data was actually found.
    pub fn read_initial(&self) -> InitialTokens {
        let preferred = Durability::from_remember(self.remember());
        let fallback = match preferred {
            Durability::Persistent => Durability::Ephemeral,
            Durability::Ephemeral => Durability::Persistent,
        };

        let _guard = self.lock_read();
        for durability in [preferred, fallback] {
            let pair = self.pair_in(durability);
            if !pair.is_empty() {
                return InitialTokens { pair, durability };
            }
        }

        InitialTokens {
            pair: TokenPair::default(),
            durability: preferred,
        }
    }

    /// Wipe the token pair from both stores. Idempotent.
    pub fn clear(&self) {
        let _guard = self.lock_write();
        self.wipe();
    }

    /// The store that currently holds a credential, else the preference.
    pub fn current_durability(&self) -> Durability {
        let _guard = self.lock_read();
        if !self.pair_in(Durability::Persistent).is_empty() {
            Durability::Persistent
        } else if !self.pair_in(Durability::Ephemeral).is_empty() {
            Durability::Ephemeral
        } else {
            Durability::from_remember(self.remember())
        }
    }

    pub fn remember(&self) -> bool {
        Self::safe_get(self.persistent.as_ref(), REMEMBER_KEY).as_deref() == Some("1")
    }

    pub fn set_remember(&self, remember: bool) {
        Self::safe_set(
            self.persistent.as_ref(),
            REMEMBER_KEY,
            remember.then_some("1"),
        );
    }

    /// Pair held by one store only.
    pub fn read_from(&self, durability: Durability) -> TokenPair {
        let _guard = self.lock_read();
        self.pair_in(durability)
    }

    fn lock_read(&self) -> RwLockReadGuard<'_, ()> {
        self.pair_lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.pair_lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pair_in(&self, durability: Durability) -> TokenPair {
        let store = self.backend(durability);
        TokenPair {
            access: Self::safe_get(store, ACCESS_KEY),
            refresh: Self::safe_get(store, REFRESH_KEY),
        }
    }

    fn wipe(&self) {
        for store in [&self.persistent, &self.ephemeral] {
            Self::safe_set(store.as_ref(), ACCESS_KEY, None);
            Self::safe_set(store.as_ref(), REFRESH_KEY, None);
        }
    }

    fn backend(&self, durability: Durability) -> &dyn KeyValueBackend {
        match durability {
            Durability::Persistent => self.persistent.as_ref(),
            Durability::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    fn read_either(&self, key: &str) -> Option<String> {
        Self::safe_get(self.persistent.as_ref(), key)
            .or_else(|| Self::safe_get(self.ephemeral.as_ref(), key))
    }

    fn safe_get(store: &dyn KeyValueBackend, key: &str) -> Option<String> {
        match store.read(key) {
            Ok(value) => value,
            Err(e) => {
                Self::log_degraded(store, key, &e);
                None
            }
        }
    }

    fn safe_set(store: &dyn KeyValueBackend, key: &str, value: Option<&str>) {
        if let Err(e) = store.write(key, value) {
            Self::log_degraded(store, key, &e);
        }
    }

    fn log_degraded(store: &dyn KeyValueBackend, key: &str, error: &StoreError) {
        warn!(backend = store.name(), key, error = %error, "Credential storage degraded");
    }
}

// ============================================================================
// Tests
// ============================================================================
