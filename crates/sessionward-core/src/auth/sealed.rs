//! At-rest encryption for the credential file.
//!
//! The key is derived from a passphrase with Argon2 and a random salt; each
//! write uses a fresh ChaCha20-Poly1305 nonce. The envelope is JSON so the
//! file stays recognizable.

use std::sync::Mutex;

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::backend::StoreError;

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    /// Base64-encoded Argon2 salt
    salt: String,
    /// Base64-encoded nonce
    nonce: String,
    /// Base64-encoded ciphertext
    ciphertext: String,
}

pub struct Sealer {
    passphrase: String,
    // Derived key for the salt last seen.
    derived: Mutex<Option<([u8; SALT_LEN], [u8; 32])>>,
}

impl Sealer {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_string(),
            derived: Mutex::new(None),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let (salt, key) = self.current_key()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| StoreError::Corrupt(format!("Encryption failed: {}", e)))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        };
        serde_json::to_vec_pretty(&envelope).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        let envelope: Envelope =
            serde_json::from_slice(sealed).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "Unsupported envelope version {}",
                envelope.version
            )));
        }

        let salt: [u8; SALT_LEN] = decode_fixed(&envelope.salt)?;
        let nonce: [u8; NONCE_LEN] = decode_fixed(&envelope.nonce)?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let key = self.key_for_salt(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| StoreError::Corrupt("Decryption failed (wrong passphrase?)".into()))
    }

    /// Key for new writes: the cached one, or a fresh salt.
    fn current_key(&self) -> Result<([u8; SALT_LEN], [u8; 32]), StoreError> {
        let mut derived = self
            .derived
            .lock()
            .map_err(|_| StoreError::Unavailable("sealer lock poisoned".into()))?;
        if let Some(pair) = *derived {
            return Ok(pair);
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = self.derive(&salt)?;
        *derived = Some((salt, key));
        Ok((salt, key))
    }

    fn key_for_salt(&self, salt: [u8; SALT_LEN]) -> Result<[u8; 32], StoreError> {
        let mut derived = self
            .derived
            .lock()
            .map_err(|_| StoreError::Unavailable("sealer lock poisoned".into()))?;
        if let Some((cached_salt, key)) = *derived {
            if cached_salt == salt {
                return Ok(key);
            }
        }
        let key = self.derive(&salt)?;
        *derived = Some((salt, key));
        Ok(key)
    }

    fn derive(&self, salt: &[u8]) -> Result<[u8; 32], StoreError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Corrupt(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], StoreError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("Envelope field has the wrong length".into()))
}

// ============================================================================
// Tests
// ============================================================================
