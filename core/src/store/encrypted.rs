//! Encryption at rest for stored blobs
//!
//! Uses AES-256-GCM for encryption and Argon2id for key derivation.
//! Ticket records carry stealth private keys, so they are never written
//! in plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::rand_core::RngCore, Argon2};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use super::backend::LocalDurableStore;
use crate::error::StoreError;

/// Argon2 parameters for key derivation
const ARGON2_M_COST: u32 = 65536; // 64 MB memory
const ARGON2_T_COST: u32 = 3; // 3 iterations
const ARGON2_P_COST: u32 = 4; // 4 parallel lanes

/// Cheap parameters so tests stay fast
#[cfg(test)]
pub(crate) const TEST_KDF: KdfParams = KdfParams {
    m_cost: 1024,
    t_cost: 1,
    p_cost: 1,
};

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;

/// Argon2id cost parameters, recorded in each envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: ARGON2_M_COST,
            t_cost: ARGON2_T_COST,
            p_cost: ARGON2_P_COST,
        }
    }
}

impl KdfParams {
    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<[u8; 32], StoreError> {
        let params = argon2::Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| StoreError::Encryption(format!("Argon2 params error: {}", e)))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Encryption(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}

/// Encrypted envelope as written to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBlob {
    /// Version for future compatibility
    pub version: u8,
    pub kdf: KdfParams,
    /// Salt for Argon2 (base64)
    pub salt: String,
    /// Nonce for AES-GCM (base64)
    pub nonce: String,
    /// Encrypted data (base64)
    pub ciphertext: String,
    pub created_at: String,
}

impl SealedBlob {
    fn seal(key: &[u8; 32], kdf: KdfParams, salt: &[u8], plaintext: &[u8]) -> Result<Self, StoreError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| StoreError::Encryption(format!("Cipher creation failed: {}", e)))?;

        // Fresh nonce per write
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| StoreError::Encryption(format!("Encryption failed: {}", e)))?;

        Ok(Self {
            version: ENVELOPE_VERSION,
            kdf,
            salt: b64::encode(salt),
            nonce: b64::encode(&nonce_bytes),
            ciphertext: b64::encode(&ciphertext),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn open(&self, key: &[u8; 32]) -> Result<Vec<u8>, StoreError> {
        if self.version != ENVELOPE_VERSION {
            return Err(StoreError::Encryption(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| StoreError::Encryption(format!("Cipher creation failed: {}", e)))?;

        let nonce_bytes = b64::decode(&self.nonce)?;
        let ciphertext = b64::decode(&self.ciphertext)?;
        let nonce_array: [u8; 12] = nonce_bytes
            .try_into()
            .map_err(|_| StoreError::Encryption("Invalid nonce length".into()))?;

        cipher
            .decrypt(&Nonce::from(nonce_array), ciphertext.as_ref())
            .map_err(|_| StoreError::Decryption)
    }

    fn salt_bytes(&self) -> Result<Vec<u8>, StoreError> {
        b64::decode(&self.salt)
    }
}

/// Wraps any backend so every blob is sealed with a password-derived key.
///
/// The key is derived once when the store is opened. An existing envelope's
/// salt is adopted, and a wrong password fails at open time.
pub struct EncryptedStore<B> {
    inner: B,
    key: [u8; 32],
    salt: Vec<u8>,
    kdf: KdfParams,
    password: String,
}

impl<B: LocalDurableStore> EncryptedStore<B> {
    /// Open with default KDF costs
    pub fn open(inner: B, namespace: &str, password: &str) -> Result<Self, StoreError> {
        Self::open_with_params(inner, namespace, password, KdfParams::default())
    }

    /// `kdf` only applies when `namespace` holds no envelope yet
    pub fn open_with_params(
        inner: B,
        namespace: &str,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Self, StoreError> {
        let existing = match inner.get(namespace)? {
            Some(raw) => Some(serde_json::from_slice::<SealedBlob>(&raw)?),
            None => None,
        };

        let (salt, kdf) = match &existing {
            Some(blob) => (blob.salt_bytes()?, blob.kdf),
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                (salt, kdf)
            }
        };

        let key = kdf.derive_key(password, &salt)?;
        let store = Self {
            inner,
            key,
            salt,
            kdf,
            password: password.to_string(),
        };

        // Verify the password before anything is overwritten
        if let Some(blob) = existing {
            let mut plaintext = blob.open(&store.key)?;
            plaintext.zeroize();
        }

        Ok(store)
    }

    fn key_for(&self, blob: &SealedBlob) -> Result<[u8; 32], StoreError> {
        let salt = blob.salt_bytes()?;
        if salt == self.salt && blob.kdf == self.kdf {
            return Ok(self.key);
        }
        debug!("envelope uses a different salt; deriving its key");
        blob.kdf.derive_key(&self.password, &salt)
    }
}

impl<B: LocalDurableStore> LocalDurableStore for EncryptedStore<B> {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(raw) = self.inner.get(namespace)? else {
            return Ok(None);
        };
        let blob: SealedBlob = serde_json::from_slice(&raw)?;
        let mut key = self.key_for(&blob)?;
        let plaintext = blob.open(&key);
        key.zeroize();
        plaintext.map(Some)
    }

    fn set(&self, namespace: &str, blob: &[u8]) -> Result<(), StoreError> {
        let sealed = SealedBlob::seal(&self.key, self.kdf, &self.salt, blob)?;
        let json = serde_json::to_vec_pretty(&sealed)?;
        self.inner.set(namespace, &json)
    }
}

impl<B> Drop for EncryptedStore<B> {
    fn drop(&mut self) {
        self.key.zeroize();
        self.password.zeroize();
    }
}

// Base64 encoding/decoding helpers
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    use crate::error::StoreError;

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, StoreError> {
        STANDARD
            .decode(s)
            .map_err(|e| StoreError::Encryption(format!("Base64 decode error: {}", e)))
    }
}
