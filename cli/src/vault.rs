//! Encrypted storage for the buyer's stealth keys
//!
//! The secrets are sealed with the same AES-256-GCM/Argon2id envelope as the
//! ticket store. The public meta-address is kept next to them in plaintext so
//! `address` and `info` work without a password.

use std::fs;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use stealth_tickets::store::{EncryptedStore, KdfParams, LocalDurableStore};
use stealth_tickets::StealthMetaAddress;
use zeroize::Zeroize;

use crate::config::{write_owner_only, Paths, KEYS_NAMESPACE};

/// Environment variable consulted before prompting for a password
pub const PASSWORD_ENV: &str = "STEALTHTIX_PASSWORD";

/// Unencrypted key data (internal use only)
#[derive(Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
struct KeyData {
    spending_secret: [u8; 32],
    viewing_secret: [u8; 32],
}

/// Public information about the stored keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub meta_address: String,
    pub created_at: String,
    pub has_mnemonic: bool,
}

/// Stealth key storage manager
pub struct KeyVault {
    paths: Paths,
    kdf: KdfParams,
}

impl KeyVault {
    pub fn new(paths: &Paths) -> Self {
        Self::with_kdf(paths, KdfParams::default())
    }

    /// Custom Argon2 costs for new key files
    pub fn with_kdf(paths: &Paths, kdf: KdfParams) -> Self {
        Self {
            paths: paths.clone(),
            kdf,
        }
    }

    /// Check if encrypted keys exist
    pub fn exists(&self) -> bool {
        self.paths.keys_file().exists()
    }

    /// Encrypt and store `keys`, replacing any existing key file
    pub fn save(&self, keys: &StealthMetaAddress, has_mnemonic: bool, password: &str) -> Result<Profile> {
        let path = self.paths.keys_file();
        if path.exists() {
            fs::remove_file(&path).context("Failed to remove old key file")?;
        }

        let store =
            EncryptedStore::open_with_params(self.paths.file_store(), KEYS_NAMESPACE, password, self.kdf)?;
        let data = KeyData {
            spending_secret: *keys.spending_key.private_key.as_bytes(),
            viewing_secret: *keys.viewing_key.private_key.as_bytes(),
        };
        let mut json = serde_json::to_vec(&data)?;
        let sealed = store.set(KEYS_NAMESPACE, &json);
        json.zeroize();
        sealed.context("Failed to write encrypted keys")?;

        let profile = Profile {
            meta_address: keys.meta_address.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            has_mnemonic,
        };
        let profile_json = serde_json::to_vec_pretty(&profile)?;
        write_owner_only(&self.paths, &self.paths.profile_file(), &profile_json)?;
        Ok(profile)
    }

    /// Load and decrypt keys
    pub fn load(&self, password: &str) -> Result<StealthMetaAddress> {
        if !self.exists() {
            bail!("No stealth keys found. Run 'stealthtix keygen' first.");
        }
        let store =
            EncryptedStore::open_with_params(self.paths.file_store(), KEYS_NAMESPACE, password, self.kdf)
                .context("Failed to unlock stealth keys")?;
        let mut json = store
            .get(KEYS_NAMESPACE)?
            .context("Encrypted key file is empty")?;
        let data: Result<KeyData, _> = serde_json::from_slice(&json);
        json.zeroize();
        let data = data.context("Failed to parse decrypted key data")?;

        Ok(StealthMetaAddress::from_secrets(
            &data.spending_secret,
            &data.viewing_secret,
        )?)
    }

    /// Public profile written alongside the keys
    pub fn profile(&self) -> Result<Profile> {
        let path = self.paths.profile_file();
        if !path.exists() {
            bail!("No stealth keys found. Run 'stealthtix keygen' first.");
        }
        let json = fs::read_to_string(&path).context("Failed to read profile")?;
        serde_json::from_str(&json).context("Failed to parse profile")
    }
}

/// Password strength validation
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.len() < 8 {
        bail!("Password must be at least 8 characters");
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_numeric());

    if !has_upper || !has_lower || !has_digit {
        bail!("Password must contain uppercase, lowercase, and numeric characters");
    }

    Ok(())
}

/// Prompt for password securely (hides input), unless the environment
/// provides one
pub fn prompt_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password(prompt).context("Failed to read password")
}

/// Prompt for password with confirmation
pub fn prompt_new_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        validate_password_strength(&password)?;
        return Ok(password);
    }

    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        bail!("Passwords do not match");
    }

    validate_password_strength(&password)?;

    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_validation() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("alllowercase").is_err());
        assert!(validate_password_strength("ALLUPPERCASE").is_err());
        assert!(validate_password_strength("NoNumbers").is_err());
        assert!(validate_password_strength("ValidPass123").is_ok());
    }
}
