//! Stealth addresses for ticket purchases
//!
//! Two derivations are supported:
//!
//! - **Ephemeral** (default): every purchase creates a throwaway recipient
//!   meta-address and an ephemeral key, hashes them into a shared-secret
//!   seed, and tweaks the spending key:
//!   `p = b + keccak(keccak("0x"‖hex(r) ‖ "0x"‖hex(B)))  mod n`.
//!   The buyer keeps `p`; nothing is published for a third party.
//! - **Persistent**: the sender performs ECDH against a long-lived
//!   meta-address `(B, V)`: `ss = keccak(x(r·V))`, `P = B + H(ss)·G`.
//!   Anyone holding `(b, v)` re-derives `p = b + H(ss)` from the published
//!   ephemeral key alone.

use std::sync::Arc;

use k256::{elliptic_curve::ops::Reduce, FieldBytes, ProjectivePoint, Scalar, U256};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::keys::{
    address_from_point, address_from_private_key, decompress_point, generate_ephemeral_key,
    generate_private_key, parse_public_key, split_point, KeyPair, SecretScalar, PREFIX_EVEN,
    PREFIX_ODD,
};
use crate::chain::Address;
use crate::error::CryptoError;

/// Canonical meta-address prefix
pub const META_ADDRESS_PREFIX: &str = "st:eth:0x";

/// Domain separators for mnemonic-derived keys
const SPENDING_DOMAIN: &[u8] = b"stealth-tickets/spending";
const VIEWING_DOMAIN: &[u8] = b"stealth-tickets/viewing";

// ============================================================================
// Meta-Addresses
// ============================================================================

/// A recipient's long-lived spending and viewing keys.
///
/// Immutable once created; `meta_address` is derived from the public halves.
#[derive(Clone, Debug)]
pub struct StealthMetaAddress {
    pub spending_key: KeyPair,
    pub viewing_key: KeyPair,
    pub meta_address: String,
}

/// The public half of a meta-address, as parsed from its string form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaAddressKeys {
    pub spending_public_key: [u8; 32],
    pub viewing_public_key: [u8; 32],
}

impl StealthMetaAddress {
    /// Generate new random spending and viewing keys
    pub fn generate() -> Self {
        Self::from_key_pairs(
            KeyPair::from_private(generate_private_key()),
            KeyPair::from_private(generate_private_key()),
        )
    }

    pub fn from_key_pairs(spending_key: KeyPair, viewing_key: KeyPair) -> Self {
        let meta_address = format_meta_address(&spending_key.public_key, &viewing_key.public_key);
        Self {
            spending_key,
            viewing_key,
            meta_address,
        }
    }

    /// Reconstruct from stored secrets
    pub fn from_secrets(spending: &[u8; 32], viewing: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self::from_key_pairs(
            KeyPair::from_private(SecretScalar::from_bytes(*spending)?),
            KeyPair::from_private(SecretScalar::from_bytes(*viewing)?),
        ))
    }

    /// Derive keys from a BIP-39 mnemonic phrase
    ///
    /// Derivation:
    /// - spending = SHA256("stealth-tickets/spending" || seed) mod n
    /// - viewing  = SHA256("stealth-tickets/viewing" || seed) mod n
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, CryptoError> {
        let mnemonic: bip39::Mnemonic = phrase
            .parse()
            .map_err(|e: bip39::Error| CryptoError::InvalidMnemonic(e.to_string()))?;
        let mut seed = mnemonic.to_seed(passphrase);

        let spending = seed_to_key(SPENDING_DOMAIN, &seed);
        let viewing = seed_to_key(VIEWING_DOMAIN, &seed);
        seed.zeroize();

        Ok(Self::from_key_pairs(
            KeyPair::from_private(spending?),
            KeyPair::from_private(viewing?),
        ))
    }

    /// Generate a new 24-word mnemonic and derive keys from it
    pub fn generate_with_mnemonic() -> Result<(Self, String), CryptoError> {
        use rand::RngCore;

        let mut entropy = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))?;
        entropy.zeroize();

        let phrase = mnemonic.to_string();
        let keys = Self::from_mnemonic(&phrase, "")?;
        Ok((keys, phrase))
    }

    pub fn public_keys(&self) -> MetaAddressKeys {
        MetaAddressKeys {
            spending_public_key: self.spending_key.public_key,
            viewing_public_key: self.viewing_key.public_key,
        }
    }
}

fn seed_to_key(domain: &[u8], seed: &[u8]) -> Result<SecretScalar, CryptoError> {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(seed);
    let mut digest: [u8; 32] = hasher.finalize().into();
    let scalar = reduce_to_scalar(&digest);
    digest.zeroize();
    SecretScalar::from_scalar(&scalar)
}

/// Produce a recipient's spending and viewing key pairs
pub fn generate_stealth_keys() -> StealthMetaAddress {
    StealthMetaAddress::generate()
}

/// `"st:eth:0x" + hex(spending) + hex(viewing)`
pub fn format_meta_address(spending_public_key: &[u8; 32], viewing_public_key: &[u8; 32]) -> String {
    format!(
        "{}{}{}",
        META_ADDRESS_PREFIX,
        hex::encode(spending_public_key),
        hex::encode(viewing_public_key)
    )
}

/// Parse a meta-address string, checking both keys lie on the curve
pub fn parse_meta_address(input: &str) -> Result<MetaAddressKeys, CryptoError> {
    let body = input
        .trim()
        .strip_prefix(META_ADDRESS_PREFIX)
        .ok_or_else(|| {
            CryptoError::InvalidMetaAddress(format!("must start with {}", META_ADDRESS_PREFIX))
        })?;

    if body.len() != 128 {
        return Err(CryptoError::InvalidMetaAddress(format!(
            "expected 128 hex characters after prefix, got {}",
            body.len()
        )));
    }
    // Also guarantees byte 64 is a char boundary
    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidMetaAddress(
            "keys must be hex encoded".into(),
        ));
    }

    let spending_public_key = parse_public_key(&body[..64])
        .map_err(|e| CryptoError::InvalidMetaAddress(format!("spending key: {}", e)))?;
    let viewing_public_key = parse_public_key(&body[64..])
        .map_err(|e| CryptoError::InvalidMetaAddress(format!("viewing key: {}", e)))?;

    Ok(MetaAddressKeys {
        spending_public_key,
        viewing_public_key,
    })
}

// ============================================================================
// Hash-Seeded Derivation
// ============================================================================

/// Reduce 32 bytes to a scalar mod n
fn reduce_to_scalar(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(*bytes))
}

/// Deterministic stand-in for an ECDH shared secret:
/// keccak-256 over the UTF-8 concatenation of both keys as `0x` hex strings.
pub fn compute_shared_secret_seed(
    ephemeral_private_key: &SecretScalar,
    recipient_public_key: &[u8; 32],
) -> [u8; 32] {
    let mut material = ephemeral_private_key.to_hex();
    material.push_str("0x");
    material.push_str(&hex::encode(recipient_public_key));

    let seed: [u8; 32] = Keccak256::digest(material.as_bytes()).into();
    material.zeroize();
    seed
}

/// `(spending + keccak(seed)) mod n`; pure in its inputs
pub fn derive_stealth_private_key(
    spending_private_key: &SecretScalar,
    shared_secret_seed: &[u8; 32],
) -> Result<SecretScalar, CryptoError> {
    let tweak_bytes: [u8; 32] = Keccak256::digest(shared_secret_seed).into();
    let tweak = reduce_to_scalar(&tweak_bytes);
    let stealth = spending_private_key.to_scalar() + tweak;
    SecretScalar::from_scalar(&stealth)
}

// ============================================================================
// Stealth Address Generation
// ============================================================================

/// A one-time address plus the key that controls it
#[derive(Clone, Debug)]
pub struct StealthAddress {
    pub address: Address,
    pub private_key: SecretScalar,
    pub ephemeral_public_key: [u8; 32],
    pub ephemeral_prefix: u8,
    /// Meta-address the stealth address was derived for
    pub meta_address: String,
}

impl StealthAddress {
    /// Compressed ephemeral public key as `0x` hex (prefix || x)
    pub fn ephemeral_hex(&self) -> String {
        let mut compressed = [0u8; 33];
        compressed[0] = self.ephemeral_prefix;
        compressed[1..].copy_from_slice(&self.ephemeral_public_key);
        format!("0x{}", hex::encode(compressed))
    }
}

/// Generate a fresh self-recipient stealth address.
///
/// A throwaway meta-address and ephemeral key are created per call; no key
/// material is shared with any other purchase.
pub fn generate_stealth_address() -> Result<StealthAddress, CryptoError> {
    let meta = generate_stealth_keys();
    let ephemeral = generate_ephemeral_key();

    let seed = compute_shared_secret_seed(&ephemeral.private_key, &meta.spending_key.public_key);
    let private_key = derive_stealth_private_key(&meta.spending_key.private_key, &seed)?;
    let address = address_from_private_key(&private_key);

    Ok(StealthAddress {
        address,
        private_key,
        ephemeral_public_key: ephemeral.public_key,
        ephemeral_prefix: ephemeral.prefix,
        meta_address: meta.meta_address,
    })
}

/// What a sender publishes after paying a meta-address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StealthAnnouncement {
    pub address: Address,
    pub ephemeral_public_key: [u8; 32],
    pub ephemeral_prefix: u8,
}

fn ecdh_tweak(shared_point: &ProjectivePoint) -> Result<Scalar, CryptoError> {
    if bool::from(shared_point.ct_eq(&ProjectivePoint::IDENTITY)) {
        return Err(CryptoError::DegenerateKey);
    }
    // Only x is hashed so the parity of either input point is irrelevant
    let (x, _) = split_point(shared_point);
    let digest: [u8; 32] = Keccak256::digest(x).into();
    Ok(reduce_to_scalar(&digest))
}

/// Sender side: derive a stealth address for an external meta-address
pub fn compute_stealth_address_for(
    recipient: &MetaAddressKeys,
) -> Result<StealthAnnouncement, CryptoError> {
    let ephemeral = generate_ephemeral_key();

    let viewing = decompress_point(&recipient.viewing_public_key, PREFIX_EVEN)
        .ok_or_else(|| CryptoError::InvalidPublicKey("viewing key".into()))?;
    let spending = decompress_point(&recipient.spending_public_key, PREFIX_EVEN)
        .ok_or_else(|| CryptoError::InvalidPublicKey("spending key".into()))?;

    // ss = r·V
    let tweak = ecdh_tweak(&(viewing * ephemeral.private_key.to_scalar()))?;

    // P = B + H(ss)·G
    let stealth_point = spending + ProjectivePoint::GENERATOR * tweak;
    if bool::from(stealth_point.ct_eq(&ProjectivePoint::IDENTITY)) {
        return Err(CryptoError::DegenerateKey);
    }

    Ok(StealthAnnouncement {
        address: address_from_point(&stealth_point),
        ephemeral_public_key: ephemeral.public_key,
        ephemeral_prefix: ephemeral.prefix,
    })
}

/// Recipient side: re-derive the stealth key from a published announcement.
///
/// Meta-addresses carry x-only keys, which senders lift with even y. A
/// spending key whose point has odd y is therefore negated before tweaking.
pub fn recover_stealth_key(
    meta: &StealthMetaAddress,
    announcement: &StealthAnnouncement,
) -> Result<SecretScalar, CryptoError> {
    let ephemeral = decompress_point(&announcement.ephemeral_public_key, announcement.ephemeral_prefix)
        .ok_or_else(|| CryptoError::InvalidPublicKey("ephemeral key".into()))?;

    // ss = v·R
    let tweak = ecdh_tweak(&(ephemeral * meta.viewing_key.private_key.to_scalar()))?;

    let spending = meta.spending_key.private_key.to_scalar();
    let spending = if meta.spending_key.prefix == PREFIX_ODD {
        -spending
    } else {
        spending
    };

    let private_key = SecretScalar::from_scalar(&(spending + tweak))?;
    let derived = address_from_private_key(&private_key);

    // Constant-time comparison as in payment scanning
    if !bool::from(derived.as_bytes().ct_eq(announcement.address.as_bytes())) {
        return Err(CryptoError::AddressMismatch);
    }
    Ok(private_key)
}

/// Derive a stealth address to a long-lived meta-address we hold keys for
pub fn generate_stealth_address_to(meta: &StealthMetaAddress) -> Result<StealthAddress, CryptoError> {
    let announcement = compute_stealth_address_for(&meta.public_keys())?;
    let private_key = recover_stealth_key(meta, &announcement)?;

    Ok(StealthAddress {
        address: announcement.address,
        private_key,
        ephemeral_public_key: announcement.ephemeral_public_key,
        ephemeral_prefix: announcement.ephemeral_prefix,
        meta_address: meta.meta_address.clone(),
    })
}

/// How a purchase obtains its stealth address
#[derive(Clone, Debug, Default)]
pub enum StealthDerivation {
    /// Throwaway meta-address per purchase
    #[default]
    Ephemeral,
    /// ECDH to the buyer's long-lived meta-address
    Persistent(Arc<StealthMetaAddress>),
}

impl StealthDerivation {
    pub fn derive(&self) -> Result<StealthAddress, CryptoError> {
        match self {
            StealthDerivation::Ephemeral => generate_stealth_address(),
            StealthDerivation::Persistent(meta) => generate_stealth_address_to(meta),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_address_format() {
        let meta = generate_stealth_keys();
        assert!(meta.meta_address.starts_with(META_ADDRESS_PREFIX));
        assert_eq!(meta.meta_address.len(), META_ADDRESS_PREFIX.len() + 128);

        let parsed = parse_meta_address(&meta.meta_address).unwrap();
        assert_eq!(parsed, meta.public_keys());
    }

    #[test]
    fn test_parse_meta_address_rejects_malformed() {
        assert!(parse_meta_address("st:eth:0x1234").is_err());
        assert!(parse_meta_address(&format!("st:sol:0x{}", "ab".repeat(64))).is_err());
        assert!(parse_meta_address(&format!("{}{}", META_ADDRESS_PREFIX, "zz".repeat(64))).is_err());

        // 128 bytes whose midpoint falls inside a multibyte character
        let straddling = format!("{}a{}a", META_ADDRESS_PREFIX, "é".repeat(63));
        assert!(matches!(
            parse_meta_address(&straddling),
            Err(CryptoError::InvalidMetaAddress(_))
        ));
    }

    #[test]
    fn test_shared_secret_seed_is_deterministic() {
        let ephemeral = generate_ephemeral_key();
        let recipient = generate_ephemeral_key();
        let a = compute_shared_secret_seed(&ephemeral.private_key, &recipient.public_key);
        let b = compute_shared_secret_seed(&ephemeral.private_key, &recipient.public_key);
        assert_eq!(a, b);

        let other = generate_ephemeral_key();
        let c = compute_shared_secret_seed(&other.private_key, &recipient.public_key);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stealth_key_is_additive_tweak() {
        let spending = generate_private_key();
        let seed = [7u8; 32];
        let derived = derive_stealth_private_key(&spending, &seed).unwrap();

        let tweak_bytes: [u8; 32] = Keccak256::digest(seed).into();
        let expected = spending.to_scalar() + reduce_to_scalar(&tweak_bytes);
        assert_eq!(derived.to_scalar(), expected);
    }

    #[test]
    fn test_generated_address_matches_key() {
        let stealth = generate_stealth_address().unwrap();
        assert_eq!(address_from_private_key(&stealth.private_key), stealth.address);
        assert!(stealth.meta_address.starts_with(META_ADDRESS_PREFIX));
        assert_eq!(stealth.ephemeral_hex().len(), 2 + 66);
    }

    #[test]
    fn test_generated_addresses_are_unique() {
        let a = generate_stealth_address().unwrap();
        let b = generate_stealth_address().unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.private_key, b.private_key);
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    }

    #[test]
    fn test_persistent_roundtrip_recovers_key() {
        // Repeat so both spending-key parities are exercised
        for _ in 0..8 {
            let meta = generate_stealth_keys();
            let announcement = compute_stealth_address_for(&meta.public_keys()).unwrap();
            let key = recover_stealth_key(&meta, &announcement).unwrap();
            assert_eq!(address_from_private_key(&key), announcement.address);
        }
    }

    #[test]
    fn test_wrong_recipient_cannot_recover() {
        let intended = generate_stealth_keys();
        let outsider = generate_stealth_keys();
        let announcement = compute_stealth_address_for(&intended.public_keys()).unwrap();
        assert_eq!(
            recover_stealth_key(&outsider, &announcement).unwrap_err(),
            CryptoError::AddressMismatch
        );
    }

    #[test]
    fn test_mnemonic_keys_are_deterministic() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let a = StealthMetaAddress::from_mnemonic(phrase, "").unwrap();
        let b = StealthMetaAddress::from_mnemonic(phrase, "").unwrap();
        assert_eq!(a.meta_address, b.meta_address);

        let c = StealthMetaAddress::from_mnemonic(phrase, "password").unwrap();
        assert_ne!(a.meta_address, c.meta_address);

        assert!(StealthMetaAddress::from_mnemonic("not a mnemonic", "").is_err());
    }

    #[test]
    fn test_derivation_modes() {
        let ephemeral = StealthDerivation::Ephemeral.derive().unwrap();
        assert_eq!(address_from_private_key(&ephemeral.private_key), ephemeral.address);

        let meta = Arc::new(generate_stealth_keys());
        let persistent = StealthDerivation::Persistent(meta.clone()).derive().unwrap();
        assert_eq!(persistent.meta_address, meta.meta_address);
        assert_eq!(address_from_private_key(&persistent.private_key), persistent.address);
    }
}
