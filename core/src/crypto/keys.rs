//! secp256k1 key material
//!
//! Security features:
//! - Rejection sampling for uniform private keys in `(0, n)`
//! - Zeroization of secret scalars on drop
//! - Redacted `Debug` output for secrets

use std::fmt;

use k256::{
    elliptic_curve::{sec1::ToEncodedPoint, Field, PrimeField},
    FieldBytes, ProjectivePoint, PublicKey, Scalar,
};
use rand::{rngs::OsRng, RngCore};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::chain::Address;
use crate::error::CryptoError;

/// Compressed-point prefix for an even y-coordinate
pub const PREFIX_EVEN: u8 = 0x02;
/// Compressed-point prefix for an odd y-coordinate
pub const PREFIX_ODD: u8 = 0x03;

// ============================================================================
// Zeroizing Scalar Wrapper
// ============================================================================

/// A private scalar that zeroizes its contents on drop.
///
/// Holds the 32-byte big-endian encoding. Construction through the public
/// constructors guarantees `0 < k < n`.
#[derive(Clone)]
pub struct SecretScalar {
    bytes: [u8; 32],
}

impl SecretScalar {
    /// Create from raw big-endian bytes, rejecting 0 and values `>= n`
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let candidate = Self { bytes };
        if candidate.scalar().is_none() {
            return Err(CryptoError::InvalidPrivateKey(
                "scalar must be in (0, secp256k1 order)".into(),
            ));
        }
        Ok(candidate)
    }

    /// Create from a k256 scalar, rejecting zero
    pub fn from_scalar(scalar: &Scalar) -> Result<Self, CryptoError> {
        if bool::from(scalar.is_zero()) {
            return Err(CryptoError::DegenerateKey);
        }
        Ok(Self {
            bytes: scalar.to_bytes().into(),
        })
    }

    /// Parse `0x`-prefixed or bare 64-char hex
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let digits = strip_hex_prefix(input.trim());
        if digits.len() != 64 {
            return Err(CryptoError::InvalidPrivateKey(format!(
                "expected 64 hex characters, got {}",
                digits.len()
            )));
        }
        let mut raw = hex::decode(digits)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        let result = Self::from_bytes(bytes);
        bytes.zeroize();
        result
    }

    /// Get as a k256 scalar
    pub fn to_scalar(&self) -> Scalar {
        // Every constructor validated the range
        self.scalar().unwrap_or(Scalar::ONE)
    }

    /// Get the raw bytes (use carefully)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// `0x`-prefixed lowercase hex (use carefully)
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.bytes))
    }

    fn scalar(&self) -> Option<Scalar> {
        let repr = FieldBytes::from(self.bytes);
        let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
        scalar.filter(|s| !bool::from(s.is_zero()))
    }
}

impl Drop for SecretScalar {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

// Constant-time comparison to avoid leaking key bytes through timing
impl PartialEq for SecretScalar {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for SecretScalar {}

impl fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretScalar(<redacted>)")
    }
}

// ============================================================================
// Key Pairs
// ============================================================================

/// A private key with its x-only public key and parity prefix
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: SecretScalar,
    /// x-coordinate of the public point
    pub public_key: [u8; 32],
    /// 0x02 for even y, 0x03 for odd y
    pub prefix: u8,
}

impl KeyPair {
    pub fn from_private(private_key: SecretScalar) -> Self {
        let (public_key, prefix) = derive_public_key(&private_key);
        Self {
            private_key,
            public_key,
            prefix,
        }
    }

    /// SEC1 compressed public key (prefix || x)
    pub fn compressed(&self) -> [u8; 33] {
        compress(&self.public_key, self.prefix)
    }

    pub fn public_hex(&self) -> String {
        format!("0x{}", hex::encode(self.public_key))
    }

    /// Account address controlled by this key
    pub fn address(&self) -> Address {
        address_from_private_key(&self.private_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Draw a uniformly random private key in `(0, n)`.
///
/// Candidates outside the range are discarded and redrawn.
pub fn generate_private_key() -> SecretScalar {
    let mut rng = OsRng;
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let candidate = SecretScalar::from_bytes(bytes);
        bytes.zeroize();
        if let Ok(key) = candidate {
            return key;
        }
    }
}

/// Public x-coordinate and parity prefix for a private key
pub fn derive_public_key(private_key: &SecretScalar) -> ([u8; 32], u8) {
    let point = ProjectivePoint::GENERATOR * private_key.to_scalar();
    split_point(&point)
}

/// Fresh one-time key pair
pub fn generate_ephemeral_key() -> KeyPair {
    KeyPair::from_private(generate_private_key())
}

/// Split a point into (x, prefix)
pub(crate) fn split_point(point: &ProjectivePoint) -> ([u8; 32], u8) {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    let mut x = [0u8; 32];
    x.copy_from_slice(&bytes[1..33]);
    (x, bytes[0])
}

pub(crate) fn compress(x: &[u8; 32], prefix: u8) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = prefix;
    out[1..].copy_from_slice(x);
    out
}

/// Lift an x-coordinate with the given parity prefix back to a curve point
pub fn decompress_point(x: &[u8; 32], prefix: u8) -> Option<ProjectivePoint> {
    if prefix != PREFIX_EVEN && prefix != PREFIX_ODD {
        return None;
    }
    PublicKey::from_sec1_bytes(&compress(x, prefix))
        .ok()
        .map(|pk| pk.to_projective())
}

// ============================================================================
// Addresses
// ============================================================================

/// Address = last 20 bytes of keccak-256 over the uncompressed point (no 0x04 tag)
pub fn address_from_point(point: &ProjectivePoint) -> Address {
    let encoded = point.to_affine().to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

pub fn address_from_private_key(private_key: &SecretScalar) -> Address {
    address_from_point(&(ProjectivePoint::GENERATOR * private_key.to_scalar()))
}

// ============================================================================
// Validation
// ============================================================================

fn strip_hex_prefix(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

/// 64 hex characters encoding a scalar in `(0, n)`
pub fn is_valid_private_key(input: &str) -> bool {
    SecretScalar::from_hex(input).is_ok()
}

/// 64 hex characters encoding the x-coordinate of a curve point
pub fn is_valid_public_key(input: &str) -> bool {
    parse_public_key(input).is_ok()
}

/// Parse an x-only public key, checking that it lies on the curve
pub fn parse_public_key(input: &str) -> Result<[u8; 32], CryptoError> {
    let digits = strip_hex_prefix(input.trim());
    if digits.len() != 64 {
        return Err(CryptoError::InvalidPublicKey(format!(
            "expected 64 hex characters, got {}",
            digits.len()
        )));
    }
    let raw = hex::decode(digits).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let mut x = [0u8; 32];
    x.copy_from_slice(&raw);
    // Either parity lifts if x is on the curve
    decompress_point(&x, PREFIX_EVEN)
        .ok_or_else(|| CryptoError::InvalidPublicKey("not a curve x-coordinate".into()))?;
    Ok(x)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// secp256k1 group order
    const ORDER_HEX: &str = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

    #[test]
    fn test_generated_keys_are_in_range() {
        for _ in 0..32 {
            let key = generate_private_key();
            assert!(key.as_bytes().iter().any(|&b| b != 0));
            assert!(hex::encode(key.as_bytes()).as_str() < ORDER_HEX);
        }
    }

    #[test]
    fn test_rejects_zero_and_order() {
        assert!(SecretScalar::from_bytes([0u8; 32]).is_err());

        let mut order = [0u8; 32];
        order.copy_from_slice(&hex::decode(ORDER_HEX).unwrap());
        assert!(SecretScalar::from_bytes(order).is_err());

        order[31] -= 1; // n - 1 is the largest valid key
        assert!(SecretScalar::from_bytes(order).is_ok());
    }

    #[test]
    fn test_public_key_prefix_and_lift() {
        let pair = generate_ephemeral_key();
        assert!(pair.prefix == PREFIX_EVEN || pair.prefix == PREFIX_ODD);

        let lifted = decompress_point(&pair.public_key, pair.prefix).unwrap();
        let expected = ProjectivePoint::GENERATOR * pair.private_key.to_scalar();
        assert_eq!(lifted, expected);
    }

    #[test]
    fn test_known_generator_vector() {
        // k = 1 gives the generator
        let mut one = [0u8; 32];
        one[31] = 1;
        let key = SecretScalar::from_bytes(one).unwrap();
        let (x, prefix) = derive_public_key(&key);
        assert_eq!(
            hex::encode(x),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(prefix, PREFIX_EVEN);
        // Well-known address of private key 1
        assert_eq!(
            address_from_private_key(&key).to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_hex_roundtrip_and_validation() {
        let key = generate_private_key();
        let hex = key.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(SecretScalar::from_hex(&hex).unwrap(), key);

        assert!(is_valid_private_key(&hex));
        assert!(!is_valid_private_key("0x1234"));
        assert!(!is_valid_private_key(&"0".repeat(64)));
        assert!(!is_valid_private_key(ORDER_HEX));

        let pair = KeyPair::from_private(key);
        assert!(is_valid_public_key(&pair.public_hex()));
        assert!(!is_valid_public_key("zz"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = generate_private_key();
        let printed = format!("{:?}", key);
        assert!(!printed.contains(&hex::encode(key.as_bytes())));
    }
}
