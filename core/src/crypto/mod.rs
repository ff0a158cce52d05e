//! Key derivation and stealth address construction on secp256k1

pub mod keys;
pub mod stealth;

pub use keys::{
    address_from_point, address_from_private_key, decompress_point, derive_public_key,
    generate_ephemeral_key, generate_private_key, is_valid_private_key, is_valid_public_key,
    parse_public_key, KeyPair, SecretScalar, PREFIX_EVEN, PREFIX_ODD,
};
pub use stealth::{
    compute_shared_secret_seed, compute_stealth_address_for, derive_stealth_private_key,
    format_meta_address, generate_stealth_address, generate_stealth_address_to,
    generate_stealth_keys, parse_meta_address, recover_stealth_key, MetaAddressKeys,
    StealthAddress, StealthAnnouncement, StealthDerivation, StealthMetaAddress,
    META_ADDRESS_PREFIX,
};
