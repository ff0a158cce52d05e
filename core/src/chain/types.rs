//! Chain primitives: addresses, transaction hashes, receipts and events

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 20-byte account or contract address.
///
/// Parsing accepts any hex case, so two spellings of the same address
/// compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Abbreviated form for terminal output, e.g. `0x1234…abcd`
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

/// Address parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {0:?}: expected 0x followed by 40 hex characters")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 40 {
            return Err(AddressParseError(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|_| AddressParseError(s.to_string()))?;
        Address::from_slice(&bytes).ok_or_else(|| AddressParseError(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let bytes = hex::decode(digits).map_err(|e| format!("invalid tx hash: {}", e))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "invalid tx hash: expected 32 bytes".to_string())?;
        Ok(Self(arr))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Registration role of a wallet on the identity contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unregistered,
    User,
    Creator,
}

/// Public details of an event contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub address: Address,
    pub name: String,
    pub date: String,
    pub organizer: Address,
    /// Raw token units
    pub ticket_price: u128,
    pub active: bool,
    pub tickets_sold: u64,
    pub capacity: u64,
}

/// `StealthAddressFunded(stealthAddress, tokenAmount, gasAmount)` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthAddressFunded {
    pub event: Address,
    pub stealth_address: Address,
    pub token_amount: u128,
    pub gas_amount: u128,
    pub tx_hash: TxHash,
    /// Unix seconds of the funding block
    pub timestamp: i64,
}

/// Decoded logs the purchase flow cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    StealthAddressFunded(StealthAddressFunded),
    TicketMinted {
        event: Address,
        to: Address,
        token_id: u64,
    },
    EmergencyRecovered {
        event: Address,
        stealth_address: Address,
        refunded: u128,
    },
}

/// Mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    /// Revert reason when `success` is false
    pub revert_reason: Option<String>,
    pub events: Vec<ChainEvent>,
}

impl TxReceipt {
    /// Token id minted to `owner` in this transaction, if any
    pub fn minted_token_id(&self, owner: &Address) -> Option<u64> {
        self.events.iter().find_map(|event| match event {
            ChainEvent::TicketMinted { to, token_id, .. } if to == owner => Some(*token_id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_is_case_insensitive() {
        let lower: Address = "0xabcdef0123456789abcdef0123456789abcdef01".parse().unwrap();
        let mixed: Address = "0xAbCdEf0123456789ABCDEF0123456789abcdef01".parse().unwrap();
        let bare: Address = "abcdef0123456789abcdef0123456789abcdef01".parse().unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(lower, bare);
        assert_eq!(
            mixed.to_string(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzzcdef0123456789abcdef0123456789abcdef01".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr = Address([0x11; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_minted_token_lookup() {
        let owner = Address([7; 20]);
        let receipt = TxReceipt {
            tx_hash: TxHash([1; 32]),
            block_number: 3,
            success: true,
            revert_reason: None,
            events: vec![ChainEvent::TicketMinted {
                event: Address([9; 20]),
                to: owner,
                token_id: 12,
            }],
        };
        assert_eq!(receipt.minted_token_id(&owner), Some(12));
        assert_eq!(receipt.minted_token_id(&Address::ZERO), None);
    }
}
