//! Error types for stealth ticket purchases

use thiserror::Error;

pub use crate::chain::revert::FailureKind;

/// Key material and encoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid meta-address: {0}")]
    InvalidMetaAddress(String),

    #[error("derived stealth key is the zero scalar")]
    DegenerateKey,

    #[error("derived stealth address does not match announcement")]
    AddressMismatch,

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// A failure reported by the wallet/RPC collaborator.
///
/// `kind` is the classified cause; `message` is the upstream text, kept
/// verbatim for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChainError {
    pub kind: FailureKind,
    pub message: String,
}

impl ChainError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from free-form upstream text, classifying it by content.
    ///
    /// Only used when the collaborator has no structured revert code.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: crate::chain::revert::classify(&message),
            message,
        }
    }

    pub fn rpc(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    /// Text suitable for showing to the buyer
    pub fn user_message(&self) -> String {
        crate::chain::revert::user_message(self.kind, &self.message)
    }
}

/// Token amount parsing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount has more than {0} decimal places")]
    TooPrecise(u32),

    #[error("amount overflows")]
    Overflow,
}

/// Ticket persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode ticket records: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption failed - wrong password or corrupted data")]
    Decryption,

    #[error("a ticket for event {0} is already stored")]
    DuplicateTicket(String),

    #[error("no ticket stored for event {0}")]
    NotFound(String),

    #[error("invalid event address: {0}")]
    InvalidEventAddress(String),
}

/// Configuration file failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Purchase failures, split by whether buyer funds have reached the
/// stealth address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    /// Pre-flight check failed; nothing was submitted
    #[error("{0}")]
    Validation(String),

    /// Approval or purchase failed before the stealth address was funded
    #[error("{0}")]
    PreFunding(String),

    /// Completion failed after funding; funds sit at the stealth address
    #[error("{0}")]
    PostFunding(String),

    /// A bounded wait ran out
    #[error("{message}")]
    Timeout { message: String, funded: bool },

    /// The attempt was superseded by a reset or a newer attempt
    #[error("purchase attempt was cancelled")]
    Cancelled,

    /// The operation is not valid in the current step
    #[error("{0}")]
    InvalidState(String),

    /// Payment completed on chain but the local ticket record was not saved
    #[error("{0}")]
    Persistence(String),
}

impl PurchaseError {
    /// Wrap a chain failure that happened before any stealth funding
    pub fn pre_funding(err: &ChainError) -> Self {
        Self::PreFunding(err.user_message())
    }

    /// Whether buyer funds are parked at the stealth address
    pub fn funds_at_stealth(&self) -> bool {
        matches!(
            self,
            Self::PostFunding(_) | Self::Timeout { funded: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_routing_follows_funding() {
        let before = PurchaseError::Timeout {
            message: "waited too long".into(),
            funded: false,
        };
        let after = PurchaseError::Timeout {
            message: "waited too long".into(),
            funded: true,
        };

        assert!(!before.funds_at_stealth());
        assert!(after.funds_at_stealth());
        assert!(PurchaseError::PostFunding("x".into()).funds_at_stealth());
        assert!(!PurchaseError::Validation("x".into()).funds_at_stealth());
    }

    #[test]
    fn test_chain_error_keeps_original_message() {
        let err = ChainError::from_message("execution reverted: Event sold out");
        assert_eq!(err.kind, FailureKind::SoldOut);
        assert_eq!(err.to_string(), "execution reverted: Event sold out");
        assert_ne!(err.user_message(), err.message);
    }
}
