//! Classification of wallet/contract failures into user-facing causes
//!
//! Collaborators should construct [`ChainError`](crate::error::ChainError)
//! with an explicit [`FailureKind`] when they can decode a structured revert.
//! Text matching here is the fallback for everything else.

use serde::{Deserialize, Serialize};

/// Cause of a failed chain call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserRejected,
    EventInactive,
    SoldOut,
    EventExpired,
    AlreadyPurchased,
    WrongRole,
    InsufficientFunds,
    InvalidStealthAddress,
    InvalidGasAmount,
    TokenTransferFailed,
    RecoveryLocked,
    NoPendingPurchase,
    Network,
    Unknown,
}

/// Substring table, checked in order against the lowercased message.
/// Earlier rows win: "transfer amount exceeds balance" is a funds problem,
/// not a generic transfer failure.
const PATTERNS: &[(&[&str], FailureKind)] = &[
    (
        &["user rejected", "user denied", "rejected the request", "action_rejected"],
        FailureKind::UserRejected,
    ),
    (
        &["event not active", "event is not active", "event inactive", "not active"],
        FailureKind::EventInactive,
    ),
    (
        &["sold out", "no tickets available", "max supply"],
        FailureKind::SoldOut,
    ),
    (
        &["event expired", "event has ended", "event ended", "event has passed"],
        FailureKind::EventExpired,
    ),
    (
        &["already purchased", "already has ticket", "already owns", "ticket already"],
        FailureKind::AlreadyPurchased,
    ),
    (
        &["only users", "not a user", "creators cannot", "invalid role", "not registered"],
        FailureKind::WrongRole,
    ),
    (
        &["insufficient funds", "insufficient balance", "exceeds balance", "insufficient allowance"],
        FailureKind::InsufficientFunds,
    ),
    (
        &["invalid stealth address", "stealth address cannot be zero"],
        FailureKind::InvalidStealthAddress,
    ),
    (&["invalid gas amount", "gas amount"], FailureKind::InvalidGasAmount),
    (
        &["transfer failed", "transferfrom failed", "erc20:"],
        FailureKind::TokenTransferFailed,
    ),
    (
        &["recovery not available", "cooldown", "too early"],
        FailureKind::RecoveryLocked,
    ),
    (
        &["no pending purchase", "already completed"],
        FailureKind::NoPendingPurchase,
    ),
    (
        &["network", "timeout", "timed out", "connection", "rate limit"],
        FailureKind::Network,
    ),
];

/// Classify free-form failure text
pub fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| lower.contains(needle)))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

/// Message shown to the buyer. Unknown causes pass the original text through.
pub fn user_message(kind: FailureKind, original: &str) -> String {
    let text = match kind {
        FailureKind::UserRejected => "Transaction was rejected in your wallet.",
        FailureKind::EventInactive => "This event is not currently active.",
        FailureKind::SoldOut => "This event is sold out.",
        FailureKind::EventExpired => "This event has already ended.",
        FailureKind::AlreadyPurchased => "You have already purchased a ticket for this event.",
        FailureKind::WrongRole => "Only registered users can purchase tickets.",
        FailureKind::InsufficientFunds => {
            "Insufficient funds to complete the purchase (MJPY or gas)."
        }
        FailureKind::InvalidStealthAddress => "The generated stealth address was rejected.",
        FailureKind::InvalidGasAmount => "The gas funding amount is invalid.",
        FailureKind::TokenTransferFailed => "MJPY token transfer failed.",
        FailureKind::RecoveryLocked => {
            "Emergency recovery is not available yet. It unlocks 24 hours after funding."
        }
        FailureKind::NoPendingPurchase => "No pending payment exists for this stealth address.",
        FailureKind::Network => "Network error while talking to the blockchain. Please retry.",
        FailureKind::Unknown => return original.to_string(),
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_reverts() {
        let cases = [
            ("MetaMask Tx Signature: User denied transaction signature.", FailureKind::UserRejected),
            ("execution reverted: Event is not active", FailureKind::EventInactive),
            ("execution reverted: Event sold out", FailureKind::SoldOut),
            ("execution reverted: Event has ended", FailureKind::EventExpired),
            ("execution reverted: Already purchased ticket", FailureKind::AlreadyPurchased),
            ("execution reverted: Only users can purchase", FailureKind::WrongRole),
            ("ERC20: transfer amount exceeds balance", FailureKind::InsufficientFunds),
            ("execution reverted: Invalid stealth address", FailureKind::InvalidStealthAddress),
            ("execution reverted: Invalid gas amount", FailureKind::InvalidGasAmount),
            ("MJPY transferFrom failed", FailureKind::TokenTransferFailed),
            ("Recovery not available yet", FailureKind::RecoveryLocked),
            ("request timed out", FailureKind::Network),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(message), expected, "message: {}", message);
        }
    }

    #[test]
    fn test_unknown_passes_through() {
        let original = "execution reverted: custom error 0xdeadbeef";
        assert_eq!(classify(original), FailureKind::Unknown);
        assert_eq!(user_message(FailureKind::Unknown, original), original);
    }

    #[test]
    fn test_user_messages_are_specific() {
        assert!(user_message(FailureKind::SoldOut, "x").contains("sold out"));
        assert!(user_message(FailureKind::RecoveryLocked, "x").contains("24 hours"));
    }
}
