//! Ticket purchase protocol
//!
//! A purchase runs as a strictly sequential series of phases:
//!
//! 1. validate the buyer, the event and the token balance
//! 2. generate a fresh stealth address
//! 3. approve `price + fee` to the event contract
//! 4. submit `purchaseTicket`, which funds the stealth address
//! 5. wait for the funding (log subscription raced against balance polling)
//! 6. sign `completePayment` with the stealth key
//! 7. record the ticket
//!
//! Failures up to phase 4 end in [`PurchaseStep::Error`]. Once the stealth
//! address holds buyer funds, failures end in
//! [`PurchaseStep::EmergencyRecovery`] instead.

mod funding;
mod machine;

use serde::{Deserialize, Serialize};

use crate::chain::{Address, TxHash};
use crate::crypto::SecretScalar;

pub use funding::{CompletionGuard, FundingSignal, FundingTarget, FundingWatch};
pub use machine::{CancelHandle, PurchaseSession};

/// Progress once the purchase transaction hash is known
pub const PURCHASE_SUBMITTED_PROGRESS: u8 = 70;

/// The active phase of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStep {
    #[default]
    Idle,
    Validating,
    GeneratingStealth,
    ApprovingMjpy,
    Purchasing,
    WaitingForFunds,
    SettingUpStealth,
    CompletingPayment,
    Success,
    Error,
    EmergencyRecovery,
}

impl PurchaseStep {
    /// Human-readable status line
    pub fn message(&self) -> &'static str {
        match self {
            PurchaseStep::Idle => "Ready to purchase",
            PurchaseStep::Validating => "Validating purchase requirements...",
            PurchaseStep::GeneratingStealth => "Generating stealth address for privacy...",
            PurchaseStep::ApprovingMjpy => "Approving MJPY spending...",
            PurchaseStep::Purchasing => "Purchasing ticket...",
            PurchaseStep::WaitingForFunds => "Waiting for funds to reach stealth address...",
            PurchaseStep::SettingUpStealth => "Setting up stealth address...",
            PurchaseStep::CompletingPayment => "Completing payment and minting ticket...",
            PurchaseStep::Success => "Ticket purchased successfully!",
            PurchaseStep::Error => "Purchase failed",
            PurchaseStep::EmergencyRecovery => {
                "Payment completion failed. Your funds are safe at the stealth address and can be recovered."
            }
        }
    }

    /// Progress on entering this step. Terminal failure steps keep whatever
    /// progress was reached.
    pub fn checkpoint(&self) -> Option<u8> {
        match self {
            PurchaseStep::Idle | PurchaseStep::Validating => Some(0),
            PurchaseStep::GeneratingStealth => Some(5),
            PurchaseStep::ApprovingMjpy => Some(20),
            PurchaseStep::Purchasing => Some(50),
            PurchaseStep::WaitingForFunds => Some(75),
            PurchaseStep::SettingUpStealth => Some(80),
            PurchaseStep::CompletingPayment => Some(85),
            PurchaseStep::Success => Some(100),
            PurchaseStep::Error | PurchaseStep::EmergencyRecovery => None,
        }
    }

    /// Steps during which chain calls may be in flight
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            PurchaseStep::Idle
                | PurchaseStep::Success
                | PurchaseStep::Error
                | PurchaseStep::EmergencyRecovery
        )
    }
}

/// Caller input for one purchase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseParams {
    pub event_address: String,
    /// Decimal string in native units, e.g. `"0.01"`
    pub gas_amount: String,
    /// Integer string of raw token units (4 implied decimals)
    pub ticket_price: String,
    pub user_address: String,
    #[serde(default)]
    pub quantity: Option<u32>,
}

/// Observable purchase state
#[derive(Debug, Clone, Default)]
pub struct TicketPurchaseState {
    pub current_step: PurchaseStep,
    /// 0 to 100, non-decreasing within one attempt
    pub progress: u8,
    pub error: Option<String>,
    pub is_loading: bool,
    pub event_address: Option<Address>,
    pub stealth_address: Option<Address>,
    pub stealth_private_key: Option<SecretScalar>,
    pub purchase_tx_hash: Option<TxHash>,
    pub complete_tx_hash: Option<TxHash>,
    pub token_id: Option<u64>,
    pub emergency_recovery_available: bool,
    /// Unix seconds when the stealth address was funded
    pub funded_at: Option<i64>,
    pub recovery_tx_hash: Option<TxHash>,
}

impl TicketPurchaseState {
    pub fn message(&self) -> &'static str {
        self.current_step.message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_serialization() {
        assert_eq!(
            serde_json::to_string(&PurchaseStep::ApprovingMjpy).unwrap(),
            "\"approving_mjpy\""
        );
        assert_eq!(
            serde_json::to_string(&PurchaseStep::EmergencyRecovery).unwrap(),
            "\"emergency_recovery\""
        );
    }

    #[test]
    fn test_checkpoints_increase_along_happy_path() {
        let path = [
            PurchaseStep::Validating,
            PurchaseStep::GeneratingStealth,
            PurchaseStep::ApprovingMjpy,
            PurchaseStep::Purchasing,
            PurchaseStep::WaitingForFunds,
            PurchaseStep::SettingUpStealth,
            PurchaseStep::CompletingPayment,
            PurchaseStep::Success,
        ];
        let values: Vec<u8> = path.iter().filter_map(|s| s.checkpoint()).collect();
        assert_eq!(values.len(), path.len());
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(values.iter().filter(|&&v| v == 100).count() == 1);
        assert!(PURCHASE_SUBMITTED_PROGRESS > PurchaseStep::Purchasing.checkpoint().unwrap());
        assert!(PURCHASE_SUBMITTED_PROGRESS < PurchaseStep::WaitingForFunds.checkpoint().unwrap());
    }

    #[test]
    fn test_every_step_has_a_message() {
        assert!(!PurchaseStep::Idle.message().is_empty());
        assert!(PurchaseStep::EmergencyRecovery.message().contains("recovered"));
        assert!(!PurchaseStep::Success.is_active());
        assert!(PurchaseStep::WaitingForFunds.is_active());
    }
}
