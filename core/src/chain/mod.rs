//! Chain collaborators consumed by the purchase flow
//!
//! The purchase protocol never talks to an RPC node directly. It drives
//! these traits, which a wallet/RPC integration implements. [`memory`]
//! provides a complete in-process implementation with the event contract's
//! rules, used by tests and the CLI demo.

pub mod memory;
pub mod revert;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::crypto::SecretScalar;
use crate::error::ChainError;

pub use types::{
    Address, AddressParseError, ChainEvent, EventInfo, Role, StealthAddressFunded, TxHash,
    TxReceipt,
};

/// Contract function invocations issued by the purchase flow, in protocol order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// `token.approve(spender, amount)`
    Approve {
        token: Address,
        spender: Address,
        amount: u128,
    },
    /// `event.purchaseTicket(stealthAddress, gasAmount)` with `gasAmount` as native value
    PurchaseTicket {
        event: Address,
        stealth_address: Address,
        gas_amount: u128,
    },
    /// `event.completePayment()` sent from the stealth address
    CompletePayment { event: Address },
    /// `event.emergencyRecovery(stealthAddress)`, time-locked after funding
    EmergencyRecovery {
        event: Address,
        stealth_address: Address,
    },
}

impl ContractCall {
    pub fn contract(&self) -> Address {
        match self {
            ContractCall::Approve { token, .. } => *token,
            ContractCall::PurchaseTicket { event, .. }
            | ContractCall::CompletePayment { event }
            | ContractCall::EmergencyRecovery { event, .. } => *event,
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::Approve { .. } => "approve",
            ContractCall::PurchaseTicket { .. } => "purchaseTicket",
            ContractCall::CompletePayment { .. } => "completePayment",
            ContractCall::EmergencyRecovery { .. } => "emergencyRecovery",
        }
    }
}

/// Who signs a transaction
#[derive(Debug, Clone, Copy)]
pub enum TxSigner<'a> {
    /// The buyer's connected wallet; signing may prompt the user
    Wallet(Address),
    /// A stealth key held locally; signing is silent
    Stealth(&'a SecretScalar),
}

/// Submit transactions
#[async_trait]
pub trait ChainWrite: Send + Sync {
    /// Sign and broadcast `call`. Returns once the transaction is accepted,
    /// not when it is mined.
    async fn write(&self, call: ContractCall, signer: TxSigner<'_>) -> Result<TxHash, ChainError>;
}

/// Read chain state
#[async_trait]
pub trait ChainRead: Send + Sync {
    async fn user_role(&self, user: Address) -> Result<Role, ChainError>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<u128, ChainError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u128, ChainError>;

    async fn event_info(&self, event: Address) -> Result<EventInfo, ChainError>;

    /// Receipt of a mined transaction, `None` while pending
    async fn receipt(&self, tx: TxHash) -> Result<Option<TxReceipt>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

/// Subscribe to contract logs
#[async_trait]
pub trait ChainEvents: Send + Sync {
    /// Stream of `StealthAddressFunded` logs emitted by `event`.
    ///
    /// Implementations without push support may poll logs and feed the
    /// channel themselves.
    async fn subscribe_funded(
        &self,
        event: Address,
    ) -> Result<mpsc::Receiver<StealthAddressFunded>, ChainError>;
}

/// Token balance lookups used by the polling fallback
#[async_trait]
pub trait TokenBalanceQuery: Send + Sync {
    async fn token_balance_of(&self, token: Address, owner: Address) -> Result<u128, ChainError>;
}

/// The set of collaborators a purchase session drives
#[derive(Clone)]
pub struct ChainClients {
    pub writer: Arc<dyn ChainWrite>,
    pub reader: Arc<dyn ChainRead>,
    pub events: Arc<dyn ChainEvents>,
    pub balances: Arc<dyn TokenBalanceQuery>,
}

impl ChainClients {
    /// Use one object for every capability
    pub fn from_single<C>(client: Arc<C>) -> Self
    where
        C: ChainWrite + ChainRead + ChainEvents + TokenBalanceQuery + 'static,
    {
        Self {
            writer: client.clone(),
            reader: client.clone(),
            events: client.clone(),
            balances: client,
        }
    }
}
