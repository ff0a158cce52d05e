//! Stealth-address ticket purchases
//!
//! Each ticket is paid through a fresh one-time stealth address:
//! the buyer's wallet funds the stealth address through the event contract,
//! then the stealth key completes the payment and receives the ticket NFT.
//!
//! Layout:
//! - [`crypto`]: secp256k1 key derivation and stealth address construction
//! - [`service`]: stealth address generation plus balance/receipt polling
//! - [`purchase`]: the purchase state machine and its recovery path
//! - [`store`]: durable, encrypted record of purchased tickets
//! - [`chain`]: collaborator traits for the wallet/RPC layer and an in-memory devnet

pub mod amount;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod purchase;
pub mod service;
pub mod store;




pub use chain::{Address, ChainClients, TxHash};
pub use config::PurchaseConfig;
pub use crypto::{KeyPair, SecretScalar, StealthAddress, StealthDerivation, StealthMetaAddress};
pub use error::{ChainError, CryptoError, PurchaseError, StoreError};
pub use purchase::{
    CancelHandle, PurchaseParams, PurchaseSession, PurchaseStep, TicketPurchaseState,
};
pub use service::StealthAddressService;
pub use store::{TicketData, TicketRepository, TicketStore, TicketUpdate};
