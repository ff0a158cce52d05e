//! Durable record of purchased tickets
//!
//! Records are keyed by event address. Every mutation re-persists the
//! whole collection through a [`LocalDurableStore`], and the in-memory copy
//! only changes once the write succeeded.

pub mod backend;
pub mod encrypted;

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::chain::{Address, TxHash};
use crate::crypto::SecretScalar;
use crate::error::{CryptoError, StoreError};

pub use backend::{FileStore, LocalDurableStore, MemoryStore};
pub use encrypted::{EncryptedStore, KdfParams, SealedBlob};

const SNAPSHOT_VERSION: u32 = 1;

/// A completed purchase.
///
/// `stealth_private_key` controls the ticket NFT and must never leave local
/// storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketData {
    pub event_address: Address,
    pub stealth_address: Address,
    /// `0x` hex scalar
    pub stealth_private_key: String,
    /// `None` when the mint log was missing from the completion receipt
    pub token_id: Option<u64>,
    /// Raw token units
    pub ticket_price: String,
    /// RFC 3339
    pub purchase_date: String,
    pub main_wallet: Address,
    pub purchase_tx_hash: TxHash,
    pub complete_tx_hash: TxHash,
    pub event_name: String,
    pub event_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_address: Option<String>,
}

impl TicketData {
    /// Parse the stored stealth key
    pub fn stealth_key(&self) -> Result<SecretScalar, CryptoError> {
        SecretScalar::from_hex(&self.stealth_private_key)
    }
}

impl Drop for TicketData {
    fn drop(&mut self) {
        self.stealth_private_key.zeroize();
    }
}

impl fmt::Debug for TicketData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketData")
            .field("event_address", &self.event_address)
            .field("stealth_address", &self.stealth_address)
            .field("token_id", &self.token_id)
            .field("event_name", &self.event_name)
            .field("purchase_tx_hash", &self.purchase_tx_hash)
            .finish_non_exhaustive()
    }
}

/// Partial update applied by [`TicketRepository::update_ticket`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketUpdate {
    pub token_id: Option<u64>,
    pub complete_tx_hash: Option<TxHash>,
    pub event_name: Option<String>,
    pub event_date: Option<String>,
}

impl TicketUpdate {
    fn apply(self, ticket: &mut TicketData) {
        if let Some(token_id) = self.token_id {
            ticket.token_id = Some(token_id);
        }
        if let Some(hash) = self.complete_tx_hash {
            ticket.complete_tx_hash = hash;
        }
        if let Some(name) = self.event_name {
            ticket.event_name = name;
        }
        if let Some(date) = self.event_date {
            ticket.event_date = date;
        }
    }
}

/// Ticket persistence as seen by the purchase flow
pub trait TicketRepository: Send + Sync {
    /// Reload from durable storage, replacing the in-memory copy
    fn load(&self) -> Result<usize, StoreError>;

    /// Rejects a second ticket for the same event
    fn add_ticket(&self, ticket: TicketData) -> Result<(), StoreError>;

    fn get_ticket_by_event_address(&self, event: &Address) -> Option<TicketData>;

    fn remove_ticket(&self, event: &Address) -> Result<TicketData, StoreError>;

    fn update_ticket(&self, event: &Address, update: TicketUpdate)
        -> Result<TicketData, StoreError>;

    fn tickets(&self) -> Vec<TicketData>;
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    tickets: Vec<TicketData>,
}

/// [`TicketRepository`] over any durable backend
pub struct TicketStore<B> {
    backend: B,
    namespace: String,
    tickets: Mutex<Vec<TicketData>>,
}

impl<B: LocalDurableStore> TicketStore<B> {
    /// Open and load the existing collection, if any
    pub fn open(backend: B, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let store = Self {
            backend,
            namespace: namespace.into(),
            tickets: Mutex::new(Vec::new()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn read_snapshot(&self) -> Result<Vec<TicketData>, StoreError> {
        match self.backend.get(&self.namespace)? {
            Some(mut raw) => {
                let parsed = serde_json::from_slice::<Snapshot>(&raw);
                raw.zeroize();
                Ok(parsed?.tickets)
            }
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, tickets: &[TicketData]) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            tickets: tickets.to_vec(),
        };
        let mut json = serde_json::to_vec(&snapshot)?;
        let result = self.backend.set(&self.namespace, &json);
        json.zeroize();
        result
    }

    /// Copy-on-write mutation; memory is updated only after a successful write
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<TicketData>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tickets = self.tickets.lock();
        let mut next = tickets.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *tickets = next;
        Ok(out)
    }
}

impl<B: LocalDurableStore> TicketRepository for TicketStore<B> {
    fn load(&self) -> Result<usize, StoreError> {
        let loaded = self.read_snapshot()?;
        let count = loaded.len();
        *self.tickets.lock() = loaded;
        debug!(namespace = %self.namespace, count, "loaded ticket records");
        Ok(count)
    }

    fn add_ticket(&self, ticket: TicketData) -> Result<(), StoreError> {
        let event = ticket.event_address;
        self.mutate(|tickets| {
            if tickets.iter().any(|t| t.event_address == event) {
                return Err(StoreError::DuplicateTicket(event.to_string()));
            }
            tickets.push(ticket);
            Ok(())
        })?;
        info!(%event, "ticket recorded");
        Ok(())
    }

    fn get_ticket_by_event_address(&self, event: &Address) -> Option<TicketData> {
        self.tickets
            .lock()
            .iter()
            .find(|t| t.event_address == *event)
            .cloned()
    }

    fn remove_ticket(&self, event: &Address) -> Result<TicketData, StoreError> {
        let removed = self.mutate(|tickets| {
            let index = tickets
                .iter()
                .position(|t| t.event_address == *event)
                .ok_or_else(|| StoreError::NotFound(event.to_string()))?;
            Ok(tickets.remove(index))
        })?;
        info!(%event, "ticket removed");
        Ok(removed)
    }

    fn update_ticket(
        &self,
        event: &Address,
        update: TicketUpdate,
    ) -> Result<TicketData, StoreError> {
        self.mutate(|tickets| {
            let ticket = tickets
                .iter_mut()
                .find(|t| t.event_address == *event)
                .ok_or_else(|| StoreError::NotFound(event.to_string()))?;
            update.apply(ticket);
            Ok(ticket.clone())
        })
    }

    fn tickets(&self) -> Vec<TicketData> {
        self.tickets.lock().clone()
    }
}

/// Parse a user-supplied event address for store lookups
pub fn parse_event_address(input: &str) -> Result<Address, StoreError> {
    input
        .parse()
        .map_err(|_| StoreError::InvalidEventAddress(input.to_string()))
}
