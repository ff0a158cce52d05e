//! In-process devnet implementing every chain collaborator
//!
//! Models the MJPY token, the identity registry and event contracts with
//! the rules the purchase flow depends on:
//!
//! - `purchaseTicket` pulls `price + fee` from the buyer (allowance
//!   required), forwards it and the native gas amount to the stealth
//!   address, and emits `StealthAddressFunded`
//! - `completePayment` must be sent by a funded stealth address; it pays the
//!   organizer and the platform, then mints the ticket NFT to the stealth
//!   address
//! - `emergencyRecovery` refunds the buyer once the cooldown has elapsed
//!
//! Every write is mined immediately into its own block. Faults can be
//! injected per function to exercise error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha3::{Digest, Keccak256};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Address, ChainClients, ChainEvent, ChainEvents, ChainRead, ChainWrite, ContractCall,
    EventInfo, Role, StealthAddressFunded, TokenBalanceQuery, TxHash, TxReceipt, TxSigner,
};
use crate::amount::{platform_fee_raw, PLATFORM_FEE_UNITS, TOKEN_DECIMALS};
use crate::config::RECOVERY_DELAY_SECS;
use crate::crypto::address_from_private_key;
use crate::error::ChainError;

const SUBSCRIBER_BUFFER: usize = 16;

/// An injected failure for the next call of one contract function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The wallet/RPC refuses the call; nothing is mined
    Reject(String),
    /// The call is mined but reverts
    Revert(String),
}

#[derive(Debug, Clone)]
struct PendingPurchase {
    buyer: Address,
    amount: u128,
    funded_at: i64,
}

#[derive(Debug, Clone)]
struct EventContract {
    info: EventInfo,
    buyers: HashSet<Address>,
    pending: HashMap<Address, PendingPurchase>,
}

#[derive(Default)]
struct DevnetState {
    block: u64,
    now: i64,
    nonce: u64,
    next_token_id: u64,
    balances: HashMap<Address, u128>,
    native: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
    roles: HashMap<Address, Role>,
    events: HashMap<Address, EventContract>,
    receipts: HashMap<TxHash, TxReceipt>,
    subscribers: HashMap<Address, Vec<mpsc::Sender<StealthAddressFunded>>>,
    faults: HashMap<&'static str, VecDeque<Fault>>,
    writes: Vec<ContractCall>,
    silence_funding_logs: bool,
    balance_outage: bool,
}

/// In-memory chain with the event contract's rules
pub struct Devnet {
    token: Address,
    treasury: Address,
    platform_fee: u128,
    recovery_delay: i64,
    state: Mutex<DevnetState>,
}

impl Default for Devnet {
    fn default() -> Self {
        Self::new()
    }
}

impl Devnet {
    pub fn new() -> Self {
        let state = DevnetState {
            block: 1,
            now: chrono::Utc::now().timestamp(),
            next_token_id: 1,
            ..DevnetState::default()
        };
        Self {
            token: derive_address(b"devnet/mjpy"),
            treasury: derive_address(b"devnet/treasury"),
            platform_fee: platform_fee_raw(PLATFORM_FEE_UNITS, TOKEN_DECIMALS).unwrap_or(10_000),
            recovery_delay: RECOVERY_DELAY_SECS as i64,
            state: Mutex::new(state),
        }
    }

    /// All four collaborator capabilities backed by this devnet
    pub fn clients(self: &Arc<Self>) -> ChainClients {
        ChainClients::from_single(self.clone())
    }

    /// MJPY token contract
    pub fn token(&self) -> Address {
        self.token
    }

    /// Receiver of platform fees
    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn platform_fee(&self) -> u128 {
        self.platform_fee
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Deploy an active event contract
    pub fn create_event(
        &self,
        name: &str,
        date: &str,
        organizer: Address,
        ticket_price: u128,
        capacity: u64,
    ) -> Address {
        let mut state = self.state.lock();
        state.nonce += 1;
        let mut seed = b"devnet/event/".to_vec();
        seed.extend_from_slice(&state.nonce.to_be_bytes());
        let address = derive_address(&seed);

        state.events.insert(
            address,
            EventContract {
                info: EventInfo {
                    address,
                    name: name.to_string(),
                    date: date.to_string(),
                    organizer,
                    ticket_price,
                    active: true,
                    tickets_sold: 0,
                    capacity,
                },
                buyers: HashSet::new(),
                pending: HashMap::new(),
            },
        );
        state.roles.insert(organizer, Role::Creator);
        address
    }

    pub fn set_event_active(&self, event: Address, active: bool) {
        if let Some(contract) = self.state.lock().events.get_mut(&event) {
            contract.info.active = active;
        }
    }

    pub fn set_role(&self, account: Address, role: Role) {
        self.state.lock().roles.insert(account, role);
    }

    /// Credit MJPY out of thin air
    pub fn mint(&self, account: Address, amount: u128) {
        *self.state.lock().balances.entry(account).or_default() += amount;
    }

    pub fn balance_of(&self, account: Address) -> u128 {
        self.state.lock().balances.get(&account).copied().unwrap_or(0)
    }

    pub fn native_balance_of(&self, account: Address) -> u128 {
        self.state.lock().native.get(&account).copied().unwrap_or(0)
    }

    pub fn event(&self, event: Address) -> Option<EventInfo> {
        self.state.lock().events.get(&event).map(|c| c.info.clone())
    }

    /// Unix seconds on the devnet clock
    pub fn now(&self) -> i64 {
        self.state.lock().now
    }

    pub fn advance_time(&self, secs: i64) {
        self.state.lock().now += secs;
    }

    /// Mine an empty block
    pub fn mine_block(&self) {
        self.state.lock().block += 1;
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Queue a fault for the next call of `function` (e.g. `"completePayment"`)
    pub fn inject(&self, function: &'static str, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(function)
            .or_default()
            .push_back(fault);
    }

    /// Reject the next call of `function` with `message`
    pub fn fail_next(&self, function: &'static str, message: &str) {
        self.inject(function, Fault::Reject(message.to_string()));
    }

    /// Stop delivering `StealthAddressFunded` to subscribers
    pub fn silence_funding_logs(&self, silent: bool) {
        self.state.lock().silence_funding_logs = silent;
    }

    /// Make [`TokenBalanceQuery`] fail, as during an indexer outage
    pub fn set_balance_outage(&self, outage: bool) {
        self.state.lock().balance_outage = outage;
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Every accepted or reverted write, in order
    pub fn writes(&self) -> Vec<ContractCall> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self, function: &str) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|call| call.function_name() == function)
            .count()
    }

    pub fn is_pending(&self, event: Address, stealth: Address) -> bool {
        self.state
            .lock()
            .events
            .get(&event)
            .map(|c| c.pending.contains_key(&stealth))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Contract execution
    // ------------------------------------------------------------------

    fn execute(
        &self,
        state: &mut DevnetState,
        call: &ContractCall,
        sender: Address,
    ) -> Result<Vec<ChainEvent>, String> {
        match call {
            ContractCall::Approve {
                token,
                spender,
                amount,
            } => {
                if *token != self.token {
                    return Err(format!("execution reverted: no token at {}", token));
                }
                state.allowances.insert((sender, *spender), *amount);
                Ok(Vec::new())
            }

            ContractCall::PurchaseTicket {
                event,
                stealth_address,
                gas_amount,
            } => {
                let now = state.now;
                let role = state.roles.get(&sender).copied().unwrap_or(Role::Unregistered);
                let contract = state
                    .events
                    .get(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;

                if !contract.info.active {
                    return Err("execution reverted: Event is not active".into());
                }
                if contract.info.tickets_sold + contract.pending.len() as u64
                    >= contract.info.capacity
                {
                    return Err("execution reverted: Event sold out".into());
                }
                if role != Role::User {
                    return Err("execution reverted: Only users can purchase tickets".into());
                }
                if contract.buyers.contains(&sender) {
                    return Err("execution reverted: Already purchased ticket".into());
                }
                if stealth_address.is_zero() || contract.pending.contains_key(stealth_address) {
                    return Err("execution reverted: Invalid stealth address".into());
                }
                if *gas_amount == 0 {
                    return Err("execution reverted: Invalid gas amount".into());
                }

                let total = contract.info.ticket_price + self.platform_fee;
                let allowance = state
                    .allowances
                    .get(&(sender, *event))
                    .copied()
                    .unwrap_or(0);
                if allowance < total {
                    return Err("execution reverted: ERC20: insufficient allowance".into());
                }
                let balance = state.balances.get(&sender).copied().unwrap_or(0);
                if balance < total {
                    return Err("execution reverted: ERC20: transfer amount exceeds balance".into());
                }

                state.allowances.insert((sender, *event), allowance - total);
                state.balances.insert(sender, balance - total);
                *state.balances.entry(*stealth_address).or_default() += total;
                *state.native.entry(*stealth_address).or_default() += *gas_amount;

                let contract = state
                    .events
                    .get_mut(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;
                contract.buyers.insert(sender);
                contract.pending.insert(
                    *stealth_address,
                    PendingPurchase {
                        buyer: sender,
                        amount: total,
                        funded_at: now,
                    },
                );

                Ok(vec![ChainEvent::StealthAddressFunded(StealthAddressFunded {
                    event: *event,
                    stealth_address: *stealth_address,
                    token_amount: total,
                    gas_amount: *gas_amount,
                    tx_hash: TxHash::default(),
                    timestamp: now,
                })])
            }

            ContractCall::CompletePayment { event } => {
                let contract = state
                    .events
                    .get(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;
                let pending = contract
                    .pending
                    .get(&sender)
                    .cloned()
                    .ok_or_else(|| "execution reverted: No pending purchase for stealth address".to_string())?;
                let organizer = contract.info.organizer;
                let price = contract.info.ticket_price;

                let held = state.balances.get(&sender).copied().unwrap_or(0);
                if held < pending.amount {
                    return Err("execution reverted: ERC20: transfer amount exceeds balance".into());
                }
                if state.native.get(&sender).copied().unwrap_or(0) == 0 {
                    return Err("insufficient funds for gas".into());
                }

                state.balances.insert(sender, held - pending.amount);
                *state.balances.entry(organizer).or_default() += price;
                *state.balances.entry(self.treasury).or_default() += pending.amount - price;

                let token_id = state.next_token_id;
                state.next_token_id += 1;

                let contract = state
                    .events
                    .get_mut(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;
                contract.pending.remove(&sender);
                contract.info.tickets_sold += 1;

                Ok(vec![ChainEvent::TicketMinted {
                    event: *event,
                    to: sender,
                    token_id,
                }])
            }

            ContractCall::EmergencyRecovery {
                event,
                stealth_address,
            } => {
                let now = state.now;
                let contract = state
                    .events
                    .get(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;
                let pending = contract
                    .pending
                    .get(stealth_address)
                    .cloned()
                    .ok_or_else(|| "execution reverted: No pending purchase for stealth address".to_string())?;
                if pending.buyer != sender {
                    return Err("execution reverted: Only the buyer can recover".into());
                }
                if now < pending.funded_at + self.recovery_delay {
                    return Err(
                        "execution reverted: Recovery not available yet: cooldown active".into(),
                    );
                }

                let held = state.balances.get(stealth_address).copied().unwrap_or(0);
                let refunded = held.min(pending.amount);
                state.balances.insert(*stealth_address, held - refunded);
                *state.balances.entry(sender).or_default() += refunded;

                let contract = state
                    .events
                    .get_mut(event)
                    .ok_or_else(|| format!("execution reverted: no event at {}", event))?;
                contract.pending.remove(stealth_address);
                contract.buyers.remove(&sender);

                Ok(vec![ChainEvent::EmergencyRecovered {
                    event: *event,
                    stealth_address: *stealth_address,
                    refunded,
                }])
            }
        }
    }

    fn next_tx_hash(state: &mut DevnetState, call: &ContractCall, sender: Address) -> TxHash {
        state.nonce += 1;
        let mut hasher = Keccak256::new();
        hasher.update(state.nonce.to_be_bytes());
        hasher.update(sender.as_bytes());
        hasher.update(call.function_name().as_bytes());
        TxHash(hasher.finalize().into())
    }
}

fn derive_address(seed: &[u8]) -> Address {
    let hash = Keccak256::digest(seed);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address(bytes)
}

fn signer_address(signer: &TxSigner<'_>) -> Address {
    match signer {
        TxSigner::Wallet(address) => *address,
        TxSigner::Stealth(key) => address_from_private_key(key),
    }
}

#[async_trait]
impl ChainWrite for Devnet {
    async fn write(&self, call: ContractCall, signer: TxSigner<'_>) -> Result<TxHash, ChainError> {
        let function = call.function_name();
        let sender = signer_address(&signer);
        let mut state = self.state.lock();

        let fault = state
            .faults
            .get_mut(function)
            .and_then(|queue| queue.pop_front());

        let outcome = match fault {
            Some(Fault::Reject(message)) => {
                debug!(function, %message, "devnet rejected call");
                return Err(ChainError::from_message(message));
            }
            Some(Fault::Revert(message)) => Err(message),
            None => match self.execute(&mut state, &call, sender) {
                Ok(events) => Ok(events),
                // Gas estimation surfaces the revert before anything is mined
                Err(reason) => {
                    debug!(function, %reason, "devnet call reverted in simulation");
                    return Err(ChainError::from_message(reason));
                }
            },
        };

        let tx_hash = Self::next_tx_hash(&mut state, &call, sender);
        state.block += 1;
        let block_number = state.block;

        let receipt = match outcome {
            Ok(mut events) => {
                for event in events.iter_mut() {
                    if let ChainEvent::StealthAddressFunded(log) = event {
                        log.tx_hash = tx_hash;
                        if !state.silence_funding_logs {
                            if let Some(subs) = state.subscribers.get_mut(&log.event) {
                                subs.retain(|tx| tx.try_send(log.clone()).is_ok() || !tx.is_closed());
                            }
                        }
                    }
                }
                TxReceipt {
                    tx_hash,
                    block_number,
                    success: true,
                    revert_reason: None,
                    events,
                }
            }
            Err(reason) => TxReceipt {
                tx_hash,
                block_number,
                success: false,
                revert_reason: Some(reason),
                events: Vec::new(),
            },
        };

        debug!(function, %tx_hash, success = receipt.success, "devnet mined transaction");
        state.writes.push(call);
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }
}

#[async_trait]
impl ChainRead for Devnet {
    async fn user_role(&self, user: Address) -> Result<Role, ChainError> {
        Ok(self
            .state
            .lock()
            .roles
            .get(&user)
            .copied()
            .unwrap_or(Role::Unregistered))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<u128, ChainError> {
        if token != self.token {
            return Err(ChainError::from_message(format!("no token at {}", token)));
        }
        Ok(self.balance_of(owner))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u128, ChainError> {
        if token != self.token {
            return Err(ChainError::from_message(format!("no token at {}", token)));
        }
        Ok(self
            .state
            .lock()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or(0))
    }

    async fn event_info(&self, event: Address) -> Result<EventInfo, ChainError> {
        self.event(event)
            .ok_or_else(|| ChainError::from_message(format!("no event contract at {}", event)))
    }

    async fn receipt(&self, tx: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.state.lock().receipts.get(&tx).cloned())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().block)
    }
}

#[async_trait]
impl ChainEvents for Devnet {
    async fn subscribe_funded(
        &self,
        event: Address,
    ) -> Result<mpsc::Receiver<StealthAddressFunded>, ChainError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.state
            .lock()
            .subscribers
            .entry(event)
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl TokenBalanceQuery for Devnet {
    async fn token_balance_of(&self, token: Address, owner: Address) -> Result<u128, ChainError> {
        if self.state.lock().balance_outage {
            return Err(ChainError::rpc("balance indexer unavailable: connection refused"));
        }
        self.token_balance(token, owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::revert::FailureKind;
    use crate::crypto::generate_private_key;

    struct Fixture {
        devnet: Arc<Devnet>,
        buyer: Address,
        organizer: Address,
        event: Address,
    }

    fn fixture() -> Fixture {
        let devnet = Arc::new(Devnet::new());
        let buyer = Address([0xb0; 20]);
        let organizer = Address([0x0e; 20]);
        let event = devnet.create_event("Launch Party", "2026-12-01", organizer, 20_000_000, 2);
        devnet.set_role(buyer, Role::User);
        devnet.mint(buyer, 50_000_000);
        Fixture {
            devnet,
            buyer,
            organizer,
            event,
        }
    }

    async fn approve_and_buy(f: &Fixture, stealth: Address) -> Result<TxHash, ChainError> {
        f.devnet
            .write(
                ContractCall::Approve {
                    token: f.devnet.token(),
                    spender: f.event,
                    amount: 20_010_000,
                },
                TxSigner::Wallet(f.buyer),
            )
            .await?;
        f.devnet
            .write(
                ContractCall::PurchaseTicket {
                    event: f.event,
                    stealth_address: stealth,
                    gas_amount: 1_000,
                },
                TxSigner::Wallet(f.buyer),
            )
            .await
    }

    #[tokio::test]
    async fn test_full_purchase_moves_funds() {
        let f = fixture();
        let key = generate_private_key();
        let stealth = address_from_private_key(&key);
        let mut funded = f.devnet.subscribe_funded(f.event).await.unwrap();

        approve_and_buy(&f, stealth).await.unwrap();
        assert_eq!(f.devnet.balance_of(stealth), 20_010_000);
        assert_eq!(f.devnet.native_balance_of(stealth), 1_000);

        let log = funded.recv().await.unwrap();
        assert_eq!(log.stealth_address, stealth);
        assert_eq!(log.token_amount, 20_010_000);

        let tx = f
            .devnet
            .write(ContractCall::CompletePayment { event: f.event }, TxSigner::Stealth(&key))
            .await
            .unwrap();
        let receipt = f.devnet.receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.minted_token_id(&stealth), Some(1));
        assert_eq!(f.devnet.balance_of(f.organizer), 20_000_000);
        assert_eq!(f.devnet.balance_of(f.devnet.treasury()), 10_000);
        assert_eq!(f.devnet.event(f.event).unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn test_contract_rules_revert_with_known_reasons() {
        let f = fixture();
        let stealth = Address([0x5e; 20]);

        // No allowance yet
        let err = f
            .devnet
            .write(
                ContractCall::PurchaseTicket {
                    event: f.event,
                    stealth_address: stealth,
                    gas_amount: 1,
                },
                TxSigner::Wallet(f.buyer),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InsufficientFunds);

        approve_and_buy(&f, stealth).await.unwrap();
        let err = approve_and_buy(&f, Address([0x5f; 20])).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::AlreadyPurchased);

        f.devnet.set_event_active(f.event, false);
        let other = Address([0xb1; 20]);
        f.devnet.set_role(other, Role::User);
        let err = f
            .devnet
            .write(
                ContractCall::PurchaseTicket {
                    event: f.event,
                    stealth_address: Address([0x60; 20]),
                    gas_amount: 1,
                },
                TxSigner::Wallet(other),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::EventInactive);
    }

    #[tokio::test]
    async fn test_recovery_is_time_locked() {
        let f = fixture();
        let stealth = Address([0x61; 20]);
        approve_and_buy(&f, stealth).await.unwrap();
        let recover = ContractCall::EmergencyRecovery {
            event: f.event,
            stealth_address: stealth,
        };

        let err = f
            .devnet
            .write(recover.clone(), TxSigner::Wallet(f.buyer))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::RecoveryLocked);

        f.devnet.advance_time(RECOVERY_DELAY_SECS as i64);
        f.devnet
            .write(recover, TxSigner::Wallet(f.buyer))
            .await
            .unwrap();
        assert_eq!(f.devnet.balance_of(f.buyer), 50_000_000);
        assert!(!f.devnet.is_pending(f.event, stealth));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let f = fixture();
        f.devnet.fail_next("approve", "User rejected the request.");
        let err = approve_and_buy(&f, Address([0x62; 20])).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::UserRejected);
        assert_eq!(f.devnet.write_count("approve"), 0);

        f.devnet
            .inject("purchaseTicket", Fault::Revert("execution reverted: Event sold out".into()));
        let tx = approve_and_buy(&f, Address([0x63; 20])).await.unwrap();
        let receipt = f.devnet.receipt(tx).await.unwrap().unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.revert_reason.as_deref(), Some("execution reverted: Event sold out"));
        assert_eq!(f.devnet.balance_of(Address([0x63; 20])), 0);
    }
}
