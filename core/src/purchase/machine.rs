//! The purchase state machine
//!
//! State lives in a `watch` channel owned by the session; every mutation
//! goes through [`Shared::update`], which drops writes from superseded
//! attempts. Chain calls run under [`Shared::guarded`] so a reset or a new
//! attempt abandons them instead of letting them land in the newer state.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::funding::{CompletionGuard, FundingSignal, FundingTarget, FundingWatch};
use super::{PurchaseParams, PurchaseStep, TicketPurchaseState, PURCHASE_SUBMITTED_PROGRESS};
use crate::amount::{format_units, parse_decimal, parse_raw, NATIVE_DECIMALS};
use crate::chain::{Address, ChainClients, ContractCall, Role, TxHash, TxReceipt, TxSigner};
use crate::config::PurchaseConfig;
use crate::crypto::{StealthAddress, StealthDerivation};
use crate::error::{ChainError, PurchaseError};
use crate::service::StealthAddressService;
use crate::store::{TicketData, TicketRepository};

const UPDATE_BUFFER: usize = 64;

/// Everything phase 6 needs, retained so `retry` can skip phases 1-5
#[derive(Clone)]
struct PurchaseContext {
    user: Address,
    event: Address,
    ticket_price: u128,
    total: u128,
    event_name: String,
    event_date: String,
    stealth: StealthAddress,
    purchase_tx: Option<TxHash>,
}

/// Output of phase 1
struct Validated {
    user: Address,
    event: Address,
    ticket_price: u128,
    total: u128,
    gas_amount: u128,
    event_name: String,
    event_date: String,
}

struct Shared {
    attempt: watch::Sender<u64>,
    state: watch::Sender<TicketPurchaseState>,
    updates: broadcast::Sender<TicketPurchaseState>,
    context: Mutex<Option<PurchaseContext>>,
    guard: CompletionGuard,
}

impl Shared {
    fn new() -> Self {
        let (attempt, _) = watch::channel(0);
        let (state, _) = watch::channel(TicketPurchaseState::default());
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            attempt,
            state,
            updates,
            context: Mutex::new(None),
            guard: CompletionGuard::new(),
        }
    }

    fn current_attempt(&self) -> u64 {
        *self.attempt.borrow()
    }

    fn publish(&self) {
        // No subscribers is fine
        let _ = self.updates.send(self.state.borrow().clone());
    }

    /// Apply `f` if `attempt` is still current
    fn update(
        &self,
        attempt: u64,
        f: impl FnOnce(&mut TicketPurchaseState),
    ) -> Result<(), PurchaseError> {
        let applied = self.state.send_if_modified(|state| {
            if *self.attempt.borrow() != attempt {
                return false;
            }
            f(state);
            true
        });
        if !applied {
            return Err(PurchaseError::Cancelled);
        }
        self.publish();
        Ok(())
    }

    /// Open a new attempt unless one is running or funds await recovery
    fn begin_attempt(&self) -> Result<u64, PurchaseError> {
        let mut refusal = None;
        let mut attempt = 0;
        self.state.send_if_modified(|state| {
            if state.current_step == PurchaseStep::EmergencyRecovery {
                refusal = Some(PurchaseError::InvalidState(
                    "A previous purchase is awaiting recovery. Retry or recover it, or reset first."
                        .into(),
                ));
                return false;
            }
            if state.is_loading {
                refusal = Some(PurchaseError::InvalidState(
                    "A purchase is already in progress".into(),
                ));
                return false;
            }
            self.attempt.send_modify(|a| *a += 1);
            attempt = *self.attempt.borrow();
            *state = TicketPurchaseState {
                current_step: PurchaseStep::Validating,
                is_loading: true,
                ..TicketPurchaseState::default()
            };
            true
        });

        if let Some(refusal) = refusal {
            return Err(refusal);
        }
        self.guard.rearm();
        *self.context.lock() = None;
        self.publish();
        Ok(attempt)
    }

    /// Abandon the current attempt and return to idle
    fn reset(&self) {
        {
            let state = self.state.borrow();
            if state.current_step == PurchaseStep::EmergencyRecovery {
                warn!(
                    stealth = ?state.stealth_address,
                    "discarding stealth key while funds await recovery; emergencyRecovery from the buyer wallet remains possible"
                );
            }
        }
        self.attempt.send_modify(|a| *a += 1);
        self.guard.rearm();
        *self.context.lock() = None;
        self.state.send_replace(TicketPurchaseState::default());
        self.publish();
    }

    /// Mark the session busy for a recovery; refused while anything else runs
    fn claim_for_recovery(&self) -> Result<u64, PurchaseError> {
        let mut claimed = None;
        self.state.send_if_modified(|state| {
            if state.is_loading {
                return false;
            }
            state.is_loading = true;
            claimed = Some(*self.attempt.borrow());
            true
        });
        let attempt = claimed.ok_or_else(|| {
            PurchaseError::InvalidState(
                "A purchase step is still running; wait for it to finish before recovering".into(),
            )
        })?;
        self.publish();
        Ok(attempt)
    }

    /// Clear the recovered purchase and retire its attempt.
    ///
    /// Returns false when the state no longer belongs to `stealth`.
    fn complete_recovery(&self, attempt: u64, stealth: Address, tx: TxHash) -> bool {
        let cleared = self.state.send_if_modified(|state| {
            if *self.attempt.borrow() != attempt || state.stealth_address != Some(stealth) {
                return false;
            }
            self.attempt.send_modify(|a| *a += 1);
            *state = TicketPurchaseState {
                recovery_tx_hash: Some(tx),
                ..TicketPurchaseState::default()
            };
            true
        });
        if cleared {
            self.guard.rearm();
            *self.context.lock() = None;
            self.publish();
        }
        cleared
    }

    /// Run `fut` unless the attempt is superseded first
    async fn guarded<F: Future>(&self, attempt: u64, fut: F) -> Result<F::Output, PurchaseError> {
        let mut changes = self.attempt.subscribe();
        if *changes.borrow_and_update() != attempt {
            return Err(PurchaseError::Cancelled);
        }

        let superseded = async {
            loop {
                if changes.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *changes.borrow() != attempt {
                    break;
                }
            }
        };

        tokio::select! {
            out = fut => {
                if self.current_attempt() == attempt {
                    Ok(out)
                } else {
                    Err(PurchaseError::Cancelled)
                }
            }
            _ = superseded => Err(PurchaseError::Cancelled),
        }
    }
}

/// Cancels the session's current attempt from another task
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Reset to idle; in-flight chain calls of the old attempt are abandoned
    pub fn cancel(&self) {
        info!("purchase cancelled");
        self.shared.reset();
    }
}

/// One buyer's purchase flow
pub struct PurchaseSession {
    clients: ChainClients,
    store: Arc<dyn TicketRepository>,
    service: StealthAddressService,
    config: PurchaseConfig,
    derivation: StealthDerivation,
    shared: Arc<Shared>,
}

impl PurchaseSession {
    pub fn new(
        clients: ChainClients,
        store: Arc<dyn TicketRepository>,
        config: PurchaseConfig,
    ) -> Self {
        let service = StealthAddressService::new(
            clients.balances.clone(),
            clients.reader.clone(),
            config.poll_interval(),
        );
        Self {
            clients,
            store,
            service,
            config,
            derivation: StealthDerivation::default(),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Choose how stealth addresses are derived
    pub fn with_derivation(mut self, derivation: StealthDerivation) -> Self {
        self.derivation = derivation;
        self
    }

    pub fn config(&self) -> &PurchaseConfig {
        &self.config
    }

    /// Snapshot of the current state
    pub fn state(&self) -> TicketPurchaseState {
        self.shared.state.borrow().clone()
    }

    /// Latest-value view of the state
    pub fn watch(&self) -> watch::Receiver<TicketPurchaseState> {
        self.shared.state.subscribe()
    }

    /// Every state change, in order
    pub fn subscribe(&self) -> broadcast::Receiver<TicketPurchaseState> {
        self.shared.updates.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Back to idle. Stored tickets are untouched.
    pub fn reset_purchase_state(&self) {
        self.shared.reset();
    }

    /// When the contract allows emergency recovery for the current purchase
    pub fn recovery_unlocks_at(&self) -> Option<DateTime<Utc>> {
        let funded_at = self.state().funded_at?;
        let unlock = funded_at.checked_add(i64::try_from(self.config.recovery_delay_secs).ok()?)?;
        Utc.timestamp_opt(unlock, 0).single()
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Run phases 1-7.
    ///
    /// The outcome is also recorded in the session state.
    pub async fn start_purchase(&self, params: PurchaseParams) -> Result<TicketData, PurchaseError> {
        let attempt = self.shared.begin_attempt()?;
        info!(event = %params.event_address.trim(), attempt, "starting ticket purchase");
        let result = self.run(attempt, &params).await;
        self.finish(attempt, result)
    }

    /// Re-attempt payment completion after it failed post-funding
    pub async fn retry(&self) -> Result<TicketData, PurchaseError> {
        let attempt = self.shared.current_attempt();
        let mut allowed = false;
        self.shared.state.send_if_modified(|state| {
            if state.current_step != PurchaseStep::EmergencyRecovery || state.is_loading {
                return false;
            }
            state.is_loading = true;
            state.error = None;
            allowed = true;
            true
        });
        if !allowed {
            return Err(PurchaseError::InvalidState(
                "Retry is only available after a failed payment completion".into(),
            ));
        }
        self.shared.publish();

        info!(attempt, "retrying payment completion");
        self.shared.guard.rearm();
        let result = self.complete(attempt).await;
        self.finish(attempt, result)
    }

    /// Submit the time-locked recovery for a funded stealth address, signed
    /// by the wallet that made the purchase
    pub async fn emergency_recovery(
        &self,
        event_address: &str,
        stealth_address: &str,
    ) -> Result<TxHash, PurchaseError> {
        let wallet = self
            .shared
            .context
            .lock()
            .as_ref()
            .map(|ctx| ctx.user)
            .ok_or_else(|| {
                PurchaseError::InvalidState(
                    "No purchase in this session; recover with the buying wallet explicitly".into(),
                )
            })?;
        self.emergency_recovery_from(wallet, event_address, stealth_address)
            .await
    }

    /// [`emergency_recovery`](Self::emergency_recovery) with an explicit wallet
    pub async fn emergency_recovery_from(
        &self,
        wallet: Address,
        event_address: &str,
        stealth_address: &str,
    ) -> Result<TxHash, PurchaseError> {
        let event: Address = event_address.parse().map_err(|_| {
            PurchaseError::Validation(format!("Invalid event address: {}", event_address.trim()))
        })?;
        let stealth: Address = stealth_address.parse().map_err(|_| {
            PurchaseError::Validation(format!(
                "Invalid stealth address: {}",
                stealth_address.trim()
            ))
        })?;

        let attempt = self.shared.claim_for_recovery()?;
        info!(%event, %stealth, "submitting emergency recovery");
        let tx = match self.submit_recovery(wallet, event, stealth).await {
            Ok(tx) => tx,
            Err(reason) => return Err(self.recovery_failed(attempt, stealth, reason)),
        };

        info!(%event, %stealth, %tx, "emergency recovery confirmed");
        if !self.shared.complete_recovery(attempt, stealth, tx) {
            // Recovered a purchase this session no longer tracks
            let _ = self.shared.update(attempt, |state| state.is_loading = false);
        }
        Ok(tx)
    }

    async fn submit_recovery(
        &self,
        wallet: Address,
        event: Address,
        stealth: Address,
    ) -> Result<TxHash, String> {
        let call = ContractCall::EmergencyRecovery {
            event,
            stealth_address: stealth,
        };
        let tx = self
            .clients
            .writer
            .write(call, TxSigner::Wallet(wallet))
            .await
            .map_err(|e| e.user_message())?;

        match self
            .service
            .wait_for_transaction(tx, self.config.confirmations, self.config.receipt_timeout())
            .await
        {
            Some(receipt) if receipt.success => Ok(tx),
            Some(receipt) => Err(revert_message(&receipt)),
            None => Err(format!("timed out waiting for recovery transaction {}", tx)),
        }
    }

    fn recovery_failed(&self, attempt: u64, stealth: Address, reason: String) -> PurchaseError {
        let message = format!("Emergency recovery failed: {}", reason);
        warn!(%stealth, %reason, "emergency recovery failed");
        let released = self.shared.update(attempt, |state| {
            state.is_loading = false;
            if state.stealth_address == Some(stealth) {
                state.error = Some(message.clone());
            }
        });
        if released.is_err() {
            debug!(attempt, "recovery outcome not recorded; session was reset");
        }
        PurchaseError::PostFunding(message)
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    async fn run(&self, attempt: u64, params: &PurchaseParams) -> Result<TicketData, PurchaseError> {
        // Phase 1
        let checked = self.validate(attempt, params).await?;
        self.advance(attempt, PurchaseStep::GeneratingStealth)?;

        // Phase 2
        let stealth = self
            .service
            .generate_stealth_address(&self.derivation)
            .map_err(|e| PurchaseError::PreFunding(format!("Failed to generate stealth address: {}", e)))?;
        info!(stealth = %stealth.address, "stealth address generated");
        self.shared.update(attempt, |state| {
            state.event_address = Some(checked.event);
            state.stealth_address = Some(stealth.address);
            state.stealth_private_key = Some(stealth.private_key.clone());
        })?;
        *self.shared.context.lock() = Some(PurchaseContext {
            user: checked.user,
            event: checked.event,
            ticket_price: checked.ticket_price,
            total: checked.total,
            event_name: checked.event_name.clone(),
            event_date: checked.event_date.clone(),
            stealth: stealth.clone(),
            purchase_tx: None,
        });
        self.advance(attempt, PurchaseStep::ApprovingMjpy)?;

        // Phase 3
        self.approve(attempt, &checked).await?;
        self.advance(attempt, PurchaseStep::Purchasing)?;

        // Phase 4, with both funding detectors armed before submission
        let target = FundingTarget {
            event: checked.event,
            stealth_address: stealth.address,
            token: self.config.token_address,
            expected: checked.total,
        };
        let mut funding = FundingWatch::start(
            self.clients.events.clone(),
            self.service.clone(),
            target,
            self.config.funding_timeout() + self.config.receipt_timeout(),
        )
        .await;
        self.purchase(attempt, &checked, stealth.address).await?;
        self.advance(attempt, PurchaseStep::WaitingForFunds)?;

        // Phase 5
        let signal = self
            .shared
            .guarded(
                attempt,
                tokio::time::timeout(self.config.funding_timeout(), funding.next()),
            )
            .await?;
        drop(funding);
        let funded_at = match signal {
            Ok(Some(FundingSignal::Log(log))) => {
                info!(stealth = %log.stealth_address, amount = log.token_amount, "stealth address funded (log)");
                log.timestamp
            }
            Ok(Some(FundingSignal::Balance)) => {
                info!(stealth = %stealth.address, "stealth address funded (balance poll)");
                Utc::now().timestamp()
            }
            Ok(None) | Err(_) => {
                return Err(self
                    .timeout_error(
                        attempt,
                        stealth.address,
                        checked.total,
                        "Timed out waiting for funds to reach the stealth address",
                    )
                    .await)
            }
        };
        self.shared.update(attempt, |state| state.funded_at = Some(funded_at))?;
        self.advance(attempt, PurchaseStep::SettingUpStealth)?;

        // Phases 6 and 7
        self.complete(attempt).await
    }

    async fn validate(
        &self,
        attempt: u64,
        params: &PurchaseParams,
    ) -> Result<Validated, PurchaseError> {
        let user_text = params.user_address.trim();
        if user_text.is_empty() {
            return Err(PurchaseError::Validation(
                "Please connect your wallet to purchase tickets".into(),
            ));
        }
        let user: Address = user_text
            .parse()
            .map_err(|_| PurchaseError::Validation(format!("Invalid wallet address: {}", user_text)))?;

        let event_text = params.event_address.trim();
        let event: Address = event_text
            .parse()
            .ok()
            .filter(|a: &Address| !a.is_zero())
            .ok_or_else(|| PurchaseError::Validation(format!("Invalid event address: {}", event_text)))?;

        let ticket_price = parse_raw(&params.ticket_price)
            .map_err(|e| PurchaseError::Validation(format!("Invalid ticket price: {}", e)))?;
        let gas_amount = parse_decimal(&params.gas_amount, NATIVE_DECIMALS)
            .map_err(|e| PurchaseError::Validation(format!("Invalid gas amount: {}", e)))?;
        if gas_amount == 0 {
            return Err(PurchaseError::Validation(
                "Gas amount must be greater than zero".into(),
            ));
        }
        if let Some(quantity) = params.quantity {
            if quantity != 1 {
                return Err(PurchaseError::Validation(
                    "Only one ticket can be purchased per transaction".into(),
                ));
            }
        }

        let total = self
            .config
            .platform_fee_raw()
            .and_then(|fee| ticket_price.checked_add(fee))
            .ok_or_else(|| PurchaseError::Validation("Ticket price is too large".into()))?;

        let reader = &self.clients.reader;
        let role = self
            .shared
            .guarded(attempt, reader.user_role(user))
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;
        match role {
            Role::User => {}
            Role::Unregistered => {
                return Err(PurchaseError::Validation(
                    "Please complete registration before purchasing tickets".into(),
                ))
            }
            Role::Creator => {
                return Err(PurchaseError::Validation(
                    "Event creators cannot purchase tickets. Please use a user account.".into(),
                ))
            }
        }

        if self.store.get_ticket_by_event_address(&event).is_some() {
            return Err(PurchaseError::Validation(
                "You have already purchased a ticket for this event".into(),
            ));
        }

        let info = self
            .shared
            .guarded(attempt, reader.event_info(event))
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;
        if info.ticket_price != ticket_price {
            return Err(PurchaseError::Validation(format!(
                "Ticket price changed: the event now charges {} MJPY",
                self.display(info.ticket_price)
            )));
        }

        let balance = self
            .shared
            .guarded(attempt, reader.token_balance(self.config.token_address, user))
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;
        if balance < total {
            return Err(PurchaseError::Validation(format!(
                "Insufficient MJPY balance. Required: {} MJPY, available: {} MJPY (short by {} MJPY)",
                self.display(total),
                self.display(balance),
                self.display(total - balance)
            )));
        }

        debug!(%user, %event, total, balance, "purchase validated");
        Ok(Validated {
            user,
            event,
            ticket_price,
            total,
            gas_amount,
            event_name: info.name,
            event_date: info.date,
        })
    }

    async fn approve(&self, attempt: u64, checked: &Validated) -> Result<(), PurchaseError> {
        let token = self.config.token_address;
        let allowance = self
            .shared
            .guarded(
                attempt,
                self.clients.reader.allowance(token, checked.user, checked.event),
            )
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;
        if allowance >= checked.total {
            info!(allowance, required = checked.total, "existing allowance covers purchase; skipping approval");
            return Ok(());
        }

        let call = ContractCall::Approve {
            token,
            spender: checked.event,
            amount: checked.total,
        };
        let tx = self
            .shared
            .guarded(attempt, self.clients.writer.write(call, TxSigner::Wallet(checked.user)))
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;
        debug!(%tx, "approval submitted");

        let receipt = self.confirm(attempt, tx).await?.ok_or_else(|| PurchaseError::Timeout {
            message: "Timed out waiting for MJPY approval to confirm".into(),
            funded: false,
        })?;
        if !receipt.success {
            return Err(PurchaseError::PreFunding(revert_message(&receipt)));
        }
        info!(%tx, amount = checked.total, "MJPY spending approved");
        Ok(())
    }

    async fn purchase(
        &self,
        attempt: u64,
        checked: &Validated,
        stealth: Address,
    ) -> Result<TxHash, PurchaseError> {
        let call = ContractCall::PurchaseTicket {
            event: checked.event,
            stealth_address: stealth,
            gas_amount: checked.gas_amount,
        };
        let tx = self
            .shared
            .guarded(attempt, self.clients.writer.write(call, TxSigner::Wallet(checked.user)))
            .await?
            .map_err(|e| PurchaseError::pre_funding(&e))?;

        self.shared.update(attempt, |state| {
            state.purchase_tx_hash = Some(tx);
            state.progress = state.progress.max(PURCHASE_SUBMITTED_PROGRESS);
        })?;
        if let Some(ctx) = self.shared.context.lock().as_mut() {
            ctx.purchase_tx = Some(tx);
        }
        info!(%tx, "purchase transaction submitted");

        match self.confirm(attempt, tx).await? {
            Some(receipt) if receipt.success => Ok(tx),
            Some(receipt) => Err(PurchaseError::PreFunding(revert_message(&receipt))),
            None => Err(self
                .timeout_error(
                    attempt,
                    stealth,
                    checked.total,
                    "Timed out waiting for the purchase transaction to confirm",
                )
                .await),
        }
    }

    /// Phase 6 and 7: pay from the stealth address, then record the ticket
    async fn complete(&self, attempt: u64) -> Result<TicketData, PurchaseError> {
        if !self.shared.guard.try_begin() {
            debug!("payment completion already started; ignoring duplicate trigger");
            return Err(PurchaseError::InvalidState(
                "Payment completion is already in progress".into(),
            ));
        }
        let ctx = self
            .shared
            .context
            .lock()
            .clone()
            .ok_or_else(|| PurchaseError::InvalidState("No funded purchase to complete".into()))?;
        self.advance(attempt, PurchaseStep::CompletingPayment)?;

        let call = ContractCall::CompletePayment { event: ctx.event };
        let tx = self
            .shared
            .guarded(
                attempt,
                self.clients
                    .writer
                    .write(call, TxSigner::Stealth(&ctx.stealth.private_key)),
            )
            .await?
            .map_err(|e| {
                PurchaseError::PostFunding(format!("Payment completion failed: {}", e.user_message()))
            })?;
        debug!(%tx, "completion submitted");

        let receipt = self.confirm(attempt, tx).await?.ok_or_else(|| PurchaseError::Timeout {
            message: "Timed out waiting for payment completion to confirm".into(),
            funded: true,
        })?;
        if !receipt.success {
            return Err(PurchaseError::PostFunding(format!(
                "Payment completion reverted: {}",
                revert_message(&receipt)
            )));
        }

        let token_id = receipt.minted_token_id(&ctx.stealth.address);
        if token_id.is_none() {
            warn!(%tx, "completion receipt has no TicketMinted log; token id unknown");
        }
        self.shared.update(attempt, |state| {
            state.complete_tx_hash = Some(tx);
            state.token_id = token_id;
        })?;

        // Phase 7
        let ticket = TicketData {
            event_address: ctx.event,
            stealth_address: ctx.stealth.address,
            stealth_private_key: ctx.stealth.private_key.to_hex(),
            token_id,
            ticket_price: ctx.ticket_price.to_string(),
            purchase_date: Utc::now().to_rfc3339(),
            main_wallet: ctx.user,
            purchase_tx_hash: ctx.purchase_tx.unwrap_or_default(),
            complete_tx_hash: tx,
            event_name: ctx.event_name.clone(),
            event_date: ctx.event_date.clone(),
            ephemeral_public_key: Some(ctx.stealth.ephemeral_hex()),
            meta_address: Some(ctx.stealth.meta_address.clone()),
        };
        if let Err(e) = self.store.add_ticket(ticket.clone()) {
            error!(event = %ctx.event, %tx, error = %e, "ticket paid but the local record could not be saved");
            return Err(PurchaseError::Persistence(format!(
                "Ticket purchased (transaction {}) but saving it locally failed: {}. Export the stealth key before closing.",
                tx, e
            )));
        }

        let finished = self.shared.update(attempt, |state| {
            state.current_step = PurchaseStep::Success;
            state.progress = 100;
            state.is_loading = false;
            state.error = None;
            state.stealth_private_key = None;
            state.emergency_recovery_available = false;
        });
        if finished.is_err() {
            debug!("attempt superseded after the ticket was recorded");
        }
        *self.shared.context.lock() = None;
        info!(event = %ctx.event, token_id = ?token_id, "ticket purchase complete");
        Ok(ticket)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn advance(&self, attempt: u64, step: PurchaseStep) -> Result<(), PurchaseError> {
        self.shared.update(attempt, |state| {
            state.current_step = step;
            if let Some(checkpoint) = step.checkpoint() {
                state.progress = state.progress.max(checkpoint);
            }
        })?;
        info!(step = ?step, "{}", step.message());
        Ok(())
    }

    async fn confirm(&self, attempt: u64, tx: TxHash) -> Result<Option<TxReceipt>, PurchaseError> {
        self.shared
            .guarded(
                attempt,
                self.service.wait_for_transaction(
                    tx,
                    self.config.confirmations,
                    self.config.receipt_timeout(),
                ),
            )
            .await
    }

    /// A wait ran out; decide by the stealth balance whether funds moved
    async fn timeout_error(
        &self,
        attempt: u64,
        stealth: Address,
        expected: u128,
        message: &str,
    ) -> PurchaseError {
        let balance = self
            .shared
            .guarded(
                attempt,
                self.clients.reader.token_balance(self.config.token_address, stealth),
            )
            .await;
        let funded = match balance {
            Ok(Ok(balance)) => balance >= expected,
            Ok(Err(e)) => {
                // Unknown is treated as funded so the stealth key stays available
                warn!(%stealth, error = %e, "could not read stealth balance after timeout");
                true
            }
            Err(cancelled) => return cancelled,
        };
        PurchaseError::Timeout {
            message: message.to_string(),
            funded,
        }
    }

    fn finish(
        &self,
        attempt: u64,
        result: Result<TicketData, PurchaseError>,
    ) -> Result<TicketData, PurchaseError> {
        if let Err(e) = &result {
            self.record_failure(attempt, e);
        }
        result
    }

    fn record_failure(&self, attempt: u64, err: &PurchaseError) {
        if matches!(err, PurchaseError::Cancelled) {
            debug!(attempt, "purchase attempt cancelled");
            return;
        }

        let recorded = if err.funds_at_stealth() {
            let state = self.state();
            let event = state
                .event_address
                .map(|a| a.to_string())
                .unwrap_or_default();
            let stealth = state
                .stealth_address
                .map(|a| a.to_string())
                .unwrap_or_default();
            error!(%event, %stealth, error = %err, "payment completion failed; emergency recovery available");
            let message = format!(
                "{}. Funds are held at stealth address {} (event {}).",
                err.to_string().trim_end_matches('.'),
                stealth,
                event
            );
            self.shared.update(attempt, |state| {
                state.current_step = PurchaseStep::EmergencyRecovery;
                state.is_loading = false;
                state.emergency_recovery_available = true;
                state.error = Some(message);
            })
        } else {
            warn!(error = %err, "purchase failed");
            self.shared.update(attempt, |state| {
                state.current_step = PurchaseStep::Error;
                state.is_loading = false;
                state.error = Some(err.to_string());
            })
        };
        if recorded.is_err() {
            debug!(attempt, "failure not recorded; attempt superseded");
        }
    }

    fn display(&self, raw: u128) -> String {
        format_units(raw, self.config.token_decimals, 2)
    }
}

fn revert_message(receipt: &TxReceipt) -> String {
    let reason = receipt
        .revert_reason
        .clone()
        .unwrap_or_else(|| format!("transaction {} reverted", receipt.tx_hash));
    ChainError::from_message(reason).user_message()
}
