//! Buy a ticket end to end on an in-process devnet
//!
//! The devnet enforces the event contract's rules, so every phase of the
//! purchase (including failure handling) runs exactly as it would against a
//! live chain. Tickets land in the real encrypted store.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use stealth_tickets::amount::{format_units, parse_decimal, PLATFORM_FEE_UNITS, TOKEN_DECIMALS};
use stealth_tickets::chain::memory::Devnet;
use stealth_tickets::chain::{Address, Role};
use stealth_tickets::config::RECOVERY_DELAY_SECS;
use stealth_tickets::crypto::{address_from_private_key, generate_private_key};
use stealth_tickets::{
    PurchaseConfig, PurchaseParams, PurchaseSession, PurchaseStep, StealthDerivation, TicketData,
    TicketPurchaseState, TicketRepository, TxHash,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{load_config, open_ticket_store, Paths};
use crate::vault::{prompt_password, KeyVault};

/// Follow-up after payment completion fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnFailure {
    /// Retry completion with the retained stealth key
    Retry,
    /// Wait out the cooldown and refund the buyer
    Recover,
    /// Leave the funds at the stealth address
    Stop,
}

pub struct PurchaseOptions {
    pub event_name: String,
    pub event_date: String,
    /// Ticket price in MJPY display units
    pub price: String,
    /// Native gas amount
    pub gas: String,
    pub persistent: bool,
    pub fail_completion: bool,
    pub on_failure: OnFailure,
}

/// How a demo purchase ended
#[derive(Debug)]
pub enum Outcome {
    Purchased(TicketData),
    Recovered { tx: TxHash, refunded: u128 },
    Failed { message: String, step: PurchaseStep },
}

pub async fn run(paths: &Paths, options: PurchaseOptions) -> Result<()> {
    let config = load_config(paths)?;
    let password = prompt_password("Ticket store password: ")?;
    let store = Arc::new(open_ticket_store(paths, &config, &password)?);

    let derivation = if options.persistent {
        let keys = KeyVault::new(paths).load(&password)?;
        StealthDerivation::Persistent(Arc::new(keys))
    } else {
        StealthDerivation::Ephemeral
    };

    println!();
    println!("{}", "=== Stealth Ticket Purchase (devnet) ===".cyan().bold());
    println!();

    match execute(store, config, derivation, &options, true).await? {
        Outcome::Purchased(ticket) => print_ticket(&ticket),
        Outcome::Recovered { tx, refunded } => {
            println!();
            println!("{}", "Funds recovered to your wallet.".green().bold());
            println!("  Refunded: {} MJPY", format_units(refunded, TOKEN_DECIMALS, 2));
            println!("  Recovery tx: {}", tx);
        }
        Outcome::Failed { message, step } => {
            println!();
            if step == PurchaseStep::EmergencyRecovery {
                println!("{}", "Funds are parked at the stealth address.".yellow().bold());
            }
            bail!(message);
        }
    }
    Ok(())
}

/// Stage a devnet, run one purchase and apply `on_failure`
pub async fn execute(
    store: Arc<dyn TicketRepository>,
    mut config: PurchaseConfig,
    derivation: StealthDerivation,
    options: &PurchaseOptions,
    show_progress: bool,
) -> Result<Outcome> {
    let devnet = Arc::new(Devnet::new());
    let price = parse_decimal(&options.price, TOKEN_DECIMALS)
        .with_context(|| format!("Invalid ticket price: {}", options.price))?;

    if config.platform_fee_raw() != Some(devnet.platform_fee()) {
        warn!("configured platform fee differs from the devnet contract; using the contract's");
        config.platform_fee_units = PLATFORM_FEE_UNITS;
        config.token_decimals = TOKEN_DECIMALS;
    }
    if config.confirmations > 1 {
        warn!("the devnet mines one block per transaction; waiting for a single confirmation");
        config.confirmations = 1;
    }
    config.token_address = devnet.token();

    let organizer = address_from_private_key(&generate_private_key());
    let buyer = address_from_private_key(&generate_private_key());
    let event = devnet.create_event(&options.event_name, &options.event_date, organizer, price, 100);
    devnet.set_role(buyer, Role::User);
    devnet.mint(buyer, price + devnet.platform_fee());
    if options.fail_completion {
        devnet.fail_next("completePayment", "network error: connection reset by peer");
    }
    debug!(%event, %buyer, "devnet staged");

    let recovery_delay = config.recovery_delay_secs.max(RECOVERY_DELAY_SECS);
    let session = PurchaseSession::new(devnet.clients(), store, config).with_derivation(derivation);
    let renderer = show_progress.then(|| spawn_progress(session.subscribe()));

    let params = PurchaseParams {
        event_address: event.to_string(),
        gas_amount: options.gas.clone(),
        ticket_price: price.to_string(),
        user_address: buyer.to_string(),
        quantity: Some(1),
    };

    let outcome = match session.start_purchase(params).await {
        Ok(ticket) => Outcome::Purchased(ticket),
        Err(e) if session.state().emergency_recovery_available => match options.on_failure {
            OnFailure::Retry => match session.retry().await {
                Ok(ticket) => Outcome::Purchased(ticket),
                Err(e) => failed(&session, e.to_string()),
            },
            OnFailure::Recover => {
                recover(&session, &devnet, buyer, recovery_delay, show_progress).await?
            }
            OnFailure::Stop => failed(&session, e.to_string()),
        },
        Err(e) => failed(&session, e.to_string()),
    };

    // Closing the session ends the update stream
    drop(session);
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }
    Ok(outcome)
}

fn failed(session: &PurchaseSession, message: String) -> Outcome {
    Outcome::Failed {
        message,
        step: session.state().current_step,
    }
}

async fn recover(
    session: &PurchaseSession,
    devnet: &Devnet,
    buyer: Address,
    delay_secs: u64,
    show_progress: bool,
) -> Result<Outcome> {
    let state = session.state();
    let event = state.event_address.context("No event recorded for the failed purchase")?;
    let stealth = state
        .stealth_address
        .context("No stealth address recorded for the failed purchase")?;

    if show_progress {
        if let Some(unlocks) = session.recovery_unlocks_at() {
            println!(
                "{}",
                format!("Recovery unlocks at {}; fast-forwarding the devnet clock", unlocks.to_rfc3339())
                    .dimmed()
            );
        }
    }
    devnet.advance_time(i64::try_from(delay_secs).unwrap_or(RECOVERY_DELAY_SECS as i64));

    let before = devnet.balance_of(buyer);
    match session
        .emergency_recovery(&event.to_string(), &stealth.to_string())
        .await
    {
        Ok(tx) => Ok(Outcome::Recovered {
            tx,
            refunded: devnet.balance_of(buyer).saturating_sub(before),
        }),
        Err(e) => Ok(failed(session, e.to_string())),
    }
}

fn spawn_progress(mut updates: broadcast::Receiver<TicketPurchaseState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        loop {
            match updates.recv().await {
                Ok(state) => {
                    if last == Some(state.current_step) {
                        continue;
                    }
                    last = Some(state.current_step);
                    print_step(&state);
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress display fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_step(state: &TicketPurchaseState) {
    if state.current_step == PurchaseStep::Idle {
        return;
    }
    let line = format!("[{:>3}%] {}", state.progress, state.message());
    match state.current_step {
        PurchaseStep::Success => println!("{}", line.green().bold()),
        PurchaseStep::Error => {
            println!("{}", line.red());
            if let Some(ref error) = state.error {
                println!("       {}", error.red());
            }
        }
        PurchaseStep::EmergencyRecovery => {
            println!("{}", line.yellow());
            if let Some(ref error) = state.error {
                println!("       {}", error.yellow());
            }
        }
        _ => println!("{}", line.cyan()),
    }
}

fn print_ticket(ticket: &TicketData) {
    println!();
    println!("{}", "Ticket purchased privately!".green().bold());
    println!();
    println!("  Event:       {} ({})", ticket.event_name, ticket.event_date);
    println!("  Contract:    {}", ticket.event_address);
    println!(
        "  Token ID:    {}",
        ticket
            .token_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".into())
    );
    println!("  Held by:     {}", ticket.stealth_address);
    println!("  Paid from:   {}", ticket.main_wallet.short());
    println!();
    println!(
        "{}",
        "The stealth key is stored encrypted. Show it with 'stealthtix tickets show <event> --reveal-key'."
            .dimmed()
    );
}
