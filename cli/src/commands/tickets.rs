//! List, inspect and delete stored tickets

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use stealth_tickets::amount::format_token;
use stealth_tickets::store::parse_event_address;
use stealth_tickets::{TicketData, TicketRepository};

use crate::config::{load_config, open_ticket_store, Paths};
use crate::vault::prompt_password;

fn open(paths: &Paths) -> Result<impl TicketRepository> {
    let config = load_config(paths)?;
    if !paths.tickets_file(&config).exists() {
        bail!("No tickets stored yet. Run 'stealthtix purchase' first.");
    }
    let password = prompt_password("Ticket store password: ")?;
    open_ticket_store(paths, &config, &password)
}

/// Ticket for a user-supplied event address
pub fn find_ticket(store: &dyn TicketRepository, event: &str) -> Result<TicketData> {
    let address = parse_event_address(event)?;
    store
        .get_ticket_by_event_address(&address)
        .with_context(|| format!("No ticket stored for event {}", address))
}

/// One table row per ticket, oldest first
pub fn summarize(tickets: &[TicketData]) -> Vec<String> {
    let mut sorted: Vec<&TicketData> = tickets.iter().collect();
    sorted.sort_by(|a, b| a.purchase_date.cmp(&b.purchase_date));
    sorted
        .into_iter()
        .map(|t| {
            format!(
                "{:<24} {:<12} {:>6} {:>12} MJPY  {}",
                truncate(&t.event_name, 24),
                t.event_date,
                t.token_id
                    .map(|id| format!("#{}", id))
                    .unwrap_or_else(|| "?".into()),
                t.ticket_price
                    .parse::<u128>()
                    .map(format_token)
                    .unwrap_or_else(|_| t.ticket_price.clone()),
                t.event_address
            )
        })
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max - 1).collect();
    format!("{}…", kept)
}

pub fn list(paths: &Paths) -> Result<()> {
    let store = open(paths)?;
    let tickets = store.tickets();

    println!();
    if tickets.is_empty() {
        println!("{}", "No tickets stored.".dimmed());
        return Ok(());
    }
    println!("{}", format!("{} ticket(s)", tickets.len()).yellow().bold());
    println!();
    println!(
        "{}",
        format!(
            "{:<24} {:<12} {:>6} {:>17}  {}",
            "EVENT", "DATE", "TOKEN", "PRICE", "CONTRACT"
        )
        .dimmed()
    );
    for row in summarize(&tickets) {
        println!("{}", row);
    }
    Ok(())
}

pub fn show(paths: &Paths, event: &str, reveal_key: bool) -> Result<()> {
    let store = open(paths)?;
    let ticket = find_ticket(&store, event)?;

    println!();
    println!("{}", ticket.event_name.yellow().bold());
    println!();
    println!("  Date:           {}", ticket.event_date);
    println!("  Contract:       {}", ticket.event_address);
    println!(
        "  Token ID:       {}",
        ticket
            .token_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".into())
    );
    println!("  Stealth owner:  {}", ticket.stealth_address);
    println!("  Paid from:      {}", ticket.main_wallet);
    println!("  Purchased:      {}", ticket.purchase_date);
    println!("  Purchase tx:    {}", ticket.purchase_tx_hash);
    println!("  Completion tx:  {}", ticket.complete_tx_hash);
    if let Some(ref meta) = ticket.meta_address {
        println!("  Meta-address:   {}", meta);
    }
    if let Some(ref ephemeral) = ticket.ephemeral_public_key {
        println!("  Ephemeral key:  {}", ephemeral);
    }

    if reveal_key {
        println!();
        println!("{}", "Stealth private key (controls the ticket NFT):".red().bold());
        println!("  {}", ticket.stealth_private_key);
        println!("{}", "Anyone with this key can transfer the ticket.".red());
    }
    Ok(())
}

pub fn remove(paths: &Paths, event: &str, yes: bool) -> Result<()> {
    let store = open(paths)?;
    let ticket = find_ticket(&store, event)?;

    if !yes {
        println!(
            "{}",
            "Removing the record deletes the only copy of its stealth key.".red()
        );
        print!("Type 'delete' to remove the ticket for {}: ", ticket.event_name);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if answer.trim() != "delete" {
            println!("{}", "Aborted.".dimmed());
            return Ok(());
        }
    }

    store.remove_ticket(&ticket.event_address)?;
    println!("{}", format!("Removed ticket for {}", ticket.event_name).green());
    Ok(())
}
