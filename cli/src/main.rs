//! stealthtix - command line interface for stealth-address ticket purchases

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod vault;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod fuzz_tests;


use commands::*;
use config::Paths;

#[derive(Parser)]
#[command(name = "stealthtix")]
#[command(version = "0.1.0")]
#[command(about = "Private ticket purchases through one-time stealth addresses")]
#[command(long_about = r#"
stealthtix buys event tickets through one-time stealth addresses.

Your wallet funds a fresh stealth address via the event contract; the
stealth key then completes the payment and receives the ticket, so the
ticket is never linked to your wallet on chain.

Quick Start:
  1. stealthtix keygen             Generate your stealth keys
  2. stealthtix purchase           Buy a ticket (local devnet)
  3. stealthtix tickets list       Show purchased tickets
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (default: ~/.stealth-tickets)
    #[arg(long, global = true)]
    home: Option<std::path::PathBuf>,

    /// Log progress details (-vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate stealth spending and viewing keys
    Keygen {
        /// Force overwrite existing keys
        #[arg(short, long)]
        force: bool,

        /// Generate with recovery phrase (recommended)
        #[arg(short, long, default_value = "true")]
        mnemonic: bool,

        /// Import from existing recovery phrase
        #[arg(long)]
        import_mnemonic: Option<String>,

        /// Passphrase for mnemonic (optional extra security)
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Show your stealth meta-address
    Address,

    /// Buy a ticket on a local devnet
    Purchase {
        /// Event name
        #[arg(long, default_value = "Summer Festival")]
        event: String,

        /// Event date
        #[arg(long, default_value = "2026-08-01")]
        date: String,

        /// Ticket price in MJPY
        #[arg(short, long, default_value = "2000")]
        price: String,

        /// Native gas forwarded to the stealth address
        #[arg(short, long, default_value = "0.01")]
        gas: String,

        /// Derive the stealth address from your meta-address instead of a
        /// throwaway one
        #[arg(long)]
        persistent: bool,

        /// Make payment completion fail once
        #[arg(long)]
        fail_completion: bool,

        /// What to do if completion fails
        #[arg(long, value_enum, default_value = "retry")]
        on_failure: purchase::OnFailure,
    },

    /// Manage purchased tickets
    Tickets {
        #[command(subcommand)]
        action: TicketAction,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration and key info
    Info,
}

#[derive(Subcommand)]
enum TicketAction {
    /// List stored tickets
    List,

    /// Show one ticket
    Show {
        /// Event contract address
        event: String,

        /// Print the stealth private key
        #[arg(long)]
        reveal_key: bool,
    },

    /// Delete a ticket record
    Remove {
        /// Event contract address
        event: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = match cli.home {
        Some(root) => Paths::new(root),
        None => Paths::from_home()?,
    };

    match cli.command {
        Commands::Keygen {
            force,
            mnemonic,
            import_mnemonic,
            passphrase,
        } => {
            keygen::run(
                &paths,
                keygen::KeygenOptions {
                    force,
                    with_mnemonic: mnemonic,
                    import_mnemonic,
                    passphrase,
                },
            )?;
        }
        Commands::Address => {
            address::run(&paths)?;
        }
        Commands::Purchase {
            event,
            date,
            price,
            gas,
            persistent,
            fail_completion,
            on_failure,
        } => {
            purchase::run(
                &paths,
                purchase::PurchaseOptions {
                    event_name: event,
                    event_date: date,
                    price,
                    gas,
                    persistent,
                    fail_completion,
                    on_failure,
                },
            )
            .await?;
        }
        Commands::Tickets { action } => match action {
            TicketAction::List => tickets::list(&paths)?,
            TicketAction::Show { event, reveal_key } => tickets::show(&paths, &event, reveal_key)?,
            TicketAction::Remove { event, yes } => tickets::remove(&paths, &event, yes)?,
        },
        Commands::InitConfig { force } => {
            info::init_config(&paths, force)?;
        }
        Commands::Info => {
            info::run(&paths)?;
        }
    }

    Ok(())
}
