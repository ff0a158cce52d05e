//! Display stealth meta-address

use anyhow::Result;
use colored::Colorize;
use stealth_tickets::crypto::parse_meta_address;

use crate::config::Paths;
use crate::vault::KeyVault;

pub fn run(paths: &Paths) -> Result<()> {
    let profile = KeyVault::new(paths).profile()?;
    let keys = parse_meta_address(&profile.meta_address)?;

    println!();
    println!("{}", "Your Stealth Meta-Address".yellow().bold());
    println!();
    println!("{}", profile.meta_address);
    println!();
    println!("{}:", "Components".dimmed());
    println!("  Spending pubkey: {}", hex::encode(keys.spending_public_key));
    println!("  Viewing pubkey:  {}", hex::encode(keys.viewing_public_key));
    println!();
    println!(
        "{}",
        "Purchases made with --persistent derive their stealth addresses from this.".dimmed()
    );

    Ok(())
}
