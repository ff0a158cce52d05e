//! Show configuration and key info

use anyhow::Result;
use colored::Colorize;
use stealth_tickets::amount::format_units;
use stealth_tickets::PurchaseConfig;

use crate::config::{load_config, save_config, Paths};
use crate::vault::KeyVault;

pub fn run(paths: &Paths) -> Result<()> {
    println!();
    println!("{}", "Stealth Tickets Configuration".yellow().bold());
    println!();

    println!("{}:", "Data Directory".cyan());
    println!("  {}", paths.root().display());
    println!();

    match KeyVault::new(paths).profile() {
        Ok(profile) => {
            println!("{}", "Stealth Keys: CONFIGURED".green());
            println!("  Created: {}", profile.created_at);
            println!(
                "  Recovery phrase: {}",
                if profile.has_mnemonic { "yes" } else { "no" }
            );
            println!("  Meta-address: {}", profile.meta_address);
        }
        Err(_) => {
            println!("{}", "Stealth Keys: NOT CONFIGURED".red());
            println!("  Run 'stealthtix keygen' to generate keys");
        }
    }
    println!();

    let config = load_config(paths)?;
    let fee = config
        .platform_fee_raw()
        .map(|raw| format_units(raw, config.token_decimals, 2))
        .unwrap_or_else(|| "overflow".to_string());

    println!("{}:", "Purchase Settings".cyan());
    println!("  Platform fee:      {} MJPY", fee);
    println!("  Token decimals:    {}", config.token_decimals);
    println!("  Poll interval:     {} ms", config.poll_interval_ms);
    println!("  Funding timeout:   {} ms", config.funding_timeout_ms);
    println!("  Receipt timeout:   {} ms", config.receipt_timeout_ms);
    println!("  Confirmations:     {}", config.confirmations);
    println!("  Recovery cooldown: {} h", config.recovery_delay_secs / 3600);
    if !paths.config_file().exists() {
        println!("  {}", "(defaults; run 'stealthtix init-config' to customize)".dimmed());
    }
    println!();

    println!("{}:", "File Locations".cyan());
    println!("  Config:  {}", paths.config_file().display());
    println!("  Keys:    {}", paths.keys_file().display());
    println!("  Tickets: {}", paths.tickets_file(&config).display());

    Ok(())
}

pub fn init_config(paths: &Paths, force: bool) -> Result<()> {
    let path = save_config(paths, &PurchaseConfig::default(), force)?;
    println!("{}", format!("Config written to {}", path.display()).green());
    Ok(())
}
