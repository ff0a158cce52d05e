//! Key generation command with encrypted storage and mnemonic support

use anyhow::{bail, Result};
use colored::Colorize;
use stealth_tickets::StealthMetaAddress;

use crate::config::Paths;
use crate::vault::{prompt_new_password, KeyVault};

/// Options for key generation
pub struct KeygenOptions {
    /// Force overwrite existing keys
    pub force: bool,
    /// Use mnemonic for key generation (allows recovery)
    pub with_mnemonic: bool,
    /// Import from existing mnemonic
    pub import_mnemonic: Option<String>,
    /// Passphrase for mnemonic (optional extra security)
    pub passphrase: Option<String>,
}

/// Keys plus the phrase to show, if any
pub fn generate(options: &KeygenOptions) -> Result<(StealthMetaAddress, Option<String>)> {
    if let Some(ref phrase) = options.import_mnemonic {
        let passphrase = options.passphrase.as_deref().unwrap_or("");
        let keys = StealthMetaAddress::from_mnemonic(phrase, passphrase)?;
        // Imported phrases are already known to the user
        return Ok((keys, None));
    }
    if options.with_mnemonic {
        let (keys, phrase) = StealthMetaAddress::generate_with_mnemonic()?;
        return Ok((keys, Some(phrase)));
    }
    Ok((StealthMetaAddress::generate(), None))
}

pub fn run(paths: &Paths, options: KeygenOptions) -> Result<()> {
    let vault = KeyVault::new(paths);

    // Check for existing keys
    if vault.exists() && !options.force {
        bail!(
            "Stealth keys already exist. Use --force to overwrite.\n\
             Warning: tickets bought with --persistent can only be re-derived from the old keys!"
        );
    }

    println!("{}", "=== Stealth Ticket Key Generation ===".cyan().bold());
    println!();

    if options.import_mnemonic.is_some() {
        println!("{}", "Importing keys from mnemonic phrase...".cyan());
    } else if options.with_mnemonic {
        println!("{}", "Generating keys with recovery phrase...".cyan());
    } else {
        println!("{}", "Generating random keys (no recovery phrase)...".cyan());
        println!(
            "{}",
            "Warning: Without a recovery phrase, losing your password means losing your keys!".yellow()
        );
    }
    let (keys, mnemonic) = generate(&options)?;

    // Get password for encryption
    println!();
    println!("{}", "Choose a strong password to encrypt your keys.".cyan());
    println!("{}", "Requirements: 8+ chars, uppercase, lowercase, and numbers".dimmed());
    println!();

    let password = prompt_new_password("Enter password: ")?;
    let has_mnemonic = mnemonic.is_some() || options.import_mnemonic.is_some();
    let profile = vault.save(&keys, has_mnemonic, &password)?;

    println!();
    println!("{}", "Keys generated and encrypted successfully!".green().bold());
    println!();

    if let Some(ref phrase) = mnemonic {
        print_mnemonic(phrase);
    }

    println!("{}:", "Spending Public Key".yellow());
    println!("  {}", keys.spending_key.public_hex());
    println!();
    println!("{}:", "Viewing Public Key".yellow());
    println!("  {}", keys.viewing_key.public_hex());
    println!();
    println!("{}:", "Meta-Address".yellow());
    println!("  {}", profile.meta_address);
    println!();
    println!(
        "{}",
        format!("Encrypted keys saved to: {}", paths.keys_file().display()).dimmed()
    );
    println!();

    if !has_mnemonic {
        println!("{}", "IMPORTANT: You did not use a recovery phrase.".red().bold());
        println!(
            "{}",
            "If you lose your password, your stealth keys are PERMANENTLY LOST.".red()
        );
        println!(
            "{}",
            "Consider regenerating with --mnemonic for recovery capability.".yellow()
        );
    }

    Ok(())
}

fn print_mnemonic(phrase: &str) {
    println!("{}", "=== RECOVERY PHRASE - WRITE THIS DOWN! ===".red().bold());
    println!();
    println!("{}", "┌────────────────────────────────────────────────────────────┐".yellow());

    // Display mnemonic words in a grid
    let words: Vec<&str> = phrase.split_whitespace().collect();
    for (i, chunk) in words.chunks(4).enumerate() {
        let line: String = chunk
            .iter()
            .enumerate()
            .map(|(j, word)| format!("{:2}. {:<12}", i * 4 + j + 1, word))
            .collect::<Vec<_>>()
            .join(" ");
        println!("│ {} │", format!("{:<58}", line).yellow());
    }

    println!("{}", "└────────────────────────────────────────────────────────────┘".yellow());
    println!();
    println!("{}", "CRITICAL: Store this phrase securely OFFLINE!".red().bold());
    println!("{}", "You will NOT be shown this phrase again.".red());
    println!();
}
