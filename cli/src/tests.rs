//! Tests for the stealthtix CLI
//!
//! Tests cover:
//! - Data directory layout and config persistence
//! - Key generation and encrypted key storage
//! - Ticket lookup and listing helpers

#[cfg(test)]
pub(crate) mod support {
    use stealth_tickets::store::KdfParams;

    pub const PASSWORD: &str = "Stage@Door42";

    /// Argon2 costs low enough for tests
    pub const FAST_KDF: KdfParams = KdfParams {
        m_cost: 1024,
        t_cost: 1,
        p_cost: 1,
    };
}

#[cfg(test)]
mod config_tests {
    use stealth_tickets::PurchaseConfig;
    use tempfile::tempdir;

    use super::support::*;
    use crate::config::{load_config, open_ticket_store_with_kdf, save_config, Paths};

    #[test]
    fn test_paths_live_under_root() {
        let paths = Paths::new("/tmp/stealthtix-root");
        let config = PurchaseConfig::default();

        assert!(paths.config_file().starts_with(paths.root()));
        assert!(paths.keys_file().ends_with("keys.json"));
        assert!(paths
            .tickets_file(&config)
            .ends_with(format!("{}.json", config.store_namespace)));
        assert_ne!(paths.keys_file(), paths.tickets_file(&config));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        assert_eq!(load_config(&paths).unwrap(), PurchaseConfig::default());
    }

    #[test]
    fn test_config_roundtrip_and_overwrite_guard() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path().join("nested"));

        let mut config = PurchaseConfig::default();
        config.funding_timeout_ms = 30_000;
        save_config(&paths, &config, false).unwrap();
        assert_eq!(load_config(&paths).unwrap(), config);

        assert!(save_config(&paths, &PurchaseConfig::default(), false).is_err());
        save_config(&paths, &PurchaseConfig::default(), true).unwrap();
        assert_eq!(load_config(&paths).unwrap().funding_timeout_ms, 120_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        std::fs::write(paths.config_file(), r#"{"confirmations": 0}"#).unwrap();
        assert!(load_config(&paths).is_err());
    }

    #[test]
    fn test_ticket_store_cannot_shadow_key_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let config = PurchaseConfig {
            store_namespace: "keys".into(),
            ..PurchaseConfig::default()
        };
        assert!(open_ticket_store_with_kdf(&paths, &config, PASSWORD, FAST_KDF).is_err());
    }

    #[test]
    fn test_ticket_store_stays_under_root() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path().join("home"));
        let config = PurchaseConfig {
            store_namespace: "../escaped".into(),
            ..PurchaseConfig::default()
        };
        assert!(open_ticket_store_with_kdf(&paths, &config, PASSWORD, FAST_KDF).is_err());
        assert!(!dir.path().join("escaped.json").exists());
    }
}

#[cfg(test)]
mod vault_tests {
    use stealth_tickets::crypto::parse_meta_address;
    use tempfile::tempdir;

    use super::support::*;
    use crate::commands::keygen::{generate, KeygenOptions};
    use crate::config::Paths;
    use crate::vault::KeyVault;

    fn options(with_mnemonic: bool, import: Option<String>) -> KeygenOptions {
        KeygenOptions {
            force: false,
            with_mnemonic,
            import_mnemonic: import,
            passphrase: None,
        }
    }

    #[test]
    fn test_keys_survive_save_and_load() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let vault = KeyVault::with_kdf(&paths, FAST_KDF);
        assert!(!vault.exists());

        let (keys, phrase) = generate(&options(true, None)).unwrap();
        assert!(phrase.is_some());
        let profile = vault.save(&keys, true, PASSWORD).unwrap();
        assert!(vault.exists());
        assert_eq!(profile.meta_address, keys.meta_address);

        let loaded = vault.load(PASSWORD).unwrap();
        assert_eq!(loaded.meta_address, keys.meta_address);
        assert_eq!(loaded.spending_key.private_key, keys.spending_key.private_key);
        assert_eq!(vault.profile().unwrap(), profile);
        assert!(parse_meta_address(&profile.meta_address).is_ok());
    }

    #[test]
    fn test_wrong_password_fails() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let vault = KeyVault::with_kdf(&paths, FAST_KDF);
        let (keys, _) = generate(&options(false, None)).unwrap();
        vault.save(&keys, false, PASSWORD).unwrap();

        assert!(vault.load("Wrong@Door42").is_err());
    }

    #[test]
    fn test_secrets_not_on_disk_in_plaintext() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let vault = KeyVault::with_kdf(&paths, FAST_KDF);
        let (keys, _) = generate(&options(false, None)).unwrap();
        vault.save(&keys, false, PASSWORD).unwrap();

        let sealed = std::fs::read_to_string(paths.keys_file()).unwrap();
        let profile = std::fs::read_to_string(paths.profile_file()).unwrap();
        for secret in [&keys.spending_key.private_key, &keys.viewing_key.private_key] {
            let hex = hex::encode(secret.as_bytes());
            assert!(!sealed.contains(&hex));
            assert!(!profile.contains(&hex));
        }
    }

    #[test]
    fn test_overwrite_with_new_password() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let vault = KeyVault::with_kdf(&paths, FAST_KDF);
        let (first, _) = generate(&options(false, None)).unwrap();
        vault.save(&first, false, PASSWORD).unwrap();

        let (second, _) = generate(&options(false, None)).unwrap();
        vault.save(&second, false, "Other@Pass7").unwrap();
        assert_eq!(vault.load("Other@Pass7").unwrap().meta_address, second.meta_address);
        assert!(vault.load(PASSWORD).is_err());
    }

    #[test]
    fn test_imported_mnemonic_reproduces_keys() {
        let (keys, phrase) = generate(&options(true, None)).unwrap();
        let (imported, shown) = generate(&options(false, phrase)).unwrap();

        // The phrase is not echoed back on import
        assert!(shown.is_none());
        assert_eq!(imported.meta_address, keys.meta_address);
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        assert!(generate(&options(false, Some("not a real phrase".into()))).is_err());
    }

    #[test]
    fn test_profile_requires_keygen() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::new(&Paths::new(dir.path()));
        assert!(vault.profile().is_err());
        assert!(vault.load(PASSWORD).is_err());
    }
}

#[cfg(test)]
mod ticket_tests {
    use stealth_tickets::chain::{Address, TxHash};
    use stealth_tickets::store::{MemoryStore, TicketStore};
    use stealth_tickets::{TicketData, TicketRepository};

    use crate::commands::tickets::{find_ticket, summarize};

    fn ticket(event: Address, name: &str, date: &str) -> TicketData {
        TicketData {
            event_address: event,
            stealth_address: Address([0x51; 20]),
            stealth_private_key: format!("0x{}", "11".repeat(32)),
            token_id: Some(3),
            ticket_price: "20000000".into(),
            purchase_date: date.into(),
            main_wallet: Address([0x77; 20]),
            purchase_tx_hash: TxHash([1; 32]),
            complete_tx_hash: TxHash([2; 32]),
            event_name: name.into(),
            event_date: "2026-08-01".into(),
            ephemeral_public_key: None,
            meta_address: None,
        }
    }

    #[test]
    fn test_find_ticket_by_event_text() {
        let store = TicketStore::open(MemoryStore::new(), "tickets").unwrap();
        let event = Address([0xab; 20]);
        store.add_ticket(ticket(event, "Gala", "2026-01-01T00:00:00Z")).unwrap();

        let found = find_ticket(&store, &event.to_string().to_uppercase().replace("0X", "0x")).unwrap();
        assert_eq!(found.event_address, event);

        assert!(find_ticket(&store, "0x1234").is_err());
        assert!(find_ticket(&store, &Address([0xcd; 20]).to_string()).is_err());
    }

    #[test]
    fn test_summary_sorted_by_purchase_date() {
        let tickets = vec![
            ticket(Address([2; 20]), "Later Show", "2026-03-01T00:00:00Z"),
            ticket(Address([1; 20]), "A Very Long Event Name That Overflows", "2026-02-01T00:00:00Z"),
        ];
        let rows = summarize(&tickets);

        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("A Very Long Event Name"));
        assert!(rows[0].contains('…'));
        assert!(rows[1].starts_with("Later Show"));
        assert!(rows[1].contains("2000.00 MJPY"));
        assert!(rows[1].contains("#3"));
    }
}
