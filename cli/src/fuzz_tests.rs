//! Property-based tests for the stealthtix CLI helpers
//!
//! Properties tested:
//! - Password strength checks accept exactly the passwords meeting the rules
//! - Ticket summaries keep one row per ticket whatever the input text
//! - Data directory paths never escape the configured root

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;
    use stealth_tickets::chain::{Address, TxHash};
    use stealth_tickets::{PurchaseConfig, TicketData};

    use crate::commands::tickets::summarize;
    use crate::config::Paths;
    use crate::vault::validate_password_strength;

    fn meets_rules(password: &str) -> bool {
        password.len() >= 8
            && password.chars().any(|c| c.is_uppercase())
            && password.chars().any(|c| c.is_lowercase())
            && password.chars().any(|c| c.is_numeric())
    }

    fn arbitrary_ticket() -> impl Strategy<Value = TicketData> {
        (
            any::<[u8; 20]>(),
            ".{0,40}",
            "[0-9]{0,12}",
            "20[0-9]{2}-[01][0-9]-[0-3][0-9]T00:00:00Z",
            proptest::option::of(any::<u64>()),
        )
            .prop_map(|(event, name, price, date, token_id)| TicketData {
                event_address: Address(event),
                stealth_address: Address([0x5a; 20]),
                stealth_private_key: format!("0x{}", "22".repeat(32)),
                token_id,
                ticket_price: price,
                purchase_date: date,
                main_wallet: Address([0x77; 20]),
                purchase_tx_hash: TxHash::default(),
                complete_tx_hash: TxHash::default(),
                event_name: name,
                event_date: "2026-10-01".into(),
                ephemeral_public_key: None,
                meta_address: None,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: the strength check agrees with the stated rules
        #[test]
        fn prop_password_rules(password in ".{0,24}") {
            prop_assert_eq!(validate_password_strength(&password).is_ok(), meets_rules(&password));
        }

        /// Property: passwords built to satisfy the rules are accepted
        #[test]
        fn prop_strong_passwords_accepted(
            upper in "[A-Z]{1,4}",
            lower in "[a-z]{1,4}",
            digits in "[0-9]{6,8}",
        ) {
            let password = format!("{}{}{}", upper, lower, digits);
            prop_assert!(validate_password_strength(&password).is_ok());
        }

        /// Property: summaries have one row per ticket whatever the stored text
        #[test]
        fn prop_summary_row_per_ticket(tickets in prop::collection::vec(arbitrary_ticket(), 0..8)) {
            let rows = summarize(&tickets);
            prop_assert_eq!(rows.len(), tickets.len());

            for ticket in &tickets {
                let contract = ticket.event_address.to_string();
                prop_assert!(rows.iter().any(|row| row.ends_with(&contract)));
            }
        }

        /// Property: every file the CLI touches lives under its root
        #[test]
        fn prop_paths_stay_under_root(root in "/[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}", namespace in "[a-z][a-z0-9-]{0,15}") {
            let paths = Paths::new(&root);
            let config = PurchaseConfig {
                store_namespace: namespace,
                ..PurchaseConfig::default()
            };

            prop_assert!(paths.config_file().starts_with(&root));
            prop_assert!(paths.profile_file().starts_with(&root));
            prop_assert!(paths.keys_file().starts_with(&root));
            prop_assert!(paths.tickets_file(&config).starts_with(&root));
        }
    }
}
