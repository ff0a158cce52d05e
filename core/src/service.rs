//! Stealth address generation plus bounded polling helpers
//!
//! The polling loops are the fallback path for chains or collaborators
//! without log subscriptions. Both return on the first satisfying
//! observation and give up after `timeout`; RPC errors during a poll are
//! logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout as with_timeout};
use tracing::debug;

use crate::chain::{Address, ChainRead, TokenBalanceQuery, TxHash, TxReceipt};
use crate::crypto::{StealthAddress, StealthDerivation};
use crate::error::CryptoError;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct StealthAddressService {
    balances: Arc<dyn TokenBalanceQuery>,
    reader: Arc<dyn ChainRead>,
    poll_interval: Duration,
}

impl StealthAddressService {
    pub fn new(
        balances: Arc<dyn TokenBalanceQuery>,
        reader: Arc<dyn ChainRead>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            balances,
            reader,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fresh stealth address for one purchase
    pub fn generate_stealth_address(
        &self,
        derivation: &StealthDerivation,
    ) -> Result<StealthAddress, CryptoError> {
        derivation.derive()
    }

    /// Poll until `address` holds at least `expected` of `token`.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_token_balance(
        &self,
        address: Address,
        expected: u128,
        token: Address,
        timeout: Duration,
    ) -> bool {
        let poll = async {
            loop {
                match self.balances.token_balance_of(token, address).await {
                    Ok(balance) if balance >= expected => return balance,
                    Ok(balance) => {
                        debug!(%address, balance, expected, "stealth balance below target")
                    }
                    Err(e) => debug!(%address, error = %e, "balance poll failed"),
                }
                sleep(self.poll_interval).await;
            }
        };

        with_timeout(timeout, poll).await.is_ok()
    }

    /// Poll until `tx` is mined with `confirmations` blocks on top
    /// (the mining block counts as the first).
    ///
    /// Returns `None` on timeout. A reverted transaction is returned as-is;
    /// callers inspect `success`.
    pub async fn wait_for_transaction(
        &self,
        tx: TxHash,
        confirmations: u64,
        timeout: Duration,
    ) -> Option<TxReceipt> {
        let poll = async {
            loop {
                match self.reader.receipt(tx).await {
                    Ok(Some(receipt)) => {
                        match self.reader.block_number().await {
                            Ok(head) => {
                                let depth = head.saturating_sub(receipt.block_number) + 1;
                                if depth >= confirmations {
                                    return receipt;
                                }
                                debug!(%tx, depth, confirmations, "waiting for confirmations");
                            }
                            Err(e) => debug!(%tx, error = %e, "block number poll failed"),
                        }
                    }
                    Ok(None) => debug!(%tx, "transaction pending"),
                    Err(e) => debug!(%tx, error = %e, "receipt poll failed"),
                }
                sleep(self.poll_interval).await;
            }
        };

        with_timeout(timeout, poll).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::Devnet;
    use crate::chain::{ChainWrite, ContractCall, TxSigner};

    fn service(devnet: &Arc<Devnet>) -> StealthAddressService {
        StealthAddressService::new(devnet.clone(), devnet.clone(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_balance_wait_succeeds_when_funded() {
        let devnet = Arc::new(Devnet::new());
        let holder = Address([5; 20]);
        devnet.mint(holder, 500);

        let ok = service(&devnet)
            .wait_for_token_balance(holder, 500, devnet.token(), Duration::from_millis(200))
            .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_balance_wait_times_out() {
        let devnet = Arc::new(Devnet::new());
        let ok = service(&devnet)
            .wait_for_token_balance(Address([5; 20]), 1, devnet.token(), Duration::from_millis(50))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_balance_wait_sees_late_funding() {
        let devnet = Arc::new(Devnet::new());
        let holder = Address([6; 20]);
        let svc = service(&devnet);

        let funder = devnet.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            funder.mint(holder, 42);
        });

        assert!(
            svc.wait_for_token_balance(holder, 42, devnet.token(), Duration::from_secs(2))
                .await
        );
    }

    #[tokio::test]
    async fn test_transaction_wait_counts_confirmations() {
        let devnet = Arc::new(Devnet::new());
        let owner = Address([8; 20]);
        devnet.mint(owner, 100);
        let tx = devnet
            .write(
                ContractCall::Approve {
                    token: devnet.token(),
                    spender: Address([9; 20]),
                    amount: 100,
                },
                TxSigner::Wallet(owner),
            )
            .await
            .unwrap();

        let svc = service(&devnet);
        let receipt = svc
            .wait_for_transaction(tx, 1, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(receipt.success);

        // Two confirmations need one more block on top
        assert!(svc
            .wait_for_transaction(tx, 2, Duration::from_millis(50))
            .await
            .is_none());
        devnet.mine_block();
        assert!(svc
            .wait_for_transaction(tx, 2, Duration::from_millis(200))
            .await
            .is_some());
    }

    #[test]
    fn test_generates_fresh_addresses() {
        let devnet = Arc::new(Devnet::new());
        let svc = service(&devnet);
        let a = svc.generate_stealth_address(&StealthDerivation::Ephemeral).unwrap();
        let b = svc.generate_stealth_address(&StealthDerivation::Ephemeral).unwrap();
        assert_ne!(a.address, b.address);
    }
}
