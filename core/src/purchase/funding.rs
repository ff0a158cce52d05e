//! Detecting stealth funding
//!
//! The log listener and the balance poller run as independent tasks and
//! post into one mailbox. The purchase control loop takes the first
//! message; dropping the [`FundingWatch`] aborts whichever task is still
//! running, and [`CompletionGuard`] turns any second attempt to start
//! completion into a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chain::{Address, ChainEvents, StealthAddressFunded};
use crate::service::StealthAddressService;

/// Evidence that the stealth address holds its funds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingSignal {
    /// Matching `StealthAddressFunded` log
    Log(StealthAddressFunded),
    /// Balance polling saw the expected amount
    Balance,
}

/// One-shot flag guarding entry into payment completion
#[derive(Debug, Default)]
pub struct CompletionGuard {
    started: AtomicBool,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` for exactly one caller until [`rearm`](Self::rearm)
    pub fn try_begin(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Allow completion to start again (retry, new attempt)
    pub fn rearm(&self) {
        self.started.store(false, Ordering::Release);
    }
}

/// Both funding detectors feeding one mailbox
pub struct FundingWatch {
    rx: mpsc::Receiver<FundingSignal>,
    tasks: Vec<JoinHandle<()>>,
}

/// What the watch is looking for
#[derive(Debug, Clone, Copy)]
pub struct FundingTarget {
    pub event: Address,
    pub stealth_address: Address,
    pub token: Address,
    pub expected: u128,
}

impl FundingWatch {
    /// Subscribe and start polling.
    ///
    /// Call before the funding transaction is submitted so the log cannot
    /// be missed.
    pub async fn start(
        events: Arc<dyn ChainEvents>,
        service: StealthAddressService,
        target: FundingTarget,
        poll_timeout: Duration,
    ) -> Self {
        // Room for one signal from each detector
        let (tx, rx) = mpsc::channel(2);
        let mut tasks = Vec::with_capacity(2);

        match events.subscribe_funded(target.event).await {
            Ok(mut logs) => {
                let tx = tx.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(log) = logs.recv().await {
                        if log.stealth_address == target.stealth_address {
                            debug!(stealth = %log.stealth_address, tx = %log.tx_hash, "funding log received");
                            let _ = tx.send(FundingSignal::Log(log)).await;
                            return;
                        }
                    }
                    debug!("funding log stream closed");
                }));
            }
            Err(e) => {
                warn!(error = %e, "log subscription unavailable; relying on balance polling");
            }
        }

        tasks.push(tokio::spawn(async move {
            let funded = service
                .wait_for_token_balance(
                    target.stealth_address,
                    target.expected,
                    target.token,
                    poll_timeout,
                )
                .await;
            if funded {
                debug!(stealth = %target.stealth_address, "funding seen by balance poll");
                let _ = tx.send(FundingSignal::Balance).await;
            }
        }));

        Self { rx, tasks }
    }

    /// Next signal, or `None` once both detectors have given up
    pub async fn next(&mut self) -> Option<FundingSignal> {
        self.rx.recv().await
    }
}

impl Drop for FundingWatch {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::Devnet;
    use crate::chain::{ChainWrite, ContractCall, Role, TxSigner};

    #[test]
    fn test_guard_admits_one() {
        let guard = CompletionGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(guard.is_started());

        guard.rearm();
        assert!(guard.try_begin());
    }

    #[test]
    fn test_guard_under_contention() {
        let guard = Arc::new(CompletionGuard::new());
        let winners: usize = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.try_begin())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    async fn funded_devnet() -> (Arc<Devnet>, FundingTarget) {
        let devnet = Arc::new(Devnet::new());
        let buyer = Address([0xb0; 20]);
        let event = devnet.create_event("Show", "2026-10-01", Address([0x0e; 20]), 1_000, 10);
        devnet.set_role(buyer, Role::User);
        devnet.mint(buyer, 100_000);
        let target = FundingTarget {
            event,
            stealth_address: Address([0x5e; 20]),
            token: devnet.token(),
            expected: 1_000 + devnet.platform_fee(),
        };
        (devnet, target)
    }

    async fn buy(devnet: &Devnet, target: &FundingTarget) {
        let buyer = TxSigner::Wallet(Address([0xb0; 20]));
        devnet
            .write(
                ContractCall::Approve {
                    token: target.token,
                    spender: target.event,
                    amount: target.expected,
                },
                buyer,
            )
            .await
            .unwrap();
        devnet
            .write(
                ContractCall::PurchaseTicket {
                    event: target.event,
                    stealth_address: target.stealth_address,
                    gas_amount: 1,
                },
                buyer,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_both_detectors_fire_but_guard_admits_one() {
        let (devnet, target) = funded_devnet().await;
        let service =
            StealthAddressService::new(devnet.clone(), devnet.clone(), Duration::from_millis(5));
        let mut watch =
            FundingWatch::start(devnet.clone(), service, target, Duration::from_secs(2)).await;

        buy(&devnet, &target).await;

        let guard = CompletionGuard::new();
        let first = watch.next().await.unwrap();
        let second = watch.next().await.unwrap();
        assert_ne!(first, second);

        let admitted = [first, second].iter().filter(|_| guard.try_begin()).count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_polling_covers_silent_logs() {
        let (devnet, target) = funded_devnet().await;
        devnet.silence_funding_logs(true);
        let service =
            StealthAddressService::new(devnet.clone(), devnet.clone(), Duration::from_millis(5));
        let mut watch =
            FundingWatch::start(devnet.clone(), service, target, Duration::from_secs(2)).await;

        buy(&devnet, &target).await;
        assert_eq!(watch.next().await, Some(FundingSignal::Balance));
    }
}
