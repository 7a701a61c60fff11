//! Read-only view of the wallet balance

use super::BackendClient;
use crate::error::SessionError;
use crate::runtime::Ledger;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Deserialize)]
struct BalanceResult {
    balance: u64,
}

#[derive(Debug, Default)]
struct Snapshot {
    balance: Option<u64>,
    /// Ticket of the write that produced `balance`
    generation: u64,
}

/// `GET wallet/balance`, with the last seen value kept as a snapshot.
///
/// Every refresh and debit takes a ticket when it begins. A write only lands if
/// its ticket is newer than the one already stored, so a slow refresh cannot
/// overwrite a debit or refresh that started after it.
pub struct HttpLedger {
    client: BackendClient,
    snapshot: Mutex<Snapshot>,
    next_generation: AtomicU64,
}

impl HttpLedger {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            snapshot: Mutex::new(Snapshot::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn ticket(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Poisoning is logged and recovered from
    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Ledger snapshot lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Store `balance` unless a newer write already landed; returns the balance now held
    fn store(&self, generation: u64, balance: u64) -> u64 {
        let mut snapshot = self.snapshot();
        if generation > snapshot.generation {
            snapshot.balance = Some(balance);
            snapshot.generation = generation;
            balance
        } else {
            tracing::debug!(
                generation,
                current = snapshot.generation,
                "Discarding stale balance"
            );
            snapshot.balance.unwrap_or(balance)
        }
    }

    fn cached(&self) -> Option<u64> {
        self.snapshot().balance
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn balance(&self) -> Result<u64, SessionError> {
        match self.cached() {
            Some(balance) => Ok(balance),
            None => self.refresh().await,
        }
    }

    async fn refresh(&self) -> Result<u64, SessionError> {
        let generation = self.ticket();
        let result: BalanceResult = self.client.get("wallet/balance").await?.into_result()?;
        let balance = self.store(generation, result.balance);
        tracing::debug!(balance, generation, "Ledger refreshed");
        Ok(balance)
    }

    fn assume_debit(&self, amount: u64) {
        let generation = self.ticket();
        let mut snapshot = self.snapshot();
        if let Some(balance) = snapshot.balance {
            snapshot.balance = Some(balance.saturating_sub(amount));
            snapshot.generation = generation;
        }
    }
}
