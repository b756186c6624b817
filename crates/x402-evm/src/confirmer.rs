//! Finality confirmer.
//!
//! A background loop that sweeps persisted non-terminal transactions every
//! 30 seconds (and once immediately at startup), refreshing confirmation
//! counts and finalizing records that reach their chain's configured depth.
//! A failing record never aborts the sweep.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use alloy::providers::Provider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::FacilitatorError;
use crate::registry::Registry;
use crate::response::SettlementStatus;
use crate::tx_store::{TransactionRecord, TransactionStore};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const SWEEP_BATCH: u32 = 50;

/// Minimal receipt view the confirmer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptMeta {
    pub block_number: u64,
    pub success: bool,
}

/// Chain-read capability for the sweep. The registry-backed implementation
/// is used in production; tests substitute an in-memory one.
pub trait ChainReader: Send + Sync {
    fn receipt(
        &self,
        chain: &str,
        tx_hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<ReceiptMeta>, FacilitatorError>> + Send;

    fn block_number(
        &self,
        chain: &str,
    ) -> impl std::future::Future<Output = Result<u64, FacilitatorError>> + Send;

    fn required_confirmations(&self, chain: &str) -> Result<u64, FacilitatorError>;
}

/// Production reader over the registry's public clients.
pub struct RegistryReader {
    registry: Arc<Registry>,
}

impl RegistryReader {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl ChainReader for RegistryReader {
    async fn receipt(
        &self,
        chain: &str,
        tx_hash: &str,
    ) -> Result<Option<ReceiptMeta>, FacilitatorError> {
        let provider = self.registry.public_client(chain)?;
        let hash: TxHash = tx_hash
            .parse()
            .map_err(|e| FacilitatorError::Rpc(format!("invalid tx hash {tx_hash}: {e}")))?;
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| FacilitatorError::Rpc(format!("receipt lookup failed: {e}")))?;
        Ok(receipt.map(|r| ReceiptMeta {
            block_number: r.block_number.unwrap_or(0),
            success: r.status(),
        }))
    }

    async fn block_number(&self, chain: &str) -> Result<u64, FacilitatorError> {
        let provider = self.registry.public_client(chain)?;
        provider
            .get_block_number()
            .await
            .map_err(|e| FacilitatorError::Rpc(format!("block number failed: {e}")))
    }

    fn required_confirmations(&self, chain: &str) -> Result<u64, FacilitatorError> {
        self.registry.confirmations_of(chain)
    }
}

/// Spawn the confirmer loop. The first tick fires immediately; missed ticks
/// are skipped rather than queued. Flipping the watch channel to `true`
/// drains the loop.
pub fn spawn<R: ChainReader + 'static>(
    reader: R,
    store: Arc<TransactionStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    sweep(&reader, &store).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("confirmer shutting down");
                        break;
                    }
                }
            }
        }
    })
}

/// One pass over the sweepable records.
pub async fn sweep<R: ChainReader>(reader: &R, store: &TransactionStore) {
    let records = match store.sweepable(SWEEP_BATCH) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch sweepable transactions");
            return;
        }
    };
    if records.is_empty() {
        return;
    }
    tracing::debug!(count = records.len(), "confirmation sweep started");

    for record in records {
        if let Err(e) = sweep_one(reader, store, &record).await {
            tracing::warn!(id = %record.id, tx = %record.tx_hash, error = %e, "confirmation sweep failed for record");
        }
    }
}

async fn sweep_one<R: ChainReader>(
    reader: &R,
    store: &TransactionStore,
    record: &TransactionRecord,
) -> Result<(), FacilitatorError> {
    let Some(receipt) = reader.receipt(&record.chain, &record.tx_hash).await? else {
        // Not yet mined; nothing to record.
        return Ok(());
    };
    let current = reader.block_number(&record.chain).await?;
    let confirmations = current.saturating_sub(receipt.block_number);
    let required = reader.required_confirmations(&record.chain)?;

    if confirmations >= required {
        let status = if receipt.success {
            SettlementStatus::Confirmed
        } else {
            SettlementStatus::Failed
        };
        store.mark_terminal(&record.id, status, confirmations)?;
        tracing::info!(
            id = %record.id,
            tx = %record.tx_hash,
            status = status.as_str(),
            confirmations,
            "transaction finalized"
        );
    } else {
        store.update_confirmations(&record.id, confirmations)?;
    }
    Ok(())
}
