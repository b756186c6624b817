//! Settlement dispatch and strategies.
//!
//! Two token-level paths: EIP-3009 `transferWithAuthorization` (single
//! signature, gasless for the payer, fee tracked off-chain) and relayer-mode
//! `transferFrom` (requires prior allowance, two transfers: merchant + fee
//! treasury). The token record's `supports_eip3009` flag selects the
//! strategy; shared helpers (header parsing, receipt waiting, persistence)
//! live outside the strategy boundary.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::erc20;
use crate::error::FacilitatorError;
use crate::header::{self, Authorization};
use crate::identity::AnchorClient;
use crate::payment::{PaymentRequest, PaymentRequirements};
use crate::registry::{Registry, TokenRecord};
use crate::response::{Settlement, SettlementStatus};
use crate::tx_store::{TransactionRecord, TransactionStore};
use crate::unix_now;
use crate::verify::PaymentVerifier;

pub struct PaymentSettler {
    registry: Arc<Registry>,
    verifier: PaymentVerifier,
    store: Option<Arc<TransactionStore>>,
    treasury: Option<Address>,
    anchor: Option<AnchorClient>,
    /// Per-payer mutex closing the verify/settle TOCTOU window.
    payer_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl PaymentSettler {
    pub fn new(
        registry: Arc<Registry>,
        store: Option<Arc<TransactionStore>>,
        treasury: Option<Address>,
        anchor: Option<AnchorClient>,
    ) -> Self {
        Self {
            verifier: PaymentVerifier::new(registry.clone()),
            registry,
            store,
            treasury,
            anchor,
            payer_locks: DashMap::new(),
        }
    }

    fn payer_lock(&self, payer: Address) -> Arc<Mutex<()>> {
        self.payer_locks
            .entry(payer)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Settle a payment on-chain. `fee_amount` and `net_amount` are the
    /// base-unit split of `maxAmountRequired` precomputed by the caller.
    pub async fn settle(
        &self,
        request: &PaymentRequest,
        fee_amount: U256,
        net_amount: U256,
    ) -> Result<Settlement, FacilitatorError> {
        let reqs = &request.payment_requirements;
        let auth = header::normalize(&request.payment_header)?;

        let lock = self.payer_lock(auth.from);
        let _guard = lock.lock().await;

        // Re-verify under the payer lock.
        let check = self.verifier.verify(request).await;
        if !check.is_valid {
            let reason = check
                .invalid_reason
                .unwrap_or_else(|| "verification failed".to_string());
            tracing::warn!(payer = %auth.from, reason = %reason, "settlement rejected");
            return Err(FacilitatorError::Settlement(reason));
        }

        let token = self.registry.token_for_asset(&reqs.network, &reqs.asset)?;
        let mut settlement = if token.supports_eip3009 {
            self.settle_eip3009(&auth, reqs, token).await?
        } else {
            self.settle_relayer(&auth, reqs, token, fee_amount, net_amount)
                .await?
        };

        // Optional agent anchoring; failures are non-fatal and only drop the
        // evidence fields from the response.
        if token.supports_eip3009 && settlement.status == SettlementStatus::Confirmed {
            if let (Some(agent_id), Some(anchor)) = (&request.agent_id, &self.anchor) {
                let payment_data = serde_json::to_value(&auth).unwrap_or_default();
                match anchor
                    .anchor(
                        agent_id,
                        &settlement.tx_hash,
                        &reqs.network,
                        &reqs.max_amount_required,
                        &payment_data,
                    )
                    .await
                {
                    Ok(receipt) => settlement.anchor = Some(receipt),
                    Err(e) => {
                        tracing::warn!(agent_id = %agent_id, error = %e, "agent anchoring failed")
                    }
                }
            }
        }

        Ok(settlement)
    }

    async fn settle_eip3009(
        &self,
        auth: &Authorization,
        reqs: &PaymentRequirements,
        token: &TokenRecord,
    ) -> Result<Settlement, FacilitatorError> {
        let network = &reqs.network;
        let token_addr = self.registry.address_of(network, &token.symbol)?;
        let wallet = self.registry.wallet_client(network)?;
        let required = self.registry.confirmations_of(network)?;

        let valid_after = U256::from(auth.valid_after.unwrap_or(0));
        let valid_before = U256::from(auth.valid_before.unwrap_or_else(|| unix_now() + 3600));
        let nonce = header::nonce_bytes(&auth.nonce)?;

        // The transfer must move the exact signed amount — any deviation
        // invalidates the EIP-712 signature. The facilitator fee is tracked
        // off-chain on this path, so no second transaction exists.
        let signed_amount: U256 = match &auth.value {
            Some(v) => v.parse().map_err(|e| {
                FacilitatorError::InvalidPayment(format!("invalid authorization value: {e}"))
            })?,
            None => reqs.max_amount_required.parse().map_err(|e| {
                FacilitatorError::InvalidPayment(format!("invalid maxAmountRequired: {e}"))
            })?,
        };

        let pending = erc20::submit_transfer_with_authorization(
            wallet,
            token_addr,
            auth.from,
            reqs.pay_to,
            signed_amount,
            valid_after,
            valid_before,
            nonce,
            auth.v,
            auth.r,
            auth.s,
        )
        .await?;
        let tx_hash = format!("{:#x}", erc20::pending_hash(&pending));
        let record_id = self.persist_pending(&tx_hash, None, network);

        match erc20::wait_for_receipt(pending, required).await {
            Ok(success) => {
                let status = if success {
                    SettlementStatus::Confirmed
                } else {
                    SettlementStatus::Failed
                };
                self.persist_outcome(record_id.as_deref(), status, required);
                tracing::info!(
                    payer = %auth.from,
                    tx = %tx_hash,
                    status = status.as_str(),
                    "eip3009 settlement completed"
                );
                Ok(Settlement {
                    tx_hash,
                    tx_hash_fee: None,
                    status,
                    confirmations: required,
                    anchor: None,
                })
            }
            Err(e) => {
                // Still in flight; the confirmer finishes tracking it.
                tracing::warn!(tx = %tx_hash, error = %e, "receipt wait incomplete, settlement left pending");
                Ok(Settlement {
                    tx_hash,
                    tx_hash_fee: None,
                    status: SettlementStatus::Pending,
                    confirmations: 0,
                    anchor: None,
                })
            }
        }
    }

    async fn settle_relayer(
        &self,
        auth: &Authorization,
        reqs: &PaymentRequirements,
        token: &TokenRecord,
        fee_amount: U256,
        net_amount: U256,
    ) -> Result<Settlement, FacilitatorError> {
        let treasury = self.treasury.ok_or_else(|| {
            FacilitatorError::Config(
                "TREASURY_ADDRESS is required for relayer settlements".to_string(),
            )
        })?;
        let network = &reqs.network;
        let token_addr = self.registry.address_of(network, &token.symbol)?;
        let wallet = self.registry.wallet_client(network)?;
        let required = self.registry.confirmations_of(network)?;

        // Two transfers, submitted concurrently. The chain guarantees no
        // ordering between them and the pair is not atomic.
        let (merchant, fee) = tokio::join!(
            erc20::submit_transfer_from(wallet, token_addr, auth.from, reqs.pay_to, net_amount),
            erc20::submit_transfer_from(wallet, token_addr, auth.from, treasury, fee_amount),
        );

        let merchant = match merchant {
            Ok(pending) => pending,
            Err(e) => {
                if let Ok(fee_pending) = &fee {
                    tracing::error!(
                        fee_tx = %format!("{:#x}", erc20::pending_hash(fee_pending)),
                        "merchant transfer failed after fee transfer was submitted"
                    );
                }
                return Err(e);
            }
        };
        let merchant_hash = format!("{:#x}", erc20::pending_hash(&merchant));

        let fee = match fee {
            Ok(pending) => pending,
            Err(e) => {
                // Merchant leg is in flight with no fee leg: degenerate
                // partial settlement by construction.
                tracing::warn!(error = %e, "fee transfer submission failed");
                let record_id = self.persist_pending(&merchant_hash, None, network);
                let confirmations = match erc20::wait_for_receipt(merchant, required).await {
                    Ok(_) => required,
                    Err(_) => 0,
                };
                self.persist_outcome(
                    record_id.as_deref(),
                    SettlementStatus::PartialSettlement,
                    confirmations,
                );
                return Ok(Settlement {
                    tx_hash: merchant_hash,
                    tx_hash_fee: None,
                    status: SettlementStatus::PartialSettlement,
                    confirmations,
                    anchor: None,
                });
            }
        };
        let fee_hash = format!("{:#x}", erc20::pending_hash(&fee));

        let record_id = self.persist_pending(&merchant_hash, Some(&fee_hash), network);

        let (merchant_receipt, fee_receipt) = tokio::join!(
            erc20::wait_for_receipt(merchant, required),
            erc20::wait_for_receipt(fee, required),
        );

        let (status, confirmations) = match (&merchant_receipt, &fee_receipt) {
            (Ok(true), Ok(true)) => (SettlementStatus::Confirmed, required),
            (Err(_), Err(_)) => (SettlementStatus::Pending, 0),
            (merchant_leg, _) => {
                // At least one leg reverted or is unaccounted for; both
                // hashes are reported so operators can reconcile.
                let confirmations = if merchant_leg.is_ok() { required } else { 0 };
                (SettlementStatus::PartialSettlement, confirmations)
            }
        };
        if status != SettlementStatus::Pending {
            self.persist_outcome(record_id.as_deref(), status, confirmations);
        }

        tracing::info!(
            payer = %auth.from,
            tx = %merchant_hash,
            tx_fee = %fee_hash,
            status = status.as_str(),
            "relayer settlement completed"
        );

        Ok(Settlement {
            tx_hash: merchant_hash,
            tx_hash_fee: Some(fee_hash),
            status,
            confirmations,
            anchor: None,
        })
    }

    fn persist_pending(
        &self,
        tx_hash: &str,
        tx_hash_fee: Option<&str>,
        chain: &str,
    ) -> Option<String> {
        let store = self.store.as_ref()?;
        let record = TransactionRecord::pending(tx_hash, tx_hash_fee, chain);
        match store.insert(&record) {
            Ok(()) => Some(record.id),
            Err(e) => {
                tracing::warn!(tx = %tx_hash, error = %e, "failed to persist pending settlement");
                None
            }
        }
    }

    fn persist_outcome(&self, id: Option<&str>, status: SettlementStatus, confirmations: u64) {
        let (Some(store), Some(id)) = (self.store.as_ref(), id) else {
            return;
        };
        let result = if status.is_terminal() {
            store.mark_terminal(id, status, confirmations)
        } else {
            store.update_status(id, status, confirmations)
        };
        if let Err(e) = result {
            tracing::warn!(id = %id, error = %e, "failed to persist settlement outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentRequirements;
    use alloy::signers::local::PrivateKeySigner;
    use serde_json::json;

    fn settler() -> PaymentSettler {
        for var in [
            "BASE_SEPOLIA_RPC_URL",
            "BASE_MAINNET_RPC_URL",
            "ETHEREUM_SEPOLIA_RPC_URL",
            "ETHEREUM_MAINNET_RPC_URL",
            "ZG_MAINNET_RPC_URL",
            "ZG_TESTNET_RPC_URL",
            "SKALE_BASE_SEPOLIA_RPC_URL",
        ] {
            std::env::set_var(var, "http://localhost:1");
        }
        let registry = Arc::new(Registry::from_env(PrivateKeySigner::random()).unwrap());
        PaymentSettler::new(registry, None, None, None)
    }

    fn request(network: &str, valid_before: u64) -> PaymentRequest {
        let mut sig = vec![0x01u8; 32];
        sig.extend_from_slice(&[0x02u8; 32]);
        sig.push(27);
        PaymentRequest {
            x402_version: 1,
            payment_header: json!({
                "from": "0x1111111111111111111111111111111111111111",
                "value": "1000000",
                "validBefore": valid_before,
                "nonce": "0x4242424242424242424242424242424242424242424242424242424242424242",
                "signature": format!("0x{}", alloy::hex::encode(sig)),
            }),
            payment_requirements: PaymentRequirements {
                scheme: "exact".to_string(),
                network: network.to_string(),
                asset: "usdc".to_string(),
                pay_to: "0x2222222222222222222222222222222222222222"
                    .parse()
                    .unwrap(),
                max_amount_required: "1000000".to_string(),
                resource: "/api/data".to_string(),
                max_timeout_seconds: 60,
                description: None,
            },
            agent_id: None,
        }
    }

    #[tokio::test]
    async fn test_settle_rejects_invalid_verification() {
        let s = settler();
        // Expired authorization fails re-verification before any write.
        let err = s
            .settle(&request("base-sepolia", 1), U256::from(10_000u64), U256::from(990_000u64))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expired"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn test_settle_rejects_unknown_network() {
        let s = settler();
        let err = s
            .settle(&request("solana", u64::MAX), U256::ZERO, U256::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported network"));
    }

    #[tokio::test]
    async fn test_settle_rejects_malformed_header() {
        let s = settler();
        let mut req = request("base-sepolia", u64::MAX);
        req.payment_header = json!({"unexpected": true});
        let err = s.settle(&req, U256::ZERO, U256::ZERO).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::InvalidHeader(_)));
    }
}
