//! Payment verification.
//!
//! Sequential fail-fast checks against a live chain. The verifier reports —
//! it never propagates an error: unsupported lookups, malformed headers, and
//! RPC failures all become an `invalid_reason` on the returned outcome.

use std::sync::Arc;

use alloy::primitives::U256;

use crate::erc20;
use crate::error::FacilitatorError;
use crate::header;
use crate::payment::PaymentRequest;
use crate::registry::Registry;
use crate::response::VerifyOutcome;
use crate::unix_now;

#[derive(Clone)]
pub struct PaymentVerifier {
    registry: Arc<Registry>,
}

impl PaymentVerifier {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Verify a payment request. Infallible by design: every failure shape
    /// is reported through the outcome.
    pub async fn verify(&self, request: &PaymentRequest) -> VerifyOutcome {
        match self.check(request).await {
            Ok(outcome) => outcome,
            Err(e) => VerifyOutcome::invalid(e.to_string()),
        }
    }

    async fn check(&self, request: &PaymentRequest) -> Result<VerifyOutcome, FacilitatorError> {
        let reqs = &request.payment_requirements;

        // 1. Network must be registered.
        self.registry.chain_of(&reqs.network)?;

        // 2. Canonicalize the header.
        let auth = header::normalize(&request.payment_header)?;

        // 3. Token config. Configured decimals are authoritative — no RPC
        //    round-trip for metadata.
        let token = self.registry.token_for_asset(&reqs.network, &reqs.asset)?;
        let decimals = token.decimals;
        let symbol = token.symbol.clone();
        let supports_eip3009 = token.supports_eip3009;
        let token_addr = self.registry.address_of(&reqs.network, &symbol)?;

        // 4. Amount must parse as base units.
        let amount: U256 = reqs.max_amount_required.parse().map_err(|e| {
            FacilitatorError::InvalidPayment(format!("invalid maxAmountRequired: {e}"))
        })?;

        // 5–6. Time window.
        let now = unix_now();
        if let Some(valid_after) = auth.valid_after {
            if now < valid_after {
                return Ok(VerifyOutcome::invalid_with_decimals(
                    format!("Authorization not yet valid (validAfter: {valid_after}, now: {now})"),
                    decimals,
                ));
            }
        }
        if let Some(valid_before) = auth.valid_before {
            if now > valid_before {
                return Ok(VerifyOutcome::invalid_with_decimals(
                    format!("Authorization expired (validBefore: {valid_before}, now: {now})"),
                    decimals,
                ));
            }
        }

        // 7. Payer must hold the gross amount.
        let provider = self.registry.public_client(&reqs.network)?;
        let balance = erc20::balance_of(provider, token_addr, auth.from).await?;
        if balance < amount {
            return Ok(VerifyOutcome::invalid_with_decimals(
                format!(
                    "Insufficient {} balance. Required: {amount}, Available: {balance}",
                    symbol.to_uppercase()
                ),
                decimals,
            ));
        }

        // 8–9. Replay protection: on-chain nonce state for EIP-3009 tokens,
        // facilitator allowance for relayer tokens.
        if supports_eip3009 {
            let nonce = header::nonce_bytes(&auth.nonce)?;
            let used = erc20::authorization_state(provider, token_addr, auth.from, nonce).await?;
            if used {
                return Ok(VerifyOutcome::invalid_with_decimals(
                    format!("Authorization already used (nonce: {})", auth.nonce),
                    decimals,
                ));
            }
        } else {
            let facilitator = self.registry.facilitator_address();
            let approved = erc20::allowance(provider, token_addr, auth.from, facilitator).await?;
            if approved < amount {
                return Ok(VerifyOutcome::invalid_with_decimals(
                    format!(
                        "Insufficient allowance for facilitator {facilitator}. \
                         Required: {amount}, Approved: {approved}"
                    ),
                    decimals,
                ));
            }
        }

        tracing::debug!(
            payer = %auth.from,
            network = %reqs.network,
            amount = %amount,
            "payment verification succeeded"
        );

        Ok(VerifyOutcome::valid(decimals))
    }
}
