//! Typed ERC-20 reads and writes over an alloy provider.
//!
//! Writes are submitted with a bounded retry (3 attempts, 1s apart) and a
//! send timeout; receipt waits carry their own timeout so a congested chain
//! cannot hang a settlement indefinitely — the finality confirmer picks up
//! whatever the request-scoped wait could not observe.

use std::time::Duration;

use alloy::network::Ethereum;
use alloy::primitives::{Address, FixedBytes, TxHash, U256};
use alloy::providers::{PendingTransactionBuilder, Provider};

use crate::error::FacilitatorError;
use crate::ERC20;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_secs(1);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Query the ERC-20 balance of `owner`.
pub async fn balance_of<P: Provider>(
    provider: &P,
    token: Address,
    owner: Address,
) -> Result<U256, FacilitatorError> {
    let contract = ERC20::new(token, provider);
    contract
        .balanceOf(owner)
        .call()
        .await
        .map_err(|e| FacilitatorError::Rpc(format!("balanceOf failed: {e}")))
}

/// Query the ERC-20 allowance that `owner` has granted to `spender`.
pub async fn allowance<P: Provider>(
    provider: &P,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256, FacilitatorError> {
    let contract = ERC20::new(token, provider);
    contract
        .allowance(owner, spender)
        .call()
        .await
        .map_err(|e| FacilitatorError::Rpc(format!("allowance failed: {e}")))
}

/// Query the EIP-3009 authorization state: `true` means the nonce is spent.
pub async fn authorization_state<P: Provider>(
    provider: &P,
    token: Address,
    authorizer: Address,
    nonce: FixedBytes<32>,
) -> Result<bool, FacilitatorError> {
    let contract = ERC20::new(token, provider);
    contract
        .authorizationState(authorizer, nonce)
        .call()
        .await
        .map_err(|e| FacilitatorError::Rpc(format!("authorizationState failed: {e}")))
}

/// Submit `transferWithAuthorization` and return the pending transaction.
#[allow(clippy::too_many_arguments)]
pub async fn submit_transfer_with_authorization<P: Provider>(
    provider: &P,
    token: Address,
    from: Address,
    to: Address,
    value: U256,
    valid_after: U256,
    valid_before: U256,
    nonce: FixedBytes<32>,
    v: u8,
    r: FixedBytes<32>,
    s: FixedBytes<32>,
) -> Result<PendingTransactionBuilder<Ethereum>, FacilitatorError> {
    let contract = ERC20::new(token, provider);
    let mut last_err = String::new();
    for attempt in 1..=WRITE_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(WRITE_RETRY_DELAY).await;
        }
        let call = contract.transferWithAuthorization(
            from,
            to,
            value,
            valid_after,
            valid_before,
            nonce,
            v,
            r,
            s,
        );
        match tokio::time::timeout(SEND_TIMEOUT, call.send()).await {
            Ok(Ok(pending)) => return Ok(pending),
            Ok(Err(e)) => {
                last_err = e.to_string();
                tracing::warn!(attempt, error = %last_err, "transferWithAuthorization send failed");
            }
            Err(_) => {
                last_err = format!("send timed out after {}s", SEND_TIMEOUT.as_secs());
                tracing::warn!(attempt, "transferWithAuthorization send timed out");
            }
        }
    }
    Err(FacilitatorError::Settlement(format!(
        "transferWithAuthorization failed after {WRITE_ATTEMPTS} attempts: {last_err}"
    )))
}

/// Submit `transferFrom(from, to, value)` and return the pending transaction.
pub async fn submit_transfer_from<P: Provider>(
    provider: &P,
    token: Address,
    from: Address,
    to: Address,
    value: U256,
) -> Result<PendingTransactionBuilder<Ethereum>, FacilitatorError> {
    let contract = ERC20::new(token, provider);
    let mut last_err = String::new();
    for attempt in 1..=WRITE_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(WRITE_RETRY_DELAY).await;
        }
        match tokio::time::timeout(SEND_TIMEOUT, contract.transferFrom(from, to, value).send())
            .await
        {
            Ok(Ok(pending)) => return Ok(pending),
            Ok(Err(e)) => {
                last_err = e.to_string();
                tracing::warn!(attempt, error = %last_err, "transferFrom send failed");
            }
            Err(_) => {
                last_err = format!("send timed out after {}s", SEND_TIMEOUT.as_secs());
                tracing::warn!(attempt, "transferFrom send timed out");
            }
        }
    }
    Err(FacilitatorError::Settlement(format!(
        "transferFrom failed after {WRITE_ATTEMPTS} attempts: {last_err}"
    )))
}

/// The transaction hash of a submitted-but-unconfirmed transaction.
pub fn pending_hash(pending: &PendingTransactionBuilder<Ethereum>) -> TxHash {
    *pending.tx_hash()
}

/// Await the receipt at the given confirmation depth. Returns the receipt's
/// success flag; times out rather than waiting forever.
pub async fn wait_for_receipt(
    pending: PendingTransactionBuilder<Ethereum>,
    confirmations: u64,
) -> Result<bool, FacilitatorError> {
    let receipt = tokio::time::timeout(
        RECEIPT_TIMEOUT,
        pending
            .with_required_confirmations(confirmations)
            .get_receipt(),
    )
    .await
    .map_err(|_| {
        FacilitatorError::Rpc(format!(
            "receipt wait timed out after {}s",
            RECEIPT_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| FacilitatorError::Rpc(format!("receipt wait failed: {e}")))?;
    Ok(receipt.status())
}
