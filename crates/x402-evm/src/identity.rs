//! Agent-identity anchoring.
//!
//! After a confirmed EIP-3009 settlement carrying an `agentId`, the
//! settlement evidence can be anchored on an external reputation registry.
//! The call is best-effort: a failure logs and the response simply omits the
//! evidence fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FacilitatorError;

const ANCHOR_ATTEMPTS: u32 = 3;

/// Evidence returned by the reputation registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    pub evidence_hash: String,
    pub proof_of_agency: String,
}

#[derive(Clone)]
pub struct AnchorClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnchorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// POST the settlement evidence, retrying with exponential backoff.
    pub async fn anchor(
        &self,
        agent_id: &str,
        tx_hash: &str,
        chain: &str,
        amount: &str,
        payment_data: &Value,
    ) -> Result<AnchorReceipt, FacilitatorError> {
        let url = format!("{}/evidence", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "agentId": agent_id,
            "txHash": tx_hash,
            "chain": chain,
            "amount": amount,
            "paymentData": payment_data,
        });

        let mut last_err = String::new();
        for attempt in 0..ANCHOR_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(2u64.pow(attempt))).await;
            }
            match self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<AnchorReceipt>().await.map_err(|e| {
                        FacilitatorError::Anchor(format!("invalid anchor response: {e}"))
                    });
                }
                Ok(resp) => {
                    last_err = format!("HTTP {}", resp.status());
                    tracing::warn!(attempt = attempt + 1, error = %last_err, "anchor request failed");
                }
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(attempt = attempt + 1, error = %last_err, "anchor request failed");
                }
            }
        }

        Err(FacilitatorError::Anchor(format!(
            "anchoring failed after {ANCHOR_ATTEMPTS} attempts: {last_err}"
        )))
    }
}
