use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Merchant-stated terms of a payment, sent alongside the signed header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Token symbol (`usdc`) or 20-byte contract address.
    pub asset: String,
    pub pay_to: Address,
    /// Decimal string of token base units.
    pub max_amount_required: String,
    /// Opaque URI path for receipt binding.
    #[serde(default)]
    pub resource: String,
    #[serde(default = "default_timeout")]
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_timeout() -> u64 {
    60
}

/// Request body shared by `/verify` and `/settle`.
///
/// `payment_header` is kept as raw JSON: it may be a base64 string or any of
/// the three structured shapes the normalizer accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(default = "default_version")]
    pub x402_version: u32,
    pub payment_header: serde_json::Value,
    pub payment_requirements: PaymentRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

fn default_version() -> u32 {
    1
}
