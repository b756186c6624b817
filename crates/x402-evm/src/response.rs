use serde::{Deserialize, Serialize};

use crate::identity::AnchorReceipt;

/// Lifecycle state of a settlement transaction.
///
/// `Confirmed` and `Failed` are terminal; `Pending` and `PartialSettlement`
/// are swept by the finality confirmer until the primary transaction reaches
/// the configured depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    PartialSettlement,
    Confirmed,
    Failed,
}

impl SettlementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Confirmed | SettlementStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::PartialSettlement => "partial_settlement",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettlementStatus::Pending),
            "partial_settlement" => Some(SettlementStatus::PartialSettlement),
            "confirmed" => Some(SettlementStatus::Confirmed),
            "failed" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

/// Result of verification. The verifier never fails — RPC and lookup errors
/// are reported through `invalid_reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl VerifyOutcome {
    pub fn valid(decimals: u8) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            decimals: Some(decimals),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            decimals: None,
        }
    }

    pub fn invalid_with_decimals(reason: impl Into<String>, decimals: u8) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            decimals: Some(decimals),
        }
    }
}

/// Outcome of a dispatched settlement.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub tx_hash: String,
    /// Second transaction hash from the relayer strategy's treasury leg.
    pub tx_hash_fee: Option<String>,
    pub status: SettlementStatus,
    pub confirmations: u64,
    /// Present when agent anchoring ran and succeeded.
    pub anchor: Option<AnchorReceipt>,
}
