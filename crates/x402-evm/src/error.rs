use thiserror::Error;

/// Errors surfaced by the settlement engine.
///
/// The verifier flattens every non-fatal variant into a returned
/// `invalid_reason`; only the settler and bootstrap paths propagate these
/// as hard failures.
#[derive(Debug, Error)]
pub enum FacilitatorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("invalid payment header: {0}")]
    InvalidHeader(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("chain error: {0}")]
    Rpc(String),

    #[error("settlement error: {0}")]
    Settlement(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("anchor error: {0}")]
    Anchor(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for FacilitatorError {
    fn from(e: rusqlite::Error) -> Self {
        FacilitatorError::Store(e.to_string())
    }
}

impl FacilitatorError {
    /// True for unknown-network / unknown-asset lookups, which map to 400
    /// on the write endpoints and `rpcHealthy: false` on `/health`.
    pub fn is_not_supported(&self) -> bool {
        matches!(
            self,
            FacilitatorError::UnsupportedNetwork(_) | FacilitatorError::UnsupportedAsset(_)
        )
    }
}
