use std::sync::Arc;

use x402_evm::idempotency::IdempotencyCache;
use x402_evm::rate_limit::RateLimiter;
use x402_evm::registry::Registry;
use x402_evm::settle::PaymentSettler;
use x402_evm::verify::PaymentVerifier;

use crate::config::FacilitatorMode;

/// Shared application state for the facilitator server.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub verifier: PaymentVerifier,
    pub settler: PaymentSettler,
    pub idempotency: Arc<IdempotencyCache>,
    pub rate_limiter: RateLimiter,
    pub mode: FacilitatorMode,
    pub default_chain: String,
    /// Bearer token for /metrics (None = protected unless explicitly public).
    pub metrics_token: Option<Vec<u8>>,
}
