// Core types and errors
pub mod error;
pub mod fee;
pub mod header;
pub mod payment;
pub mod response;

// Chain access
pub mod erc20;
pub mod registry;

// Settlement pipeline
pub mod confirmer;
pub mod settle;
pub mod verify;

// Gateway infrastructure
pub mod idempotency;
pub mod identity;
pub mod rate_limit;
pub mod tx_store;

use alloy::sol;

// ERC-20 interface including the EIP-3009 extension. The #[sol(rpc)]
// attribute generates typed contract handles over any alloy provider.
sol! {
    #[sol(rpc)]
    interface ERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function transferFrom(address from, address to, uint256 value) external returns (bool);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

// Re-exports
pub use error::FacilitatorError;
pub use fee::{FeeBreakdown, FEE_BPS};
pub use header::Authorization;
pub use payment::{PaymentRequest, PaymentRequirements};
pub use response::{Settlement, SettlementStatus, VerifyOutcome};

pub use registry::Registry;
pub use settle::PaymentSettler;
pub use verify::PaymentVerifier;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
