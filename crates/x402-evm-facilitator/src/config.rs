use std::env;
use std::time::Duration;

use alloy::primitives::Address;

const DEFAULT_PORT: u16 = 8402;
const DEFAULT_CHAIN: &str = "base-sepolia";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 300;
const DEFAULT_ANCHOR_API_URL: &str = "https://api.chaoschain.io";

/// Settlement execution mode. `Decentralized` proxies settlement to an
/// external consensus workflow and is recognized but not yet implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitatorMode {
    Managed,
    Decentralized,
}

impl FacilitatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilitatorMode::Managed => "managed",
            FacilitatorMode::Decentralized => "decentralized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "managed" => Some(FacilitatorMode::Managed),
            "decentralized" => Some(FacilitatorMode::Decentralized),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct FacilitatorConfig {
    pub port: u16,
    pub mode: FacilitatorMode,
    pub default_chain: String,
    /// Facilitator signing key (hex). Required: every write path needs it.
    pub private_key: String,
    /// Fee recipient for relayer-mode settlements.
    pub treasury_address: Option<Address>,
    /// SQLite path for the transaction store. Unset = tracking disabled.
    pub tx_db_path: Option<String>,
    pub idempotency_ttl: Duration,
    pub rate_limit_rpm: u32,
    pub allowed_origins: Vec<String>,
    /// Reputation-registry URL, set when agent anchoring is enabled.
    pub anchor_api_url: Option<String>,
    /// Bearer token required for /metrics (None = protected by default).
    pub metrics_token: Option<Vec<u8>>,
}

impl std::fmt::Debug for FacilitatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorConfig")
            .field("port", &self.port)
            .field("mode", &self.mode)
            .field("default_chain", &self.default_chain)
            .field("private_key", &"[REDACTED]")
            .field("treasury_address", &self.treasury_address)
            .field("tx_db_path", &self.tx_db_path)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field("anchor_api_url", &self.anchor_api_url)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid {0}: {1}")]
    Invalid(&'static str, String),
}

impl FacilitatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT", raw))?,
            Err(_) => DEFAULT_PORT,
        };

        let mode = match env::var("FACILITATOR_MODE") {
            Ok(raw) => FacilitatorMode::parse(&raw)
                .ok_or(ConfigError::Invalid("FACILITATOR_MODE", raw))?,
            Err(_) => FacilitatorMode::Managed,
        };

        let default_chain =
            env::var("DEFAULT_CHAIN").unwrap_or_else(|_| DEFAULT_CHAIN.to_string());

        let private_key = env::var("FACILITATOR_PRIVATE_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingRequired("FACILITATOR_PRIVATE_KEY"))?;

        let treasury_address = match env::var("TREASURY_ADDRESS") {
            Ok(raw) if !raw.is_empty() => Some(
                raw.parse::<Address>()
                    .map_err(|_| ConfigError::Invalid("TREASURY_ADDRESS", raw))?,
            ),
            _ => None,
        };
        if treasury_address.is_none() {
            tracing::warn!(
                "TREASURY_ADDRESS not set — relayer-mode settlements will be rejected"
            );
        }

        let tx_db_path = env::var("TX_DB_PATH").ok().filter(|s| !s.is_empty());

        let idempotency_ttl = Duration::from_secs(
            env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_SECS),
        );

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let anchor_enabled = env::var("CHAOSCHAIN_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let anchor_api_url = anchor_enabled.then(|| {
            env::var("CHAOSCHAIN_API_URL").unwrap_or_else(|_| DEFAULT_ANCHOR_API_URL.to_string())
        });

        let metrics_token = env::var("METRICS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes());
        if metrics_token.is_none() {
            tracing::warn!(
                "METRICS_TOKEN not set — /metrics requires X402_PUBLIC_METRICS=true to be readable"
            );
        }

        Ok(Self {
            port,
            mode,
            default_chain,
            private_key,
            treasury_address,
            tx_db_path,
            idempotency_ttl,
            rate_limit_rpm,
            allowed_origins,
            anchor_api_url,
            metrics_token,
        })
    }
}
