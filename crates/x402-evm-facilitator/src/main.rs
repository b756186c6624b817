use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use alloy::signers::local::PrivateKeySigner;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402_evm::confirmer::{self, RegistryReader};
use x402_evm::idempotency::IdempotencyCache;
use x402_evm::identity::AnchorClient;
use x402_evm::rate_limit::RateLimiter;
use x402_evm::registry::Registry;
use x402_evm::settle::PaymentSettler;
use x402_evm::tx_store::TransactionStore;
use x402_evm::verify::PaymentVerifier;

use x402_evm_facilitator::config::FacilitatorConfig;
use x402_evm_facilitator::routes;
use x402_evm_facilitator::state::AppState;

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        // Default: allow localhost on any port
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allowed_headers(vec!["content-type", "idempotency-key", "x-client-id"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allowed_headers(vec!["content-type", "idempotency-key", "x-client-id"])
            .max_age(3600)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{log_level},actix_web={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match FacilitatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let signer: PrivateKeySigner = match config.private_key.parse() {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!("invalid FACILITATOR_PRIVATE_KEY: {e}");
            std::process::exit(1);
        }
    };
    let facilitator_address = signer.address();

    let registry = match Registry::from_env(signer) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("failed to build chain registry: {e}");
            std::process::exit(1);
        }
    };
    if registry.chain_of(&config.default_chain).is_err() {
        tracing::error!("DEFAULT_CHAIN '{}' is not a known network", config.default_chain);
        std::process::exit(1);
    }

    let tx_store = match &config.tx_db_path {
        Some(path) => match TransactionStore::open(path) {
            Ok(store) => {
                tracing::info!("Transaction store: SQLite at {path}");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::error!("failed to open transaction store at {path}: {e}");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("TX_DB_PATH not set — finality tracking disabled");
            None
        }
    };

    let anchor = config.anchor_api_url.as_deref().map(AnchorClient::new);
    if anchor.is_some() {
        tracing::info!("Agent anchoring enabled");
    }

    let idempotency = Arc::new(IdempotencyCache::new(config.idempotency_ttl));
    idempotency.start_purge();

    // Finality confirmer: one long-lived task, drained via the watch channel
    // on shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let confirmer_handle = tx_store.as_ref().map(|store| {
        confirmer::spawn(
            RegistryReader::new(registry.clone()),
            store.clone(),
            shutdown_rx,
        )
    });

    let state = web::Data::new(AppState {
        verifier: PaymentVerifier::new(registry.clone()),
        settler: PaymentSettler::new(
            registry.clone(),
            tx_store.clone(),
            config.treasury_address,
            anchor,
        ),
        registry: registry.clone(),
        idempotency,
        rate_limiter: RateLimiter::new(config.rate_limit_rpm, Duration::from_secs(60)),
        mode: config.mode,
        default_chain: config.default_chain.clone(),
        metrics_token: config.metrics_token.clone(),
    });

    tracing::info!("x402 EVM facilitator listening on port {}", config.port);
    tracing::info!("Facilitator address: {facilitator_address}");
    tracing::info!(
        "Networks: {} ({} default)",
        registry.supported_networks().join(", "),
        config.default_chain
    );
    tracing::info!("Rate limit: {} req/min per client", config.rate_limit_rpm);

    let cors_origins = config.allowed_origins.clone();
    let result = HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(65_536))
            .service(routes::info)
            .service(routes::health)
            .service(routes::supported)
            .service(routes::verify)
            .service(routes::settle)
            .service(routes::metrics_endpoint)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = confirmer_handle {
        let _ = handle.await;
    }
    result
}
