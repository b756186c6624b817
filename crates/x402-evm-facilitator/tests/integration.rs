use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use alloy::signers::local::PrivateKeySigner;
use serde_json::json;

use x402_evm::idempotency::IdempotencyCache;
use x402_evm::rate_limit::RateLimiter;
use x402_evm::registry::Registry;
use x402_evm::settle::PaymentSettler;
use x402_evm::unix_now;
use x402_evm::verify::PaymentVerifier;

use x402_evm_facilitator::config::FacilitatorMode;
use x402_evm_facilitator::routes;
use x402_evm_facilitator::state::AppState;

/// Build an AppState against unreachable RPC endpoints so chain reads fail
/// fast instead of leaving the test harness.
fn make_state(rate_limit: u32) -> web::Data<AppState> {
    for var in [
        "BASE_SEPOLIA_RPC_URL",
        "BASE_MAINNET_RPC_URL",
        "ETHEREUM_SEPOLIA_RPC_URL",
        "ETHEREUM_MAINNET_RPC_URL",
        "ZG_MAINNET_RPC_URL",
        "ZG_TESTNET_RPC_URL",
        "SKALE_BASE_SEPOLIA_RPC_URL",
    ] {
        std::env::set_var(var, "http://localhost:1");
    }
    let registry = Arc::new(Registry::from_env(PrivateKeySigner::random()).unwrap());
    web::Data::new(AppState {
        verifier: PaymentVerifier::new(registry.clone()),
        settler: PaymentSettler::new(registry.clone(), None, None, None),
        registry,
        idempotency: Arc::new(IdempotencyCache::new(Duration::from_secs(300))),
        rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        mode: FacilitatorMode::Managed,
        default_chain: "base-sepolia".to_string(),
        metrics_token: None,
    })
}

fn signature() -> String {
    let mut bytes = vec![0x01u8; 32];
    bytes.extend_from_slice(&[0x02u8; 32]);
    bytes.push(27);
    format!("0x{}", alloy::hex::encode(bytes))
}

fn verify_body(network: &str, valid_before: u64) -> serde_json::Value {
    json!({
        "x402Version": 1,
        "paymentHeader": {
            "from": "0x1111111111111111111111111111111111111111",
            "value": "1000000",
            "validBefore": valid_before,
            "nonce": "0x4242424242424242424242424242424242424242424242424242424242424242",
            "signature": signature(),
        },
        "paymentRequirements": {
            "scheme": "exact",
            "network": network,
            "asset": "usdc",
            "payTo": "0x2222222222222222222222222222222222222222",
            "maxAmountRequired": "1000000",
            "resource": "/api/report",
            "maxTimeoutSeconds": 60,
        },
    })
}

#[actix_rt::test]
async fn test_supported_lists_every_network() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::supported)).await;

    let req = test::TestRequest::get().uri("/supported").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let kinds = body["kinds"].as_array().unwrap();
    assert_eq!(kinds.len(), 7);
    assert_eq!(kinds[0]["scheme"], "exact");
    assert_eq!(kinds[0]["x402Version"], 1);
    assert_eq!(kinds[0]["network"], "base-sepolia");
}

#[actix_rt::test]
async fn test_info_returns_service_metadata() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::info)).await;

    let req = test::TestRequest::get().uri("/api/info").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["service"], "x402-evm-facilitator");
    assert_eq!(body["facilitatorMode"], "managed");
    assert_eq!(body["feeBps"], 100);
}

#[actix_rt::test]
async fn test_health_reports_unreachable_networks() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::health)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    // Every RPC points at a closed port, so the default chain is unhealthy.
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["healthy"], false);
    assert_eq!(body["facilitatorMode"], "managed");
    let base = &body["networks"]["base-sepolia"];
    assert_eq!(base["rpcHealthy"], false);
    assert_eq!(base["token"], "usdc");
    assert!(base["error"].is_string());
}

#[actix_rt::test]
async fn test_verify_unsupported_network() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(verify_body("solana", unix_now() + 3600))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["isValid"], false);
    assert!(body["invalidReason"]
        .as_str()
        .unwrap()
        .contains("Unsupported network: solana"));
    // Fee transparency holds even for rejected requests.
    assert_eq!(body["amount"]["base"], "1000000");
    assert_eq!(body["fee"]["base"], "10000");
    assert_eq!(body["net"]["base"], "990000");
    assert!(body["consensusProof"].is_null());
    assert!(body["reportId"].as_str().unwrap().starts_with("req_"));
}

#[actix_rt::test]
async fn test_verify_expired_authorization_with_fee_fields() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["isValid"], false);
    assert!(body["invalidReason"].as_str().unwrap().contains("expired"));
    assert_eq!(body["amount"]["human"], "1");
    assert_eq!(body["fee"]["human"], "0.01");
    assert_eq!(body["net"]["human"], "0.99");
    assert_eq!(body["amount"]["symbol"], "USDC");
}

#[actix_rt::test]
async fn test_verify_rejects_malformed_body() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("not json at all")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "VERIFICATION_ERROR");
    assert!(body["details"].is_string());
}

#[actix_rt::test]
async fn test_verify_rejects_unknown_scheme() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let mut body = verify_body("base-sepolia", unix_now() + 3600);
    body["paymentRequirements"]["scheme"] = json!("streaming");
    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "VERIFICATION_ERROR");
}

#[actix_rt::test]
async fn test_verify_idempotent_replay_is_byte_identical() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let payload = verify_body("base-sepolia", 1);
    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(payload.clone())
        .to_request();
    let first = test::call_service(&app, req).await;
    assert_eq!(first.status(), 200);
    let first_bytes = test::read_body(first).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(payload)
        .to_request();
    let second = test::call_service(&app, req).await;
    assert_eq!(second.status(), 200);
    let second_bytes = test::read_body(second).await;

    // Byte-identical, including reportId and timestamp.
    assert_eq!(first_bytes, second_bytes);
}

#[actix_rt::test]
async fn test_idempotency_key_overrides_fingerprint() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    // Two different bodies under the same Idempotency-Key: the second is
    // served from the cache.
    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("Idempotency-Key", "key-1"))
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    let first_bytes = test::read_body(test::call_service(&app, req).await).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("Idempotency-Key", "key-1"))
        .set_json(verify_body("solana", 1))
        .to_request();
    let second_bytes = test::read_body(test::call_service(&app, req).await).await;

    assert_eq!(first_bytes, second_bytes);
}

#[actix_rt::test]
async fn test_rate_limit_returns_structured_429() {
    let state = make_state(2);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/verify")
            .insert_header(("X-Client-Id", "limited-client"))
            .set_json(verify_body("base-sepolia", 1))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("X-Client-Id", "limited-client"))
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[actix_rt::test]
async fn test_rate_limit_keys_are_independent() {
    let state = make_state(1);
    let app = test::init_service(App::new().app_data(state).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("X-Client-Id", "client-a"))
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::post()
        .uri("/verify")
        .insert_header(("X-Client-Id", "client-b"))
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_rt::test]
async fn test_settle_rejects_malformed_body() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::settle)).await;

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "SETTLEMENT_ERROR");
}

#[actix_rt::test]
async fn test_settle_expired_authorization_is_rejected() {
    let state = make_state(120);
    let app = test::init_service(App::new().app_data(state).service(routes::settle)).await;

    let req = test::TestRequest::post()
        .uri("/settle")
        .set_json(verify_body("base-sepolia", 1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "SETTLEMENT_ERROR");
    assert!(body["error"].as_str().unwrap().contains("expired"));
}

#[actix_rt::test]
async fn test_metrics_forbidden_without_token() {
    let state = make_state(120);
    let app =
        test::init_service(App::new().app_data(state).service(routes::metrics_endpoint)).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_rt::test]
async fn test_metrics_requires_matching_bearer_token() {
    let state = make_state(120);
    // Rebuild with a metrics token set.
    let state = web::Data::new(AppState {
        verifier: state.verifier.clone(),
        settler: PaymentSettler::new(state.registry.clone(), None, None, None),
        registry: state.registry.clone(),
        idempotency: Arc::new(IdempotencyCache::new(Duration::from_secs(300))),
        rate_limiter: RateLimiter::new(120, Duration::from_secs(60)),
        mode: FacilitatorMode::Managed,
        default_chain: "base-sepolia".to_string(),
        metrics_token: Some(b"metrics-token-123".to_vec()),
    });
    let app =
        test::init_service(App::new().app_data(state).service(routes::metrics_endpoint)).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer wrong-token"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer metrics-token-123"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}
