use std::time::{Duration, Instant};

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use alloy::primitives::U256;
use alloy::providers::Provider;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use x402_evm::fee::{self, FeeBreakdown};
use x402_evm::idempotency;
use x402_evm::payment::{PaymentRequest, PaymentRequirements};
use x402_evm::response::SettlementStatus;
use x402_evm::unix_now;

use crate::metrics;
use crate::state::AppState;

const RPC_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyApiResponse {
    is_valid: bool,
    invalid_reason: Option<String>,
    consensus_proof: Option<String>,
    report_id: String,
    timestamp: u64,
    #[serde(flatten)]
    breakdown: FeeBreakdown,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleApiResponse {
    success: bool,
    error: Option<String>,
    tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash_fee: Option<String>,
    network_id: String,
    consensus_proof: Option<String>,
    timestamp: u64,
    #[serde(flatten)]
    breakdown: FeeBreakdown,
    status: SettlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    evidence_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof_of_agency: Option<String>,
}

#[get("/api/info")]
pub async fn info(state: web::Data<AppState>) -> HttpResponse {
    let networks: Vec<Value> = state
        .registry
        .networks()
        .iter()
        .map(|n| {
            json!({
                "network": n.slug,
                "chainId": n.chain_id,
                "confirmations": n.required_confirmations,
                "defaultToken": n.default_token,
                "assets": state.registry.supported_assets(&n.slug),
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({
        "service": "x402-evm-facilitator",
        "version": env!("CARGO_PKG_VERSION"),
        "facilitatorMode": state.mode.as_str(),
        "defaultChain": state.default_chain,
        "feeBps": x402_evm::FEE_BPS,
        "networks": networks,
    }))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let mut networks = serde_json::Map::new();
    let mut default_healthy = false;

    for record in state.registry.networks() {
        let probe = match state.registry.public_client(&record.slug) {
            Ok(client) => {
                match tokio::time::timeout(RPC_PROBE_TIMEOUT, client.get_block_number()).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("rpc probe timed out".to_string()),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        let rpc_healthy = probe.is_ok();
        if record.slug == state.default_chain {
            default_healthy = rpc_healthy;
        }
        let mut entry = json!({
            "rpcHealthy": rpc_healthy,
            "token": record.default_token,
            "status": if rpc_healthy { "ok" } else { "unreachable" },
        });
        if let Err(e) = probe {
            entry["error"] = json!(e);
        }
        networks.insert(record.slug.clone(), entry);
    }

    let body = json!({
        "healthy": default_healthy,
        "facilitatorMode": state.mode.as_str(),
        "networks": networks,
        "timestamp": unix_now(),
    });
    if default_healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[get("/supported")]
pub async fn supported(state: web::Data<AppState>) -> HttpResponse {
    let kinds: Vec<Value> = state
        .registry
        .supported_networks()
        .iter()
        .map(|network| {
            json!({
                "x402Version": 1,
                "scheme": "exact",
                "network": network,
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({ "kinds": kinds }))
}

#[post("/verify")]
pub async fn verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = enforce_rate_limit(&req, &state) {
        return resp;
    }
    let parsed = match parse_request(&body, "VERIFICATION_ERROR") {
        Ok(p) => p,
        Err(resp) => return *resp,
    };

    let fingerprint = request_fingerprint(&req, "/verify", &parsed);
    if let Some(cached) = state.idempotency.get(&fingerprint) {
        metrics::IDEMPOTENT_REPLAYS.inc();
        return replay(cached);
    }

    // Selected once so a retried identical fingerprint replays these bytes.
    let timestamp = unix_now();
    let outcome = state.verifier.verify(&parsed).await;
    metrics::VERIFY_REQUESTS
        .with_label_values(&[if outcome.is_valid { "valid" } else { "invalid" }])
        .inc();
    if !outcome.is_valid {
        tracing::info!(
            reason = outcome.invalid_reason.as_deref().unwrap_or("unknown"),
            network = %parsed.payment_requirements.network,
            "verification rejected"
        );
    }

    let breakdown = breakdown_for(&state, &parsed.payment_requirements);
    let consensus_proof = outcome
        .is_valid
        .then(|| consensus_proof(&extract_nonce(&parsed.payment_header), &parsed.payment_requirements));

    let response = VerifyApiResponse {
        is_valid: outcome.is_valid,
        invalid_reason: outcome.invalid_reason,
        consensus_proof,
        report_id: report_id(timestamp),
        timestamp,
        breakdown,
    };
    store_and_reply(&state, &fingerprint, &response)
}

#[post("/settle")]
pub async fn settle(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = enforce_rate_limit(&req, &state) {
        return resp;
    }
    let parsed = match parse_request(&body, "SETTLEMENT_ERROR") {
        Ok(p) => p,
        Err(resp) => return *resp,
    };

    let fingerprint = request_fingerprint(&req, "/settle", &parsed);
    if let Some(cached) = state.idempotency.get(&fingerprint) {
        metrics::IDEMPOTENT_REPLAYS.inc();
        return replay(cached);
    }

    let timestamp = unix_now();
    let breakdown = breakdown_for(&state, &parsed.payment_requirements);
    let amount: U256 = parsed
        .payment_requirements
        .max_amount_required
        .parse()
        .unwrap_or(U256::ZERO);
    let (fee_amount, net_amount) = fee::fee_parts(amount);

    let start = Instant::now();
    match state.settler.settle(&parsed, fee_amount, net_amount).await {
        Ok(settlement) => {
            let elapsed = start.elapsed().as_secs_f64();
            let success = matches!(
                settlement.status,
                SettlementStatus::Confirmed | SettlementStatus::Pending
            );
            metrics::SETTLE_REQUESTS
                .with_label_values(&[settlement.status.as_str()])
                .inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&[settlement.status.as_str()])
                .observe(elapsed);
            tracing::info!(
                tx = %settlement.tx_hash,
                status = settlement.status.as_str(),
                network = %parsed.payment_requirements.network,
                "settlement completed"
            );

            let error = match settlement.status {
                SettlementStatus::Confirmed | SettlementStatus::Pending => None,
                SettlementStatus::PartialSettlement => {
                    Some("partial settlement: not every transfer leg confirmed".to_string())
                }
                SettlementStatus::Failed => Some("transaction reverted on-chain".to_string()),
            };
            let consensus_proof = success.then(|| {
                consensus_proof(
                    &extract_nonce(&parsed.payment_header),
                    &parsed.payment_requirements,
                )
            });

            let response = SettleApiResponse {
                success,
                error,
                tx_hash: settlement.tx_hash,
                tx_hash_fee: settlement.tx_hash_fee,
                network_id: parsed.payment_requirements.network.clone(),
                consensus_proof,
                timestamp,
                breakdown,
                status: settlement.status,
                evidence_hash: settlement
                    .anchor
                    .as_ref()
                    .map(|a| a.evidence_hash.clone()),
                proof_of_agency: settlement.anchor.map(|a| a.proof_of_agency),
            };
            store_and_reply(&state, &fingerprint, &response)
        }
        Err(e) => {
            let elapsed = start.elapsed().as_secs_f64();
            metrics::SETTLE_REQUESTS.with_label_values(&["error"]).inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&["error"])
                .observe(elapsed);
            tracing::warn!(error = %e, "settlement rejected");
            HttpResponse::BadRequest().json(json!({
                "error": e.to_string(),
                "code": "SETTLEMENT_ERROR",
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            // Protected by default; opt in to public metrics explicitly.
            let public_metrics = std::env::var("X402_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if !public_metrics {
                return HttpResponse::Forbidden().json(json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

/// Fixed-window rate limiting, applied only to the write endpoints.
fn enforce_rate_limit(req: &HttpRequest, state: &AppState) -> Result<(), HttpResponse> {
    let client = client_key(req);
    if state.rate_limiter.check(&client) {
        Ok(())
    } else {
        metrics::RATE_LIMITED.inc();
        tracing::warn!(client = %client, "rate limit exceeded");
        Err(HttpResponse::TooManyRequests().json(json!({
            "error": "Rate limit exceeded",
            "code": "RATE_LIMITED",
        })))
    }
}

/// Caller-provided token beats the connection's IP.
fn client_key(req: &HttpRequest) -> String {
    if let Some(token) = req
        .headers()
        .get("X-Client-Id")
        .and_then(|v| v.to_str().ok())
    {
        return token.to_string();
    }
    let conn_info = req.connection_info();
    conn_info.realip_remote_addr().unwrap_or("unknown").to_string()
}

fn parse_request(body: &[u8], code: &str) -> Result<PaymentRequest, Box<HttpResponse>> {
    let parsed: PaymentRequest = serde_json::from_slice(body).map_err(|e| {
        Box::new(HttpResponse::BadRequest().json(json!({
            "error": "invalid request body",
            "code": code,
            "details": e.to_string(),
        })))
    })?;
    if parsed.payment_requirements.scheme != "exact" {
        return Err(Box::new(HttpResponse::BadRequest().json(json!({
            "error": "unsupported scheme",
            "code": code,
            "details": format!(
                "scheme '{}' is not supported (expected 'exact')",
                parsed.payment_requirements.scheme
            ),
        }))));
    }
    Ok(parsed)
}

fn request_fingerprint(req: &HttpRequest, route: &str, parsed: &PaymentRequest) -> String {
    let key = req
        .headers()
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok());
    let nonce = extract_nonce(&parsed.payment_header);
    idempotency::fingerprint(route, key, &nonce, &parsed.payment_requirements)
}

/// Lenient nonce extraction: normalization first, then raw field lookups so
/// even an invalid header yields a stable fingerprint component.
fn extract_nonce(header: &Value) -> String {
    if let Ok(auth) = x402_evm::header::normalize(header) {
        return auth.nonce;
    }
    header
        .pointer("/payload/authorization/nonce")
        .or_else(|| header.get("nonce"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Fee transparency holds even for invalid requests: fall back to six
/// decimals and the raw asset label when the pair cannot be resolved.
fn breakdown_for(state: &AppState, reqs: &PaymentRequirements) -> FeeBreakdown {
    let amount: U256 = reqs.max_amount_required.parse().unwrap_or(U256::ZERO);
    match state.registry.token_for_asset(&reqs.network, &reqs.asset) {
        Ok(token) => fee::split(amount, token.decimals, &token.symbol.to_uppercase()),
        Err(_) => fee::split(amount, 6, &reqs.asset.to_uppercase()),
    }
}

fn consensus_proof(nonce: &str, reqs: &PaymentRequirements) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"x402-consensus|");
    hasher.update(nonce.as_bytes());
    hasher.update(b"|");
    hasher.update(reqs.pay_to.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(reqs.max_amount_required.as_bytes());
    hasher.update(b"|");
    hasher.update(reqs.network.as_bytes());
    alloy::hex::encode(hasher.finalize())
}

fn report_id(timestamp: u64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("req_{timestamp}_{suffix}")
}

/// Serialize once, cache the exact bytes, then emit them.
fn store_and_reply<T: Serialize>(state: &AppState, fingerprint: &str, response: &T) -> HttpResponse {
    match serde_json::to_string(response) {
        Ok(body) => {
            state.idempotency.store(fingerprint, body.clone());
            HttpResponse::Ok()
                .content_type("application/json")
                .body(body)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            HttpResponse::InternalServerError().json(json!({
                "error": "Internal server error",
                "code": "INTERNAL_ERROR",
            }))
        }
    }
}

fn replay(cached: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/json")
        .body(cached)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
