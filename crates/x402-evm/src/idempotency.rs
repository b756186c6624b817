//! Idempotency cache.
//!
//! Responses to `/verify` and `/settle` are stored under a request
//! fingerprint before they are emitted, so a retried identical request
//! replays the exact same bytes — including its timestamp — without
//! re-entering the pipeline. Entries expire after a configurable TTL and a
//! background task purges them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::payment::PaymentRequirements;

struct CachedResponse {
    body: String,
    stored_at: Instant,
}

pub struct IdempotencyCache {
    entries: DashMap<String, CachedResponse>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a cached body if the entry is still within TTL.
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        let entry = self.entries.get(fingerprint)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.body.clone())
    }

    /// Store the serialized response body. Must happen before the reply is
    /// emitted so a racing retry can only ever observe the full body.
    pub fn store(&self, fingerprint: &str, body: String) {
        self.entries.insert(
            fingerprint.to_string(),
            CachedResponse {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - self.entries.len()
    }

    /// Background task purging expired entries every 60 seconds.
    pub fn start_purge(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired idempotency entries");
                }
            }
        });
    }
}

/// Derive the request fingerprint: a caller-supplied `Idempotency-Key`
/// overrides the stable subset of the body.
pub fn fingerprint(
    route: &str,
    idempotency_key: Option<&str>,
    nonce: &str,
    requirements: &PaymentRequirements,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route.as_bytes());
    hasher.update(b"|");
    match idempotency_key {
        Some(key) => hasher.update(key.as_bytes()),
        None => {
            hasher.update(nonce.as_bytes());
            hasher.update(b"|");
            hasher.update(requirements.resource.as_bytes());
            hasher.update(b"|");
            hasher.update(requirements.pay_to.to_string().as_bytes());
            hasher.update(b"|");
            hasher.update(requirements.max_amount_required.as_bytes());
            hasher.update(b"|");
            hasher.update(requirements.network.as_bytes());
        }
    }
    alloy::hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn requirements(amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            asset: "usdc".to_string(),
            pay_to: Address::ZERO,
            max_amount_required: amount.to_string(),
            resource: "/api/data".to_string(),
            max_timeout_seconds: 60,
            description: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("/verify", None, "0xabc", &requirements("1000"));
        let b = fingerprint("/verify", None, "0xabc", &requirements("1000"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_varies_by_inputs() {
        let base = fingerprint("/verify", None, "0xabc", &requirements("1000"));
        assert_ne!(
            base,
            fingerprint("/settle", None, "0xabc", &requirements("1000"))
        );
        assert_ne!(
            base,
            fingerprint("/verify", None, "0xdef", &requirements("1000"))
        );
        assert_ne!(
            base,
            fingerprint("/verify", None, "0xabc", &requirements("2000"))
        );
    }

    #[test]
    fn test_idempotency_key_overrides_derivation() {
        let a = fingerprint("/verify", Some("client-key"), "0xabc", &requirements("1000"));
        let b = fingerprint("/verify", Some("client-key"), "0xdef", &requirements("2000"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_roundtrip_and_expiry() {
        let cache = IdempotencyCache::new(Duration::from_millis(40));
        cache.store("fp", "{\"ok\":true}".to_string());
        assert_eq!(cache.get("fp").as_deref(), Some("{\"ok\":true}"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.get("fp").is_none());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        assert!(cache.get("missing").is_none());
    }
}
