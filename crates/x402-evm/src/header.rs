//! Payment-header normalization.
//!
//! Clients send the signed authorization in one of three shapes: wrapped
//! (`payload.authorization` + `payload.signature`), flat (`from` + `nonce`),
//! or sender-aliased (`sender` + `nonce`). Any of them may arrive as a
//! base64-encoded JSON string. All collapse into a single canonical
//! [`Authorization`] with the signature split into `(v, r, s)`.

use alloy::primitives::{Address, FixedBytes};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FacilitatorError;

/// Canonical authorization record produced by normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Signed transfer value as a base-unit decimal string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_before: Option<u64>,
    /// 0x-prefixed 32-byte hex string (66 characters).
    pub nonce: String,
    pub v: u8,
    pub r: FixedBytes<32>,
    pub s: FixedBytes<32>,
}

/// Raw field set shared by the flat and sender-aliased shapes, and by the
/// inner `authorization` object of the wrapped shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthorization {
    #[serde(alias = "sender")]
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    valid_after: Option<Value>,
    #[serde(default)]
    valid_before: Option<Value>,
    nonce: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    v: Option<u8>,
    #[serde(default)]
    r: Option<String>,
    #[serde(default)]
    s: Option<String>,
}

/// Normalize any accepted header shape into the canonical record.
pub fn normalize(header: &Value) -> Result<Authorization, FacilitatorError> {
    let decoded;
    let obj = match header {
        Value::String(s) => {
            decoded = decode_base64_json(s)?;
            &decoded
        }
        other => other,
    };

    if !obj.is_object() {
        return Err(FacilitatorError::InvalidHeader(
            "payment header must be an object or base64-encoded JSON".to_string(),
        ));
    }

    // Recognition order: wrapped > flat (from) > sender-aliased.
    let mut raw: RawAuthorization = if let Some(auth) = obj.pointer("/payload/authorization") {
        let mut raw: RawAuthorization = serde_json::from_value(auth.clone())
            .map_err(|e| FacilitatorError::InvalidHeader(format!("malformed authorization: {e}")))?;
        if raw.signature.is_none() {
            raw.signature = obj
                .pointer("/payload/signature")
                .and_then(Value::as_str)
                .map(String::from);
        }
        // Top-level v/r/s accompany the wrapped shape when the client splits
        // the signature itself.
        if raw.v.is_none() {
            raw.v = obj.get("v").and_then(Value::as_u64).map(|v| v as u8);
        }
        if raw.r.is_none() {
            raw.r = obj.get("r").and_then(Value::as_str).map(String::from);
        }
        if raw.s.is_none() {
            raw.s = obj.get("s").and_then(Value::as_str).map(String::from);
        }
        raw
    } else if (obj.get("from").is_some() || obj.get("sender").is_some())
        && obj.get("nonce").is_some()
    {
        serde_json::from_value(obj.clone())
            .map_err(|e| FacilitatorError::InvalidHeader(format!("malformed authorization: {e}")))?
    } else {
        return Err(FacilitatorError::InvalidHeader(
            "unrecognized payment header shape".to_string(),
        ));
    };

    let (v, r, s) = split_signature(raw.v, raw.r.take(), raw.s.take(), raw.signature.as_deref())?;

    Ok(Authorization {
        from: raw.from,
        to: raw.to,
        value: raw.value.map(|v| field_as_string(&v, "value")).transpose()?,
        valid_after: raw
            .valid_after
            .map(|v| field_as_u64(&v, "validAfter"))
            .transpose()?,
        valid_before: raw
            .valid_before
            .map(|v| field_as_u64(&v, "validBefore"))
            .transpose()?,
        nonce: canonical_nonce(&raw.nonce)?,
        v,
        r,
        s,
    })
}

fn decode_base64_json(s: &str) -> Result<Value, FacilitatorError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid base64 header: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid header JSON: {e}")))
}

/// Use the split `(v, r, s)` form when present and non-zero, otherwise
/// decompose the combined 65-byte signature.
fn split_signature(
    v: Option<u8>,
    r: Option<String>,
    s: Option<String>,
    signature: Option<&str>,
) -> Result<(u8, FixedBytes<32>, FixedBytes<32>), FacilitatorError> {
    if let (Some(v), Some(r), Some(s)) = (v, r.as_deref(), s.as_deref()) {
        let r = parse_word(r, "r")?;
        let s = parse_word(s, "s")?;
        if v != 0 && !r.is_zero() && !s.is_zero() {
            return Ok((v, r, s));
        }
    }

    let sig = signature.ok_or_else(|| {
        FacilitatorError::InvalidHeader("Missing signature".to_string())
    })?;
    let bytes = alloy::hex::decode(sig.strip_prefix("0x").unwrap_or(sig))
        .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid hex signature: {e}")))?;
    if bytes.len() != 65 {
        return Err(FacilitatorError::InvalidHeader(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    Ok((
        bytes[64],
        FixedBytes::from_slice(&bytes[..32]),
        FixedBytes::from_slice(&bytes[32..64]),
    ))
}

fn parse_word(hex: &str, field: &str) -> Result<FixedBytes<32>, FacilitatorError> {
    hex.parse::<FixedBytes<32>>()
        .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid {field}: {e}")))
}

/// Prepend `0x` if absent and require the 66-character form. The hex digits
/// themselves are left to the chain to reject at submission time.
fn canonical_nonce(nonce: &str) -> Result<String, FacilitatorError> {
    let canonical = if nonce.starts_with("0x") {
        nonce.to_string()
    } else {
        format!("0x{nonce}")
    };
    if canonical.len() != 66 {
        return Err(FacilitatorError::InvalidHeader(format!(
            "nonce must be 32 bytes of hex, got {} characters",
            canonical.len()
        )));
    }
    Ok(canonical)
}

/// Parse a canonical nonce string into the on-chain `bytes32` form.
pub fn nonce_bytes(nonce: &str) -> Result<FixedBytes<32>, FacilitatorError> {
    nonce
        .parse::<FixedBytes<32>>()
        .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid nonce: {e}")))
}

fn field_as_string(v: &Value, field: &str) -> Result<String, FacilitatorError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(FacilitatorError::InvalidHeader(format!(
            "{field} must be a string or number"
        ))),
    }
}

fn field_as_u64(v: &Value, field: &str) -> Result<u64, FacilitatorError> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| FacilitatorError::InvalidHeader(format!("{field} out of range"))),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|e| FacilitatorError::InvalidHeader(format!("invalid {field}: {e}"))),
        _ => Err(FacilitatorError::InvalidHeader(format!(
            "{field} must be a number or decimal string"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FROM: &str = "0x1111111111111111111111111111111111111111";
    const TO: &str = "0x2222222222222222222222222222222222222222";
    const NONCE: &str = "0x4242424242424242424242424242424242424242424242424242424242424242";

    fn combined_signature() -> String {
        // r = 0x01..01, s = 0x02..02, v = 27
        let mut bytes = vec![0x01u8; 32];
        bytes.extend_from_slice(&[0x02u8; 32]);
        bytes.push(27);
        format!("0x{}", alloy::hex::encode(bytes))
    }

    #[test]
    fn test_flat_shape() {
        let header = json!({
            "from": FROM,
            "to": TO,
            "value": "1000000",
            "validAfter": 0,
            "validBefore": 1999999999u64,
            "nonce": NONCE,
            "signature": combined_signature(),
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.from, FROM.parse::<Address>().unwrap());
        assert_eq!(auth.to, Some(TO.parse::<Address>().unwrap()));
        assert_eq!(auth.value.as_deref(), Some("1000000"));
        assert_eq!(auth.valid_after, Some(0));
        assert_eq!(auth.valid_before, Some(1999999999));
        assert_eq!(auth.nonce, NONCE);
        assert_eq!(auth.v, 27);
        assert_eq!(auth.r, FixedBytes::new([0x01; 32]));
        assert_eq!(auth.s, FixedBytes::new([0x02; 32]));
    }

    #[test]
    fn test_sender_aliased_shape() {
        let header = json!({
            "sender": FROM,
            "nonce": NONCE,
            "signature": combined_signature(),
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.from, FROM.parse::<Address>().unwrap());
        assert!(auth.to.is_none());
    }

    #[test]
    fn test_wrapped_shape_with_payload_signature() {
        let header = json!({
            "payload": {
                "authorization": {
                    "from": FROM,
                    "to": TO,
                    "value": 1000000,
                    "nonce": NONCE,
                },
                "signature": combined_signature(),
            }
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.value.as_deref(), Some("1000000"));
        assert_eq!(auth.v, 27);
    }

    #[test]
    fn test_wrapped_shape_with_top_level_vrs() {
        let header = json!({
            "payload": {
                "authorization": {
                    "from": FROM,
                    "nonce": NONCE,
                }
            },
            "v": 28,
            "r": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "s": "0x0202020202020202020202020202020202020202020202020202020202020202",
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.v, 28);
        assert_eq!(auth.r, FixedBytes::new([0x01; 32]));
    }

    #[test]
    fn test_base64_string_input() {
        let inner = json!({
            "from": FROM,
            "nonce": NONCE,
            "signature": combined_signature(),
        });
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&inner).unwrap());
        let auth = normalize(&Value::String(encoded)).unwrap();
        assert_eq!(auth.from, FROM.parse::<Address>().unwrap());
    }

    #[test]
    fn test_split_form_takes_precedence_over_combined() {
        let header = json!({
            "from": FROM,
            "nonce": NONCE,
            "signature": combined_signature(),
            "v": 28,
            "r": "0x0303030303030303030303030303030303030303030303030303030303030303",
            "s": "0x0404040404040404040404040404040404040404040404040404040404040404",
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.v, 28);
        assert_eq!(auth.r, FixedBytes::new([0x03; 32]));
        assert_eq!(auth.s, FixedBytes::new([0x04; 32]));
    }

    #[test]
    fn test_zeroed_split_falls_back_to_combined() {
        let header = json!({
            "from": FROM,
            "nonce": NONCE,
            "signature": combined_signature(),
            "v": 0,
            "r": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "s": "0x0000000000000000000000000000000000000000000000000000000000000000",
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.v, 27);
        assert_eq!(auth.r, FixedBytes::new([0x01; 32]));
    }

    #[test]
    fn test_missing_signature() {
        let header = json!({ "from": FROM, "nonce": NONCE });
        let err = normalize(&header).unwrap_err();
        assert!(err.to_string().contains("Missing signature"));
    }

    #[test]
    fn test_unrecognized_shape() {
        let header = json!({ "foo": "bar" });
        assert!(normalize(&header).is_err());
    }

    #[test]
    fn test_nonce_gets_prefix() {
        let header = json!({
            "from": FROM,
            "nonce": NONCE.trim_start_matches("0x"),
            "signature": combined_signature(),
        });
        let auth = normalize(&header).unwrap();
        assert_eq!(auth.nonce, NONCE);
    }

    #[test]
    fn test_short_nonce_rejected() {
        let header = json!({
            "from": FROM,
            "nonce": "0x4242",
            "signature": combined_signature(),
        });
        assert!(normalize(&header).is_err());
    }

    #[test]
    fn test_signature_roundtrip_through_canonical_form() {
        let header = json!({
            "from": FROM,
            "nonce": NONCE,
            "signature": combined_signature(),
        });
        let auth = normalize(&header).unwrap();

        // Re-serialize the canonical record and normalize again.
        let reparsed = normalize(&serde_json::to_value(&auth).unwrap()).unwrap();
        assert_eq!(reparsed, auth);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let err = normalize(&Value::String("!!not-base64!!".to_string())).unwrap_err();
        assert!(matches!(err, FacilitatorError::InvalidHeader(_)));
    }
}
