//! Webhook signature verification and media-stream authentication (spec §4.7)

use hmac::{Hmac, Mac};
use sha2::Sha256;
use voice_agent_core::tenant::SecretRef;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAuthError {
    MissingHeaders,
    StaleTimestamp,
    UnresolvedSecret,
    InvalidSignature,
}

/// Verify a carrier webhook signature: `hmac_sha256(secret, "{timestamp}.{body}")`
/// hex-encoded, compared in constant time, with the timestamp checked
/// against `skew_seconds` (spec §4.7: "stale timestamps (> 5 min skew),
/// missing headers, or invalid signatures return a 401 without touching
/// session state").
pub fn verify_webhook_signature(
    secret: &SecretRef,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    skew_seconds: i64,
    now_unix: i64,
) -> Result<(), WebhookAuthError> {
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => (t, s),
        _ => return Err(WebhookAuthError::MissingHeaders),
    };

    let ts: i64 = timestamp.parse().map_err(|_| WebhookAuthError::MissingHeaders)?;
    if (now_unix - ts).abs() > skew_seconds {
        return Err(WebhookAuthError::StaleTimestamp);
    }

    let resolved = secret.resolve().ok_or(WebhookAuthError::UnresolvedSecret)?;

    let mut mac = HmacSha256::new_from_slice(resolved.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_compare(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
        Ok(())
    } else {
        Err(WebhookAuthError::InvalidSignature)
    }
}

/// Media-stream upgrade requires a bearer token matching `MEDIA_STREAM_TOKEN`.
pub fn verify_media_token(expected: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(token) => constant_time_compare(expected.as_bytes(), token.as_bytes()),
        None => false,
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_within_skew_passes() {
        let secret = SecretRef::Literal("shh".into());
        let body = b"{\"event_type\":\"call.answered\"}";
        let sig = sign("shh", "1000", body);
        let result = verify_webhook_signature(&secret, Some("1000"), Some(&sig), body, 300, 1005);
        assert!(result.is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let secret = SecretRef::Literal("shh".into());
        let body = b"{}";
        let sig = sign("shh", "1000", body);
        let result = verify_webhook_signature(&secret, Some("1000"), Some(&sig), body, 300, 1000 + 301);
        assert_eq!(result, Err(WebhookAuthError::StaleTimestamp));
    }

    #[test]
    fn missing_headers_are_rejected() {
        let secret = SecretRef::Literal("shh".into());
        let result = verify_webhook_signature(&secret, None, Some("x"), b"{}", 300, 0);
        assert_eq!(result, Err(WebhookAuthError::MissingHeaders));
    }

    #[test]
    fn tampered_body_fails_signature_check() {
        let secret = SecretRef::Literal("shh".into());
        let sig = sign("shh", "1000", b"original");
        let result = verify_webhook_signature(&secret, Some("1000"), Some(&sig), b"tampered", 300, 1000);
        assert_eq!(result, Err(WebhookAuthError::InvalidSignature));
    }

    #[test]
    fn unresolved_env_secret_is_rejected() {
        let secret = SecretRef::parse("env:SOME_VAR_THAT_IS_DEFINITELY_NOT_SET_XYZ");
        let result = verify_webhook_signature(&secret, Some("1000"), Some("abc"), b"{}", 300, 1000);
        assert_eq!(result, Err(WebhookAuthError::UnresolvedSecret));
    }

    #[test]
    fn constant_time_compare_rejects_different_lengths() {
        assert!(!constant_time_compare(b"abc", b"abcd"));
    }

    #[test]
    fn media_token_must_match_exactly() {
        assert!(verify_media_token("tok123", Some("tok123")));
        assert!(!verify_media_token("tok123", Some("tok124")));
        assert!(!verify_media_token("tok123", None));
    }
}
