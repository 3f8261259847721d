//! Signature verification for Loops webhook deliveries.
//!
//! Loops signs `"{webhook-id}.{webhook-timestamp}.{body}"` with HMAC-SHA256
//! keyed by the base64 part of the signing secret (`whsec_<base64>`). The
//! `webhook-signature` header carries space-separated `v1,<base64 digest>`
//! tokens; any one matching is enough.

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Missing required webhook header")]
    MissingHeaders,

    #[error("Invalid signing secret format")]
    InvalidSecretFormat,

    #[error("Failed to decode signing secret: {0}")]
    InvalidSecretEncoding(#[from] base64::DecodeError),

    #[error("Invalid signature")]
    InvalidSignature,
}

impl VerificationError {
    /// Stable code used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeaders => "MISSING_HEADERS",
            Self::InvalidSecretFormat => "INVALID_SECRET_FORMAT",
            Self::InvalidSecretEncoding(_) => "INVALID_SECRET_ENCODING",
            Self::InvalidSignature => "INVALID_SIGNATURE",
        }
    }
}

fn secret_key(secret: &str) -> Result<Vec<u8>, VerificationError> {
    let encoded = secret
        .split('_')
        .nth(1)
        .ok_or(VerificationError::InvalidSecretFormat)?;
    Ok(STANDARD.decode(encoded)?)
}

fn mac_for(
    key: &[u8],
    id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<HmacSha256, VerificationError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| VerificationError::InvalidSecretFormat)?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Check a delivery against `secret`.
pub fn verify(
    id: &str,
    timestamp: &str,
    signatures: &str,
    body: &[u8],
    secret: &str,
) -> Result<(), VerificationError> {
    if id.is_empty() || timestamp.is_empty() || signatures.is_empty() {
        return Err(VerificationError::MissingHeaders);
    }
    let mac = mac_for(&secret_key(secret)?, id, timestamp, body)?;

    let matched = signatures
        .split(' ')
        .filter_map(|token| token.split_once(','))
        .filter_map(|(_, digest)| STANDARD.decode(digest).ok())
        .any(|digest| mac.clone().verify_slice(&digest).is_ok());

    if matched {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}

/// [`verify`] with the three values taken from request headers.
pub fn verify_headers(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
) -> Result<(), VerificationError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };
    verify(
        header(WEBHOOK_ID_HEADER),
        header(WEBHOOK_TIMESTAMP_HEADER),
        header(WEBHOOK_SIGNATURE_HEADER),
        body,
        secret,
    )
}

/// Produce a `v1,<digest>` signature token for a delivery.
pub fn sign(
    secret: &str,
    id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, VerificationError> {
    let key = secret_key(secret)?;
    let digest = mac_for(&key, id, timestamp, body)?.finalize().into_bytes();
    Ok(format!("v1,{}", STANDARD.encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_c2VjcmV0LWtleS1mb3ItdGVzdHM=";
    const BODY: &[u8] = br#"{"eventName":"contact.mailingList.subscribed"}"#;

    #[test]
    fn signed_delivery_verifies() {
        let signature = sign(SECRET, "msg_1", "1700000000", BODY).unwrap();
        assert!(signature.starts_with("v1,"));
        verify("msg_1", "1700000000", &signature, BODY, SECRET).unwrap();
    }

    #[test]
    fn any_matching_token_is_accepted() {
        let good = sign(SECRET, "msg_1", "1700000000", BODY).unwrap();
        let header = format!("v1,AAAA v1,not-base64!! {good}");
        verify("msg_1", "1700000000", &header, BODY, SECRET).unwrap();
    }

    #[test]
    fn tampering_is_rejected() {
        let signature = sign(SECRET, "msg_1", "1700000000", BODY).unwrap();

        let err = verify("msg_1", "1700000000", &signature, b"{}", SECRET).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");

        let err = verify("msg_2", "1700000000", &signature, BODY, SECRET).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");

        let err = verify("msg_1", "1700000001", &signature, BODY, SECRET).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");

        let other = "whsec_b3RoZXIta2V5";
        let err = verify("msg_1", "1700000000", &signature, BODY, other).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn missing_headers() {
        let err = verify("", "1700000000", "v1,abc", BODY, SECRET).unwrap_err();
        assert_eq!(err.code(), "MISSING_HEADERS");
        let err = verify("msg_1", "", "v1,abc", BODY, SECRET).unwrap_err();
        assert_eq!(err.code(), "MISSING_HEADERS");
        let err = verify("msg_1", "1700000000", "", BODY, SECRET).unwrap_err();
        assert_eq!(err.code(), "MISSING_HEADERS");
    }

    #[test]
    fn malformed_secrets() {
        let err = verify("msg_1", "1", "v1,abc", BODY, "no-prefix").unwrap_err();
        assert_eq!(err.code(), "INVALID_SECRET_FORMAT");

        let err = verify("msg_1", "1", "v1,abc", BODY, "whsec_%%%").unwrap_err();
        assert_eq!(err.code(), "INVALID_SECRET_ENCODING");
    }

    #[test]
    fn headers_are_read_from_map() {
        let signature = sign(SECRET, "msg_1", "1700000000", BODY).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_ID_HEADER, "msg_1".parse().unwrap());
        headers.insert(WEBHOOK_TIMESTAMP_HEADER, "1700000000".parse().unwrap());
        headers.insert(WEBHOOK_SIGNATURE_HEADER, signature.parse().unwrap());
        verify_headers(&headers, BODY, SECRET).unwrap();

        headers.remove(WEBHOOK_SIGNATURE_HEADER);
        let err = verify_headers(&headers, BODY, SECRET).unwrap_err();
        assert!(matches!(err, VerificationError::MissingHeaders));
    }
}
