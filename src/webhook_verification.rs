//! # Webhook Signature Verification
//!
//! HMAC-SHA256 verification for vendor webhooks, using constant-time
//! comparison. Vendors differ in how they encode the digest and whether a
//! timestamp is part of the signed message, so both are parameters here.

use axum::http::StatusCode;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Missing required timestamp header: {header}")]
    MissingTimestamp { header: String },

    #[error("Invalid timestamp format: {header}")]
    InvalidTimestamp { header: String },

    #[error("Timestamp too old: {seconds}s old, max allowed: {max_seconds}s")]
    TimestampTooOld { seconds: u64, max_seconds: u64 },

    #[error("Timestamp too far in future: {seconds}s in future, max allowed: {max_seconds}s")]
    TimestampTooFuture { seconds: u64, max_seconds: u64 },
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// How the digest is written into the signature header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Base64,
    Hex,
}

/// Header names reported in errors
#[derive(Debug, Clone, Copy)]
pub struct SignatureHeaders {
    pub signature: &'static str,
    pub timestamp: &'static str,
}

impl Default for SignatureHeaders {
    fn default() -> Self {
        Self {
            signature: "signature",
            timestamp: "timestamp",
        }
    }
}

fn digest(message: &[&[u8]], secret: &str) -> VerificationResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    for part in message {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the signature a vendor would send for `message`
pub fn sign_hmac_sha256(message: &[u8], secret: &str, encoding: SignatureEncoding) -> String {
    let bytes = digest(&[message], secret).unwrap_or_default();
    match encoding {
        SignatureEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        SignatureEncoding::Hex => hex::encode(bytes),
    }
}

fn compare(
    message: &[&[u8]],
    signature: &str,
    secret: &str,
    encoding: SignatureEncoding,
    header: &str,
) -> VerificationResult<()> {
    if signature.trim().is_empty() {
        return Err(VerificationError::MissingSignature {
            header: header.to_string(),
        });
    }

    let provided = match encoding {
        SignatureEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(signature.trim())
            .ok(),
        SignatureEncoding::Hex => hex::decode(signature.trim()).ok(),
    }
    .ok_or_else(|| VerificationError::InvalidSignatureFormat {
        header: header.to_string(),
    })?;

    let expected = digest(message, secret)?;

    // Compare signatures using constant-time comparison to prevent timing attacks
    if subtle::ConstantTimeEq::ct_eq(expected.as_slice(), provided.as_slice()).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verify an HMAC-SHA256 signature over the raw body
pub fn verify_hmac_sha256(
    body: &[u8],
    signature: &str,
    secret: &str,
    encoding: SignatureEncoding,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Starting HMAC signature verification");
    compare(
        &[body],
        signature,
        secret,
        encoding,
        SignatureHeaders::default().signature,
    )
}

/// Parse a signature timestamp: RFC 3339 or unix seconds
fn parse_timestamp(value: &str, header: &str) -> VerificationResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| VerificationError::InvalidTimestamp {
            header: header.to_string(),
        })
}

/// Verify a base64 HMAC-SHA256 over `timestamp + body`, rejecting timestamps
/// outside `tolerance_seconds` of now
pub fn verify_timestamped_signature(
    body: &[u8],
    signature: &str,
    timestamp: &str,
    secret: &str,
    tolerance_seconds: u64,
    headers: SignatureHeaders,
) -> VerificationResult<()> {
    debug!(
        body_size = body.len(),
        tolerance_seconds, "Starting timestamped signature verification"
    );

    if signature.trim().is_empty() {
        return Err(VerificationError::MissingSignature {
            header: headers.signature.to_string(),
        });
    }
    if timestamp.trim().is_empty() {
        return Err(VerificationError::MissingTimestamp {
            header: headers.timestamp.to_string(),
        });
    }

    let sent_at = parse_timestamp(timestamp, headers.timestamp)?;
    let now = Utc::now();
    let time_diff = (now - sent_at).num_seconds().unsigned_abs();
    if time_diff > tolerance_seconds {
        return Err(if now > sent_at {
            VerificationError::TimestampTooOld {
                seconds: time_diff,
                max_seconds: tolerance_seconds,
            }
        } else {
            VerificationError::TimestampTooFuture {
                seconds: time_diff,
                max_seconds: tolerance_seconds,
            }
        });
    }

    compare(
        &[timestamp.as_bytes(), body],
        signature,
        secret,
        SignatureEncoding::Base64,
        headers.signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_signature_verification_success() {
        let secret = "test_secret";
        let body = b"test payload";

        let hex_sig = sign_hmac_sha256(body, secret, SignatureEncoding::Hex);
        assert!(verify_hmac_sha256(body, &hex_sig, secret, SignatureEncoding::Hex).is_ok());

        let b64_sig = sign_hmac_sha256(body, secret, SignatureEncoding::Base64);
        assert!(verify_hmac_sha256(body, &b64_sig, secret, SignatureEncoding::Base64).is_ok());
    }

    #[test]
    fn test_hmac_signature_verification_invalid_signature() {
        let secret = "test_secret";
        let body = b"test payload";
        let wrong = sign_hmac_sha256(b"other payload", secret, SignatureEncoding::Hex);

        assert!(matches!(
            verify_hmac_sha256(body, &wrong, secret, SignatureEncoding::Hex),
            Err(VerificationError::VerificationFailed)
        ));
    }

    #[test]
    fn test_hmac_signature_verification_missing_and_malformed() {
        let body = b"test payload";
        assert!(matches!(
            verify_hmac_sha256(body, "", "s", SignatureEncoding::Hex),
            Err(VerificationError::MissingSignature { .. })
        ));
        assert!(matches!(
            verify_hmac_sha256(body, "not-hex", "s", SignatureEncoding::Hex),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
    }

    fn timestamped(body: &[u8], timestamp: &str, secret: &str) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        sign_hmac_sha256(&message, secret, SignatureEncoding::Base64)
    }

    #[test]
    fn test_timestamped_signature_success() {
        let secret = "signing_secret";
        let body = br#"{"ticket":{"id":1}}"#;
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let signature = timestamped(body, &timestamp, secret);

        assert!(
            verify_timestamped_signature(
                body,
                &signature,
                &timestamp,
                secret,
                300,
                SignatureHeaders::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn test_timestamped_signature_accepts_unix_seconds() {
        let secret = "signing_secret";
        let body = b"{}";
        let timestamp = Utc::now().timestamp().to_string();
        let signature = timestamped(body, &timestamp, secret);

        assert!(
            verify_timestamped_signature(
                body,
                &signature,
                &timestamp,
                secret,
                300,
                SignatureHeaders::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn test_timestamped_signature_timestamp_too_old() {
        let secret = "signing_secret";
        let body = b"test payload";
        let timestamp = (Utc::now() - chrono::Duration::seconds(400)).to_rfc3339();
        let signature = timestamped(body, &timestamp, secret);

        assert!(matches!(
            verify_timestamped_signature(
                body,
                &signature,
                &timestamp,
                secret,
                300,
                SignatureHeaders::default()
            ),
            Err(VerificationError::TimestampTooOld { max_seconds: 300, .. })
        ));
    }

    #[test]
    fn test_timestamped_signature_timestamp_in_future() {
        let secret = "signing_secret";
        let body = b"test payload";
        let timestamp = (Utc::now() + chrono::Duration::seconds(900)).to_rfc3339();
        let signature = timestamped(body, &timestamp, secret);

        assert!(matches!(
            verify_timestamped_signature(
                body,
                &signature,
                &timestamp,
                secret,
                300,
                SignatureHeaders::default()
            ),
            Err(VerificationError::TimestampTooFuture { .. })
        ));
    }

    #[test]
    fn test_timestamped_signature_invalid_timestamp() {
        let headers = SignatureHeaders {
            signature: "x-zendesk-webhook-signature",
            timestamp: "x-zendesk-webhook-signature-timestamp",
        };
        let err = verify_timestamped_signature(b"{}", "c2ln", "yesterday", "s", 300, headers)
            .unwrap_err();
        match err {
            VerificationError::InvalidTimestamp { header } => {
                assert_eq!(header, "x-zendesk-webhook-signature-timestamp")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            verify_timestamped_signature(b"{}", "c2ln", "", "s", 300, headers),
            Err(VerificationError::MissingTimestamp { .. })
        ));
    }

    #[test]
    fn test_tampered_body_fails() {
        let secret = "signing_secret";
        let timestamp = Utc::now().to_rfc3339();
        let signature = timestamped(b"original", &timestamp, secret);

        assert!(matches!(
            verify_timestamped_signature(
                b"tampered",
                &signature,
                &timestamp,
                secret,
                300,
                SignatureHeaders::default()
            ),
            Err(VerificationError::VerificationFailed)
        ));
    }
}
