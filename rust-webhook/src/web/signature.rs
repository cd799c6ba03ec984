//! Messenger webhook signature verification.
//!
//! Facebook signs every webhook POST with the app secret: `x-hub-signature`
//! carries `sha1=<hex>` and `x-hub-signature-256` carries `sha256=<hex>`,
//! both computed over the raw request body.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Legacy SHA-1 signature header.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// SHA-256 signature header, preferred when present.
pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";

/// Why a webhook body failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("couldn't validate the signature: header missing")]
    Missing,

    #[error("couldn't validate the signature: expected method=hexdigest")]
    Malformed,

    #[error("couldn't validate the signature: unsupported method {0}")]
    UnsupportedMethod(String),

    #[error("couldn't validate the request signature")]
    Mismatch,

    #[error("couldn't validate the signature: no app secret configured")]
    NotConfigured,
}

/// Verify `header` (`method=hexdigest`) against an HMAC of `body` keyed
/// with `secret`.
///
/// The digest comparison is exact and case-sensitive.
pub fn verify_request_signature(
    body: &[u8],
    header: Option<&str>,
    secret: &str,
) -> Result<(), AuthenticationError> {
    let header = header.ok_or(AuthenticationError::Missing)?;

    let (method, signature) = header
        .split_once('=')
        .filter(|(m, s)| !m.is_empty() && !s.is_empty())
        .ok_or(AuthenticationError::Malformed)?;

    let expected = match method {
        "sha1" => hex_digest::<HmacSha1>(secret, body)?,
        "sha256" => hex_digest::<HmacSha256>(secret, body)?,
        other => return Err(AuthenticationError::UnsupportedMethod(other.to_string())),
    };

    if constant_time_compare(&expected, signature) {
        Ok(())
    } else {
        Err(AuthenticationError::Mismatch)
    }
}

fn hex_digest<M>(secret: &str, body: &[u8]) -> Result<String, AuthenticationError>
where
    M: Mac + hmac::digest::KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthenticationError::Mismatch)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// The app secret to verify with; a blank or absent secret rejects every body.
pub fn configured_secret(app_secret: &Option<String>) -> Result<&str, AuthenticationError> {
    app_secret
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or(AuthenticationError::NotConfigured)
}

/// Check if signature verification is enabled.
pub fn is_signature_verification_enabled(app_secret: &Option<String>) -> bool {
    app_secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}
