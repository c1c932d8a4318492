//! Webhook signature verification.
//!
//! HMAC-SHA256 over the raw request body, carried in the
//! `X-Hub-Signature-256` header as `sha256=<hex>` (GitHub's scheme).
//! Verification runs before any parsing and uses the MAC's constant-time
//! comparison, never string equality on the hex digests.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the signature header value for a body.
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).unwrap_or_else(|_| unreachable!());
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature header value against a body.
///
/// Returns false for a missing prefix, non-hex payload, or digest mismatch.
/// The digest comparison is constant-time.
#[must_use]
pub fn verify(secret: &[u8], body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret).unwrap_or_else(|_| unreachable!());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
