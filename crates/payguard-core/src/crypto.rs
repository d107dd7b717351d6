//! Cryptographic primitives shared by the signing and webhook modules.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return the base64-encoded (standard, padded) tag.
///
/// # Arguments
///
/// * `secret` - The HMAC key
/// * `message` - The bytes to authenticate
///
/// # Returns
///
/// A 44-character base64 string of the 32-byte tag.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded by
/// the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_base64(secret: &[u8], message: &[u8]) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);

    STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison.
///
/// The length check leaks only the length, which is public for fixed-size
/// MAC encodings.
///
/// # Arguments
///
/// * `a` - First byte string to compare
/// * `b` - Second byte string to compare
///
/// # Returns
///
/// `true` if the byte strings are equal, `false` otherwise.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
