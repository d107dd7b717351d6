//! Per-request signed tokens.
//!
//! A token binds a timestamp, the resource path, the raw query string and the
//! raw request body into one RSA-SHA256 signature:
//!
//! ```text
//! canonical = timestamp || resource_path || query_string || body
//! token     = "xv2:" timestamp ":" base64url(RSASSA-PKCS1-v1_5(SHA-256(canonical)))
//! ```
//!
//! There are no separators in the canonical string and no normalisation of
//! any part. The verifier rebuilds the canonical string from the bytes it
//! actually received, so any difference between what was signed and what was
//! transmitted invalidates the token.
//!
//! Expected verification failures (unknown version, stale timestamp, bad
//! signature) are reported as a [`TokenVerdict`], never as an error. Only a
//! structurally broken token yields [`MalformedToken`].

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;

use crate::keys::{CounterpartyKey, SigningKeyPair};
use crate::{unix_now, within_window, REPLAY_WINDOW_SECONDS};

/// Scheme tag for the current canonicalization + hash + signature combination.
pub const TOKEN_VERSION: &str = "xv2";

/// A structurally invalid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedToken {
    /// Not exactly three `:`-separated parts.
    #[error("token must be version:timestamp:signature")]
    Structure,
    /// The timestamp part is not canonical decimal seconds.
    #[error("token timestamp is not decimal seconds")]
    Timestamp,
    /// The signature part is not base64url.
    #[error("token signature is not base64url")]
    Signature,
}

/// Signing failed inside the RSA implementation.
#[derive(Debug, thiserror::Error)]
#[error("request signing failed: {0}")]
pub struct SigningError(String);

/// Outcome of verifying a well-formed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    /// Signature, version and freshness all check out.
    Valid,
    /// The version tag is not one this verifier understands.
    UnknownVersion,
    /// The timestamp lies outside the replay window.
    Expired {
        /// Absolute distance from the verifier's clock, in seconds.
        skew: u64,
    },
    /// The signature does not match the reconstructed canonical string.
    BadSignature,
}

impl TokenVerdict {
    /// Whether the token was accepted.
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A parsed `version:timestamp:signature` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// Scheme tag.
    pub version: String,
    /// Unix seconds at generation time.
    pub timestamp: i64,
    /// Base64url signature without padding.
    pub signature: String,
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.version, self.timestamp, self.signature)
    }
}

impl FromStr for SignedToken {
    type Err = MalformedToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, timestamp, signature) = split_token(s)?;
        Ok(Self {
            version: version.to_string(),
            timestamp: parse_timestamp(timestamp).ok_or(MalformedToken::Timestamp)?,
            signature: signature.to_string(),
        })
    }
}

/// Split a token into its version, timestamp and signature parts without
/// interpreting them.
fn split_token(s: &str) -> Result<(&str, &str, &str), MalformedToken> {
    let mut parts = s.splitn(3, ':');
    let (Some(version), Some(timestamp), Some(signature)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(MalformedToken::Structure);
    };

    if version.is_empty() || signature.is_empty() {
        return Err(MalformedToken::Structure);
    }
    Ok((version, timestamp, signature))
}

/// Parse canonical decimal seconds: digits only, no sign, no leading zeros.
pub(crate) fn parse_timestamp(s: &str) -> Option<i64> {
    let canonical = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'));
    if !canonical {
        return None;
    }
    s.parse().ok()
}

/// Build the canonical pre-hash bytes.
#[must_use]
pub fn canonical_bytes(timestamp: i64, resource_path: &str, query: &str, body: &[u8]) -> Vec<u8> {
    let timestamp = timestamp.to_string();
    let mut out =
        Vec::with_capacity(timestamp.len() + resource_path.len() + query.len() + body.len());
    out.extend_from_slice(timestamp.as_bytes());
    out.extend_from_slice(resource_path.as_bytes());
    out.extend_from_slice(query.as_bytes());
    out.extend_from_slice(body);
    out
}

/// Produces `xv2` tokens with the local private key.
#[derive(Clone)]
pub struct RequestSigner {
    signing_key: SigningKey<Sha256>,
    keys: SigningKeyPair,
}

impl RequestSigner {
    /// Create a signer over a loaded key pair.
    #[must_use]
    pub fn new(keys: SigningKeyPair) -> Self {
        Self {
            signing_key: SigningKey::<Sha256>::new(keys.private_key().clone()),
            keys,
        }
    }

    /// The key pair this signer uses.
    #[must_use]
    pub fn key_pair(&self) -> &SigningKeyPair {
        &self.keys
    }

    /// Sign a request at the current time.
    ///
    /// # Errors
    ///
    /// Returns `SigningError` if the RSA operation fails.
    pub fn sign(
        &self,
        resource_path: &str,
        query: &str,
        body: &[u8],
    ) -> Result<SignedToken, SigningError> {
        self.sign_at(unix_now(), resource_path, query, body)
    }

    /// Sign a request with an explicit timestamp.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Unix seconds to embed; must not be negative
    /// * `resource_path` - Path exactly as it will appear on the wire
    /// * `query` - Raw query string without the leading `?`, or empty
    /// * `body` - Serialized body bytes exactly as they will be sent
    ///
    /// # Returns
    ///
    /// The token to send in the pay-token header.
    ///
    /// # Errors
    ///
    /// Returns `SigningError` for a negative timestamp or if the RSA
    /// operation fails.
    pub fn sign_at(
        &self,
        timestamp: i64,
        resource_path: &str,
        query: &str,
        body: &[u8],
    ) -> Result<SignedToken, SigningError> {
        if timestamp < 0 {
            return Err(SigningError(format!(
                "timestamp {timestamp} precedes the Unix epoch"
            )));
        }

        let canonical = canonical_bytes(timestamp, resource_path, query, body);
        let signature = self
            .signing_key
            .try_sign(&canonical)
            .map_err(|e| SigningError(e.to_string()))?;

        Ok(SignedToken {
            version: TOKEN_VERSION.to_string(),
            timestamp,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        })
    }

    /// Sign a probe request and verify it with this pair's own public half.
    ///
    /// # Errors
    ///
    /// Returns `SigningError` if signing fails or the probe does not verify.
    pub fn self_test(&self) -> Result<(), SigningError> {
        let now = unix_now();
        let token = self.sign_at(now, "/selftest", "probe=1", b"{}")?;
        let verifier = RequestVerifier::new(&self.keys.counterparty_view());
        let verdict = verifier
            .verify_at(&token.to_string(), "/selftest", "probe=1", b"{}", now)
            .map_err(|e| SigningError(e.to_string()))?;

        if verdict.is_valid() {
            Ok(())
        } else {
            Err(SigningError(format!("self-test verdict {verdict:?}")))
        }
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("version", &TOKEN_VERSION)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Verifies `xv2` tokens against a counterparty public key.
#[derive(Clone)]
pub struct RequestVerifier {
    verifying_key: VerifyingKey<Sha256>,
    tolerance: u64,
}

impl RequestVerifier {
    /// Create a verifier with the default 300 second window.
    #[must_use]
    pub fn new(key: &CounterpartyKey) -> Self {
        Self {
            verifying_key: VerifyingKey::<Sha256>::new(key.public_key().clone()),
            tolerance: REPLAY_WINDOW_SECONDS,
        }
    }

    /// Override the replay window.
    #[must_use]
    pub fn with_tolerance(mut self, seconds: u64) -> Self {
        self.tolerance = seconds;
        self
    }

    /// Verify a token against the request as received, using the current time.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` only if the token cannot be parsed.
    pub fn verify(
        &self,
        token: &str,
        resource_path: &str,
        query: &str,
        body: &[u8],
    ) -> Result<TokenVerdict, MalformedToken> {
        self.verify_at(token, resource_path, query, body, unix_now())
    }

    /// Verify a token against the request as received, at time `now`.
    ///
    /// The version tag is checked before the remaining parts are
    /// interpreted, so a token from another scheme is reported as
    /// [`TokenVerdict::UnknownVersion`] whatever its other parts hold.
    ///
    /// # Arguments
    ///
    /// * `token` - Value of the pay-token header
    /// * `resource_path` - Path as received
    /// * `query` - Raw query string as received, or empty
    /// * `body` - Raw body bytes as received
    /// * `now` - Verifier clock in Unix seconds
    ///
    /// # Returns
    ///
    /// The verdict for a well-formed token.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` only if the token cannot be parsed.
    pub fn verify_at(
        &self,
        token: &str,
        resource_path: &str,
        query: &str,
        body: &[u8],
        now: i64,
    ) -> Result<TokenVerdict, MalformedToken> {
        let (version, _, _) = split_token(token)?;
        if version != TOKEN_VERSION {
            tracing::debug!(version = %version, "Rejected token with unknown version");
            return Ok(TokenVerdict::UnknownVersion);
        }

        let token: SignedToken = token.parse()?;

        if !within_window(token.timestamp, now, self.tolerance) {
            let skew = token.timestamp.abs_diff(now);
            tracing::debug!(skew = %skew, "Rejected token outside replay window");
            return Ok(TokenVerdict::Expired { skew });
        }

        let raw = URL_SAFE_NO_PAD
            .decode(&token.signature)
            .map_err(|_| MalformedToken::Signature)?;
        let Ok(signature) = Signature::try_from(raw.as_slice()) else {
            return Ok(TokenVerdict::BadSignature);
        };

        let canonical = canonical_bytes(token.timestamp, resource_path, query, body);
        if self.verifying_key.verify(&canonical, &signature).is_ok() {
            Ok(TokenVerdict::Valid)
        } else {
            tracing::debug!(path = %resource_path, "Rejected token with bad signature");
            Ok(TokenVerdict::BadSignature)
        }
    }
}

impl fmt::Debug for RequestVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}
