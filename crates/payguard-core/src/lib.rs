//! Security core for calls to a third-party payment network.
//!
//! This crate produces and verifies the four independent security artifacts
//! carried by every outbound and inbound message:
//!
//! - **Transport**: `TransportAuthenticator` holds validated client certificate
//!   material and produces the Basic credential header plus mTLS inputs.
//! - **Request signing**: `RequestSigner` / `RequestVerifier` bind a timestamp,
//!   path, query string and body into one `xv2` token (RSA-SHA256).
//! - **Webhooks**: `WebhookValidator` checks timestamp freshness and an
//!   HMAC-SHA256 signature before dispatching a typed `WebhookEvent`.
//! - **Envelope encryption**: `EnvelopeEncryptor` wraps sensitive payload
//!   fields with RSA-OAEP-256 + AES-256-GCM.
//!
//! # Replay Window
//!
//! Both signed tokens and webhooks are accepted only while
//! `|now - timestamp| <= 300` seconds.
//!
//! All components are immutable after construction and can be shared across
//! threads behind an `Arc`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod crypto;
pub mod encryption;
pub mod error;
pub mod events;
pub mod keys;
pub mod redact;
pub mod signer;
pub mod transport;
pub mod webhook;

pub use encryption::{
    EncryptOutcome, EncryptionError, EncryptionKeyMaterial, EnvelopeEncryptor, CONTENT_ALGORITHM,
    ENCRYPTED_DATA_FIELD, KEY_WRAP_ALGORITHM,
};
pub use error::{ConfigError, Result};
pub use events::{
    AuthorizationData, EventHandler, HandlerError, LoggingEventHandler, ProcessingResult,
    ProcessingStatus, TransactionData, WebhookEvent,
};
pub use keys::{CounterpartyKey, KeyBootstrap, SigningKeyPair, MIN_RSA_BITS};
pub use signer::{
    MalformedToken, RequestSigner, RequestVerifier, SignedToken, SigningError, TokenVerdict,
    TOKEN_VERSION,
};
pub use transport::{CertificateExpiry, TransportAuthenticator, TransportConfig};
pub use webhook::{
    RejectReason, SharedSecret, ValidatedEvent, WebhookEnvelope, WebhookValidator,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

/// Maximum permitted clock skew, in seconds, between message creation and
/// verification.
pub const REPLAY_WINDOW_SECONDS: u64 = 300;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Whether `timestamp` lies within `tolerance` seconds of `now`, in either
/// direction. The boundary is inclusive.
#[must_use]
pub fn within_window(timestamp: i64, now: i64, tolerance: u64) -> bool {
    timestamp.abs_diff(now) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_inclusive_at_boundary() {
        assert!(within_window(1_000, 1_300, 300));
        assert!(within_window(1_300, 1_000, 300));
        assert!(!within_window(1_000, 1_301, 300));
        assert!(!within_window(1_301, 1_000, 300));
    }
}
