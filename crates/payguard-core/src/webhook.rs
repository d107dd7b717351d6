//! Inbound webhook validation.
//!
//! Each call moves through `RECEIVED -> TIMESTAMP_CHECKED -> SIGNATURE_CHECKED
//! -> DISPATCHED`, or stops at `REJECTED`:
//!
//! 1. Both the signature and timestamp headers must be present.
//! 2. `|now - timestamp|` must not exceed the replay window (300 s).
//! 3. The signed bytes are `timestamp || "." || raw body`; the `.` separator
//!    keeps this scheme distinct from the request-token canonicalization.
//!    The body is opaque: it is authenticated byte-for-byte, before any
//!    decoding.
//! 4. `HMAC-SHA256(secret, signed bytes)`, base64-encoded, must equal the
//!    signature header under a constant-time comparison.
//! 5. The body is parsed into a [`WebhookEvent`] and handed to [`dispatch`].
//!
//! The specific [`RejectReason`] is for internal logs only. Callers facing the
//! network should answer with [`RejectReason::public_message`], which does not
//! reveal which check failed.

use std::fmt;

use crate::crypto::{constant_time_eq, hmac_sha256_base64};
use crate::error::ConfigError;
use crate::events::{EventHandler, HandlerError, ProcessingResult, WebhookEvent};
use crate::redact::mask;
use crate::signer::parse_timestamp;
use crate::{unix_now, within_window, REPLAY_WINDOW_SECONDS};

/// Header carrying the base64 HMAC signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying the Unix-seconds timestamp covered by the signature.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// HMAC key agreed out-of-band with the counterparty.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a secret.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty or blank secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "webhook secret",
                message: "must not be empty".into(),
            });
        }
        if secret.len() < 16 {
            tracing::warn!(
                secret = %mask(&secret),
                "Webhook secret is shorter than 16 characters"
            );
        }
        Ok(Self(secret))
    }

    /// Masked preview suitable for logs.
    #[must_use]
    pub fn preview(&self) -> String {
        mask(&self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedSecret").field(&self.preview()).finish()
    }
}

/// An inbound callback as delivered by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEnvelope {
    /// Raw body, exactly as received.
    pub payload: Vec<u8>,
    /// Value of the signature header, if any.
    pub signature: Option<String>,
    /// Value of the timestamp header, if any.
    pub timestamp: Option<String>,
}

impl WebhookEnvelope {
    /// Build an envelope from already-extracted parts.
    #[must_use]
    pub fn new(
        payload: impl AsRef<[u8]>,
        signature: Option<String>,
        timestamp: Option<String>,
    ) -> Self {
        Self {
            payload: payload.as_ref().to_vec(),
            signature,
            timestamp,
        }
    }

    /// Build an envelope from `(name, value)` header pairs. Header names are
    /// matched case-insensitively.
    pub fn from_headers<'a, I>(headers: I, payload: impl AsRef<[u8]>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut signature = None;
        let mut timestamp = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
                signature = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(TIMESTAMP_HEADER) {
                timestamp = Some(value.to_string());
            }
        }
        Self::new(payload, signature, timestamp)
    }
}

/// Why an envelope was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// No signature header.
    #[error("missing signature header")]
    MissingSignature,
    /// No timestamp header.
    #[error("missing timestamp header")]
    MissingTimestamp,
    /// The timestamp header is not decimal seconds.
    #[error("malformed timestamp header")]
    MalformedTimestamp,
    /// The timestamp is outside the replay window.
    #[error("timestamp outside replay window (skew {skew}s)")]
    StaleTimestamp {
        /// Absolute distance from the validator's clock, in seconds.
        skew: u64,
    },
    /// The HMAC does not match.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// The authenticated body is not a webhook event.
    #[error("malformed event payload")]
    MalformedPayload,
}

impl RejectReason {
    /// Message safe to return to an external caller.
    ///
    /// Absent headers are reported as such; every other failure collapses to
    /// one message.
    #[must_use]
    pub fn public_message(self) -> &'static str {
        match self {
            Self::MissingSignature | Self::MissingTimestamp => {
                "Missing webhook signature or timestamp"
            }
            Self::MalformedTimestamp
            | Self::StaleTimestamp { .. }
            | Self::SignatureMismatch
            | Self::MalformedPayload => "Invalid webhook signature",
        }
    }
}

/// An authenticated, parsed event.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    /// The event.
    pub event: WebhookEvent,
    /// The signed timestamp.
    pub timestamp: i64,
}

/// Validates inbound callbacks against a shared secret.
#[derive(Debug, Clone)]
pub struct WebhookValidator {
    secret: SharedSecret,
    tolerance: u64,
}

impl WebhookValidator {
    /// Create a validator with the default 300 second window.
    #[must_use]
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret,
            tolerance: REPLAY_WINDOW_SECONDS,
        }
    }

    /// Override the replay window.
    #[must_use]
    pub fn with_tolerance(mut self, seconds: u64) -> Self {
        self.tolerance = seconds;
        self
    }

    /// The configured replay window in seconds.
    #[must_use]
    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Masked preview of the configured secret.
    #[must_use]
    pub fn secret_preview(&self) -> String {
        self.secret.preview()
    }

    /// Compute the signature a sender attaches to `payload` at `timestamp`.
    #[must_use]
    pub fn generate_signature(&self, payload: impl AsRef<[u8]>, timestamp: i64) -> String {
        self.sign_raw(payload.as_ref(), &timestamp.to_string())
    }

    fn sign_raw(&self, payload: &[u8], timestamp: &str) -> String {
        let mut signed = Vec::with_capacity(timestamp.len() + 1 + payload.len());
        signed.extend_from_slice(timestamp.as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);
        hmac_sha256_base64(self.secret.as_bytes(), &signed)
    }

    /// Check freshness and signature only, without parsing the payload.
    #[must_use]
    pub fn validate_signature(
        &self,
        payload: impl AsRef<[u8]>,
        signature: &str,
        timestamp: i64,
    ) -> bool {
        self.validate_signature_at(payload, signature, timestamp, unix_now())
    }

    /// [`Self::validate_signature`] at an explicit time.
    #[must_use]
    pub fn validate_signature_at(
        &self,
        payload: impl AsRef<[u8]>,
        signature: &str,
        timestamp: i64,
        now: i64,
    ) -> bool {
        self.authenticate(payload.as_ref(), signature, &timestamp.to_string(), now)
            .is_ok()
    }

    /// Validate an envelope at the current time.
    ///
    /// # Errors
    ///
    /// Returns the internal rejection reason on any failed check.
    pub fn validate(&self, envelope: &WebhookEnvelope) -> Result<ValidatedEvent, RejectReason> {
        self.validate_at(envelope, unix_now())
    }

    /// Validate an envelope at time `now`.
    ///
    /// # Arguments
    ///
    /// * `envelope` - Raw body and header values as received
    /// * `now` - Validator clock in Unix seconds
    ///
    /// # Returns
    ///
    /// The parsed event and its signed timestamp.
    ///
    /// # Errors
    ///
    /// Returns the internal rejection reason on any failed check.
    pub fn validate_at(
        &self,
        envelope: &WebhookEnvelope,
        now: i64,
    ) -> Result<ValidatedEvent, RejectReason> {
        let result = self.validate_inner(envelope, now);
        if let Err(reason) = &result {
            tracing::warn!(reason = %reason, "Rejected webhook");
        }
        result
    }

    fn validate_inner(
        &self,
        envelope: &WebhookEnvelope,
        now: i64,
    ) -> Result<ValidatedEvent, RejectReason> {
        let signature = envelope
            .signature
            .as_deref()
            .ok_or(RejectReason::MissingSignature)?;
        let timestamp = envelope
            .timestamp
            .as_deref()
            .ok_or(RejectReason::MissingTimestamp)?;

        let ts = self.authenticate(&envelope.payload, signature, timestamp, now)?;

        let event = WebhookEvent::from_slice(&envelope.payload)
            .map_err(|_| RejectReason::MalformedPayload)?;

        tracing::debug!(event_type = %event.event_type(), timestamp = %ts, "Webhook authenticated");
        Ok(ValidatedEvent {
            event,
            timestamp: ts,
        })
    }

    fn authenticate(
        &self,
        payload: &[u8],
        signature: &str,
        timestamp: &str,
        now: i64,
    ) -> Result<i64, RejectReason> {
        let ts = parse_timestamp(timestamp.trim()).ok_or(RejectReason::MalformedTimestamp)?;

        if !within_window(ts, now, self.tolerance) {
            return Err(RejectReason::StaleTimestamp {
                skew: ts.abs_diff(now),
            });
        }

        let expected = self.sign_raw(payload, timestamp.trim());
        if constant_time_eq(expected.as_bytes(), signature.trim().as_bytes()) {
            Ok(ts)
        } else {
            Err(RejectReason::SignatureMismatch)
        }
    }
}

/// Route a validated event to its handler.
///
/// Unknown event types are acknowledged as ignored without touching the
/// handler.
///
/// # Errors
///
/// Propagates the handler's own failure.
pub fn dispatch<H>(handler: &H, event: &WebhookEvent) -> Result<ProcessingResult, HandlerError>
where
    H: EventHandler + ?Sized,
{
    match event {
        WebhookEvent::TransactionCompleted(data) => handler.transaction_completed(data),
        WebhookEvent::TransactionFailed(data) => handler.transaction_failed(data),
        WebhookEvent::TransactionReversed(data) => handler.transaction_reversed(data),
        WebhookEvent::TransactionPending(data) => handler.transaction_pending(data),
        WebhookEvent::AuthorizationApproved(data) => handler.authorization_approved(data),
        WebhookEvent::AuthorizationDeclined(data) => handler.authorization_declined(data),
        WebhookEvent::Unknown { event_type, .. } => {
            tracing::debug!(event_type = %event_type, "Unhandled webhook event");
            Ok(ProcessingResult::ignored(event_type))
        }
    }
}
