//! Webhook event types and handler dispatch.
//!
//! The counterparty sends `{"eventType": "...", "data": {...}}`. The six known
//! kinds map to typed variants; anything else becomes
//! [`WebhookEvent::Unknown`] and is acknowledged as ignored, so new kinds added
//! upstream never break the integration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::redact::redact_json;

/// Transaction details carried by `TRANSACTION_*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    /// Counterparty transaction identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Amount in the transaction currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// ISO 4217 currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Failure or reversal reason, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authorization details carried by `AUTHORIZATION_*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationData {
    /// Counterparty authorization identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Related transaction, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Authorized amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// ISO 4217 currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Decline reason, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// `TRANSACTION_COMPLETED`
    TransactionCompleted(TransactionData),
    /// `TRANSACTION_FAILED`
    TransactionFailed(TransactionData),
    /// `TRANSACTION_REVERSED`
    TransactionReversed(TransactionData),
    /// `TRANSACTION_PENDING`
    TransactionPending(TransactionData),
    /// `AUTHORIZATION_APPROVED`
    AuthorizationApproved(AuthorizationData),
    /// `AUTHORIZATION_DECLINED`
    AuthorizationDeclined(AuthorizationData),
    /// Any other `eventType`.
    Unknown {
        /// The unrecognised type tag.
        event_type: String,
        /// Raw data, kept for diagnostics.
        data: Value,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl WebhookEvent {
    /// Parse an event body.
    ///
    /// # Errors
    ///
    /// Fails if the body is not a JSON object with a string `eventType`, or if
    /// a known kind carries a `data` value of the wrong shape.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        Self::from_slice(body.as_bytes())
    }

    /// Parse an event from raw body bytes.
    ///
    /// # Errors
    ///
    /// As [`Self::from_json`]; bytes that are not UTF-8 JSON also fail.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_slice(body)?;
        let data = match raw.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let event = match raw.event_type.as_str() {
            "TRANSACTION_COMPLETED" => Self::TransactionCompleted(serde_json::from_value(data)?),
            "TRANSACTION_FAILED" => Self::TransactionFailed(serde_json::from_value(data)?),
            "TRANSACTION_REVERSED" => Self::TransactionReversed(serde_json::from_value(data)?),
            "TRANSACTION_PENDING" => Self::TransactionPending(serde_json::from_value(data)?),
            "AUTHORIZATION_APPROVED" => Self::AuthorizationApproved(serde_json::from_value(data)?),
            "AUTHORIZATION_DECLINED" => Self::AuthorizationDeclined(serde_json::from_value(data)?),
            _ => Self::Unknown {
                event_type: raw.event_type,
                data,
            },
        };
        Ok(event)
    }

    /// The wire `eventType` tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::TransactionCompleted(_) => "TRANSACTION_COMPLETED",
            Self::TransactionFailed(_) => "TRANSACTION_FAILED",
            Self::TransactionReversed(_) => "TRANSACTION_REVERSED",
            Self::TransactionPending(_) => "TRANSACTION_PENDING",
            Self::AuthorizationApproved(_) => "AUTHORIZATION_APPROVED",
            Self::AuthorizationDeclined(_) => "AUTHORIZATION_DECLINED",
            Self::Unknown { event_type, .. } => event_type,
        }
    }
}

/// Processing status reported back to the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// The event was applied.
    Processed,
    /// The event was accepted but needs follow-up.
    Pending,
    /// The event was acknowledged without action.
    Ignored,
}

/// Result of handling one event; serialised verbatim into the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    /// Outcome.
    pub status: ProcessingStatus,
    /// Human-readable summary.
    pub message: String,
    /// Transaction the event referred to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Authorization the event referred to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Event type, echoed for ignored events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl ProcessingResult {
    /// A processed transaction event.
    #[must_use]
    pub fn transaction(
        status: ProcessingStatus,
        message: impl Into<String>,
        data: &TransactionData,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            transaction_id: data.transaction_id.clone(),
            authorization_id: None,
            event_type: None,
        }
    }

    /// A processed authorization event.
    #[must_use]
    pub fn authorization(
        status: ProcessingStatus,
        message: impl Into<String>,
        data: &AuthorizationData,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            transaction_id: data.transaction_id.clone(),
            authorization_id: data.authorization_id.clone(),
            event_type: None,
        }
    }

    /// An acknowledged-but-ignored event.
    #[must_use]
    pub fn ignored(event_type: &str) -> Self {
        Self {
            status: ProcessingStatus::Ignored,
            message: format!("Unhandled event type: {event_type}"),
            transaction_id: None,
            authorization_id: None,
            event_type: Some(event_type.to_string()),
        }
    }
}

/// A handler failed while applying an event.
#[derive(Debug, thiserror::Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

/// Domain bookkeeping for validated events.
///
/// Handlers are invoked synchronously, at most once per validated envelope.
/// Unknown events never reach a handler; see [`crate::webhook::dispatch`].
pub trait EventHandler: Send + Sync {
    /// A transaction settled.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn transaction_completed(&self, data: &TransactionData)
        -> Result<ProcessingResult, HandlerError>;

    /// A transaction failed.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn transaction_failed(&self, data: &TransactionData) -> Result<ProcessingResult, HandlerError>;

    /// A transaction was reversed.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn transaction_reversed(&self, data: &TransactionData)
        -> Result<ProcessingResult, HandlerError>;

    /// A transaction is awaiting completion.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn transaction_pending(&self, data: &TransactionData)
        -> Result<ProcessingResult, HandlerError>;

    /// An authorization was approved.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn authorization_approved(
        &self,
        data: &AuthorizationData,
    ) -> Result<ProcessingResult, HandlerError>;

    /// An authorization was declined.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the transport as an internal failure.
    fn authorization_declined(
        &self,
        data: &AuthorizationData,
    ) -> Result<ProcessingResult, HandlerError>;
}

/// Handler that records each event in the log and acknowledges it.
///
/// Balance updates and notifications belong to the embedding application;
/// this handler is the default when none is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn transaction_completed(
        &self,
        data: &TransactionData,
    ) -> Result<ProcessingResult, HandlerError> {
        tracing::info!(
            transaction_id = ?data.transaction_id,
            amount = ?data.amount,
            currency = ?data.currency,
            "Transaction completed"
        );
        Ok(ProcessingResult::transaction(
            ProcessingStatus::Processed,
            "Transaction completed",
            data,
        ))
    }

    fn transaction_failed(&self, data: &TransactionData) -> Result<ProcessingResult, HandlerError> {
        tracing::warn!(
            transaction_id = ?data.transaction_id,
            reason = ?data.reason,
            "Transaction failed"
        );
        Ok(ProcessingResult::transaction(
            ProcessingStatus::Processed,
            "Transaction failure recorded",
            data,
        ))
    }

    fn transaction_reversed(
        &self,
        data: &TransactionData,
    ) -> Result<ProcessingResult, HandlerError> {
        let extra = redact_json(&Value::Object(data.extra.clone()));
        tracing::warn!(
            transaction_id = ?data.transaction_id,
            reason = ?data.reason,
            extra = %extra,
            "Transaction reversed"
        );
        Ok(ProcessingResult::transaction(
            ProcessingStatus::Processed,
            "Transaction reversal recorded",
            data,
        ))
    }

    fn transaction_pending(
        &self,
        data: &TransactionData,
    ) -> Result<ProcessingResult, HandlerError> {
        tracing::info!(transaction_id = ?data.transaction_id, "Transaction pending");
        Ok(ProcessingResult::transaction(
            ProcessingStatus::Pending,
            "Transaction pending",
            data,
        ))
    }

    fn authorization_approved(
        &self,
        data: &AuthorizationData,
    ) -> Result<ProcessingResult, HandlerError> {
        tracing::info!(
            authorization_id = ?data.authorization_id,
            transaction_id = ?data.transaction_id,
            "Authorization approved"
        );
        Ok(ProcessingResult::authorization(
            ProcessingStatus::Processed,
            "Authorization approved",
            data,
        ))
    }

    fn authorization_declined(
        &self,
        data: &AuthorizationData,
    ) -> Result<ProcessingResult, HandlerError> {
        tracing::warn!(
            authorization_id = ?data.authorization_id,
            reason = ?data.reason,
            "Authorization declined"
        );
        Ok(ProcessingResult::authorization(
            ProcessingStatus::Processed,
            "Authorization decline recorded",
            data,
        ))
    }
}
