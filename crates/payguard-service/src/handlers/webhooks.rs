//! Inbound payment network webhooks.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use payguard_core::{webhook, ProcessingResult, WebhookEnvelope};

use crate::error::ApiError;
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Outcome of applying the event.
    pub result: ProcessingResult,
}

/// Receive a signed event callback.
///
/// The body is authenticated as raw bytes before it is decoded or parsed.
/// Every authentication failure, including a body that is not UTF-8 JSON,
/// maps to 401 with a generic message; handler failures map to 500.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let envelope = WebhookEnvelope::from_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        &body,
    );

    let validated = state
        .validator
        .validate(&envelope)
        .map_err(|reason| ApiError::Unauthorized(reason.public_message().to_string()))?;

    tracing::info!(
        event_type = %validated.event.event_type(),
        timestamp = validated.timestamp,
        "Received payment network webhook"
    );

    let result = webhook::dispatch(&*state.handler, &validated.event)?;

    tracing::debug!(
        event_type = %validated.event.event_type(),
        status = ?result.status,
        "Webhook processed"
    );

    Ok(Json(WebhookResponse {
        received: true,
        result,
    }))
}
