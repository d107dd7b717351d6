//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use payguard_core::CertificateExpiry;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the client certificate has expired.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Signing key status.
    pub signing: SigningStatus,
    /// Encryption status.
    pub encryption: EncryptionStatus,
    /// Client certificate validity, when transport is configured.
    pub certificate: Option<CertificateExpiry>,
}

/// Signing key status.
#[derive(Debug, Serialize)]
pub struct SigningStatus {
    /// Hex SHA-256 of the public key DER.
    pub fingerprint: String,
}

/// Encryption status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionStatus {
    /// An encryption key is loaded.
    pub enabled: bool,
    /// Clear-text fallback is allowed.
    pub passthrough: bool,
    /// Configured key id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let certificate = state
        .transport
        .as_ref()
        .map(|transport| transport.certificate_expiry());
    let degraded = certificate.as_ref().is_some_and(|c| c.is_expired);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        service: "payguard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        signing: SigningStatus {
            fingerprint: state.signing_fingerprint.clone(),
        },
        encryption: EncryptionStatus {
            enabled: state.encryptor.can_encrypt(),
            passthrough: state.encryptor.passthrough_enabled(),
            key_id: state.encryptor.key_id().map(str::to_string),
        },
        certificate,
    })
}
