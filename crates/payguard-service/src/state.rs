//! Application state.

use std::sync::Arc;

use payguard_core::{
    EncryptionKeyMaterial, EnvelopeEncryptor, EventHandler, KeyBootstrap, LoggingEventHandler,
    RequestSigner, SharedSecret, SigningKeyPair, TransportAuthenticator, WebhookValidator,
};

use crate::config::ServiceConfig;
use crate::error::StartupError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: ServiceConfig,

    /// Inbound webhook validator.
    pub validator: Arc<WebhookValidator>,

    /// Domain handler for validated events.
    pub handler: Arc<dyn EventHandler>,

    /// Outbound request signer.
    pub signer: Arc<RequestSigner>,

    /// Hex SHA-256 fingerprint of the signing public key.
    pub signing_fingerprint: String,

    /// Payload encryptor.
    pub encryptor: Arc<EnvelopeEncryptor>,

    /// Transport credentials, when configured.
    pub transport: Option<Arc<TransportAuthenticator>>,
}

impl AppState {
    /// Load keys and credentials named by `config` and assemble the state.
    ///
    /// Generates a signing key pair on first start, runs the signer
    /// self-test, and validates transport and encryption material when
    /// configured. Any failure aborts startup.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` for missing or invalid configuration and for a
    /// failed signing self-test.
    pub fn initialize(config: ServiceConfig) -> Result<Self, StartupError> {
        let (keys, bootstrap) = SigningKeyPair::load_or_generate(
            &config.signing_private_key_path,
            &config.signing_public_key_path,
        )?;
        let signing_fingerprint = keys.fingerprint()?;

        match bootstrap {
            KeyBootstrap::Generated => tracing::info!(
                fingerprint = %signing_fingerprint,
                public_key = %keys.public_key_pem()?,
                path = %config.signing_public_key_path.display(),
                "Generated signing key pair; register this public key with the payment network"
            ),
            KeyBootstrap::Loaded => tracing::info!(
                fingerprint = %signing_fingerprint,
                bits = keys.bits(),
                "Loaded signing key pair"
            ),
        }

        let signer = RequestSigner::new(keys);
        signer.self_test()?;
        tracing::debug!("Signing self-test passed");

        let validator = WebhookValidator::new(SharedSecret::new(config.webhook_secret.clone())?)
            .with_tolerance(config.webhook_tolerance_seconds);
        tracing::info!(
            secret = %validator.secret_preview(),
            tolerance_seconds = validator.tolerance(),
            "Webhook validator configured"
        );

        let transport = load_transport(&config)?;
        let encryptor = load_encryptor(&config)?;

        Ok(Self {
            config,
            validator: Arc::new(validator),
            handler: Arc::new(LoggingEventHandler),
            signer: Arc::new(signer),
            signing_fingerprint,
            encryptor: Arc::new(encryptor),
            transport,
        })
    }

    /// Replace the event handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }
}

fn load_transport(
    config: &ServiceConfig,
) -> Result<Option<Arc<TransportAuthenticator>>, StartupError> {
    if config.transport.is_empty() {
        tracing::warn!("Transport credentials not configured - outbound calls are unavailable");
        return Ok(None);
    }

    let transport = TransportAuthenticator::from_config(&config.transport)?;
    let expiry = transport.certificate_expiry();
    if expiry.is_expired {
        tracing::error!(not_after = %expiry.not_after, "Client certificate has expired");
    } else if expiry.expiring_soon {
        tracing::warn!(
            not_after = %expiry.not_after,
            days_remaining = expiry.days_remaining,
            "Client certificate expires soon"
        );
    }
    Ok(Some(Arc::new(transport)))
}

fn load_encryptor(config: &ServiceConfig) -> Result<EnvelopeEncryptor, StartupError> {
    let encryptor = match &config.encryption_key_id {
        Some(key_id) => {
            let material = EncryptionKeyMaterial::from_files(
                key_id.as_str(),
                config.encryption_cert_path.as_deref(),
                config.encryption_private_key_path.as_deref(),
            )?;
            tracing::info!(
                key_id = %key_id,
                can_encrypt = material.has_public(),
                can_decrypt = material.has_private(),
                "Encryption key material loaded"
            );
            EnvelopeEncryptor::new(material)
        }
        None => EnvelopeEncryptor::unconfigured(),
    }
    .allow_passthrough(config.encryption_allow_passthrough);

    if config.encryption_allow_passthrough {
        tracing::warn!("Encryption pass-through enabled - payloads may be sent in clear");
    }
    Ok(encryptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> ServiceConfig {
        let mut config = ServiceConfig::with_webhook_secret("whsec_state_test_secret");
        config.signing_private_key_path = dir.join("keys/private.pem");
        config.signing_public_key_path = dir.join("keys/public.pem");
        config
    }

    #[test]
    fn first_start_generates_then_reuses_keys() {
        let dir = tempfile::tempdir().unwrap();

        let first = AppState::initialize(config(dir.path())).unwrap();
        assert!(dir.path().join("keys/private.pem").exists());
        assert!(dir.path().join("keys/public.pem").exists());

        let second = AppState::initialize(config(dir.path())).unwrap();
        assert_eq!(first.signing_fingerprint, second.signing_fingerprint);
        assert!(second.transport.is_none());
        assert!(!second.encryptor.can_encrypt());
    }

    #[test]
    fn blank_webhook_secret_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.webhook_secret = "   ".into();
        assert!(matches!(
            AppState::initialize(config),
            Err(StartupError::Config(_))
        ));
    }

    #[test]
    fn partial_transport_config_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.transport.user_id = Some("user".into());
        assert!(matches!(
            AppState::initialize(config),
            Err(StartupError::Config(payguard_core::ConfigError::Missing(_)))
        ));
    }

    #[test]
    fn missing_encryption_files_abort_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.encryption_key_id = Some("kid".into());
        config.encryption_cert_path = Some(dir.path().join("absent.pem"));
        assert!(AppState::initialize(config).is_err());
    }
}
