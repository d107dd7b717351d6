//! Service configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use payguard_core::{redact, ConfigError, TransportConfig, REPLAY_WINDOW_SECONDS};

const DEFAULT_SIGNING_PRIVATE_KEY: &str = "keys/signing_private.pem";
const DEFAULT_SIGNING_PUBLIC_KEY: &str = "keys/signing_public.pem";

/// Service configuration loaded from environment variables and secrets files.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Shared secret for inbound webhook HMACs. Required.
    pub webhook_secret: String,

    /// Local signing private key (generated on first start if absent).
    pub signing_private_key_path: PathBuf,

    /// Local signing public key, written alongside a generated private key.
    pub signing_public_key_path: PathBuf,

    /// Transport credentials for outbound calls. Optional for the inbound
    /// service; validated in full when any field is set.
    pub transport: TransportConfig,

    /// Encryption key id agreed with the network.
    pub encryption_key_id: Option<String>,

    /// Network encryption certificate or public key.
    pub encryption_cert_path: Option<PathBuf>,

    /// Local decryption private key.
    pub encryption_private_key_path: Option<PathBuf>,

    /// Send payloads in clear when no encryption key is loaded.
    pub encryption_allow_passthrough: bool,

    /// Accepted webhook clock skew in seconds.
    pub webhook_tolerance_seconds: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("webhook_secret", &redact::mask(&self.webhook_secret))
            .field("signing_private_key_path", &self.signing_private_key_path)
            .field("signing_public_key_path", &self.signing_public_key_path)
            .field("transport", &self.transport)
            .field("encryption_key_id", &self.encryption_key_id)
            .field("encryption_allow_passthrough", &self.encryption_allow_passthrough)
            .field("webhook_tolerance_seconds", &self.webhook_tolerance_seconds)
            .finish_non_exhaustive()
    }
}

/// Secrets file structure.
#[derive(Default, Deserialize)]
struct PayguardSecrets {
    #[serde(default)]
    webhook_secret: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from the secrets file (if any) and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when no webhook secret is configured and
    /// `ConfigError::InvalidValue` for unparsable numbers or flags.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secrets = load_secrets();
        Self::from_sources(|name| std::env::var(name).ok(), secrets)
    }

    /// Build configuration from a variable lookup. Secrets-file values take
    /// precedence over looked-up ones.
    fn from_sources<F>(lookup: F, secrets: PayguardSecrets) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let path = |name: &str| var(name).map(PathBuf::from);

        let webhook_secret = secrets
            .webhook_secret
            .or_else(|| var("WEBHOOK_SECRET"))
            .ok_or(ConfigError::Missing("WEBHOOK_SECRET"))?;

        Ok(Self {
            listen_addr: var("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            webhook_secret,
            signing_private_key_path: path("SIGNING_PRIVATE_KEY_PATH")
                .unwrap_or_else(|| DEFAULT_SIGNING_PRIVATE_KEY.into()),
            signing_public_key_path: path("SIGNING_PUBLIC_KEY_PATH")
                .unwrap_or_else(|| DEFAULT_SIGNING_PUBLIC_KEY.into()),
            transport: TransportConfig {
                user_id: secrets.user_id.or_else(|| var("TRANSPORT_USER_ID")),
                password: secrets.password.or_else(|| var("TRANSPORT_PASSWORD")),
                cert_path: path("TRANSPORT_CERT_PATH"),
                key_path: path("TRANSPORT_KEY_PATH"),
                ca_path: path("TRANSPORT_CA_PATH"),
            },
            encryption_key_id: var("ENCRYPTION_KEY_ID"),
            encryption_cert_path: path("ENCRYPTION_CERT_PATH"),
            encryption_private_key_path: path("ENCRYPTION_PRIVATE_KEY_PATH"),
            encryption_allow_passthrough: parse_flag(
                "ENCRYPTION_ALLOW_PASSTHROUGH",
                var("ENCRYPTION_ALLOW_PASSTHROUGH"),
            )?,
            webhook_tolerance_seconds: parse_number(
                "WEBHOOK_TOLERANCE_SECONDS",
                var("WEBHOOK_TOLERANCE_SECONDS"),
                REPLAY_WINDOW_SECONDS,
            )?,
            max_body_bytes: parse_number("MAX_BODY_BYTES", var("MAX_BODY_BYTES"), 1024 * 1024)?,
            request_timeout_seconds: parse_number(
                "REQUEST_TIMEOUT_SECONDS",
                var("REQUEST_TIMEOUT_SECONDS"),
                30,
            )?,
        })
    }

    /// Configuration with defaults and the given webhook secret.
    #[must_use]
    pub fn with_webhook_secret(secret: impl Into<String>) -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            webhook_secret: secret.into(),
            signing_private_key_path: DEFAULT_SIGNING_PRIVATE_KEY.into(),
            signing_public_key_path: DEFAULT_SIGNING_PUBLIC_KEY.into(),
            transport: TransportConfig::default(),
            encryption_key_id: None,
            encryption_cert_path: None,
            encryption_private_key_path: None,
            encryption_allow_passthrough: false,
            webhook_tolerance_seconds: REPLAY_WINDOW_SECONDS,
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            message: e.to_string(),
        }),
    }
}

fn parse_flag(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Load secrets from the first secrets file found.
fn load_secrets() -> PayguardSecrets {
    let secret_paths = [
        ".secrets/payguard.json",
        "payguard/.secrets/payguard.json",
        "../.secrets/payguard.json",
    ];

    for path in &secret_paths {
        match load_secrets_file(Path::new(path)) {
            Ok(Some(secrets)) => {
                tracing::info!(path = %path, "Loaded secrets from file");
                return secrets;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path, error = %e, "Ignoring unreadable secrets file"),
        }
    }

    tracing::debug!("Secrets file not found, using environment variables");
    PayguardSecrets::default()
}

/// Load secrets from a JSON file; `Ok(None)` if it does not exist.
fn load_secrets_file(path: &Path) -> Result<Option<PayguardSecrets>, std::io::Error> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)], secrets: PayguardSecrets) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_sources(|name| vars.get(name).cloned(), secrets)
    }

    #[test]
    fn missing_webhook_secret_is_an_error() {
        let err = load(&[], PayguardSecrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WEBHOOK_SECRET")));

        let err = load(&[("WEBHOOK_SECRET", "  ")], PayguardSecrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WEBHOOK_SECRET")));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("WEBHOOK_SECRET", "whsec_value")], PayguardSecrets::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.webhook_tolerance_seconds, 300);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.request_timeout_seconds, 30);
        assert!(!config.encryption_allow_passthrough);
        assert!(config.transport.is_empty());
        assert_eq!(
            config.signing_private_key_path,
            PathBuf::from("keys/signing_private.pem")
        );
    }

    #[test]
    fn reads_environment_values() {
        let config = load(
            &[
                ("WEBHOOK_SECRET", "whsec_value"),
                ("LISTEN_ADDR", "127.0.0.1:9000"),
                ("TRANSPORT_USER_ID", "user"),
                ("TRANSPORT_CERT_PATH", "/certs/client.pem"),
                ("ENCRYPTION_KEY_ID", "kid-7"),
                ("ENCRYPTION_ALLOW_PASSTHROUGH", "true"),
                ("WEBHOOK_TOLERANCE_SECONDS", "120"),
            ],
            PayguardSecrets::default(),
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.transport.user_id.as_deref(), Some("user"));
        assert_eq!(
            config.transport.cert_path,
            Some(PathBuf::from("/certs/client.pem"))
        );
        assert_eq!(config.encryption_key_id.as_deref(), Some("kid-7"));
        assert!(config.encryption_allow_passthrough);
        assert_eq!(config.webhook_tolerance_seconds, 120);
    }

    #[test]
    fn secrets_file_takes_precedence() {
        let secrets = PayguardSecrets {
            webhook_secret: Some("from-file".into()),
            user_id: Some("file-user".into()),
            password: None,
        };
        let config = load(
            &[
                ("WEBHOOK_SECRET", "from-env"),
                ("TRANSPORT_USER_ID", "env-user"),
                ("TRANSPORT_PASSWORD", "env-pass"),
            ],
            secrets,
        )
        .unwrap();
        assert_eq!(config.webhook_secret, "from-file");
        assert_eq!(config.transport.user_id.as_deref(), Some("file-user"));
        assert_eq!(config.transport.password.as_deref(), Some("env-pass"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load(
            &[("WEBHOOK_SECRET", "s"), ("MAX_BODY_BYTES", "lots")],
            PayguardSecrets::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "MAX_BODY_BYTES",
                ..
            }
        ));

        let err = load(
            &[("WEBHOOK_SECRET", "s"), ("ENCRYPTION_ALLOW_PASSTHROUGH", "maybe")],
            PayguardSecrets::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn debug_masks_webhook_secret() {
        let config = ServiceConfig::with_webhook_secret("whsec_very_secret_value");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("very_secret"));
        assert!(rendered.contains("whse****"));
    }

    #[test]
    fn secrets_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payguard.json");
        std::fs::write(&file, r#"{"webhook_secret": "whsec_file", "user_id": "u"}"#).unwrap();

        let secrets = load_secrets_file(&file).unwrap().unwrap();
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whsec_file"));
        assert!(secrets.password.is_none());
        assert!(load_secrets_file(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }
}
