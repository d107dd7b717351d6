//! Client error types.

use payguard_core::{ConfigError, EncryptionError, SigningError};

/// Errors that can occur when calling the payment network.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-2xx response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, or the status line when the body is empty.
        message: String,
    },

    /// Invalid configuration or request shape.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Payload encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    /// Request signing failed.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
