//! Configuration error types.
//!
//! Configuration errors are fatal at construction time. Expected validation
//! failures (bad signatures, stale timestamps) are modelled as values in
//! their own modules and never use this type.

use std::path::PathBuf;

/// Result type for construction and key-loading operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while assembling key material, certificates or secrets.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// A file could not be read or written.
    #[error("cannot access {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A certificate could not be parsed.
    #[error("invalid certificate in {path}: {message}")]
    InvalidCertificate {
        /// The offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A key could not be parsed or encoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An RSA key is smaller than the accepted minimum.
    #[error("RSA key too small: {bits} bits (minimum {minimum})")]
    WeakKey {
        /// Modulus size of the rejected key.
        bits: usize,
        /// Minimum accepted modulus size.
        minimum: usize,
    },

    /// A shared secret or other setting has an unusable value.
    #[error("invalid configuration value for {name}: {message}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Read a whole file, attributing failures to its path.
pub(crate) fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ConfigError::io(path, e))
}
