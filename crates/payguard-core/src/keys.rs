//! Asymmetric key material for request signing.
//!
//! A `SigningKeyPair` is loaded (or generated once) at process start and used
//! read-only afterwards. The public half is registered out-of-band with the
//! counterparty; the private half never leaves local storage and is never
//! printed by `Debug`.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_parser::pem::Pem;

use crate::crypto::sha256_hex;
use crate::error::{read_file, ConfigError, Result};

/// Minimum accepted RSA modulus size in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// How a key pair came to be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBootstrap {
    /// Both halves were read from storage.
    Loaded,
    /// No private key existed; a new pair was generated and persisted. The
    /// public half must be registered with the counterparty before use.
    Generated,
}

/// Local RSA key pair used to sign outbound requests.
#[derive(Clone)]
pub struct SigningKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl SigningKeyPair {
    /// Generate a fresh key pair.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::WeakKey` if `bits` is below [`MIN_RSA_BITS`].
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_RSA_BITS {
            return Err(ConfigError::WeakKey {
                bits,
                minimum: MIN_RSA_BITS,
            });
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| ConfigError::InvalidKey(format!("key generation failed: {e}")))?;
        Ok(Self::from_private(private))
    }

    /// Parse a PKCS#8 or PKCS#1 PEM private key.
    ///
    /// # Errors
    ///
    /// Fails if the PEM cannot be parsed or the modulus is too small.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private = parse_private_key(pem)?;
        ensure_strength(private.size())?;
        Ok(Self::from_private(private))
    }

    /// Load the pair from `private_path`, or generate and persist a new one
    /// if no private key exists yet.
    ///
    /// The public key file is (re)written whenever it is missing, so an
    /// operator can always find the half to register.
    ///
    /// # Errors
    ///
    /// Any read, parse or write failure is fatal.
    pub fn load_or_generate(
        private_path: &Path,
        public_path: &Path,
    ) -> Result<(Self, KeyBootstrap)> {
        if private_path.exists() {
            let pem = read_file(private_path)?;
            let pem = String::from_utf8(pem)
                .map_err(|_| ConfigError::InvalidKey("private key is not UTF-8 PEM".into()))?;
            let pair = Self::from_pem(&pem)?;

            if !public_path.exists() {
                write_key_file(public_path, pair.public_key_pem()?.as_bytes(), false)?;
            }

            tracing::debug!(path = %private_path.display(), "Loaded signing key");
            return Ok((pair, KeyBootstrap::Loaded));
        }

        tracing::warn!(
            path = %private_path.display(),
            "Signing key not found, generating a new key pair"
        );
        let pair = Self::generate(MIN_RSA_BITS)?;
        write_key_file(private_path, pair.private_key_pem()?.as_bytes(), true)?;
        write_key_file(public_path, pair.public_key_pem()?.as_bytes(), false)?;

        Ok((pair, KeyBootstrap::Generated))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// The private half.
    #[must_use]
    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The public half as a verifier-side key.
    #[must_use]
    pub fn counterparty_view(&self) -> CounterpartyKey {
        CounterpartyKey {
            public: self.public.clone(),
        }
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }

    /// SPKI PEM encoding of the public half, for out-of-band registration.
    ///
    /// # Errors
    ///
    /// Fails only if the encoder rejects the key.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))
    }

    /// Hex SHA-256 of the DER-encoded public key.
    ///
    /// # Errors
    ///
    /// Fails only if the encoder rejects the key.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self
            .public
            .to_public_key_der()
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        Ok(sha256_hex(der.as_bytes()))
    }

    pub(crate) fn private_key_pem(&self) -> Result<String> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.as_str().to_owned())
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("bits", &self.bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// The counterparty's public key, used to verify tokens it signed.
#[derive(Debug, Clone)]
pub struct CounterpartyKey {
    public: RsaPublicKey,
}

impl CounterpartyKey {
    /// Parse a public key from PEM.
    ///
    /// Accepts SPKI (`PUBLIC KEY`), PKCS#1 (`RSA PUBLIC KEY`) or an X.509
    /// `CERTIFICATE`, in which case the subject public key is used.
    ///
    /// # Errors
    ///
    /// Fails if no usable RSA public key is found.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let public = parse_public_key(pem)?;
        ensure_strength(public.size())?;
        Ok(Self { public })
    }

    /// Load a public key PEM from disk.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_file(path)?)
    }

    /// The wrapped RSA key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

/// Reject moduli below [`MIN_RSA_BITS`].
pub(crate) fn ensure_strength(size_bytes: usize) -> Result<()> {
    let bits = size_bytes * 8;
    if bits < MIN_RSA_BITS {
        return Err(ConfigError::WeakKey {
            bits,
            minimum: MIN_RSA_BITS,
        });
    }
    Ok(())
}

/// Parse a PKCS#8 or PKCS#1 PEM private key.
pub(crate) fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| ConfigError::InvalidKey(format!("unreadable RSA private key: {e}")))
}

/// Parse the first RSA public key found in a PEM bundle.
pub(crate) fn parse_public_key(pem: &[u8]) -> Result<RsaPublicKey> {
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| ConfigError::InvalidKey(format!("bad PEM: {e:?}")))?;
        let parsed = match block.label.as_str() {
            "PUBLIC KEY" => RsaPublicKey::from_public_key_der(&block.contents)
                .map_err(|e| ConfigError::InvalidKey(e.to_string())),
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_der(&block.contents)
                .map_err(|e| ConfigError::InvalidKey(e.to_string())),
            "CERTIFICATE" => {
                let cert = block
                    .parse_x509()
                    .map_err(|e| ConfigError::InvalidKey(format!("bad certificate: {e:?}")))?;
                RsaPublicKey::from_public_key_der(cert.public_key().raw)
                    .map_err(|e| ConfigError::InvalidKey(e.to_string()))
            }
            _ => continue,
        };
        return parsed;
    }
    Err(ConfigError::InvalidKey("no RSA public key in PEM".into()))
}

fn write_key_file(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).map_err(|e| ConfigError::io(path, e))?;
    file.write_all(contents)
        .map_err(|e| ConfigError::io(path, e))
}

/// A 2048-bit pair generated once per test binary.
#[cfg(test)]
pub(crate) fn test_key_pair() -> &'static SigningKeyPair {
    static PAIR: std::sync::OnceLock<SigningKeyPair> = std::sync::OnceLock::new();
    PAIR.get_or_init(|| SigningKeyPair::generate(MIN_RSA_BITS).unwrap())
}

/// A second, unrelated pair.
#[cfg(test)]
pub(crate) fn other_test_key_pair() -> &'static SigningKeyPair {
    static PAIR: std::sync::OnceLock<SigningKeyPair> = std::sync::OnceLock::new();
    PAIR.get_or_init(|| SigningKeyPair::generate(MIN_RSA_BITS).unwrap())
}
