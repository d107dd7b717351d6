//! Transport-layer identity: Basic credentials plus mutual-TLS material.
//!
//! Construction reads and parses every file up front and fails on anything
//! missing or unreadable, and on a private key that does not belong to the
//! client certificate. After that the authenticator holds only in-memory
//! PEM bytes; no file handles are retained.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::der::asn1::{AnyRef, OctetStringRef};
use rsa::pkcs8::der::{self, Decode, Reader, SliceReader, Tag};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, PrivateKeyInfo};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use x509_parser::pem::Pem;

use crate::error::{read_file, ConfigError, Result};

/// Certificates with fewer days than this left are flagged as expiring soon.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";
const EC_PUBLIC_KEY_OID: &str = "1.2.840.10045.2.1";

/// Paths and credentials for the transport identity.
#[derive(Clone, Default)]
pub struct TransportConfig {
    /// Basic-auth user id issued by the network.
    pub user_id: Option<String>,
    /// Basic-auth password issued by the network.
    pub password: Option<String>,
    /// Client certificate (PEM).
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM).
    pub key_path: Option<PathBuf>,
    /// Trust anchor for the network's server certificate (PEM).
    pub ca_path: Option<PathBuf>,
}

impl TransportConfig {
    /// Whether no transport setting was provided at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.password.is_none()
            && self.cert_path.is_none()
            && self.key_path.is_none()
            && self.ca_path.is_none()
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("ca_path", &self.ca_path)
            .finish()
    }
}

/// Validity window of the client certificate. Advisory only; the TLS
/// handshake enforces real expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateExpiry {
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// Whole days until `not_after`; negative once expired.
    pub days_remaining: i64,
    /// `now` is past `not_after`.
    pub is_expired: bool,
    /// Still valid, with fewer than 30 days left.
    pub expiring_soon: bool,
}

/// Validated client certificate material and Basic credentials.
#[derive(Clone)]
pub struct TransportAuthenticator {
    user_id: String,
    password: String,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    ca_pem: Vec<u8>,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl TransportAuthenticator {
    /// Read and validate all transport material.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for any absent setting, and I/O or
    /// parse errors for unreadable files.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let user_id = required(config.user_id.as_deref(), "transport user id")?;
        let password = required(config.password.as_deref(), "transport password")?;
        let cert_path = config
            .cert_path
            .as_deref()
            .ok_or(ConfigError::Missing("transport certificate path"))?;
        let key_path = config
            .key_path
            .as_deref()
            .ok_or(ConfigError::Missing("transport private key path"))?;
        let ca_path = config
            .ca_path
            .as_deref()
            .ok_or(ConfigError::Missing("transport CA path"))?;

        let cert_pem = read_file(cert_path)?;
        let key_pem = read_file(key_path)?;
        let ca_pem = read_file(ca_path)?;

        let cert = inspect_certificate(cert_path, &cert_pem)?;
        ensure_private_key(key_path, &key_pem, &cert)?;
        inspect_certificate(ca_path, &ca_pem)?;

        tracing::info!(
            user_id = %user_id,
            subject = %cert.subject,
            not_after = %cert.not_after,
            "Transport credentials loaded"
        );

        Ok(Self {
            user_id: user_id.to_string(),
            password: password.to_string(),
            cert_pem,
            key_pem,
            ca_pem,
            subject: cert.subject,
            not_before: cert.not_before,
            not_after: cert.not_after,
        })
    }

    /// The Basic-auth user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Subject of the client certificate.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// `Basic base64(user_id:password)`.
    #[must_use]
    pub fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.user_id, self.password);
        format!("Basic {}", STANDARD.encode(credentials))
    }

    /// Client certificate followed by its private key, as one PEM bundle.
    #[must_use]
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut bundle = self.cert_pem.clone();
        if !bundle.ends_with(b"\n") {
            bundle.push(b'\n');
        }
        bundle.extend_from_slice(&self.key_pem);
        bundle
    }

    /// Trust anchor PEM.
    #[must_use]
    pub fn ca_pem(&self) -> &[u8] {
        &self.ca_pem
    }

    /// Certificate validity relative to the current time.
    #[must_use]
    pub fn certificate_expiry(&self) -> CertificateExpiry {
        self.certificate_expiry_at(Utc::now())
    }

    /// Certificate validity relative to `now`.
    #[must_use]
    pub fn certificate_expiry_at(&self, now: DateTime<Utc>) -> CertificateExpiry {
        let days_remaining = (self.not_after - now).num_days();
        let is_expired = now > self.not_after;
        CertificateExpiry {
            not_before: self.not_before,
            not_after: self.not_after,
            days_remaining,
            is_expired,
            expiring_soon: !is_expired && days_remaining < EXPIRY_WARNING_DAYS,
        }
    }
}

impl fmt::Debug for TransportAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportAuthenticator")
            .field("user_id", &self.user_id)
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn invalid_cert(path: &Path, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidCertificate {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// What the client certificate says about itself and its key.
struct CertificateInfo {
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    spki_der: Vec<u8>,
    key_algorithm: String,
    key_parameters: Option<Vec<u8>>,
}

/// Parse the first certificate in `pem`.
fn inspect_certificate(path: &Path, pem: &[u8]) -> Result<CertificateInfo> {
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| invalid_cert(path, format!("bad PEM: {e:?}")))?;
        if block.label != "CERTIFICATE" {
            continue;
        }
        let cert = block
            .parse_x509()
            .map_err(|e| invalid_cert(path, format!("bad X.509: {e:?}")))?;

        let validity = cert.validity();
        let not_before = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| invalid_cert(path, "notBefore out of range"))?;
        let not_after = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| invalid_cert(path, "notAfter out of range"))?;

        let spki = cert.public_key();
        return Ok(CertificateInfo {
            subject: cert.subject().to_string(),
            not_before,
            not_after,
            spki_der: spki.raw.to_vec(),
            key_algorithm: spki.algorithm.algorithm.to_id_string(),
            key_parameters: spki.algorithm.parameters.as_ref().map(|p| p.data.to_vec()),
        });
    }
    Err(invalid_cert(path, "no CERTIFICATE block"))
}

/// Parse the first private key block in `pem` and check it belongs to `cert`.
///
/// PKCS#8, PKCS#1 and SEC1 encodings are accepted. RSA keys are compared
/// with the certificate's public key; other algorithms must at least match
/// the certificate's key algorithm and parameters.
fn ensure_private_key(path: &Path, pem: &[u8], cert: &CertificateInfo) -> Result<()> {
    let invalid =
        |message: String| ConfigError::InvalidKey(format!("{}: {message}", path.display()));

    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| invalid(format!("bad PEM: {e:?}")))?;
        let rsa_key = match block.label.as_str() {
            "PRIVATE KEY" => {
                let info = PrivateKeyInfo::try_from(block.contents.as_slice())
                    .map_err(|e| invalid(format!("bad PKCS#8 key: {e}")))?;
                let algorithm = info.algorithm.oid.to_string();
                if algorithm != cert.key_algorithm {
                    return Err(invalid(format!(
                        "key algorithm {algorithm} does not match certificate algorithm {}",
                        cert.key_algorithm
                    )));
                }
                if algorithm == RSA_ENCRYPTION_OID {
                    Some(
                        RsaPrivateKey::from_pkcs8_der(&block.contents)
                            .map_err(|e| invalid(format!("bad RSA key: {e}")))?,
                    )
                } else {
                    let parameters = info.algorithm.parameters.map(|p| p.value().to_vec());
                    if parameters != cert.key_parameters {
                        return Err(invalid(
                            "key parameters do not match the certificate".into(),
                        ));
                    }
                    None
                }
            }
            "RSA PRIVATE KEY" => Some(
                RsaPrivateKey::from_pkcs1_der(&block.contents)
                    .map_err(|e| invalid(format!("bad RSA key: {e}")))?,
            ),
            "EC PRIVATE KEY" => {
                if cert.key_algorithm != EC_PUBLIC_KEY_OID {
                    return Err(invalid("EC key for a non-EC certificate".into()));
                }
                parse_sec1(&block.contents).map_err(|e| invalid(format!("bad SEC1 key: {e}")))?;
                None
            }
            _ => continue,
        };

        if let Some(key) = rsa_key {
            let certified = RsaPublicKey::from_public_key_der(&cert.spki_der)
                .map_err(|_| invalid("RSA key for a non-RSA certificate".into()))?;
            key.validate()
                .map_err(|e| invalid(format!("inconsistent RSA key: {e}")))?;
            if key.to_public_key() != certified {
                return Err(invalid("private key does not match the certificate".into()));
            }
        }
        return Ok(());
    }
    Err(invalid("no private key block".into()))
}

/// Structural check of a SEC1 `ECPrivateKey`: version 1, a non-empty key
/// octet string, then optional tagged fields.
fn parse_sec1(bytes: &[u8]) -> der::Result<()> {
    let mut reader = SliceReader::new(bytes)?;
    reader.sequence(|seq| {
        if u8::decode(seq)? != 1 {
            return Err(Tag::Integer.value_error());
        }
        if OctetStringRef::decode(seq)?.is_empty() {
            return Err(Tag::OctetString.length_error());
        }
        while !seq.is_finished() {
            AnyRef::decode(seq)?;
        }
        Ok(())
    })?;
    reader.finish(())
}
