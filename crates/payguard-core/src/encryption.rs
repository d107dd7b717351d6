//! Field-level envelope encryption.
//!
//! Payloads are wrapped into a JWE compact token:
//!
//! ```text
//! b64u(header) . b64u(RSA-OAEP-256(cek)) . b64u(iv) . b64u(ciphertext) . b64u(tag)
//! ```
//!
//! with a random 256-bit content key, AES-256-GCM content encryption, and the
//! encoded header as additional authenticated data. The header names both
//! algorithms and the `kid`; decryption rejects any other algorithm pair
//! before touching key material.
//!
//! Pass-through (sending a payload in clear when no public key is loaded)
//! happens only when explicitly enabled, and is always reported as
//! [`EncryptOutcome::Passthrough`].

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::{read_file, ConfigError};
use crate::keys::{ensure_strength, parse_private_key, parse_public_key};
use crate::unix_now;

/// Key-wrap algorithm identifier carried in every token header.
pub const KEY_WRAP_ALGORITHM: &str = "RSA-OAEP-256";

/// Content-encryption algorithm identifier carried in every token header.
pub const CONTENT_ALGORITHM: &str = "A256GCM";

/// Field that replaces encrypted fields in a partially encrypted object.
pub const ENCRYPTED_DATA_FIELD: &str = "encryptedData";

const CEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors from wrapping or unwrapping payloads.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    /// The key needed for this direction is not loaded.
    #[error("no {0} key loaded for envelope encryption")]
    MissingKey(&'static str),

    /// The token names a key this process does not hold.
    #[error("key id mismatch: expected {expected}, got {actual}")]
    KeyIdMismatch {
        /// Locally configured key id.
        expected: String,
        /// Key id in the token header.
        actual: String,
    },

    /// The token header names an algorithm other than the expected pair.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token is not a well-formed JWE compact serialization.
    #[error("malformed encrypted token: {0}")]
    Malformed(&'static str),

    /// The key could not be unwrapped or the content tag did not verify.
    #[error("decryption failed")]
    Decryption,

    /// Encryption failed inside the cipher implementation.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Field-level operations require a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of an encryption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EncryptOutcome<T> {
    /// The payload was encrypted.
    Encrypted(T),
    /// No public key is loaded and pass-through is enabled; the payload is in
    /// clear.
    Passthrough(T),
}

impl<T> EncryptOutcome<T> {
    /// Whether encryption actually happened.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    /// The payload, encrypted or not.
    pub fn into_inner(self) -> T {
        match self {
            Self::Encrypted(v) | Self::Passthrough(v) => v,
        }
    }
}

/// Counterparty encryption key plus local decryption key, tagged with the
/// key id both sides agreed on.
#[derive(Clone)]
pub struct EncryptionKeyMaterial {
    key_id: String,
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

impl EncryptionKeyMaterial {
    /// Start with a key id and no keys.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty key id.
    pub fn new(key_id: impl Into<String>) -> Result<Self, ConfigError> {
        let key_id = key_id.into();
        if key_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "encryption key id",
                message: "must not be empty".into(),
            });
        }
        Ok(Self {
            key_id,
            public: None,
            private: None,
        })
    }

    /// Load material from disk. Either path may be absent; a given path must
    /// be readable and parsable.
    ///
    /// # Errors
    ///
    /// Any read or parse failure is fatal.
    pub fn from_files(
        key_id: impl Into<String>,
        public_cert_path: Option<&Path>,
        private_key_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut material = Self::new(key_id)?;
        if let Some(path) = public_cert_path {
            material.public = Some(wrap_key(&read_file(path)?)?);
        }
        if let Some(path) = private_key_path {
            let pem = String::from_utf8(read_file(path)?)
                .map_err(|_| ConfigError::InvalidKey("private key is not UTF-8 PEM".into()))?;
            material.private = Some(unwrap_key(&pem)?);
        }
        Ok(material)
    }

    /// Attach the counterparty public key from a certificate or public key PEM.
    ///
    /// # Errors
    ///
    /// Fails if the PEM carries no RSA public key or the modulus is below
    /// [`crate::MIN_RSA_BITS`].
    pub fn with_public_pem(mut self, pem: &[u8]) -> Result<Self, ConfigError> {
        self.public = Some(wrap_key(pem)?);
        Ok(self)
    }

    /// Attach the local private key from PEM.
    ///
    /// # Errors
    ///
    /// Fails if the PEM is not an RSA private key or the modulus is below
    /// [`crate::MIN_RSA_BITS`].
    pub fn with_private_pem(mut self, pem: &str) -> Result<Self, ConfigError> {
        self.private = Some(unwrap_key(pem)?);
        Ok(self)
    }

    /// Attach an already-parsed public key.
    #[must_use]
    pub fn with_public_key(mut self, key: RsaPublicKey) -> Self {
        self.public = Some(key);
        self
    }

    /// Attach an already-parsed private key.
    #[must_use]
    pub fn with_private_key(mut self, key: RsaPrivateKey) -> Self {
        self.private = Some(key);
        self
    }

    /// The agreed key id.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Whether outbound encryption is possible.
    #[must_use]
    pub fn has_public(&self) -> bool {
        self.public.is_some()
    }

    /// Whether inbound decryption is possible.
    #[must_use]
    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }
}

fn wrap_key(pem: &[u8]) -> Result<RsaPublicKey, ConfigError> {
    let key = parse_public_key(pem)?;
    ensure_strength(key.size())?;
    Ok(key)
}

fn unwrap_key(pem: &str) -> Result<RsaPrivateKey, ConfigError> {
    let key = parse_private_key(pem)?;
    ensure_strength(key.size())?;
    Ok(key)
}

impl std::fmt::Debug for EncryptionKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyMaterial")
            .field("key_id", &self.key_id)
            .field("public", &self.public.is_some())
            .field("private", &self.private.is_some())
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// Hybrid RSA-OAEP-256 / AES-256-GCM payload encryptor.
#[derive(Debug, Clone)]
pub struct EnvelopeEncryptor {
    material: Option<EncryptionKeyMaterial>,
    allow_passthrough: bool,
}

impl EnvelopeEncryptor {
    /// Encryptor over loaded key material. Pass-through is disabled.
    #[must_use]
    pub fn new(material: EncryptionKeyMaterial) -> Self {
        Self {
            material: Some(material),
            allow_passthrough: false,
        }
    }

    /// Encryptor with no key material at all. Every call fails unless
    /// pass-through is enabled.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            material: None,
            allow_passthrough: false,
        }
    }

    /// Permit sending payloads in clear when no public key is loaded.
    #[must_use]
    pub fn allow_passthrough(mut self, allow: bool) -> Self {
        self.allow_passthrough = allow;
        self
    }

    /// Whether pass-through is enabled.
    #[must_use]
    pub fn passthrough_enabled(&self) -> bool {
        self.allow_passthrough
    }

    /// Whether outbound encryption will actually happen.
    #[must_use]
    pub fn can_encrypt(&self) -> bool {
        self.material.as_ref().is_some_and(EncryptionKeyMaterial::has_public)
    }

    /// Whether inbound decryption is possible.
    #[must_use]
    pub fn can_decrypt(&self) -> bool {
        self.material.as_ref().is_some_and(EncryptionKeyMaterial::has_private)
    }

    /// The configured key id, if any.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.material.as_ref().map(EncryptionKeyMaterial::key_id)
    }

    /// Encrypt a serializable payload into a compact token.
    ///
    /// # Errors
    ///
    /// Fails with `MissingKey` when no public key is loaded and pass-through
    /// is disabled, or on serialization/cipher errors.
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<EncryptOutcome<String>, EncryptionError> {
        let json = serde_json::to_string(payload)?;
        match self.outbound_key()? {
            Some((kid, public)) => Ok(EncryptOutcome::Encrypted(seal(
                kid,
                public,
                json.as_bytes(),
            )?)),
            None => Ok(EncryptOutcome::Passthrough(json)),
        }
    }

    /// Decrypt a compact token back into JSON.
    ///
    /// # Errors
    ///
    /// Fails on a malformed token, unexpected algorithm, key id mismatch,
    /// missing private key or authentication failure.
    pub fn decrypt(&self, token: &str) -> Result<Value, EncryptionError> {
        let material = self
            .material
            .as_ref()
            .ok_or(EncryptionError::MissingKey("private"))?;
        let plaintext = open(material, token)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Move `fields` out of `object` into one encrypted [`ENCRYPTED_DATA_FIELD`].
    ///
    /// Fields not present in `object` are skipped. If none are present the
    /// object is returned unchanged as `Encrypted`, since nothing sensitive
    /// remains in clear.
    ///
    /// # Arguments
    ///
    /// * `object` - JSON object holding the fields
    /// * `fields` - Names of the top-level fields to encrypt
    ///
    /// # Returns
    ///
    /// The object with the named fields replaced by one encrypted field, or
    /// the object unchanged as `Passthrough` when pass-through applies.
    ///
    /// # Errors
    ///
    /// Fails if `object` is not a JSON object, or as [`Self::encrypt`].
    pub fn encrypt_fields(
        &self,
        object: &Value,
        fields: &[&str],
    ) -> Result<EncryptOutcome<Value>, EncryptionError> {
        let Value::Object(map) = object else {
            return Err(EncryptionError::NotAnObject);
        };

        let Some((kid, public)) = self.outbound_key()? else {
            return Ok(EncryptOutcome::Passthrough(object.clone()));
        };

        let mut clear = map.clone();
        let mut sensitive = Map::new();
        for field in fields {
            if let Some(value) = clear.remove(*field) {
                sensitive.insert((*field).to_string(), value);
            }
        }

        if !sensitive.is_empty() {
            let json = serde_json::to_vec(&Value::Object(sensitive))?;
            let token = seal(kid, public, &json)?;
            clear.insert(ENCRYPTED_DATA_FIELD.to_string(), Value::String(token));
        }

        Ok(EncryptOutcome::Encrypted(Value::Object(clear)))
    }

    /// Reverse [`Self::encrypt_fields`]: decrypt [`ENCRYPTED_DATA_FIELD`] and
    /// merge its fields back. Objects without that field are returned as-is.
    ///
    /// # Errors
    ///
    /// Fails if `object` is not a JSON object, the field is not a string
    /// holding an encrypted object, or as [`Self::decrypt`].
    pub fn decrypt_fields(&self, object: &Value) -> Result<Value, EncryptionError> {
        let Value::Object(map) = object else {
            return Err(EncryptionError::NotAnObject);
        };

        let mut merged = map.clone();
        let Some(encrypted) = merged.remove(ENCRYPTED_DATA_FIELD) else {
            return Ok(object.clone());
        };
        let Value::String(token) = encrypted else {
            return Err(EncryptionError::Malformed("encryptedData is not a string"));
        };

        let Value::Object(fields) = self.decrypt(&token)? else {
            return Err(EncryptionError::NotAnObject);
        };
        merged.extend(fields);
        Ok(Value::Object(merged))
    }

    fn outbound_key(&self) -> Result<Option<(&str, &RsaPublicKey)>, EncryptionError> {
        let key = self
            .material
            .as_ref()
            .and_then(|m| m.public.as_ref().map(|p| (m.key_id.as_str(), p)));

        match key {
            Some(key) => Ok(Some(key)),
            None if self.allow_passthrough => {
                tracing::warn!("No encryption key loaded, sending payload without encryption");
                Ok(None)
            }
            None => Err(EncryptionError::MissingKey("public")),
        }
    }
}

fn seal(kid: &str, public: &RsaPublicKey, plaintext: &[u8]) -> Result<String, EncryptionError> {
    let header = JweHeader {
        alg: KEY_WRAP_ALGORITHM.to_string(),
        enc: CONTENT_ALGORITHM.to_string(),
        kid: kid.to_string(),
        iat: Some(unix_now()),
        cty: Some("application/json".to_string()),
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

    let mut cek = [0u8; CEK_LEN];
    OsRng.fill_bytes(&mut cek);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let wrapped = public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &cek)
        .map_err(|e| EncryptionError::Encryption(e.to_string()))?;

    let cipher =
        Aes256Gcm::new_from_slice(&cek).map_err(|e| EncryptionError::Encryption(e.to_string()))?;
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|e| EncryptionError::Encryption(e.to_string()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(&sealed),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

fn open(material: &EncryptionKeyMaterial, token: &str) -> Result<Vec<u8>, EncryptionError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, wrapped, iv, ciphertext, tag] = parts.as_slice() else {
        return Err(EncryptionError::Malformed("expected five segments"));
    };

    let header: JweHeader = serde_json::from_slice(&decode(header_b64, "header")?)
        .map_err(|_| EncryptionError::Malformed("header is not JSON"))?;

    if header.alg != KEY_WRAP_ALGORITHM {
        return Err(EncryptionError::UnsupportedAlgorithm(header.alg));
    }
    if header.enc != CONTENT_ALGORITHM {
        return Err(EncryptionError::UnsupportedAlgorithm(header.enc));
    }
    if header.kid != material.key_id {
        return Err(EncryptionError::KeyIdMismatch {
            expected: material.key_id.clone(),
            actual: header.kid,
        });
    }

    let private = material
        .private
        .as_ref()
        .ok_or(EncryptionError::MissingKey("private"))?;

    let iv = decode(iv, "iv")?;
    let tag = decode(tag, "tag")?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(EncryptionError::Malformed("bad iv or tag length"));
    }

    let cek = private
        .decrypt(Oaep::new::<Sha256>(), &decode(wrapped, "encrypted key")?)
        .map_err(|_| EncryptionError::Decryption)?;
    let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| EncryptionError::Decryption)?;

    let mut sealed = decode(ciphertext, "ciphertext")?;
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| EncryptionError::Decryption)
}

fn decode(segment: &str, what: &'static str) -> Result<Vec<u8>, EncryptionError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| EncryptionError::Malformed(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{other_test_key_pair, test_key_pair};
    use serde_json::json;

    fn material() -> EncryptionKeyMaterial {
        let pair = test_key_pair();
        EncryptionKeyMaterial::new("key-1")
            .unwrap()
            .with_public_key(pair.public_key().clone())
            .with_private_key(pair.private_key().clone())
    }

    fn encryptor() -> EnvelopeEncryptor {
        EnvelopeEncryptor::new(material())
    }

    fn tamper_segment(token: &str, index: usize) -> String {
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let mut bytes = URL_SAFE_NO_PAD.decode(&parts[index]).unwrap();
        bytes[0] ^= 0x01;
        parts[index] = URL_SAFE_NO_PAD.encode(bytes);
        parts.join(".")
    }

    #[test]
    fn round_trip_restores_payload() {
        let payload = json!({"amount": 100, "nested": {"list": [1, 2, 3]}, "note": "ünïcode"});
        let token = encryptor().encrypt(&payload).unwrap();
        assert!(token.is_encrypted());
        let token = token.into_inner();
        assert_eq!(token.split('.').count(), 5);
        assert_eq!(encryptor().decrypt(&token).unwrap(), payload);
    }

    #[test]
    fn header_names_algorithms_and_key_id() {
        let token = encryptor().encrypt(&json!({})).unwrap().into_inner();
        let header_b64 = token.split('.').next().unwrap();
        let header: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).unwrap()).unwrap();
        assert_eq!(header["alg"], KEY_WRAP_ALGORITHM);
        assert_eq!(header["enc"], CONTENT_ALGORITHM);
        assert_eq!(header["kid"], "key-1");
    }

    #[test]
    fn encrypt_fields_replaces_sensitive_fields() {
        let object = json!({
            "amount": 100,
            "cardNumber": "4111111111111111",
            "cvv": "123",
            "merchant": "m-1"
        });
        let outcome = encryptor()
            .encrypt_fields(&object, &["cardNumber", "cvv"])
            .unwrap();
        assert!(outcome.is_encrypted());

        let visible = outcome.into_inner();
        let map = visible.as_object().unwrap();
        assert!(!map.contains_key("cardNumber"));
        assert!(!map.contains_key("cvv"));
        assert_eq!(map["amount"], json!(100));
        assert_eq!(map["merchant"], json!("m-1"));
        assert!(map[ENCRYPTED_DATA_FIELD].is_string());
        assert_eq!(map.len(), 3);

        assert_eq!(encryptor().decrypt_fields(&visible).unwrap(), object);
    }

    #[test]
    fn encrypt_fields_without_matches_leaves_object() {
        let object = json!({"amount": 1});
        let outcome = encryptor().encrypt_fields(&object, &["cvv"]).unwrap();
        assert_eq!(outcome, EncryptOutcome::Encrypted(object));
    }

    #[test]
    fn encrypt_fields_requires_object() {
        assert!(matches!(
            encryptor().encrypt_fields(&json!([1, 2]), &["cvv"]),
            Err(EncryptionError::NotAnObject)
        ));
    }

    #[test]
    fn passthrough_never_happens_by_default() {
        let no_keys = EnvelopeEncryptor::unconfigured();
        assert!(matches!(
            no_keys.encrypt(&json!({"cvv": "123"})),
            Err(EncryptionError::MissingKey("public"))
        ));

        let private_only = EnvelopeEncryptor::new(
            EncryptionKeyMaterial::new("key-1")
                .unwrap()
                .with_private_key(test_key_pair().private_key().clone()),
        );
        assert!(matches!(
            private_only.encrypt_fields(&json!({"cvv": "123"}), &["cvv"]),
            Err(EncryptionError::MissingKey("public"))
        ));
    }

    #[test]
    fn passthrough_is_explicit_when_enabled() {
        let enc = EnvelopeEncryptor::unconfigured().allow_passthrough(true);
        let outcome = enc.encrypt(&json!({"cvv": "123"})).unwrap();
        assert_eq!(
            outcome,
            EncryptOutcome::Passthrough(r#"{"cvv":"123"}"#.to_string())
        );

        let object = json!({"cvv": "123"});
        assert_eq!(
            enc.encrypt_fields(&object, &["cvv"]).unwrap(),
            EncryptOutcome::Passthrough(object)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let token = encryptor().encrypt(&json!({"amount": 100})).unwrap().into_inner();
        for index in [3, 4] {
            assert!(matches!(
                encryptor().decrypt(&tamper_segment(&token, index)),
                Err(EncryptionError::Decryption)
            ));
        }
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let token = encryptor().encrypt(&json!({"amount": 100})).unwrap().into_inner();
        let mut parts: Vec<&str> = token.split('.').collect();
        let header = json!({"alg": KEY_WRAP_ALGORITHM, "enc": CONTENT_ALGORITHM, "kid": "key-1"});
        let replaced = URL_SAFE_NO_PAD.encode(header.to_string());
        parts[0] = &replaced;
        assert!(matches!(
            encryptor().decrypt(&parts.join(".")),
            Err(EncryptionError::Decryption)
        ));
    }

    #[test]
    fn downgraded_algorithms_are_rejected() {
        let token = encryptor().encrypt(&json!({})).unwrap().into_inner();
        let rest: Vec<&str> = token.split('.').skip(1).collect();

        for (alg, enc, rejected) in [
            ("RSA1_5", CONTENT_ALGORITHM, "RSA1_5"),
            (KEY_WRAP_ALGORITHM, "A128CBC-HS256", "A128CBC-HS256"),
        ] {
            let header = json!({"alg": alg, "enc": enc, "kid": "key-1"});
            let forged = format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(header.to_string()),
                rest.join(".")
            );
            match encryptor().decrypt(&forged) {
                Err(EncryptionError::UnsupportedAlgorithm(name)) => assert_eq!(name, rejected),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn key_id_mismatch_is_rejected() {
        let token = encryptor().encrypt(&json!({})).unwrap().into_inner();
        let other = EnvelopeEncryptor::new(
            EncryptionKeyMaterial::new("key-2")
                .unwrap()
                .with_private_key(test_key_pair().private_key().clone()),
        );
        assert!(matches!(
            other.decrypt(&token),
            Err(EncryptionError::KeyIdMismatch { .. })
        ));
    }

    #[test]
    fn wrong_private_key_cannot_unwrap() {
        let token = encryptor().encrypt(&json!({})).unwrap().into_inner();
        let other = EnvelopeEncryptor::new(
            EncryptionKeyMaterial::new("key-1")
                .unwrap()
                .with_private_key(other_test_key_pair().private_key().clone()),
        );
        assert!(matches!(other.decrypt(&token), Err(EncryptionError::Decryption)));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let enc = encryptor();
        assert!(matches!(enc.decrypt("a.b.c"), Err(EncryptionError::Malformed(_))));
        assert!(matches!(enc.decrypt("!!.b.c.d.e"), Err(EncryptionError::Malformed(_))));
    }

    #[test]
    fn decrypt_without_private_key_fails() {
        let token = encryptor().encrypt(&json!({})).unwrap().into_inner();
        let public_only = EnvelopeEncryptor::new(
            EncryptionKeyMaterial::new("key-1")
                .unwrap()
                .with_public_key(test_key_pair().public_key().clone()),
        );
        assert!(matches!(
            public_only.decrypt(&token),
            Err(EncryptionError::MissingKey("private"))
        ));
    }

    #[test]
    fn decrypt_fields_passes_clear_objects_through() {
        let object = json!({"amount": 5});
        assert_eq!(encryptor().decrypt_fields(&object).unwrap(), object);
    }

    #[test]
    fn public_key_can_come_from_a_certificate() {
        let pair = test_key_pair();
        let key_pem = pair.private_key_pem().unwrap();
        let signer = rcgen::KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
            .unwrap();
        let cert = rcgen::CertificateParams::new(vec!["network.example".to_string()])
            .unwrap()
            .self_signed(&signer)
            .unwrap();

        let material = EncryptionKeyMaterial::new("key-1")
            .unwrap()
            .with_public_pem(cert.pem().as_bytes())
            .unwrap()
            .with_private_pem(&key_pem)
            .unwrap();
        let enc = EnvelopeEncryptor::new(material);

        let token = enc.encrypt(&json!({"pan": "4111"})).unwrap().into_inner();
        assert_eq!(enc.decrypt(&token).unwrap(), json!({"pan": "4111"}));
    }

    #[test]
    fn weak_wrap_keys_are_rejected() {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

        let weak = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_pem = weak.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let private_pem = weak.to_pkcs8_pem(LineEnding::LF).unwrap();

        let err = EncryptionKeyMaterial::new("key-1")
            .unwrap()
            .with_public_pem(public_pem.as_bytes())
            .unwrap_err();
        assert!(matches!(err, ConfigError::WeakKey { bits: 1024, .. }));

        let err = EncryptionKeyMaterial::new("key-1")
            .unwrap()
            .with_private_pem(&private_pem)
            .unwrap_err();
        assert!(matches!(err, ConfigError::WeakKey { bits: 1024, .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.pem");
        std::fs::write(&path, &public_pem).unwrap();
        assert!(matches!(
            EncryptionKeyMaterial::from_files("key-1", Some(&path), None),
            Err(ConfigError::WeakKey { .. })
        ));
    }

    #[test]
    fn empty_key_id_is_rejected() {
        assert!(EncryptionKeyMaterial::new(" ").is_err());
    }

    #[test]
    fn debug_hides_keys() {
        let rendered = format!("{:?}", material());
        assert!(rendered.contains("key-1"));
        assert!(rendered.contains("private: true"));
    }

    mod properties {
        use std::collections::BTreeSet;

        use super::*;
        use proptest::prelude::*;

        fn json_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::from),
                any::<u64>().prop_map(Value::from),
                "\\PC{0,24}".prop_map(Value::String),
            ];
            leaf.prop_recursive(4, 48, 6, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                    prop::collection::btree_map("\\PC{0,8}", inner, 0..6)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn any_json_survives_encryption(value in json_value()) {
                let enc = encryptor();
                let token = enc.encrypt(&value).unwrap().into_inner();
                prop_assert_eq!(enc.decrypt(&token).unwrap(), value);
            }

            #[test]
            fn encrypt_fields_moves_exactly_the_named_keys(
                object in prop::collection::btree_map("[a-f]{1,3}", json_value(), 0..8),
                fields in prop::collection::vec("[a-f]{1,3}", 0..5),
            ) {
                let original = Value::Object(object.clone().into_iter().collect());
                let names: Vec<&str> = fields.iter().map(String::as_str).collect();
                let moved: BTreeSet<&str> = names
                    .iter()
                    .copied()
                    .filter(|name| object.contains_key(*name))
                    .collect();

                let enc = encryptor();
                let sealed = enc.encrypt_fields(&original, &names).unwrap().into_inner();
                let map = sealed.as_object().unwrap();

                if moved.is_empty() {
                    prop_assert_eq!(&sealed, &original);
                } else {
                    prop_assert!(map[ENCRYPTED_DATA_FIELD].is_string());
                    prop_assert_eq!(map.len(), object.len() - moved.len() + 1);
                    for key in object.keys() {
                        prop_assert_eq!(map.contains_key(key), !moved.contains(key.as_str()));
                    }
                }
                prop_assert_eq!(enc.decrypt_fields(&sealed).unwrap(), original);
            }
        }
    }
}
