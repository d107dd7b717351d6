//! Payment network HTTP client.

use std::sync::Arc;

use payguard_core::{
    redact, EnvelopeEncryptor, RequestSigner, SignedToken, TransportAuthenticator,
    ENCRYPTED_DATA_FIELD,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::ClientError;
use crate::transport::build_mtls_client;

/// Header carrying the `xv2` request token.
pub const PAY_TOKEN_HEADER: &str = "x-pay-token";
/// Header carrying a fresh per-request UUID.
pub const TRANSACTION_ID_HEADER: &str = "x-transaction-id";
/// Header naming the encryption key id when the body holds encrypted data.
pub const KEY_ID_HEADER: &str = "keyid";

/// A fully signed request, ready to dispatch.
///
/// The token in `headers` was computed over exactly `body`; altering either
/// invalidates it.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Outbound headers.
    pub headers: HeaderMap,
    /// Serialized body bytes; empty for bodiless requests.
    pub body: Vec<u8>,
    /// Value of the transaction id header.
    pub transaction_id: String,
    /// The request token.
    pub token: SignedToken,
}

/// Composes transport credentials, request signing and optional field
/// encryption for calls to the payment network.
#[derive(Debug, Clone)]
pub struct PaymentNetworkClient {
    http: Client,
    base_url: String,
    transport: Arc<TransportAuthenticator>,
    signer: Arc<RequestSigner>,
    encryptor: Option<Arc<EnvelopeEncryptor>>,
}

impl PaymentNetworkClient {
    /// Create a client over an mTLS connection built from `transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity or CA cannot be loaded into the TLS
    /// stack, or the base URL is not HTTPS.
    pub fn new(
        base_url: impl Into<String>,
        transport: TransportAuthenticator,
        signer: RequestSigner,
        options: &ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&base_url.into())?;
        if !base_url.starts_with("https://") {
            return Err(ClientError::Configuration(format!(
                "base URL must use https: {base_url}"
            )));
        }
        let http = build_mtls_client(&transport, options)?;
        Ok(Self::assemble(http, base_url, transport, signer))
    }

    /// Create a client over a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty.
    pub fn with_http_client(
        base_url: impl Into<String>,
        http: Client,
        transport: TransportAuthenticator,
        signer: RequestSigner,
    ) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&base_url.into())?;
        Ok(Self::assemble(http, base_url, transport, signer))
    }

    fn assemble(
        http: Client,
        base_url: String,
        transport: TransportAuthenticator,
        signer: RequestSigner,
    ) -> Self {
        Self {
            http,
            base_url,
            transport: Arc::new(transport),
            signer: Arc::new(signer),
            encryptor: None,
        }
    }

    /// Attach an encryptor for field-level payload encryption.
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: EnvelopeEncryptor) -> Self {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Encrypt, serialize and sign a request without sending it.
    ///
    /// `path` must start with `/`; `query` is the raw query string without
    /// the leading `?`. When `encrypt_fields` is non-empty the named fields
    /// are moved into an encrypted envelope before the body is serialized.
    ///
    /// # Errors
    ///
    /// Fails on an invalid path, when encryption is requested without an
    /// encryptor, or on encryption, serialization or signing errors.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: Option<&Value>,
        encrypt_fields: &[&str],
    ) -> Result<PreparedRequest, ClientError> {
        if !path.starts_with('/') {
            return Err(ClientError::Configuration(format!(
                "resource path must start with '/': {path}"
            )));
        }

        let mut key_id = None;
        let body = match body {
            Some(value) if !encrypt_fields.is_empty() => {
                let encryptor = self.encryptor.as_ref().ok_or_else(|| {
                    ClientError::Configuration(
                        "field encryption requested but no encryptor is attached".to_string(),
                    )
                })?;
                let outcome = encryptor.encrypt_fields(value, encrypt_fields)?;
                let value = outcome.into_inner();
                if value.get(ENCRYPTED_DATA_FIELD).is_some() {
                    key_id = encryptor.key_id().map(str::to_string);
                }
                Some(value)
            }
            Some(value) => Some(value.clone()),
            None => None,
        };

        let bytes = match &body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        let token = self.signer.sign(path, query, &bytes)?;
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&self.transport.basic_auth_header())?,
        );
        headers.insert(
            HeaderName::from_static(PAY_TOKEN_HEADER),
            header_value(&token.to_string())?,
        );
        headers.insert(
            HeaderName::from_static(TRANSACTION_ID_HEADER),
            header_value(&transaction_id)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(kid) = &key_id {
            headers.insert(HeaderName::from_static(KEY_ID_HEADER), header_value(kid)?);
        }

        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        let redacted = body.as_ref().map_or(Value::Null, redact::redact_json);
        tracing::debug!(
            method = %method,
            path,
            transaction_id = %transaction_id,
            encrypted = key_id.is_some(),
            body = %redacted,
            "Prepared signed request"
        );

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body: bytes,
            transaction_id,
            token,
        })
    }

    /// Dispatch a prepared request.
    ///
    /// A 2xx JSON response carrying [`ENCRYPTED_DATA_FIELD`] is decrypted
    /// when the attached encryptor holds a private key. An empty 2xx body
    /// yields `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api` for non-2xx responses, and HTTP,
    /// serialization or decryption errors otherwise.
    pub async fn send(&self, request: PreparedRequest) -> Result<Value, ClientError> {
        let PreparedRequest {
            method,
            url,
            headers,
            body,
            transaction_id,
            ..
        } = request;

        let mut builder = self.http.request(method.clone(), &url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        tracing::info!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            transaction_id = %transaction_id,
            "Payment network call completed"
        );

        if !status.is_success() {
            let message = if text.trim().is_empty() {
                status.to_string()
            } else {
                text
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_json::from_str(&text)?;
        match &self.encryptor {
            Some(encryptor)
                if encryptor.can_decrypt() && value.get(ENCRYPTED_DATA_FIELD).is_some() =>
            {
                Ok(encryptor.decrypt_fields(&value)?)
            }
            _ => Ok(value),
        }
    }

    /// Sign and send a JSON `POST`, encrypting `encrypt_fields` first.
    ///
    /// # Errors
    ///
    /// See [`Self::prepare`] and [`Self::send`].
    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        encrypt_fields: &[&str],
    ) -> Result<Value, ClientError> {
        let request = self.prepare(Method::POST, path, "", Some(body), encrypt_fields)?;
        self.send(request).await
    }

    /// Sign and send a `GET`.
    ///
    /// # Errors
    ///
    /// See [`Self::prepare`] and [`Self::send`].
    pub async fn get(&self, path: &str, query: &str) -> Result<Value, ClientError> {
        let request = self.prepare(Method::GET, path, query, None, &[])?;
        self.send(request).await
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: concat!("payguard/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientOptions {
    /// Options with a custom timeout.
    #[must_use]
    pub fn with_timeout(seconds: u64) -> Self {
        Self {
            timeout_seconds: seconds,
            ..Self::default()
        }
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::Configuration("base URL is empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::Configuration(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trims_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://api.example.test/").unwrap(),
            "https://api.example.test"
        );
        assert!(normalize_base_url("/").is_err());
    }

    #[test]
    fn default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout_seconds, 30);
        assert!(options.user_agent.starts_with("payguard/"));
        assert_eq!(ClientOptions::with_timeout(5).timeout_seconds, 5);
    }

    #[test]
    fn header_values_reject_control_characters() {
        assert!(header_value("ok-value").is_ok());
        assert!(header_value("bad\nvalue").is_err());
    }
}
