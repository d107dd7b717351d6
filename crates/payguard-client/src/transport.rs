//! mTLS reqwest client construction.

use std::time::Duration;

use payguard_core::TransportAuthenticator;
use reqwest::{Certificate, Client, Identity};

use crate::client::ClientOptions;
use crate::error::ClientError;

/// Build an HTTPS-only client that presents the transport identity and
/// trusts only the configured CA.
pub(crate) fn build_mtls_client(
    transport: &TransportAuthenticator,
    options: &ClientOptions,
) -> Result<Client, ClientError> {
    let identity = Identity::from_pem(&transport.identity_pem())?;
    let ca = Certificate::from_pem(transport.ca_pem())?;

    let client = Client::builder()
        .use_rustls_tls()
        .identity(identity)
        .add_root_certificate(ca)
        .tls_built_in_root_certs(false)
        .https_only(true)
        .timeout(Duration::from_secs(options.timeout_seconds))
        .user_agent(options.user_agent.clone())
        .build()?;

    tracing::debug!(
        subject = %transport.subject(),
        timeout_seconds = options.timeout_seconds,
        "Built mTLS HTTP client"
    );
    Ok(client)
}
