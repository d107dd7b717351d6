//! Payguard outbound client.
//!
//! Every call to the payment network carries three independent proofs: the
//! mutual-TLS channel, Basic credentials, and an `xv2` token signed over the
//! exact request bytes. Sensitive fields can additionally be moved into an
//! encrypted envelope before signing.
//!
//! # Example
//!
//! ```no_run
//! use payguard_client::{ClientOptions, PaymentNetworkClient};
//! use payguard_core::{RequestSigner, SigningKeyPair, TransportAuthenticator, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TransportAuthenticator::from_config(&TransportConfig {
//!     user_id: Some("user".into()),
//!     password: Some("password".into()),
//!     cert_path: Some("certs/client.pem".into()),
//!     key_path: Some("certs/client.key".into()),
//!     ca_path: Some("certs/ca.pem".into()),
//! })?;
//! let (keys, _) = SigningKeyPair::load_or_generate(
//!     "keys/signing_private.pem".as_ref(),
//!     "keys/signing_public.pem".as_ref(),
//! )?;
//!
//! let client = PaymentNetworkClient::new(
//!     "https://api.network.example",
//!     transport,
//!     RequestSigner::new(keys),
//!     &ClientOptions::default(),
//! )?;
//!
//! let result = client
//!     .post(
//!         "/v1/pushfundstransactions",
//!         &serde_json::json!({"amount": 100, "recipientPrimaryAccountNumber": "4111111111111111"}),
//!         &[],
//!     )
//!     .await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod transport;

pub use client::{
    ClientOptions, PaymentNetworkClient, PreparedRequest, KEY_ID_HEADER, PAY_TOKEN_HEADER,
    TRANSACTION_ID_HEADER,
};
pub use error::ClientError;
pub use reqwest::Method;
