//! Common test utilities for payguard integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use axum::Router;
use axum_test::TestServer;
use tempfile::TempDir;

use payguard_core::{unix_now, EventHandler, SharedSecret, SigningKeyPair, WebhookValidator};
use payguard_service::{create_router, AppState, ServiceConfig};

/// Shared secret used by every harness.
pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";

/// Signing key files generated once per test binary.
fn shared_keys() -> &'static (TempDir, PathBuf, PathBuf) {
    static KEYS: OnceLock<(TempDir, PathBuf, PathBuf)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let dir = TempDir::new().expect("Failed to create key directory");
        let private = dir.path().join("private.pem");
        let public = dir.path().join("public.pem");
        SigningKeyPair::load_or_generate(&private, &public).expect("Failed to generate keys");
        (dir, private, public)
    })
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Scratch directory for test files (kept alive for test duration).
    pub temp_dir: TempDir,
    /// Validator over the same secret, used to sign deliveries.
    pub signer: WebhookValidator,
}

impl TestHarness {
    /// Create a harness with the default logging handler.
    pub fn new() -> Self {
        Self::build(|config| config, None)
    }

    /// Create a harness with a custom event handler.
    pub fn with_handler(handler: Arc<dyn EventHandler>) -> Self {
        Self::build(|config| config, Some(handler))
    }

    /// Create a harness with adjusted configuration.
    pub fn with_config(adjust: impl FnOnce(ServiceConfig) -> ServiceConfig) -> Self {
        Self::build(adjust, None)
    }

    fn build(
        adjust: impl FnOnce(ServiceConfig) -> ServiceConfig,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");

        let mut config = ServiceConfig::with_webhook_secret(WEBHOOK_SECRET);
        config.listen_addr = "127.0.0.1:0".into();
        let (_, private, public) = shared_keys();
        config.signing_private_key_path = private.clone();
        config.signing_public_key_path = public.clone();
        let config = adjust(config);

        let mut state = AppState::initialize(config).expect("Failed to initialize state");
        if let Some(handler) = handler {
            state = state.with_handler(handler);
        }
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let signer = WebhookValidator::new(SharedSecret::new(WEBHOOK_SECRET).unwrap());

        Self {
            server,
            temp_dir,
            signer,
        }
    }

    /// Signature and timestamp headers for `body` signed at `timestamp`.
    pub fn sign_at(&self, body: &str, timestamp: i64) -> (String, String) {
        (
            self.signer.generate_signature(body, timestamp),
            timestamp.to_string(),
        )
    }

    /// Signature and timestamp headers for `body` signed now.
    pub fn sign(&self, body: &str) -> (String, String) {
        self.sign_at(body, unix_now())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
