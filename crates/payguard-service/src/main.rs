//! Payguard Service - inbound webhook endpoint for the payment network.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payguard_service::{create_router, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,payguard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Payguard Service");

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        transport_configured = !config.transport.is_empty(),
        encryption_key_id = ?config.encryption_key_id,
        webhook_tolerance_seconds = config.webhook_tolerance_seconds,
        "Service configuration loaded"
    );

    let state = AppState::initialize(config.clone())?;
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
