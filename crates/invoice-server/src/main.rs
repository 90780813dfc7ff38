//! paypal-invoice-hook HTTP Server
//!
//! Creates PayPal invoices, keeps a local record of each one, and
//! reconciles `INVOICING.INVOICE.PAID` webhooks delivered through a
//! public tunnel against that record.

mod config;
mod handlers;
mod startup;
mod state;

use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, ProviderMode};
use crate::handlers::WEBHOOK_PATH;
use crate::startup::Connection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    if let ProviderMode::PayPal(environment) = config.mode {
        tracing::info!(environment = ?environment, "✓ PayPal configured");
    }
    tracing::warn!("⚠ Webhook signatures are not verified - any caller can post events");

    let services = startup::build_services(&config).await?;
    let app = handlers::router(services.state.clone());

    // Bind before the tunnel so the simulated event has somewhere to land
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let tunnels = startup::tunnel_provider(&config)?;
    startup::run(
        &config,
        &services,
        tunnels.as_ref(),
        local_addr.port(),
        server,
        |connection| print_banner(local_addr, connection),
    )
    .await?;

    let unpersisted = services.state.store.unpersisted().await;
    if !unpersisted.is_empty() {
        tracing::warn!(
            count = unpersisted.len(),
            ids = ?unpersisted,
            "Shutting down with invoices that were never persisted"
        );
    }

    Ok(())
}

fn print_banner(local_addr: SocketAddr, connection: &Connection) {
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 paypal-invoice-hook running on http://{}", local_addr);
    tracing::info!("   public URL: {}", connection.tunnel.public_url);
    tracing::info!("   webhook:    {}", connection.callback_url);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health              - Health check");
    tracing::info!("  GET  /api/invoices        - List tracked invoices");
    tracing::info!("  POST /api/invoices        - Create and send invoice");
    tracing::info!("  GET  /api/invoices/{{id}}   - Look up tracked invoice");
    tracing::info!("  POST /api/invoices/flush  - Retry failed invoice writes");
    tracing::info!("  POST {}       - PayPal webhook", WEBHOOK_PATH);
    tracing::info!("");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
