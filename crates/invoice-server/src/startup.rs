//! Startup Sequence
//!
//! ```text
//! load store ─▶ bind ─▶ open tunnel ─▶ access token ─▶ register webhook ─▶ simulate event
//! ```
//!
//! Every step is awaited before the next one starts. Failures carry an
//! `anyhow` context naming the step.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use invoice_core::{InvoiceStore, JsonFileBackend};
use invoice_payments::{
    INVOICE_PAID_EVENT, Invoicer, PayPalClient, PaymentProvider, ProcessedEvents, TokenCache,
    WebhookReceiver, WebhookSubscription, mock::MockPaymentProvider,
};
use invoice_tunnel::{NgrokAgentTunnel, StaticTunnel, Tunnel, TunnelProvider};

use crate::config::{AppConfig, ProviderMode};
use crate::handlers::WEBHOOK_PATH;
use crate::state::AppState;

/// Everything the server needs before it binds
pub struct Services {
    pub provider: Arc<dyn PaymentProvider>,
    pub tokens: Arc<TokenCache>,
    pub state: AppState,
}

/// Result of the outbound half of startup
#[derive(Debug)]
pub struct Connection {
    pub tunnel: Tunnel,
    pub callback_url: String,
    pub subscription: WebhookSubscription,
}

/// Load the invoice store and wire the services around it
pub async fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let backend = Arc::new(JsonFileBackend::new(&config.store_path));
    let store = InvoiceStore::load(backend).await.with_context(|| {
        format!(
            "Failed to load invoice store from {}",
            config.store_path.display()
        )
    })?;

    let provider = payment_provider(config)?;
    Ok(assemble(config, Arc::new(store), provider))
}

/// Build the payment provider for the configured mode
pub fn payment_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentProvider>> {
    match config.mode {
        ProviderMode::Mock => {
            tracing::warn!("⚠ Using mock payment provider - no invoices reach PayPal");
            Ok(Arc::new(MockPaymentProvider::new()))
        }
        ProviderMode::PayPal(environment) => {
            let mut client = PayPalClient::new(environment, config.request_timeout)
                .context("Failed to build PayPal client")?;
            if let Some(base_url) = &config.api_base {
                client = client.with_base_url(base_url.as_str());
            }
            Ok(Arc::new(client))
        }
    }
}

/// Wire store, provider and token cache into application state
pub fn assemble(
    config: &AppConfig,
    store: Arc<InvoiceStore>,
    provider: Arc<dyn PaymentProvider>,
) -> Services {
    let tokens = Arc::new(TokenCache::new(provider.clone(), config.credentials.clone()));
    let invoicer = Invoicer::new(provider.clone(), tokens.clone(), store.clone())
        .with_currency(config.currency.as_str());

    let mut receiver = WebhookReceiver::new(store.clone());
    if config.dedupe_webhooks {
        receiver = receiver.with_dedup(ProcessedEvents::default());
    }

    Services {
        provider,
        tokens,
        state: AppState::new(store, Arc::new(invoicer), Arc::new(receiver)),
    }
}

/// Static URL when one is configured, otherwise the local ngrok agent
pub fn tunnel_provider(config: &AppConfig) -> anyhow::Result<Box<dyn TunnelProvider>> {
    match &config.public_url {
        Some(url) => {
            let tunnel = StaticTunnel::new(url.as_str()).context("Invalid PUBLIC_URL")?;
            Ok(Box::new(tunnel))
        }
        None => {
            let tunnel = NgrokAgentTunnel::from_env().context("Failed to build ngrok client")?;
            Ok(Box::new(tunnel))
        }
    }
}

/// Open the tunnel and subscribe it to paid events.
///
/// The tunnel is closed again if any later step fails.
pub async fn connect(
    config: &AppConfig,
    services: &Services,
    tunnels: &dyn TunnelProvider,
    local_port: u16,
) -> anyhow::Result<Connection> {
    let tunnel = tunnels.open(local_port).await.with_context(|| {
        format!("Failed to open {} tunnel to port {local_port}", tunnels.name())
    })?;
    tracing::info!(url = %tunnel.public_url, provider = tunnels.name(), "Tunnel initiated");

    match subscribe(config, services, &tunnel).await {
        Ok((callback_url, subscription)) => {
            let _ = services.state.public_url.set(tunnel.public_url.clone());
            Ok(Connection {
                tunnel,
                callback_url,
                subscription,
            })
        }
        Err(e) => {
            if let Err(close_err) = tunnels.close(&tunnel).await {
                tracing::warn!(error = %close_err, "Failed to close tunnel");
            }
            Err(e)
        }
    }
}

/// Finish startup, then wait for the server and close the tunnel.
///
/// `connect` is never cancelled midway: a shutdown requested during
/// startup is honored once it returns, so an opened tunnel is always
/// closed again.
pub async fn run(
    config: &AppConfig,
    services: &Services,
    tunnels: &dyn TunnelProvider,
    local_port: u16,
    server: JoinHandle<std::io::Result<()>>,
    on_ready: impl FnOnce(&Connection),
) -> anyhow::Result<()> {
    let connection = match connect(config, services, tunnels, local_port).await {
        Ok(connection) => connection,
        Err(e) => {
            server.abort();
            return Err(e);
        }
    };

    if server.is_finished() {
        tracing::info!("Shutdown requested during startup");
    } else {
        on_ready(&connection);
    }

    let served = server.await.context("Server task failed");

    if let Err(e) = tunnels.close(&connection.tunnel).await {
        tracing::warn!(error = %e, "Failed to close tunnel");
    }

    served??;
    Ok(())
}

async fn subscribe(
    config: &AppConfig,
    services: &Services,
    tunnel: &Tunnel,
) -> anyhow::Result<(String, WebhookSubscription)> {
    let callback_url = format!("{}{WEBHOOK_PATH}", tunnel.public_url);

    let token = services
        .tokens
        .get()
        .await
        .context("Failed to obtain PayPal access token")?;

    let subscription = services
        .provider
        .register_webhook(&token, &callback_url)
        .await
        .with_context(|| format!("Failed to register webhook for {callback_url}"))?;
    tracing::info!(
        id = %subscription.id,
        url = %subscription.url,
        "Webhook registered"
    );

    if config.simulate_event {
        services
            .provider
            .simulate_event(&token, &callback_url, INVOICE_PAID_EVENT)
            .await
            .context("Failed to request simulated paid event")?;
        tracing::info!(event_type = INVOICE_PAID_EVENT, "Simulated event requested");
    }

    Ok((callback_url, subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use invoice_core::MemoryBackend;

    #[derive(Default)]
    struct CountingTunnel {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl TunnelProvider for CountingTunnel {
        async fn open(&self, local_port: u16) -> invoice_tunnel::Result<Tunnel> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Tunnel {
                public_url: "https://counted.example.com".into(),
                local_port,
                name: Some("counted".into()),
            })
        }

        async fn close(&self, _tunnel: &Tunnel) -> invoice_tunnel::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn finished_server(result: std::io::Result<()>) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(async move { result })
    }

    fn config(simulate_event: bool) -> AppConfig {
        let mut config = AppConfig::from_lookup(|name| match name {
            "PAYPAL_MODE" => Some("mock".into()),
            "PUBLIC_URL" => Some("https://hooks.example.com".into()),
            _ => None,
        })
        .unwrap();
        config.simulate_event = simulate_event;
        config
    }

    async fn services(config: &AppConfig, provider: Arc<MockPaymentProvider>) -> Services {
        let store = InvoiceStore::load(Arc::new(MemoryBackend::new()))
            .await
            .unwrap();
        assemble(config, Arc::new(store), provider)
    }

    #[tokio::test]
    async fn test_connect_registers_webhook_and_simulates() {
        let config = config(true);
        let provider = Arc::new(MockPaymentProvider::new());
        let services = services(&config, provider.clone()).await;
        let tunnels = tunnel_provider(&config).unwrap();

        let connection = connect(&config, &services, tunnels.as_ref(), 3000)
            .await
            .unwrap();

        assert_eq!(
            connection.callback_url,
            "https://hooks.example.com/webhook/paypal"
        );
        assert_eq!(
            provider.registered_webhooks(),
            vec!["https://hooks.example.com/webhook/paypal".to_string()]
        );
        assert_eq!(
            provider.simulated_events(),
            vec![(
                "https://hooks.example.com/webhook/paypal".to_string(),
                INVOICE_PAID_EVENT.to_string()
            )]
        );
        assert_eq!(
            services.state.public_url.get().map(String::as_str),
            Some("https://hooks.example.com")
        );
    }

    #[tokio::test]
    async fn test_connect_without_simulation() {
        let config = config(false);
        let provider = Arc::new(MockPaymentProvider::new());
        let services = services(&config, provider.clone()).await;
        let tunnels = tunnel_provider(&config).unwrap();

        connect(&config, &services, tunnels.as_ref(), 3000)
            .await
            .unwrap();

        assert!(provider.simulated_events().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_credentials_halt_startup() {
        let config = config(true);
        let provider = Arc::new(MockPaymentProvider::new());
        provider.reject_credentials(true);
        let services = services(&config, provider.clone()).await;
        let tunnels = tunnel_provider(&config).unwrap();

        let err = connect(&config, &services, tunnels.as_ref(), 3000)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("access token"));
        assert!(provider.registered_webhooks().is_empty());
        assert!(provider.simulated_events().is_empty());
        assert!(services.state.public_url.get().is_none());
    }

    #[tokio::test]
    async fn test_subscription_failure_is_reported() {
        let config = config(true);
        let provider = Arc::new(MockPaymentProvider::new());
        provider.fail_webhook_registration(true);
        let services = services(&config, provider.clone()).await;
        let tunnels = tunnel_provider(&config).unwrap();

        let err = connect(&config, &services, tunnels.as_ref(), 3000)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("register webhook"));
        assert!(provider.simulated_events().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_startup_still_closes_tunnel() {
        let config = config(false);
        let services = services(&config, Arc::new(MockPaymentProvider::new())).await;
        let tunnels = CountingTunnel::default();

        // Server already stopped before the tunnel was even opened
        let server = finished_server(Ok(()));
        tokio::task::yield_now().await;

        run(&config, &services, &tunnels, 3000, server, |_| {})
            .await
            .unwrap();

        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_failure_closes_tunnel_and_is_reported() {
        let config = config(false);
        let services = services(&config, Arc::new(MockPaymentProvider::new())).await;
        let tunnels = CountingTunnel::default();

        let server = finished_server(Err(std::io::Error::other("accept failed")));

        let err = run(&config, &services, &tunnels, 3000, server, |_| {})
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("accept failed"));
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_closes_tunnel_once() {
        let config = config(false);
        let provider = Arc::new(MockPaymentProvider::new());
        provider.reject_credentials(true);
        let services = services(&config, provider).await;
        let tunnels = CountingTunnel::default();

        let server = tokio::spawn(std::future::pending::<std::io::Result<()>>());

        let err = run(&config, &services, &tunnels, 3000, server, |_| {})
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("access token"));
        assert_eq!(tunnels.opened.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");
        tokio::fs::write(&path, b"{\"id\":\"INV-1\"}").await.unwrap();

        let mut config = config(false);
        config.store_path = path;

        let err = build_services(&config).await.err().unwrap();
        assert!(format!("{err:#}").contains("Failed to load invoice store"));
    }

    #[tokio::test]
    async fn test_missing_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(false);
        config.store_path = dir.path().join("invoices.json");

        let services = build_services(&config).await.unwrap();
        assert!(services.state.store.is_empty().await);
    }
}
