//! ngrok Tunnel Provider
//!
//! Opens tunnels through a running ngrok agent's local API
//! (`ngrok start --none` or any agent with the web interface enabled).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};
use crate::{Tunnel, TunnelProvider};

/// ngrok agent configuration
#[derive(Clone, Debug)]
pub struct NgrokConfig {
    /// Agent API address
    pub api_url: String,

    /// Name the tunnel is registered under
    pub tunnel_name: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NgrokConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:4040".into(),
            tunnel_name: "paypal-invoice-hook".into(),
            timeout_secs: 10,
        }
    }
}

impl NgrokConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            api_url: std::env::var("NGROK_API_URL").unwrap_or(defaults.api_url),
            tunnel_name: std::env::var("NGROK_TUNNEL_NAME").unwrap_or(defaults.tunnel_name),
            ..defaults
        }
    }
}

/// ngrok agent tunnel provider
pub struct NgrokAgentTunnel {
    http: reqwest::Client,
    config: NgrokConfig,
}

impl NgrokAgentTunnel {
    pub fn new(config: NgrokConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TunnelError::Config(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(NgrokConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Look up an already running tunnel by name
    async fn existing(&self) -> Result<Option<TunnelInfo>> {
        let response = self
            .http
            .get(self.url(&format!("/api/tunnels/{}", self.config.tunnel_name)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let info = response
            .json()
            .await
            .map_err(|e| TunnelError::InvalidResponse(e.to_string()))?;
        Ok(Some(info))
    }

    fn tunnel_from(&self, info: TunnelInfo, local_port: u16) -> Result<Tunnel> {
        if !info.public_url.starts_with("https://") {
            if info.public_url.starts_with("http://") {
                tracing::warn!(url = %info.public_url, "ngrok tunnel is not HTTPS");
            } else {
                return Err(TunnelError::InvalidResponse(format!(
                    "unexpected public URL {:?}",
                    info.public_url
                )));
            }
        }

        Ok(Tunnel {
            public_url: info.public_url,
            local_port,
            name: Some(info.name.unwrap_or_else(|| self.config.tunnel_name.clone())),
        })
    }
}

#[async_trait]
impl TunnelProvider for NgrokAgentTunnel {
    async fn open(&self, local_port: u16) -> Result<Tunnel> {
        let request = StartTunnelRequest {
            name: &self.config.tunnel_name,
            proto: "http",
            addr: local_port.to_string(),
        };

        let response = self
            .http
            .post(self.url("/api/tunnels"))
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            let info: TunnelInfo = response
                .json()
                .await
                .map_err(|e| TunnelError::InvalidResponse(e.to_string()))?;
            return self.tunnel_from(info, local_port);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // A tunnel with our name survives from an earlier run
        if let Some(info) = self.existing().await? {
            if info.local_port() != Some(local_port) {
                let forwards_to = info
                    .config
                    .as_ref()
                    .map_or("an unknown address", |c| c.addr.as_str());
                return Err(TunnelError::Rejected(format!(
                    "tunnel {} already forwards to {forwards_to}, not port {local_port}",
                    self.config.tunnel_name
                )));
            }

            tracing::info!(name = %self.config.tunnel_name, "Reusing running ngrok tunnel");
            return self.tunnel_from(info, local_port);
        }

        Err(TunnelError::Rejected(format!("{status}: {body}")))
    }

    async fn close(&self, tunnel: &Tunnel) -> Result<()> {
        let Some(name) = &tunnel.name else {
            return Ok(());
        };

        let response = self
            .http
            .delete(self.url(&format!("/api/tunnels/{name}")))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(TunnelError::Rejected(format!("close {name}: {status}")));
        }

        tracing::info!(name = %name, "Closed ngrok tunnel");
        Ok(())
    }

    fn name(&self) -> &str {
        "ngrok"
    }
}

#[derive(Debug, Serialize)]
struct StartTunnelRequest<'a> {
    name: &'a str,
    proto: &'a str,
    addr: String,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    name: Option<String>,
    public_url: String,
    #[serde(default)]
    config: Option<TunnelConfig>,
}

#[derive(Debug, Deserialize)]
struct TunnelConfig {
    addr: String,
}

impl TunnelInfo {
    /// Port from `addr`, which the agent reports as `http://localhost:3000`,
    /// `localhost:3000` or a bare `3000`
    fn local_port(&self) -> Option<u16> {
        let addr = self.config.as_ref()?.addr.trim().trim_end_matches('/');
        let port = addr.rsplit_once(':').map_or(addr, |(_, port)| port);
        port.parse().ok()
    }
}
