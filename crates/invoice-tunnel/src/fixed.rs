//! Static public URL

use async_trait::async_trait;

use crate::error::{Result, TunnelError};
use crate::{Tunnel, TunnelProvider};

/// A public URL that already routes to this process
#[derive(Clone, Debug)]
pub struct StaticTunnel {
    public_url: String,
}

impl StaticTunnel {
    pub fn new(public_url: impl Into<String>) -> Result<Self> {
        let public_url = public_url.into().trim().trim_end_matches('/').to_string();

        let host = public_url
            .strip_prefix("https://")
            .or_else(|| public_url.strip_prefix("http://"));
        if host.is_none_or(str::is_empty) {
            return Err(TunnelError::Config(format!(
                "public URL must be an absolute http(s) URL, got {public_url:?}"
            )));
        }

        Ok(Self { public_url })
    }
}

#[async_trait]
impl TunnelProvider for StaticTunnel {
    async fn open(&self, local_port: u16) -> Result<Tunnel> {
        tracing::debug!(url = %self.public_url, local_port, "Using static public URL");

        Ok(Tunnel {
            public_url: self.public_url.clone(),
            local_port,
            name: None,
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}
