//! # invoice-tunnel
//!
//! Public tunnel providers for the webhook receiver.
//!
//! The payment provider needs a routable URL to deliver events to. A
//! `TunnelProvider` maps the locally bound port to one.
//!
//! ## Providers
//!
//! - **ngrok** (default): asks a running ngrok agent to open a tunnel
//!   through its local API
//! - **static**: a public URL that already routes here (reverse proxy,
//!   deployed host)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invoice_tunnel::{NgrokAgentTunnel, TunnelProvider};
//!
//! let tunnel = NgrokAgentTunnel::from_env()?.open(3000).await?;
//! println!("webhooks at {}", tunnel.public_url);
//! ```

mod error;
mod fixed;
#[cfg(feature = "ngrok")]
pub mod ngrok;

pub use error::{Result, TunnelError};
pub use fixed::StaticTunnel;
#[cfg(feature = "ngrok")]
pub use ngrok::{NgrokAgentTunnel, NgrokConfig};

use async_trait::async_trait;

/// An open tunnel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tunnel {
    /// Publicly reachable URL
    pub public_url: String,

    /// Local port the tunnel forwards to
    pub local_port: u16,

    /// Provider-side tunnel name, if the provider names tunnels
    pub name: Option<String>,
}

/// Tunnel provider trait (Strategy pattern)
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Expose `local_port` under a public URL
    async fn open(&self, local_port: u16) -> Result<Tunnel>;

    /// Tear the tunnel down
    async fn close(&self, _tunnel: &Tunnel) -> Result<()> {
        Ok(())
    }

    /// Provider name
    fn name(&self) -> &str;
}
