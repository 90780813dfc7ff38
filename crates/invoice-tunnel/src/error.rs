//! Tunnel Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Error, Debug)]
pub enum TunnelError {
    /// The tunnel agent could not be reached
    #[error("Tunnel agent unavailable: {0}")]
    Unavailable(String),

    /// The agent refused to open the tunnel
    #[error("Tunnel rejected: {0}")]
    Rejected(String),

    /// The agent answered with something unusable
    #[error("Invalid tunnel response: {0}")]
    InvalidResponse(String),

    /// The agent did not answer in time
    #[error("Tunnel agent timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TunnelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TunnelError::Timeout
        } else {
            TunnelError::Unavailable(err.to_string())
        }
    }
}
