//! Payment Error Types

use invoice_core::CoreError;
use thiserror::Error;

use crate::provider::CreatedInvoice;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment provider and webhook errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Client credential exchange rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Webhook subscription could not be registered
    #[error("Webhook subscription failed: {0}")]
    Subscription(String),

    /// Invoice draft or send failed
    #[error("Invoice creation failed: {0}")]
    InvoiceCreation(String),

    /// Simulated event delivery failed
    #[error("Event simulation failed: {0}")]
    SimulateEvent(String),

    /// Provider did not answer in time
    #[error("Provider timed out during {operation}")]
    Timeout { operation: &'static str },

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Timeout { .. }
                | PaymentError::InvoiceCreation(_)
                | PaymentError::Subscription(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Auth(_) => "Could not authenticate with the payment provider.",
            PaymentError::InvoiceCreation(_) => "The invoice could not be created. Please try again.",
            PaymentError::Timeout { .. } => "The payment provider did not respond in time.",
            PaymentError::WebhookParse(_) => "Malformed webhook event.",
            PaymentError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

/// Errors from the create-invoice flow.
///
/// `Persistence` means the invoice exists at the provider but is not
/// durably tracked here; it carries the remote invoice so the caller can
/// report it or trigger a backfill.
#[derive(Error, Debug)]
pub enum InvoiceFlowError {
    #[error("Invalid invoice request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error("Invoice {} was created but is not tracked locally: {source}", .invoice.invoice_id)]
    Persistence {
        invoice: CreatedInvoice,
        #[source]
        source: CoreError,
    },
}
