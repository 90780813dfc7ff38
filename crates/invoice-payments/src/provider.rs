//! Payment Provider Strategy Pattern
//!
//! The four request/response exchanges this service needs from a payment
//! provider. `PayPalClient` talks to the real API, `MockPaymentProvider`
//! stands in for it in tests and offline runs.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::{AccessToken, Credentials};
use crate::error::Result;

/// Event type fired when a payer settles an invoice
pub const INVOICE_PAID_EVENT: &str = "INVOICING.INVOICE.PAID";

/// A registered webhook subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    /// Provider-assigned subscription id
    pub id: String,

    /// Callback URL events are delivered to
    pub url: String,

    /// Event types the subscription listens for
    pub event_types: Vec<String>,
}

/// Invoice to create and send
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub amount: Decimal,
    pub currency: String,
    pub recipient_email: String,
}

/// An invoice that was created and sent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    /// Provider-assigned invoice id
    pub invoice_id: String,

    /// Provider-hosted page where the recipient pays
    pub invoice_url: String,
}

/// Payment provider trait
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Exchange client credentials for a bearer token
    async fn get_access_token(&self, credentials: &Credentials) -> Result<AccessToken>;

    /// Subscribe `callback_url` to invoice-paid events
    async fn register_webhook(
        &self,
        token: &AccessToken,
        callback_url: &str,
    ) -> Result<WebhookSubscription>;

    /// Create an invoice draft and send it to the recipient
    async fn create_and_send_invoice(
        &self,
        token: &AccessToken,
        draft: &InvoiceDraft,
    ) -> Result<CreatedInvoice>;

    /// Ask the provider to deliver a sample event (non-production only)
    async fn simulate_event(
        &self,
        token: &AccessToken,
        callback_url: &str,
        event_type: &str,
    ) -> Result<()>;

    /// Provider name
    fn name(&self) -> &str;
}
