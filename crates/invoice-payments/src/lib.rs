//! # invoice-payments
//!
//! PayPal invoicing and webhook reconciliation.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  create + send   ┌──────────────┐
//! │   Invoicer   │─────────────────▶│    PayPal    │
//! │              │◀─────────────────│   REST API   │
//! └──────┬───────┘   invoice id     └──────┬───────┘
//!        │ insert                          │ INVOICING.INVOICE.PAID
//!        ▼                                 ▼
//! ┌──────────────┐     get(id)      ┌──────────────────┐
//! │ InvoiceStore │◀─────────────────│ WebhookReceiver  │──▶ PaymentListener
//! └──────────────┘                  └──────────────────┘
//! ```
//!
//! Only invoices found in the store fire the paid side effect. Events
//! for anything else are logged and dropped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invoice_payments::{Credentials, Invoicer, PayPalClient, PayPalEnvironment, TokenCache};
//!
//! let provider = Arc::new(PayPalClient::new(PayPalEnvironment::Sandbox, timeout)?);
//! let tokens = Arc::new(TokenCache::new(provider.clone(), credentials));
//! let invoicer = Invoicer::new(provider, tokens, store.clone());
//!
//! let invoice = invoicer.create_invoice(InvoiceRequest::new(dec!(10.00), "payer@example.com")).await?;
//! // Send the payer to: invoice.invoice_url
//! ```
//!
//! Inbound webhook calls are NOT authenticated. Anyone who learns the
//! public callback URL can forge a paid notification for a known id.

mod auth;
mod dedup;
mod error;
mod invoicing;
pub mod mock;
mod paypal;
mod provider;
mod webhook;

pub use auth::{AccessToken, Credentials, TokenCache};
pub use dedup::ProcessedEvents;
pub use error::{InvoiceFlowError, PaymentError, Result};
pub use invoicing::{InvoiceRequest, Invoicer};
pub use paypal::{PayPalClient, PayPalEnvironment};
pub use provider::{CreatedInvoice, INVOICE_PAID_EVENT, InvoiceDraft, PaymentProvider, WebhookSubscription};
pub use webhook::{
    EventResource, LoggingListener, PaymentListener, ReconcileOutcome, WebhookEvent,
    WebhookReceiver,
};
