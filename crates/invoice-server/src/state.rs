//! Application State

use std::sync::{Arc, OnceLock};

use invoice_core::InvoiceStore;
use invoice_payments::{Invoicer, WebhookReceiver};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Cache of invoices created by this process
    pub store: Arc<InvoiceStore>,

    /// Create-and-track flow
    pub invoicer: Arc<Invoicer>,

    /// Paid-event reconciliation
    pub receiver: Arc<WebhookReceiver>,

    /// Set once the tunnel is open
    pub public_url: Arc<OnceLock<String>>,
}

impl AppState {
    pub fn new(store: Arc<InvoiceStore>, invoicer: Arc<Invoicer>, receiver: Arc<WebhookReceiver>) -> Self {
        Self {
            store,
            invoicer,
            receiver,
            public_url: Arc::new(OnceLock::new()),
        }
    }
}
