//! Mock Payment Provider
//!
//! For testing and offline demo runs. Hands out sequential invoice ids
//! (`INV-001`, `INV-002`, ...) and records every call it receives.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::auth::{AccessToken, Credentials};
use crate::error::{PaymentError, Result};
use crate::provider::{
    CreatedInvoice, INVOICE_PAID_EVENT, InvoiceDraft, PaymentProvider, WebhookSubscription,
};

/// In-process stand-in for the payment provider
pub struct MockPaymentProvider {
    next_invoice: AtomicUsize,
    token_requests: AtomicUsize,
    token_lifetime: Option<u64>,
    reject_credentials: AtomicBool,
    fail_subscription: AtomicBool,
    fail_invoices: AtomicBool,
    reject_invoice_token: AtomicBool,
    webhooks: Mutex<Vec<String>>,
    simulated: Mutex<Vec<(String, String)>>,
    drafts: Mutex<Vec<InvoiceDraft>>,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self {
            next_invoice: AtomicUsize::new(1),
            token_requests: AtomicUsize::new(0),
            token_lifetime: Some(3600),
            reject_credentials: AtomicBool::new(false),
            fail_subscription: AtomicBool::new(false),
            fail_invoices: AtomicBool::new(false),
            reject_invoice_token: AtomicBool::new(false),
            webhooks: Mutex::new(Vec::new()),
            simulated: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
        }
    }

    /// Lifetime in seconds reported for issued tokens
    pub fn with_token_lifetime(mut self, secs: Option<u64>) -> Self {
        self.token_lifetime = secs;
        self
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    pub fn fail_webhook_registration(&self, fail: bool) {
        self.fail_subscription.store(fail, Ordering::SeqCst);
    }

    pub fn fail_invoice_creation(&self, fail: bool) {
        self.fail_invoices.store(fail, Ordering::SeqCst);
    }

    /// Answer invoice calls as if the bearer token had been revoked
    pub fn reject_invoice_token(&self, reject: bool) {
        self.reject_invoice_token.store(reject, Ordering::SeqCst);
    }

    /// Number of credential exchanges performed
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    /// Callback URLs registered so far
    pub fn registered_webhooks(&self) -> Vec<String> {
        lock(&self.webhooks).clone()
    }

    /// `(callback_url, event_type)` pairs simulated so far
    pub fn simulated_events(&self) -> Vec<(String, String)> {
        lock(&self.simulated).clone()
    }

    /// Invoice drafts received so far
    pub fn drafts(&self) -> Vec<InvoiceDraft> {
        lock(&self.drafts).clone()
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn get_access_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);

        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(PaymentError::Auth(format!(
                "401 Unauthorized: client {} rejected",
                credentials.client_id()
            )));
        }

        Ok(AccessToken::new("mock-access-token", self.token_lifetime))
    }

    async fn register_webhook(
        &self,
        _token: &AccessToken,
        callback_url: &str,
    ) -> Result<WebhookSubscription> {
        if self.fail_subscription.load(Ordering::SeqCst) {
            return Err(PaymentError::Subscription("400 Bad Request: mock failure".into()));
        }

        let mut webhooks = lock(&self.webhooks);
        webhooks.push(callback_url.to_string());

        Ok(WebhookSubscription {
            id: format!("WH-MOCK-{}", webhooks.len()),
            url: callback_url.to_string(),
            event_types: vec![INVOICE_PAID_EVENT.to_string()],
        })
    }

    async fn create_and_send_invoice(
        &self,
        _token: &AccessToken,
        draft: &InvoiceDraft,
    ) -> Result<CreatedInvoice> {
        if self.reject_invoice_token.load(Ordering::SeqCst) {
            return Err(PaymentError::Auth("401 Unauthorized: token revoked".into()));
        }
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(PaymentError::InvoiceCreation(
                "422 Unprocessable Entity: mock failure".into(),
            ));
        }

        lock(&self.drafts).push(draft.clone());

        let n = self.next_invoice.fetch_add(1, Ordering::SeqCst);
        let invoice_id = format!("INV-{n:03}");

        Ok(CreatedInvoice {
            invoice_url: format!("https://www.sandbox.paypal.com/invoice/p/#{invoice_id}"),
            invoice_id,
        })
    }

    async fn simulate_event(
        &self,
        _token: &AccessToken,
        callback_url: &str,
        event_type: &str,
    ) -> Result<()> {
        lock(&self.simulated).push((callback_url.to_string(), event_type.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
