//! Invoice Creation Flow
//!
//! Creates and sends an invoice through the provider, then tracks it in
//! the invoice store so later webhook events can be matched to it.

use std::sync::Arc;

use chrono::Utc;
use invoice_core::{InvoiceRecord, InvoiceStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::TokenCache;
use crate::error::{InvoiceFlowError, PaymentError};
use crate::provider::{CreatedInvoice, InvoiceDraft, PaymentProvider};

const DEFAULT_CURRENCY: &str = "USD";

/// Request to invoice a recipient for a fixed amount
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// Amount in the invoice currency, e.g. `"10.00"`
    pub amount: Decimal,

    /// Who the invoice is sent to
    pub recipient_email: String,
}

impl InvoiceRequest {
    pub fn new(amount: Decimal, recipient_email: impl Into<String>) -> Self {
        Self {
            amount,
            recipient_email: recipient_email.into(),
        }
    }

    fn validate(&self) -> Result<(), InvoiceFlowError> {
        if self.amount <= Decimal::ZERO {
            return Err(InvoiceFlowError::InvalidRequest(
                "amount must be positive".into(),
            ));
        }
        if self.amount.normalize().scale() > 2 {
            return Err(InvoiceFlowError::InvalidRequest(
                "amount has more than two decimal places".into(),
            ));
        }

        let email = self.recipient_email.trim();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && !domain.is_empty());
        if !valid_email {
            return Err(InvoiceFlowError::InvalidRequest(format!(
                "invalid recipient email {email:?}"
            )));
        }

        Ok(())
    }
}

/// Invoice creation service
pub struct Invoicer {
    provider: Arc<dyn PaymentProvider>,
    tokens: Arc<TokenCache>,
    store: Arc<InvoiceStore>,
    currency: String,
}

impl Invoicer {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        tokens: Arc<TokenCache>,
        store: Arc<InvoiceStore>,
    ) -> Self {
        Self {
            provider,
            tokens,
            store,
            currency: DEFAULT_CURRENCY.into(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Create, send and track an invoice.
    ///
    /// Provider failures come back as `InvoiceFlowError::Provider` and
    /// nothing is tracked. A tracking failure after the provider accepted
    /// the invoice comes back as `InvoiceFlowError::Persistence`.
    pub async fn create_invoice(
        &self,
        request: InvoiceRequest,
    ) -> Result<CreatedInvoice, InvoiceFlowError> {
        request.validate()?;

        let token = self.tokens.get().await?;
        let draft = InvoiceDraft {
            amount: request.amount,
            currency: self.currency.clone(),
            recipient_email: request.recipient_email.trim().to_string(),
        };

        let invoice = match self.provider.create_and_send_invoice(&token, &draft).await {
            Ok(invoice) => invoice,
            Err(e @ PaymentError::Auth(_)) => {
                // Token revoked or expired early; the next call re-authenticates
                self.tokens.invalidate().await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let record = InvoiceRecord::new(&invoice.invoice_id)
            .with("amount", format!("{:.2}", draft.amount))
            .with("currency", draft.currency.as_str())
            .with("recipient_email", draft.recipient_email.as_str())
            .with("invoice_url", invoice.invoice_url.as_str())
            .with("created_at", Utc::now().to_rfc3339());

        if let Err(source) = self.store.insert(record).await {
            tracing::error!(
                invoice_id = %invoice.invoice_id,
                error = %source,
                "Invoice created remotely but not tracked locally"
            );
            return Err(InvoiceFlowError::Persistence { invoice, source });
        }

        tracing::info!(
            invoice_id = %invoice.invoice_id,
            amount = %draft.amount,
            recipient = %draft.recipient_email,
            "Invoice created and sent"
        );

        Ok(invoice)
    }
}
