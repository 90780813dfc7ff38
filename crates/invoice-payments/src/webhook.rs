//! Webhook Reconciliation
//!
//! Matches inbound provider events against the invoice store. Only
//! invoices this process created fire the paid side effect; everything
//! else is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use invoice_core::{InvoiceRecord, InvoiceStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dedup::ProcessedEvents;
use crate::error::{PaymentError, Result};
use crate::provider::INVOICE_PAID_EVENT;

/// Inbound event notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event id
    #[serde(default)]
    pub id: Option<String>,

    /// e.g. `INVOICING.INVOICE.PAID`
    #[serde(default)]
    pub event_type: Option<String>,

    /// The resource the event is about
    pub resource: EventResource,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Resource reference carried by an event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventResource {
    /// Invoice identifier
    pub id: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WebhookEvent {
    /// Parse a raw webhook body
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))
    }

    pub fn invoice_id(&self) -> &str {
        &self.resource.id
    }

    /// Event type, treating an absent type as a paid notification
    pub fn effective_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or(INVOICE_PAID_EVENT)
    }

    pub fn is_invoice_paid(&self) -> bool {
        self.effective_type() == INVOICE_PAID_EVENT
    }

    fn dedup_key(&self) -> String {
        format!("{}|{}", self.invoice_id(), self.effective_type())
    }
}

/// What the receiver did with an event
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// A locally created invoice was paid
    Paid(InvoiceRecord),

    /// The invoice id is not one this process created
    Unmatched { invoice_id: String },

    /// Not an invoice-paid event
    Ignored { event_type: String },

    /// Already processed this (invoice, event type) pair
    Duplicate { invoice_id: String },
}

impl ReconcileOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            ReconcileOutcome::Paid(_) => "paid",
            ReconcileOutcome::Unmatched { .. } => "unmatched",
            ReconcileOutcome::Ignored { .. } => "ignored",
            ReconcileOutcome::Duplicate { .. } => "duplicate",
        }
    }
}

/// Side effect for confirmed payments
#[async_trait]
pub trait PaymentListener: Send + Sync {
    async fn invoice_paid(&self, invoice: &InvoiceRecord, event: &WebhookEvent);
}

/// Logs every confirmed payment
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

#[async_trait]
impl PaymentListener for LoggingListener {
    async fn invoice_paid(&self, invoice: &InvoiceRecord, event: &WebhookEvent) {
        tracing::info!(
            invoice_id = %invoice.id,
            event_id = ?event.id,
            amount = ?invoice.get_str("amount"),
            recipient = ?invoice.get_str("recipient_email"),
            "Invoice paid"
        );
    }
}

/// Webhook receiver
pub struct WebhookReceiver {
    store: Arc<InvoiceStore>,
    listener: Arc<dyn PaymentListener>,
    processed: Option<ProcessedEvents>,
}

impl WebhookReceiver {
    pub fn new(store: Arc<InvoiceStore>) -> Self {
        Self {
            store,
            listener: Arc::new(LoggingListener),
            processed: None,
        }
    }

    /// Replace the paid side effect
    pub fn with_listener(mut self, listener: Arc<dyn PaymentListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Skip repeats of an already processed (invoice, event type) pair
    pub fn with_dedup(mut self, processed: ProcessedEvents) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn dedup_enabled(&self) -> bool {
        self.processed.is_some()
    }

    /// Parse and reconcile a raw webhook body
    pub async fn handle(&self, payload: &[u8]) -> Result<ReconcileOutcome> {
        let event = WebhookEvent::parse(payload)?;
        Ok(self.reconcile(&event).await)
    }

    /// Reconcile an event against the invoice store
    pub async fn reconcile(&self, event: &WebhookEvent) -> ReconcileOutcome {
        let invoice_id = event.invoice_id();

        if !event.is_invoice_paid() {
            tracing::debug!(
                event_type = %event.effective_type(),
                invoice_id = %invoice_id,
                "Ignoring webhook event"
            );
            return ReconcileOutcome::Ignored {
                event_type: event.effective_type().to_string(),
            };
        }

        let Some(invoice) = self.store.get(invoice_id).await else {
            tracing::info!(
                invoice_id = %invoice_id,
                event_id = ?event.id,
                "Received invoice but ID did not match cached IDs"
            );
            return ReconcileOutcome::Unmatched {
                invoice_id: invoice_id.to_string(),
            };
        };

        if let Some(processed) = &self.processed {
            if !processed.check_and_record(&event.dedup_key()) {
                tracing::info!(invoice_id = %invoice_id, "Duplicate paid event skipped");
                return ReconcileOutcome::Duplicate {
                    invoice_id: invoice_id.to_string(),
                };
            }
        }

        self.listener.invoice_paid(&invoice, event).await;
        ReconcileOutcome::Paid(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoice_core::MemoryBackend;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        paid: AtomicUsize,
    }

    #[async_trait]
    impl PaymentListener for CountingListener {
        async fn invoice_paid(&self, _invoice: &InvoiceRecord, _event: &WebhookEvent) {
            self.paid.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn store_with(ids: &[&str]) -> Arc<InvoiceStore> {
        let records: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
        let backend = MemoryBackend::with_document(serde_json::to_vec(&records).unwrap());
        Arc::new(InvoiceStore::load(Arc::new(backend)).await.unwrap())
    }

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_parse_minimal_event() {
        let event = WebhookEvent::parse(br#"{"resource":{"id":"INV-001"}}"#).unwrap();
        assert_eq!(event.invoice_id(), "INV-001");
        assert!(event.event_type.is_none());
        assert!(event.is_invoice_paid());
    }

    #[test]
    fn test_parse_keeps_extra_fields() {
        let event = WebhookEvent::parse(&body(json!({
            "id": "WH-58D329510W468432D",
            "event_type": "INVOICING.INVOICE.PAID",
            "resource_type": "invoices",
            "resource": { "id": "INV2-A", "status": "PAID" }
        })))
        .unwrap();

        assert_eq!(event.id.as_deref(), Some("WH-58D329510W468432D"));
        assert_eq!(event.extra["resource_type"], "invoices");
        assert_eq!(event.resource.extra["status"], "PAID");
    }

    #[test]
    fn test_parse_rejects_missing_resource_id() {
        let cases: [&[u8]; 3] = [
            br#"{"event_type":"INVOICING.INVOICE.PAID"}"#,
            br#"{"resource":{}}"#,
            b"not json",
        ];
        for raw in cases {
            assert!(matches!(WebhookEvent::parse(raw), Err(PaymentError::WebhookParse(_))));
        }
    }

    #[tokio::test]
    async fn test_known_invoice_fires_paid_once() {
        let listener = Arc::new(CountingListener::default());
        let receiver = WebhookReceiver::new(store_with(&["INV-001"]).await)
            .with_listener(listener.clone());

        let outcome = receiver
            .handle(br#"{"resource":{"id":"INV-001"}}"#)
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Paid(ref r) if r.id == "INV-001"));
        assert_eq!(outcome.status(), "paid");
        assert_eq!(listener.paid.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_paid() {
        let listener = Arc::new(CountingListener::default());
        let receiver = WebhookReceiver::new(store_with(&[]).await).with_listener(listener.clone());

        let outcome = receiver
            .handle(br#"{"resource":{"id":"UNKNOWN-1"}}"#)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unmatched {
                invoice_id: "UNKNOWN-1".into()
            }
        );
        assert_eq!(listener.paid.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_event_types_ignored() {
        let listener = Arc::new(CountingListener::default());
        let receiver =
            WebhookReceiver::new(store_with(&["INV-001"]).await).with_listener(listener.clone());

        let outcome = receiver
            .handle(&body(json!({
                "event_type": "INVOICING.INVOICE.CANCELLED",
                "resource": { "id": "INV-001" }
            })))
            .await
            .unwrap();

        assert_eq!(outcome.status(), "ignored");
        assert_eq!(listener.paid.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeat_delivery_without_dedup_fires_twice() {
        let listener = Arc::new(CountingListener::default());
        let receiver =
            WebhookReceiver::new(store_with(&["INV-001"]).await).with_listener(listener.clone());
        assert!(!receiver.dedup_enabled());

        let raw = br#"{"resource":{"id":"INV-001"}}"#;
        receiver.handle(raw).await.unwrap();
        receiver.handle(raw).await.unwrap();

        assert_eq!(listener.paid.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeat_delivery_with_dedup_fires_once() {
        let listener = Arc::new(CountingListener::default());
        let receiver = WebhookReceiver::new(store_with(&["INV-001"]).await)
            .with_listener(listener.clone())
            .with_dedup(ProcessedEvents::default());

        let raw = br#"{"resource":{"id":"INV-001"}}"#;
        assert_eq!(receiver.handle(raw).await.unwrap().status(), "paid");
        assert_eq!(receiver.handle(raw).await.unwrap().status(), "duplicate");

        // An explicit paid type is the same event as an absent one
        let typed = body(json!({
            "event_type": "INVOICING.INVOICE.PAID",
            "resource": { "id": "INV-001" }
        }));
        assert_eq!(receiver.handle(&typed).await.unwrap().status(), "duplicate");

        assert_eq!(listener.paid.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_events_do_not_consume_dedup_slot() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(InvoiceStore::load(backend).await.unwrap());
        let listener = Arc::new(CountingListener::default());
        let receiver = WebhookReceiver::new(store.clone())
            .with_listener(listener.clone())
            .with_dedup(ProcessedEvents::default());

        // Paid event races ahead of the local insert
        let raw = br#"{"resource":{"id":"INV-009"}}"#;
        assert_eq!(receiver.handle(raw).await.unwrap().status(), "unmatched");

        store.insert(InvoiceRecord::new("INV-009")).await.unwrap();
        assert_eq!(receiver.handle(raw).await.unwrap().status(), "paid");
        assert_eq!(listener.paid.load(Ordering::SeqCst), 1);
    }
}
