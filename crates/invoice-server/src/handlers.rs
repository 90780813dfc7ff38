//! HTTP Handlers

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use invoice_core::InvoiceRecord;
use invoice_payments::{InvoiceFlowError, InvoiceRequest, PaymentError, ReconcileOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Path the webhook subscription points at
pub const WEBHOOK_PATH: &str = "/webhook/paypal";

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub invoices: usize,
    pub unpersisted: usize,
    pub webhook_dedup: bool,
    pub public_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,

    /// Set when the provider created an invoice that is not tracked here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            invoice_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub amount: Decimal,
    pub recipient_email: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInvoiceResponse {
    pub invoice_id: String,
    pub invoice_url: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceRecord>,
    pub unpersisted: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub persisted: usize,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Invoices
        .route("/api/invoices", get(list_invoices).post(create_invoice))
        .route("/api/invoices/flush", post(flush_invoices))
        .route("/api/invoices/{id}", get(get_invoice))
        // Webhooks
        .route("/", post(paypal_webhook))
        .route(WEBHOOK_PATH, post(paypal_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        invoices: state.store.len().await,
        unpersisted: state.store.unpersisted().await.len(),
        webhook_dedup: state.receiver.dedup_enabled(),
        public_url: state.public_url.get().cloned(),
    })
}

/// Create, send and track an invoice
pub async fn create_invoice(
    State(state): State<AppState>,
    payload: Result<Json<CreateInvoiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateInvoiceResponse>), ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(rejection.body_text(), "INVALID_REQUEST")),
        )
    })?;

    let request = InvoiceRequest::new(payload.amount, payload.recipient_email);

    match state.invoicer.create_invoice(request).await {
        Ok(invoice) => Ok((
            StatusCode::CREATED,
            Json(CreateInvoiceResponse {
                invoice_id: invoice.invoice_id,
                invoice_url: invoice.invoice_url,
            }),
        )),
        Err(e) => Err(invoice_error(e)),
    }
}

fn invoice_error(err: InvoiceFlowError) -> ApiError {
    match err {
        InvoiceFlowError::InvalidRequest(reason) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(reason, "INVALID_REQUEST")),
        ),
        InvoiceFlowError::Provider(e) => {
            tracing::error!(error = %e, "Invoice creation failed");
            let (status, code) = match &e {
                PaymentError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "PROVIDER_TIMEOUT"),
                PaymentError::Auth(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_AUTH_ERROR"),
                _ => (StatusCode::BAD_GATEWAY, "INVOICE_CREATION_ERROR"),
            };
            (status, Json(ErrorResponse::new(e.user_message(), code)))
        }
        InvoiceFlowError::Persistence { invoice, source } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!(
                    "Invoice was sent but could not be saved locally: {source}. \
                     Retry with POST /api/invoices/flush."
                ),
                code: "PERSISTENCE_ERROR".into(),
                invoice_id: Some(invoice.invoice_id),
            }),
        ),
    }
}

/// All tracked invoices in creation order
pub async fn list_invoices(State(state): State<AppState>) -> Json<InvoiceListResponse> {
    Json(InvoiceListResponse {
        invoices: state.store.records().await,
        unpersisted: state.store.unpersisted().await,
    })
}

/// Look up a tracked invoice
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    state.store.get(&id).await.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                format!("Invoice {id} is not tracked"),
                "INVOICE_NOT_FOUND",
            )),
        )
    })
}

/// Retry persisting records whose earlier write failed
pub async fn flush_invoices(State(state): State<AppState>) -> Result<Json<FlushResponse>, ApiError> {
    match state.store.flush().await {
        Ok(persisted) => {
            tracing::info!(persisted, "Invoice store flushed");
            Ok(Json(FlushResponse { persisted }))
        }
        Err(e) => {
            tracing::error!(error = %e, "Invoice store flush failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string(), "PERSISTENCE_ERROR")),
            ))
        }
    }
}

/// PayPal webhook endpoint
pub async fn paypal_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let outcome = state.receiver.handle(&body).await.map_err(|e| {
        tracing::warn!(error = %e, bytes = body.len(), "Rejected webhook payload");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.user_message(), "INVALID_EVENT")),
        )
    })?;

    let invoice_id = match &outcome {
        ReconcileOutcome::Paid(record) => Some(record.id.clone()),
        ReconcileOutcome::Unmatched { invoice_id } | ReconcileOutcome::Duplicate { invoice_id } => {
            Some(invoice_id.clone())
        }
        ReconcileOutcome::Ignored { .. } => None,
    };

    Ok(Json(WebhookAck {
        status: outcome.status(),
        invoice_id,
    }))
}
