//! PayPal REST Client
//!
//! Implements `PaymentProvider` over the PayPal REST API (OAuth2 token,
//! notifications/webhooks, invoicing v2).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::auth::{AccessToken, Credentials};
use crate::error::{PaymentError, Result};
use crate::provider::{
    CreatedInvoice, INVOICE_PAID_EVENT, InvoiceDraft, PaymentProvider, WebhookSubscription,
};

const INVOICE_ITEM_NAME: &str = "Online Payment";
const INVOICE_NOTE: &str = "Thank you for your business.";
const INVOICE_TERMS: &str = "No refunds.";

/// PayPal API environment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayPalEnvironment {
    #[default]
    Sandbox,
    Live,
}

impl PayPalEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            PayPalEnvironment::Sandbox => "https://api-m.sandbox.paypal.com",
            PayPalEnvironment::Live => "https://api-m.paypal.com",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Some(PayPalEnvironment::Sandbox),
            "live" | "production" => Some(PayPalEnvironment::Live),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == PayPalEnvironment::Live
    }
}

/// PayPal client
pub struct PayPalClient {
    http: reqwest::Client,
    base_url: String,
    environment: PayPalEnvironment,
}

impl PayPalClient {
    /// Create a client; every request is bounded by `timeout`
    pub fn new(environment: PayPalEnvironment, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: environment.base_url().to_string(),
            environment,
        })
    }

    /// Point the client at a different API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn find_webhook(
        &self,
        token: &AccessToken,
        callback_url: &str,
    ) -> Result<WebhookSubscription> {
        let response = self
            .http
            .get(self.url("/v1/notifications/webhooks"))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| transport("webhook lookup", e, PaymentError::Subscription))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            return Err(failure.into_error(PaymentError::Subscription));
        }

        let list: WebhookList = response
            .json()
            .await
            .map_err(|e| transport("webhook list", e, PaymentError::Subscription))?;

        list.webhooks
            .into_iter()
            .find(|w| w.url == callback_url)
            .map(WebhookResponse::into_subscription)
            .ok_or_else(|| {
                PaymentError::Subscription(format!(
                    "{callback_url} reported as registered but not listed"
                ))
            })
    }
}

#[async_trait]
impl PaymentProvider for PayPalClient {
    async fn get_access_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(credentials.client_id(), Some(credentials.secret()))
            .header(header::ACCEPT, "application/json")
            .header(header::ACCEPT_LANGUAGE, "en_US")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport("token exchange", e, PaymentError::Auth))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            return Err(PaymentError::Auth(failure.to_string()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| transport("token response", e, PaymentError::Auth))?;

        Ok(AccessToken::new(body.access_token, body.expires_in))
    }

    async fn register_webhook(
        &self,
        token: &AccessToken,
        callback_url: &str,
    ) -> Result<WebhookSubscription> {
        let request = CreateWebhookRequest {
            url: callback_url,
            event_types: vec![EventTypeEntry {
                name: INVOICE_PAID_EVENT.to_string(),
            }],
        };

        let response = self
            .http
            .post(self.url("/v1/notifications/webhooks"))
            .bearer_auth(token.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport("webhook registration", e, PaymentError::Subscription))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;

            if failure.name.as_deref() == Some("WEBHOOK_URL_ALREADY_EXISTS") {
                tracing::info!(url = %callback_url, "Webhook already registered, reusing it");
                return self.find_webhook(token, callback_url).await;
            }

            return Err(failure.into_error(PaymentError::Subscription));
        }

        let webhook: WebhookResponse = response
            .json()
            .await
            .map_err(|e| transport("webhook response", e, PaymentError::Subscription))?;

        Ok(webhook.into_subscription())
    }

    async fn create_and_send_invoice(
        &self,
        token: &AccessToken,
        draft: &InvoiceDraft,
    ) -> Result<CreatedInvoice> {
        let amount = format!("{:.2}", draft.amount);
        let request = DraftInvoiceRequest {
            detail: InvoiceDetail {
                currency_code: &draft.currency,
                note: INVOICE_NOTE,
                terms_and_conditions: INVOICE_TERMS,
            },
            primary_recipients: vec![Recipient {
                billing_info: BillingInfo {
                    email_address: &draft.recipient_email,
                },
            }],
            items: vec![InvoiceItem {
                name: INVOICE_ITEM_NAME,
                quantity: "1",
                unit_amount: Amount {
                    currency_code: &draft.currency,
                    value: &amount,
                },
            }],
        };

        let response = self
            .http
            .post(self.url("/v2/invoicing/invoices"))
            .bearer_auth(token.as_str())
            .header("PayPal-Request-Id", uuid::Uuid::new_v4().to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport("invoice draft", e, PaymentError::InvoiceCreation))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            return Err(failure.into_error(|m| PaymentError::InvoiceCreation(format!("draft: {m}"))));
        }

        let draft_link: LinkResponse = response
            .json()
            .await
            .map_err(|e| transport("invoice draft response", e, PaymentError::InvoiceCreation))?;

        let invoice_id = invoice_id_from_href(&draft_link.href)
            .map(str::to_string)
            .ok_or_else(|| {
                PaymentError::InvoiceCreation(format!("no invoice id in {}", draft_link.href))
            })?;

        tracing::debug!(invoice_id = %invoice_id, "Invoice draft created");

        let response = self
            .http
            .post(self.url(&format!("/v2/invoicing/invoices/{invoice_id}/send")))
            .bearer_auth(token.as_str())
            .json(&SendInvoiceRequest {
                send_to_recipient: true,
            })
            .send()
            .await
            .map_err(|e| transport("invoice send", e, PaymentError::InvoiceCreation))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            return Err(failure.into_error(|m| {
                PaymentError::InvoiceCreation(format!("send {invoice_id}: {m}"))
            }));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport("invoice send response", e, PaymentError::InvoiceCreation))?;

        // 202 Accepted comes back without a body
        let invoice_url = serde_json::from_str::<LinkResponse>(&body)
            .map(|link| link.href)
            .unwrap_or(draft_link.href);

        Ok(CreatedInvoice {
            invoice_id,
            invoice_url,
        })
    }

    async fn simulate_event(
        &self,
        token: &AccessToken,
        callback_url: &str,
        event_type: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url("/v1/notifications/simulate-event"))
            .bearer_auth(token.as_str())
            .json(&SimulateEventRequest {
                url: callback_url,
                event_type,
                resource_version: "1.0",
            })
            .send()
            .await
            .map_err(|e| transport("simulate event", e, PaymentError::SimulateEvent))?;

        if !response.status().is_success() {
            let failure = ApiFailure::read(response).await;
            return Err(failure.into_error(PaymentError::SimulateEvent));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        match self.environment {
            PayPalEnvironment::Sandbox => "paypal-sandbox",
            PayPalEnvironment::Live => "paypal",
        }
    }
}

/// Map a transport failure, keeping timeouts distinct
fn transport(
    operation: &'static str,
    err: reqwest::Error,
    wrap: fn(String) -> PaymentError,
) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Timeout { operation }
    } else {
        wrap(format!("{operation}: {err}"))
    }
}

/// The invoice id is the last path segment of the draft's `href`
fn invoice_id_from_href(href: &str) -> Option<&str> {
    let (_, id) = href.trim_end_matches('/').rsplit_once('/')?;
    (!id.is_empty()).then_some(id)
}

/// Non-2xx answer from the API
struct ApiFailure {
    status: StatusCode,
    name: Option<String>,
    detail: String,
}

impl ApiFailure {
    async fn read(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match serde_json::from_str::<PayPalErrorBody>(&body) {
            Ok(err) => {
                let detail = err
                    .message
                    .or(err.error_description)
                    .unwrap_or_else(|| body.clone());
                Self {
                    status,
                    name: err.name.or(err.error),
                    detail,
                }
            }
            Err(_) => Self {
                status,
                name: None,
                detail: body,
            },
        }
    }
}

impl ApiFailure {
    /// A 401 on a bearer call means the token was revoked or expired early;
    /// it surfaces as `Auth` so callers can drop the cached token
    fn into_error(self, wrap: impl FnOnce(String) -> PaymentError) -> PaymentError {
        if self.status == StatusCode::UNAUTHORIZED {
            PaymentError::Auth(self.to_string())
        } else {
            wrap(self.to_string())
        }
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {name}: {}", self.status, self.detail),
            None => write!(f, "{}: {}", self.status, self.detail),
        }
    }
}

// PayPal API types

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Both error shapes PayPal uses: REST (`name`/`message`) and OAuth
/// (`error`/`error_description`)
#[derive(Debug, Deserialize)]
struct PayPalErrorBody {
    name: Option<String>,
    message: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventTypeEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateWebhookRequest<'a> {
    url: &'a str,
    event_types: Vec<EventTypeEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    id: String,
    url: String,
    #[serde(default)]
    event_types: Vec<EventTypeEntry>,
}

impl WebhookResponse {
    fn into_subscription(self) -> WebhookSubscription {
        WebhookSubscription {
            id: self.id,
            url: self.url,
            event_types: self.event_types.into_iter().map(|e| e.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookList {
    #[serde(default)]
    webhooks: Vec<WebhookResponse>,
}

#[derive(Debug, Serialize)]
struct DraftInvoiceRequest<'a> {
    detail: InvoiceDetail<'a>,
    primary_recipients: Vec<Recipient<'a>>,
    items: Vec<InvoiceItem<'a>>,
}

#[derive(Debug, Serialize)]
struct InvoiceDetail<'a> {
    currency_code: &'a str,
    note: &'a str,
    terms_and_conditions: &'a str,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    billing_info: BillingInfo<'a>,
}

#[derive(Debug, Serialize)]
struct BillingInfo<'a> {
    email_address: &'a str,
}

#[derive(Debug, Serialize)]
struct InvoiceItem<'a> {
    name: &'a str,
    quantity: &'a str,
    unit_amount: Amount<'a>,
}

#[derive(Debug, Serialize)]
struct Amount<'a> {
    currency_code: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendInvoiceRequest {
    send_to_recipient: bool,
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    href: String,
}

#[derive(Debug, Serialize)]
struct SimulateEventRequest<'a> {
    url: &'a str,
    event_type: &'a str,
    resource_version: &'a str,
}
