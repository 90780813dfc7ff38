//! Provider Credentials and Access Tokens

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::provider::PaymentProvider;

/// Tokens are refreshed this long before the provider says they expire
const EXPIRY_SKEW_SECS: u64 = 60;

/// Client id + secret used for the client-credentials exchange
pub struct Credentials {
    client_id: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret: SecretString::new(secret.into().into_boxed_str()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::new(self.client_id.clone(), self.secret())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Short-lived bearer token
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Wrap a token the provider said is valid for `expires_in` seconds
    pub fn new(value: impl Into<String>, expires_in: Option<u64>) -> Self {
        let expires_at = expires_in.and_then(|secs| {
            let secs = i64::try_from(secs.saturating_sub(EXPIRY_SKEW_SECS)).ok()?;
            Utc::now().checked_add_signed(chrono::Duration::try_seconds(secs)?)
        });

        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Caches the current access token and re-runs the credential exchange
/// once it expires.
pub struct TokenCache {
    provider: Arc<dyn PaymentProvider>,
    credentials: Credentials,
    cached: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn PaymentProvider>, credentials: Credentials) -> Self {
        Self {
            provider,
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// Current token, fetching a new one if none is cached or it expired
    pub async fn get(&self) -> Result<AccessToken> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.clone());
        }

        let token = self.provider.get_access_token(&self.credentials).await?;
        tracing::info!(
            provider = self.provider.name(),
            client_id = %self.credentials.client_id(),
            expires_at = ?token.expires_at(),
            "Obtained access token"
        );

        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next `get` re-authenticates
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPaymentProvider;

    #[test]
    fn test_debug_output_is_redacted() {
        let credentials = Credentials::new("client", "hunter2");
        let token = AccessToken::new("A21AAF-secret", Some(3600));

        assert!(!format!("{credentials:?}").contains("hunter2"));
        assert!(!format!("{token:?}").contains("A21AAF"));
    }

    #[test]
    fn test_token_expiry() {
        assert!(!AccessToken::new("t", None).is_expired());
        assert!(!AccessToken::new("t", Some(3600)).is_expired());
        // Within the refresh skew counts as expired
        assert!(AccessToken::new("t", Some(30)).is_expired());
    }

    #[tokio::test]
    async fn test_cache_reuses_valid_token() {
        let provider = Arc::new(MockPaymentProvider::new());
        let cache = TokenCache::new(provider.clone(), Credentials::new("id", "secret"));

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(provider.token_requests(), 1);

        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(provider.token_requests(), 2);
    }

    #[tokio::test]
    async fn test_cache_refreshes_expired_token() {
        let provider = Arc::new(MockPaymentProvider::new().with_token_lifetime(Some(10)));
        let cache = TokenCache::new(provider.clone(), Credentials::new("id", "secret"));

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(provider.token_requests(), 2);
    }
}
