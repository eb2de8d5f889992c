use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;

use super::check_status;
use super::models::{RefreshGrant, TokenResponse};
use crate::models::{Session, User};
use crate::providers::traits::AuthProvider;
use crate::providers::types::ProviderError;

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// GoTrue client: OAuth entry point, token refresh, user lookup and sign-out.
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        check_status(response).await
    }
}

/// Absolute expiry from whichever of `expires_at` / `expires_in` the server sent.
pub fn resolve_expiry(
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    expires_at
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(|| {
            now + chrono::Duration::seconds(expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS))
        })
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    fn authorize_url(&self, redirect_to: &str) -> String {
        let base = self.endpoint("authorize");
        match url::Url::parse_with_params(
            &base,
            &[("provider", "google"), ("redirect_to", redirect_to)],
        ) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!("Auth URL {} is not a valid URL: {}", base, e);
                base
            }
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let req = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&RefreshGrant { refresh_token });

        let token: TokenResponse = Self::send(req)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse token: {}", e)))?;

        Ok(Session {
            expires_at: resolve_expiry(token.expires_at, token.expires_in, Utc::now()),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user: token.user,
        })
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let req = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token));

        Self::send(req)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse user: {}", e)))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let req = self
            .client
            .post(self.endpoint("logout"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token));

        Self::send(req).await?;
        Ok(())
    }
}
