use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

use crate::config::AUTH_REDIRECT_URI;
use crate::models::Session;
use crate::providers::supabase::auth::resolve_expiry;
use crate::providers::{AuthProvider, ProviderError};
use crate::services::keyring::SessionVault;

/// Tokens carried in the fragment of the OAuth redirect.
#[derive(Clone, PartialEq)]
pub struct RedirectTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for RedirectTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectTokens")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parse `parley://auth-callback#access_token=..&refresh_token=..&expires_in=..`.
///
/// An `error_description` in the fragment or the query is reported as the error.
pub fn parse_redirect(uri: &str) -> Result<RedirectTokens> {
    let url = url::Url::parse(uri).context("Sign-in redirect is not a valid URL")?;

    let fragment: Vec<(String, String)> = url
        .fragment()
        .map(|f| {
            url::form_urlencoded::parse(f.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let lookup = |key: &str| {
        fragment
            .iter()
            .chain(query.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    };

    if let Some(reason) = lookup("error_description").or_else(|| lookup("error")) {
        bail!("Sign-in was rejected: {}", reason);
    }

    let Some(access_token) = lookup("access_token") else {
        bail!("Sign-in redirect carried no access token");
    };
    let Some(refresh_token) = lookup("refresh_token") else {
        bail!("Sign-in redirect carried no refresh token");
    };

    Ok(RedirectTokens {
        access_token,
        refresh_token,
        expires_in: lookup("expires_in").and_then(|v| v.parse().ok()),
        expires_at: lookup("expires_at").and_then(|v| v.parse().ok()),
    })
}

/// `exp` claim of a JWT, without verifying the signature.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok()?.exp
}

/// Where the refresh token lives between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn store(&self, refresh_token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl TokenStore for SessionVault {
    async fn load(&self) -> Result<Option<String>> {
        self.load_refresh_token().await
    }

    async fn store(&self, refresh_token: &str) -> Result<()> {
        self.store_refresh_token(refresh_token).await
    }

    async fn clear(&self) -> Result<()> {
        SessionVault::clear(self).await
    }
}

/// Resolves, establishes and ends the signed-in session.
#[derive(Clone)]
pub struct AuthService {
    provider: Arc<dyn AuthProvider>,
    tokens: Option<Arc<dyn TokenStore>>,
}

impl AuthService {
    /// `tokens` is `None` when no Secret Service is reachable; sessions then
    /// last only as long as the process.
    pub fn new(provider: Arc<dyn AuthProvider>, tokens: Option<Arc<dyn TokenStore>>) -> Self {
        Self { provider, tokens }
    }

    pub fn sign_in_url(&self) -> String {
        self.provider.authorize_url(AUTH_REDIRECT_URI)
    }

    /// Resume the previous session, if any. Auth failures mean "signed out";
    /// the stale token is dropped so the next start goes straight to login.
    pub async fn restore(&self) -> Result<Option<Session>> {
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };
        let Some(refresh_token) = tokens.load().await? else {
            tracing::debug!("No stored session");
            return Ok(None);
        };

        match self.provider.refresh_session(&refresh_token).await {
            Ok(session) => {
                self.remember(&session).await;
                tracing::info!("Restored session for user {}", session.user.id);
                Ok(Some(session))
            }
            Err(ProviderError::AuthError(reason)) => {
                tracing::warn!("Stored session rejected: {}", reason);
                if let Err(e) = tokens.clear().await {
                    tracing::warn!("Failed to clear stale session: {:#}", e);
                }
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to refresh session")),
        }
    }

    /// Finish the browser sign-in from the redirect the desktop shell handed us.
    pub async fn complete_sign_in(&self, redirect_uri: &str) -> Result<Session> {
        let redirect = parse_redirect(redirect_uri)?;
        let user = self
            .provider
            .fetch_user(&redirect.access_token)
            .await
            .context("Failed to look up signed-in user")?;

        let expires_at = redirect.expires_at.or_else(|| {
            redirect
                .expires_in
                .is_none()
                .then(|| jwt_expiry(&redirect.access_token))
                .flatten()
        });

        let session = Session {
            expires_at: resolve_expiry(expires_at, redirect.expires_in, Utc::now()),
            access_token: redirect.access_token,
            refresh_token: redirect.refresh_token,
            user,
        };
        self.remember(&session).await;
        tracing::info!("Signed in user {}", session.user.id);
        Ok(session)
    }

    /// Return `session` unchanged while it is valid, otherwise a refreshed one.
    pub async fn ensure_fresh(&self, session: &Session) -> Result<Session> {
        if !session.is_expired() {
            return Ok(session.clone());
        }
        let refreshed = self
            .provider
            .refresh_session(&session.refresh_token)
            .await
            .context("Failed to refresh expired session")?;
        self.remember(&refreshed).await;
        Ok(refreshed)
    }

    /// Revoke server-side (best effort) and forget the stored token.
    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        if let Err(e) = self.provider.sign_out(&session.access_token).await {
            tracing::warn!("Server-side sign-out failed: {}", e);
        }
        if let Some(tokens) = &self.tokens {
            tokens.clear().await?;
        }
        Ok(())
    }

    async fn remember(&self, session: &Session) {
        if let Some(tokens) = &self.tokens {
            if let Err(e) = tokens.store(&session.refresh_token).await {
                tracing::warn!("Failed to persist session: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::UserMetadata;
    use crate::models::User;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryTokens(Mutex<Option<String>>);

    #[async_trait]
    impl TokenStore for MemoryTokens {
        async fn load(&self) -> Result<Option<String>> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn store(&self, refresh_token: &str) -> Result<()> {
            *self.0.lock().unwrap() = Some(refresh_token.to_string());
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    struct FakeProvider {
        accept_refresh: bool,
        signed_out: Mutex<Vec<String>>,
    }

    fn user() -> User {
        User {
            id: "u1".into(),
            email: Some("ada@example.com".into()),
            user_metadata: UserMetadata::default(),
        }
    }

    #[async_trait]
    impl AuthProvider for FakeProvider {
        fn authorize_url(&self, redirect_to: &str) -> String {
            format!("https://auth.example/authorize?redirect_to={}", redirect_to)
        }

        async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
            if !self.accept_refresh {
                return Err(ProviderError::AuthError("Invalid Refresh Token".into()));
            }
            Ok(Session {
                access_token: "fresh-access".into(),
                refresh_token: format!("{}-rotated", refresh_token),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                user: user(),
            })
        }

        async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError> {
            if access_token == "bad" {
                return Err(ProviderError::AuthError("invalid JWT".into()));
            }
            Ok(user())
        }

        async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
            self.signed_out.lock().unwrap().push(access_token.into());
            Err(ProviderError::NetworkError("offline".into()))
        }
    }

    fn service(accept_refresh: bool, stored: Option<&str>) -> (AuthService, Arc<MemoryTokens>) {
        let tokens = Arc::new(MemoryTokens(Mutex::new(stored.map(String::from))));
        let provider = Arc::new(FakeProvider {
            accept_refresh,
            signed_out: Mutex::new(Vec::new()),
        });
        (AuthService::new(provider, Some(tokens.clone())), tokens)
    }

    #[test]
    fn test_parse_redirect_fragment() {
        let tokens = parse_redirect(
            "parley://auth-callback#access_token=abc&refresh_token=def&expires_in=3600&token_type=bearer",
        )
        .unwrap();
        assert_eq!(tokens.access_token, "abc");
        assert_eq!(tokens.refresh_token, "def");
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.expires_at, None);
    }

    #[test]
    fn test_parse_redirect_reports_provider_error() {
        let err = parse_redirect(
            "parley://auth-callback?error=access_denied&error_description=User+cancelled",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Sign-in was rejected: User cancelled");
    }

    #[test]
    fn test_parse_redirect_requires_tokens() {
        assert!(parse_redirect("parley://auth-callback#refresh_token=def").is_err());
        assert!(parse_redirect("parley://auth-callback#access_token=abc").is_err());
        assert!(parse_redirect("not a url").is_err());
    }

    #[test]
    fn test_jwt_expiry_reads_exp_claim() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","exp":1700000000}"#);
        let token = format!("header.{}.signature", payload);
        assert_eq!(jwt_expiry(&token), Some(1_700_000_000));
        assert_eq!(jwt_expiry("opaque-token"), None);
    }

    #[tokio::test]
    async fn test_restore_without_stored_token_is_signed_out() {
        let (auth, _) = service(true, None);
        assert!(auth.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_rotates_refresh_token() {
        let (auth, tokens) = service(true, Some("old"));
        let session = auth.restore().await.unwrap().unwrap();
        assert_eq!(session.access_token, "fresh-access");
        assert_eq!(tokens.load().await.unwrap().as_deref(), Some("old-rotated"));
    }

    #[tokio::test]
    async fn test_restore_rejected_token_is_forgotten() {
        let (auth, tokens) = service(false, Some("revoked"));
        assert!(auth.restore().await.unwrap().is_none());
        assert_eq!(tokens.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_complete_sign_in_stores_session() {
        let (auth, tokens) = service(true, None);
        let session = auth
            .complete_sign_in("parley://auth-callback#access_token=abc&refresh_token=def&expires_in=60")
            .await
            .unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(session.expires_at > Utc::now());
        assert_eq!(tokens.load().await.unwrap().as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn test_complete_sign_in_with_bad_token_fails() {
        let (auth, tokens) = service(true, None);
        let result = auth
            .complete_sign_in("parley://auth-callback#access_token=bad&refresh_token=def")
            .await;
        assert!(result.is_err());
        assert_eq!(tokens.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_server_unreachable() {
        let (auth, tokens) = service(true, Some("old"));
        let session = auth.restore().await.unwrap().unwrap();
        auth.sign_out(&session).await.unwrap();
        assert_eq!(tokens.load().await.unwrap(), None);
    }

    #[test]
    fn test_sign_in_url_uses_app_redirect() {
        let (auth, _) = service(true, None);
        assert!(auth.sign_in_url().ends_with("redirect_to=parley://auth-callback"));
    }
}
