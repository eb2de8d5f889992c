use thiserror::Error;

pub const APP_ID: &str = "com.parley.Parley";
pub const APP_NAME: &str = "Parley";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Redirect target handed to the auth provider; the desktop file registers
/// the `parley` scheme so the shell routes it back through GApplication::open.
pub const AUTH_REDIRECT_URI: &str = "parley://auth-callback";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
}

/// Endpoints of the hosted collaborators, read once at startup.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub backend_url: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |primary: &'static str, fallback: &'static str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(primary))
        };

        Ok(Self {
            backend_url: normalize_base_url(&read("PARLEY_BACKEND_URL", "BACKEND_URL")?),
            supabase_url: normalize_base_url(&read("PARLEY_SUPABASE_URL", "SUPABASE_URL")?),
            supabase_anon_key: read("PARLEY_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY")?,
        })
    }
}

/// Strip one trailing slash and default to `https://` when no scheme is given.
pub fn normalize_base_url(raw: &str) -> String {
    let raw = raw.trim();
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    if trimmed.is_empty() || trimmed.starts_with("http") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_strips_single_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://api.example.com/"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com//"),
            "https://api.example.com/"
        );
    }

    #[test]
    fn test_normalize_adds_scheme() {
        assert_eq!(
            normalize_base_url("chatbot-backend.example.com/"),
            "https://chatbot-backend.example.com"
        );
        assert_eq!(
            normalize_base_url("http://localhost:8000"),
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_from_lookup_uses_fallback_keys() {
        let vars: HashMap<&str, &str> = [
            ("BACKEND_URL", "backend.example.com"),
            ("PARLEY_SUPABASE_URL", "https://xyz.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]
        .into_iter()
        .collect();

        let config =
            BackendConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.backend_url, "https://backend.example.com");
        assert_eq!(config.supabase_url, "https://xyz.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon");
    }

    #[test]
    fn test_from_lookup_reports_missing_key() {
        let err = BackendConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PARLEY_BACKEND_URL")));
    }
}
