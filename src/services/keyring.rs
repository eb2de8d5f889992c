use std::sync::Arc;

use anyhow::{Context, Result};
use oo7::Keyring;

use crate::config::APP_ID;

const KEYRING_ATTR_APP: &str = "application";
const KEYRING_ATTR_KIND: &str = "kind";
const REFRESH_TOKEN_KIND: &str = "refresh-token";

/// Keeps the auth refresh token in the desktop Secret Service so a session
/// survives restarts without writing credentials to disk ourselves.
#[derive(Debug, Clone)]
pub struct SessionVault {
    keyring: Arc<Keyring>,
}

impl SessionVault {
    pub async fn new() -> Result<Self> {
        let keyring = Keyring::new()
            .await
            .context("Failed to initialize keyring")?;
        Ok(Self {
            keyring: Arc::new(keyring),
        })
    }

    pub async fn store_refresh_token(&self, token: &str) -> Result<()> {
        self.keyring
            .create_item(
                "Parley session",
                &Self::attributes(),
                token,
                true, // replace if exists
            )
            .await
            .context("Failed to store refresh token in keyring")?;

        Ok(())
    }

    pub async fn load_refresh_token(&self) -> Result<Option<String>> {
        let items = self
            .keyring
            .search_items(&Self::attributes())
            .await
            .context("Failed to search keyring")?;

        let Some(item) = items.first() else {
            return Ok(None);
        };

        let secret = item.secret().await.context("Failed to read secret")?;
        let token = String::from_utf8(secret.to_vec()).context("Secret is not valid UTF-8")?;
        Ok(Some(token).filter(|t| !t.is_empty()))
    }

    pub async fn clear(&self) -> Result<()> {
        self.keyring
            .delete(&Self::attributes())
            .await
            .context("Failed to delete refresh token from keyring")?;

        Ok(())
    }

    fn attributes() -> Vec<(&'static str, &'static str)> {
        vec![
            (KEYRING_ATTR_APP, APP_ID),
            (KEYRING_ATTR_KIND, REFRESH_TOKEN_KIND),
        ]
    }
}
