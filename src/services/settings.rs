use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::models::persona::{self, Persona, STANDARD_ID};

const SETTINGS_KEY: &str = "app_settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub color_scheme: ColorScheme,
    #[serde(default = "default_persona")]
    pub persona_id: String,
}

fn default_persona() -> String {
    STANDARD_ID.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorScheme {
    System,
    Light,
    Dark,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            color_scheme: ColorScheme::System,
            persona_id: default_persona(),
        }
    }
}

impl AppSettings {
    pub fn persona(&self) -> &'static Persona {
        persona::find(&self.persona_id)
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> AppSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable settings: {}", e);
                AppSettings::default()
            }),
            Ok(None) => AppSettings::default(),
            Err(e) => {
                tracing::warn!("Failed to load settings: {}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }
}

pub fn apply_color_scheme(scheme: ColorScheme) {
    adw::StyleManager::default().set_color_scheme(match scheme {
        ColorScheme::System => adw::ColorScheme::Default,
        ColorScheme::Light => adw::ColorScheme::ForceLight,
        ColorScheme::Dark => adw::ColorScheme::ForceDark,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let db = Database::new_in_memory().unwrap();
        let settings = SettingsService::load(&db).await;
        assert_eq!(settings, AppSettings::default());
        assert!(settings.persona().is_standard());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = Database::new_in_memory().unwrap();
        let settings = AppSettings {
            color_scheme: ColorScheme::Dark,
            persona_id: "witty".to_string(),
        };
        SettingsService::save(&db, &settings).await.unwrap();
        let loaded = SettingsService::load(&db).await;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.persona().name, "Witty");
    }

    #[tokio::test]
    async fn test_corrupt_settings_fall_back() {
        let db = Database::new_in_memory().unwrap();
        db.set_setting(SETTINGS_KEY, "{not json").await.unwrap();
        assert_eq!(SettingsService::load(&db).await, AppSettings::default());
    }
}
