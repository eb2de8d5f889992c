use serde::{Deserialize, Serialize};

use crate::models::User;

#[derive(Debug, Serialize)]
pub struct NewChat<'a> {
    pub user_id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub struct TitlePatch<'a> {
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

/// Union of the error shapes PostgREST and GoTrue reply with.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
            .filter(|m| !m.is_empty())
    }
}
