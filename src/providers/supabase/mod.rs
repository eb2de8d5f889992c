pub mod auth;
pub mod models;
pub mod rest;

pub use auth::SupabaseAuth;
pub use rest::SupabaseRest;

use reqwest::StatusCode;

use self::models::ApiErrorBody;
use crate::providers::types::ProviderError;

pub(crate) fn error_from_response(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(ApiErrorBody::into_message)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProviderError::AuthError(message)
    } else {
        ProviderError::RequestFailed(message)
    }
}

pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(error_from_response(status, &body))
}
