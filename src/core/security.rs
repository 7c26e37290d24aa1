use std::env;
use std::fs;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

const API_KEY_HEADER: &str = "x-api-key";
const USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_USER: &str = "local";

#[derive(Debug, Clone)]
pub struct SessionToken {
    value: String,
}

impl SessionToken {
    pub fn value(&self) -> &str {
        &self.value
    }
}

pub fn init_session_token(paths: &AppPaths) -> SessionToken {
    if let Ok(token) = env::var("INSIGHT_SESSION_TOKEN") {
        if !token.trim().is_empty() {
            return SessionToken { value: token };
        }
    }

    let token = format!("{}{}", Uuid::new_v4(), Uuid::new_v4());
    if let Some(parent) = paths.token_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(err) = fs::write(&paths.token_path, &token) {
        tracing::warn!("Failed to write session token: {}", err);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(&paths.token_path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = fs::set_permissions(&paths.token_path, perms);
        }
    }

    SessionToken { value: token }
}

/// Rejects the request before any work happens when the api key is missing
/// or wrong.
pub fn require_api_key(headers: &HeaderMap, token: &SessionToken) -> Result<(), ApiError> {
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || provided != token.value() {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

/// Caller identity, taken from the `x-user-id` header after the api-key
/// check. Identity providers are out of scope; this is the ownership key for
/// conversations and messages.
pub fn caller_user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn token() -> SessionToken {
        SessionToken {
            value: "secret".to_string(),
        }
    }

    #[test]
    fn missing_key_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            require_api_key(&headers, &token()),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_key_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("nope"));
        assert!(require_api_key(&headers, &token()).is_err());
    }

    #[test]
    fn correct_key_passes() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(require_api_key(&headers, &token()).is_ok());
    }

    #[test]
    fn user_id_defaults_to_local() {
        let headers = HeaderMap::new();
        assert_eq!(caller_user_id(&headers), "local");

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(caller_user_id(&headers), "alice");
    }
}
