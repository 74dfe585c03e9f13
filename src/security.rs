use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

pub const KEY_HEADER: &str = "X-Normalizer-Key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, AuthContext>>,
}

/// Who triggered a run. Attached to the request extensions by the middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub caller: String,
    pub key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("NORMALIZER_API_KEYS").unwrap_or_default();
        Self::from_pairs(&raw)
    }

    /// Parses `caller:secret` pairs separated by commas. Falls back to the
    /// local development key when nothing usable is configured.
    pub fn from_pairs(raw: &str) -> Self {
        let mut records = HashMap::new();
        for (idx, token) in raw.split(',').enumerate() {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.splitn(2, ':');
            let caller = parts.next().map(str::trim).filter(|s| !s.is_empty());
            let secret = parts.next().map(str::trim).filter(|s| !s.is_empty());
            match (caller, secret) {
                (Some(caller), Some(secret)) => {
                    records.insert(
                        secret.to_string(),
                        AuthContext {
                            caller: caller.to_string(),
                            key_id: format!("key-{:02}", idx + 1),
                        },
                    );
                }
                // Never echo the entry: it may hold a secret.
                _ => warn!(
                    target = "normalizer.api",
                    entry = idx + 1,
                    "ignored malformed NORMALIZER_API_KEYS entry"
                ),
            }
        }

        if records.is_empty() {
            warn!(
                target = "normalizer.api",
                "NORMALIZER_API_KEYS produced no keys; falling back to local:dev-key"
            );
            records.insert(
                "dev-key".to_string(),
                AuthContext {
                    caller: "local".to_string(),
                    key_id: "key-01".to_string(),
                },
            );
        } else {
            info!(
                target = "normalizer.api",
                key_count = records.len(),
                "loaded API keys"
            );
        }
        Self {
            records: Arc::new(records),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).cloned()
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Normalizer-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}
