//! Authentication middleware.
//!
//! Bearer token extraction. Without a configured `AUTH_SECRET` every request
//! is let through as anonymous; with one, the token must match it.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or "anonymous"
    pub token: String,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token == "anonymous"
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let secret = state.config.auth_secret.as_deref();

        match (auth_header, secret) {
            (None, None) => Ok(AuthUser {
                token: "anonymous".to_string(),
            }),
            (None, Some(_)) => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
            (Some(header), secret) => {
                let Some(token) = header.strip_prefix("Bearer ") else {
                    return Err((
                        StatusCode::UNAUTHORIZED,
                        "Invalid authorization header format",
                    ));
                };
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                if secret.is_some_and(|secret| secret != token) {
                    tracing::debug!("Rejected bearer token");
                    return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
                }
                Ok(AuthUser {
                    token: token.to_string(),
                })
            }
        }
    }
}
