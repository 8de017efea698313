//! Caller authorization for the tenant routes

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::debug;

use super::responses::handle_error;
use super::AppState;
use crate::config::AuthConfig;
use crate::errors::AppError;

/// Admit a request carrying the configured bearer token or coming from an
/// allow-listed address, reject everything else with `401`.
pub async fn require_authorization(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    let caller = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    if is_authorized(&state.config.auth, token, caller.as_deref()) {
        return next.run(request).await;
    }

    debug!(
        "Rejected {} {} from {}",
        request.method(),
        request.uri().path(),
        caller.as_deref().unwrap_or("unknown caller")
    );
    handle_error(AppError::unauthorized("A valid bearer token is required"))
}

pub fn is_authorized(auth: &AuthConfig, token: Option<&str>, caller: Option<&str>) -> bool {
    let token_ok = match (auth.bearer_token.as_deref(), token) {
        (Some(expected), Some(given)) => !expected.is_empty() && expected == given,
        _ => false,
    };
    let caller_ok = caller.is_some_and(|ip| auth.allowed_callers.iter().any(|allowed| allowed == ip));

    token_ok || caller_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthConfig {
        AuthConfig {
            bearer_token: Some("secret".to_string()),
            allowed_callers: vec!["10.0.0.5".to_string()],
        }
    }

    #[test]
    fn test_token_or_allow_listed_caller() {
        let auth = auth();
        assert!(is_authorized(&auth, Some("secret"), None));
        assert!(is_authorized(&auth, None, Some("10.0.0.5")));
        assert!(!is_authorized(&auth, Some("wrong"), Some("10.0.0.6")));
        assert!(!is_authorized(&auth, None, None));
    }

    #[test]
    fn test_no_token_configured() {
        let auth = AuthConfig::default();
        assert!(!is_authorized(&auth, Some(""), None));
        assert!(!is_authorized(&auth, Some("anything"), Some("127.0.0.1")));
    }
}
