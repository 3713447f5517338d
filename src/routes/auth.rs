//! HTTP Basic auth for the admin subtree. Credentials come from the
//! injected [`crate::config::Config`], never from ambient process state.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{error::AppError, state::AppState};

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    verify(header, &state.config.admin_user, &state.config.admin_password)?;

    Ok(next.run(request).await)
}

fn verify(header: Option<&str>, user: &str, password: &str) -> Result<(), AppError> {
    let encoded = header
        .and_then(|h| h.strip_prefix("Basic "))
        .ok_or(AppError::Unauthorized)?;

    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(AppError::Unauthorized)?;

    let (got_user, got_password) = decoded.split_once(':').ok_or(AppError::Unauthorized)?;

    if got_user != user || got_password != password {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
    }

    #[test]
    fn valid_credentials_pass() {
        let header = basic("admin", "secret");
        assert!(verify(Some(&header), "admin", "secret").is_ok());
    }

    #[test]
    fn wrong_or_missing_credentials_fail() {
        let wrong = basic("admin", "nope");
        assert!(verify(Some(&wrong), "admin", "secret").is_err());
        assert!(verify(None, "admin", "secret").is_err());
        assert!(verify(Some("Bearer abc"), "admin", "secret").is_err());
        assert!(verify(Some("Basic not-base64!"), "admin", "secret").is_err());
    }
}
