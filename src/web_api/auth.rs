//! Session-cookie auth
//!
//! Standalone middleware: bcrypt password check on login, opaque
//! session tokens in an in-memory store, cookie validation on every
//! /api request. Disabled entirely when WEB_AUTH_ENABLED=false. Kept
//! deliberately out of the capture/queue code paths.

use crate::error::Error;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

const SESSION_COOKIE: &str = "camcap_session";

/// Sessions expire after a day.
const SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

/// In-memory session tokens with expiry.
pub struct SessionStore {
    tokens: RwLock<HashMap<String, Instant>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh token.
    pub async fn create(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let mut tokens = self.tokens.write().await;
        tokens.retain(|_, created| created.elapsed() < SESSION_TTL);
        tokens.insert(token.clone(), Instant::now());
        token
    }

    pub async fn validate(&self, token: &str) -> bool {
        self.tokens
            .read()
            .await
            .get(token)
            .map(|created| created.elapsed() < SESSION_TTL)
            .unwrap_or(false)
    }

    pub async fn remove(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware guarding the /api routes.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let settings = state.settings.current().await;
    if !settings.web_auth_enabled {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(cookie_token);

    match token {
        Some(token) if state.sessions.validate(&token).await => next.run(request).await,
        _ => Error::Unauthorized("login required".to_string()).into_response(),
    }
}

fn cookie_token(header_value: &str) -> Option<String> {
    header_value.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Minimal login form; the dashboard proper is served elsewhere.
pub async fn login_form() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head><meta name="viewport" content="width=device-width, initial-scale=1"><title>CamCap Login</title></head>
<body style="font-family: system-ui, sans-serif; margin: 16px;">
  <h2>CamCap</h2>
  <form method="post" action="/login">
    <input type="password" name="password" placeholder="Password" autofocus>
    <button type="submit">Login</button>
  </form>
</body>
</html>
"#,
    )
}

pub async fn login(
    State(state): State<AppState>,
    Form(request): Form<LoginRequest>,
) -> Response {
    let settings = state.settings.current().await;

    if !settings.web_auth_enabled {
        return Json(serde_json::json!({"ok": true, "auth": "disabled"})).into_response();
    }

    if settings.password_hash.is_empty() {
        tracing::warn!("Login attempted with no password hash configured");
        return Error::Unauthorized("no password configured".to_string()).into_response();
    }

    match bcrypt::verify(&request.password, &settings.password_hash) {
        Ok(true) => {
            let token = state.sessions.create().await;
            tracing::info!("Login succeeded");
            (
                [(
                    header::SET_COOKIE,
                    format!("{}={}; HttpOnly; Path=/; SameSite=Lax", SESSION_COOKIE, token),
                )],
                Json(serde_json::json!({"ok": true})),
            )
                .into_response()
        }
        Ok(false) => {
            tracing::warn!("Login failed: wrong password");
            Error::Unauthorized("invalid password".to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Password verification error");
            Error::Unauthorized("invalid password hash".to_string()).into_response()
        }
    }
}

pub async fn logout(State(state): State<AppState>, request: Request) -> Response {
    if let Some(token) = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(cookie_token)
    {
        state.sessions.remove(&token).await;
    }

    (
        [(
            header::SET_COOKIE,
            format!("{}=; HttpOnly; Path=/; Max-Age=0", SESSION_COOKIE),
        )],
        Json(serde_json::json!({"ok": true})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_validate_until_removed() {
        let store = SessionStore::new();
        let token = store.create().await;
        assert!(store.validate(&token).await);
        assert!(!store.validate("not-a-token").await);

        store.remove(&token).await;
        assert!(!store.validate(&token).await);
    }

    #[test]
    fn cookie_parsing_finds_the_session() {
        assert_eq!(
            cookie_token("a=b; camcap_session=tok123; c=d"),
            Some("tok123".to_string())
        );
        assert_eq!(cookie_token("other=x"), None);
        assert_eq!(cookie_token(""), None);
    }
}
