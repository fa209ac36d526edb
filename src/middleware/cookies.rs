use axum::http::header::SET_COOKIE;
use axum::response::Response;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::session::SessionTicket;

const LOGIN_FLOW_COOKIE_NAME: &str = "keycloak.flow";

/// Common per-cookie browser limit, counted over `name=value`.
const BROWSER_COOKIE_LIMIT: usize = 4096;

/// Values the callback needs from the login request that started it.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct LoginFlow {
    pub(super) state: String,
    pub(super) nonce: String,
    pub(super) code_verifier: String,
    pub(super) return_to: Option<String>,
}

/// Short-lived cookie carrying the [`LoginFlow`], scoped to the auth routes.
pub(super) fn login_flow_cookie(
    flow: &LoginFlow,
    secure: bool,
    auth_path: &str,
) -> Option<Cookie<'static>> {
    let value = serde_json::to_string(flow).ok()?;
    Some(
        Cookie::build((LOGIN_FLOW_COOKIE_NAME, value))
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .path(auth_path.to_string())
            .max_age(Duration::minutes(5))
            .build(),
    )
}

pub(super) fn clear_login_flow_cookie(auth_path: &str) -> Cookie<'static> {
    Cookie::build((LOGIN_FLOW_COOKIE_NAME, ""))
        .path(auth_path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

pub(super) fn get_login_flow(jar: &PrivateCookieJar) -> Option<LoginFlow> {
    jar.get(LOGIN_FLOW_COOKIE_NAME)
        .and_then(|c| serde_json::from_str(c.value()).ok())
}

/// Session cookie holding the serialized ticket.
pub(super) fn session_cookie(
    name: &str,
    ticket: &SessionTicket,
    window: Duration,
    secure: bool,
) -> Result<Cookie<'static>, crate::error::Error> {
    let value = ticket.encode()?;
    Ok(Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(window)
        .build())
}

/// Size of the `name=value` pair a response sets for `name`, as sent on the wire.
///
/// Measured after the private jar has sealed, base64-encoded and
/// percent-encoded the value.
fn set_cookie_len(response: &Response, name: &str) -> Option<usize> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&prefix))
        .filter_map(|v| v.split(';').next())
        .map(str::len)
        .max()
}

/// Log when the cookie set for `name` outgrows what browsers reliably store.
pub(super) fn warn_if_oversized(response: &Response, name: &str) {
    if let Some(size) = set_cookie_len(response, name).filter(|&size| size > BROWSER_COOKIE_LIMIT) {
        tracing::warn!(
            cookie = name,
            size,
            limit = BROWSER_COOKIE_LIMIT,
            "Session cookie exceeds common browser limits"
        );
    }
}

/// Create removal cookie for session.
pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// The session ticket, if the cookie is present, decrypts and parses.
pub(super) fn get_session_ticket(jar: &PrivateCookieJar, name: &str) -> Option<SessionTicket> {
    jar.get(name).and_then(|c| SessionTicket::decode(c.value()))
}
