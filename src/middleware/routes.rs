use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use time::OffsetDateTime;

use super::cookies::{self, LoginFlow};
use super::state::SessionState;
use crate::claims::{claims_from_json, decode_unverified_payload};
use crate::session::{SessionRecord, SessionTicket};

/// Login, callback and logout routes under the configured auth path.
///
/// Pair with [`require_session`](super::require_session) on the protected routes.
pub fn auth_routes(state: &SessionState) -> Router {
    let auth_path = state.auth_path().to_string();

    Router::new()
        .route(&format!("{auth_path}/login"), get(login))
        .route(&format!("{auth_path}/callback"), get(callback))
        .route(&format!("{auth_path}/logout"), get(logout).post(logout))
        .with_state(state.clone())
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginParams {
    return_to: Option<String>,
}

async fn login(
    State(state): State<SessionState>,
    jar: PrivateCookieJar,
    Query(params): Query<LoginParams>,
) -> Result<(PrivateCookieJar, Redirect), Response> {
    let auth_req = state.client.authorization_url();

    let flow = LoginFlow {
        state: auth_req.state,
        nonce: auth_req.nonce,
        code_verifier: auth_req.code_verifier,
        return_to: params.return_to.filter(|path| is_local_path(path)),
    };

    let cookie = cookies::login_flow_cookie(
        &flow,
        state.settings.secure_cookies,
        &state.settings.auth_path,
    )
    .ok_or_else(|| login_error(&state.settings.error_redirect, "login_failed"))?;

    Ok((jar.add(cookie), Redirect::to(&auth_req.url)))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(state): State<SessionState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Response, Response> {
    let settings = &state.settings;

    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth2 error from Keycloak");
        return Err(login_error(&settings.error_redirect, "provider_error"));
    }

    let code = params
        .code
        .ok_or_else(|| login_error(&settings.error_redirect, "missing_code"))?;

    let flow = cookies::get_login_flow(&jar)
        .ok_or_else(|| login_error(&settings.error_redirect, "state_mismatch"))?;

    if params.state.as_deref() != Some(flow.state.as_str()) {
        tracing::warn!("OAuth state mismatch");
        return Err(login_error(&settings.error_redirect, "state_mismatch"));
    }

    let tokens = state
        .client
        .exchange_code(&code, &flow.code_verifier)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Token exchange failed");
            login_error(&settings.error_redirect, "token_exchange_failed")
        })?;

    // The ID token came straight from the token endpoint over TLS.
    let id_token = tokens.id_token.as_deref().and_then(decode_unverified_payload);
    if let Some(payload) = &id_token {
        let nonce = payload.get("nonce").and_then(|v| v.as_str());
        if nonce != Some(flow.nonce.as_str()) {
            tracing::warn!("ID token nonce mismatch");
            return Err(login_error(&settings.error_redirect, "nonce_mismatch"));
        }
    }

    let payload = id_token
        .or_else(|| decode_unverified_payload(&tokens.access_token))
        .ok_or_else(|| {
            tracing::error!("Token response carried no readable identity");
            login_error(&settings.error_redirect, "invalid_token")
        })?;

    let now = OffsetDateTime::now_utc();
    let record = SessionRecord::new(
        tokens.access_token,
        tokens.refresh_token,
        tokens.expires_in,
        now,
    );
    let ticket = SessionTicket::issue(claims_from_json(&payload), record, now, settings.session_window);

    let session_cookie = cookies::session_cookie(
        &settings.session_cookie_name,
        &ticket,
        settings.session_window,
        settings.secure_cookies,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Session cookie creation failed");
        login_error(&settings.error_redirect, "session_failed")
    })?;

    let jar = jar
        .add(session_cookie)
        .remove(cookies::clear_login_flow_cookie(&settings.auth_path));

    tracing::info!(
        subject = payload.get("sub").and_then(|v| v.as_str()).unwrap_or_default(),
        "Keycloak login successful"
    );

    let target = flow.return_to.as_deref().unwrap_or(&settings.login_redirect);
    let response = (jar, Redirect::to(target)).into_response();
    cookies::warn_if_oversized(&response, &settings.session_cookie_name);
    Ok(response)
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(
    State(state): State<SessionState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let clear_cookie = cookies::clear_session_cookie(&state.settings.session_cookie_name);
    let target = match &state.settings.post_logout_redirect_uri {
        Some(uri) => state.client.end_session_url(uri),
        None => state.settings.logout_redirect.clone(),
    };
    (jar.remove(clear_cookie), Redirect::to(&target))
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{error_redirect}?error={encoded}")).into_response()
}

/// Only same-origin paths; `//host` would be protocol-relative.
///
/// Browsers drop tabs and newlines from URLs, so `/\t/host` also counts as
/// protocol-relative. Anything but printable ASCII is refused, which also
/// keeps the value a valid `Location` header.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && path.bytes().all(|b| b.is_ascii_graphic())
}
