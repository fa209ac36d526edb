use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::PrivateCookieJar;
use time::OffsetDateTime;

use super::cookies;
use super::extractor::AccessToken;
use super::state::SessionState;
use crate::claims::{Principal, enrich_roles};
use crate::refresh::Validation;

/// Cookie-session authentication for browser routes.
///
/// Mount with `axum::middleware::from_fn_with_state(state, require_session)`.
/// On every request it:
///
/// 1. loads the session ticket, challenging (redirect to login) if it is
///    missing, unreadable or past its sliding window;
/// 2. refreshes near-expiry tokens, signing the user out if that fails;
/// 3. builds the role-enriched [`Principal`] for handlers;
/// 4. re-issues the cookie after a refresh or past half of the window.
pub async fn require_session(
    State(state): State<SessionState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let settings = &state.settings;
    let now = OffsetDateTime::now_utc();

    let Some(mut ticket) = cookies::get_session_ticket(&jar, &settings.session_cookie_name) else {
        return challenge(&state, request.uri());
    };

    if ticket.is_expired(now) {
        tracing::debug!("Session cookie past its sliding window");
        return sign_out(&state, jar, request.uri());
    }

    let mut renew = match state.refresher.validate_at(&mut ticket.tokens, now).await {
        Validation::Unchanged => false,
        Validation::Renewed => {
            tracing::debug!("Session tokens refreshed");
            true
        }
        Validation::Rejected(failure) => {
            tracing::error!(
                kind = %failure.kind,
                provider_error = failure.error.as_deref().unwrap_or_default(),
                status = ?failure.status,
                error = %failure,
                "Error on getting or refreshing token"
            );
            return sign_out(&state, jar, request.uri());
        }
    };

    if renew || ticket.needs_sliding_renewal(now) {
        ticket.slide(now, settings.session_window);
        renew = true;
    }

    let mut principal = Principal::new(ticket.claims.clone());
    enrich_roles(&mut principal);

    request.extensions_mut().insert(principal);
    request
        .extensions_mut()
        .insert(AccessToken(ticket.tokens.access_token.clone()));

    let response = next.run(request).await;
    if !renew {
        return response;
    }

    match cookies::session_cookie(
        &settings.session_cookie_name,
        &ticket,
        settings.session_window,
        settings.secure_cookies,
    ) {
        Ok(cookie) => {
            let response = (jar.add(cookie), response).into_response();
            cookies::warn_if_oversized(&response, &settings.session_cookie_name);
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to re-issue session cookie");
            response
        }
    }
}

/// Terminate the session and start a fresh login.
fn sign_out(state: &SessionState, jar: PrivateCookieJar, uri: &Uri) -> Response {
    let jar = jar.remove(cookies::clear_session_cookie(
        &state.settings.session_cookie_name,
    ));
    (jar, challenge(state, uri)).into_response()
}

/// Redirect to the login route, remembering where the user was going.
fn challenge(state: &SessionState, uri: &Uri) -> Response {
    let return_to = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let encoded = urlencoding::encode(return_to);
    Redirect::to(&format!(
        "{}/login?return_to={encoded}",
        state.settings.auth_path
    ))
    .into_response()
}
