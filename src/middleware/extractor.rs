use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use super::error::AuthError;
use crate::claims::Principal;

/// The session principal, placed in request extensions by
/// [`require_session`](super::require_session).
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(principal: Principal) -> impl IntoResponse {
///     format!("Hello, {}", principal.name().unwrap_or("user"))
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(principal: Option<Principal>) -> impl IntoResponse {
///     match principal {
///         Some(p) => format!("Hello, {}", p.name().unwrap_or("user")),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Principal {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Principal>().cloned())
    }
}

/// Access token of the current session, for calling downstream APIs.
#[derive(Debug, Clone)]
pub struct AccessToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for AccessToken {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessToken>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

/// `403 Forbidden` unless the principal holds `role`.
///
/// # Errors
///
/// Returns [`AuthError::Forbidden`] when the role is missing.
pub fn require_role(principal: &Principal, role: &str) -> Result<(), AuthError> {
    if principal.is_in_role(role) {
        Ok(())
    } else {
        tracing::debug!(
            subject = principal.subject().unwrap_or_default(),
            role,
            "Missing required role"
        );
        Err(AuthError::Forbidden)
    }
}
