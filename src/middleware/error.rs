use axum::http::StatusCode;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::{IntoResponse, Response};

/// Rejections produced by the session layer, the extractors and the auth routes.
///
/// Failures inside the login flow never surface here; the routes answer them
/// with a redirect to the error page.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No principal on the request.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Missing, malformed or rejected bearer token.
    #[error("Invalid bearer token")]
    InvalidBearer,

    /// Authenticated, but lacking a required role.
    #[error("Forbidden")]
    Forbidden,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            Self::InvalidBearer => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, r#"Bearer error="invalid_token""#)],
                self.to_string(),
            )
                .into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            Self::Config(_) => {
                tracing::error!(error = %self, "Authentication misconfigured");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}
