//! Refresh-on-validate for cookie sessions.
//!
//! Every authenticated request hands its [`SessionRecord`] to
//! [`SessionRefresher::validate`]. If the access token is within the refresh
//! threshold of expiring, the stored refresh token is redeemed at Keycloak's
//! token endpoint and the record is rewritten in place. Any failure rejects
//! the session; the caller signs the user out.
//!
//! There is no cross-request coordination. Two concurrent requests from one
//! browser may both refresh; with refresh-token rotation the loser's next use
//! of the stale token fails like any other rejected refresh.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::oauth::{AuthClient, TokenErrorResponse, TokenResponse};
use crate::session::SessionRecord;

pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::minutes(5);

/// Tokens returned by a successful refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Empty when the provider did not rotate or return a refresh token.
    pub refresh_token: String,
    pub expires_in: u64,
}

impl From<TokenResponse> for RefreshedTokens {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.unwrap_or_default(),
            expires_in: response.expires_in.unwrap_or_default(),
        }
    }
}

/// Result of one refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    Success(RefreshedTokens),
    Failure(RefreshFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailureKind {
    /// No refresh token in the session.
    MissingToken,
    /// Keycloak answered with an OAuth error such as `invalid_grant`.
    RefreshRejected,
    /// The token endpoint could not be reached.
    TransportFault,
    /// Anything else: unstructured error status, undecodable body.
    Unexpected,
}

impl RefreshFailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::RefreshRejected => "refresh_rejected",
            Self::TransportFault => "transport_fault",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for RefreshFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session could not be refreshed.
///
/// Meant for logs only; none of it is shown to the end user.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct RefreshFailure {
    pub kind: RefreshFailureKind,
    pub detail: String,
    /// Provider `error` code, e.g. `invalid_grant`.
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub status: Option<u16>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RefreshFailure {
    fn new(kind: RefreshFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            error: None,
            error_description: None,
            status: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn missing_token() -> Self {
        Self::new(
            RefreshFailureKind::MissingToken,
            "no refresh token found in session cookie",
        )
    }

    #[must_use]
    pub fn transport(error: reqwest::Error) -> Self {
        Self::new(
            RefreshFailureKind::TransportFault,
            format!("error requesting new tokens: {error}"),
        )
        .with_cause(error)
    }

    #[must_use]
    pub fn rejected(status: u16, response: TokenErrorResponse) -> Self {
        let detail = response
            .error_description
            .clone()
            .unwrap_or_else(|| response.error.clone());
        Self {
            error: Some(response.error),
            error_description: response.error_description,
            status: Some(status),
            ..Self::new(RefreshFailureKind::RefreshRejected, detail)
        }
    }

    #[must_use]
    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::new(RefreshFailureKind::Unexpected, detail)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// What the session layer must do after validation.
#[derive(Debug)]
pub enum Validation {
    /// Access token is not near expiry; nothing changed.
    Unchanged,
    /// Tokens were refreshed; the cookie must be re-issued on this response.
    Renewed,
    /// Refresh was needed and failed; the session must be terminated.
    Rejected(RefreshFailure),
}

/// Decides whether a session needs new tokens and obtains them.
pub struct SessionRefresher {
    client: Arc<AuthClient>,
    threshold: Duration,
}

impl SessionRefresher {
    #[must_use]
    pub fn new(client: Arc<AuthClient>) -> Self {
        Self {
            client,
            threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }

    /// Refresh once the access token has at most `threshold` left (default 5 minutes).
    #[must_use]
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// True when the expiry is known and no further away than the threshold.
    ///
    /// An unknown expiry never triggers a refresh.
    #[must_use]
    pub fn is_refresh_required(&self, record: &SessionRecord, now: OffsetDateTime) -> bool {
        record
            .time_remaining(now)
            .is_some_and(|remaining| remaining <= self.threshold)
    }

    pub async fn validate(&self, record: &mut SessionRecord) -> Validation {
        self.validate_at(record, OffsetDateTime::now_utc()).await
    }

    /// [`validate`](Self::validate) against an explicit clock reading.
    ///
    /// On success `expires_at` becomes `now + expires_in`.
    pub async fn validate_at(&self, record: &mut SessionRecord, now: OffsetDateTime) -> Validation {
        if !self.is_refresh_required(record, now) {
            return Validation::Unchanged;
        }

        let outcome = if record.refresh_token.is_empty() {
            RefreshOutcome::Failure(RefreshFailure::missing_token())
        } else {
            tracing::debug!(
                remaining = ?record.time_remaining(now),
                "Access token near expiry, refreshing"
            );
            self.client.refresh(&record.refresh_token).await
        };

        match outcome {
            RefreshOutcome::Success(tokens) => {
                record.apply(tokens, now);
                Validation::Renewed
            }
            RefreshOutcome::Failure(failure) => Validation::Rejected(failure),
        }
    }
}
