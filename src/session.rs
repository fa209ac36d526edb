//! Cookie-encoded session state.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::claims::Claim;
use crate::error::Error;
use crate::refresh::RefreshedTokens;

/// Tokens held by a browser session.
///
/// `expires_at` is kept as the RFC 3339 string it was stored as; a missing or
/// unparsable value means the expiry is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl SessionRecord {
    /// Record for tokens issued at `now` with a lifetime of `expires_in` seconds.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.unwrap_or_default(),
            expires_at: expires_in.and_then(|secs| expiry_after(now, secs)),
        }
    }

    /// Parsed `expires_at`, if present and well-formed.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
    }

    /// `expires_at - now`; negative once the access token has expired.
    #[must_use]
    pub fn time_remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expires_at().map(|expires_at| expires_at - now)
    }

    /// Replace all three token fields together.
    pub(crate) fn apply(&mut self, tokens: RefreshedTokens, now: OffsetDateTime) {
        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.expires_at = expiry_after(now, tokens.expires_in);
    }
}

fn expiry_after(now: OffsetDateTime, expires_in: u64) -> Option<String> {
    let secs = i64::try_from(expires_in).ok()?;
    now.checked_add(Duration::seconds(secs))?
        .format(&Rfc3339)
        .ok()
}

/// Everything the session cookie carries.
///
/// `issued_at`/`expires_at` bound the cookie's own sliding inactivity window
/// and are unrelated to the access token's expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTicket {
    pub claims: Vec<Claim>,
    pub tokens: SessionRecord,
    #[serde(with = "time::serde::timestamp")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

impl SessionTicket {
    #[must_use]
    pub fn issue(
        claims: Vec<Claim>,
        tokens: SessionRecord,
        now: OffsetDateTime,
        window: Duration,
    ) -> Self {
        Self {
            claims,
            tokens,
            issued_at: now,
            expires_at: now + window,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// More than half of the sliding window has elapsed.
    #[must_use]
    pub fn needs_sliding_renewal(&self, now: OffsetDateTime) -> bool {
        let window = self.expires_at - self.issued_at;
        now - self.issued_at > window / 2
    }

    /// Restart the sliding window at `now`.
    pub fn slide(&mut self, now: OffsetDateTime, window: Duration) {
        self.issued_at = now;
        self.expires_at = now + window;
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the ticket cannot be serialized.
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Config(format!("session ticket: {e}")))
    }

    /// `None` for anything that is not a ticket written by [`encode`](Self::encode).
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}
