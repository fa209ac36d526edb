//! Stateless JWT bearer authentication for API routes.
//!
//! Tokens are verified against the realm's JWKS with `jsonwebtoken`; issuer
//! and audience are checked on every request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::claims::{NAME_CLAIM, Principal, ROLE_CLAIM, claims_from_json, enrich_roles};
use crate::error::Error;
use crate::middleware::AuthError;

/// Minimum spacing between key refetches triggered by an unknown `kid`.
pub const DEFAULT_JWKS_REFETCH_INTERVAL: Duration = Duration::from_secs(300);

/// Only asymmetric algorithms; a shared-secret token cannot come from Keycloak's JWKS.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Bearer validation settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BearerConfig {
    pub(crate) issuer: String,
    pub(crate) audience: String,
    pub(crate) role_claim: String,
    pub(crate) name_claim: String,
    pub(crate) leeway_secs: u64,
    pub(crate) jwks_refetch_interval: Duration,
}

impl BearerConfig {
    /// `audience` must equal the API's client id in Keycloak.
    #[must_use]
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            role_claim: ROLE_CLAIM.into(),
            name_claim: NAME_CLAIM.into(),
            leeway_secs: 30,
            jwks_refetch_interval: DEFAULT_JWKS_REFETCH_INTERVAL,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `KEYCLOAK_ISSUER`: realm URL the tokens are issued by
    /// - `KEYCLOAK_AUDIENCE`: expected `aud`
    ///
    /// # Optional env vars
    /// - `KEYCLOAK_ROLE_CLAIM` (default `roles`)
    /// - `KEYCLOAK_NAME_CLAIM` (default `name`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing.
    pub fn from_env() -> Result<Self, Error> {
        let issuer = std::env::var("KEYCLOAK_ISSUER")
            .map_err(|_| Error::Config("KEYCLOAK_ISSUER is required".into()))?;
        let audience = std::env::var("KEYCLOAK_AUDIENCE")
            .map_err(|_| Error::Config("KEYCLOAK_AUDIENCE is required".into()))?;

        let mut config = Self::new(issuer, audience);
        if let Ok(role_claim) = std::env::var("KEYCLOAK_ROLE_CLAIM") {
            config = config.with_role_claim(role_claim);
        }
        if let Ok(name_claim) = std::env::var("KEYCLOAK_NAME_CLAIM") {
            config = config.with_name_claim(name_claim);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_role_claim(mut self, claim: impl Into<String>) -> Self {
        self.role_claim = claim.into();
        self
    }

    #[must_use]
    pub fn with_name_claim(mut self, claim: impl Into<String>) -> Self {
        self.name_claim = claim.into();
        self
    }

    /// Clock skew tolerated on `exp`/`nbf` (default 30 seconds).
    #[must_use]
    pub fn with_leeway_secs(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// At most one JWKS refetch per `interval`, however many unknown `kid`s arrive.
    #[must_use]
    pub fn with_jwks_refetch_interval(mut self, interval: Duration) -> Self {
        self.jwks_refetch_interval = interval;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

struct KeySource {
    http: reqwest::Client,
    jwks_uri: String,
    /// Held for the duration of a refetch; `None` until the first one.
    last_refetch: Mutex<Option<Instant>>,
}

/// Validates bearer tokens and turns them into a [`Principal`].
pub struct BearerValidator {
    config: BearerConfig,
    keys: RwLock<JwkSet>,
    source: Option<KeySource>,
}

impl BearerValidator {
    /// Validator over a fixed key set.
    #[must_use]
    pub fn with_jwks(config: BearerConfig, jwks: JwkSet) -> Self {
        Self {
            config,
            keys: RwLock::new(jwks),
            source: None,
        }
    }

    /// Discover the realm's JWKS through `{issuer}/.well-known/openid-configuration`.
    ///
    /// Keys are re-fetched once whenever a token names an unknown `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`]/[`Error::OAuth`] if discovery or the JWKS fetch
    /// fails, or [`Error::Config`] if the advertised issuer differs from the
    /// configured one.
    pub async fn discover(config: BearerConfig, http: reqwest::Client) -> Result<Self, Error> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer.trim_end_matches('/')
        );
        let document: DiscoveryDocument = fetch_json(&http, &discovery_url, "discovery").await?;

        if document.issuer != config.issuer {
            return Err(Error::Config(format!(
                "issuer mismatch: configured '{}', discovered '{}'",
                config.issuer, document.issuer
            )));
        }

        let jwks: JwkSet = fetch_json(&http, &document.jwks_uri, "jwks").await?;
        tracing::info!(
            issuer = %config.issuer,
            keys = jwks.keys.len(),
            "Loaded signing keys"
        );

        Ok(Self {
            config,
            keys: RwLock::new(jwks),
            source: Some(KeySource {
                http,
                jwks_uri: document.jwks_uri,
                last_refetch: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BearerConfig {
        &self.config
    }

    /// Verify signature, `exp`, `iss` and `aud`, and build the principal.
    ///
    /// The principal is not yet role-enriched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] for any invalid token.
    pub async fn validate(&self, token: &str) -> Result<Principal, Error> {
        let header = decode_header(token).map_err(|e| Error::Token(e.to_string()))?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(Error::Token(format!("algorithm {:?} not accepted", header.alg)));
        }

        let jwk = self.find_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| Error::Token(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.config.leeway_secs;

        let data = decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| Error::Token(e.to_string()))?;

        Ok(Principal::new(claims_from_json(&data.claims))
            .with_claim_types(&self.config.name_claim, &self.config.role_claim))
    }

    async fn find_key(&self, kid: Option<&str>) -> Result<Jwk, Error> {
        if let Some(jwk) = select_key(&*self.keys.read().await, kid) {
            return Ok(jwk);
        }

        let Some(source) = &self.source else {
            return Err(Error::Token(format!("no signing key for kid {kid:?}")));
        };

        // Unknown kid: the realm may have rotated its keys.
        let mut last_refetch = source.last_refetch.lock().await;

        // A concurrent request may have refetched while we waited.
        if let Some(jwk) = select_key(&*self.keys.read().await, kid) {
            return Ok(jwk);
        }

        let interval = self.config.jwks_refetch_interval;
        if (*last_refetch).is_some_and(|at| at.elapsed() < interval) {
            tracing::debug!(kid = ?kid, "Unknown kid, JWKS refetch throttled");
            return Err(Error::Token(format!("no signing key for kid {kid:?}")));
        }
        *last_refetch = Some(Instant::now());

        let jwks: JwkSet = fetch_json(&source.http, &source.jwks_uri, "jwks").await?;
        let found = select_key(&jwks, kid);
        *self.keys.write().await = jwks;

        found.ok_or_else(|| Error::Token(format!("no signing key for kid {kid:?}")))
    }
}

/// A token without `kid` is only accepted when the set holds exactly one key.
fn select_key(jwks: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => jwks.find(kid).cloned(),
        None if jwks.keys.len() == 1 => jwks.keys.first().cloned(),
        None => None,
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    operation: &'static str,
) -> Result<T, Error> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(Error::OAuth {
            operation,
            status: Some(status.as_u16()),
            detail,
        });
    }
    response.json::<T>().await.map_err(Into::into)
}

/// Caller authenticated by `Authorization: Bearer <jwt>`, roles enriched.
///
/// Needs `Arc<BearerValidator>` in the router state. Rejects with
/// `401 Unauthorized` otherwise.
#[derive(Debug, Clone)]
pub struct BearerPrincipal(pub Principal);

impl<S> FromRequestParts<S> for BearerPrincipal
where
    Arc<BearerValidator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let validator = Arc::<BearerValidator>::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AuthError::InvalidBearer)?;

        let mut principal = validator.validate(token).await.map_err(|e| {
            tracing::warn!(error = %e, "Bearer token rejected");
            AuthError::InvalidBearer
        })?;
        enrich_roles(&mut principal);

        Ok(Self(principal))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
