use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::pkce;
use crate::refresh::{RefreshFailure, RefreshOutcome, RefreshedTokens};

/// Keycloak client configuration for one realm.
///
/// `authority` is the realm URL, e.g. `https://keycloak.dev.local:8443/realms/demo`.
/// The protocol endpoints are derived from it.
///
/// ```rust,ignore
/// use keycloak_session::oauth::KeycloakConfig;
///
/// let config = KeycloakConfig::new(
///     "https://keycloak.dev.local:8443/realms/demo".parse()?,
///     "web-app",
///     "https://localhost:5002/auth/callback".parse()?,
/// )?
/// .with_client_secret("s3cret");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct KeycloakConfig {
    pub(crate) authority: Url,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) end_session_url: Url,
}

impl KeycloakConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `authority` cannot serve as a base URL.
    pub fn new(
        authority: Url,
        client_id: impl Into<String>,
        redirect_uri: Url,
    ) -> Result<Self, Error> {
        let mut base = authority.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = |name: &str| {
            base.join(&format!("protocol/openid-connect/{name}"))
                .map_err(|e| Error::Config(format!("authority {authority}: {e}")))
        };

        let auth_url = endpoint("auth")?;
        let token_url = endpoint("token")?;
        let end_session_url = endpoint("logout")?;

        Ok(Self {
            auth_url,
            token_url,
            end_session_url,
            authority,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri,
            scopes: vec!["openid".into(), "profile".into()],
        })
    }

    /// Confidential clients authenticate to the token endpoint with a secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Override the requested scopes (default: `["openid", "profile"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// `{authority}/protocol/openid-connect/token`
    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn end_session_url(&self) -> &Url {
        &self.end_session_url
    }
}

/// Keycloak OpenID Connect client.
pub struct AuthClient {
    config: KeycloakConfig,
    http: reqwest::Client,
}

/// Authorization URL plus the values that must survive until the callback.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: KeycloakConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (timeouts, development CA trust, pooling).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    /// Build an authorization-code request with PKCE (S256), state and nonce.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let nonce = pkce::generate_nonce();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::code_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url: url.into(),
            state,
            nonce,
            code_verifier,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the token endpoint returns an error.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, Error> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Redeem a refresh token. Single attempt, never retried.
    ///
    /// Transport faults, provider protocol errors and anything else unexpected
    /// all come back as [`RefreshOutcome::Failure`] with the original cause.
    pub async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = match self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RefreshOutcome::Failure(RefreshFailure::transport(e)),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return RefreshOutcome::Failure(RefreshFailure::transport(e)),
        };

        if status.is_success() {
            return match serde_json::from_slice::<TokenResponse>(&body) {
                Ok(tokens) => RefreshOutcome::Success(RefreshedTokens::from(tokens)),
                Err(e) => RefreshOutcome::Failure(
                    RefreshFailure::unexpected(format!("undecodable token response: {e}"))
                        .with_status(status.as_u16())
                        .with_cause(e),
                ),
            };
        }

        match serde_json::from_slice::<TokenErrorResponse>(&body) {
            Ok(error) => RefreshOutcome::Failure(RefreshFailure::rejected(status.as_u16(), error)),
            Err(_) => RefreshOutcome::Failure(
                RefreshFailure::unexpected(format!(
                    "token endpoint returned {status}: {}",
                    String::from_utf8_lossy(&body)
                ))
                .with_status(status.as_u16()),
            ),
        }
    }

    /// Keycloak end-session URL that returns the browser to
    /// `post_logout_redirect_uri`.
    #[must_use]
    pub fn end_session_url(&self, post_logout_redirect_uri: &Url) -> String {
        let mut url = self.config.end_session_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri.as_str());
        url.into()
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}
