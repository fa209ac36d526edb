use axum_extra::extract::cookie::Key;
use time::Duration;
use url::Url;

use super::error::AuthError;
use crate::environment::{DEFAULT_BACKCHANNEL_TIMEOUT, Environment, backchannel_client};
use crate::oauth::{AuthClient, KeycloakConfig};
use crate::refresh::DEFAULT_REFRESH_THRESHOLD;

/// Cookie and redirect settings, fixed once the state is built.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_window: Duration,
    pub(crate) refresh_threshold: Duration,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) post_logout_redirect_uri: Option<Url>,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "keycloak.cookie".into(),
            session_window: Duration::minutes(60),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            secure_cookies: true,
            auth_path: "/auth".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            post_logout_redirect_uri: None,
            error_redirect: "/".into(),
        }
    }
}

/// Cookie-session authentication configuration.
///
/// Use [`from_env()`](SessionAuthConfig::from_env) for convention-based setup,
/// or [`new()`](SessionAuthConfig::new) with `with_*` methods for full control.
pub struct SessionAuthConfig {
    pub(super) client: AuthClient,
    pub(super) settings: AuthSettings,
}

impl SessionAuthConfig {
    /// Defaults: cookie `keycloak.cookie`, 60 minute sliding window, refresh
    /// 5 minutes before access token expiry, routes under `/auth`.
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            settings: AuthSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `KEYCLOAK_AUTHORITY`: realm URL, e.g. `https://keycloak.dev.local:8443/realms/demo`
    /// - `KEYCLOAK_CLIENT_ID`: OIDC client ID
    /// - `KEYCLOAK_REDIRECT_URI`: callback URL registered in Keycloak
    ///
    /// # Optional env vars
    /// - `KEYCLOAK_CLIENT_SECRET`: confidential client secret
    /// - `KEYCLOAK_SCOPES`: comma-separated scopes
    /// - `KEYCLOAK_POST_LOGOUT_REDIRECT_URI`: where Keycloak returns after logout
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64)
    /// - `DEV_CA_PATH`: development root CA, required when `environment` is development
    ///
    /// Development also turns off the `Secure` cookie flag.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing, URLs are
    /// invalid, or the backchannel client cannot be built.
    pub fn from_env(environment: Environment) -> Result<Self, AuthError> {
        let authority = required_url("KEYCLOAK_AUTHORITY")?;
        let client_id = std::env::var("KEYCLOAK_CLIENT_ID")
            .map_err(|_| AuthError::Config("KEYCLOAK_CLIENT_ID is required".into()))?;
        let redirect_uri = required_url("KEYCLOAK_REDIRECT_URI")?;

        let mut config = KeycloakConfig::new(authority, client_id, redirect_uri)
            .map_err(|e| AuthError::Config(e.to_string()))?;

        if let Ok(secret) = std::env::var("KEYCLOAK_CLIENT_SECRET") {
            config = config.with_client_secret(secret);
        }
        if let Ok(scopes) = std::env::var("KEYCLOAK_SCOPES") {
            config =
                config.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }

        let http = backchannel_client(environment, DEFAULT_BACKCHANNEL_TIMEOUT)
            .map_err(|e| AuthError::Config(e.to_string()))?;

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config("COOKIE_KEY must hold at least 64 bytes of key material".into())
            })?,
            Err(_) => {
                tracing::warn!("COOKIE_KEY not set; sessions will not survive a restart");
                Key::generate()
            }
        };

        let mut auth = Self::new(AuthClient::new(config).with_http_client(http))
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!environment.is_development());

        if let Ok(raw) = std::env::var("KEYCLOAK_POST_LOGOUT_REDIRECT_URI") {
            let url = raw.parse().map_err(|e| {
                AuthError::Config(format!("KEYCLOAK_POST_LOGOUT_REDIRECT_URI: {e}"))
            })?;
            auth = auth.with_post_logout_redirect_uri(url);
        }

        Ok(auth)
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    /// Inactivity timeout; the cookie is re-issued once half of it has passed.
    #[must_use]
    pub fn with_session_window(mut self, window: Duration) -> Self {
        self.settings.session_window = window;
        self
    }

    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.settings.refresh_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    /// Also end the Keycloak SSO session on logout, returning here afterwards.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: Url) -> Self {
        self.settings.post_logout_redirect_uri = Some(uri);
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

fn required_url(var: &str) -> Result<Url, AuthError> {
    let raw = std::env::var(var).map_err(|_| AuthError::Config(format!("{var} is required")))?;
    raw.parse()
        .map_err(|e| AuthError::Config(format!("{var}: {e}")))
}
