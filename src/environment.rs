use std::time::Duration;

use crate::error::Error;

/// Timeout applied to every backchannel call to Keycloak.
pub const DEFAULT_BACKCHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Hosting environment, read from `APP_ENV`.
///
/// Anything other than an explicit development or staging marker is treated
/// as production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("APP_ENV")
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "staging" => Self::Staging,
            _ => Self::Production,
        }
    }

    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Proof of running in development.
    ///
    /// Development-only facilities such as
    /// [`DevCaTrust`](crate::dev_tls::DevCaTrust) require this guard, so they
    /// cannot be constructed from a production code path.
    #[must_use]
    pub fn development(self) -> Option<Development> {
        self.is_development().then_some(Development { _private: () })
    }
}

/// Guard obtainable only through [`Environment::development`].
#[derive(Debug, Clone, Copy)]
pub struct Development {
    _private: (),
}

/// Build the HTTP client used for backchannel calls to the identity provider.
///
/// In development (with the `dev-tls` feature) the client trusts the local CA
/// at `DEV_CA_PATH`; everywhere else it uses the standard trust store.
///
/// # Errors
///
/// Returns [`Error::Config`] if `DEV_CA_PATH` is unset in development,
/// [`Error::CaNotFound`] / [`Error::Tls`] if the CA cannot be loaded, or
/// [`Error::Http`] if the client cannot be built.
#[cfg_attr(not(feature = "dev-tls"), allow(unused_variables))]
pub fn backchannel_client(
    environment: Environment,
    timeout: Duration,
) -> Result<reqwest::Client, Error> {
    #[cfg(feature = "dev-tls")]
    if let Some(dev) = environment.development() {
        let ca_path = std::env::var("DEV_CA_PATH")
            .map_err(|_| Error::Config("DEV_CA_PATH is required in development".into()))?;
        tracing::info!(ca_path = %ca_path, "Trusting development CA for backchannel calls");
        return crate::dev_tls::DevCaTrust::load(&dev, ca_path)?.http_client(timeout);
    }

    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Error::Http)
}
