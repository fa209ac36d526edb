#![doc = include_str!("../README.md")]

#[cfg(feature = "bearer")]
pub mod bearer;
pub mod claims;
#[cfg(feature = "dev-tls")]
pub mod dev_tls;
pub mod environment;
pub mod error;
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod refresh;
pub mod session;

// Re-exports for convenient access
#[cfg(feature = "bearer")]
pub use bearer::{BearerConfig, BearerPrincipal, BearerValidator};
pub use claims::{Claim, Principal, enrich_roles};
#[cfg(feature = "dev-tls")]
pub use dev_tls::DevCaTrust;
pub use environment::{Development, Environment, backchannel_client};
pub use error::Error;
pub use oauth::{AuthClient, AuthorizationRequest, KeycloakConfig, TokenResponse};
pub use refresh::{
    RefreshFailure, RefreshFailureKind, RefreshOutcome, RefreshedTokens, SessionRefresher,
    Validation,
};
pub use session::{SessionRecord, SessionTicket};
