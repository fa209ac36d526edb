//! Cookie-session authentication against Keycloak for Axum.
//!
//! The browser signs in through the OpenID Connect authorization-code flow.
//! Claims and tokens then live in an encrypted cookie with a 60 minute
//! sliding window, and access tokens are refreshed shortly before they expire.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use keycloak_session::Environment;
//! use keycloak_session::middleware::{SessionAuthConfig, SessionState, auth_routes, require_session};
//!
//! let state = SessionState::new(SessionAuthConfig::from_env(Environment::from_env())?);
//!
//! let protected = axum::Router::new()
//!     .route("/index", get(index))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), require_session));
//!
//! let app = axum::Router::new().merge(auth_routes(&state)).merge(protected);
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod guard;
mod routes;
mod state;

pub use config::SessionAuthConfig;
pub use error::AuthError;
pub use extractor::{AccessToken, require_role};
pub use guard::require_session;
pub use routes::auth_routes;
pub use state::SessionState;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
