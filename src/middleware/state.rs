use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::{AuthSettings, SessionAuthConfig};
use crate::oauth::AuthClient;
use crate::refresh::SessionRefresher;

/// Shared state for the session layer and the auth routes.
///
/// Cheap to clone; build once with [`SessionState::new`].
#[derive(Clone)]
pub struct SessionState {
    pub(super) client: Arc<AuthClient>,
    pub(super) refresher: Arc<SessionRefresher>,
    pub(super) settings: Arc<AuthSettings>,
}

impl SessionState {
    #[must_use]
    pub fn new(config: SessionAuthConfig) -> Self {
        let client = Arc::new(config.client);
        let refresher = SessionRefresher::new(client.clone())
            .with_threshold(config.settings.refresh_threshold);

        Self {
            client,
            refresher: Arc::new(refresher),
            settings: Arc::new(config.settings),
        }
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.settings.session_cookie_name
    }

    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.settings.auth_path
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<SessionState> for Key {
    fn from_ref(state: &SessionState) -> Self {
        state.settings.cookie_key.clone()
    }
}
