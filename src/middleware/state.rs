use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::RouteSettings;
use super::sessions::ClientSessions;

/// Shared state for the login route handlers.
#[derive(Clone)]
pub(super) struct RouteState {
    pub(super) sessions: Arc<ClientSessions>,
    pub(super) settings: RouteSettings,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<RouteState> for Key {
    fn from_ref(state: &RouteState) -> Self {
        state.settings.cookie_key.clone()
    }
}
