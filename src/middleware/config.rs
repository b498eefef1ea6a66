use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::Key;

use super::sessions::ClientSessions;
use crate::callback::{CallbackSettings, DEFAULT_FAILURE_DELAY};
use crate::config::{AuthConfig, DEFAULT_ORIGIN};
use crate::error::Error;
use crate::guard::DEFAULT_LOGIN_PATH;
use crate::manager::AuthManager;
use crate::navigation::DetachedNavigator;
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

/// Paths and cookie settings for [`auth_routes`](super::auth_routes).
///
/// Use [`from_env()`](RouteSettings::from_env) for convention-based setup, or
/// [`new()`](RouteSettings::new) with `with_*` methods for full control.
#[derive(Clone)]
pub struct RouteSettings {
    pub(crate) cookie_key: Key,
    pub(crate) secure_cookies: bool,
    pub(crate) login_path: String,
    pub(crate) home_path: String,
    pub(crate) auth_path: String,
    pub(crate) logout_path: String,
    pub(crate) failure_delay: Duration,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self::new(Key::generate())
    }
}

impl RouteSettings {
    #[must_use]
    pub fn new(cookie_key: Key) -> Self {
        Self {
            cookie_key,
            secure_cookies: true,
            login_path: DEFAULT_LOGIN_PATH.into(),
            home_path: "/".into(),
            auth_path: "/auth".into(),
            logout_path: "/logout".into(),
            failure_delay: DEFAULT_FAILURE_DELAY,
        }
    }

    /// Create settings from environment variables.
    ///
    /// # Optional env vars
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64). Ephemeral if unset.
    /// - `APP_ORIGIN`: secure cookies are only issued for an `https` origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `COOKIE_KEY` is set but too short.
    pub fn from_env() -> Result<Self, Error> {
        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                Error::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => Key::generate(),
        };
        let origin = std::env::var("APP_ORIGIN").unwrap_or_else(|_| DEFAULT_ORIGIN.into());

        Ok(Self::new(cookie_key).with_secure_cookies(origin.starts_with("https://")))
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.home_path = path.into();
        self
    }

    /// Prefix of the per-provider callback routes: `{auth_path}/{provider}/callback`.
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    #[must_use]
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    pub(crate) fn callback_settings(&self) -> CallbackSettings {
        CallbackSettings::default()
            .with_success_redirect(self.home_path.clone())
            .with_login_path(self.login_path.clone())
            .with_failure_delay(self.failure_delay)
    }
}

/// Builds the per-browser sessions for a server host from the environment.
///
/// Reads everything [`AuthConfig::from_env`] does, plus `AUTH_STORE_DIR`: when set,
/// client sessions are persisted to JSON files there, otherwise they live in memory.
///
/// # Errors
///
/// Returns [`Error::Config`] for invalid provider settings, or [`Error::Storage`]
/// if the store directory cannot be created.
pub fn sessions_from_env() -> Result<Arc<ClientSessions>, Error> {
    let config = AuthConfig::from_env()?;
    let storage: Arc<dyn KeyValueStore> = match std::env::var("AUTH_STORE_DIR") {
        Ok(dir) => Arc::new(FileStore::open(dir)?),
        Err(_) => Arc::new(MemoryStore::new()),
    };
    let template_session = Arc::new(SessionStore::new(
        Arc::new(MemoryStore::new()),
        config.storage.clone(),
        config.callbacks.clone(),
    ));
    let template = AuthManager::new(config, template_session, Arc::new(DetachedNavigator));
    template.initialize();
    Ok(Arc::new(ClientSessions::new(Arc::new(template), storage)))
}
