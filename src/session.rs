use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::{AuthCallbacks, StorageConfig, StorageConfigUpdate};
use crate::storage::KeyValueStore;
use crate::types::{User, expiry_from};

/// How long a consuming UI should keep a login error on screen before dismissing it.
pub const ERROR_DISPLAY_DURATION: Duration = Duration::from_secs(5);

/// Observable session state. Only [`SessionStore`] can produce one, so
/// `is_authenticated` always equals `user.is_some()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    user: Option<User>,
    is_authenticated: bool,
    is_loading: bool,
    error: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn set_user(&mut self, user: Option<User>) {
        self.is_authenticated = user.is_some();
        self.user = user;
    }
}

/// The persisted allow-list: `user` and `isAuthenticated` only.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    user: Option<User>,
    is_authenticated: bool,
}

/// Single source of truth for the current identity.
///
/// Every mutation serializes `{user, isAuthenticated}` to the key-value store under
/// the configured user key; construction rehydrates from it. Hooks and keys are
/// read at the moment they are used, so [`configure`](Self::configure) takes
/// effect on the next transition. Hooks run after the state lock is released.
pub struct SessionStore {
    state: Mutex<SessionState>,
    storage: Arc<dyn KeyValueStore>,
    keys: Mutex<StorageConfig>,
    callbacks: Mutex<AuthCallbacks>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Rehydrates from `storage`. A missing or unreadable record yields an empty session.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>, keys: StorageConfig, callbacks: AuthCallbacks) -> Self {
        let state = rehydrate(storage.as_ref(), &keys.user_key);
        Self {
            state: Mutex::new(state),
            storage,
            keys: Mutex::new(keys),
            callbacks: Mutex::new(callbacks),
            clock: Arc::new(SystemClock),
        }
    }

    /// Merges storage key and hook updates. Hooks not named in `callbacks` are
    /// kept. A new user key applies from the next write; nothing is migrated.
    pub fn configure(&self, storage: &StorageConfigUpdate, callbacks: &AuthCallbacks) {
        lock(&self.keys).apply(storage);
        lock(&self.callbacks).merge(callbacks);
    }

    #[must_use]
    pub fn storage_keys(&self) -> StorageConfig {
        lock(&self.keys).clone()
    }

    #[must_use]
    pub fn callbacks(&self) -> AuthCallbacks {
        lock(&self.callbacks).clone()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Sets or clears the user and clears any error.
    pub fn set_user(&self, user: Option<User>) {
        let record = {
            let mut state = self.lock();
            state.set_user(user);
            state.error = None;
            persisted(&state)
        };
        self.persist(&record);
    }

    pub fn set_loading(&self, is_loading: bool) {
        self.lock().is_loading = is_loading;
    }

    /// Records a failure. Setting an error also ends the loading phase.
    pub fn set_error(&self, error: Option<String>) {
        let mut state = self.lock();
        if let Some(message) = &error {
            tracing::debug!(error = %message, "Session error set");
        }
        state.error = error;
        state.is_loading = false;
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    /// Authenticates `user`, clears loading and error, then fires `on_login_success`.
    pub fn login(&self, user: User) {
        let record = {
            let mut state = self.lock();
            state.set_user(Some(user.clone()));
            state.is_loading = false;
            state.error = None;
            persisted(&state)
        };
        self.persist(&record);
        tracing::info!(provider = %user.provider, user_id = %user.id, "Login successful");

        let hook = lock(&self.callbacks).on_login_success.clone();
        if let Some(hook) = hook {
            hook(&user);
        }
    }

    /// Clears the session, erases both storage keys, then fires `on_logout`.
    pub fn logout(&self) {
        {
            let mut state = self.lock();
            state.set_user(None);
            state.error = None;
        }
        let keys = self.storage_keys();
        for key in [&keys.user_key, &keys.token_key] {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(key = %key, error = %e, "Failed to erase persisted session");
            }
        }
        tracing::info!("Logged out");

        let hook = lock(&self.callbacks).on_logout.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Replaces the current user's tokens in place. `refresh_token` and the expiry
    /// keep their previous values when not supplied. No-op without a user.
    pub fn update_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) {
        let now = self.clock.now_millis();
        let record = {
            let mut state = self.lock();
            let Some(user) = state.user.as_mut() else {
                return;
            };
            user.access_token = access_token.into();
            if let Some(token) = refresh_token {
                user.refresh_token = Some(token);
            }
            if let Some(secs) = expires_in {
                user.expires_at = Some(expiry_from(now, secs));
            }
            persisted(&state)
        };
        self.persist(&record);
    }

    /// Whether a user is set and their token is unexpired. An expired session is
    /// logged out as a side effect.
    pub fn check_auth(&self) -> bool {
        let now = self.clock.now_millis();
        let expired = {
            let state = self.lock();
            match &state.user {
                None => return false,
                Some(user) => user.is_expired_at(now),
            }
        };

        if expired {
            tracing::info!("Session token expired");
            self.logout();
            return false;
        }
        true
    }

    /// Whether the current token expires within `margin` from now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        let deadline = self.clock.now_millis().saturating_add(margin);
        self.lock()
            .user
            .as_ref()
            .and_then(|user| user.expires_at)
            .is_some_and(|at| at <= deadline)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn persist(&self, record: &PersistedSession) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize session");
                return;
            }
        };
        let key = lock(&self.keys).user_key.clone();
        if let Err(e) = self.storage.set(&key, &json) {
            tracing::warn!(key = %key, error = %e, "Failed to persist session");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn persisted(state: &SessionState) -> PersistedSession {
    PersistedSession {
        user: state.user.clone(),
        is_authenticated: state.is_authenticated,
    }
}

fn rehydrate(storage: &dyn KeyValueStore, key: &str) -> SessionState {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return SessionState::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read persisted session");
            return SessionState::default();
        }
    };

    match serde_json::from_str::<PersistedSession>(&raw) {
        Ok(record) => {
            if record.is_authenticated != record.user.is_some() {
                tracing::warn!(key, "Persisted session flag disagrees with user; using user");
            }
            let mut state = SessionState::default();
            state.set_user(record.user);
            state
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable persisted session");
            SessionState::default()
        }
    }
}
