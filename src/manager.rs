use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{AuthConfig, AuthConfigUpdate};
use crate::error::Error;
use crate::navigation::Navigator;
use crate::provider::{GoogleProvider, KakaoProvider, OAuthProvider};
use crate::session::SessionStore;
use crate::types::{ProviderId, User};

type Registry = BTreeMap<ProviderId, Arc<dyn OAuthProvider>>;

/// How long a claimed authorization code is remembered. Google and Kakao codes
/// expire well within this window.
pub const CODE_CLAIM_TTL: Duration = Duration::from_secs(600);

/// Authorization codes already handed to an exchange, with their claim time.
#[derive(Debug, Default)]
struct CodeLedger {
    claims: HashMap<(ProviderId, String), i64>,
}

impl CodeLedger {
    /// Drops claims older than [`CODE_CLAIM_TTL`], then records `code`.
    fn claim(&mut self, id: ProviderId, code: &str, now: i64) -> bool {
        let ttl = i64::try_from(CODE_CLAIM_TTL.as_millis()).unwrap_or(i64::MAX);
        self.claims
            .retain(|_, claimed_at| now.saturating_sub(*claimed_at) < ttl);

        match self.claims.entry((id, code.to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}

/// Provider registry and login orchestration.
///
/// The registry is built once, on [`initialize`](Self::initialize) or first use,
/// from the providers whose client id is non-empty. Later calls to `initialize`
/// are no-ops.
pub struct AuthManager {
    config: Mutex<AuthConfig>,
    injected: Mutex<Registry>,
    registry: OnceLock<Registry>,
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    consumed_codes: Arc<Mutex<CodeLedger>>,
}

impl AuthManager {
    #[must_use]
    pub fn new(config: AuthConfig, session: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            config: Mutex::new(config),
            injected: Mutex::new(Registry::new()),
            registry: OnceLock::new(),
            session,
            navigator,
            consumed_codes: Arc::new(Mutex::new(CodeLedger::default())),
        }
    }

    /// A manager for another session that shares this one's providers, navigator
    /// and code ledger. Builds the registry first if needed.
    #[must_use]
    pub fn for_session(&self, session: Arc<SessionStore>) -> Self {
        let registry = self.registry().clone();
        Self {
            config: Mutex::new(lock(&self.config).clone()),
            injected: Mutex::new(Registry::new()),
            registry: OnceLock::from(registry),
            session,
            navigator: Arc::clone(&self.navigator),
            consumed_codes: Arc::clone(&self.consumed_codes),
        }
    }

    /// Registers `adapter` at initialization in place of the one built from config.
    #[must_use]
    pub fn with_provider(self, adapter: Arc<dyn OAuthProvider>) -> Self {
        lock(&self.injected).insert(adapter.id(), adapter);
        self
    }

    /// Merges `update` into the configuration. Provider changes only take effect
    /// if the registry has not been built yet. Hooks and storage keys apply to
    /// the session immediately.
    pub fn configure(&self, update: AuthConfigUpdate) {
        if self.is_initialized() && !update.providers.is_empty() {
            tracing::warn!("Provider configuration changed after initialization; registry unchanged");
        }
        self.session.configure(&update.storage, &update.callbacks);
        lock(&self.config).configure(update);
    }

    pub fn initialize(&self) {
        self.registry();
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.registry.get().is_some()
    }

    fn registry(&self) -> &Registry {
        self.registry.get_or_init(|| self.build_registry())
    }

    fn build_registry(&self) -> Registry {
        let mut registry = Registry::new();
        {
            let config = lock(&self.config);
            for (id, provider_config) in config.configured_providers() {
                let adapter: Arc<dyn OAuthProvider> = match id {
                    ProviderId::Google => Arc::new(GoogleProvider::new(provider_config.clone())),
                    ProviderId::Kakao => Arc::new(KakaoProvider::new(provider_config.clone())),
                };
                registry.insert(id, adapter);
            }
        }
        registry.extend(std::mem::take(&mut *lock(&self.injected)));

        tracing::info!(providers = ?registry.keys().collect::<Vec<_>>(), "Auth providers initialized");
        registry
    }

    #[must_use]
    pub fn provider(&self, id: ProviderId) -> Option<Arc<dyn OAuthProvider>> {
        self.registry().get(&id).cloned()
    }

    #[must_use]
    pub fn is_provider_configured(&self, id: ProviderId) -> bool {
        self.registry().contains_key(&id)
    }

    #[must_use]
    pub fn configured_providers(&self) -> BTreeSet<ProviderId> {
        self.registry().keys().copied().collect()
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    #[must_use]
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Authorization URL for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotConfigured`] if no adapter is registered for `id`.
    pub fn authorization_url(&self, id: ProviderId) -> Result<String, Error> {
        self.provider(id)
            .map(|adapter| adapter.authorization_url())
            .ok_or(Error::ProviderNotConfigured(id))
    }

    /// Navigates to the provider's authorization page. Nothing meaningful runs after
    /// the navigation in a browser host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotConfigured`] if no adapter is registered for `id`.
    pub fn login(&self, id: ProviderId) -> Result<(), Error> {
        let url = self.authorization_url(id)?;
        tracing::info!(provider = %id, "Redirecting to provider authorization");
        self.navigator.navigate(&url);
        Ok(())
    }

    /// Marks `code` as consumed for `id`. Returns `false` if it already was
    /// within the last [`CODE_CLAIM_TTL`].
    pub fn claim_code(&self, id: ProviderId, code: &str) -> bool {
        let now = self.session.clock().now_millis();
        lock(&self.consumed_codes).claim(id, code, now)
    }

    /// Exchanges `code` and logs the resulting user in.
    ///
    /// On failure the session error is set, `on_login_error` fires, and the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotConfigured`] or [`Error::Authentication`].
    pub async fn handle_callback(&self, id: ProviderId, code: &str) -> Result<User, Error> {
        let Some(adapter) = self.provider(id) else {
            let err = Error::ProviderNotConfigured(id);
            self.record_login_failure(&err);
            return Err(err);
        };

        self.session.set_loading(true);
        match adapter.handle_callback(code, self.session.clock()).await {
            Ok(user) => {
                self.session.login(user.clone());
                Ok(user)
            }
            Err(err) => {
                self.record_login_failure(&err);
                Err(err)
            }
        }
    }

    /// Sets the session error and fires `on_login_error`.
    pub(crate) fn record_login_failure(&self, err: &Error) {
        self.session.set_error(Some(err.to_string()));
        let hook = lock(&self.config).callbacks.on_login_error.clone();
        if let Some(hook) = hook {
            hook(err);
        }
    }

    /// Revokes the current token when the provider supports it, then always logs
    /// the session out. Revocation failures are only logged.
    pub async fn logout(&self) {
        if let Some(user) = self.session.user() {
            self.revoke_quietly(&user).await;
        }
        self.session.logout();
    }

    async fn revoke_quietly(&self, user: &User) {
        if user.access_token.is_empty() {
            return;
        }
        let Some(adapter) = self.provider(user.provider) else {
            return;
        };
        if !adapter.supports_revocation() {
            return;
        }
        if let Err(e) = adapter.revoke_token(&user.access_token).await {
            tracing::warn!(provider = %user.provider, error = %e, "Failed to revoke token");
        }
    }

    /// Mints a new access token from the session's refresh token and applies it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshUnavailable`] without a session, refresh token, or
    /// refresh-capable provider, or the provider's refresh failure.
    pub async fn refresh_session(&self) -> Result<User, Error> {
        let user = self
            .session
            .user()
            .ok_or(Error::RefreshUnavailable("no active session"))?;
        let refresh_token = user
            .refresh_token
            .clone()
            .ok_or(Error::RefreshUnavailable("session has no refresh token"))?;
        let adapter = self
            .provider(user.provider)
            .ok_or(Error::ProviderNotConfigured(user.provider))?;
        if !adapter.supports_refresh() {
            return Err(Error::RefreshUnavailable("provider does not support token refresh"));
        }

        let tokens = adapter.refresh_access_token(&refresh_token).await?;
        self.session
            .update_tokens(tokens.access_token, tokens.refresh_token, tokens.expires_in);
        tracing::info!(provider = %user.provider, "Session tokens refreshed");

        self.session
            .user()
            .ok_or(Error::RefreshUnavailable("session ended during refresh"))
    }

    /// Refreshes only when the current token expires within `margin`.
    ///
    /// # Errors
    ///
    /// See [`refresh_session`](Self::refresh_session).
    pub async fn refresh_if_expiring(&self, margin: Duration) -> Result<Option<User>, Error> {
        if !self.session.expires_within(margin) {
            return Ok(None);
        }
        self.refresh_session().await.map(Some)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
