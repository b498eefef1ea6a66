use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::Error;
use crate::scopes::ScopePreset;
use crate::types::{ProviderId, User};

pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_RESPONSE_TYPE: &str = "code";
const DEFAULT_USER_KEY: &str = "auth_user";
const DEFAULT_TOKEN_KEY: &str = "auth_token";

/// Per-provider OAuth2 client settings.
///
/// A provider whose `client_id` is empty is treated as not configured.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub client_id: String,
    /// Host-supplied secret for the token exchange. Never serialized or logged.
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Ordered scopes; serialized space-joined in this order.
    pub scope: Vec<String>,
    pub response_type: String,
    /// Opaque passthrough to the authorization URL.
    pub additional_params: BTreeMap<String, String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scope: Vec::new(),
            response_type: DEFAULT_RESPONSE_TYPE.into(),
            additional_params: BTreeMap::new(),
        }
    }

    fn unconfigured(provider: ProviderId, origin: &str) -> Self {
        Self::new("", default_redirect_uri(origin, provider))
            .with_scope(ScopePreset::Minimal.scopes(provider))
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_response_type(mut self, response_type: impl Into<String>) -> Self {
        self.response_type = response_type.into();
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }

    /// Overlays only the fields present in `update`.
    pub fn apply(&mut self, update: &ProviderConfigUpdate) {
        if let Some(client_id) = &update.client_id {
            self.client_id.clone_from(client_id);
        }
        if let Some(secret) = &update.client_secret {
            self.client_secret = Some(secret.clone());
        }
        if let Some(redirect_uri) = &update.redirect_uri {
            self.redirect_uri.clone_from(redirect_uri);
        }
        if let Some(scope) = &update.scope {
            self.scope.clone_from(scope);
        }
        if let Some(response_type) = &update.response_type {
            self.response_type.clone_from(response_type);
        }
        if let Some(params) = &update.additional_params {
            self.additional_params
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("response_type", &self.response_type)
            .field("additional_params", &self.additional_params)
            .finish()
    }
}

/// Partial provider settings. `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfigUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<Vec<String>>,
    pub response_type: Option<String>,
    pub additional_params: Option<BTreeMap<String, String>>,
}

impl ProviderConfigUpdate {
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = Some(scope.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn response_type(mut self, response_type: impl Into<String>) -> Self {
        self.response_type = Some(response_type.into());
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_params
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Storage keys used by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Legacy token key. Only ever erased, on logout.
    pub token_key: String,
    /// Key holding the persisted `{user, isAuthenticated}` record.
    pub user_key: String,
}

impl StorageConfig {
    /// Overlays only the keys present in `update`.
    pub fn apply(&mut self, update: &StorageConfigUpdate) {
        if let Some(token_key) = &update.token_key {
            self.token_key.clone_from(token_key);
        }
        if let Some(user_key) = &update.user_key {
            self.user_key.clone_from(user_key);
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            token_key: DEFAULT_TOKEN_KEY.into(),
            user_key: DEFAULT_USER_KEY.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfigUpdate {
    pub token_key: Option<String>,
    pub user_key: Option<String>,
}

pub type LoginSuccessHook = Arc<dyn Fn(&User) + Send + Sync>;
pub type LoginErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// Host hooks fired on session transitions.
#[derive(Clone, Default)]
pub struct AuthCallbacks {
    pub on_login_success: Option<LoginSuccessHook>,
    pub on_login_error: Option<LoginErrorHook>,
    pub on_logout: Option<LogoutHook>,
}

impl AuthCallbacks {
    #[must_use]
    pub fn on_login_success(mut self, hook: impl Fn(&User) + Send + Sync + 'static) -> Self {
        self.on_login_success = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_login_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_login_error = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_logout(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_logout = Some(Arc::new(hook));
        self
    }

    /// Keeps existing hooks unless `other` supplies a replacement.
    pub(crate) fn merge(&mut self, other: &AuthCallbacks) {
        if other.on_login_success.is_some() {
            self.on_login_success.clone_from(&other.on_login_success);
        }
        if other.on_login_error.is_some() {
            self.on_login_error.clone_from(&other.on_login_error);
        }
        if other.on_logout.is_some() {
            self.on_logout.clone_from(&other.on_logout);
        }
    }
}

impl fmt::Debug for AuthCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCallbacks")
            .field("on_login_success", &self.on_login_success.is_some())
            .field("on_login_error", &self.on_login_error.is_some())
            .field("on_logout", &self.on_logout.is_some())
            .finish()
    }
}

/// Host-supplied configuration for every provider, storage and hooks.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    providers: BTreeMap<ProviderId, ProviderConfig>,
    pub storage: StorageConfig,
    pub callbacks: AuthCallbacks,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::with_origin(DEFAULT_ORIGIN)
    }
}

impl AuthConfig {
    /// Unconfigured providers whose redirect URIs point at `{origin}/auth/{provider}/callback`.
    #[must_use]
    pub fn with_origin(origin: &str) -> Self {
        Self {
            providers: ProviderId::ALL
                .into_iter()
                .map(|id| (id, ProviderConfig::unconfigured(id, origin)))
                .collect(),
            storage: StorageConfig::default(),
            callbacks: AuthCallbacks::default(),
        }
    }

    /// Replaces one provider's settings wholesale.
    #[must_use]
    pub fn with_provider(mut self, provider: ProviderId, config: ProviderConfig) -> Self {
        self.providers.insert(provider, config);
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: AuthCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn provider(&self, provider: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&provider)
    }

    /// Providers that have a non-empty client id.
    pub fn configured_providers(&self) -> impl Iterator<Item = (ProviderId, &ProviderConfig)> {
        self.providers
            .iter()
            .filter(|(_, config)| config.is_configured())
            .map(|(id, config)| (*id, config))
    }

    /// Merges a partial update per provider and per section.
    pub fn configure(&mut self, update: AuthConfigUpdate) {
        for (id, provider_update) in &update.providers {
            tracing::debug!(provider = %id, "Merging provider configuration");
            self.providers
                .entry(*id)
                .or_insert_with(|| ProviderConfig::new("", ""))
                .apply(provider_update);
        }
        self.storage.apply(&update.storage);
        self.callbacks.merge(&update.callbacks);
    }

    /// Resets one provider to unconfigured. Other providers are untouched.
    pub fn clear_provider(&mut self, provider: ProviderId) {
        if let Some(config) = self.providers.get_mut(&provider) {
            config.client_id.clear();
            config.client_secret = None;
        }
    }

    /// Create config from environment variables.
    ///
    /// # Recognized env vars
    /// - `APP_ORIGIN`: base for default redirect URIs (default `http://localhost:3000`)
    /// - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `GOOGLE_REDIRECT_URI`, `GOOGLE_SCOPES`
    /// - `KAKAO_CLIENT_ID`, `KAKAO_CLIENT_SECRET`, `KAKAO_REDIRECT_URI`, `KAKAO_SCOPES`
    /// - `AUTH_USER_KEY`, `AUTH_TOKEN_KEY`: storage key overrides
    ///
    /// `*_SCOPES` are comma-separated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `APP_ORIGIN` or a redirect URI is not a valid URL.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let origin = lookup("APP_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.into());
        Url::parse(&origin).map_err(|e| Error::Config(format!("APP_ORIGIN: {e}")))?;

        let mut config = Self::with_origin(origin.trim_end_matches('/'));
        let mut update = AuthConfigUpdate::default();

        for id in ProviderId::ALL {
            let prefix = id.as_str().to_ascii_uppercase();
            let var = |name: &str| lookup(&format!("{prefix}_{name}")).filter(|v| !v.is_empty());

            let mut provider = ProviderConfigUpdate {
                client_id: var("CLIENT_ID"),
                client_secret: var("CLIENT_SECRET"),
                ..ProviderConfigUpdate::default()
            };
            if let Some(uri) = var("REDIRECT_URI") {
                Url::parse(&uri).map_err(|e| Error::Config(format!("{prefix}_REDIRECT_URI: {e}")))?;
                provider.redirect_uri = Some(uri);
            }
            if let Some(scopes) = var("SCOPES") {
                provider.scope = Some(
                    scopes
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            update.providers.insert(id, provider);
        }

        update.storage = StorageConfigUpdate {
            token_key: lookup("AUTH_TOKEN_KEY"),
            user_key: lookup("AUTH_USER_KEY"),
        };
        config.configure(update);
        Ok(config)
    }
}

/// Partial [`AuthConfig`]; see [`AuthConfig::configure`].
#[derive(Debug, Clone, Default)]
pub struct AuthConfigUpdate {
    pub providers: BTreeMap<ProviderId, ProviderConfigUpdate>,
    pub storage: StorageConfigUpdate,
    pub callbacks: AuthCallbacks,
}

impl AuthConfigUpdate {
    #[must_use]
    pub fn provider(mut self, provider: ProviderId, update: ProviderConfigUpdate) -> Self {
        self.providers.insert(provider, update);
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: AuthCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: StorageConfigUpdate) -> Self {
        self.storage = storage;
        self
    }
}

fn default_redirect_uri(origin: &str, provider: ProviderId) -> String {
    format!("{origin}/auth/{provider}/callback")
}
