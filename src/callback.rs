use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::guard::DEFAULT_LOGIN_PATH;
use crate::manager::AuthManager;
use crate::types::{ProviderId, User};

pub const NO_CODE_MESSAGE: &str = "No authorization code received";
pub const DEFAULT_FAILURE_DELAY: Duration = Duration::from_secs(3);

/// Query parameters of a provider's redirect back to the app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parses a raw query string (without the leading `?`).
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }

    /// The authorization code, if present and non-empty.
    #[must_use]
    pub fn authorization_code(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| !c.is_empty())
    }

    /// Provider-reported error: the description when given, else the raw code.
    #[must_use]
    pub fn provider_error(&self) -> Option<String> {
        let error = self.error.as_deref().filter(|e| !e.is_empty())?;
        let message = self
            .error_description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(error);
        Some(message.to_string())
    }
}

/// There is no success state: success navigates away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackState {
    Processing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Authenticated(User),
    Failed { message: String },
    /// The code was already consumed by an earlier invocation.
    AlreadyHandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSettings {
    pub success_redirect: String,
    pub login_path: String,
    pub failure_delay: Duration,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            success_redirect: "/".to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            failure_delay: DEFAULT_FAILURE_DELAY,
        }
    }
}

impl CallbackSettings {
    #[must_use]
    pub fn with_success_redirect(mut self, path: impl Into<String>) -> Self {
        self.success_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }
}

/// Landing logic for one provider's redirect-back.
///
/// Instances are tied to a view's lifetime. Dropping the handler cancels a pending
/// failure redirect.
pub struct CallbackHandler {
    provider: ProviderId,
    manager: Arc<AuthManager>,
    settings: CallbackSettings,
    state: Mutex<CallbackState>,
    pending_redirect: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackHandler {
    #[must_use]
    pub fn new(provider: ProviderId, manager: Arc<AuthManager>) -> Self {
        Self {
            provider,
            manager,
            settings: CallbackSettings::default(),
            state: Mutex::new(CallbackState::Processing),
            pending_redirect: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: CallbackSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    #[must_use]
    pub fn settings(&self) -> &CallbackSettings {
        &self.settings
    }

    #[must_use]
    pub fn state(&self) -> CallbackState {
        lock(&self.state).clone()
    }

    #[must_use]
    pub fn has_pending_redirect(&self) -> bool {
        lock(&self.pending_redirect)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs the callback state machine for `params`.
    ///
    /// Provider errors are checked first, then a missing code. A code is exchanged
    /// at most once per provider, across handler instances. A repeated code leaves
    /// the callback route too: home at once when the session is authenticated,
    /// otherwise after the failure delay, to wherever the first exchange landed.
    pub async fn handle(&self, params: &CallbackParams) -> CallbackOutcome {
        if let Some(message) = params.provider_error() {
            tracing::warn!(provider = %self.provider, error = %message, "Provider reported a login error");
            return self.reject(message);
        }
        let Some(code) = params.authorization_code() else {
            return self.reject(NO_CODE_MESSAGE);
        };

        if !self.manager.claim_code(self.provider, code) {
            tracing::debug!(provider = %self.provider, "Authorization code already handled");
            self.leave_after_duplicate();
            return CallbackOutcome::AlreadyHandled;
        }

        match self.manager.handle_callback(self.provider, code).await {
            Ok(user) => {
                self.manager
                    .navigator()
                    .navigate(&self.settings.success_redirect);
                CallbackOutcome::Authenticated(user)
            }
            // The manager has already recorded the session error.
            Err(err) => self.fail(err.to_string()),
        }
    }

    /// Fails the callback with `message`, surfacing it on the session and
    /// scheduling the redirect to login.
    pub fn reject(&self, message: impl Into<String>) -> CallbackOutcome {
        let err = Error::Callback(message.into());
        self.manager.record_login_failure(&err);
        self.fail(err.to_string())
    }

    fn fail(&self, message: String) -> CallbackOutcome {
        *lock(&self.state) = CallbackState::Failed(message.clone());
        self.schedule_redirect();
        CallbackOutcome::Failed { message }
    }

    fn leave_after_duplicate(&self) {
        let session = Arc::clone(self.manager.session());
        if session.is_authenticated() {
            self.manager
                .navigator()
                .navigate(&self.settings.success_redirect);
            return;
        }

        // The first exchange may still be in flight.
        let home = self.settings.success_redirect.clone();
        let login = self.settings.login_path.clone();
        self.schedule(move || if session.is_authenticated() { home } else { login });
    }

    fn schedule_redirect(&self) {
        let login_path = self.settings.login_path.clone();
        self.schedule(move || login_path);
    }

    /// Navigates to `target()` once the failure delay has passed.
    fn schedule(&self, target: impl FnOnce() -> String + Send + 'static) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; failure redirect not scheduled");
            return;
        };

        let navigator = Arc::clone(self.manager.navigator());
        let delay = self.settings.failure_delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&target());
        });

        if let Some(previous) = lock(&self.pending_redirect).replace(task) {
            previous.abort();
        }
    }

    /// Cancels the pending failure redirect, if any.
    pub fn cancel_pending_redirect(&self) {
        if let Some(task) = lock(&self.pending_redirect).take() {
            task.abort();
        }
    }
}

impl Drop for CallbackHandler {
    fn drop(&mut self) {
        self.cancel_pending_redirect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AuthCallbacks, AuthConfig, ProviderConfig, StorageConfig};
    use crate::navigation::RecordingNavigator;
    use crate::provider::{KakaoProvider, OAuthProvider};
    use crate::session::SessionStore;
    use crate::storage::MemoryStore;

    const T: i64 = 1_700_000_000_000;

    fn manager_with(
        navigator: Arc<RecordingNavigator>,
        adapter: Option<Arc<dyn OAuthProvider>>,
    ) -> Arc<AuthManager> {
        let session = Arc::new(
            SessionStore::new(
                Arc::new(MemoryStore::new()),
                StorageConfig::default(),
                AuthCallbacks::default(),
            )
            .with_clock(Arc::new(ManualClock::new(T))),
        );
        let mut manager = AuthManager::new(AuthConfig::default(), session, navigator);
        if let Some(adapter) = adapter {
            manager = manager.with_provider(adapter);
        }
        Arc::new(manager)
    }

    fn kakao(server: &mockito::ServerGuard) -> Arc<dyn OAuthProvider> {
        let config = ProviderConfig::new("abc", "https://app/cb");
        Arc::new(
            KakaoProvider::new(config)
                .with_endpoints(KakaoProvider::default_endpoints().rebased(&server.url()).unwrap()),
        )
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn parses_query_with_plus_encoding() {
        let params = CallbackParams::from_query(
            "error=access_denied&error_description=User+cancelled&state=s1&other=x",
        );
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User cancelled"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert_eq!(params.code, None);
    }

    #[test]
    fn error_without_description_uses_raw_code() {
        let params = CallbackParams::from_query("error=access_denied");
        assert_eq!(params.provider_error().as_deref(), Some("access_denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_missing_code() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone());
        assert_eq!(handler.state(), CallbackState::Processing);

        let outcome = handler.handle(&CallbackParams::default()).await;
        assert_eq!(
            outcome,
            CallbackOutcome::Failed { message: NO_CODE_MESSAGE.into() }
        );
        assert_eq!(handler.state(), CallbackState::Failed(NO_CODE_MESSAGE.into()));
        assert_eq!(manager.session().error().as_deref(), Some(NO_CODE_MESSAGE));

        wait(2_999).await;
        assert!(nav.history().is_empty());
        wait(2).await;
        assert_eq!(nav.history(), vec!["/login"]);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_c_provider_error() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone());

        let params = CallbackParams::from_query(
            "error=access_denied&error_description=User+cancelled&code=ignored",
        );
        let outcome = handler.handle(&params).await;
        assert_eq!(outcome, CallbackOutcome::Failed { message: "User cancelled".into() });
        assert_eq!(manager.session().error().as_deref(), Some("User cancelled"));
        assert!(handler.has_pending_redirect());

        wait(3_001).await;
        assert_eq!(nav.last().as_deref(), Some("/login"));
    }

    #[tokio::test]
    async fn rejection_fires_login_error_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = AuthConfig::default().with_callbacks(
            AuthCallbacks::default().on_login_error(move |e| {
                assert!(matches!(e, Error::Callback(_)));
                sink.lock().unwrap().push(e.to_string());
            }),
        );
        let session = Arc::new(SessionStore::new(
            Arc::new(MemoryStore::new()),
            config.storage.clone(),
            config.callbacks.clone(),
        ));
        let manager = Arc::new(AuthManager::new(
            config,
            session,
            Arc::new(RecordingNavigator::new()),
        ));

        let handler = CallbackHandler::new(ProviderId::Google, manager);
        handler.handle(&CallbackParams::from_query("error=access_denied")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["access_denied".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handler_cancels_the_redirect() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        let handler = CallbackHandler::new(ProviderId::Kakao, manager);

        handler.handle(&CallbackParams::default()).await;
        drop(handler);

        wait(10_000).await;
        assert!(nav.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_redirect_stops_navigation() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        let handler = CallbackHandler::new(ProviderId::Kakao, manager)
            .with_settings(CallbackSettings::default().with_failure_delay(Duration::from_secs(1)));

        handler.reject("State mismatch");
        assert!(handler.has_pending_redirect());
        handler.cancel_pending_redirect();
        assert!(!handler.has_pending_redirect());

        wait(5_000).await;
        assert!(nav.history().is_empty());
    }

    #[tokio::test]
    async fn exchange_failure_redirects_to_custom_login_path() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), Some(kakao(&server)));
        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone()).with_settings(
            CallbackSettings::default()
                .with_login_path("/signin")
                .with_failure_delay(Duration::from_millis(20)),
        );

        let outcome = handler.handle(&CallbackParams::from_query("code=bad")).await;
        assert_eq!(
            outcome,
            CallbackOutcome::Failed { message: "Failed to authenticate with kakao".into() }
        );
        assert!(!manager.session().is_loading());

        assert!(nav.history().is_empty());
        wait(200).await;
        assert_eq!(nav.last().as_deref(), Some("/signin"));
    }

    #[tokio::test]
    async fn success_navigates_immediately_and_exchanges_once() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("code".into(), "xyz".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"k-at"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/v2/user/me")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":123,"properties":{"nickname":"Min"}}"#)
            .create_async()
            .await;

        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), Some(kakao(&server)));
        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone());
        let params = CallbackParams::from_query("code=xyz");

        let user = match handler.handle(&params).await {
            CallbackOutcome::Authenticated(user) => user,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(user.id, "123");
        assert_eq!(nav.history(), vec!["/"]);
        assert!(!handler.has_pending_redirect());
        assert_eq!(handler.state(), CallbackState::Processing);

        assert_eq!(handler.handle(&params).await, CallbackOutcome::AlreadyHandled);
        assert_eq!(nav.history(), vec!["/", "/"]);

        let remounted = CallbackHandler::new(ProviderId::Kakao, manager.clone());
        assert_eq!(remounted.handle(&params).await, CallbackOutcome::AlreadyHandled);
        assert_eq!(nav.history(), vec!["/", "/", "/"]);
        assert!(!remounted.has_pending_redirect());

        token.assert_async().await;
        assert!(manager.session().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_code_without_session_returns_to_login() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        assert!(manager.claim_code(ProviderId::Kakao, "xyz"));

        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone());
        let outcome = handler.handle(&CallbackParams::from_query("code=xyz")).await;
        assert_eq!(outcome, CallbackOutcome::AlreadyHandled);
        assert!(handler.has_pending_redirect());
        assert!(nav.history().is_empty());

        wait(3_001).await;
        assert_eq!(nav.history(), vec!["/login"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_code_follows_a_login_that_lands_meanwhile() {
        let nav = Arc::new(RecordingNavigator::new());
        let manager = manager_with(nav.clone(), None);
        assert!(manager.claim_code(ProviderId::Kakao, "xyz"));

        let handler = CallbackHandler::new(ProviderId::Kakao, manager.clone());
        handler.handle(&CallbackParams::from_query("code=xyz")).await;
        manager.session().login(User {
            id: "123".into(),
            email: None,
            name: None,
            picture: None,
            provider: ProviderId::Kakao,
            access_token: "k-at".into(),
            refresh_token: None,
            expires_at: None,
        });

        wait(3_001).await;
        assert_eq!(nav.history(), vec!["/"]);
    }
}
