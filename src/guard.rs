use crate::navigation::Navigator;
use crate::session::{SessionState, SessionStore};

pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// What a guarded route should do for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session is still loading. Render neither content nor a redirect.
    Pending,
    Render,
    Redirect(String),
}

/// Gate for protected pages and for login pages that authenticated users should skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    redirect_to: String,
    redirect_if_authenticated: bool,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self {
            redirect_to: DEFAULT_LOGIN_PATH.to_string(),
            redirect_if_authenticated: false,
        }
    }
}

impl RouteGuard {
    /// Guard for protected content: unauthenticated sessions go to the login page.
    #[must_use]
    pub fn protected() -> Self {
        Self::default()
    }

    /// Guard for pages like `/login`: authenticated sessions go to `home`.
    #[must_use]
    pub fn guest_only(home: impl Into<String>) -> Self {
        Self {
            redirect_to: home.into(),
            redirect_if_authenticated: true,
        }
    }

    #[must_use]
    pub fn with_redirect_to(mut self, path: impl Into<String>) -> Self {
        self.redirect_to = path.into();
        self
    }

    #[must_use]
    pub fn redirect_to(&self) -> &str {
        &self.redirect_to
    }

    #[must_use]
    pub fn redirect_if_authenticated(&self) -> bool {
        self.redirect_if_authenticated
    }

    /// Pure decision over a state snapshot.
    #[must_use]
    pub fn decide(&self, state: &SessionState) -> GuardDecision {
        if state.is_loading() {
            return GuardDecision::Pending;
        }
        if state.is_authenticated() == self.redirect_if_authenticated {
            GuardDecision::Redirect(self.redirect_to.clone())
        } else {
            GuardDecision::Render
        }
    }

    /// Re-checks expiry, decides, and navigates when the decision is a redirect.
    ///
    /// Expiry is only checked once loading has finished, so an in-flight login is
    /// never interrupted.
    pub fn enforce(&self, session: &SessionStore, navigator: &dyn Navigator) -> GuardDecision {
        if session.is_loading() {
            return GuardDecision::Pending;
        }
        session.check_auth();

        let decision = self.decide(&session.snapshot());
        if let GuardDecision::Redirect(path) = &decision {
            tracing::debug!(path = %path, "Route guard redirecting");
            navigator.navigate(path);
        }
        decision
    }
}
