//! Provider adapters: one OAuth2 authorization-code client per identity provider.
//!
//! Every adapter builds its authorization URL, exchanges codes, and normalizes its
//! provider's profile shape into [`ProfileResponse`]. The exchange-then-profile
//! sequence is shared through [`OAuthProvider::handle_callback`].

mod google;
mod kakao;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::clock::Clock;
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::types::{ProfileResponse, ProviderId, TokenResponse, User};

pub use google::GoogleProvider;
pub use kakao::KakaoProvider;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth2 client role for a single identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Authorization endpoint URL with the configured query parameters. No network call.
    fn authorization_url(&self) -> String;

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenExchange`] carrying the raw provider body when the
    /// token endpoint answers with a non-success status, or [`Error::Http`] on
    /// network failure.
    async fn exchange_code_for_token(&self, code: &str) -> Result<TokenResponse, Error>;

    /// Fetch and normalize the user profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProfileFetch`] on a non-success status, or
    /// [`Error::InvalidResponse`] when the body cannot be normalized.
    async fn get_user_profile(&self, access_token: &str) -> Result<ProfileResponse, Error>;

    /// Exchange `code`, fetch the profile with the resulting access token, and map
    /// both into a [`User`]. `expires_at` is anchored at the moment the token
    /// exchange completed.
    ///
    /// # Errors
    ///
    /// Any failure is returned as [`Error::Authentication`] naming the provider.
    async fn handle_callback(&self, code: &str, clock: &dyn Clock) -> Result<User, Error> {
        let provider = self.id();
        let result: Result<User, Error> = async {
            let tokens = self.exchange_code_for_token(code).await?;
            let issued_at = clock.now_millis();
            let profile = self.get_user_profile(&tokens.access_token).await?;
            Ok(User::from_exchange(provider, profile, tokens, issued_at))
        }
        .await;

        result.map_err(|e| {
            tracing::error!(provider = %provider, error = %e, "OAuth callback failed");
            Error::authentication(provider, e)
        })
    }

    fn supports_revocation(&self) -> bool {
        false
    }

    /// Revoke `token` at the provider. Callers treat failure as a warning only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Revocation`] if the provider rejects the call.
    async fn revoke_token(&self, _token: &str) -> Result<(), Error> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Mint a new access token from a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshUnavailable`] unless the adapter overrides it.
    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenResponse, Error> {
        Err(Error::RefreshUnavailable("provider does not support token refresh"))
    }
}

/// Provider endpoint set. Defaults are the providers' well-known URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Endpoints {
    pub authorize: Url,
    pub token: Url,
    pub userinfo: Url,
    pub revoke: Option<Url>,
    /// Provider-side session logout, distinct from revocation.
    pub logout: Option<Url>,
}

impl Endpoints {
    #[must_use]
    pub fn new(authorize: Url, token: Url, userinfo: Url) -> Self {
        Self {
            authorize,
            token,
            userinfo,
            revoke: None,
            logout: None,
        }
    }

    #[must_use]
    pub fn with_revoke(mut self, url: Url) -> Self {
        self.revoke = Some(url);
        self
    }

    #[must_use]
    pub fn with_logout(mut self, url: Url) -> Self {
        self.logout = Some(url);
        self
    }

    /// Same paths and queries on another origin (a proxy or a local mock server).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base` is not a valid URL.
    pub fn rebased(&self, base: &str) -> Result<Self, Error> {
        let base = Url::parse(base).map_err(|e| Error::Config(format!("endpoint base: {e}")))?;
        let rebase = |url: &Url| -> Result<Url, Error> {
            let mut moved = base
                .join(url.path())
                .map_err(|e| Error::Config(format!("endpoint base: {e}")))?;
            moved.set_query(url.query());
            Ok(moved)
        };

        Ok(Self {
            authorize: rebase(&self.authorize)?,
            token: rebase(&self.token)?,
            userinfo: rebase(&self.userinfo)?,
            revoke: self.revoke.as_ref().map(rebase).transpose()?,
            logout: self.logout.as_ref().map(rebase).transpose()?,
        })
    }
}

/// Parses a compile-time endpoint constant.
fn well_known(url: &'static str) -> Url {
    url.parse().expect("valid default URL")
}

pub(crate) fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// `client_id`, `redirect_uri`, `response_type` and the space-joined `scope`.
fn standard_params(config: &ProviderConfig) -> Vec<(String, String)> {
    vec![
        ("client_id".into(), config.client_id.clone()),
        ("redirect_uri".into(), config.redirect_uri.clone()),
        ("response_type".into(), config.response_type.clone()),
        ("scope".into(), config.scope.join(" ")),
    ]
}

/// Appends `params` to `endpoint`, letting `additional` override same-named keys in
/// place. Empty values are dropped entirely.
fn build_authorization_url(
    endpoint: &Url,
    mut params: Vec<(String, String)>,
    additional: &BTreeMap<String, String>,
) -> String {
    for (key, value) in additional {
        match params.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1.clone_from(value),
            None => params.push((key.clone(), value.clone())),
        }
    }

    let mut url = endpoint.clone();
    let mut present = params.iter().filter(|(_, v)| !v.is_empty()).peekable();
    if present.peek().is_some() {
        url.query_pairs_mut().extend_pairs(present);
    }
    url.into()
}

/// Non-success HTTP answer with its raw body.
struct Rejected {
    status: u16,
    body: String,
}

/// Checks HTTP response status; returns the response on success or the status and body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Rejected> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Rejected { status, body })
}

fn client_secret(config: &ProviderConfig) -> Option<&str> {
    config.client_secret.as_deref().filter(|s| !s.is_empty())
}

/// Form-encoded `authorization_code` grant, shared by every provider.
async fn exchange_code(
    http: &reqwest::Client,
    provider: ProviderId,
    token_url: &Url,
    config: &ProviderConfig,
    code: &str,
) -> Result<TokenResponse, Error> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("code", code),
    ];
    if let Some(secret) = client_secret(config) {
        params.push(("client_secret", secret));
    }

    let response = http.post(token_url.clone()).form(&params).send().await?;
    let response = ensure_success(response)
        .await
        .map_err(|rejected| Error::TokenExchange {
            provider,
            status: Some(rejected.status),
            detail: rejected.body,
        })?;

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("{provider} token response: {e}")))
}

/// Form-encoded `refresh_token` grant, shared by every provider.
async fn refresh_token(
    http: &reqwest::Client,
    provider: ProviderId,
    token_url: &Url,
    config: &ProviderConfig,
    refresh_token: &str,
) -> Result<TokenResponse, Error> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("refresh_token", refresh_token),
    ];
    if let Some(secret) = client_secret(config) {
        params.push(("client_secret", secret));
    }

    let response = http.post(token_url.clone()).form(&params).send().await?;
    let response = ensure_success(response).await.map_err(|rejected| {
        Error::Refresh(format!("{provider} answered {}: {}", rejected.status, rejected.body))
    })?;

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("{provider} refresh response: {e}")))
}

/// Authenticated GET against a userinfo endpoint, returning the raw JSON body.
async fn fetch_profile_json(
    request: reqwest::RequestBuilder,
    provider: ProviderId,
) -> Result<serde_json::Value, Error> {
    let response = request.send().await?;
    let response = ensure_success(response)
        .await
        .map_err(|rejected| Error::ProfileFetch {
            provider,
            status: Some(rejected.status),
            detail: rejected.body,
        })?;

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("{provider} profile response: {e}")))
}
