use async_trait::async_trait;

use super::{
    Endpoints, OAuthProvider, build_authorization_url, default_http_client, ensure_success,
    exchange_code, fetch_profile_json, refresh_token, standard_params, well_known,
};
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::types::{ProfileResponse, ProviderId, TokenResponse};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Google OAuth2 adapter.
///
/// Always requests offline access with a forced consent prompt so a refresh token
/// is issued.
pub struct GoogleProvider {
    config: ProviderConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl GoogleProvider {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            endpoints: Self::default_endpoints(),
            http: default_http_client(),
        }
    }

    #[must_use]
    pub fn default_endpoints() -> Endpoints {
        Endpoints::new(
            well_known(AUTH_URL),
            well_known(TOKEN_URL),
            well_known(USERINFO_URL),
        )
        .with_revoke(well_known(REVOKE_URL))
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn authorization_url(&self) -> String {
        let mut params = standard_params(&self.config);
        params.push(("access_type".into(), "offline".into()));
        params.push(("prompt".into(), "consent".into()));
        build_authorization_url(
            &self.endpoints.authorize,
            params,
            &self.config.additional_params,
        )
    }

    async fn exchange_code_for_token(&self, code: &str) -> Result<TokenResponse, Error> {
        exchange_code(
            &self.http,
            ProviderId::Google,
            &self.endpoints.token,
            &self.config,
            code,
        )
        .await
    }

    async fn get_user_profile(&self, access_token: &str) -> Result<ProfileResponse, Error> {
        let request = self
            .http
            .get(self.endpoints.userinfo.clone())
            .bearer_auth(access_token);
        let data = fetch_profile_json(request, ProviderId::Google).await?;

        // The v2 userinfo body is already flat: id, email, name, picture, plus
        // verified_email/locale/given_name which land in `extra`.
        serde_json::from_value(data)
            .map_err(|e| Error::InvalidResponse(format!("google profile: {e}")))
    }

    fn supports_revocation(&self) -> bool {
        self.endpoints.revoke.is_some()
    }

    async fn revoke_token(&self, token: &str) -> Result<(), Error> {
        let Some(url) = &self.endpoints.revoke else {
            return Ok(());
        };

        let response = self
            .http
            .post(url.clone())
            .form(&[("token", token)])
            .send()
            .await?;
        ensure_success(response)
            .await
            .map(|_| ())
            .map_err(|rejected| Error::Revocation {
                provider: ProviderId::Google,
                detail: format!("{}: {}", rejected.status, rejected.body),
            })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh_access_token(&self, token: &str) -> Result<TokenResponse, Error> {
        refresh_token(
            &self.http,
            ProviderId::Google,
            &self.endpoints.token,
            &self.config,
            token,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use url::Url;

    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("google-client", "https://app/auth/google/callback")
            .with_client_secret("google-secret")
            .with_scope(["openid", "email", "profile"])
    }

    fn query_value(url: &str, key: &str) -> Option<String> {
        let url: Url = url.parse().unwrap();
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn authorization_url_requests_offline_consent() {
        let url = GoogleProvider::new(config()).authorization_url();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=google-client"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert_eq!(query_value(&url, "scope").as_deref(), Some("openid email profile"));
        assert_eq!(
            query_value(&url, "redirect_uri").as_deref(),
            Some("https://app/auth/google/callback")
        );
        assert!(!url.contains("google-secret"));
    }

    #[test]
    fn additional_params_override_fixed_ones() {
        let url = GoogleProvider::new(config().with_param("prompt", "select_account"))
            .authorization_url();
        assert_eq!(query_value(&url, "prompt").as_deref(), Some("select_account"));
        assert!(!url.contains("prompt=consent"));
    }

    #[test]
    fn authorization_url_is_deterministic() {
        let provider = GoogleProvider::new(config());
        assert_eq!(provider.authorization_url(), provider.authorization_url());
    }

    #[tokio::test]
    async fn exchanges_code_and_fetches_profile() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("client_id".into(), "google-client".into()),
                Matcher::UrlEncoded("client_secret".into(), "google-secret".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://app/auth/google/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"g-at","refresh_token":"g-rt","expires_in":3599,"token_type":"Bearer","scope":"openid email"}"#,
            )
            .create_async()
            .await;
        let userinfo = server
            .mock("GET", "/oauth2/v2/userinfo")
            .match_header("authorization", "Bearer g-at")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"1097","email":"min@example.com","verified_email":true,"name":"Min","picture":"https://img/1","locale":"ko"}"#,
            )
            .create_async()
            .await;

        let provider = GoogleProvider::new(config())
            .with_endpoints(GoogleProvider::default_endpoints().rebased(&server.url()).unwrap());

        let tokens = provider.exchange_code_for_token("the-code").await.unwrap();
        assert_eq!(tokens.access_token, "g-at");
        assert_eq!(tokens.expires_in, Some(3599));

        let profile = provider.get_user_profile(&tokens.access_token).await.unwrap();
        assert_eq!(profile.id, "1097");
        assert_eq!(profile.name.as_deref(), Some("Min"));
        assert_eq!(profile.extra["verified_email"], true);

        token.assert_async().await;
        userinfo.assert_async().await;
    }

    #[tokio::test]
    async fn token_error_carries_raw_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#)
            .create_async()
            .await;

        let provider = GoogleProvider::new(config())
            .with_endpoints(GoogleProvider::default_endpoints().rebased(&server.url()).unwrap());

        match provider.exchange_code_for_token("used-code").await {
            Err(Error::TokenExchange {
                provider,
                status,
                detail,
            }) => {
                assert_eq!(provider, ProviderId::Google);
                assert_eq!(status, Some(400));
                assert!(detail.contains("invalid_grant"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn revocation_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let revoke = server
            .mock("POST", "/revoke")
            .match_body(Matcher::UrlEncoded("token".into(), "g-at".into()))
            .with_status(400)
            .with_body("invalid_token")
            .create_async()
            .await;

        let provider = GoogleProvider::new(config())
            .with_endpoints(GoogleProvider::default_endpoints().rebased(&server.url()).unwrap());

        assert!(provider.supports_revocation());
        let err = provider.revoke_token("g-at").await.unwrap_err();
        assert!(matches!(err, Error::Revocation { provider: ProviderId::Google, .. }));
        revoke.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "g-rt".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"g-at-2","expires_in":3599}"#)
            .create_async()
            .await;

        let provider = GoogleProvider::new(config())
            .with_endpoints(GoogleProvider::default_endpoints().rebased(&server.url()).unwrap());

        let tokens = provider.refresh_access_token("g-rt").await.unwrap();
        assert_eq!(tokens.access_token, "g-at-2");
        assert_eq!(tokens.refresh_token, None);
        refresh.assert_async().await;
    }
}
