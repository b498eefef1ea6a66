use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::{
    Endpoints, OAuthProvider, build_authorization_url, default_http_client, ensure_success,
    exchange_code, fetch_profile_json, refresh_token, standard_params, well_known,
};
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::types::{ProfileResponse, ProviderId, TokenResponse};

const AUTH_URL: &str = "https://kauth.kakao.com/oauth/authorize";
const TOKEN_URL: &str = "https://kauth.kakao.com/oauth/token";
const USERINFO_URL: &str = "https://kapi.kakao.com/v2/user/me";
const LOGOUT_URL: &str = "https://kapi.kakao.com/v1/user/logout";
const UNLINK_URL: &str = "https://kapi.kakao.com/v1/user/unlink";

/// Kakao Login adapter.
///
/// Revocation unlinks the app from the Kakao account. [`KakaoProvider::logout_session`]
/// only ends the Kakao session.
pub struct KakaoProvider {
    config: ProviderConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl KakaoProvider {
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
        .with_revoke(well_known(UNLINK_URL))
        .with_logout(well_known(LOGOUT_URL))
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

    /// Ends the Kakao session for `access_token` without unlinking. Best effort.
    pub async fn logout_session(&self, access_token: &str) {
        let Some(url) = &self.endpoints.logout else {
            return;
        };

        let result = self
            .http
            .post(url.clone())
            .bearer_auth(access_token)
            .send()
            .await;
        match result {
            Ok(response) => {
                if let Err(rejected) = ensure_success(response).await {
                    tracing::warn!(status = rejected.status, body = %rejected.body, "Failed to logout from Kakao");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to logout from Kakao"),
        }
    }
}

/// Flattens `/v2/user/me`: numeric `id`, `properties.*` preferred over
/// `kakao_account.profile.*`.
fn normalize_profile(data: &Value) -> Result<ProfileResponse, Error> {
    let id = match data.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(Error::InvalidResponse("kakao profile has no id".into())),
    };

    let account = data.get("kakao_account");
    let properties = data.get("properties");
    let nested = account.and_then(|a| a.get("profile"));

    let name = string_at(properties, "nickname").or_else(|| string_at(nested, "nickname"));
    let picture = string_at(properties, "profile_image")
        .or_else(|| string_at(nested, "profile_image_url"));

    let mut profile = ProfileResponse::new(id)
        .with_email(string_at(account, "email"))
        .with_name(name)
        .with_picture(picture);
    if let Some(connected_at) = data.get("connected_at") {
        profile = profile.with_extra("connected_at", connected_at.clone());
    }
    if let Some(account) = account {
        profile = profile.with_extra("kakao_account", account.clone());
    }
    Ok(profile)
}

fn string_at(value: Option<&Value>, key: &str) -> Option<String> {
    value?
        .get(key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl OAuthProvider for KakaoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Kakao
    }

    fn authorization_url(&self) -> String {
        build_authorization_url(
            &self.endpoints.authorize,
            standard_params(&self.config),
            &self.config.additional_params,
        )
    }

    async fn exchange_code_for_token(&self, code: &str) -> Result<TokenResponse, Error> {
        exchange_code(
            &self.http,
            ProviderId::Kakao,
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
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded;charset=utf-8");
        let data = fetch_profile_json(request, ProviderId::Kakao).await?;
        normalize_profile(&data)
    }

    fn supports_revocation(&self) -> bool {
        self.endpoints.revoke.is_some()
    }

    async fn revoke_token(&self, access_token: &str) -> Result<(), Error> {
        let Some(url) = &self.endpoints.revoke else {
            return Ok(());
        };

        let response = self
            .http
            .post(url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;
        ensure_success(response)
            .await
            .map(|_| ())
            .map_err(|rejected| Error::Revocation {
                provider: ProviderId::Kakao,
                detail: format!("unlink {}: {}", rejected.status, rejected.body),
            })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh_access_token(&self, token: &str) -> Result<TokenResponse, Error> {
        refresh_token(
            &self.http,
            ProviderId::Kakao,
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
    use serde_json::json;

    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("abc", "https://app/cb").with_scope(["profile_nickname"])
    }

    fn mocked(server: &mockito::ServerGuard) -> KakaoProvider {
        KakaoProvider::new(config())
            .with_endpoints(KakaoProvider::default_endpoints().rebased(&server.url()).unwrap())
    }

    #[test]
    fn authorization_url_has_no_google_extras() {
        let url = KakaoProvider::new(config()).authorization_url();
        assert_eq!(
            url,
            "https://kauth.kakao.com/oauth/authorize?client_id=abc\
             &redirect_uri=https%3A%2F%2Fapp%2Fcb&response_type=code&scope=profile_nickname"
        );
    }

    #[test]
    fn numeric_id_is_stringified() {
        let profile = normalize_profile(&json!({
            "id": 123,
            "properties": { "nickname": "Min" }
        }))
        .unwrap();
        assert_eq!(profile.id, "123");
        assert_eq!(profile.name.as_deref(), Some("Min"));
        assert_eq!(profile.email, None);
    }

    #[test]
    fn flat_properties_win_over_nested_profile() {
        let profile = normalize_profile(&json!({
            "id": 7,
            "connected_at": "2024-05-01T00:00:00Z",
            "properties": { "nickname": "Top", "profile_image": "https://img/top" },
            "kakao_account": {
                "email": "min@kakao.com",
                "profile": { "nickname": "Nested", "profile_image_url": "https://img/nested" }
            }
        }))
        .unwrap();

        assert_eq!(profile.name.as_deref(), Some("Top"));
        assert_eq!(profile.picture.as_deref(), Some("https://img/top"));
        assert_eq!(profile.email.as_deref(), Some("min@kakao.com"));
        assert_eq!(profile.extra["connected_at"], "2024-05-01T00:00:00Z");
        assert!(profile.extra.contains_key("kakao_account"));
    }

    #[test]
    fn nested_profile_fills_missing_fields() {
        let profile = normalize_profile(&json!({
            "id": 7,
            "properties": { "nickname": "" },
            "kakao_account": {
                "profile": { "nickname": "Nested", "profile_image_url": "https://img/nested" }
            }
        }))
        .unwrap();

        assert_eq!(profile.name.as_deref(), Some("Nested"));
        assert_eq!(profile.picture.as_deref(), Some("https://img/nested"));
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = normalize_profile(&json!({ "properties": {} })).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn exchanges_code_without_secret_when_none_is_set() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("client_id".into(), "abc".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "https://app/cb".into()),
                Matcher::UrlEncoded("code".into(), "xyz".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"k-at","token_type":"bearer","expires_in":21599}"#)
            .create_async()
            .await;

        let tokens = mocked(&server).exchange_code_for_token("xyz").await.unwrap();
        assert_eq!(tokens.access_token, "k-at");
        assert_eq!(tokens.token_type.as_deref(), Some("bearer"));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn profile_fetch_failure_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/user/me")
            .with_status(401)
            .with_body(r#"{"msg":"this access token does not exist","code":-401}"#)
            .create_async()
            .await;

        let err = mocked(&server).get_user_profile("stale").await.unwrap_err();
        match err {
            Error::ProfileFetch { status, detail, .. } => {
                assert_eq!(status, Some(401));
                assert!(detail.contains("-401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlink_uses_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let unlink = server
            .mock("POST", "/v1/user/unlink")
            .match_header("authorization", "Bearer k-at")
            .with_status(200)
            .with_body(r#"{"id":123}"#)
            .create_async()
            .await;

        mocked(&server).revoke_token("k-at").await.unwrap();
        unlink.assert_async().await;
    }

    #[tokio::test]
    async fn logout_session_swallows_failures() {
        let mut server = mockito::Server::new_async().await;
        let logout = server
            .mock("POST", "/v1/user/logout")
            .with_status(500)
            .create_async()
            .await;

        mocked(&server).logout_session("k-at").await;
        logout.assert_async().await;
    }
}
