use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Identity provider backing a [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Google,
    Kakao,
}

impl ProviderId {
    /// Every provider the crate ships an adapter for.
    pub const ALL: [ProviderId; 2] = [ProviderId::Google, ProviderId::Kakao];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Kakao => "kakao",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "kakao" => Ok(Self::Kakao),
            other => Err(Error::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// Canonical, provider-agnostic authenticated identity.
///
/// Serialized in camelCase because this is the shape persisted across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Provider-scoped subject identifier.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub provider: ProviderId,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry in epoch millis. `None` means non-expiring for local purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl User {
    /// Builds the canonical user from a normalized profile and the token response
    /// it was fetched with. `now_ms` anchors `expires_at`.
    #[must_use]
    pub fn from_exchange(
        provider: ProviderId,
        profile: ProfileResponse,
        tokens: TokenResponse,
        now_ms: i64,
    ) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            name: profile.name,
            picture: profile.picture,
            provider,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_in.map(|secs| expiry_from(now_ms, secs)),
        }
    }

    /// Whether `expires_at` lies strictly before `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at < now_ms)
    }

    /// Best label for display: name, then email, then the raw id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// `now + expires_in` seconds, in epoch millis.
#[must_use]
pub fn expiry_from(now_ms: i64, expires_in_secs: u64) -> i64 {
    let millis = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_ms.saturating_add(millis)
}

/// Token endpoint response, shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            token_type: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = Some(secs);
        self
    }
}

/// Flat profile produced by an adapter from its provider's userinfo shape.
///
/// Provider fields that have no canonical slot are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ProfileResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileResponse {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            picture: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    #[must_use]
    pub fn with_picture(mut self, picture: Option<String>) -> Self {
        self.picture = picture;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_parses_case_insensitively() {
        assert_eq!("kakao".parse::<ProviderId>().unwrap(), ProviderId::Kakao);
        assert_eq!("Google".parse::<ProviderId>().unwrap(), ProviderId::Google);
        assert!("github".parse::<ProviderId>().is_err());
    }

    #[test]
    fn provider_id_serializes_lowercase() {
        let json = serde_json::to_string(&ProviderId::Kakao).unwrap();
        assert_eq!(json, "\"kakao\"");
    }

    #[test]
    fn from_exchange_computes_expiry_only_when_present() {
        let profile = ProfileResponse::new("42").with_name(Some("Min".into()));

        let tokens = TokenResponse::new("at").with_expires_in(3600);
        let user = User::from_exchange(ProviderId::Kakao, profile.clone(), tokens, 1_000);
        assert_eq!(user.expires_at, Some(1_000 + 3_600_000));
        assert_eq!(user.name.as_deref(), Some("Min"));

        let user = User::from_exchange(ProviderId::Kakao, profile, TokenResponse::new("at"), 1_000);
        assert_eq!(user.expires_at, None);
        assert!(!user.is_expired_at(i64::MAX));
    }

    #[test]
    fn expiry_is_strict() {
        let user = User::from_exchange(
            ProviderId::Google,
            ProfileResponse::new("1"),
            TokenResponse::new("at").with_expires_in(10),
            0,
        );
        assert!(!user.is_expired_at(10_000));
        assert!(user.is_expired_at(10_001));
    }

    #[test]
    fn user_persists_in_camel_case() {
        let user = User {
            id: "1".into(),
            email: None,
            name: Some("Min".into()),
            picture: None,
            provider: ProviderId::Kakao,
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: Some(5),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["accessToken"], "at");
        assert_eq!(json["refreshToken"], "rt");
        assert_eq!(json["expiresAt"], 5);
        assert_eq!(json["provider"], "kakao");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn profile_keeps_unknown_fields_in_extra() {
        let profile: ProfileResponse = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "email": "a@b.c",
            "verified_email": true,
            "locale": "ko"
        }))
        .unwrap();
        assert_eq!(profile.id, "abc");
        assert_eq!(profile.extra["verified_email"], true);
        assert_eq!(profile.extra["locale"], "ko");
    }

    #[test]
    fn display_name_falls_back() {
        let mut user = User::from_exchange(
            ProviderId::Google,
            ProfileResponse::new("id-1").with_email(Some("a@b.c".into())),
            TokenResponse::new("at"),
            0,
        );
        assert_eq!(user.display_name(), "a@b.c");
        user.email = None;
        assert_eq!(user.display_name(), "id-1");
    }
}
