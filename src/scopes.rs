//! Well-known consent scopes and preset bundles per provider.

use crate::types::ProviderId;

/// Kakao consent items. Only items enabled in the Kakao developer console may be requested.
pub mod kakao {
    /// Nickname (default consent item).
    pub const PROFILE_NICKNAME: &str = "profile_nickname";
    pub const PROFILE_IMAGE: &str = "profile_image";
    pub const ACCOUNT_EMAIL: &str = "account_email";
    pub const GENDER: &str = "gender";
    pub const AGE_RANGE: &str = "age_range";
    pub const BIRTHDAY: &str = "birthday";
    pub const PHONE_NUMBER: &str = "phone_number";
    pub const SHIPPING_ADDRESS: &str = "shipping_address";
    pub const TALK_MESSAGE: &str = "talk_message";
    pub const FRIENDS: &str = "friends";
}

/// Google OAuth scopes.
pub mod google {
    pub const OPENID: &str = "openid";
    pub const EMAIL: &str = "email";
    pub const PROFILE: &str = "profile";
    pub const CALENDAR: &str = "https://www.googleapis.com/auth/calendar";
    pub const DRIVE: &str = "https://www.googleapis.com/auth/drive";
    pub const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
    pub const YOUTUBE_READONLY: &str = "https://www.googleapis.com/auth/youtube.readonly";
}

/// Predefined scope bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePreset {
    /// Bare identity: nickname on Kakao, `openid` on Google.
    Minimal,
    /// Identity plus email and picture.
    Basic,
    /// Kakao: demographic items. Google: calendar and drive access.
    Full,
}

impl ScopePreset {
    /// Ordered scope list for `provider`.
    #[must_use]
    pub fn scopes(self, provider: ProviderId) -> Vec<String> {
        let list: &[&str] = match (provider, self) {
            (ProviderId::Kakao, Self::Minimal) => &[kakao::PROFILE_NICKNAME],
            (ProviderId::Kakao, Self::Basic) => &[
                kakao::PROFILE_NICKNAME,
                kakao::PROFILE_IMAGE,
                kakao::ACCOUNT_EMAIL,
            ],
            (ProviderId::Kakao, Self::Full) => &[
                kakao::PROFILE_NICKNAME,
                kakao::PROFILE_IMAGE,
                kakao::ACCOUNT_EMAIL,
                kakao::GENDER,
                kakao::AGE_RANGE,
                kakao::BIRTHDAY,
            ],
            (ProviderId::Google, Self::Minimal) => &[google::OPENID],
            (ProviderId::Google, Self::Basic) => &[google::OPENID, google::EMAIL, google::PROFILE],
            (ProviderId::Google, Self::Full) => &[
                google::OPENID,
                google::EMAIL,
                google::PROFILE,
                google::CALENDAR,
                google::DRIVE,
            ],
        };
        list.iter().map(|s| (*s).to_string()).collect()
    }
}
