use crate::types::ProviderId;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Login or callback attempted for a provider with no registered adapter.
    #[error("Provider {0} is not configured")]
    ProviderNotConfigured(ProviderId),

    /// The token endpoint rejected the authorization code.
    #[error("Failed to exchange code for token: {detail}")]
    TokenExchange {
        provider: ProviderId,
        status: Option<u16>,
        detail: String,
    },

    /// The userinfo endpoint rejected the access token.
    #[error("Failed to fetch user profile: {detail}")]
    ProfileFetch {
        provider: ProviderId,
        status: Option<u16>,
        detail: String,
    },

    /// Opaque callback failure handed to the UI layer. The adapter error is kept as `source`.
    #[error("Failed to authenticate with {provider}")]
    Authentication {
        provider: ProviderId,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to revoke {provider} token: {detail}")]
    Revocation { provider: ProviderId, detail: String },

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Token refresh is not available: {0}")]
    RefreshUnavailable(&'static str),

    #[error("{0}")]
    Callback(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Wraps an adapter failure into the provider-named [`Error::Authentication`].
    #[must_use]
    pub(crate) fn authentication(provider: ProviderId, source: Error) -> Self {
        Self::Authentication {
            provider,
            source: Box::new(source),
        }
    }

    /// Provider that produced this error, when there is one.
    #[must_use]
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::ProviderNotConfigured(provider)
            | Self::TokenExchange { provider, .. }
            | Self::ProfileFetch { provider, .. }
            | Self::Authentication { provider, .. }
            | Self::Revocation { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}
