use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::error::Error;

/// Errors surfaced by the login routes.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Path segment names no known provider.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Known provider without a client id.
    #[error(transparent)]
    NotConfigured(Error),

    /// Any other failure. Sent back to the login page with the message.
    #[error("{source}")]
    Auth {
        login_path: String,
        #[source]
        source: Error,
    },
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownProvider(_) | Self::NotConfigured(_) => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            Self::Auth { login_path, source } => {
                tracing::error!(error = %source, "Auth route error");
                login_error(&login_path, &source.to_string())
            }
        }
    }
}

impl RouteError {
    pub(super) fn from_auth(login_path: &str, source: Error) -> Self {
        match source {
            Error::ProviderNotConfigured(_) => Self::NotConfigured(source),
            other => Self::Auth {
                login_path: login_path.to_string(),
                source: other,
            },
        }
    }
}

pub(super) fn login_error(login_path: &str, message: &str) -> Response {
    Redirect::to(&login_location(login_path, message)).into_response()
}

pub(super) fn login_location(login_path: &str, message: &str) -> String {
    let encoded = urlencoding::encode(message);
    format!("{login_path}?error={encoded}")
}
