//! Plug-and-play login routes for Axum.
//!
//! Serves the whole authorization-code round trip: a login page, a redirect per
//! provider, the provider callbacks, logout, and a guarded home page. Each browser
//! gets its own session, bound by an encrypted session cookie.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use staypay_auth::middleware::{RouteSettings, auth_routes, sessions_from_env};
//!
//! // 1. Configure providers from GOOGLE_* / KAKAO_* env vars
//! let sessions = sessions_from_env()?;
//!
//! // 2. Mount the routes
//! let app = axum::Router::new().merge(auth_routes(sessions, RouteSettings::from_env()?));
//! ```

mod config;
mod cookies;
mod error;
mod routes;
mod sessions;
mod state;

pub use config::{RouteSettings, sessions_from_env};
pub use error::RouteError;
pub use routes::auth_routes;
pub use sessions::{ClientSessions, DEFAULT_SESSION_TTL};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
