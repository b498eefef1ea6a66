#![doc = include_str!("../README.md")]

pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod navigation;
pub mod provider;
pub mod scopes;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use callback::{CallbackHandler, CallbackOutcome, CallbackParams, CallbackSettings, CallbackState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AuthCallbacks, AuthConfig, AuthConfigUpdate, ProviderConfig, ProviderConfigUpdate,
    StorageConfig, StorageConfigUpdate,
};
pub use error::Error;
pub use guard::{GuardDecision, RouteGuard};
pub use manager::AuthManager;
pub use navigation::{DetachedNavigator, Navigator, RecordingNavigator};
pub use provider::{Endpoints, GoogleProvider, KakaoProvider, OAuthProvider};
pub use scopes::ScopePreset;
pub use session::{SessionState, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{ProfileResponse, ProviderId, TokenResponse, User};
