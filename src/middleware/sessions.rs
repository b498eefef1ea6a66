use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::StorageConfig;
use crate::manager::AuthManager;
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, MemoryStore};

/// Idle lifetime of a browser session and of its cookie.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Client {
    manager: Arc<AuthManager>,
    last_seen: Instant,
}

/// One [`SessionStore`] per browser, keyed by the session cookie.
///
/// Every client manager is a [`for_session`](AuthManager::for_session) sibling of
/// the template, so providers and the code ledger are shared. A client's record
/// lives under the template's storage keys suffixed with `.{session_id}`, and is
/// rehydrated when an unknown id arrives after a restart.
pub struct ClientSessions {
    template: Arc<AuthManager>,
    storage: Arc<dyn KeyValueStore>,
    idle_timeout: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientSessions {
    /// The template's own session is never used for a client.
    #[must_use]
    pub fn new(template: Arc<AuthManager>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            template,
            storage,
            idle_timeout: DEFAULT_SESSION_TTL,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Clients idle for longer than `timeout` are dropped from memory. Their
    /// persisted record stays and is rehydrated if the cookie comes back.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn template(&self) -> &Arc<AuthManager> {
        &self.template
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// The manager bound to `session_id`, created on first sight.
    pub fn client(&self, session_id: &str) -> Arc<AuthManager> {
        let now = Instant::now();
        let mut clients = self.lock();
        if let Some(client) = clients.get_mut(session_id) {
            client.last_seen = now;
            return Arc::clone(&client.manager);
        }

        let timeout = self.idle_timeout;
        clients.retain(|_, client| now.duration_since(client.last_seen) < timeout);

        let manager = Arc::new(self.template.for_session(self.session_for(session_id)));
        clients.insert(
            session_id.to_string(),
            Client {
                manager: Arc::clone(&manager),
                last_seen: now,
            },
        );
        tracing::debug!(clients = clients.len(), "Browser session opened");
        manager
    }

    /// A manager on a throwaway in-memory session, for requests that carry no
    /// session cookie. Nothing it records outlives the request.
    #[must_use]
    pub fn ephemeral(&self) -> Arc<AuthManager> {
        let session = SessionStore::new(
            Arc::new(MemoryStore::new()),
            StorageConfig::default(),
            self.template.session().callbacks(),
        );
        Arc::new(self.template.for_session(Arc::new(session)))
    }

    /// Forgets `session_id` in memory. Call after logging the client out.
    pub fn remove(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn session_for(&self, session_id: &str) -> Arc<SessionStore> {
        let base = self.template.session();
        let keys = base.storage_keys();
        let keys = StorageConfig {
            token_key: format!("{}.{session_id}", keys.token_key),
            user_key: format!("{}.{session_id}", keys.user_key),
        };
        Arc::new(SessionStore::new(
            Arc::clone(&self.storage),
            keys,
            base.callbacks(),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
