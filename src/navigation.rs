use std::sync::{Mutex, PoisonError};

/// Sends the user agent somewhere else: a provider's authorization page or an app route.
///
/// A navigation to an external URL unloads the app, so callers must not rely on any
/// work scheduled after it.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Drops every navigation. For hosts that answer with their own redirects, like
/// the HTTP route layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedNavigator;

impl Navigator for DetachedNavigator {
    fn navigate(&self, location: &str) {
        tracing::trace!(location, "Navigation left to the host");
    }
}

/// Keeps every requested location in order instead of leaving the page.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent location, if any.
    #[must_use]
    pub fn last(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, location: &str) {
        tracing::debug!(location, "Navigating");
        self.lock().push(location.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let nav = RecordingNavigator::new();
        assert_eq!(nav.last(), None);
        nav.navigate("/login");
        nav.navigate("/");
        assert_eq!(nav.history(), vec!["/login", "/"]);
        assert_eq!(nav.last().as_deref(), Some("/"));
    }
}
