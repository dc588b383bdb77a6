use std::sync::Arc;

use crate::ws::{ConnectionRegistry, NotificationDispatcher};

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry and dispatcher are constructed once at startup and owned
/// here — not ambient globals. The task mutation pipeline holds its own
/// `NotificationDispatcher` clone and calls it after each commit.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connections per user
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out of committed task events to the assignee's connections
    pub dispatcher: NotificationDispatcher,
}

impl AppState {
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = NotificationDispatcher::new(registry.clone());
        Self {
            registry,
            dispatcher,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
