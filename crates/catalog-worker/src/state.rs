//! Shared application state.

use std::sync::Arc;

use catalog_messaging::queue::IntegrationEventQueue;

/// State shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Queue the relay drains; its backlog is reported by `/health`.
    pub queue: Arc<dyn IntegrationEventQueue>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(queue: Arc<dyn IntegrationEventQueue>) -> Self {
        Self { queue }
    }
}
