//! Application state management

use llmserve_core::{ServerConfig, SharedSession, StreamOptions};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: SharedSession,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(session: SharedSession, config: ServerConfig) -> Self {
        Self {
            session,
            config: Arc::new(config),
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::from(&self.config.stream)
    }
}
