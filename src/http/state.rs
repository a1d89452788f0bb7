use crate::session::CallEngine;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The engine conducting this process's conversation
    pub engine: CallEngine,
}

impl AppState {
    pub fn new(engine: CallEngine) -> Self {
        Self { engine }
    }
}
