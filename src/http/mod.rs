//! HTTP API server for external control (call UI)
//!
//! - POST /call/start - Start a conversation from a scenario
//! - POST /call/stop - End the conversation
//! - POST /call/mute - Toggle microphone mute
//! - POST /call/reset - Return to idle after results or an error
//! - GET /call/status - Engine snapshot
//! - GET /call/transcript - Committed turns plus partial text
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, MuteResponse, StartCallRequest};
pub use routes::create_router;
pub use state::AppState;
