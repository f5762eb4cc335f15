//! HTTP surface
//!
//! - GET /conversation - WebSocket upgrade to the conversation event channel
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::AppState;
