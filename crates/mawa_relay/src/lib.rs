//! Mawa Collaboration Relay
//!
//! A WebSocket relay for real-time collaboration in the Mawa dashboard.
//! Clients join a room by connecting to its path (`/hall-42` joins room
//! `hall-42`); each room owns one authoritative CRDT document. Inbound
//! binary frames are applied to the room's document and forwarded,
//! unmodified, to every other connection in the same room. The first frame
//! a new connection receives is always the room's full-state snapshot.
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 1234)
//! - `EVICT_IDLE_ROOMS`: Remove a room once its last connection leaves
//!   (default: false - rooms persist for the life of the process)

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod handlers;
pub mod registry;
pub mod room;

pub use config::Config;
pub use registry::Registry;

/// Build the relay's router over a registry.
///
/// Static routes take precedence over the room catch-all, so `/health` and
/// `/api/*` are never interpreted as room names.
pub fn app(registry: Arc<Registry>) -> Router {
    let ws_state = handlers::ws::WsState {
        registry: Arc::clone(&registry),
    };
    let api_state = handlers::api::ApiState { registry };

    Router::new()
        // Health check
        .route("/", get(|| async { "Mawa Collaboration Relay" }))
        .route("/health", get(|| async { "OK" }))
        // Status API
        .nest("/api", handlers::api_routes(api_state))
        // WebSocket sync endpoint - the path is the room name
        .route("/{room}", get(handlers::ws_handler).with_state(ws_state))
        .layer(TraceLayer::new_for_http())
}
