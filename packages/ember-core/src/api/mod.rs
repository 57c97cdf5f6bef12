//! HTTP/WebSocket API layer.
//!
//! A deliberately small surface: `/ws` carries the sync bus, `/health`
//! answers liveness probes. All state mutation happens in the WS dispatch
//! path; HTTP handlers only read.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::acquire::Acquirer;
use crate::engine::PcmEngine;
use crate::library::MediaLibrary;
use crate::protocol::SERVICE_ID;
use crate::rooms::RoomRegistry;

pub mod bus;
pub mod connection;
pub mod ws;

pub use bus::SyncBus;
pub use connection::{ConnectionGuard, ConnectionRegistry};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the requested address.
    #[error("failed to bind server address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin handle bundle: all business logic lives in the services.
#[derive(Clone)]
pub struct AppState {
    /// Disk-backed track store.
    pub library: Arc<MediaLibrary>,
    /// URL → library-entry pipeline.
    pub acquirer: Arc<Acquirer>,
    /// Per-room PCM buffers.
    pub engine: Arc<PcmEngine>,
    /// Authoritative room state.
    pub rooms: Arc<RoomRegistry>,
    /// Peer routing (unicast/broadcast).
    pub bus: Arc<SyncBus>,
    /// Connection tracking and sid assignment.
    pub connections: Arc<ConnectionRegistry>,
    /// Serializes event handling so room transitions and their broadcasts
    /// never interleave (the cooperative event loop, as a lock).
    pub event_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Serialize)]
struct HealthResponse {
    service: &'static str,
    version: &'static str,
    rooms: usize,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_ID,
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.rooms.room_count(),
        connections: state.connections.connection_count(),
    })
}

/// Builds the router with the WS endpoint and health probe.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until the task is aborted.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("[Server] Listening on http://{}", addr);
    let app = create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
