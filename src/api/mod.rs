//! HTTP surface for the command envelope protocol
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/status` - Latest status per sub-component
//! - `POST /api/v1/commands` - Handle one command (`{"cmd": "Add", "data": {...}}`)
//!
//! Command failures are part of the reply envelope and still answer 200;
//! only a body that is not an envelope at all is rejected.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::coordinator::CommandHandler;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub handler: Arc<dyn CommandHandler>,
}

impl ApiState {
    pub fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }
}

/// Build the router without binding a socket
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health_check))
        .route("/api/v1/status", get(routes::get_status))
        .route("/api/v1/commands", post(routes::handle_command))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_addr` and serve the API in a background task
///
/// Returns the server's local address.
pub async fn spawn_api_server(bind_addr: SocketAddr, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    let app = router(state);

    info!("API server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {e}");
        }
    });

    Ok(addr)
}
