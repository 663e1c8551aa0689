//! Read-only HTTP status surface.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 while the process is serving
//! - `GET /status` - Returns the scheduler's latest [`RelayStatus`] as JSON
//!
//! Handlers read the status channel the scheduler publishes to. They never
//! open or lock the delivery store.

use std::net::SocketAddr;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::scheduler::RelayStatus;

pub mod health;
pub mod status;

pub use health::health_handler;
pub use status::status_handler;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    status: watch::Receiver<RelayStatus>,
}

impl AppState {
    pub fn new(status: watch::Receiver<RelayStatus>) -> Self {
        AppState { status }
    }

    /// Latest published status.
    pub fn current(&self) -> RelayStatus {
        self.status.borrow().clone()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

/// Serves the router on `addr` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    app_state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Status server listening");

    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
