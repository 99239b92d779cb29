//! Axum server and gateway lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use parley_core::error::Result;

use crate::refresh::spawn_background_tasks;
use crate::routes::{chat_handler, clear_handler, health_handler, history_handler, ws_handler};
use crate::state::GatewayState;

pub struct Gateway;

impl Gateway {
    pub fn router(state: Arc<GatewayState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/chat", post(chat_handler))
            .route("/history", get(history_handler))
            .route("/clear", post(clear_handler))
            .route("/issueSummary", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `addr` (`host:port`, port 0 picks a free one), start serving and
    /// spawn the background loops.
    pub async fn bind(state: Arc<GatewayState>, addr: &str) -> Result<GatewayHandle> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Gateway listening on {local_addr}");

        state.tools.start_all().await;
        spawn_background_tasks(&state);

        let app = Self::router(state.clone());
        let shutdown = state.cancel.clone().cancelled_owned();
        state.tasks.spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(%e, "Gateway server error");
            }
        });

        Ok(GatewayHandle { local_addr, state })
    }
}

/// A running gateway.
pub struct GatewayHandle {
    local_addr: SocketAddr,
    state: Arc<GatewayState>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Stop the background loops, close every subscriber with "going away",
    /// and wait for all supervised tasks to finish.
    pub async fn shutdown(self) {
        info!("Gateway shutting down");
        self.state.cancel.cancel();
        self.state.hub.close_all().await;
        self.state.tasks.close();
        self.state.tasks.wait().await;
        self.state.tools.stop_all().await;
        info!("Gateway stopped");
    }
}
