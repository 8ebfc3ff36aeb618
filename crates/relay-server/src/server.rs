// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use crate::error::{ServerError, ServerResult};
use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Routes with the middleware stack applied
pub fn build_app(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http());

    Router::new()
        .route("/healthz", get(handlers::health::health_check))
        .route("/v1/messages", post(handlers::messages::create_message))
        .route("/v1/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/v1/sessions/:conversation_id",
            delete(handlers::sessions::delete_session),
        )
        .with_state(state)
        .layer(middleware_stack)
}

/// HTTP relay server
pub struct Server {
    bind_addr: SocketAddr,
    app: Router,
}

impl Server {
    pub fn new(bind_addr: SocketAddr, state: AppState) -> Self {
        Self {
            bind_addr,
            app: build_app(state),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> ServerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|err| ServerError::Internal(format!("HTTP server error: {err}")))
    }
}
