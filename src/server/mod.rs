//! HTTP surface
//!
//! | Route | |
//! |---|---|
//! | `POST /api/workflows/submit` | submit a request for the calling owner |
//! | `GET /api/workflows` | list the owner's executions (`?status=&limit=`) |
//! | `GET /api/workflows/:execution_id` | one of the owner's executions |
//! | `POST /webhook/:execution_id` | engine completion callback |
//! | `GET /health` | liveness |

mod auth;
mod error;
mod handlers;


use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::reconcile::CallbackReconciler;
use crate::store::LifecycleStore;
use crate::submission::SubmissionOrchestrator;

pub use auth::{Owner, OWNER_HEADER};
pub use error::ApiError;
pub use handlers::WebhookResponse;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LifecycleStore>,
    pub submissions: Arc<SubmissionOrchestrator>,
    pub reconciler: Arc<CallbackReconciler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/workflows", get(handlers::list))
        .route("/api/workflows/submit", post(handlers::submit))
        .route("/api/workflows/:execution_id", get(handlers::get))
        .route("/webhook/:execution_id", post(handlers::webhook))
        // Path older engine deployments were configured with
        .route("/api/workflows/webhook/:execution_id", post(handlers::webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `bind` until Ctrl-C
pub async fn serve(router: Router, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
