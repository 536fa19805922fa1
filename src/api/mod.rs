pub mod handlers;
pub mod types;

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::store::PgEventStore;

#[derive(Clone)]
pub struct AppState {
    pub store: PgEventStore,
}

pub fn router(store: PgEventStore) -> Router {
    let state = Arc::new(AppState { store });

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/events", get(handlers::list_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the read API until `shutdown` is cancelled, then stop accepting
/// connections and drain in-flight requests.
pub async fn serve(
    store: PgEventStore,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(store);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
