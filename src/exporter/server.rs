use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;

use super::Exporter;

const METRICS_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub fn router(exporter: Exporter) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/", get(health))
        .fallback(not_found)
        .with_state(exporter)
}

async fn metrics(State(exporter): State<Exporter>) -> impl IntoResponse {
    let body = exporter.render_metrics().await;
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body)
}

async fn health() -> &'static str {
    "OK"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, exporter: Exporter, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr()?;
    info!("Exporter listening on http://{}/metrics", addr);
    axum::serve(listener, router(exporter))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Exporter stopped");
    Ok(())
}
