/**
 * ENDPOINT HTTP - Exposition Prometheus de l'exporter
 *
 * RÔLE :
 * Sert le registre de métriques au format texte pour le scrape Prometheus,
 * plus un état JSON du poll loop pour le debug.
 *
 * ROUTES :
 * - GET /metrics et GET / : exposition texte (0.0.4)
 * - GET /health : ExporterHealth en JSON
 *
 * Le scrape lit toujours les dernières valeurs publiées, il ne déclenche
 * jamais d'appel au cloud.
 */

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::health::{ExporterHealth, HealthTracker};
use crate::registry::MetricRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MetricRegistry>,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(get_metrics))
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .with_state(app_state)
}

pub async fn serve(listener: TcpListener, app_state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("metrics available on http://{addr}/metrics");
    }
    axum::serve(listener, build_router(app_state)).await
}

// GET /metrics
async fn get_metrics(State(app): State<AppState>) -> Response {
    match app.registry.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, app.registry.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// GET /health
async fn get_health(State(app): State<AppState>) -> Json<ExporterHealth> {
    Json(app.health.get_health())
}
