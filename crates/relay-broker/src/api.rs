use crate::Broker;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health and metrics routes
pub fn create_http_api(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(broker)
}

#[derive(Debug, Serialize)]
struct QueueStats {
    name: String,
    depth: usize,
    consumers: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
    queues: Vec<QueueStats>,
}

async fn health_check(State(broker): State<Arc<Broker>>) -> Json<HealthResponse> {
    let table = broker.table();
    let queues = table
        .queue_names()
        .into_iter()
        .map(|name| QueueStats {
            depth: table.depth(&name).unwrap_or(0),
            consumers: table.consumer_count(&name).unwrap_or(0),
            name,
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: table.session_count(),
        queues,
    })
}

async fn metrics_handler(State(broker): State<Arc<Broker>>) -> Response {
    match broker.metrics().render() {
        Ok(body) => body.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
