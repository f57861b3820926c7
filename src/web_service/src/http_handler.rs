use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Clone, Copy)]
pub struct MetricsHandler;

impl MetricsHandler {
    pub fn render(&self) -> String {
        if let Some(prometheus_handle) = common::metrics::try_handle() {
            prometheus_handle.render()
        } else {
            "Please initialize the prometheus context first.".to_string()
        }
    }
}

pub fn route_metrics<S>(metrics_handler: MetricsHandler) -> Router<S> {
    Router::new()
        .route("/metrics", get(metrics_get))
        .with_state(metrics_handler)
}

async fn metrics_get(state: State<MetricsHandler>) -> String {
    state.render()
}

#[derive(Serialize)]
pub struct HealthReply {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthReply> {
    Json(HealthReply { status: "ok" })
}
