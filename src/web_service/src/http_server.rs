use crate::http_handler::{health, route_metrics, MetricsHandler};

use anyhow::anyhow;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::error;

pub struct GatewayRest;

impl GatewayRest {
    pub async fn start_server<F>(
        addr: String,
        port: u16,
        enable_metric: bool,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut app = Router::new()
            .route("/", get("Hi I'm GatewayREST"))
            .route("/health", get(health));

        if enable_metric {
            app = app.merge(route_metrics(MetricsHandler {}));
        }

        app = app.layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new()));
        let listener = tokio::net::TcpListener::bind(format!("{addr}:{port}")).await?;

        match axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to start GatewayRest {e:?}");
                Err(anyhow!(e.to_string()))
            }
        }
    }
}
